use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::debug;

use super::{report_async_failure, send_async, AsyncFailure, InvocationRequest};
use crate::command::{Command, Marshaller};
use crate::error::TransportError;
use crate::mode::ResponseMode;
use crate::transport::{Address, Transport};

pub(crate) type Sent = std::result::Result<(), TransportError>;

/// Work for the background marshaller. While it runs, every send of the manager
/// goes through its queue so nothing overtakes a command still waiting in it.
pub(crate) enum AsyncJob {
    /// A plain asynchronous command, marshalled off the caller's task.
    Marshal {
        id: u64,
        origin: Address,
        targets: Vec<Address>,
        command: Command,
        timeout: Duration,
    },
    /// A request the caller already marshalled. When `sent` is set the caller
    /// waits for the transport's verdict, otherwise failures go out-of-band.
    Send {
        request: InvocationRequest,
        sent: Option<oneshot::Sender<Sent>>,
    },
}

/// Start the background marshaller. Jobs are processed one at a time in the
/// order they were queued; once `capacity` jobs are waiting, producers wait.
pub(crate) fn spawn<T: Transport>(
    transport: Arc<T>,
    marshaller: Marshaller,
    failures: broadcast::Sender<AsyncFailure>,
    capacity: usize,
) -> mpsc::Sender<AsyncJob> {
    let (tx, mut rx) = mpsc::channel::<AsyncJob>(capacity);
    tokio::spawn(async move {
        while let Some(job) = rx.recv().await {
            match job {
                AsyncJob::Marshal {
                    id,
                    origin,
                    targets,
                    command,
                    timeout,
                } => match marshaller.marshall(&command) {
                    Ok(payload) => {
                        let request = InvocationRequest {
                            id,
                            origin,
                            targets,
                            payload: Arc::new(payload),
                            mode: ResponseMode::Asynchronous,
                            timeout,
                            filter: None,
                            ignore_leavers: false,
                        };
                        send_async(transport.as_ref(), &failures, request).await;
                    }
                    Err(e) => report_async_failure(&failures, id, targets, &e),
                },
                AsyncJob::Send {
                    request,
                    sent: Some(sent),
                } => {
                    let request_id = request.id;
                    let result = transport.invoke_remotely(request).await;
                    if sent.send(result).is_err() {
                        debug!(request_id, "Caller stopped waiting for the send");
                    }
                }
                AsyncJob::Send {
                    request,
                    sent: None,
                } => send_async(transport.as_ref(), &failures, request).await,
            }
        }
        debug!("Async marshaller stopped");
    });
    tx
}
