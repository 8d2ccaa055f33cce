//! Dispatches replicated commands to remote members.
//!
//! The [`RpcManager`] resolves the response mode of every call, marshals the
//! command, makes exactly one transport call and, for synchronous calls, waits
//! on the [`ReplyRouter`] until the replies satisfy the invocation.

mod background;
mod router;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::aggregator::{ResponseAggregator, ResponseSet};
use crate::command::{Command, Marshaller};
use crate::config::ClusteringConfig;
use crate::error::TransportError;
use crate::filter::ResponseFilter;
use crate::flags::Flags;
use crate::mode::{determine_mode, ResponseMode};
use crate::transport::{Address, Transport};
use crate::{Result, RpcError};

use background::AsyncJob;
use router::Outcome;
pub use router::ReplyRouter;

/// Capacity of the out-of-band failure channel.
const FAILURE_CHANNEL_CAPACITY: usize = 64;

/// A single marshalled command on its way to the transport.
#[derive(Clone)]
pub struct InvocationRequest {
    pub id: u64,
    pub origin: Address,
    pub targets: Vec<Address>,
    pub payload: Arc<Vec<u8>>,
    pub mode: ResponseMode,
    pub timeout: Duration,
    pub filter: Option<Arc<dyn ResponseFilter>>,
    pub ignore_leavers: bool,
}

impl std::fmt::Debug for InvocationRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvocationRequest")
            .field("id", &self.id)
            .field("origin", &self.origin)
            .field("targets", &self.targets)
            .field("payload_len", &self.payload.len())
            .field("mode", &self.mode)
            .field("timeout", &self.timeout)
            .field("ignore_leavers", &self.ignore_leavers)
            .finish_non_exhaustive()
    }
}

/// An asynchronous invocation that failed after its caller had moved on.
#[derive(Debug, Clone)]
pub struct AsyncFailure {
    pub request_id: u64,
    pub targets: Vec<Address>,
    pub reason: String,
}

pub struct RpcManager<T> {
    transport: Arc<T>,
    config: ClusteringConfig,
    marshaller: Marshaller,
    router: ReplyRouter,
    next_id: AtomicU64,
    background: Option<mpsc::Sender<AsyncJob>>,
    failures: broadcast::Sender<AsyncFailure>,
}

impl<T> RpcManager<T>
where
    T: Transport,
{
    /// Create a manager on top of `transport`.
    ///
    /// With `async_marshalling` enabled this spawns the background marshaller
    /// and so must be called from within a tokio runtime.
    pub fn new(transport: Arc<T>, config: ClusteringConfig) -> Result<Self> {
        config.validate()?;
        let marshaller = Marshaller::new(config.max_command_size);
        let router = ReplyRouter::new();
        transport.attach(router.clone());
        let (failures, _) = broadcast::channel(FAILURE_CHANNEL_CAPACITY);

        let background = if config.async_marshalling {
            Some(background::spawn(
                transport.clone(),
                marshaller,
                failures.clone(),
                config.async_queue_capacity,
            ))
        } else {
            None
        };

        Ok(Self {
            transport,
            config,
            marshaller,
            router,
            next_id: AtomicU64::new(1),
            background,
            failures,
        })
    }

    pub fn config(&self) -> &ClusteringConfig {
        &self.config
    }

    pub fn address(&self) -> Address {
        self.transport.address()
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    pub fn router(&self) -> &ReplyRouter {
        &self.router
    }

    /// Listen for failures of asynchronous invocations.
    pub fn subscribe_failures(&self) -> broadcast::Receiver<AsyncFailure> {
        self.failures.subscribe()
    }

    /// Resolve the response mode this manager would use for `flags`.
    pub fn response_mode(&self, flags: Flags) -> Result<ResponseMode> {
        determine_mode(self.config.mode, self.config.async_marshalling, flags)
    }

    /// Send `command` to `targets`, or to every other member when `targets` is
    /// empty.
    ///
    /// Synchronous calls return the replies once every target answered, the
    /// filter said `enough`, or every missing target left and `ignore_leavers`
    /// excused it. Asynchronous calls return `None` as soon as the command was
    /// handed off; their failures are reported through
    /// [`RpcManager::subscribe_failures`].
    pub async fn invoke_remotely(
        &self,
        targets: &[Address],
        command: &Command,
        flags: Flags,
        timeout: Duration,
        filter: Option<Arc<dyn ResponseFilter>>,
        ignore_leavers: bool,
    ) -> Result<Option<ResponseSet>> {
        let mode = self.response_mode(flags)?;
        let targets = self.resolve_targets(targets);
        if targets.is_empty() {
            debug!(%mode, "No remote members to invoke");
            return Ok(mode.is_synchronous().then(ResponseSet::default));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        debug!(request_id = id, %mode, ?targets, "Invoking remotely");
        match mode {
            ResponseMode::Synchronous => self
                .invoke_sync(id, targets, command, timeout, filter, ignore_leavers)
                .await
                .map(Some),
            ResponseMode::AsynchronousWithSyncMarshalling => {
                let payload = self.marshaller.marshall(command)?;
                let request =
                    self.request(id, targets, payload, mode, timeout, filter, ignore_leavers);
                match &self.background {
                    Some(queue) => enqueue(queue, AsyncJob::Send { request, sent: None }).await?,
                    None => send_async(self.transport.as_ref(), &self.failures, request).await,
                }
                Ok(None)
            }
            ResponseMode::Asynchronous => {
                match &self.background {
                    Some(queue) => {
                        // Encoding is deferred but an oversized command still fails here.
                        self.marshaller.check_size(command)?;
                        let job = AsyncJob::Marshal {
                            id,
                            origin: self.transport.address(),
                            targets,
                            command: command.clone(),
                            timeout,
                        };
                        enqueue(queue, job).await?;
                    }
                    None => {
                        let payload = self.marshaller.marshall(command)?;
                        let request = self.request(
                            id,
                            targets,
                            payload,
                            mode,
                            timeout,
                            filter,
                            ignore_leavers,
                        );
                        send_async(self.transport.as_ref(), &self.failures, request).await;
                    }
                }
                Ok(None)
            }
        }
    }

    async fn invoke_sync(
        &self,
        id: u64,
        targets: Vec<Address>,
        command: &Command,
        timeout: Duration,
        filter: Option<Arc<dyn ResponseFilter>>,
        ignore_leavers: bool,
    ) -> Result<ResponseSet> {
        let payload = self.marshaller.marshall(command)?;
        let deadline = Instant::now() + timeout;
        let aggregator = ResponseAggregator::new(&targets, filter.clone(), ignore_leavers);
        // Registered before sending, replies may beat the transport call back.
        let mut completion = self.router.register(id, aggregator);

        let request = self.request(
            id,
            targets,
            payload,
            ResponseMode::Synchronous,
            timeout,
            filter,
            ignore_leavers,
        );
        let sent = match tokio::time::timeout_at(deadline, self.send_in_order(request)).await {
            Ok(sent) => sent,
            Err(_) => return self.expired(id, timeout, completion).await,
        };
        match sent {
            Ok(()) => {}
            Err(TransportError::Suspected(addrs)) => {
                for addr in &addrs {
                    self.router.suspect(id, addr);
                }
            }
            Err(e) => {
                self.router.cancel(id);
                return Err(RpcError::from_transport(e));
            }
        }

        match tokio::time::timeout_at(deadline, &mut completion).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(reply_channel_closed()),
            Err(_) => self.expired(id, timeout, completion).await,
        }
    }

    /// Send a synchronous request behind anything still queued for the
    /// background marshaller.
    async fn send_in_order(&self, request: InvocationRequest) -> background::Sent {
        match &self.background {
            Some(queue) => {
                let (tx, rx) = oneshot::channel();
                let job = AsyncJob::Send {
                    request,
                    sent: Some(tx),
                };
                queue
                    .send(job)
                    .await
                    .map_err(|_| TransportError::ChannelClosed)?;
                rx.await.map_err(|_| TransportError::ChannelClosed)?
            }
            None => self.transport.invoke_remotely(request).await,
        }
    }

    /// The deadline of `id` passed. A request that completed in the meantime
    /// still reports its outcome.
    async fn expired(
        &self,
        id: u64,
        timeout: Duration,
        completion: oneshot::Receiver<Outcome>,
    ) -> Result<ResponseSet> {
        match self.router.expire(id, timeout) {
            Some(err) => {
                debug!(request_id = id, ?timeout, "Synchronous invocation timed out");
                Err(err)
            }
            None => completion.await.map_err(|_| reply_channel_closed())?,
        }
    }

    /// Resolve the targets against one snapshot of the cluster view. The local
    /// member is never a target.
    fn resolve_targets(&self, targets: &[Address]) -> Vec<Address> {
        let local = self.transport.address();
        let members = self.transport.members();
        if targets.is_empty() {
            members.into_iter().filter(|m| *m != local).collect()
        } else {
            let mut resolved: Vec<Address> = Vec::with_capacity(targets.len());
            for target in targets {
                if *target != local && !resolved.contains(target) {
                    resolved.push(target.clone());
                }
            }
            resolved
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn request(
        &self,
        id: u64,
        targets: Vec<Address>,
        payload: Vec<u8>,
        mode: ResponseMode,
        timeout: Duration,
        filter: Option<Arc<dyn ResponseFilter>>,
        ignore_leavers: bool,
    ) -> InvocationRequest {
        InvocationRequest {
            id,
            origin: self.transport.address(),
            targets,
            payload: Arc::new(payload),
            mode,
            timeout,
            filter,
            ignore_leavers,
        }
    }
}

async fn enqueue(queue: &mpsc::Sender<AsyncJob>, job: AsyncJob) -> Result<()> {
    queue
        .send(job)
        .await
        .map_err(|_| RpcError::Unavailable("async marshaller stopped".to_string()))
}

fn reply_channel_closed() -> RpcError {
    RpcError::Unavailable("reply channel closed before completion".to_string())
}

/// Hand an asynchronous request to the transport. Failures can no longer reach
/// the caller, so they are logged and broadcast instead.
pub(crate) async fn send_async<T: Transport>(
    transport: &T,
    failures: &broadcast::Sender<AsyncFailure>,
    request: InvocationRequest,
) {
    let request_id = request.id;
    let targets = request.targets.clone();
    if let Err(e) = transport.invoke_remotely(request).await {
        let err = RpcError::from_transport(e);
        report_async_failure(failures, request_id, targets, &err);
    }
}

pub(crate) fn report_async_failure(
    failures: &broadcast::Sender<AsyncFailure>,
    request_id: u64,
    targets: Vec<Address>,
    err: &RpcError,
) {
    warn!(request_id, ?targets, "Asynchronous invocation failed: {err}");
    let failure = AsyncFailure {
        request_id,
        targets,
        reason: err.to_string(),
    };
    // Nobody listening is fine, the failure is already logged.
    let _ = failures.send(failure);
}
