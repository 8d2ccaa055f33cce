use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::debug;

use crate::aggregator::{Progress, ResponseAggregator, ResponseSet};
use crate::command::Response;
use crate::transport::Address;
use crate::RpcError;

pub(crate) type Outcome = std::result::Result<ResponseSet, RpcError>;

struct PendingInvocation {
    aggregator: ResponseAggregator,
    completion: Option<oneshot::Sender<Outcome>>,
}

/// Correlates replies coming off the transport with the synchronous
/// invocations waiting on them.
///
/// Each in-flight request owns a one-shot channel; whichever event completes the
/// aggregator takes the sender and fires it exactly once.
#[derive(Clone, Default)]
pub struct ReplyRouter {
    pending: Arc<DashMap<u64, PendingInvocation>>,
}

impl ReplyRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(
        &self,
        request_id: u64,
        aggregator: ResponseAggregator,
    ) -> oneshot::Receiver<Outcome> {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(
            request_id,
            PendingInvocation {
                aggregator,
                completion: Some(tx),
            },
        );
        rx
    }

    /// Deliver the reply of `from` to request `request_id`.
    ///
    /// Replies to requests that already completed, timed out or never waited
    /// (asynchronous ones) are dropped.
    pub fn deliver(&self, request_id: u64, from: Address, response: Response) {
        let done = match self.pending.get_mut(&request_id) {
            Some(mut call) => match call.aggregator.on_reply(from, response) {
                Progress::Done(outcome) => call.completion.take().map(|tx| (tx, outcome)),
                Progress::Pending => None,
            },
            None => {
                debug!(request_id, %from, "Dropping reply with no pending request");
                None
            }
        };
        if let Some((tx, outcome)) = done {
            self.complete(request_id, tx, outcome);
        }
    }

    /// A member left the cluster view, every pending request waiting on it is
    /// either excused or failed.
    pub fn member_left(&self, address: &Address) {
        let mut done = Vec::new();
        for mut call in self.pending.iter_mut() {
            if let Progress::Done(outcome) = call.aggregator.on_member_left(address) {
                if let Some(tx) = call.completion.take() {
                    done.push((*call.key(), tx, outcome));
                }
            }
        }
        for (request_id, tx, outcome) in done {
            self.complete(request_id, tx, outcome);
        }
    }

    /// Number of requests waiting on replies.
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    /// The transport could not reach `address` for this one request.
    pub(crate) fn suspect(&self, request_id: u64, address: &Address) {
        let done = match self.pending.get_mut(&request_id) {
            Some(mut call) => match call.aggregator.on_member_left(address) {
                Progress::Done(outcome) => call.completion.take().map(|tx| (tx, outcome)),
                Progress::Pending => None,
            },
            None => None,
        };
        if let Some((tx, outcome)) = done {
            self.complete(request_id, tx, outcome);
        }
    }

    /// Stop waiting on `request_id`, returning the timeout failure if it was
    /// still pending. A request already finished by a reply or a leave is not
    /// timed out, its outcome is on the way to the caller.
    pub(crate) fn expire(&self, request_id: u64, timeout: Duration) -> Option<RpcError> {
        let (_, mut call) = self.pending.remove(&request_id)?;
        if call.aggregator.is_finished() {
            return None;
        }
        Some(call.aggregator.on_timeout(timeout))
    }

    pub(crate) fn cancel(&self, request_id: u64) {
        self.pending.remove(&request_id);
    }

    fn complete(&self, request_id: u64, tx: oneshot::Sender<Outcome>, outcome: Outcome) {
        self.pending.remove(&request_id);
        if tx.send(outcome).is_err() {
            debug!(request_id, "Caller stopped waiting before completion");
        }
    }
}
