//! Collects the replies of one synchronous invocation and decides when it is done.
//!
//! Replies arrive from the transport's tasks in any order and possibly more than
//! once per member. The first reply from a member wins; later ones are dropped.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::command::Response;
use crate::filter::ResponseFilter;
use crate::transport::Address;
use crate::RpcError;

/// Replies keyed by the member that sent them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResponseSet(BTreeMap<Address, Response>);

impl ResponseSet {
    /// A set where every target is still waiting on a reply.
    pub fn expecting<I>(targets: I) -> Self
    where
        I: IntoIterator<Item = Address>,
    {
        ResponseSet(targets.into_iter().map(|a| (a, Response::NoReply)).collect())
    }

    pub fn get(&self, address: &Address) -> Option<&Response> {
        self.0.get(address)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Address, &Response)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of successful replies.
    pub fn successful(&self) -> usize {
        self.0.values().filter(|r| r.is_successful()).count()
    }

    /// Members still owing a reply.
    pub fn missing(&self) -> Vec<Address> {
        self.0
            .iter()
            .filter(|(_, r)| **r == Response::NoReply)
            .map(|(a, _)| a.clone())
            .collect()
    }

    pub(crate) fn record(&mut self, from: Address, response: Response) {
        self.0.insert(from, response);
    }
}

/// Where an invocation stands after an event was applied.
#[derive(Debug)]
pub enum Progress {
    Pending,
    Done(std::result::Result<ResponseSet, RpcError>),
}

pub struct ResponseAggregator {
    responses: ResponseSet,
    filter: Option<Arc<dyn ResponseFilter>>,
    ignore_leavers: bool,
    finished: bool,
}

impl ResponseAggregator {
    pub fn new(
        targets: &[Address],
        filter: Option<Arc<dyn ResponseFilter>>,
        ignore_leavers: bool,
    ) -> Self {
        ResponseAggregator {
            responses: ResponseSet::expecting(targets.iter().cloned()),
            filter,
            ignore_leavers,
            finished: false,
        }
    }

    pub fn responses(&self) -> &ResponseSet {
        &self.responses
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Apply a reply from `from`.
    pub fn on_reply(&mut self, from: Address, response: Response) -> Progress {
        if self.finished {
            return Progress::Pending;
        }
        match self.responses.get(&from) {
            Some(Response::NoReply) => {}
            Some(_) => {
                debug!(%from, "Discarding duplicate reply");
                return Progress::Pending;
            }
            None => {
                debug!(%from, "Discarding reply from a member that was not targeted");
                return Progress::Pending;
            }
        }

        if let Some(filter) = &self.filter {
            if !filter.is_acceptable(&from, &response) {
                debug!(%from, ?response, "Reply rejected by filter");
                self.responses.record(from.clone(), response);
                return self.finish(Err(RpcError::Rejected {
                    from,
                    partial: self.responses.clone(),
                }));
            }
        }

        self.responses.record(from, response);
        if let Some(filter) = &self.filter {
            if filter.enough(&self.responses) {
                debug!("Response filter satisfied");
                return self.finish(Ok(self.responses.clone()));
            }
        }
        self.check_complete()
    }

    /// Apply the departure of `address` from the cluster view.
    pub fn on_member_left(&mut self, address: &Address) -> Progress {
        if self.finished || self.responses.get(address) != Some(&Response::NoReply) {
            return Progress::Pending;
        }
        if !self.ignore_leavers {
            return self.finish(Err(RpcError::MemberSuspected(address.clone())));
        }
        debug!(%address, "Excusing member that left");
        self.responses.record(address.clone(), Response::Suspected);
        self.check_complete()
    }

    /// Build the outcome of a wait that ran out of time.
    pub fn on_timeout(&mut self, timeout: Duration) -> RpcError {
        self.finished = true;
        RpcError::Timeout {
            timeout,
            missing: self.responses.missing(),
            partial: self.responses.clone(),
        }
    }

    fn check_complete(&mut self) -> Progress {
        if self.responses.missing().is_empty() {
            self.finish(Ok(self.responses.clone()))
        } else {
            Progress::Pending
        }
    }

    fn finish(&mut self, outcome: std::result::Result<ResponseSet, RpcError>) -> Progress {
        self.finished = true;
        Progress::Done(outcome)
    }
}
