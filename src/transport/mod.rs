//! The seam between the replication layer and whatever moves bytes between
//! members. Delivery, membership and failure detection live behind [`Transport`].

mod local;

use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;

use crate::error::TransportError;
use crate::rpc::{InvocationRequest, ReplyRouter};

pub use local::{LocalCluster, LocalTransport};

/// Identifies a cluster member.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address(String);

impl Address {
    pub fn new(name: impl Into<String>) -> Self {
        Address(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Address {
    fn from(value: &str) -> Self {
        Address(value.to_string())
    }
}

impl From<String> for Address {
    fn from(value: String) -> Self {
        Address(value)
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub trait Transport: Send + Sync + 'static {
    /// Address of the local member.
    fn address(&self) -> Address;

    /// Current cluster view, in join order, including the local member.
    fn members(&self) -> Vec<Address>;

    /// Register where replies and view changes for this member are delivered.
    fn attach(&self, router: ReplyRouter);

    /// Hand a marshalled command to the targets of `request`.
    ///
    /// The call has the same shape for every response mode and never waits on
    /// replies; for synchronous requests the replies arrive later through the
    /// attached [`ReplyRouter`]. Members that could not be reached are returned
    /// as [`TransportError::Suspected`] after every other target was sent to.
    fn invoke_remotely(
        &self,
        request: InvocationRequest,
    ) -> impl Future<Output = std::result::Result<(), TransportError>> + Send;
}
