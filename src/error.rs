use crate::aggregator::ResponseSet;
use crate::transport::Address;

/// Errors surfaced to callers of the replication layer.
///
/// Transport failures never reach the caller as-is, they are translated into one
/// of these variants so that handling does not depend on the resolved mode.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Timed out after {timeout:?} waiting for {missing:?}")]
    Timeout {
        timeout: std::time::Duration,
        missing: Vec<Address>,
        partial: ResponseSet,
    },

    #[error("Member {0} was suspected while a reply was pending")]
    MemberSuspected(Address),

    #[error("Unable to marshall command: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Response from {from} was rejected by the response filter")]
    Rejected { from: Address, partial: ResponseSet },

    #[error("Transport unavailable: {0}")]
    Unavailable(String),

    #[error("Unable to setup tracing: {0}")]
    TracingError(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Errors raised by a [`crate::Transport`] implementation.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Members {0:?} are suspected to have failed")]
    Suspected(Vec<Address>),

    #[error("Channel is closed")]
    ChannelClosed,
}

impl RpcError {
    /// Translate a transport failure observed while dispatching a command.
    pub(crate) fn from_transport(err: TransportError) -> Self {
        match err {
            TransportError::Suspected(addrs) => {
                RpcError::MemberSuspected(addrs.into_iter().next().unwrap_or_default())
            }
            TransportError::ChannelClosed => RpcError::Unavailable("channel closed".to_string()),
        }
    }

    /// The responses gathered before the call failed, when there are any.
    pub fn partial_responses(&self) -> Option<&ResponseSet> {
        match self {
            RpcError::Timeout { partial, .. } | RpcError::Rejected { partial, .. } => Some(partial),
            _ => None,
        }
    }
}
