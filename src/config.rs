use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::time::Duration;

use crate::{Result, RpcError};

/// Default time a synchronous invocation waits for its replies.
pub const DEFAULT_SYNC_TIMEOUT: Duration = Duration::from_secs(15);

/// Default capacity of the background marshalling queue.
pub const DEFAULT_ASYNC_QUEUE_CAPACITY: usize = 1024;

/// Largest marshalled command accepted, in bytes.
pub const MAX_COMMAND_SIZE: u64 = 1024 * 1024;

/// How a cache propagates its writes to the rest of the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ReplicationMode {
    Local,
    ReplSync,
    ReplAsync,
    DistSync,
    DistAsync,
    InvalidationSync,
    InvalidationAsync,
}

impl ReplicationMode {
    /// Every mode is synchronous except the explicit `*Async` variants; a local
    /// cache never waits on anyone so it counts as synchronous.
    pub fn is_synchronous(&self) -> bool {
        !matches!(
            self,
            Self::ReplAsync | Self::DistAsync | Self::InvalidationAsync
        )
    }

    pub fn is_clustered(&self) -> bool {
        *self != Self::Local
    }

    pub fn is_invalidation(&self) -> bool {
        matches!(self, Self::InvalidationSync | Self::InvalidationAsync)
    }
}

impl Display for ReplicationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::ReplSync => write!(f, "repl-sync"),
            Self::ReplAsync => write!(f, "repl-async"),
            Self::DistSync => write!(f, "dist-sync"),
            Self::DistAsync => write!(f, "dist-async"),
            Self::InvalidationSync => write!(f, "invalidation-sync"),
            Self::InvalidationAsync => write!(f, "invalidation-async"),
        }
    }
}

/// Static clustering settings of a cache. These are already validated by the
/// time they reach the [`crate::RpcManager`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusteringConfig {
    pub mode: ReplicationMode,

    /// Marshal plain asynchronous commands on a background worker instead of
    /// the caller's task. This can reorder a queued command behind a later one
    /// that was forced synchronous.
    pub async_marshalling: bool,

    pub sync_timeout: Duration,

    /// Bound on commands waiting for the background marshaller. Producers wait
    /// once it is full.
    pub async_queue_capacity: usize,

    pub max_command_size: u64,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        ClusteringConfig {
            mode: ReplicationMode::ReplSync,
            async_marshalling: false,
            sync_timeout: DEFAULT_SYNC_TIMEOUT,
            async_queue_capacity: DEFAULT_ASYNC_QUEUE_CAPACITY,
            max_command_size: MAX_COMMAND_SIZE,
        }
    }
}

impl ClusteringConfig {
    pub fn new(mode: ReplicationMode) -> Self {
        ClusteringConfig {
            mode,
            ..Default::default()
        }
    }

    pub fn with_async_marshalling(mut self, enabled: bool) -> Self {
        self.async_marshalling = enabled;
        self
    }

    pub fn with_sync_timeout(mut self, timeout: Duration) -> Self {
        self.sync_timeout = timeout;
        self
    }

    pub fn with_async_queue_capacity(mut self, capacity: usize) -> Self {
        self.async_queue_capacity = capacity;
        self
    }

    pub fn with_max_command_size(mut self, size: u64) -> Self {
        self.max_command_size = size;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.async_queue_capacity == 0 {
            return Err(RpcError::Configuration(
                "async_queue_capacity must be greater than zero".to_string(),
            ));
        }
        if self.max_command_size == 0 {
            return Err(RpcError::Configuration(
                "max_command_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn synchronous_modes() {
        assert!(ReplicationMode::Local.is_synchronous());
        assert!(ReplicationMode::ReplSync.is_synchronous());
        assert!(ReplicationMode::DistSync.is_synchronous());
        assert!(ReplicationMode::InvalidationSync.is_synchronous());
        assert!(!ReplicationMode::ReplAsync.is_synchronous());
        assert!(!ReplicationMode::DistAsync.is_synchronous());
        assert!(!ReplicationMode::InvalidationAsync.is_synchronous());
    }

    #[test]
    fn local_is_not_clustered() {
        assert!(!ReplicationMode::Local.is_clustered());
        assert!(ReplicationMode::InvalidationAsync.is_clustered());
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let config = ClusteringConfig::new(ReplicationMode::ReplAsync).with_async_queue_capacity(0);
        assert!(matches!(config.validate(), Err(RpcError::Configuration(_))));
        assert!(ClusteringConfig::default().validate().is_ok());
    }
}
