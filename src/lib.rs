//! Replication layer of the squirrel cache.
//!
//! A cache write is sent to the other cluster members through an [`RpcManager`].
//! How long the caller waits is decided per call by [`determine_mode`], which
//! merges the cache's [`ReplicationMode`] with the caller's [`Flags`].

pub mod aggregator;
pub mod cache;
pub mod command;
pub mod config;
mod error;
pub mod filter;
pub mod flags;
pub mod mode;
pub mod rpc;
pub mod transport;

use std::str::FromStr;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::prelude::__tracing_subscriber_SubscriberExt;

pub use aggregator::{ResponseAggregator, ResponseSet};
pub use cache::{ClusteredCache, DataContainer, FlaggedCache};
pub use command::{Command, Marshaller, Response};
pub use config::{
    ClusteringConfig, ReplicationMode, DEFAULT_ASYNC_QUEUE_CAPACITY, DEFAULT_SYNC_TIMEOUT,
    MAX_COMMAND_SIZE,
};
pub use error::{RpcError, TransportError};
pub use filter::{AckCount, ResponseFilter, SuccessfulResponses};
pub use flags::Flags;
pub use mode::{determine_mode, ResponseMode};
pub use rpc::{AsyncFailure, InvocationRequest, ReplyRouter, RpcManager};
pub use transport::{Address, LocalCluster, LocalTransport, Transport};

pub type Result<T> = std::result::Result<T, RpcError>;

/// Environment variable read for the log level.
pub const LOG_ENV: &str = "SQRL_LOG";

/// Install a global subscriber writing to stderr at `level`.
pub fn init_tracing(level: &str) -> anyhow::Result<()> {
    let level = LevelFilter::from_str(level)?;
    let layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
    let subscriber = tracing_subscriber::registry().with(level).with(layer);
    tracing::subscriber::set_global_default(subscriber).map_err(RpcError::from)?;
    Ok(())
}
