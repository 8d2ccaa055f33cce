//! A node-local cache whose writes are replicated through an [`RpcManager`].

use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

use crate::aggregator::ResponseSet;
use crate::command::{Command, Response};
use crate::flags::Flags;
use crate::rpc::RpcManager;
use crate::transport::Transport;
use crate::Result;

/// The entries held by one member.
pub type DataContainer = Arc<DashMap<String, String>>;

/// Apply a command received from another member to the local data.
pub fn apply(container: &DashMap<String, String>, command: Command) -> Response {
    match command {
        Command::Put { key, value } => Response::Success(container.insert(key, value)),
        Command::Remove { key } => Response::Success(container.remove(&key).map(|(_, v)| v)),
        Command::Invalidate { keys } => {
            for key in keys {
                container.remove(&key);
            }
            Response::Success(None)
        }
        Command::Clear => {
            container.clear();
            Response::Success(None)
        }
    }
}

pub struct ClusteredCache<T> {
    rpc: RpcManager<T>,
    container: DataContainer,
}

impl<T> ClusteredCache<T>
where
    T: Transport,
{
    pub fn new(rpc: RpcManager<T>, container: DataContainer) -> Self {
        ClusteredCache { rpc, container }
    }

    pub fn rpc(&self) -> &RpcManager<T> {
        &self.rpc
    }

    /// Read a key from local data only.
    pub fn get(&self, key: &str) -> Option<String> {
        self.container.get(key).map(|v| v.value().clone())
    }

    /// A view of the cache where the next operations carry `flags`.
    pub fn with_flags(&self, flags: Flags) -> FlaggedCache<'_, T> {
        FlaggedCache { cache: self, flags }
    }

    pub async fn put(&self, key: String, value: String) -> Result<Option<String>> {
        self.with_flags(Flags::empty()).put(key, value).await
    }

    pub async fn remove(&self, key: String) -> Result<Option<String>> {
        self.with_flags(Flags::empty()).remove(key).await
    }

    pub async fn clear(&self) -> Result<()> {
        self.with_flags(Flags::empty()).clear().await
    }
}

pub struct FlaggedCache<'a, T> {
    cache: &'a ClusteredCache<T>,
    flags: Flags,
}

impl<T> FlaggedCache<'_, T>
where
    T: Transport,
{
    /// Store `value` locally and replicate it, returning the previous local value.
    pub async fn put(&self, key: String, value: String) -> Result<Option<String>> {
        self.check_flags()?;
        let command = if self.cache.rpc.config().mode.is_invalidation() {
            Command::Invalidate {
                keys: vec![key.clone()],
            }
        } else {
            Command::Put {
                key: key.clone(),
                value: value.clone(),
            }
        };
        let previous = self.cache.container.insert(key, value);
        self.replicate(command).await?;
        Ok(previous)
    }

    pub async fn remove(&self, key: String) -> Result<Option<String>> {
        self.check_flags()?;
        let command = if self.cache.rpc.config().mode.is_invalidation() {
            Command::Invalidate {
                keys: vec![key.clone()],
            }
        } else {
            Command::Remove { key: key.clone() }
        };
        let previous = self.cache.container.remove(&key).map(|(_, v)| v);
        self.replicate(command).await?;
        Ok(previous)
    }

    pub async fn clear(&self) -> Result<()> {
        self.check_flags()?;
        self.cache.container.clear();
        self.replicate(Command::Clear).await?;
        Ok(())
    }

    /// Conflicting flags fail before local data is touched.
    fn check_flags(&self) -> Result<()> {
        if self.is_replicated() {
            self.cache.rpc.response_mode(self.flags)?;
        }
        Ok(())
    }

    fn is_replicated(&self) -> bool {
        self.cache.rpc.config().mode.is_clustered() && !self.flags.contains(Flags::CACHE_MODE_LOCAL)
    }

    async fn replicate(&self, command: Command) -> Result<Option<ResponseSet>> {
        let rpc = &self.cache.rpc;
        if !self.is_replicated() {
            debug!(?command, "Skipping replication");
            return Ok(None);
        }
        rpc.invoke_remotely(
            &[],
            &command,
            self.flags,
            rpc.config().sync_timeout,
            None,
            false,
        )
        .await
    }
}
