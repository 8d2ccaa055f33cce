use clap::{Parser, Subcommand};
use sqrl_rpc::{
    ClusteredCache, ClusteringConfig, Flags, LocalCluster, ReplicationMode, RpcManager, Transport,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct App {
    #[clap(long, default_value = "repl-sync")]
    mode: ReplicationMode,

    #[clap(long, default_value = "3")]
    nodes: usize,

    #[clap(long)]
    async_marshalling: bool,

    #[clap(long, default_value = "15000")]
    timeout_ms: u64,

    #[clap(long, conflicts_with = "force_async")]
    force_sync: bool,

    #[clap(long)]
    force_async: bool,

    #[clap(long, default_value = "info", env = "SQRL_LOG")]
    log_level: String,

    #[clap(subcommand)]
    action: Action,
}

/// Operations run against the first member of the cluster.
#[derive(Debug, Subcommand)]
enum Action {
    /// Enter a key-value pair into the cache.
    Set { key: String, value: String },

    /// Remove a value from the cache with the provided key.
    #[clap(name = "rm")]
    Remove { key: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app = App::parse();
    sqrl_rpc::init_tracing(&app.log_level)?;

    let config = ClusteringConfig::new(app.mode)
        .with_async_marshalling(app.async_marshalling)
        .with_sync_timeout(Duration::from_millis(app.timeout_ms));

    let cluster = LocalCluster::new();
    let mut transports = Vec::with_capacity(app.nodes.max(1));
    for i in 0..app.nodes.max(1) {
        transports.push(cluster.join(&format!("node-{i}")));
    }
    info!(
        "sqrl-rpc version: {}, mode: {}, members: {:?}",
        env!("CARGO_PKG_VERSION"),
        app.mode,
        cluster.members()
    );

    let origin = transports.remove(0);
    let container = origin.container();
    let cache = ClusteredCache::new(RpcManager::new(Arc::new(origin), config)?, container);

    let mut flags = Flags::empty();
    if app.force_sync {
        flags |= Flags::FORCE_SYNCHRONOUS;
    }
    if app.force_async {
        flags |= Flags::FORCE_ASYNCHRONOUS;
    }
    println!("response mode: {}", cache.rpc().response_mode(flags)?);

    let previous = match app.action {
        Action::Set { key, value } => cache.with_flags(flags).put(key, value).await?,
        Action::Remove { key } => cache.with_flags(flags).remove(key).await?,
    };
    println!("previous value: {:?}", previous);

    // Give asynchronous commands a chance to land before printing remote state.
    tokio::time::sleep(Duration::from_millis(50)).await;
    for member in cluster.members() {
        if member == cache.rpc().transport().address() {
            continue;
        }
        if let Some(data) = cluster.container(&member) {
            let mut entries: Vec<(String, String)> = data
                .iter()
                .map(|e| (e.key().clone(), e.value().clone()))
                .collect();
            entries.sort();
            println!("{member}: {entries:?}");
        }
    }
    Ok(())
}
