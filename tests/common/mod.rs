#![allow(dead_code)]

use sqrl_rpc::{
    Address, ClusteredCache, ClusteringConfig, InvocationRequest, LocalCluster, LocalTransport,
    ReplyRouter, ResponseMode, RpcManager, Transport, TransportError,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Wraps a [`LocalTransport`] and records the mode of every call it forwards.
#[derive(Clone)]
pub struct RecordingTransport {
    inner: LocalTransport,
    calls: Arc<Mutex<Vec<ResponseMode>>>,
}

impl RecordingTransport {
    pub fn new(inner: LocalTransport) -> Self {
        RecordingTransport {
            inner,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn calls(&self) -> Vec<ResponseMode> {
        self.calls.lock().unwrap().clone()
    }

    pub fn reset(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn inner(&self) -> &LocalTransport {
        &self.inner
    }

    /// Wait until at least `n` calls were recorded. Asynchronous commands may
    /// reach the transport from the background marshaller after the caller
    /// already returned.
    pub async fn wait_for_calls(&self, n: usize) -> Vec<ResponseMode> {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let calls = self.calls();
                if calls.len() >= n {
                    return calls;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("transport was not called in time")
    }
}

impl Transport for RecordingTransport {
    fn address(&self) -> Address {
        self.inner.address()
    }

    fn members(&self) -> Vec<Address> {
        self.inner.members()
    }

    fn attach(&self, router: ReplyRouter) {
        self.inner.attach(router)
    }

    async fn invoke_remotely(
        &self,
        request: InvocationRequest,
    ) -> std::result::Result<(), TransportError> {
        self.calls.lock().unwrap().push(request.mode);
        self.inner.invoke_remotely(request).await
    }
}

/// Start a cluster of `size` members named `node-0`, `node-1`, ... and return
/// the manager of `node-0` on top of a recording transport.
pub fn manager(
    size: usize,
    config: ClusteringConfig,
) -> (LocalCluster, RpcManager<RecordingTransport>, RecordingTransport) {
    let cluster = LocalCluster::new();
    let origin = cluster.join("node-0");
    for i in 1..size {
        cluster.join(&format!("node-{i}"));
    }
    let transport = RecordingTransport::new(origin);
    let rpc = RpcManager::new(Arc::new(transport.clone()), config).unwrap();
    (cluster, rpc, transport)
}

/// Same as [`manager`] but wrapped in the cache of `node-0`.
pub fn cache(
    size: usize,
    config: ClusteringConfig,
) -> (LocalCluster, ClusteredCache<RecordingTransport>, RecordingTransport) {
    let (cluster, rpc, transport) = manager(size, config);
    let container = transport.inner().container();
    (cluster, ClusteredCache::new(rpc, container), transport)
}

/// Poll until `address` holds `key` = `value`.
pub async fn eventually_holds(cluster: &LocalCluster, address: &Address, key: &str, value: &str) {
    let container = cluster.container(address).expect("member should exist");
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if container.get(key).map(|v| v.value().clone()).as_deref() == Some(value) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("{address} never held {key}={value}"));
}
