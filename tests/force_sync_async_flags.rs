mod common;

use sqrl_rpc::{Address, ClusteringConfig, Flags, ReplicationMode, ResponseMode, RpcError};
use std::time::Duration;

#[tokio::test]
async fn force_async_flag_usage() {
    let (cluster, cache, transport) =
        common::cache(2, ClusteringConfig::new(ReplicationMode::ReplSync));

    // A plain put on a synchronous cache replicates synchronously.
    cache.put("k".to_string(), "v".to_string()).await.unwrap();
    assert_eq!(transport.calls(), vec![ResponseMode::Synchronous]);
    assert_eq!(
        cluster
            .container(&Address::from("node-1"))
            .unwrap()
            .get("k")
            .map(|v| v.value().clone()),
        Some("v".to_string())
    );

    transport.reset();

    // Forcing asynchrony on a synchronous cache keeps marshalling on the caller.
    cache
        .with_flags(Flags::FORCE_ASYNCHRONOUS)
        .put("k".to_string(), "v2".to_string())
        .await
        .unwrap();
    assert_eq!(
        transport.calls(),
        vec![ResponseMode::AsynchronousWithSyncMarshalling]
    );
    common::eventually_holds(&cluster, &Address::from("node-1"), "k", "v2").await;
}

#[tokio::test]
async fn force_sync_flag_usage() {
    let config = ClusteringConfig::new(ReplicationMode::ReplAsync).with_async_marshalling(true);
    let (cluster, cache, transport) = common::cache(2, config);

    cache.put("k".to_string(), "v".to_string()).await.unwrap();
    assert_eq!(
        transport.wait_for_calls(1).await,
        vec![ResponseMode::Asynchronous]
    );
    common::eventually_holds(&cluster, &Address::from("node-1"), "k", "v").await;

    transport.reset();

    cache
        .with_flags(Flags::FORCE_SYNCHRONOUS)
        .put("k".to_string(), "v2".to_string())
        .await
        .unwrap();
    assert_eq!(transport.calls(), vec![ResponseMode::Synchronous]);
    // The call only returned once node-1 applied it.
    assert_eq!(
        cluster
            .container(&Address::from("node-1"))
            .unwrap()
            .get("k")
            .map(|v| v.value().clone()),
        Some("v2".to_string())
    );
}

// A forced-synchronous put must not be overtaken by an earlier put still waiting
// for the background marshaller.
#[tokio::test]
async fn forced_sync_lands_after_queued_async_put() {
    let config = ClusteringConfig::new(ReplicationMode::ReplAsync).with_async_marshalling(true);
    let (cluster, cache, transport) = common::cache(2, config);
    let remote = cluster.container(&Address::from("node-1")).unwrap();

    cache.put("k".to_string(), "v1".to_string()).await.unwrap();
    cache
        .with_flags(Flags::FORCE_SYNCHRONOUS)
        .put("k".to_string(), "v2".to_string())
        .await
        .unwrap();
    assert_eq!(
        transport.calls(),
        vec![ResponseMode::Asynchronous, ResponseMode::Synchronous]
    );
    assert_eq!(remote.get("k").map(|v| v.value().clone()), Some("v2".to_string()));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(remote.get("k").map(|v| v.value().clone()), Some("v2".to_string()));
}

#[tokio::test]
async fn conflicting_flags_never_reach_the_network() {
    let (_cluster, cache, transport) =
        common::cache(2, ClusteringConfig::new(ReplicationMode::ReplSync));

    let err = cache
        .with_flags(Flags::FORCE_SYNCHRONOUS | Flags::FORCE_ASYNCHRONOUS)
        .put("k".to_string(), "v".to_string())
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::Configuration(_)));
    assert!(transport.calls().is_empty());
    assert_eq!(cache.get("k"), None);
}

#[tokio::test]
async fn cache_mode_local_skips_replication() {
    let (cluster, cache, transport) =
        common::cache(2, ClusteringConfig::new(ReplicationMode::ReplSync));

    cache
        .with_flags(Flags::CACHE_MODE_LOCAL)
        .put("k".to_string(), "v".to_string())
        .await
        .unwrap();
    assert_eq!(cache.get("k"), Some("v".to_string()));
    assert!(transport.calls().is_empty());
    assert!(cluster
        .container(&Address::from("node-1"))
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn local_cache_never_replicates() {
    let (_cluster, cache, transport) =
        common::cache(3, ClusteringConfig::new(ReplicationMode::Local));

    cache.put("k".to_string(), "v".to_string()).await.unwrap();
    cache
        .with_flags(Flags::FORCE_ASYNCHRONOUS)
        .remove("k".to_string())
        .await
        .unwrap();
    assert!(transport.calls().is_empty());
}

#[tokio::test]
async fn invalidation_removes_remote_copies() {
    let (cluster, cache, _transport) =
        common::cache(3, ClusteringConfig::new(ReplicationMode::InvalidationSync));
    for i in 1..3 {
        cluster
            .container(&Address::from(format!("node-{i}")))
            .unwrap()
            .insert("k".to_string(), "stale".to_string());
    }

    let previous = cache.put("k".to_string(), "fresh".to_string()).await.unwrap();
    assert_eq!(previous, None);
    assert_eq!(cache.get("k"), Some("fresh".to_string()));
    for i in 1..3 {
        let remote = cluster.container(&Address::from(format!("node-{i}"))).unwrap();
        assert!(!remote.contains_key("k"));
    }
}

#[tokio::test]
async fn remove_and_clear_replicate() {
    let (cluster, cache, transport) =
        common::cache(2, ClusteringConfig::new(ReplicationMode::DistSync));
    let remote = cluster.container(&Address::from("node-1")).unwrap();

    cache.put("a".to_string(), "1".to_string()).await.unwrap();
    cache.put("b".to_string(), "2".to_string()).await.unwrap();
    assert_eq!(
        cache.remove("a".to_string()).await.unwrap(),
        Some("1".to_string())
    );
    assert!(!remote.contains_key("a"));
    assert!(remote.contains_key("b"));

    cache.clear().await.unwrap();
    assert!(remote.is_empty());
    assert_eq!(transport.calls().len(), 4);
}
