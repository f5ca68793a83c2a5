//! End-to-end scenarios over mock-backed clusters.

use std::sync::Arc;

use bytes::Bytes;

use dagpool::block::Block;
use dagpool_datanode::testing::MockDataNode;
use dagpool_datanode::DataNodeClient;

use crate::config::Config;
use crate::error::ServerError;
use crate::gc::run_garbage_collection_once;
use crate::migrate::drain_journal;
use crate::node::DagNode;
use crate::pool::{slot_for_cid, ClusterState, DagPoolService};

const ROOT: &str = "root";
const ROOT_PW: &str = "root-pw";

fn test_config() -> Config {
    let mut config = Config::default();
    config.database.url = Some("sqlite::memory:".to_string());
    config.root_user = ROOT.to_string();
    config.root_password = ROOT_PW.to_string();
    config.garbage_collection.period_seconds = 0;
    config
}

async fn service_with_node(
    name: &str,
    k: usize,
    m: usize,
) -> (Arc<DagPoolService>, Vec<Arc<MockDataNode>>) {
    let service = DagPoolService::new(test_config()).await.unwrap();
    let mocks = install_mock_node(&service, name, k, m).await;
    (service, mocks)
}

async fn install_mock_node(
    service: &DagPoolService,
    name: &str,
    k: usize,
    m: usize,
) -> Vec<Arc<MockDataNode>> {
    let mocks: Vec<Arc<MockDataNode>> = (0..k + m).map(|_| Arc::new(MockDataNode::new())).collect();
    let clients: Vec<Arc<dyn DataNodeClient>> = mocks
        .iter()
        .map(|m| m.clone() as Arc<dyn DataNodeClient>)
        .collect();
    let node = DagNode::with_clients(name, k, m, clients).unwrap();
    service.install_dag_node(node).await.unwrap();
    mocks
}

#[tokio::test]
async fn test_pin_unpin_lifecycle() {
    let (service, mocks) = service_with_node("alpha", 2, 1).await;
    let block = Block::new(Bytes::from_static(b"pin me twice"));
    let cid = block.cid().clone();
    let key = cid.to_string();

    service
        .add(block.clone(), ROOT, ROOT_PW, true)
        .await
        .unwrap();
    service.add(block, ROOT, ROOT_PW, true).await.unwrap();
    assert_eq!(service.ref_counter().count(&key).await.unwrap(), Some(2));

    service.remove(&cid, ROOT, ROOT_PW, true).await.unwrap();
    assert_eq!(service.ref_counter().count(&key).await.unwrap(), Some(1));
    assert!(service.has(&cid, ROOT, ROOT_PW).await.unwrap());

    service.remove(&cid, ROOT, ROOT_PW, true).await.unwrap();
    assert_eq!(service.ref_counter().count(&key).await.unwrap(), None);
    assert!(!service.has(&cid, ROOT, ROOT_PW).await.unwrap());

    run_garbage_collection_once(&service).await.unwrap();

    for mock in &mocks {
        assert_eq!(mock.record_count(), 0);
    }
    let err = service.get(&cid, ROOT, ROOT_PW).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_erasure_recovery_with_member_offline() {
    let (service, mocks) = service_with_node("alpha", 2, 1).await;
    let block = Block::new(Bytes::from_static(b"HELLOWORLD"));
    let cid = block.cid().clone();

    service.add(block, ROOT, ROOT_PW, true).await.unwrap();

    // Three shards of five bytes each.
    let key = dagpool::block::ShardKey::of(&cid);
    for mock in &mocks {
        assert!(mock.contains(key.as_str()));
    }

    mocks[0].set_offline(true);

    let fetched = service.get(&cid, ROOT, ROOT_PW).await.unwrap();
    assert_eq!(fetched.data(), b"HELLOWORLD");
}

#[tokio::test]
async fn test_slot_migration_with_in_flight_write() {
    let service = DagPoolService::new(test_config()).await.unwrap();
    let alpha = install_mock_node(&service, "alpha", 2, 1).await;
    let beta = install_mock_node(&service, "beta", 2, 1).await;

    // A block stored before the migration begins.
    let old_block = Block::new(Bytes::from_static(b"stored before migration"));
    let old_cid = old_block.cid().clone();
    service.add(old_block, ROOT, ROOT_PW, true).await.unwrap();

    let new_block = Block::new(Bytes::from_static(b"written mid-migration"));
    let new_cid = new_block.cid().clone();

    // Migrate the two affected slots; the worker is not running, so
    // the cluster stays in COPYING until we drive it.
    let mut slots = vec![slot_for_cid(&old_cid), slot_for_cid(&new_cid)];
    slots.sort();
    slots.dedup();
    let ranges: Vec<_> = slots
        .iter()
        .map(|&s| dagpool::slot::SlotRange::new(s, s).unwrap())
        .collect();

    let scheduled = service
        .migrate_slots("alpha", "beta", &ranges, ROOT, ROOT_PW)
        .await
        .unwrap();
    assert_eq!(scheduled, ranges.len());
    assert_eq!(
        service.cluster_state().await.unwrap(),
        ClusterState::Migrating
    );

    // A write while copying lands on the receiver only.
    service
        .add(new_block.clone(), ROOT, ROOT_PW, true)
        .await
        .unwrap();
    let new_key = dagpool::block::ShardKey::of(&new_cid);
    assert!(beta[0].contains(new_key.as_str()));
    assert!(!alpha[0].contains(new_key.as_str()));

    // The old block has not been copied yet; reads fall back to the
    // old owner.
    let old_key = dagpool::block::ShardKey::of(&old_cid);
    assert!(!beta[0].contains(old_key.as_str()));
    let fetched = service.get(&old_cid, ROOT, ROOT_PW).await.unwrap();
    assert_eq!(fetched.data(), b"stored before migration");

    // Drive the migration to completion.
    drain_journal(&service).await.unwrap();
    assert_eq!(service.cluster_state().await.unwrap(), ClusterState::Ok);

    // Now the old block is served from the receiver, and the old
    // owner's copies are gone.
    assert!(beta[0].contains(old_key.as_str()));
    assert!(!alpha[0].contains(old_key.as_str()));
    let fetched = service.get(&old_cid, ROOT, ROOT_PW).await.unwrap();
    assert_eq!(fetched.data(), b"stored before migration");
    let fetched = service.get(&new_cid, ROOT, ROOT_PW).await.unwrap();
    assert_eq!(fetched.data(), b"written mid-migration");
}

#[tokio::test]
async fn test_duplicate_pin_concurrency() {
    let (service, mocks) = service_with_node("alpha", 2, 1).await;
    let block = Block::new(Bytes::from_static(b"pinned a hundred times"));
    let cid = block.cid().clone();
    let key = cid.to_string();

    let tasks: Vec<_> = (0..100)
        .map(|_| {
            let service = service.clone();
            let block = block.clone();
            tokio::spawn(async move { service.add(block, ROOT, ROOT_PW, true).await })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    // Exactly one fan-out happened: each member saw a single put.
    for mock in &mocks {
        assert_eq!(mock.put_attempts(), 1);
    }
    assert_eq!(service.ref_counter().count(&key).await.unwrap(), Some(100));

    service.remove(&cid, ROOT, ROOT_PW, true).await.unwrap();
    assert_eq!(service.ref_counter().count(&key).await.unwrap(), Some(99));
}

#[tokio::test]
async fn test_gc_respects_cache_set() {
    let (service, mocks) = service_with_node("alpha", 2, 1).await;
    let block = Block::new(Bytes::from_static(b"cached, then pinned"));
    let cid = block.cid().clone();
    let key = cid.to_string();

    // Unpinned add: cached, survives collection.
    service
        .add(block.clone(), ROOT, ROOT_PW, false)
        .await
        .unwrap();
    assert!(service.cache_set().has(&key).await.unwrap());

    run_garbage_collection_once(&service).await.unwrap();
    assert!(mocks[0].record_count() > 0);
    assert!(service.has(&cid, ROOT, ROOT_PW).await.unwrap());

    // Pinning promotes it out of the cache set.
    service
        .add(block.clone(), ROOT, ROOT_PW, true)
        .await
        .unwrap();
    assert_eq!(service.ref_counter().count(&key).await.unwrap(), Some(1));
    assert!(!service.cache_set().has(&key).await.unwrap());

    // Unpinning does not re-cache it.
    service.remove(&cid, ROOT, ROOT_PW, true).await.unwrap();
    assert_eq!(service.ref_counter().count(&key).await.unwrap(), None);
    assert!(!service.cache_set().has(&key).await.unwrap());

    run_garbage_collection_once(&service).await.unwrap();
    for mock in &mocks {
        assert_eq!(mock.record_count(), 0);
    }
}

#[tokio::test]
async fn test_unpinned_add_of_present_block_is_noop() {
    let (service, mocks) = service_with_node("alpha", 2, 1).await;
    let block = Block::new(Bytes::from_static(b"same payload"));

    service
        .add(block.clone(), ROOT, ROOT_PW, false)
        .await
        .unwrap();
    let attempts_after_first: usize = mocks.iter().map(|m| m.put_attempts()).sum();

    service.add(block, ROOT, ROOT_PW, false).await.unwrap();
    let attempts_after_second: usize = mocks.iter().map(|m| m.put_attempts()).sum();

    assert_eq!(attempts_after_first, attempts_after_second);
}

#[tokio::test]
async fn test_policies_gate_operations() {
    let (service, _mocks) = service_with_node("alpha", 2, 1).await;

    service
        .add_user(
            "writer".to_string(),
            "w-pw".to_string(),
            crate::access::Policy::WriteOnly,
            0,
            ROOT,
            ROOT_PW,
        )
        .await
        .unwrap();
    service
        .add_user(
            "reader".to_string(),
            "r-pw".to_string(),
            crate::access::Policy::ReadOnly,
            0,
            ROOT,
            ROOT_PW,
        )
        .await
        .unwrap();

    let block = Block::new(Bytes::from_static(b"policy test"));
    let cid = block.cid().clone();

    // A write-only user may add but not read back.
    service
        .add(block.clone(), "writer", "w-pw", true)
        .await
        .unwrap();
    assert!(matches!(
        service.get(&cid, "writer", "w-pw").await,
        Err(ServerError::AccessDenied)
    ));

    // A read-only user may read but not add or remove.
    let fetched = service.get(&cid, "reader", "r-pw").await.unwrap();
    assert_eq!(fetched.data(), b"policy test");
    assert!(matches!(
        service.add(block, "reader", "r-pw", true).await,
        Err(ServerError::AccessDenied)
    ));
    assert!(matches!(
        service.remove(&cid, "reader", "r-pw", true).await,
        Err(ServerError::AccessDenied)
    ));

    // Wrong credentials never pass.
    assert!(matches!(
        service.get(&cid, "reader", "wrong").await,
        Err(ServerError::AccessDenied)
    ));
}

#[tokio::test]
async fn test_self_query_rule() {
    let (service, _mocks) = service_with_node("alpha", 2, 1).await;

    service
        .add_user(
            "alice".to_string(),
            "a-pw".to_string(),
            crate::access::Policy::ReadWrite,
            0,
            ROOT,
            ROOT_PW,
        )
        .await
        .unwrap();
    service
        .add_user(
            "bob".to_string(),
            "b-pw".to_string(),
            crate::access::Policy::ReadWrite,
            0,
            ROOT,
            ROOT_PW,
        )
        .await
        .unwrap();

    // Users see themselves, the admin sees everyone.
    let me = service.query_user("alice", "alice", "a-pw").await.unwrap();
    assert_eq!(me.username, "alice");
    service.query_user("alice", ROOT, ROOT_PW).await.unwrap();

    assert!(matches!(
        service.query_user("bob", "alice", "a-pw").await,
        Err(ServerError::AccessDenied)
    ));
}

#[tokio::test]
async fn test_remove_dag_node_owning_slots_conflicts() {
    let service = DagPoolService::new(test_config()).await.unwrap();
    install_mock_node(&service, "alpha", 2, 1).await;

    let err = service
        .remove_dag_node("alpha", ROOT, ROOT_PW)
        .await
        .unwrap_err();
    assert!(matches!(err, ServerError::Conflict { .. }));
}

#[tokio::test]
async fn test_balance_slots_evens_ownership() {
    let service = DagPoolService::new(test_config()).await.unwrap();
    install_mock_node(&service, "alpha", 2, 1).await;
    install_mock_node(&service, "beta", 2, 1).await;

    let moved = service.balance_slots(ROOT, ROOT_PW).await.unwrap();
    assert_eq!(moved, 8192);

    drain_journal(&service).await.unwrap();

    let counts = service.slots().counts_by_owner();
    assert_eq!(counts["alpha"], 8192);
    assert_eq!(counts["beta"], 8192);
    assert_eq!(service.cluster_state().await.unwrap(), ClusterState::Ok);
}

#[tokio::test]
async fn test_cluster_state_reflects_health() {
    let (service, mocks) = service_with_node("alpha", 2, 1).await;

    assert_eq!(service.cluster_state().await.unwrap(), ClusterState::Ok);

    mocks[0].set_offline(true);
    mocks[1].set_offline(true);
    assert_eq!(service.cluster_state().await.unwrap(), ClusterState::Fail);
}

#[tokio::test]
async fn test_status_reports_coalesced_ranges() {
    let (service, _mocks) = service_with_node("alpha", 2, 1).await;

    let report = service.status(ROOT, ROOT_PW).await.unwrap();
    assert_eq!(report.state, ClusterState::Ok);
    assert_eq!(report.nodes.len(), 1);
    assert_eq!(report.nodes[0].node, "alpha");
    assert_eq!(report.nodes[0].slots.len(), 1);
    assert_eq!(report.nodes[0].slots[0].start, 0);
    assert_eq!(report.nodes[0].slots[0].end, 16383);

    // Status requires admin credentials.
    assert!(service.status("nobody", "pw").await.is_err());
}
