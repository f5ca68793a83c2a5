use super::*;

use dagpool_datanode::testing::MockDataNode;

fn mock_node(k: usize, m: usize) -> (Arc<DagNode>, Vec<Arc<MockDataNode>>) {
    let mocks: Vec<Arc<MockDataNode>> = (0..k + m).map(|_| Arc::new(MockDataNode::new())).collect();
    let clients: Vec<Arc<dyn DataNodeClient>> = mocks
        .iter()
        .map(|m| m.clone() as Arc<dyn DataNodeClient>)
        .collect();
    let node = DagNode::with_clients("test", k, m, clients).unwrap();
    (node, mocks)
}

#[tokio::test]
async fn test_put_get_round_trip() {
    let (node, mocks) = mock_node(2, 1);
    let block = Block::new(Bytes::from_static(b"HELLOWORLD"));

    node.put(&block).await.unwrap();

    // Every member holds exactly one shard.
    for mock in &mocks {
        assert_eq!(mock.record_count(), 1);
    }

    let fetched = node.get(block.cid()).await.unwrap();
    assert_eq!(fetched.data(), block.data());

    assert_eq!(node.get_size(block.cid()).await.unwrap(), 10);
    assert!(node.has_key(&block.shard_key()).await);
}

#[tokio::test]
async fn test_get_with_member_offline() {
    let (node, mocks) = mock_node(2, 1);
    let block = Block::new(Bytes::from_static(b"HELLOWORLD"));

    node.put(&block).await.unwrap();

    // Member 0 goes down; shards {1, 2} still decode the payload.
    mocks[0].set_offline(true);

    let fetched = node.get(block.cid()).await.unwrap();
    assert_eq!(fetched.data(), b"HELLOWORLD");
}

#[tokio::test]
async fn test_get_unavailable_below_quorum() {
    let (node, mocks) = mock_node(2, 1);
    let block = Block::new(Bytes::from_static(b"HELLOWORLD"));

    node.put(&block).await.unwrap();

    mocks[0].set_offline(true);
    mocks[1].set_offline(true);

    let err = node.get(block.cid()).await.unwrap_err();
    assert!(matches!(err, ServerError::Unavailable { .. }));
}

#[tokio::test]
async fn test_get_missing_block() {
    let (node, _mocks) = mock_node(2, 1);
    let block = Block::new(Bytes::from_static(b"never stored"));

    let err = node.get(block.cid()).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_put_is_all_or_nothing() {
    let (node, mocks) = mock_node(2, 1);
    let block = Block::new(Bytes::from_static(b"HELLOWORLD"));

    // Fail both the initial put and its retry on member 2.
    mocks[2].fail_next_puts(2);

    let err = node.put(&block).await.unwrap_err();
    assert!(matches!(err, ServerError::Unavailable { .. }));

    // The shards that did land were cleaned up.
    for mock in &mocks {
        assert_eq!(mock.record_count(), 0);
    }
}

#[tokio::test]
async fn test_put_retries_transient_failure() {
    let (node, mocks) = mock_node(2, 1);
    let block = Block::new(Bytes::from_static(b"HELLOWORLD"));

    // One failure only: the retry succeeds.
    mocks[1].fail_next_puts(1);

    node.put(&block).await.unwrap();
    for mock in &mocks {
        assert_eq!(mock.record_count(), 1);
    }
}

#[tokio::test]
async fn test_delete_requires_quorum() {
    let (node, mocks) = mock_node(2, 1);
    let block = Block::new(Bytes::from_static(b"HELLOWORLD"));

    node.put(&block).await.unwrap();
    node.delete(block.cid()).await.unwrap();

    for mock in &mocks {
        assert_eq!(mock.record_count(), 0);
    }

    // With two members down, fewer than k deletions can land.
    node.put(&block).await.unwrap();
    mocks[0].set_offline(true);
    mocks[1].set_offline(true);

    let err = node.delete(block.cid()).await.unwrap_err();
    assert!(matches!(err, ServerError::Unavailable { .. }));
}

#[tokio::test]
async fn test_repair_rebuilds_target_member() {
    let (node, mocks) = mock_node(2, 1);
    let block = Block::new(Bytes::from_static(b"HELLOWORLD"));
    let key = block.shard_key();

    node.put(&block).await.unwrap();

    // Member 2 lost its shard.
    mocks[2].delete(key.as_str()).await.unwrap();
    assert!(!mocks[2].contains(key.as_str()));

    let repaired = node.repair(0, 2).await.unwrap();
    assert_eq!(repaired, 1);
    assert!(mocks[2].contains(key.as_str()));

    // The rebuilt shard participates in decoding again.
    mocks[0].set_offline(true);
    let fetched = node.get(block.cid()).await.unwrap();
    assert_eq!(fetched.data(), b"HELLOWORLD");
}

#[tokio::test]
async fn test_repair_argument_validation() {
    let (node, _mocks) = mock_node(2, 1);

    assert!(node.repair(0, 0).await.is_err());
    assert!(node.repair(0, 9).await.is_err());
}

#[tokio::test]
async fn test_health_follows_quorum() {
    let (node, mocks) = mock_node(2, 1);

    assert!(node.healthy().await);

    mocks[0].set_offline(true);
    assert!(node.healthy().await);

    mocks[1].set_offline(true);
    assert!(!node.healthy().await);
}

#[tokio::test]
async fn test_config_validation() {
    let valid = DagNodeConfig {
        name: "ok".to_string(),
        data_shards: 2,
        parity_shards: 1,
        members: vec![
            MemberConfig::Local {
                path: "a".into(),
                cask_num: None,
            },
            MemberConfig::Local {
                path: "b".into(),
                cask_num: None,
            },
            MemberConfig::Local {
                path: "c".into(),
                cask_num: None,
            },
        ],
    };
    valid.validate().unwrap();

    let mut mismatched = valid.clone();
    mismatched.parity_shards = 2;
    assert!(mismatched.validate().is_err());

    let mut no_data = valid.clone();
    no_data.data_shards = 0;
    assert!(no_data.validate().is_err());

    let mut bad_name = valid.clone();
    bad_name.name = "_leading-underscore".to_string();
    assert!(bad_name.validate().is_err());
}
