use super::*;

use crate::testing::get_fake_data;

#[test]
fn test_split_sizes() {
    let payload = b"HELLOWORLD";
    let codec = ErasureCodec::new(2, 1, payload.len()).unwrap();

    assert_eq!(codec.shard_size(), 5);

    let shards = codec.encode(payload).unwrap();
    assert_eq!(shards.len(), 3);
    assert_eq!(&shards[0], b"HELLO");
    assert_eq!(&shards[1], b"WORLD");
    assert_eq!(shards[2].len(), 5);
}

#[test]
fn test_recovery_with_one_member_offline() {
    let payload = b"HELLOWORLD";
    let codec = ErasureCodec::new(2, 1, payload.len()).unwrap();
    let shards = codec.encode(payload).unwrap();

    // Member 0 offline: decode from shards {1, 2}.
    let holes = vec![None, Some(shards[1].clone()), Some(shards[2].clone())];
    let decoded = codec.decode(holes).unwrap();

    assert_eq!(decoded, payload);
}

#[test]
fn test_round_trip_all_hole_patterns() {
    let payload = get_fake_data(1 << 16);
    let codec = ErasureCodec::new(4, 2, payload.len()).unwrap();
    let shards = codec.encode(&payload).unwrap();

    // Any two missing members must still decode.
    for a in 0..6 {
        for b in (a + 1)..6 {
            let mut holes: Vec<Option<Vec<u8>>> = shards.iter().cloned().map(Some).collect();
            holes[a] = None;
            holes[b] = None;

            let decoded = codec.decode(holes).unwrap();
            assert_eq!(decoded, payload, "failed with members {} and {} missing", a, b);
        }
    }
}

#[test]
fn test_too_few_shards() {
    let payload = get_fake_data(1024);
    let codec = ErasureCodec::new(4, 2, payload.len()).unwrap();
    let shards = codec.encode(&payload).unwrap();

    let mut holes: Vec<Option<Vec<u8>>> = shards.into_iter().map(Some).collect();
    holes[0] = None;
    holes[1] = None;
    holes[2] = None;

    let err = codec.decode(holes).unwrap_err();
    assert!(matches!(
        err,
        DagPoolError::ShardsUnavailable {
            available: 3,
            required: 4
        }
    ));
}

#[test]
fn test_padding_is_trimmed() {
    // 10 bytes over k = 3: shards of 4 bytes, 2 bytes of padding.
    let payload = get_fake_data(10);
    let codec = ErasureCodec::new(3, 1, payload.len()).unwrap();

    assert_eq!(codec.shard_size(), 4);

    let shards = codec.encode(&payload).unwrap();
    let decoded = codec
        .decode(shards.into_iter().map(Some).collect())
        .unwrap();

    assert_eq!(decoded, payload);
}

#[test]
fn test_verify_detects_tampering() {
    let payload = get_fake_data(4096);
    let codec = ErasureCodec::new(2, 2, payload.len()).unwrap();
    let mut shards = codec.encode(&payload).unwrap();

    assert!(codec.verify(&shards).unwrap());

    shards[1][0] ^= 0xff;
    assert!(!codec.verify(&shards).unwrap());
}

#[test]
fn test_reconstruct_single_target() {
    let payload = get_fake_data(4096);
    let codec = ErasureCodec::new(2, 1, payload.len()).unwrap();
    let shards = codec.encode(&payload).unwrap();

    let holes = vec![Some(shards[0].clone()), None, Some(shards[2].clone())];
    let rebuilt = codec.reconstruct(holes, &[1]).unwrap();

    assert_eq!(rebuilt.len(), 1);
    assert_eq!(rebuilt[0], shards[1]);
}

#[test]
fn test_no_parity_codec() {
    let payload = get_fake_data(100);
    let codec = ErasureCodec::new(2, 0, payload.len()).unwrap();
    let shards = codec.encode(&payload).unwrap();

    assert_eq!(shards.len(), 2);

    let decoded = codec
        .decode(shards.iter().cloned().map(Some).collect())
        .unwrap();
    assert_eq!(decoded, payload);

    // Nothing can be rebuilt without parity.
    let holes = vec![Some(shards[0].clone()), None];
    assert!(codec.decode(holes).is_err());
}

#[test]
fn test_invalid_params() {
    assert!(ErasureCodec::new(0, 2, 100).is_err());
    assert!(ErasureCodec::new(1, 0, 100).is_err());
    assert!(ErasureCodec::new(255, 2, 100).is_err());
}

#[test]
fn test_empty_payload() {
    let codec = ErasureCodec::new(2, 1, 0).unwrap();

    assert_eq!(codec.shard_size(), 1);

    let shards = codec.encode(b"").unwrap();
    let decoded = codec
        .decode(shards.into_iter().map(Some).collect())
        .unwrap();

    assert!(decoded.is_empty());
}
