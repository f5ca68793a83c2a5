use super::*;

use crate::error::DagPoolError;

#[test]
fn test_basic() {
    let hash = Hash::sha256_from_bytes(b"abc");

    let expected_base16 = "sha256:ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";
    assert_eq!(expected_base16, hash.to_typed_base16());
}

#[test]
fn test_empty_input() {
    let hash = Hash::sha256_from_bytes(b"");

    let expected_base16 = "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";
    assert_eq!(expected_base16, hash.to_typed_base16());
}

#[test]
fn test_from_typed() {
    let base16 = "sha256:baeabdb75c223d171800c17b05c5e7e8e9980723a90eb6ffcc632a305afc5a42";

    let hash = Hash::from_typed(base16).unwrap();
    assert_eq!(base16, hash.to_typed_base16());

    assert!(matches!(
        Hash::from_typed("sha256"),
        Err(DagPoolError::HashError(Error::NoColonSeparator))
    ));

    assert!(matches!(
        Hash::from_typed("sha256:"),
        Err(DagPoolError::HashError(Error::InvalidHashStringLength { .. }))
    ));

    assert!(matches!(
        Hash::from_typed("sha256:gggggggggggggggggggggggggggggggggggggggggggggggggggggggggggggggg"),
        Err(DagPoolError::HashError(Error::InvalidBase16Hash(_)))
    ));

    assert!(matches!(
        Hash::from_typed("md5:invalid"),
        Err(DagPoolError::HashError(Error::UnsupportedHashAlgorithm(alg))) if alg == "md5"
    ));
}

#[test]
fn test_serde_round_trip() {
    let hash = Hash::sha256_from_bytes(b"abc");

    let json = serde_json::to_string(&hash).unwrap();
    let back: Hash = serde_json::from_str(&json).unwrap();

    assert_eq!(hash, back);
}
