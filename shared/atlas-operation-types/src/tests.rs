use alloy_primitives::{address, U256};
use alloy_sol_types::{SolEvent, SolValue};

use crate::{Asset, CallConfig, CallConfigFlag, SnapshotId, TokensRewarded, UserOperation};

#[test]
fn test_call_config_bits_match_flag_positions() {
    let cfg = CallConfig::from_flags(&[
        CallConfigFlag::UserNoncesSequential,
        CallConfigFlag::VerifyCallChainHash,
        CallConfigFlag::RequireFulfillment,
    ]);
    assert_eq!(cfg.bits(), 1 | (1 << 13) | (1 << 15));
    assert!(cfg.has(CallConfigFlag::RequireFulfillment));
    assert!(!cfg.has(CallConfigFlag::ZeroSolvers));
    assert_eq!(
        cfg.flags(),
        vec![
            CallConfigFlag::UserNoncesSequential,
            CallConfigFlag::VerifyCallChainHash,
            CallConfigFlag::RequireFulfillment,
        ]
    );
    assert!(!cfg.without(CallConfigFlag::RequireFulfillment).has(CallConfigFlag::RequireFulfillment));
}

#[test]
fn test_call_config_flag_try_from() {
    assert_eq!(CallConfigFlag::try_from(17), Ok(CallConfigFlag::InvertBidValue));
    assert_eq!(CallConfigFlag::try_from(20), Err(20));
}

#[test]
fn test_asset_serde_and_display() {
    let token = address!("00000000000000000000000000000000000000aa");
    let json = serde_json::to_string(&Asset::Token(token)).unwrap();
    let back: Asset = serde_json::from_str(&json).unwrap();
    assert_eq!(back, Asset::Token(token));
    assert_eq!(serde_json::to_string(&Asset::Native).unwrap(), "\"native\"");
    assert_eq!(Asset::Native.to_string(), "native");
    assert!(Asset::Token(token).to_string().starts_with("token 0x"));
    assert_eq!(SnapshotId(U256::from(10u64)).to_string(), "0xa");
}

#[test]
fn test_user_operation_abi_encoding_is_stable() {
    let op = UserOperation {
        from: address!("0000000000000000000000000000000000000001"),
        value: U256::from(5u64),
        callConfig: 42,
        data: vec![0xde, 0xad].into(),
        ..Default::default()
    };
    let a = op.abi_encode();
    let b = op.clone().abi_encode();
    assert_eq!(a, b);
    let decoded = UserOperation::abi_decode(&a, true).unwrap();
    assert_eq!(decoded, op);
}

#[test]
fn test_tokens_rewarded_topics() {
    let event = TokensRewarded {
        user: address!("0000000000000000000000000000000000000001"),
        token: address!("0000000000000000000000000000000000000002"),
        amount: U256::from(7u64),
    };
    let log = event.encode_log_data();
    assert_eq!(log.topics().len(), 3);
    assert_eq!(log.topics()[0], TokensRewarded::SIGNATURE_HASH);
    let decoded = TokensRewarded::decode_log_data(&log, true).unwrap();
    assert_eq!(decoded, event);
}
