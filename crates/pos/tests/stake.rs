use mvsd_consensus::money::COIN;
use mvsd_consensus::{consensus_params, ConsensusMode, Network};
use mvsd_pos::{
    sign_header, stake_kernel_hash, verify_header_signature, verify_stake, SignatureError,
    StakeError, StakeInput,
};
use mvsd_primitives::block::BlockHeader;
use mvsd_primitives::outpoint::OutPoint;
use secp256k1::SecretKey;

fn stake(height: u64, value: u64) -> StakeInput {
    StakeInput {
        outpoint: OutPoint::new([0x42; 32], 0),
        value,
        height,
    }
}

#[test]
fn regtest_stake_needs_confirmations() {
    let params = consensus_params(Network::Regtest);
    let input = stake(100, 10 * COIN);
    let bits = params.pos.stake_limit_bits;
    assert_eq!(
        verify_stake(&[1u8; 32], 105, 1_000, bits, &input, &params),
        Err(StakeError::Immature)
    );
}

#[test]
fn regtest_stake_below_minimum_rejected() {
    let params = consensus_params(Network::Regtest);
    let input = stake(1, params.pos.min_stake_value - 1);
    assert_eq!(
        verify_stake(&[1u8; 32], 500, 1_000, params.pos.stake_limit_bits, &input, &params),
        Err(StakeError::ValueTooLow)
    );
}

#[test]
fn regtest_stake_finds_kernel_quickly() {
    let params = consensus_params(Network::Regtest);
    let input = stake(1, 10 * COIN);
    let bits = params.pos.stake_limit_bits;
    let found = (1_000u32..1_100)
        .any(|timestamp| verify_stake(&[1u8; 32], 500, timestamp, bits, &input, &params).is_ok());
    assert!(found);
    assert_ne!(
        stake_kernel_hash(&[1u8; 32], &input.outpoint, 1_000),
        stake_kernel_hash(&[1u8; 32], &input.outpoint, 1_001)
    );
}

#[test]
fn signed_header_verifies_and_detects_tampering() {
    let secret = SecretKey::from_slice(&[7u8; 32]).expect("key");
    let mut header = BlockHeader {
        version: ConsensusMode::Pos.block_version(),
        height: 10,
        timestamp: 1_000,
        ..BlockHeader::default()
    };
    assert_eq!(
        verify_header_signature(&header),
        Err(SignatureError::MissingSignature)
    );
    sign_header(&mut header, &secret);
    verify_header_signature(&header).expect("valid signature");

    header.timestamp += 1;
    assert_eq!(
        verify_header_signature(&header),
        Err(SignatureError::VerificationFailed)
    );
}
