use mvsd_consensus::{consensus_params, ConsensusMode, Network};
use mvsd_pow::difficulty::{
    compact_to_target, compact_to_u256, hash_meets_target, target_to_compact, CompactError,
};
use mvsd_pow::validation::{solve_header, validate_pow_header, PowError};
use mvsd_primitives::block::BlockHeader;

#[test]
fn compact_to_target_roundtrip() {
    let bits = 0x1d00ffff;
    let target = compact_to_target(bits).expect("target");
    assert_eq!(target_to_compact(&target), bits);
}

#[test]
fn compact_target_layout() {
    let target = compact_to_target(0x207fffff).expect("target");
    assert!(target[..29].iter().all(|b| *b == 0));
    assert_eq!(target[29], 0xff);
    assert_eq!(target[30], 0xff);
    assert_eq!(target[31], 0x7f);
}

#[test]
fn negative_compact_rejected() {
    assert_eq!(compact_to_u256(0x04923456), Err(CompactError::Negative));
}

#[test]
fn hash_meets_target_cmp() {
    let target = compact_to_u256(0x1f00ffff).expect("target");
    assert!(hash_meets_target(&[0u8; 32], &target));
    assert!(!hash_meets_target(&[0xffu8; 32], &target));
}

fn regtest_header() -> BlockHeader {
    let params = consensus_params(Network::Regtest);
    BlockHeader {
        version: ConsensusMode::Pow.block_version(),
        bits: params.pow_limit_bits,
        timestamp: 1_600_000_000,
        height: 1,
        ..BlockHeader::default()
    }
}

#[test]
fn solved_regtest_header_validates() {
    let params = consensus_params(Network::Regtest);
    let mut header = regtest_header();
    assert!(solve_header(&mut header, 10_000).expect("solve"));
    validate_pow_header(&header, &params).expect("valid pow");
}

#[test]
fn bits_above_limit_rejected() {
    let params = consensus_params(Network::Mainnet);
    let header = regtest_header();
    assert_eq!(
        validate_pow_header(&header, &params),
        Err(PowError::InvalidBits("pow target above limit"))
    );
}

#[test]
fn non_pow_header_rejected() {
    let params = consensus_params(Network::Regtest);
    let mut header = regtest_header();
    header.version = ConsensusMode::Dpos.block_version();
    assert_eq!(
        validate_pow_header(&header, &params),
        Err(PowError::NotProofOfWork)
    );
}
