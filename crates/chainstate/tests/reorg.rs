mod common;

use common::{address_of, coin, script_of, TestChain, MINER};
use mvsd_chainstate::block::BlockError;
use mvsd_chainstate::reorg::{ChainReorganizer, ReorgError};
use mvsd_consensus::constants::SECONDARY_ISSUE_FREE_THRESHOLD;
use mvsd_consensus::money::{Amount, COIN};
use mvsd_consensus::Hash256;
use mvsd_primitives::attachment::{AssetCert, AssetDetail, Attachment, CertType};
use mvsd_primitives::block::Block;
use mvsd_primitives::outpoint::OutPoint;
use mvsd_primitives::transaction::{Transaction, TxOut};

const ALICE: u8 = 2;

fn reorganizer(chain: &TestChain) -> ChainReorganizer<mvsd_storage::memory::MemoryStore> {
    ChainReorganizer::new(
        chain.ledger.clone(),
        chain.params.clone(),
        chain.witnesses.clone(),
    )
}

fn hashes(chain: &TestChain) -> Vec<Hash256> {
    let top = chain.ledger.top_height().expect("top").expect("non-empty");
    (0..=top)
        .map(|height| {
            chain
                .ledger
                .block_hash(height)
                .expect("hash read")
                .expect("hash")
        })
        .collect()
}

/// A separate chain holding `chain`'s blocks up to `fork_height`.
fn copy_up_to(chain: &TestChain, fork_height: u64) -> TestChain {
    let branch = TestChain::new();
    for height in 0..=fork_height {
        let block = chain
            .ledger
            .get_block_by_height(height)
            .expect("block read")
            .expect("block");
        branch.ledger.push(&block).expect("copy block");
    }
    branch
}

/// A copy of `chain` up to `fork_height` that then grows its own `count` blocks.
fn competing_branch(chain: &TestChain, fork_height: u64, count: usize) -> Vec<Block> {
    let branch = copy_up_to(chain, fork_height);
    (0..count).map(|_| branch.mine(0x77, Vec::new())).collect()
}

fn attached(attachment: Attachment) -> TxOut {
    TxOut::with_attachment(0, script_of(ALICE), attachment)
}

fn issue_cert(symbol: &str) -> AssetCert {
    AssetCert {
        symbol: symbol.to_string(),
        owner: "alice".to_string(),
        address: address_of(ALICE),
        cert_type: CertType::Issue,
        content: String::new(),
    }
}

/// Mints 100 more `BUS`, moving the issue certificate at output 1 and change at output 2.
fn secondary_issue(chain: &TestChain, cert: OutPoint, funding: OutPoint, value: Amount) -> Transaction {
    chain.spend(
        3,
        &[cert, funding],
        vec![
            attached(Attachment::AssetSecondaryIssue(AssetDetail {
                symbol: "BUS".to_string(),
                maximum_supply: 100,
                ..AssetDetail::default()
            })),
            attached(Attachment::AssetCertTransfer(issue_cert("BUS"))),
            coin(value - 10_000, ALICE),
        ],
        ALICE,
    )
}

#[test]
fn failed_replacement_restores_original_chain() {
    let chain = TestChain::new();
    chain.mine_empty(12);
    let before = hashes(&chain);

    let mut branch = competing_branch(&chain, 9, 3);
    branch[2].header.merkle_root = [0xab; 32];

    let info = reorganizer(&chain)
        .replace_chain(9, &branch)
        .expect_err("last block is invalid");
    assert_eq!(info.failed_index, 2);
    assert_eq!(info.reason, ReorgError::Block(BlockError::BadMerkleRoot));
    assert_eq!(info.restore_error, None);
    assert_eq!(chain.ledger.top_height().expect("top"), Some(11));
    assert_eq!(hashes(&chain), before);
}

#[test]
fn longer_branch_replaces_the_tip() {
    let chain = TestChain::new();
    chain.mine_empty(12);
    let branch = competing_branch(&chain, 9, 4);

    let applied = reorganizer(&chain)
        .replace_chain(9, &branch)
        .expect("valid branch");
    assert_eq!(applied, 4);
    assert_eq!(chain.ledger.top_height().expect("top"), Some(13));
    assert_eq!(
        chain.ledger.tip_hash().expect("tip"),
        Some(branch[3].header.hash())
    );
}

#[test]
fn replacement_frees_outputs_spent_on_the_old_branch() {
    let chain = TestChain::new();
    chain.mine_empty(11);
    let input = chain.coinbase_coin(0);
    let spend = chain.spend(1, &[input.clone()], vec![coin(COIN - 10_000, 2)], MINER);
    chain.mine(1, vec![spend.clone()]);
    assert!(chain.ledger.get_spender(&input).expect("spender").is_some());

    let branch = competing_branch(&chain, 10, 2);
    reorganizer(&chain)
        .replace_chain(10, &branch)
        .expect("valid branch");
    assert!(chain.ledger.get_spender(&input).expect("spender").is_none());
    assert!(chain
        .ledger
        .get_transaction(&spend.txid())
        .expect("tx read")
        .is_none());
}

#[test]
fn disconnected_branch_is_rejected_before_popping() {
    let chain = TestChain::new();
    chain.mine_empty(6);
    let before = hashes(&chain);
    let branch = competing_branch(&chain, 3, 2);

    let info = reorganizer(&chain)
        .replace_chain(4, &branch)
        .expect_err("branch forks at 3, not 4");
    assert_eq!(info.reason, ReorgError::ForkDisconnected);
    assert_eq!(hashes(&chain), before);

    let info = reorganizer(&chain)
        .replace_chain(40, &branch)
        .expect_err("fork above tip");
    assert!(matches!(info.reason, ReorgError::ForkAboveTip { .. }));
}

#[test]
fn replacement_allows_one_secondary_issue_per_symbol() {
    let chain = TestChain::new();
    chain.mine_empty(11);
    let issue = chain.spend(
        3,
        &[chain.coinbase_coin(0)],
        vec![
            attached(Attachment::AssetIssue(AssetDetail {
                symbol: "BUS".to_string(),
                maximum_supply: 1_000,
                secondary_issue_threshold: SECONDARY_ISSUE_FREE_THRESHOLD,
                issuer: "alice".to_string(),
                ..AssetDetail::default()
            })),
            attached(Attachment::AssetCertAutoissue(issue_cert("BUS"))),
            coin(COIN / 2, ALICE),
        ],
        MINER,
    );
    chain.push_unchecked(vec![issue.clone()]);
    let before = hashes(&chain);

    let branch = copy_up_to(&chain, 11);
    let issue_id = issue.txid();
    let first = secondary_issue(
        &branch,
        OutPoint::new(issue_id, 1),
        OutPoint::new(issue_id, 2),
        COIN / 2,
    );
    let first_block = branch.mine(0x77, vec![first.clone()]);
    let second = secondary_issue(
        &branch,
        OutPoint::new(first.txid(), 1),
        OutPoint::new(first.txid(), 2),
        COIN / 2 - 10_000,
    );
    let second_block = branch.mine(0x77, vec![second]);

    let info = reorganizer(&chain)
        .replace_chain(11, &[first_block.clone(), second_block])
        .expect_err("second secondary issue of BUS");
    assert_eq!(info.failed_index, 1);
    assert_eq!(info.reason, ReorgError::CompetingSecondaryIssue("BUS".to_string()));
    assert_eq!(info.restore_error, None);
    assert_eq!(hashes(&chain), before);

    reorganizer(&chain)
        .replace_chain(11, &[first_block])
        .expect("a single secondary issue");
    assert_eq!(chain.ledger.top_height().expect("top"), Some(12));
}
