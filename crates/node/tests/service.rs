mod common;

use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::*;
use mvsd::mempool::{MempoolError, MempoolErrorKind};
use mvsd::miner::{MinerConfig, MinerHandle};
use mvsd::node::{Node, NodeError};
use mvsd_consensus::money::COIN;
use mvsd_consensus::Hash256;
use mvsd_primitives::block::Block;
use mvsd_primitives::outpoint::OutPoint;
use mvsd_storage::memory::MemoryStore;

fn mine_next(h: &Harness, node: &Node<MemoryStore>, pay: u8) -> Block {
    let block = node
        .create_candidate_block(&address_of(pay))
        .expect("assemble")
        .expect("pow candidate");
    let block = h.solve(block);
    node.submit_mined_block(block.clone()).expect("submit");
    block
}

#[test]
fn validate_does_not_touch_the_pool() {
    let h = Harness::pow();
    h.push_empty(11);
    let tx = h.spend(&[h.coinbase_coin(0)], vec![coin(COIN - 20_000, 2)], MINER);
    let ctx = h.node.validate(&tx).expect("valid");
    assert_eq!(ctx.fee, 20_000);
    assert!(h.node.pool().is_empty());
}

#[test]
fn double_spends_are_refused_by_the_pool() {
    let h = Harness::pow();
    h.push_empty(11);
    let first = h.spend(&[h.coinbase_coin(0)], vec![coin(COIN - 20_000, 2)], MINER);
    let second = h.spend(&[h.coinbase_coin(0)], vec![coin(COIN - 30_000, 3)], MINER);
    h.node.broadcast(first).expect("first");
    match h.node.broadcast(second) {
        Err(NodeError::Validation(_)) => {}
        Err(NodeError::Mempool(err)) => assert_eq!(err.kind, MempoolErrorKind::ConflictingInput),
        other => panic!("second spend accepted: {other:?}"),
    }
    assert_eq!(h.node.pool().len(), 1);
}

#[test]
fn handlers_fire_on_admission_and_confirmation() {
    let h = Harness::pow();
    h.push_empty(11);
    let tx = h.spend(&[h.coinbase_coin(0)], vec![coin(COIN - 20_000, 2)], MINER);
    let (validated_tx, validated_rx) = mpsc::channel();
    let (confirmed_tx, confirmed_rx) = mpsc::channel();
    let txid = h
        .node
        .broadcast_with_handlers(
            tx,
            Some(Box::new(move |height: u64| {
                let _ = confirmed_tx.send(height);
            })),
            Some(Box::new(move |result: &Result<Hash256, MempoolError>| {
                let _ = validated_tx.send(result.is_ok());
            })),
        )
        .expect("broadcast");
    assert_eq!(validated_rx.try_recv(), Ok(true));
    assert!(confirmed_rx.try_recv().is_err());

    let block = mine_next(&h, &h.node, MINER);
    assert!(block.transactions.iter().any(|tx| tx.txid() == txid));
    assert_eq!(confirmed_rx.try_recv(), Ok(11));
}

#[test]
fn stopped_node_refuses_work() {
    let h = Harness::pow();
    h.push_empty(11);
    let tx = h.spend(&[h.coinbase_coin(0)], vec![coin(COIN - 20_000, 2)], MINER);
    let block = h
        .node
        .create_candidate_block(&address_of(MINER))
        .expect("assemble")
        .expect("pow candidate");

    h.node.stop();
    assert!(h.node.is_stopped());
    assert!(matches!(h.node.broadcast(tx), Err(NodeError::ServiceStopped)));
    assert!(matches!(
        h.node.create_candidate_block(&address_of(MINER)),
        Err(NodeError::ServiceStopped)
    ));
    assert!(matches!(
        h.node.submit_mined_block(h.solve(block)),
        Err(NodeError::ServiceStopped)
    ));
    assert!(matches!(
        h.node.replace_chain(10, &[]),
        Err(NodeError::ServiceStopped)
    ));
    assert_eq!(h.ledger.top_height().expect("top"), Some(10));
}

#[test]
fn replacing_the_chain_switches_tips_and_clears_confirmed_spends() {
    let ours = Harness::pow();
    let theirs = Harness::pow();
    ours.push_empty(11);
    for height in 0..11 {
        let block = ours
            .ledger
            .get_block_by_height(height)
            .expect("read")
            .expect("block");
        theirs.ledger.push(&block).expect("shared history");
    }

    // Our branch pays a different key and leaves the spend pooled.
    mine_next(&ours, &ours.node, 2);
    let spend = ours.spend(&[ours.coinbase_coin(0)], vec![coin(COIN - 20_000, 2)], MINER);
    ours.node.broadcast(spend.clone()).expect("ours");
    theirs.node.broadcast(spend.clone()).expect("theirs");

    let fork: Vec<Block> = (0..2).map(|_| mine_next(&theirs, &theirs.node, MINER)).collect();
    assert!(fork[0].transactions.iter().any(|tx| tx.txid() == spend.txid()));

    let applied = ours.node.replace_chain(10, &fork).expect("replace");
    assert_eq!(applied, 2);
    assert_eq!(
        ours.ledger.tip_hash().expect("tip"),
        theirs.ledger.tip_hash().expect("tip")
    );
    assert!(ours.node.pool().is_empty());
}

#[test]
fn replacing_the_chain_drops_spends_of_released_outputs() {
    let ours = Harness::pow();
    let theirs = Harness::pow();
    ours.push_empty(11);
    for height in 0..11 {
        let block = ours
            .ledger
            .get_block_by_height(height)
            .expect("read")
            .expect("block");
        theirs.ledger.push(&block).expect("shared history");
    }

    // The parent confirms only on our branch; its child and an unrelated spend stay pooled.
    let parent = ours.spend(&[ours.coinbase_coin(0)], vec![coin(COIN - 20_000, 2)], MINER);
    ours.node.broadcast(parent.clone()).expect("parent");
    let ours_block = mine_next(&ours, &ours.node, MINER);
    assert!(ours_block.transactions.iter().any(|tx| tx.txid() == parent.txid()));
    let child = ours.spend(
        &[OutPoint::new(parent.txid(), 0)],
        vec![coin(COIN - 40_000, 3)],
        2,
    );
    let child_txid = ours.node.broadcast(child).expect("child");
    let unrelated = ours.spend(&[ours.coinbase_coin(1)], vec![coin(COIN - 20_000, 4)], MINER);
    let unrelated_txid = ours.node.broadcast(unrelated).expect("unrelated");
    assert_eq!(ours.node.pool().len(), 2);

    let fork: Vec<Block> = (0..2).map(|_| mine_next(&theirs, &theirs.node, MINER)).collect();
    ours.node.replace_chain(10, &fork).expect("replace");

    assert!(ours.node.pool().entry(&child_txid).is_none());
    assert!(ours.node.pool().entry(&unrelated_txid).is_some());
    assert_eq!(ours.node.pool().len(), 1);
    let candidate = ours
        .node
        .create_candidate_block(&address_of(MINER))
        .expect("assemble after reorg")
        .expect("pow candidate");
    assert!(candidate.transactions.iter().all(|tx| tx.txid() != child_txid));
}

#[test]
fn rejected_replacement_restores_the_chain() {
    let ours = Harness::pow();
    ours.push_empty(11);
    mine_next(&ours, &ours.node, MINER);
    let before = ours.ledger.tip_hash().expect("tip");

    let mut bogus = ours
        .ledger
        .get_block_by_height(11)
        .expect("read")
        .expect("block");
    bogus.transactions[0].outputs[0].value += COIN;

    assert!(matches!(
        ours.node.replace_chain(10, &[bogus]),
        Err(NodeError::Reorg(_))
    ));
    assert_eq!(ours.ledger.tip_hash().expect("tip"), before);
}

#[test]
fn miner_thread_extends_the_chain() {
    let h = Harness::pow();
    let node = Arc::new(h.node);
    let mut miner = MinerHandle::start(
        node.clone(),
        MinerConfig {
            pay_address: address_of(MINER),
            poll: Duration::from_millis(5),
            pow_tries_per_poll: 10_000,
        },
    )
    .expect("spawn miner");

    let deadline = Instant::now() + Duration::from_secs(30);
    while miner.status().blocks_found < 3 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    miner.shutdown();
    let status = miner.status();
    assert!(!status.running);
    assert!(status.blocks_found >= 3, "{}", status.to_json());
    assert_eq!(status.mode, "pow");
    assert_eq!(
        node.ledger().top_height().expect("top"),
        status.last_height
    );
}
