mod common;

use common::*;
use mvsd::assembler::{AssemblerError, AssemblerPolicy, MinerKey};
use mvsd::node::{NodeError, NodeOptions};
use mvsd_chainstate::election::{elect_for_epoch, WITNESS_REGISTRY_DID};
use mvsd_chainstate::validation::ValidationError;
use mvsd_consensus::money::COIN;
use mvsd_consensus::{block_subsidy, lock_reward, ConsensusMode};
use mvsd_primitives::attachment::{Attachment, Did};
use mvsd_primitives::outpoint::OutPoint;
use mvsd_primitives::transaction::{Transaction, TxOut};
use mvsd_script::standard::p2pkh_with_lock_height;
use mvsd_witness::vote_result_output;

#[test]
fn mines_from_an_empty_chain() {
    let h = Harness::pow();
    let block = h
        .node
        .create_candidate_block(&address_of(MINER))
        .expect("assemble")
        .expect("pow candidate");
    assert_eq!(block.header.height, 0);
    assert_eq!(block.transactions.len(), 1);
    let subsidy = block_subsidy(0, ConsensusMode::Pow, 0, &h.params);
    assert_eq!(block.transactions[0].outputs[0].value, subsidy);
    assert_eq!(h.node.submit_mined_block(h.solve(block)).expect("submit"), 0);
}

#[test]
fn rejects_a_malformed_pay_address() {
    let h = Harness::pow();
    assert!(matches!(
        h.node.create_candidate_block("not-an-address"),
        Err(NodeError::Assembler(AssemblerError::Address(_)))
    ));
}

#[test]
fn orders_by_fee_rate_and_places_children_after_parents() {
    let h = Harness::pow();
    h.push_empty(11);
    let low = h.spend(&[h.coinbase_coin(0)], vec![coin(COIN - 10_000, 2)], MINER);
    let high = h.spend(&[h.coinbase_coin(1)], vec![coin(COIN - 50_000, 3)], MINER);
    let child = h.spend(
        &[OutPoint::new(high.txid(), 0)],
        vec![coin(COIN - 150_000, 4)],
        3,
    );
    h.node.broadcast(low.clone()).expect("low fee");
    h.node.broadcast(high.clone()).expect("high fee");
    h.node.broadcast(child.clone()).expect("child");
    assert_eq!(h.node.pool().len(), 3);

    let block = h
        .node
        .create_candidate_block(&address_of(MINER))
        .expect("assemble")
        .expect("pow candidate");
    let txids: Vec<_> = block.transactions.iter().map(|tx| tx.txid()).collect();
    assert_eq!(txids[1..], [high.txid(), child.txid(), low.txid()]);

    let subsidy = block_subsidy(11, ConsensusMode::Pow, 0, &h.params);
    let fees = 10_000 + 50_000 + 100_000;
    assert_eq!(block.transactions[0].outputs[0].value, subsidy + fees);

    let height = h.node.submit_mined_block(h.solve(block)).expect("submit");
    assert_eq!(height, 11);
    assert!(h.node.pool().is_empty());
}

#[test]
fn spends_below_the_minimum_fee_never_reach_a_candidate() {
    let h = Harness::pow();
    h.push_empty(11);
    let cheap = h.spend(&[h.coinbase_coin(0)], vec![coin(COIN - 1_000, 2)], MINER);
    assert!(matches!(
        h.node.broadcast(cheap),
        Err(NodeError::Validation(ValidationError::FeesOutOfRange))
    ));
    let block = h
        .node
        .create_candidate_block(&address_of(MINER))
        .expect("assemble")
        .expect("pow candidate");
    assert_eq!(block.transactions.len(), 1);
}

#[test]
fn deposits_earn_a_lock_reward_transaction() {
    let h = Harness::pow();
    h.push_empty(11);
    let lock_height = h.params.lock_rewards.lock_heights[0];
    let deposit_value = COIN - 10_000;
    let deposit = h.spend(
        &[h.coinbase_coin(0)],
        vec![TxOut::coin(
            deposit_value,
            p2pkh_with_lock_height(&pubkey_hash(2), lock_height),
        )],
        MINER,
    );
    h.node.broadcast(deposit.clone()).expect("deposit");

    let block = h
        .node
        .create_candidate_block(&address_of(MINER))
        .expect("assemble")
        .expect("pow candidate");
    assert_eq!(block.transactions.len(), 3);
    let reward = &block.transactions[1];
    assert!(reward.is_coinbase());
    assert_eq!(
        reward.outputs,
        vec![TxOut::coin(
            lock_reward(lock_height, deposit_value, &h.params).expect("configured height"),
            p2pkh_with_lock_height(&pubkey_hash(2), lock_height),
        )]
    );
    assert_ne!(reward.txid(), block.transactions[0].txid());
    assert_eq!(block.transactions[2].txid(), deposit.txid());

    h.node.submit_mined_block(h.solve(block)).expect("submit");
}

#[test]
fn lock_rewards_count_against_the_size_budget() {
    let h = Harness::pow();
    h.push_empty(11);
    let lock_height = h.params.lock_rewards.lock_heights[0];
    let deposit = h.spend(
        &[h.coinbase_coin(0)],
        vec![TxOut::coin(
            COIN - 10_000,
            p2pkh_with_lock_height(&pubkey_hash(2), lock_height),
        )],
        MINER,
    );
    let deposit_size = deposit.serialized_size() as u32;

    let candidate_with_budget = |slack: u32| {
        let node = h.node_with(NodeOptions {
            policy: AssemblerPolicy {
                block_max_size: 1_000 + deposit_size + slack,
                ..AssemblerPolicy::default()
            },
            ..NodeOptions::default()
        });
        node.broadcast(deposit.clone()).expect("deposit");
        node.create_candidate_block(&address_of(MINER))
            .expect("assemble")
            .expect("pow candidate")
    };

    // Room for the deposit alone but not for its reward transaction.
    assert_eq!(candidate_with_budget(10).transactions.len(), 1);
    assert_eq!(candidate_with_budget(400).transactions.len(), 3);
}

#[test]
fn epoch_start_carries_only_the_vote_result() {
    let h = Harness::pow();
    h.push_empty(11);
    let spend = h.spend(&[h.coinbase_coin(0)], vec![coin(COIN - 10_000, 2)], MINER);
    h.push_empty(189);
    assert_eq!(h.next_height(), 200);
    h.node.broadcast(spend).expect("pooled spend");

    let block = h
        .node
        .create_candidate_block(&address_of(MINER))
        .expect("assemble")
        .expect("pow candidate");
    assert_eq!(block.transactions.len(), 1);
    let elected = elect_for_epoch(&h.ledger, &h.params, 200).expect("elect");
    assert!(elected.is_empty());
    assert_eq!(
        block.transactions[0].outputs.last(),
        Some(&vote_result_output(&elected))
    );

    h.node.submit_mined_block(h.solve(block)).expect("submit");
    assert_eq!(h.node.pool().len(), 1);
}

fn staking_harness(with_deposit: bool) -> Harness {
    let h = Harness::with_key(ConsensusMode::Pos, MINER);
    let mut outputs = vec![coin(5 * COIN, MINER)];
    if with_deposit {
        outputs.push(TxOut::coin(
            600 * COIN,
            p2pkh_with_lock_height(&pubkey_hash(MINER), 400),
        ));
    }
    h.push_block(outputs, Vec::new());
    h.push_empty(99);
    h
}

#[test]
fn first_stake_block_pays_the_genesis_bonus() {
    let h = staking_harness(true);
    assert_eq!(h.next_height(), 100);

    let block = h
        .node
        .create_candidate_block(&address_of(MINER))
        .expect("assemble")
        .expect("stake candidate");
    assert_eq!(block.header.mode(), Some(ConsensusMode::Pos));
    assert!(block.transactions[1].is_coinstake());
    let bonus = &block.transactions[2];
    assert!(bonus.is_coinbase());
    assert_eq!(bonus.outputs[0].value, h.params.pos.genesis_reward);

    assert_eq!(h.node.submit_mined_block(block).expect("submit"), 100);
    assert_eq!(h.ledger.first_pos_height().expect("read"), Some(100));
}

#[test]
fn staking_without_a_deposit_yields_nothing() {
    let h = staking_harness(false);
    assert!(h
        .node
        .create_candidate_block(&address_of(MINER))
        .expect("assemble")
        .is_none());
}

#[test]
fn stopping_interrupts_the_stake_search() {
    let h = staking_harness(true);
    h.node.stop();
    let started = std::time::Instant::now();
    assert!(h
        .node
        .assembler()
        .create_candidate(&address_of(MINER))
        .expect("assemble")
        .is_none());
    assert!(started.elapsed() < std::time::Duration::from_millis(500));
}

#[test]
fn stake_blocks_wait_for_activation() {
    let h = Harness::with_key(ConsensusMode::Pos, MINER);
    h.push_empty(20);
    assert!(h
        .node
        .create_candidate_block(&address_of(MINER))
        .expect("assemble")
        .is_none());
}

const REGISTRY: u8 = 9;

fn registry_did(h: &Harness) -> Transaction {
    h.spend(
        &[h.coinbase_coin(0)],
        vec![TxOut::with_attachment(
            0,
            script_of(REGISTRY),
            Attachment::DidRegister(Did {
                symbol: WITNESS_REGISTRY_DID.to_string(),
                address: address_of(REGISTRY),
            }),
        )],
        MINER,
    )
}

/// Pays the registry from `key`'s coin at `funding` and locks a deposit back to `key`.
fn register_witness(h: &Harness, funding: OutPoint, key: u8) -> Transaction {
    h.spend(
        &[funding],
        vec![
            coin(10_000, REGISTRY),
            TxOut::coin(
                2 * COIN,
                p2pkh_with_lock_height(&pubkey_hash(key), 400),
            ),
            coin(3 * COIN - 20_000, key),
        ],
        key,
    )
}

#[test]
fn registered_witnesses_are_elected_and_sign_the_epoch() {
    let h = Harness::pow();
    let keys = [5u8, 6, 7];
    h.push_empty(1);
    let funding = h.push_block(
        keys.iter().map(|key| coin(5 * COIN, *key)).collect(),
        vec![registry_did(&h)],
    );
    let funding_txid = funding.transactions[0].txid();
    let registrations = keys
        .iter()
        .enumerate()
        .map(|(index, key)| register_witness(&h, OutPoint::new(funding_txid, index as u32), *key))
        .collect();
    h.push_block(vec![coin(COIN, MINER)], registrations);
    while h.next_height() < 200 {
        h.push_empty(1);
    }

    let mut elected: Vec<Vec<u8>> = keys.iter().map(|key| public_key(*key)).collect();
    elected.sort();
    let epoch = h
        .node
        .create_candidate_block(&address_of(MINER))
        .expect("assemble")
        .expect("epoch block");
    assert_eq!(epoch.transactions.len(), 1);
    assert_eq!(
        epoch.transactions[0].outputs.last(),
        Some(&vote_result_output(&elected))
    );
    h.node.submit_mined_block(h.solve(epoch)).expect("epoch submit");
    assert_eq!(h.witnesses.witnesses(), elected);

    h.witnesses.reset();
    assert_eq!(h.node.restore_witnesses().expect("restore"), Some(200));
    assert_eq!(h.witnesses.witnesses(), elected);

    let slot = elected[((201 - h.params.witness.enable_height) % 3) as usize].clone();
    let other = elected[((202 - h.params.witness.enable_height) % 3) as usize].clone();
    let tag_of = |public: &[u8]| {
        *keys
            .iter()
            .find(|key| public_key(**key) == public)
            .expect("elected key")
    };
    let (slot_tag, other_tag) = (tag_of(&slot), tag_of(&other));

    let idle = h.node_with(NodeOptions {
        mode: ConsensusMode::Dpos,
        miner_key: Some(MinerKey::new(secret(other_tag))),
        ..NodeOptions::default()
    });
    let witness = h.node_with(NodeOptions {
        mode: ConsensusMode::Dpos,
        miner_key: Some(MinerKey::new(secret(slot_tag))),
        ..NodeOptions::default()
    });

    std::thread::sleep(std::time::Duration::from_millis(1_100));
    assert!(idle
        .create_candidate_block(&address_of(other_tag))
        .expect("assemble")
        .is_none());
    let block = witness
        .create_candidate_block(&address_of(slot_tag))
        .expect("assemble")
        .expect("witness candidate");
    assert_eq!(block.header.mode(), Some(ConsensusMode::Dpos));
    assert_eq!(block.header.public_key, slot);
    assert_eq!(witness.submit_mined_block(block).expect("submit"), 201);
}
