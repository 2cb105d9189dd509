use std::sync::Arc;

use mvsd_consensus::{consensus_params, Network};
use mvsd_primitives::transaction::Transaction;
use mvsd_witness::{
    elect_witnesses, is_vote_result_output, verify_vote_result, vote_result_output,
    EpochWitnessSchedule, StakeHolder, WitnessError, WitnessSchedule,
};
use secp256k1::{PublicKey, Secp256k1, SecretKey};

fn pubkey(tag: u8) -> Vec<u8> {
    let secret = SecretKey::from_slice(&[tag; 32]).expect("secret");
    PublicKey::from_secret_key(&Secp256k1::new(), &secret)
        .serialize()
        .to_vec()
}

fn regtest_schedule() -> EpochWitnessSchedule {
    EpochWitnessSchedule::new(&consensus_params(Network::Regtest))
}

#[test]
fn epoch_boundaries_follow_params() {
    let params = consensus_params(Network::Regtest);
    let schedule = regtest_schedule();
    let enable = params.witness.enable_height;
    let cycle = params.witness.epoch_cycle_height;
    assert!(!schedule.is_begin_of_epoch(enable - 1));
    assert!(schedule.is_begin_of_epoch(enable));
    assert!(!schedule.is_begin_of_epoch(enable + 1));
    assert!(schedule.is_begin_of_epoch(enable + cycle));
    assert_eq!(schedule.epoch_start(enable + cycle + 7), Some(enable + cycle));
    assert_eq!(schedule.epoch_start(enable - 1), None);
}

#[test]
fn slots_rotate_through_the_list() {
    let params = consensus_params(Network::Regtest);
    let enable = params.witness.enable_height;
    let schedule = regtest_schedule();
    let list = vec![pubkey(1), pubkey(2), pubkey(3)];
    schedule.set_witnesses(enable, list.clone()).expect("install");

    let handle: Arc<dyn WitnessSchedule> = Arc::new(schedule);
    assert_eq!(handle.witness_count(enable), 3);
    assert_eq!(handle.witness_count(enable - 1), 0);
    assert_eq!(handle.scheduled_witness(enable), Some(list[0].clone()));
    assert_eq!(handle.scheduled_witness(enable + 1), Some(list[1].clone()));
    assert_eq!(handle.scheduled_witness(enable + 5), Some(list[2].clone()));
    assert!(handle.is_witness(&list[1]));
    assert!(!handle.is_witness(&pubkey(9)));
}

#[test]
fn invalid_lists_are_refused() {
    let schedule = regtest_schedule();
    assert_eq!(
        schedule.set_witnesses(200, vec![vec![0x02; 33]]),
        Err(WitnessError::InvalidPublicKey(0))
    );
    assert_eq!(
        schedule.set_witnesses(200, vec![pubkey(1), pubkey(1)]),
        Err(WitnessError::DuplicateWitness(1))
    );
    let too_many: Vec<_> = (1..=4).map(pubkey).collect();
    assert!(matches!(
        schedule.set_witnesses(200, too_many),
        Err(WitnessError::TooManyWitnesses { got: 4, .. })
    ));
}

#[test]
fn election_installs_list_and_vote_output_commits_to_it() {
    let params = consensus_params(Network::Regtest);
    let enable = params.witness.enable_height;
    let schedule = regtest_schedule();
    let holders: Vec<_> = (1..=6)
        .map(|tag| StakeHolder {
            public_key: pubkey(tag),
            stake: tag as u64 * 1_000,
        })
        .collect();
    assert_eq!(
        schedule.elect(enable + 1, &holders, &[3u8; 32]),
        Err(WitnessError::NotEpochStart(enable + 1))
    );
    let elected = schedule.elect(enable, &holders, &[3u8; 32]).expect("elect");
    assert_eq!(elected.len(), params.witness.witness_number as usize);
    assert_eq!(schedule.witnesses(), elected);

    let output = vote_result_output(&elected);
    assert!(is_vote_result_output(&output));

    let coinbase = Transaction {
        version: 1,
        inputs: Vec::new(),
        outputs: vec![output],
        lock_time: 0,
    };
    assert!(verify_vote_result(&coinbase, &elected));
    assert!(!verify_vote_result(&coinbase, &elected[1..]));
}

#[test]
fn unparsable_keys_never_stand() {
    let holders = vec![
        StakeHolder {
            public_key: vec![0x02; 33],
            stake: 1_000_000,
        },
        StakeHolder {
            public_key: pubkey(4),
            stake: 10,
        },
    ];
    assert_eq!(elect_witnesses(&holders, &[1u8; 32], 3), vec![pubkey(4)]);
}

#[test]
fn reset_clears_the_installed_list() {
    let params = consensus_params(Network::Regtest);
    let enable = params.witness.enable_height;
    let schedule = regtest_schedule();
    schedule
        .set_witnesses(enable, vec![pubkey(1), pubkey(2)])
        .expect("install");
    assert_eq!(schedule.scheduled_witness(enable + 1), Some(pubkey(2)));
    schedule.reset();
    assert!(schedule.witnesses().is_empty());
    assert_eq!(schedule.scheduled_witness(enable + 1), None);
    assert_eq!(schedule.witness_count(enable + 1), 0);
}
