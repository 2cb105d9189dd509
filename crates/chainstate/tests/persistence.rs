mod common;

use common::{coin, TestChain, MINER};
use mvsd_consensus::money::COIN;
use mvsd_storage::fjall::FjallStore;

#[test]
fn ledger_survives_reopen() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (tip, spend_id, spent) = {
        let chain = TestChain::with_store(FjallStore::open(dir.path()).expect("open store"));
        chain.mine_empty(11);
        let input = chain.coinbase_coin(0);
        let spend = chain.spend(1, &[input.clone()], vec![coin(COIN - 10_000, 2)], MINER);
        chain.mine(1, vec![spend.clone()]);
        (chain.ledger.tip().expect("tip"), spend.txid(), input)
    };

    let chain = TestChain::with_store(FjallStore::open(dir.path()).expect("reopen store"));
    assert_eq!(chain.ledger.tip().expect("tip"), tip);
    let confirmed = chain
        .ledger
        .get_transaction(&spend_id)
        .expect("tx read")
        .expect("confirmed");
    assert_eq!(confirmed.height, 11);
    assert_eq!(
        chain.ledger.get_spender(&spent).expect("spender").map(|s| s.txid),
        Some(spend_id)
    );

    chain.ledger.pop().expect("pop");
    assert_eq!(chain.ledger.top_height().expect("top"), Some(10));
    assert!(chain.ledger.get_spender(&spent).expect("spender").is_none());
}
