use mvsd_primitives::address::p2pkh_script;
use mvsd_primitives::hash::hash160;
use mvsd_primitives::{Attachment, AssetTransfer, OutPoint, Transaction, TxIn, TxOut};
use mvsd_script::interpreter::{verify_script, ScriptError, STANDARD_SCRIPT_VERIFY_FLAGS};
use mvsd_script::sighash::{
    SighashType, SIGHASH_ALL, SIGHASH_ANYONECANPAY, SIGHASH_NONE, SIGHASH_SINGLE,
};
use mvsd_script::sign::{sign_p2pkh_input, SignError};
use mvsd_script::standard::p2pkh_with_lock_height;
use secp256k1::{PublicKey, Secp256k1, SecretKey};

fn key(byte: u8) -> (SecretKey, [u8; 20]) {
    let secret = SecretKey::from_slice(&[byte; 32]).expect("secret key");
    let public = PublicKey::from_secret_key(&Secp256k1::new(), &secret);
    (secret, hash160(&public.serialize()))
}

fn spend(prev_script: &[u8]) -> Transaction {
    Transaction {
        version: 2,
        inputs: vec![TxIn::new(OutPoint::new([9u8; 32], 0))],
        outputs: vec![TxOut::with_attachment(
            0,
            prev_script.to_vec(),
            Attachment::AssetTransfer(AssetTransfer {
                symbol: "GOLD".to_string(),
                quantity: 5,
            }),
        )],
        lock_time: 0,
    }
}

#[test]
fn sighash_type_flags() {
    let combined = SighashType(SIGHASH_ALL | SIGHASH_ANYONECANPAY);
    assert_eq!(combined.base_type(), SIGHASH_ALL);
    assert!(combined.has_anyone_can_pay());
    assert!(combined.is_defined());

    let single = SighashType(SIGHASH_SINGLE);
    assert!(!single.has_anyone_can_pay());
    assert!(SighashType(SIGHASH_NONE).is_defined());
    assert!(!SighashType(0x04).is_defined());
}

#[test]
fn signed_p2pkh_input_verifies() {
    let (secret, hash) = key(0x11);
    let prev_script = p2pkh_script(&hash);
    let mut tx = spend(&prev_script);
    tx.inputs[0].script_sig = sign_p2pkh_input(&tx, 0, &prev_script, &secret).expect("sign");
    verify_script(
        &tx.inputs[0].script_sig,
        &prev_script,
        &tx,
        0,
        STANDARD_SCRIPT_VERIFY_FLAGS,
    )
    .expect("verify");
}

#[test]
fn signature_commits_to_attachment() {
    let (secret, hash) = key(0x12);
    let prev_script = p2pkh_script(&hash);
    let mut tx = spend(&prev_script);
    tx.inputs[0].script_sig = sign_p2pkh_input(&tx, 0, &prev_script, &secret).expect("sign");
    tx.outputs[0].attachment = Attachment::AssetTransfer(AssetTransfer {
        symbol: "GOLD".to_string(),
        quantity: 500,
    });
    let err = verify_script(
        &tx.inputs[0].script_sig,
        &prev_script,
        &tx,
        0,
        STANDARD_SCRIPT_VERIFY_FLAGS,
    )
    .expect_err("tampered output");
    assert_eq!(err, ScriptError::EvalFalse);
}

#[test]
fn lock_height_input_verifies_with_height_push() {
    let (secret, hash) = key(0x13);
    let prev_script = p2pkh_with_lock_height(&hash, 25_200);
    let mut tx = spend(&prev_script);
    tx.inputs[0].script_sig = sign_p2pkh_input(&tx, 0, &prev_script, &secret).expect("sign");
    verify_script(
        &tx.inputs[0].script_sig,
        &prev_script,
        &tx,
        0,
        STANDARD_SCRIPT_VERIFY_FLAGS,
    )
    .expect("verify");
}

#[test]
fn wrong_key_is_refused() {
    let (_, hash) = key(0x14);
    let (other, _) = key(0x15);
    let prev_script = p2pkh_script(&hash);
    let tx = spend(&prev_script);
    assert_eq!(
        sign_p2pkh_input(&tx, 0, &prev_script, &other),
        Err(SignError::KeyMismatch)
    );
}
