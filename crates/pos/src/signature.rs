//! Stake-block header signatures.

use std::sync::OnceLock;

use mvsd_primitives::block::BlockHeader;
use secp256k1::{ecdsa::Signature, All, Message, PublicKey, Secp256k1, SecretKey};

static SECP256K1: OnceLock<Secp256k1<All>> = OnceLock::new();

fn secp256k1() -> &'static Secp256k1<All> {
    SECP256K1.get_or_init(Secp256k1::new)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureError {
    MissingSignature,
    InvalidPublicKey,
    InvalidSignature,
    VerificationFailed,
}

impl std::fmt::Display for SignatureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignatureError::MissingSignature => write!(f, "block header is not signed"),
            SignatureError::InvalidPublicKey => write!(f, "invalid block signer key"),
            SignatureError::InvalidSignature => write!(f, "invalid block signature encoding"),
            SignatureError::VerificationFailed => write!(f, "block signature verification failed"),
        }
    }
}

impl std::error::Error for SignatureError {}

/// Stamps the signer key and a DER signature over the header hash.
pub fn sign_header(header: &mut BlockHeader, secret_key: &SecretKey) {
    header.public_key = PublicKey::from_secret_key(secp256k1(), secret_key)
        .serialize()
        .to_vec();
    let msg = Message::from_digest(header.hash());
    header.signature = secp256k1()
        .sign_ecdsa(&msg, secret_key)
        .serialize_der()
        .to_vec();
}

pub fn verify_header_signature(header: &BlockHeader) -> Result<(), SignatureError> {
    if header.signature.is_empty() || header.public_key.is_empty() {
        return Err(SignatureError::MissingSignature);
    }
    let pubkey =
        PublicKey::from_slice(&header.public_key).map_err(|_| SignatureError::InvalidPublicKey)?;
    let sig =
        Signature::from_der(&header.signature).map_err(|_| SignatureError::InvalidSignature)?;
    let msg = Message::from_digest(header.hash());
    secp256k1()
        .verify_ecdsa(&msg, &sig, &pubkey)
        .map_err(|_| SignatureError::VerificationFailed)
}
