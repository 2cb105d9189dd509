//! Core block/transaction types, output attachments and binary serialization.

pub mod address;
pub mod attachment;
pub mod block;
pub mod encoding;
pub mod hash;
pub mod outpoint;
pub mod transaction;

pub use address::{script_pubkey_to_address, AddressError, PaymentAddress};
pub use attachment::{
    domain_of, AssetCert, AssetDetail, AssetTransfer, Attachment, AttachmentKind, CertType, Did,
    Mit,
};
pub use block::{merkle_root, Block, BlockHeader};
pub use hash::{hash160, hash_to_hex, sha256, sha256d};
pub use outpoint::OutPoint;
pub use transaction::{Transaction, TxIn, TxOut};
