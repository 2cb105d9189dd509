//! Proof-of-stake kernel checks and stake-block header signatures.

pub mod kernel;
pub mod signature;

pub use kernel::{check_stake_kernel, stake_kernel_hash, verify_stake, StakeError, StakeInput};
pub use signature::{sign_header, verify_header_signature, SignatureError};
