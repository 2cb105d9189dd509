//! Script templates, legacy signature hashing and the script interpreter.

pub mod interpreter;
pub mod opcodes;
mod secp;
pub mod sighash;
pub mod sign;
pub mod standard;

pub use interpreter::{verify_script, ScriptError, ScriptFlags};
pub use sighash::{signature_hash, SighashError, SighashType};
pub use sign::{sign_p2pkh_input, SignError};
pub use standard::{classify_script_pubkey, lock_height_from_script, ScriptType};
