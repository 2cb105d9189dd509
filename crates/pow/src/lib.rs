//! Compact targets, difficulty retargeting and proof-of-work header checks.

pub mod difficulty;
pub mod validation;

pub use difficulty::{
    compact_to_target, compact_to_u256, hash_meets_target, next_work_required, target_to_compact,
    u256_to_compact, CompactError, HeaderInfo,
};
pub use validation::{solve_header, validate_pow_header, PowError};
