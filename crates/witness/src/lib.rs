//! Delegated proof-of-stake witness schedule.
//!
//! Validators and the block assembler see the schedule only through the
//! [`WitnessSchedule`] trait, handed to them as an `Arc<dyn WitnessSchedule>`.

pub mod fts;
pub mod schedule;
pub mod vote;

pub use fts::{elect_witnesses, select_by_fts, StakeHolder};
pub use schedule::{EpochWitnessSchedule, WitnessError, WitnessSchedule};
pub use vote::{is_vote_result_output, verify_vote_result, vote_result_output, witness_mixhash};
