//! Ledger, transaction and block validation, and chain reorganization.

pub mod block;
pub mod election;
pub mod ledger;
pub mod records;
pub mod reorg;
pub mod resolver;
pub mod rules;
pub mod undo;
pub mod validation;

pub use block::{BlockError, BlockSummary, BlockValidator};
pub use election::{
    elect_for_epoch, registered_stakeholders, sync_witness_schedule, ElectionError,
    WITNESS_REGISTRY_DID,
};
pub use ledger::{ChainTip, LedgerError, LedgerStore, UnspentOutput};
pub use reorg::{ChainReorganizer, ReorgError, RollbackInfo};
pub use resolver::{CandidateView, EmptyMempool, MempoolView, UtxoResolver, ValidationScope};
pub use validation::{TransactionValidator, ValidationContext, ValidationError, ValidationFlags};
