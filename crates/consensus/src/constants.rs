//! Consensus-wide constants shared across validation and block assembly.

/// Block header versions double as the consensus-mode tag.
pub const BLOCK_VERSION_POW: u32 = 1;
pub const BLOCK_VERSION_POS: u32 = 2;
pub const BLOCK_VERSION_DPOS: u32 = 3;

/// The maximum allowed size for a serialized block, in bytes.
pub const MAX_BLOCK_SIZE: u32 = 1_000_000;
/// The maximum allowed number of signature check operations in a block.
pub const MAX_BLOCK_SIGOPS: u32 = MAX_BLOCK_SIZE / 50;
/// The maximum serialized size of a single transaction.
pub const MAX_TX_SIZE: u32 = MAX_BLOCK_SIZE;
/// Maximum script size.
pub const MAX_SCRIPT_SIZE: usize = 10_000;

/// Largest candidate block the assembler will build by default.
pub const DEFAULT_BLOCK_MAX_SIZE: u32 = MAX_BLOCK_SIZE / 2;
/// Bytes reserved for high coin-age transactions regardless of fee.
pub const DEFAULT_BLOCK_PRIORITY_SIZE: u32 = 27_000;
/// Blocks are padded with free transactions up to this size.
pub const DEFAULT_BLOCK_MIN_SIZE: u32 = 0;

/// Lock times below this are block heights, above it unix timestamps.
pub const LOCKTIME_THRESHOLD: u32 = 500_000_000;
/// Number of previous headers used for the median time past.
pub const MEDIAN_TIME_SPAN: usize = 11;

pub const RELATIVE_LOCKTIME_MIN_VERSION: u32 = 2;
pub const RELATIVE_LOCKTIME_DISABLED: u32 = 1 << 31;
pub const RELATIVE_LOCKTIME_TIME_LOCKED: u32 = 1 << 22;
pub const RELATIVE_LOCKTIME_MASK: u32 = 0x000f_ffff;
pub const RELATIVE_LOCKTIME_SECONDS_SHIFT: u32 = 5;

pub const SEQUENCE_FINAL: u32 = u32::MAX;

/// Transaction versions.
pub const TX_VERSION_FIRST: u32 = 1;
pub const TX_VERSION_CHECK_OUTPUT_SCRIPT: u32 = 2;
pub const TX_VERSION_CHECK_NOVA_FEATURE: u32 = 3;
pub const TX_VERSION_CHECK_NOVA_TESTNET: u32 = 4;
/// First version that is never valid.
pub const TX_VERSION_MAX: u32 = 5;

/// Attachment content limits.
pub const ASSET_SYMBOL_MAX_LEN: usize = 64;
pub const DID_SYMBOL_MIN_LEN: usize = 3;
pub const DID_SYMBOL_MAX_LEN: usize = 64;
pub const MIT_SYMBOL_MAX_LEN: usize = 64;
pub const ATTACHMENT_TEXT_MAX_LEN: usize = 256;
pub const ASSET_DECIMAL_MAX: u8 = 19;

/// Secondary issuance threshold that allows issuance without holding any supply.
pub const SECONDARY_ISSUE_FREE_THRESHOLD: u8 = 127;
pub const SECONDARY_ISSUE_MAX_PERCENT: u8 = 100;
