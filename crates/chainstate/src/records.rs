//! Fixed-layout values stored in the ledger columns.

use mvsd_consensus::{ConsensusMode, Hash256};
use mvsd_primitives::attachment::{AssetCert, AssetDetail, Did, Mit};
use mvsd_primitives::encoding::{Decodable, DecodeError, Decoder, Encodable, Encoder};
use mvsd_primitives::transaction::Transaction;

const HEADER_ENTRY_LEN: usize = 17;
const SPENT_RECORD_LEN: usize = 44;
const NO_HEIGHT: u64 = u64::MAX;

pub fn height_key(height: u64) -> [u8; 8] {
    height.to_be_bytes()
}

fn mode_code(mode: ConsensusMode) -> u8 {
    match mode {
        ConsensusMode::Pow => 0,
        ConsensusMode::Pos => 1,
        ConsensusMode::Dpos => 2,
    }
}

fn mode_from_code(code: u8) -> Option<ConsensusMode> {
    match code {
        0 => Some(ConsensusMode::Pow),
        1 => Some(ConsensusMode::Pos),
        2 => Some(ConsensusMode::Dpos),
        _ => None,
    }
}

/// `HeaderIndex` value: where a block sits and the previous block of its mode.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct HeaderEntry {
    pub height: u64,
    pub mode: ConsensusMode,
    pub prev_same_mode: Option<u64>,
}

impl HeaderEntry {
    pub fn encode(&self) -> [u8; HEADER_ENTRY_LEN] {
        let mut out = [0u8; HEADER_ENTRY_LEN];
        out[0..8].copy_from_slice(&self.height.to_le_bytes());
        out[8] = mode_code(self.mode);
        out[9..17].copy_from_slice(&self.prev_same_mode.unwrap_or(NO_HEIGHT).to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != HEADER_ENTRY_LEN {
            return None;
        }
        let height = u64::from_le_bytes(bytes[0..8].try_into().ok()?);
        let mode = mode_from_code(bytes[8])?;
        let prev = u64::from_le_bytes(bytes[9..17].try_into().ok()?);
        Some(Self {
            height,
            mode,
            prev_same_mode: (prev != NO_HEIGHT).then_some(prev),
        })
    }
}

pub fn mode_meta_key(mode: ConsensusMode) -> [u8; 2] {
    [b'm', mode_code(mode)]
}

/// `TxIndex` value: confirmation position plus the transaction itself.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ConfirmedTx {
    pub tx: Transaction,
    pub height: u64,
    pub position: u32,
}

impl ConfirmedTx {
    pub fn is_coinbase(&self) -> bool {
        self.tx.is_coinbase()
    }

    pub fn encode(&self) -> Vec<u8> {
        Self::encode_entry(&self.tx, self.height, self.position)
    }

    pub fn encode_entry(tx: &Transaction, height: u64, position: u32) -> Vec<u8> {
        let mut encoder = Encoder::with_capacity(256);
        encoder.write_u64_le(height);
        encoder.write_u32_le(position);
        tx.consensus_encode(&mut encoder);
        encoder.into_inner()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let height = decoder.read_u64_le()?;
        let position = decoder.read_u32_le()?;
        let tx = Transaction::consensus_decode(&mut decoder)?;
        if !decoder.is_empty() {
            return Err(DecodeError::TrailingBytes);
        }
        Ok(Self {
            tx,
            height,
            position,
        })
    }
}

/// `SpentIndex` value.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SpentRecord {
    pub txid: Hash256,
    pub input_index: u32,
    pub height: u64,
}

impl SpentRecord {
    pub fn encode(&self) -> [u8; SPENT_RECORD_LEN] {
        let mut out = [0u8; SPENT_RECORD_LEN];
        out[0..32].copy_from_slice(&self.txid);
        out[32..36].copy_from_slice(&self.input_index.to_le_bytes());
        out[36..44].copy_from_slice(&self.height.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != SPENT_RECORD_LEN {
            return None;
        }
        let mut txid = [0u8; 32];
        txid.copy_from_slice(&bytes[0..32]);
        Some(Self {
            txid,
            input_index: u32::from_le_bytes(bytes[32..36].try_into().ok()?),
            height: u64::from_le_bytes(bytes[36..44].try_into().ok()?),
        })
    }
}

/// Registered asset with its circulating supply after secondary issues.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AssetRecord {
    pub detail: AssetDetail,
    pub height: u64,
    pub txid: Hash256,
    pub total_supply: u64,
    pub secondary_issues: u32,
}

impl AssetRecord {
    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        self.detail.consensus_encode(&mut encoder);
        encoder.write_u64_le(self.height);
        encoder.write_hash(&self.txid);
        encoder.write_u64_le(self.total_supply);
        encoder.write_u32_le(self.secondary_issues);
        encoder.into_inner()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let record = Self {
            detail: AssetDetail::consensus_decode(&mut decoder)?,
            height: decoder.read_u64_le()?,
            txid: decoder.read_hash()?,
            total_supply: decoder.read_u64_le()?,
            secondary_issues: decoder.read_u32_le()?,
        };
        finish(decoder, record)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CertRecord {
    pub cert: AssetCert,
    pub height: u64,
}

impl CertRecord {
    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        self.cert.consensus_encode(&mut encoder);
        encoder.write_u64_le(self.height);
        encoder.into_inner()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let record = Self {
            cert: AssetCert::consensus_decode(&mut decoder)?,
            height: decoder.read_u64_le()?,
        };
        finish(decoder, record)
    }
}

pub fn cert_key(cert_type_code: u32, symbol: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + symbol.len());
    key.push(cert_type_code as u8);
    key.extend_from_slice(symbol.as_bytes());
    key
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DidRecord {
    pub did: Did,
    pub height: u64,
}

impl DidRecord {
    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        self.did.consensus_encode(&mut encoder);
        encoder.write_u64_le(self.height);
        encoder.into_inner()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let record = Self {
            did: Did::consensus_decode(&mut decoder)?,
            height: decoder.read_u64_le()?,
        };
        finish(decoder, record)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MitRecord {
    pub mit: Mit,
    pub height: u64,
    /// Height of the latest transfer; equals `height` until the token moves.
    pub updated_height: u64,
}

impl MitRecord {
    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        self.mit.consensus_encode(&mut encoder);
        encoder.write_u64_le(self.height);
        encoder.write_u64_le(self.updated_height);
        encoder.into_inner()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let record = Self {
            mit: Mit::consensus_decode(&mut decoder)?,
            height: decoder.read_u64_le()?,
            updated_height: decoder.read_u64_le()?,
        };
        finish(decoder, record)
    }
}

fn finish<T>(decoder: Decoder<'_>, value: T) -> Result<T, DecodeError> {
    if !decoder.is_empty() {
        return Err(DecodeError::TrailingBytes);
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_entry_keeps_missing_predecessor() {
        let entry = HeaderEntry {
            height: 42,
            mode: ConsensusMode::Pos,
            prev_same_mode: None,
        };
        assert_eq!(HeaderEntry::decode(&entry.encode()), Some(entry));
        let chained = HeaderEntry {
            prev_same_mode: Some(40),
            ..entry
        };
        assert_eq!(HeaderEntry::decode(&chained.encode()), Some(chained));
        assert_eq!(HeaderEntry::decode(&[0u8; 3]), None);
    }

    #[test]
    fn spent_record_layout_is_fixed() {
        let record = SpentRecord {
            txid: [7u8; 32],
            input_index: 3,
            height: 9,
        };
        let bytes = record.encode();
        assert_eq!(bytes.len(), SPENT_RECORD_LEN);
        assert_eq!(&bytes[32..36], &3u32.to_le_bytes());
        assert_eq!(SpentRecord::decode(&bytes), Some(record));
    }

    #[test]
    fn height_keys_sort_numerically() {
        assert!(height_key(255) < height_key(256));
        assert!(height_key(1) < height_key(1 << 40));
    }
}
