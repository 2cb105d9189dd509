//! Transaction types and their binary encoding.

use mvsd_consensus::constants::SEQUENCE_FINAL;
use mvsd_consensus::money::{checked_money_add, Amount};
use mvsd_consensus::Hash256;

use crate::attachment::Attachment;
use crate::encoding::{decode, encode, Decodable, DecodeError, Decoder, Encodable, Encoder};
use crate::hash::sha256d;
use crate::outpoint::OutPoint;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TxIn {
    pub prevout: OutPoint,
    pub script_sig: Vec<u8>,
    /// Carries the relative lock-time encoding.
    pub sequence: u32,
}

impl TxIn {
    pub fn new(prevout: OutPoint) -> Self {
        Self {
            prevout,
            script_sig: Vec::new(),
            sequence: SEQUENCE_FINAL,
        }
    }
}

impl Encodable for TxIn {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        self.prevout.consensus_encode(encoder);
        encoder.write_var_bytes(&self.script_sig);
        encoder.write_u32_le(self.sequence);
    }
}

impl Decodable for TxIn {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        Ok(Self {
            prevout: OutPoint::consensus_decode(decoder)?,
            script_sig: decoder.read_var_bytes()?,
            sequence: decoder.read_u32_le()?,
        })
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TxOut {
    pub value: Amount,
    pub script_pubkey: Vec<u8>,
    pub attachment: Attachment,
    /// Identity the value is sent from, when the sender names one.
    pub from_did: Option<String>,
    /// Identity the output is addressed to.
    pub to_did: Option<String>,
}

impl TxOut {
    pub fn coin(value: Amount, script_pubkey: Vec<u8>) -> Self {
        Self {
            value,
            script_pubkey,
            ..Self::default()
        }
    }

    pub fn with_attachment(value: Amount, script_pubkey: Vec<u8>, attachment: Attachment) -> Self {
        Self {
            value,
            script_pubkey,
            attachment,
            ..Self::default()
        }
    }

    /// The zero-value, script-less marker output that opens a coinstake.
    pub fn is_empty(&self) -> bool {
        self.value == 0 && self.script_pubkey.is_empty()
    }
}

fn write_optional_str(encoder: &mut Encoder, value: &Option<String>) {
    encoder.write_var_str(value.as_deref().unwrap_or_default());
}

fn read_optional_str(decoder: &mut Decoder) -> Result<Option<String>, DecodeError> {
    let value = decoder.read_var_str()?;
    Ok(if value.is_empty() { None } else { Some(value) })
}

impl Encodable for TxOut {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_u64_le(self.value);
        encoder.write_var_bytes(&self.script_pubkey);
        self.attachment.consensus_encode(encoder);
        write_optional_str(encoder, &self.from_did);
        write_optional_str(encoder, &self.to_did);
    }
}

impl Decodable for TxOut {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        Ok(Self {
            value: decoder.read_u64_le()?,
            script_pubkey: decoder.read_var_bytes()?,
            attachment: Attachment::consensus_decode(decoder)?,
            from_did: read_optional_str(decoder)?,
            to_did: read_optional_str(decoder)?,
        })
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Transaction {
    pub version: u32,
    pub inputs: Vec<TxIn>,
    pub outputs: Vec<TxOut>,
    pub lock_time: u32,
}

impl Transaction {
    pub fn to_bytes(&self) -> Vec<u8> {
        encode(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        decode(bytes)
    }

    pub fn txid(&self) -> Hash256 {
        sha256d(&self.to_bytes())
    }

    pub fn serialized_size(&self) -> usize {
        self.to_bytes().len()
    }

    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].prevout.is_null()
    }

    /// A PoS stake proof: spends real outputs and opens with an empty marker output.
    pub fn is_coinstake(&self) -> bool {
        !self.inputs.is_empty()
            && !self.inputs[0].prevout.is_null()
            && self.outputs.len() >= 2
            && self.outputs[0].is_empty()
    }

    /// Sum of output values; `None` when it overflows the money range.
    pub fn total_output_value(&self) -> Option<Amount> {
        self.outputs
            .iter()
            .try_fold(0, |total: Amount, output| checked_money_add(total, output.value))
    }

    pub fn has_asset_output(&self) -> bool {
        self.outputs
            .iter()
            .any(|output| output.attachment.asset_symbol().is_some())
    }
}

impl Encodable for Transaction {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_u32_le(self.version);
        self.inputs.consensus_encode(encoder);
        self.outputs.consensus_encode(encoder);
        encoder.write_u32_le(self.lock_time);
    }
}

impl Decodable for Transaction {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        Ok(Self {
            version: decoder.read_u32_le()?,
            inputs: Vec::<TxIn>::consensus_decode(decoder)?,
            outputs: Vec::<TxOut>::consensus_decode(decoder)?,
            lock_time: decoder.read_u32_le()?,
        })
    }
}
