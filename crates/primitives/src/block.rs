//! Block header and block types.

use mvsd_consensus::constants::BLOCK_VERSION_POW;
use mvsd_consensus::{ConsensusMode, Hash256};

use crate::encoding::{decode, encode, Decodable, DecodeError, Decoder, Encodable, Encoder};
use crate::hash::sha256d;
use crate::transaction::Transaction;

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct BlockHeader {
    /// Doubles as the consensus-mode tag.
    pub version: u32,
    pub prev_hash: Hash256,
    pub merkle_root: Hash256,
    pub timestamp: u32,
    /// Compact difficulty target (PoW) or stake target (PoS/DPoS).
    pub bits: u32,
    pub height: u64,
    pub nonce: u64,
    pub mix_hash: Hash256,
    /// Signer key of stake-based blocks; empty for PoW.
    pub public_key: Vec<u8>,
    /// DER signature over [`BlockHeader::hash`]; never part of the hash itself.
    pub signature: Vec<u8>,
}

impl BlockHeader {
    pub fn mode(&self) -> Option<ConsensusMode> {
        ConsensusMode::from_block_version(self.version)
    }

    fn is_signed_mode(&self) -> bool {
        self.version != BLOCK_VERSION_POW
    }

    pub fn hash(&self) -> Hash256 {
        let mut encoder = Encoder::with_capacity(160);
        self.encode_fields(&mut encoder, false);
        sha256d(&encoder.into_inner())
    }

    fn encode_fields(&self, encoder: &mut Encoder, include_signature: bool) {
        encoder.write_u32_le(self.version);
        encoder.write_hash(&self.prev_hash);
        encoder.write_hash(&self.merkle_root);
        encoder.write_u32_le(self.timestamp);
        encoder.write_u32_le(self.bits);
        encoder.write_u64_le(self.height);
        encoder.write_u64_le(self.nonce);
        encoder.write_hash(&self.mix_hash);
        if self.is_signed_mode() {
            encoder.write_var_bytes(&self.public_key);
            if include_signature {
                encoder.write_var_bytes(&self.signature);
            }
        }
    }
}

impl Encodable for BlockHeader {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        self.encode_fields(encoder, true);
    }
}

impl Decodable for BlockHeader {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let mut header = BlockHeader {
            version: decoder.read_u32_le()?,
            prev_hash: decoder.read_hash()?,
            merkle_root: decoder.read_hash()?,
            timestamp: decoder.read_u32_le()?,
            bits: decoder.read_u32_le()?,
            height: decoder.read_u64_le()?,
            nonce: decoder.read_u64_le()?,
            mix_hash: decoder.read_hash()?,
            public_key: Vec::new(),
            signature: Vec::new(),
        };
        if header.is_signed_mode() {
            header.public_key = decoder.read_var_bytes()?;
            header.signature = decoder.read_var_bytes()?;
        }
        Ok(header)
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn hash(&self) -> Hash256 {
        self.header.hash()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        encode(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        decode(bytes)
    }

    pub fn serialized_size(&self) -> usize {
        self.to_bytes().len()
    }

    pub fn txids(&self) -> Vec<Hash256> {
        self.transactions.iter().map(Transaction::txid).collect()
    }

    /// Merkle root over the current transaction list and whether the tree is malleated.
    pub fn compute_merkle_root(&self) -> (Hash256, bool) {
        merkle_root(&self.txids())
    }
}

impl Encodable for Block {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        self.header.consensus_encode(encoder);
        self.transactions.consensus_encode(encoder);
    }
}

impl Decodable for Block {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        Ok(Self {
            header: BlockHeader::consensus_decode(decoder)?,
            transactions: Vec::<Transaction>::consensus_decode(decoder)?,
        })
    }
}

/// Bitcoin-style merkle root. The flag reports duplicated sibling pairs, which let two
/// different transaction lists share a root.
pub fn merkle_root(txids: &[Hash256]) -> (Hash256, bool) {
    if txids.is_empty() {
        return ([0u8; 32], false);
    }
    let mut level = txids.to_vec();
    let mut mutated = false;
    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        for pair in level.chunks(2) {
            let left = &pair[0];
            let right = pair.get(1).unwrap_or(left);
            if pair.len() == 2 && left == right {
                mutated = true;
            }
            let mut data = [0u8; 64];
            data[..32].copy_from_slice(left);
            data[32..].copy_from_slice(right);
            next.push(sha256d(&data));
        }
        level = next;
    }
    (level[0], mutated)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_leaf_is_root() {
        let leaf = [7u8; 32];
        assert_eq!(merkle_root(&[leaf]), (leaf, false));
    }

    #[test]
    fn odd_level_duplicates_last_without_flag() {
        let a = [1u8; 32];
        let b = [2u8; 32];
        let c = [3u8; 32];
        let (root, mutated) = merkle_root(&[a, b, c]);
        assert!(!mutated);
        let (root_dup, mutated_dup) = merkle_root(&[a, b, c, c]);
        assert_eq!(root, root_dup);
        assert!(mutated_dup);
    }

    #[test]
    fn signature_is_outside_header_hash() {
        let mut header = BlockHeader {
            version: mvsd_consensus::constants::BLOCK_VERSION_POS,
            height: 5,
            public_key: vec![2; 33],
            ..BlockHeader::default()
        };
        let unsigned = header.hash();
        header.signature = vec![0x30, 0x01];
        assert_eq!(header.hash(), unsigned);
        header.public_key = vec![3; 33];
        assert_ne!(header.hash(), unsigned);
    }
}
