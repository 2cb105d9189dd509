//! Base58check payment addresses and their locking scripts.

use std::fmt;

use mvsd_consensus::Network;

use crate::hash::sha256d;

const OP_DUP: u8 = 0x76;
const OP_HASH160: u8 = 0xa9;
const OP_EQUAL: u8 = 0x87;
const OP_EQUALVERIFY: u8 = 0x88;
const OP_CHECKSIG: u8 = 0xac;
const OP_NUMEQUALVERIFY: u8 = 0x9d;

const ALPHABET: &[u8; 58] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum AddressError {
    InvalidLength,
    InvalidCharacter,
    InvalidChecksum,
    UnknownPrefix,
}

impl fmt::Display for AddressError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            AddressError::InvalidLength => "invalid address length",
            AddressError::InvalidCharacter => "invalid base58 character",
            AddressError::InvalidChecksum => "invalid address checksum",
            AddressError::UnknownPrefix => "address prefix does not match network",
        };
        f.write_str(message)
    }
}

impl std::error::Error for AddressError {}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum AddressKind {
    PubkeyHash,
    ScriptHash,
}

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct PaymentAddress {
    pub kind: AddressKind,
    pub hash: [u8; 20],
    pub network: Network,
}

fn version_byte(kind: AddressKind, network: Network) -> u8 {
    match (kind, network) {
        (AddressKind::PubkeyHash, Network::Mainnet) => 0x32,
        (AddressKind::ScriptHash, Network::Mainnet) => 0x05,
        (AddressKind::PubkeyHash, _) => 0x7f,
        (AddressKind::ScriptHash, _) => 0xc4,
    }
}

impl PaymentAddress {
    pub fn p2pkh(hash: [u8; 20], network: Network) -> Self {
        Self {
            kind: AddressKind::PubkeyHash,
            hash,
            network,
        }
    }

    pub fn parse(encoded: &str, network: Network) -> Result<Self, AddressError> {
        let payload = base58check_decode(encoded)?;
        if payload.len() != 21 {
            return Err(AddressError::InvalidLength);
        }
        let kind = [AddressKind::PubkeyHash, AddressKind::ScriptHash]
            .into_iter()
            .find(|kind| version_byte(*kind, network) == payload[0])
            .ok_or(AddressError::UnknownPrefix)?;
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&payload[1..]);
        Ok(Self {
            kind,
            hash,
            network,
        })
    }

    pub fn script_pubkey(&self) -> Vec<u8> {
        match self.kind {
            AddressKind::PubkeyHash => p2pkh_script(&self.hash),
            AddressKind::ScriptHash => p2sh_script(&self.hash),
        }
    }

    /// Recognizes P2PKH, P2SH and height-locked P2PKH scripts.
    pub fn from_script(script: &[u8], network: Network) -> Option<Self> {
        if let Some(hash) = p2pkh_hash(script) {
            return Some(Self::p2pkh(hash, network));
        }
        if script.len() == 23 && script[0] == OP_HASH160 && script[1] == 0x14 && script[22] == OP_EQUAL
        {
            let mut hash = [0u8; 20];
            hash.copy_from_slice(&script[2..22]);
            return Some(Self {
                kind: AddressKind::ScriptHash,
                hash,
                network,
            });
        }
        let (_, rest) = split_lock_prefix(script)?;
        p2pkh_hash(rest).map(|hash| Self::p2pkh(hash, network))
    }
}

impl fmt::Display for PaymentAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut payload = Vec::with_capacity(21);
        payload.push(version_byte(self.kind, self.network));
        payload.extend_from_slice(&self.hash);
        f.write_str(&base58check_encode(&payload))
    }
}

pub fn script_pubkey_to_address(script: &[u8], network: Network) -> Option<String> {
    PaymentAddress::from_script(script, network).map(|address| address.to_string())
}

pub fn p2pkh_script(hash: &[u8; 20]) -> Vec<u8> {
    let mut script = Vec::with_capacity(25);
    script.extend_from_slice(&[OP_DUP, OP_HASH160, 0x14]);
    script.extend_from_slice(hash);
    script.extend_from_slice(&[OP_EQUALVERIFY, OP_CHECKSIG]);
    script
}

pub fn p2sh_script(hash: &[u8; 20]) -> Vec<u8> {
    let mut script = Vec::with_capacity(23);
    script.extend_from_slice(&[OP_HASH160, 0x14]);
    script.extend_from_slice(hash);
    script.push(OP_EQUAL);
    script
}

fn p2pkh_hash(script: &[u8]) -> Option<[u8; 20]> {
    if script.len() == 25
        && script[..3] == [OP_DUP, OP_HASH160, 0x14]
        && script[23..] == [OP_EQUALVERIFY, OP_CHECKSIG]
    {
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&script[3..23]);
        return Some(hash);
    }
    None
}

/// Splits `<push lock-height> OP_NUMEQUALVERIFY` off the front of a script, returning the
/// raw little-endian height bytes and the remainder.
pub fn split_lock_prefix(script: &[u8]) -> Option<(&[u8], &[u8])> {
    let push_len = *script.first()? as usize;
    if !(1..=8).contains(&push_len) || script.len() < push_len + 2 {
        return None;
    }
    if script[push_len + 1] != OP_NUMEQUALVERIFY {
        return None;
    }
    Some((&script[1..=push_len], &script[push_len + 2..]))
}

fn base58check_decode(input: &str) -> Result<Vec<u8>, AddressError> {
    let bytes = base58_decode(input)?;
    if bytes.len() < 5 {
        return Err(AddressError::InvalidLength);
    }
    let (payload, checksum) = bytes.split_at(bytes.len() - 4);
    if checksum != &sha256d(payload)[..4] {
        return Err(AddressError::InvalidChecksum);
    }
    Ok(payload.to_vec())
}

fn base58check_encode(payload: &[u8]) -> String {
    let mut data = payload.to_vec();
    data.extend_from_slice(&sha256d(payload)[..4]);
    base58_encode(&data)
}

fn base58_decode(input: &str) -> Result<Vec<u8>, AddressError> {
    if input.is_empty() {
        return Err(AddressError::InvalidLength);
    }
    // Big-endian base-256 accumulator.
    let mut bytes: Vec<u8> = Vec::with_capacity(input.len());
    for ch in input.bytes() {
        let digit = ALPHABET
            .iter()
            .position(|candidate| *candidate == ch)
            .ok_or(AddressError::InvalidCharacter)? as u32;
        let mut carry = digit;
        for byte in bytes.iter_mut().rev() {
            carry += u32::from(*byte) * 58;
            *byte = (carry & 0xff) as u8;
            carry >>= 8;
        }
        while carry > 0 {
            bytes.insert(0, (carry & 0xff) as u8);
            carry >>= 8;
        }
    }
    let zeros = input.bytes().take_while(|ch| *ch == b'1').count();
    let mut out = vec![0u8; zeros];
    out.extend(bytes);
    Ok(out)
}

fn base58_encode(data: &[u8]) -> String {
    let zeros = data.iter().take_while(|byte| **byte == 0).count();
    // Big-endian base-58 digits of the non-zero tail.
    let mut digits: Vec<u8> = Vec::with_capacity(data.len() * 138 / 100 + 1);
    for byte in &data[zeros..] {
        let mut carry = u32::from(*byte);
        for digit in digits.iter_mut().rev() {
            carry += u32::from(*digit) << 8;
            *digit = (carry % 58) as u8;
            carry /= 58;
        }
        while carry > 0 {
            digits.insert(0, (carry % 58) as u8);
            carry /= 58;
        }
    }
    let mut out = String::with_capacity(zeros + digits.len());
    out.extend(std::iter::repeat('1').take(zeros));
    out.extend(digits.into_iter().map(|digit| ALPHABET[digit as usize] as char));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_roundtrips_through_text_and_script() {
        let address = PaymentAddress::p2pkh([0x11; 20], Network::Mainnet);
        let text = address.to_string();
        assert!(text.starts_with('M'));
        assert_eq!(PaymentAddress::parse(&text, Network::Mainnet), Ok(address.clone()));
        assert_eq!(
            PaymentAddress::from_script(&address.script_pubkey(), Network::Mainnet),
            Some(address)
        );
    }

    #[test]
    fn wrong_network_prefix_is_rejected() {
        let text = PaymentAddress::p2pkh([0x22; 20], Network::Testnet).to_string();
        assert_eq!(
            PaymentAddress::parse(&text, Network::Mainnet),
            Err(AddressError::UnknownPrefix)
        );
    }

    #[test]
    fn corrupted_checksum_is_rejected() {
        let mut text = PaymentAddress::p2pkh([0x33; 20], Network::Mainnet).to_string();
        let last = text.pop().expect("non-empty");
        text.push(if last == 'a' { 'b' } else { 'a' });
        assert!(PaymentAddress::parse(&text, Network::Mainnet).is_err());
        assert_eq!(
            PaymentAddress::parse("0OIl", Network::Mainnet),
            Err(AddressError::InvalidCharacter)
        );
    }

    #[test]
    fn lock_height_script_maps_to_owner() {
        let hash = [0x44; 20];
        let mut script = vec![0x02, 0x10, 0x27, OP_NUMEQUALVERIFY];
        script.extend_from_slice(&p2pkh_script(&hash));
        let address = PaymentAddress::from_script(&script, Network::Mainnet).expect("address");
        assert_eq!(address.hash, hash);
        let (height, rest) = split_lock_prefix(&script).expect("lock prefix");
        assert_eq!(height, &[0x10, 0x27]);
        assert_eq!(rest.len(), 25);
    }
}
