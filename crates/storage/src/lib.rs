//! Column-oriented key/value storage behind a backend-neutral trait.

use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;

pub mod memory;

#[cfg(feature = "fjall")]
pub mod fjall;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    Backend(String),
    Corrupt(&'static str),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Backend(message) => write!(f, "{message}"),
            StoreError::Corrupt(what) => write!(f, "corrupt store record: {what}"),
        }
    }
}

impl std::error::Error for StoreError {}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum Column {
    /// Block hash -> height.
    HeaderIndex,
    /// Big-endian height -> block hash.
    HeightIndex,
    /// Block hash -> serialized block.
    BlockData,
    /// Txid -> height and position.
    TxIndex,
    /// Outpoint -> spending txid and input index.
    SpentIndex,
    /// Script hash + outpoint -> empty.
    AddressOutput,
    /// Asset symbol -> issue record.
    Asset,
    /// Cert type + symbol -> cert record.
    Cert,
    /// Identity symbol -> identity record.
    Did,
    /// Address -> identity symbol.
    DidAddress,
    /// Token symbol -> token record.
    Mit,
    /// Block hash -> prior side-table values.
    BlockUndo,
    /// Chain tip and counters.
    Meta,
}

impl Column {
    pub const ALL: [Column; 13] = [
        Column::HeaderIndex,
        Column::HeightIndex,
        Column::BlockData,
        Column::TxIndex,
        Column::SpentIndex,
        Column::AddressOutput,
        Column::Asset,
        Column::Cert,
        Column::Did,
        Column::DidAddress,
        Column::Mit,
        Column::BlockUndo,
        Column::Meta,
    ];

    pub const fn bit(self) -> u32 {
        match self {
            Column::HeaderIndex => 1 << 0,
            Column::HeightIndex => 1 << 1,
            Column::BlockData => 1 << 2,
            Column::TxIndex => 1 << 3,
            Column::SpentIndex => 1 << 4,
            Column::AddressOutput => 1 << 5,
            Column::Asset => 1 << 6,
            Column::Cert => 1 << 7,
            Column::Did => 1 << 8,
            Column::DidAddress => 1 << 9,
            Column::Mit => 1 << 10,
            Column::BlockUndo => 1 << 11,
            Column::Meta => 1 << 12,
        }
    }

    pub const fn index(self) -> usize {
        self.bit().trailing_zeros() as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Column::HeaderIndex => "header_index",
            Column::HeightIndex => "height_index",
            Column::BlockData => "block_data",
            Column::TxIndex => "tx_index",
            Column::SpentIndex => "spent_index",
            Column::AddressOutput => "address_output",
            Column::Asset => "asset",
            Column::Cert => "cert",
            Column::Did => "did",
            Column::DidAddress => "did_address",
            Column::Mit => "mit",
            Column::BlockUndo => "block_undo",
            Column::Meta => "meta",
        }
    }
}

macro_rules! byte_buffer {
    ($name:ident, $inline:literal) => {
        #[derive(Clone, Debug, Eq, PartialEq)]
        pub struct $name(SmallVec<[u8; $inline]>);

        impl $name {
            pub fn as_slice(&self) -> &[u8] {
                self.0.as_slice()
            }

            pub fn into_vec(self) -> Vec<u8> {
                self.0.into_vec()
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                self.as_slice()
            }
        }

        impl From<Vec<u8>> for $name {
            fn from(value: Vec<u8>) -> Self {
                Self(SmallVec::from_vec(value))
            }
        }

        impl From<&[u8]> for $name {
            fn from(value: &[u8]) -> Self {
                Self(SmallVec::from_slice(value))
            }
        }

        impl<const N: usize> From<[u8; N]> for $name {
            fn from(value: [u8; N]) -> Self {
                Self(SmallVec::from_slice(&value))
            }
        }

        impl<const N: usize> From<&[u8; N]> for $name {
            fn from(value: &[u8; N]) -> Self {
                Self(SmallVec::from_slice(value))
            }
        }
    };
}

// Keys top out at script hash + outpoint; most values are small index records.
byte_buffer!(WriteKey, 72);
byte_buffer!(WriteValue, 48);

#[derive(Clone, Debug)]
pub enum WriteOp {
    Put {
        column: Column,
        key: WriteKey,
        value: WriteValue,
    },
    Delete {
        column: Column,
        key: WriteKey,
    },
}

#[derive(Clone, Debug, Default)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reserve(&mut self, additional: usize) {
        self.ops.reserve(additional);
    }

    pub fn put(&mut self, column: Column, key: impl Into<WriteKey>, value: impl Into<WriteValue>) {
        self.ops.push(WriteOp::Put {
            column,
            key: key.into(),
            value: value.into(),
        });
    }

    pub fn delete(&mut self, column: Column, key: impl Into<WriteKey>) {
        self.ops.push(WriteOp::Delete {
            column,
            key: key.into(),
        });
    }

    pub fn iter(&self) -> impl Iterator<Item = &WriteOp> {
        self.ops.iter()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }

    /// Bitmask of [`Column::bit`] for every column the batch writes.
    pub fn touched(&self) -> u32 {
        self.ops.iter().fold(0, |mask, op| match op {
            WriteOp::Put { column, .. } | WriteOp::Delete { column, .. } => mask | column.bit(),
        })
    }
}

pub type ScanResult = Vec<(Vec<u8>, Vec<u8>)>;
pub type PrefixVisitor<'a> = dyn FnMut(&[u8], &[u8]) -> Result<(), StoreError> + 'a;

pub trait KeyValueStore: Send + Sync {
    fn get(&self, column: Column, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;
    fn put(&self, column: Column, key: &[u8], value: &[u8]) -> Result<(), StoreError>;
    fn delete(&self, column: Column, key: &[u8]) -> Result<(), StoreError>;
    fn scan_prefix(&self, column: Column, prefix: &[u8]) -> Result<ScanResult, StoreError>;
    fn for_each_prefix<'a>(
        &self,
        column: Column,
        prefix: &[u8],
        visitor: &mut PrefixVisitor<'a>,
    ) -> Result<(), StoreError>;
    fn write_batch(&self, batch: &WriteBatch) -> Result<(), StoreError>;

    fn contains(&self, column: Column, key: &[u8]) -> Result<bool, StoreError> {
        Ok(self.get(column, key)?.is_some())
    }
}

impl<T: KeyValueStore + ?Sized> KeyValueStore for Arc<T> {
    fn get(&self, column: Column, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.as_ref().get(column, key)
    }

    fn put(&self, column: Column, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.as_ref().put(column, key, value)
    }

    fn delete(&self, column: Column, key: &[u8]) -> Result<(), StoreError> {
        self.as_ref().delete(column, key)
    }

    fn scan_prefix(&self, column: Column, prefix: &[u8]) -> Result<ScanResult, StoreError> {
        self.as_ref().scan_prefix(column, prefix)
    }

    fn for_each_prefix<'a>(
        &self,
        column: Column,
        prefix: &[u8],
        visitor: &mut PrefixVisitor<'a>,
    ) -> Result<(), StoreError> {
        self.as_ref().for_each_prefix(column, prefix, visitor)
    }

    fn write_batch(&self, batch: &WriteBatch) -> Result<(), StoreError> {
        self.as_ref().write_batch(batch)
    }
}
