use mvsd_primitives::encoding::{DecodeError, Decoder, Encoder};
use mvsd_storage::Column;

const BLOCK_UNDO_VERSION: u8 = 1;

/// Value a side-table key held before the block was applied.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UndoEntry {
    pub column: Column,
    pub key: Vec<u8>,
    pub prev: Option<Vec<u8>>,
}

/// Everything `pop` needs beyond the block itself to restore the tables a push overwrote.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct BlockUndo {
    pub entries: Vec<UndoEntry>,
}

impl BlockUndo {
    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        encoder.write_u8(BLOCK_UNDO_VERSION);
        encoder.write_u32_le(self.entries.len() as u32);
        for entry in &self.entries {
            encoder.write_u8(entry.column.index() as u8);
            encoder.write_var_bytes(&entry.key);
            encoder.write_bool(entry.prev.is_some());
            if let Some(prev) = &entry.prev {
                encoder.write_var_bytes(prev);
            }
        }
        encoder.into_inner()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let version = decoder.read_u8()?;
        if version != BLOCK_UNDO_VERSION {
            return Err(DecodeError::Invalid("unsupported block undo version"));
        }
        let count = decoder.read_u32_le()? as usize;
        let mut entries = Vec::with_capacity(count.min(4096));
        for _ in 0..count {
            let column = *Column::ALL
                .get(decoder.read_u8()? as usize)
                .ok_or(DecodeError::Invalid("unknown column in block undo"))?;
            let key = decoder.read_var_bytes()?;
            let prev = if decoder.read_bool()? {
                Some(decoder.read_var_bytes()?)
            } else {
                None
            };
            entries.push(UndoEntry { column, key, prev });
        }
        if !decoder.is_empty() {
            return Err(DecodeError::TrailingBytes);
        }
        Ok(Self { entries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unknown_version_and_column() {
        let undo = BlockUndo {
            entries: vec![UndoEntry {
                column: Column::Asset,
                key: b"CAR".to_vec(),
                prev: None,
            }],
        };
        let mut bytes = undo.encode();
        assert_eq!(BlockUndo::decode(&bytes), Ok(undo));

        bytes[0] = 9;
        assert!(BlockUndo::decode(&bytes).is_err());

        bytes[0] = BLOCK_UNDO_VERSION;
        bytes[5] = 0xee;
        assert_eq!(
            BlockUndo::decode(&bytes),
            Err(DecodeError::Invalid("unknown column in block undo"))
        );
    }
}
