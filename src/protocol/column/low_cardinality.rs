//! `LowCardinality(T)`: a dictionary of distinct values plus one integer key
//! per row.
//!
//! Wire layout (one chunk per column):
//! ```text
//! prefix: UInt64 version = 1
//! data:   UInt64 flags | UInt64 dictionary size | dictionary | UInt64 key count | keys
//! ```

use super::Column;
use crate::error::{ChError, ChResult};
use crate::protocol::types::ColumnType;
use crate::protocol::wire::{WireRead, take_rows};
use crate::types::Value;
use bytes::{BufMut, BytesMut};
use std::collections::HashMap;

const SHARED_DICTIONARIES_WITH_ADDITIONAL_KEYS: u64 = 1;

const KEY_WIDTH_MASK: u64 = 0xff;
const NEED_GLOBAL_DICTIONARY: u64 = 1 << 8;
const HAS_ADDITIONAL_KEYS: u64 = 1 << 9;
const NEED_UPDATE_DICTIONARY: u64 = 1 << 10;

/// Guard against absurd dictionary sizes from a corrupted stream.
const MAX_DICTIONARY_SIZE: u64 = 1 << 32;

/// Key width code (0 = u8 .. 3 = u64) for a dictionary of `size` entries.
pub(crate) fn key_width_code(size: usize) -> u64 {
    match size {
        0..=0x100 => 0,
        0x101..=0x1_0000 => 1,
        0x1_0001..=0x1_0000_0000 => 2,
        _ => 3,
    }
}

#[derive(Debug, Clone)]
pub struct LowCardinalityColumn {
    dictionary: Box<Column>,
    index: HashMap<Vec<u8>, u64>,
    keys: Vec<u64>,
    nullable: bool,
}

impl LowCardinalityColumn {
    pub fn new(inner: &ColumnType) -> Self {
        let (nullable, dict_type) = match inner {
            ColumnType::Nullable(t) => (true, (**t).clone()),
            other => (false, other.clone()),
        };
        let mut column = Self {
            dictionary: Box::new(Column::new(dict_type)),
            index: HashMap::new(),
            keys: Vec::new(),
            nullable,
        };
        column.reset_dictionary();
        column
    }

    /// Dictionary slots that are not real entries (slot 0 for NULL).
    fn reserved(&self) -> usize {
        usize::from(self.nullable)
    }

    fn reset_dictionary(&mut self) {
        self.dictionary.clear();
        self.index.clear();
        if self.nullable {
            self.dictionary.append_default();
        }
    }

    pub fn dictionary(&self) -> &Column {
        &self.dictionary
    }

    /// Number of real (non-reserved) dictionary entries.
    pub fn dictionary_len(&self) -> usize {
        self.dictionary.len() - self.reserved()
    }

    pub fn keys(&self) -> &[u64] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn append(&mut self, value: &Value) -> ChResult<()> {
        if value.is_null() {
            if !self.nullable {
                return Err(ChError::mismatch(
                    "",
                    format!("LowCardinality({})", self.dictionary.column_type()),
                    "NULL",
                ));
            }
            self.keys.push(0);
            return Ok(());
        }

        let slot = self.dictionary.len();
        self.dictionary.append(value)?;
        let key = self.dictionary.row_key(slot);
        match self.index.get(&key) {
            Some(&existing) => {
                self.dictionary.truncate(slot);
                self.keys.push(existing);
            }
            None => {
                self.index.insert(key, slot as u64);
                self.keys.push(slot as u64);
            }
        }
        Ok(())
    }

    pub fn push_default(&mut self) {
        if self.nullable {
            self.keys.push(0);
        } else {
            let slot = self.dictionary.len();
            self.dictionary.append_default();
            let key = self.dictionary.row_key(slot);
            if let Some(&existing) = self.index.get(&key) {
                self.dictionary.truncate(slot);
                self.keys.push(existing);
            } else {
                self.index.insert(key, slot as u64);
                self.keys.push(slot as u64);
            }
        }
    }

    pub fn value(&self, row: usize) -> ChResult<Value> {
        let key = self.keys[row];
        if self.nullable && key == 0 {
            return Ok(Value::Null);
        }
        self.dictionary.value(key as usize)
    }

    pub fn clear(&mut self) {
        self.keys.clear();
        self.reset_dictionary();
    }

    /// Drop rows past `rows`, shrinking the dictionary to the entries the
    /// remaining keys still use.
    pub fn truncate(&mut self, rows: usize) {
        self.keys.truncate(rows);
        let keep = self
            .keys
            .iter()
            .map(|k| *k as usize + 1)
            .max()
            .unwrap_or(0)
            .max(self.reserved());
        if keep < self.dictionary.len() {
            self.dictionary.truncate(keep);
            self.index.retain(|_, slot| (*slot as usize) < keep);
        }
    }

    pub fn extend(&mut self, other: &LowCardinalityColumn) -> ChResult<()> {
        for row in 0..other.len() {
            self.append(&other.value(row)?)?;
        }
        Ok(())
    }

    pub fn key(&self, row: usize) -> Vec<u8> {
        let key = self.keys[row];
        if self.nullable && key == 0 {
            return vec![1];
        }
        let mut out = vec![0];
        out.extend(self.dictionary.row_key(key as usize));
        out
    }

    pub fn encode_prefix(&self, buf: &mut BytesMut) {
        buf.put_u64_le(SHARED_DICTIONARIES_WITH_ADDITIONAL_KEYS);
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        // Nothing is written for an empty column (e.g. inside empty arrays).
        if self.keys.is_empty() {
            return;
        }
        let code = key_width_code(self.dictionary.len());
        buf.put_u64_le(code | HAS_ADDITIONAL_KEYS | NEED_UPDATE_DICTIONARY);
        buf.put_u64_le(self.dictionary.len() as u64);
        self.dictionary.encode_data(buf);
        buf.put_u64_le(self.keys.len() as u64);
        for k in &self.keys {
            match code {
                0 => buf.put_u8(*k as u8),
                1 => buf.put_u16_le(*k as u16),
                2 => buf.put_u32_le(*k as u32),
                _ => buf.put_u64_le(*k),
            }
        }
    }

    pub fn decode_prefix(&mut self, r: &mut dyn WireRead) -> ChResult<()> {
        let version = r.read_u64_le()?;
        if version != SHARED_DICTIONARIES_WITH_ADDITIONAL_KEYS {
            return Err(ChError::Decode(format!(
                "unsupported LowCardinality serialization version {}",
                version
            )));
        }
        Ok(())
    }

    pub fn decode(&mut self, r: &mut dyn WireRead, rows: usize) -> ChResult<()> {
        let mut decoded = 0;
        while decoded < rows {
            let flags = r.read_u64_le()?;
            if flags & NEED_GLOBAL_DICTIONARY != 0 {
                return Err(ChError::Decode(
                    "LowCardinality global dictionaries are not supported".to_string(),
                ));
            }
            if flags & HAS_ADDITIONAL_KEYS == 0 {
                return Err(ChError::Decode(
                    "LowCardinality chunk without additional keys".to_string(),
                ));
            }
            let code = flags & KEY_WIDTH_MASK;
            if code > 3 {
                return Err(ChError::Decode(format!("invalid key width code {}", code)));
            }

            let dict_size = r.read_u64_le()?;
            if dict_size > MAX_DICTIONARY_SIZE {
                return Err(ChError::Decode(format!(
                    "dictionary size {} is too large",
                    dict_size
                )));
            }
            let mut chunk_dict = self.dictionary.clone_empty();
            chunk_dict.decode_data(r, dict_size as usize)?;

            let count = r.read_u64_le()? as usize;
            if count == 0 || count > rows - decoded {
                return Err(ChError::Decode(format!(
                    "LowCardinality chunk announces {} keys, {} rows left",
                    count,
                    rows - decoded
                )));
            }
            let width = 1usize << code;
            let raw = take_rows(r, count, width)?;
            let mut keys = Vec::with_capacity(count);
            for chunk in raw.chunks_exact(width) {
                let mut bytes = [0u8; 8];
                bytes[..width].copy_from_slice(chunk);
                let key = u64::from_le_bytes(bytes);
                if key >= dict_size {
                    return Err(ChError::Decode(format!(
                        "key {} outside dictionary of {} entries",
                        key, dict_size
                    )));
                }
                keys.push(key);
            }

            if self.keys.is_empty() && decoded == 0 {
                // First chunk into an empty column: adopt its dictionary as is.
                self.dictionary = Box::new(chunk_dict);
                self.keys.extend(keys);
                self.rebuild_index();
            } else {
                for key in keys {
                    if self.nullable && key == 0 {
                        self.keys.push(0);
                    } else {
                        let value = chunk_dict.value(key as usize)?;
                        self.append(&value)?;
                    }
                }
            }
            decoded += count;
        }
        Ok(())
    }

    fn rebuild_index(&mut self) {
        self.index.clear();
        for slot in self.reserved()..self.dictionary.len() {
            let key = self.dictionary.row_key(slot);
            self.index.entry(key).or_insert(slot as u64);
        }
    }
}
