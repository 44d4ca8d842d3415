//! Columnar block: ordered named columns sharing one row count.
//!
//! ```text
//! BlockInfo fields | varuint columns | varuint rows |
//!   per column: name | type | [custom serialization u8] | prefix | data
//! ```
//! Prefix and data are only present when the block has rows.

use super::MIN_REVISION_WITH_CUSTOM_SERIALIZATION;
use super::column::Column;
use super::types::ColumnType;
use super::wire::{WireRead, WireWrite};
use crate::error::{ChError, ChResult};
use crate::types::Value;
use bytes::{BufMut, BytesMut};

/// Columns per block the decoder is willing to allocate.
const MAX_COLUMNS: u64 = 1 << 20;
/// Rows per block the decoder is willing to allocate.
const MAX_ROWS: u64 = 1 << 32;

/// Block metadata sent ahead of the columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    pub is_overflows: bool,
    pub bucket_num: i32,
}

impl Default for BlockInfo {
    fn default() -> Self {
        Self {
            is_overflows: false,
            bucket_num: -1,
        }
    }
}

impl BlockInfo {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_uvarint(1);
        buf.put_bool(self.is_overflows);
        buf.put_uvarint(2);
        buf.put_i32_le(self.bucket_num);
        buf.put_uvarint(0);
    }

    fn decode(r: &mut dyn WireRead) -> ChResult<Self> {
        let mut info = BlockInfo::default();
        loop {
            match r.read_uvarint()? {
                0 => return Ok(info),
                1 => info.is_overflows = r.read_bool()?,
                2 => info.bucket_num = r.read_i32_le()?,
                field => {
                    return Err(ChError::Protocol(format!(
                        "unknown block info field {}",
                        field
                    )));
                }
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Block {
    pub info: BlockInfo,
    names: Vec<String>,
    columns: Vec<Column>,
}

impl Block {
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty block with the given schema.
    pub fn with_schema<I, S>(schema: I) -> Self
    where
        I: IntoIterator<Item = (S, ColumnType)>,
        S: Into<String>,
    {
        let mut block = Block::new();
        for (name, ty) in schema {
            block.add_column(name, Column::new(ty));
        }
        block
    }

    pub fn add_column(&mut self, name: impl Into<String>, column: Column) {
        self.names.push(name.into());
        self.columns.push(column);
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Row count (length of the first column).
    pub fn rows(&self) -> usize {
        self.columns.first().map_or(0, Column::len)
    }

    pub fn is_empty(&self) -> bool {
        self.rows() == 0
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, index: usize) -> Option<&Column> {
        self.columns.get(index)
    }

    pub fn column_mut(&mut self, index: usize) -> Option<&mut Column> {
        self.columns.get_mut(index)
    }

    /// Name and column at `index`, for in-place appends.
    pub fn column_entry_mut(&mut self, index: usize) -> Option<(&str, &mut Column)> {
        Some((self.names.get(index)?.as_str(), self.columns.get_mut(index)?))
    }

    pub fn column_by_name(&self, name: &str) -> Option<&Column> {
        self.position(name).map(|i| &self.columns[i])
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    pub fn column_types(&self) -> Vec<ColumnType> {
        self.columns.iter().map(|c| c.column_type().clone()).collect()
    }

    /// Value at (`row`, `col`), `None` if either is out of range.
    pub fn value(&self, row: usize, col: usize) -> Option<ChResult<Value>> {
        let column = self.columns.get(col)?;
        (row < column.len()).then(|| column.value(row))
    }

    /// Append one value to one column. Leaves the block inconsistent until
    /// every other column receives its value.
    pub fn append(&mut self, col: usize, value: &Value) -> ChResult<()> {
        let column = self
            .columns
            .get_mut(col)
            .ok_or(ChError::ColumnCountMismatch {
                expected: self.names.len(),
                got: col + 1,
            })?;
        column
            .append(value)
            .map_err(|e| e.with_column(&self.names[col]))
    }

    /// Append one value per column. On failure no column is changed.
    pub fn append_row(&mut self, row: &[Value]) -> ChResult<()> {
        if row.len() != self.columns.len() {
            return Err(ChError::ColumnCountMismatch {
                expected: self.columns.len(),
                got: row.len(),
            });
        }
        let rows = self.rows();
        for (i, value) in row.iter().enumerate() {
            if let Err(e) = self.columns[i].append(value) {
                for column in &mut self.columns[..i] {
                    column.truncate(rows);
                }
                return Err(e.with_column(&self.names[i]));
            }
        }
        Ok(())
    }

    /// Drop all rows, keeping the schema.
    pub fn clear(&mut self) {
        for column in &mut self.columns {
            column.clear();
        }
    }

    /// Keep the first `rows` rows of every column.
    pub fn truncate(&mut self, rows: usize) {
        for column in &mut self.columns {
            column.truncate(rows);
        }
    }

    /// Block with the same schema and no rows.
    pub fn clone_empty(&self) -> Block {
        Block {
            info: self.info,
            names: self.names.clone(),
            columns: self.columns.iter().map(Column::clone_empty).collect(),
        }
    }

    /// Append every row of `other`, whose schema must match by position and
    /// type. On failure no column is changed.
    pub fn append_block(&mut self, other: &Block) -> ChResult<()> {
        if other.columns.len() != self.columns.len() {
            return Err(ChError::ColumnCountMismatch {
                expected: self.columns.len(),
                got: other.columns.len(),
            });
        }
        other.check_consistent()?;
        let rows = self.rows();
        for (i, src) in other.columns.iter().enumerate() {
            if let Err(e) = self.columns[i].extend_from(src) {
                for column in &mut self.columns[..i] {
                    column.truncate(rows);
                }
                return Err(e.with_column(&self.names[i]));
            }
        }
        Ok(())
    }

    /// Every column holds the same number of rows.
    pub(crate) fn check_consistent(&self) -> ChResult<()> {
        let expected = self.rows();
        for (name, column) in self.names.iter().zip(&self.columns) {
            if column.len() != expected {
                return Err(ChError::InconsistentBlock {
                    column: name.clone(),
                    rows: column.len(),
                    expected,
                });
            }
        }
        Ok(())
    }

    /// Serialize for a connection of the given protocol revision.
    pub fn encode(&self, buf: &mut BytesMut, revision: u64) -> ChResult<()> {
        self.check_consistent()?;
        let rows = self.rows();
        self.info.encode(buf);
        buf.put_uvarint(self.columns.len() as u64);
        buf.put_uvarint(rows as u64);
        for (name, column) in self.names.iter().zip(&self.columns) {
            buf.put_str(name);
            buf.put_str(&column.column_type().to_string());
            if revision >= MIN_REVISION_WITH_CUSTOM_SERIALIZATION {
                buf.put_u8(0);
            }
            if rows > 0 {
                column.encode_prefix(buf);
                column.encode_data(buf);
            }
        }
        Ok(())
    }

    pub fn decode(r: &mut dyn WireRead, revision: u64) -> ChResult<Block> {
        let info = BlockInfo::decode(r)?;
        let column_count = r.read_uvarint()?;
        let rows = r.read_uvarint()?;
        if column_count > MAX_COLUMNS || rows > MAX_ROWS {
            return Err(ChError::Protocol(format!(
                "block announces {} columns and {} rows",
                column_count, rows
            )));
        }
        let rows = rows as usize;

        let mut block = Block {
            info,
            ..Block::default()
        };
        for _ in 0..column_count {
            let name = r.read_string()?;
            let type_name = r.read_string()?;
            let mut column = Column::from_type_name(&type_name)?;
            if revision >= MIN_REVISION_WITH_CUSTOM_SERIALIZATION && r.read_bool()? {
                return Err(ChError::Decode(format!(
                    "column '{}' uses a custom serialization",
                    name
                )));
            }
            if rows > 0 {
                column.decode_prefix(r)?;
                column.decode_data(r, rows)?;
            }
            block.add_column(name, column);
        }
        Ok(block)
    }
}
