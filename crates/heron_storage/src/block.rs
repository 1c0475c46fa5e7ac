//! Columnar blocks: the in-memory unit of data movement.
//!
//! A `Block` is a sequence of equally-long named, typed columns. Column
//! storage is behind an `Arc`, so snapshotting a block is cheap and
//! copy-on-write: a later append through `Arc::make_mut` clones the storage
//! iff someone else still holds the old snapshot. Readers therefore never
//! observe a column mutating underneath them.

use std::sync::Arc;

use heron_common::datum::Datum;
use heron_common::error::{HeronError, HeronResult};
use heron_common::schema::ColumnsDescription;
use heron_common::types::DataType;

/// One named, typed columnar vector.
#[derive(Debug, Clone)]
pub struct Column {
    name: String,
    data_type: DataType,
    values: Arc<Vec<Datum>>,
    /// Estimated payload bytes, maintained incrementally by every mutator.
    bytes: usize,
}

impl Column {
    /// Empty column of the given type.
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            values: Arc::new(Vec::new()),
            bytes: 0,
        }
    }

    /// Build a column from values, checking each against the column type.
    /// NULLs are accepted in any column.
    pub fn from_values(name: String, data_type: DataType, values: Vec<Datum>) -> HeronResult<Self> {
        for value in &values {
            check_value_type(&name, data_type, value)?;
        }
        let bytes = values.iter().map(Datum::estimated_size).sum();
        Ok(Self {
            name,
            data_type,
            values: Arc::new(values),
            bytes,
        })
    }

    /// A column of `len` copies of one constant value.
    pub fn constant(name: String, data_type: DataType, value: Datum, len: usize) -> HeronResult<Self> {
        check_value_type(&name, data_type, &value)?;
        let bytes = value.estimated_size() * len;
        Ok(Self {
            name,
            data_type,
            values: Arc::new(vec![value; len]),
            bytes,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[Datum] {
        &self.values
    }

    /// Estimated payload bytes of this column.
    pub fn estimated_bytes(&self) -> usize {
        self.bytes
    }

    /// Same name and type, zero rows.
    pub fn clone_empty(&self) -> Column {
        Column::new(self.name.clone(), self.data_type)
    }

    /// Prefix (or mid) slice as a new column sharing nothing with `self`.
    pub fn cut(&self, offset: usize, len: usize) -> Column {
        let end = (offset + len).min(self.values.len());
        let offset = offset.min(end);
        let slice: Vec<Datum> = self.values[offset..end].to_vec();
        let bytes = slice.iter().map(Datum::estimated_size).sum();
        Column {
            name: self.name.clone(),
            data_type: self.data_type,
            values: Arc::new(slice),
            bytes,
        }
    }

    /// Truncate in place to `len` rows. A no-op when already shorter.
    pub fn truncate(&mut self, len: usize) {
        if self.values.len() <= len {
            return;
        }
        let values = Arc::make_mut(&mut self.values);
        for dropped in values.drain(len..) {
            self.bytes = self.bytes.saturating_sub(dropped.estimated_size());
        }
    }

    /// Append `len` rows of `src` starting at `offset`, type-checking every
    /// value. On error nothing is guaranteed about the tail of this column;
    /// callers that need atomicity truncate back to the prior length.
    pub fn append_range(&mut self, src: &Column, offset: usize, len: usize) -> HeronResult<()> {
        if self.data_type != src.data_type {
            return Err(HeronError::StructureMismatch(format!(
                "cannot append column {} {} into column {} {}",
                src.name, src.data_type, self.name, self.data_type
            )));
        }
        if offset + len > src.values.len() {
            return Err(HeronError::LogicalError(format!(
                "append range {}..{} out of bounds for column {} with {} rows",
                offset,
                offset + len,
                src.name,
                src.values.len()
            )));
        }
        let data_type = self.data_type;
        let name = self.name.clone();
        let values = Arc::make_mut(&mut self.values);
        for value in &src.values[offset..offset + len] {
            check_value_type(&name, data_type, value)?;
            self.bytes += value.estimated_size();
            values.push(value.clone());
        }
        Ok(())
    }

    /// Keep only the rows whose mask entry is true.
    pub fn filter(&self, mask: &[bool]) -> Column {
        let kept: Vec<Datum> = self
            .values
            .iter()
            .zip(mask.iter())
            .filter(|(_, keep)| **keep)
            .map(|(v, _)| v.clone())
            .collect();
        let bytes = kept.iter().map(Datum::estimated_size).sum();
        Column {
            name: self.name.clone(),
            data_type: self.data_type,
            values: Arc::new(kept),
            bytes,
        }
    }

    /// True when both handles point at the same underlying storage.
    pub fn shares_storage_with(&self, other: &Column) -> bool {
        Arc::ptr_eq(&self.values, &other.values)
    }
}

fn check_value_type(column: &str, data_type: DataType, value: &Datum) -> HeronResult<()> {
    match value.data_type() {
        None => Ok(()),
        Some(t) if t == data_type => Ok(()),
        Some(t) => Err(HeronError::LogicalError(format!(
            "value of type {} in column {} declared {}",
            t, column, data_type
        ))),
    }
}

/// An ordered set of equally-long columns.
#[derive(Debug, Clone, Default)]
pub struct Block {
    columns: Vec<Column>,
}

impl Block {
    /// Build a block, checking unique names and equal column lengths.
    pub fn new(columns: Vec<Column>) -> HeronResult<Block> {
        let block = Block { columns };
        for (i, col) in block.columns.iter().enumerate() {
            if block.columns[..i].iter().any(|c| c.name == col.name) {
                return Err(HeronError::LogicalError(format!(
                    "duplicate column {} in block",
                    col.name
                )));
            }
        }
        block.check_row_counts()?;
        Ok(block)
    }

    pub fn empty() -> Block {
        Block { columns: Vec::new() }
    }

    /// Number of rows (the length of the first column; zero without columns).
    pub fn rows(&self) -> usize {
        self.columns.first().map_or(0, Column::len)
    }

    /// Estimated payload bytes across all columns.
    pub fn bytes(&self) -> usize {
        self.columns.iter().map(Column::estimated_bytes).sum()
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    /// A block with no columns carries no structure and accepts no appends.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter()
    }

    pub fn column_at(&self, index: usize) -> Option<&Column> {
        self.columns.get(index)
    }

    pub fn column_by_name(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_by_name(name).is_some()
    }

    /// Append a column; it must match the block's row count and not collide
    /// with an existing name.
    pub fn try_push(&mut self, column: Column) -> HeronResult<()> {
        if self.has_column(column.name()) {
            return Err(HeronError::LogicalError(format!(
                "duplicate column {} in block",
                column.name()
            )));
        }
        if !self.columns.is_empty() && column.len() != self.rows() {
            return Err(HeronError::LogicalError(format!(
                "column {} has {} rows, block has {}",
                column.name(),
                column.len(),
                self.rows()
            )));
        }
        self.columns.push(column);
        Ok(())
    }

    /// Names, order and types all match.
    pub fn structure_equals(&self, other: &Block) -> bool {
        self.columns.len() == other.columns.len()
            && self
                .columns
                .iter()
                .zip(other.columns.iter())
                .all(|(a, b)| a.name == b.name && a.data_type == b.data_type)
    }

    /// `name type, name type, ...` — for error messages.
    pub fn structure_description(&self) -> String {
        self.columns
            .iter()
            .map(|c| format!("{} {}", c.name, c.data_type))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Same schema, zero rows.
    pub fn clone_empty(&self) -> Block {
        Block {
            columns: self.columns.iter().map(Column::clone_empty).collect(),
        }
    }

    /// Columns reordered lexicographically by name. Blocks from different
    /// sources but with the same schema become appendable after sorting.
    pub fn sort_columns(&self) -> Block {
        let mut columns = self.columns.clone();
        columns.sort_by(|a, b| a.name.cmp(&b.name));
        Block { columns }
    }

    /// The named columns, in the requested order.
    pub fn project(&self, names: &[String]) -> HeronResult<Block> {
        let mut columns = Vec::with_capacity(names.len());
        for name in names {
            let col = self
                .column_by_name(name)
                .ok_or_else(|| HeronError::ColumnNotFound(name.clone()))?;
            columns.push(col.clone());
        }
        Ok(Block { columns })
    }

    /// Keep only rows whose mask entry is true.
    pub fn filter(&self, mask: &[bool]) -> HeronResult<Block> {
        if mask.len() != self.rows() {
            return Err(HeronError::LogicalError(format!(
                "filter mask has {} entries for a block of {} rows",
                mask.len(),
                self.rows()
            )));
        }
        Ok(Block {
            columns: self.columns.iter().map(|c| c.filter(mask)).collect(),
        })
    }

    /// Every column must have the same number of rows.
    pub fn check_row_counts(&self) -> HeronResult<()> {
        let rows = self.rows();
        for col in &self.columns {
            if col.len() != rows {
                return Err(HeronError::LogicalError(format!(
                    "column {} has {} rows while column {} has {}",
                    col.name,
                    col.len(),
                    self.columns[0].name,
                    rows
                )));
            }
        }
        Ok(())
    }

    pub(crate) fn columns_mut(&mut self) -> &mut [Column] {
        &mut self.columns
    }
}

/// Empty block with the structure of a schema.
pub fn sample_block(columns: &ColumnsDescription) -> Block {
    Block {
        columns: columns
            .iter()
            .map(|c| Column::new(c.name.clone(), c.data_type))
            .collect(),
    }
}

/// Empty block with the structure of the named subset of a schema.
pub fn sample_block_for(columns: &ColumnsDescription, names: &[String]) -> HeronResult<Block> {
    let mut out = Vec::with_capacity(names.len());
    for name in names {
        let def = columns
            .get(name)
            .ok_or_else(|| HeronError::ColumnNotFound(name.clone()))?;
        out.push(Column::new(def.name.clone(), def.data_type));
    }
    Ok(Block { columns: out })
}

/// Append all rows of `from` onto `to`, column by column.
///
/// Preconditions: `to` has columns, the structures match, and both blocks
/// have consistent row counts. On any column failure every column of `to` is
/// truncated back to its prior length, so `to` is either fully extended or
/// untouched. If the rollback cannot restore a consistent shape the process
/// is terminated — a torn block must never stay resident.
pub fn append_block(from: &Block, to: &mut Block) -> HeronResult<()> {
    if to.is_empty() {
        return Err(HeronError::LogicalError(
            "cannot append to a block with no columns".to_string(),
        ));
    }
    if !from.structure_equals(to) {
        return Err(HeronError::StructureMismatch(format!(
            "block [{}] does not match [{}]",
            from.structure_description(),
            to.structure_description()
        )));
    }
    from.check_row_counts()?;
    to.check_row_counts()?;

    let rows = from.rows();
    let old_rows = to.rows();

    for index in 0..to.num_columns() {
        let src = &from.columns[index];
        if let Err(err) = to.columns[index].append_range(src, 0, rows) {
            for col in to.columns_mut() {
                if col.len() != old_rows {
                    col.truncate(old_rows);
                }
            }
            if to.columns.iter().any(|c| c.len() != old_rows) {
                std::process::abort();
            }
            return Err(err);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int_column(name: &str, values: &[i64]) -> Column {
        Column::from_values(
            name.to_string(),
            DataType::Int64,
            values.iter().map(|v| Datum::Int64(*v)).collect(),
        )
        .unwrap()
    }

    fn text_column(name: &str, values: &[&str]) -> Column {
        Column::from_values(
            name.to_string(),
            DataType::Text,
            values.iter().map(|v| Datum::Text((*v).to_string())).collect(),
        )
        .unwrap()
    }

    fn two_column_block(ids: &[i64], names: &[&str]) -> Block {
        Block::new(vec![int_column("id", ids), text_column("name", names)]).unwrap()
    }

    #[test]
    fn test_from_values_rejects_wrong_type() {
        let err = Column::from_values(
            "id".into(),
            DataType::Int64,
            vec![Datum::Int64(1), Datum::Text("oops".into())],
        )
        .unwrap_err();
        assert!(matches!(err, HeronError::LogicalError(_)));
    }

    #[test]
    fn test_block_rejects_uneven_columns() {
        let err = Block::new(vec![int_column("a", &[1, 2]), int_column("b", &[1])]).unwrap_err();
        assert!(matches!(err, HeronError::LogicalError(_)));
    }

    #[test]
    fn test_block_rejects_duplicate_names() {
        let err = Block::new(vec![int_column("a", &[1]), int_column("a", &[2])]).unwrap_err();
        assert!(matches!(err, HeronError::LogicalError(_)));
    }

    #[test]
    fn test_rows_and_bytes() {
        let block = two_column_block(&[1, 2, 3], &["a", "b", "c"]);
        assert_eq!(block.rows(), 3);
        assert_eq!(block.num_columns(), 2);
        assert!(block.bytes() > 0);
        assert_eq!(block.bytes(), block.iter().map(|c| c.estimated_bytes()).sum());
    }

    #[test]
    fn test_clone_empty_keeps_structure() {
        let block = two_column_block(&[1], &["x"]);
        let empty = block.clone_empty();
        assert_eq!(empty.rows(), 0);
        assert!(empty.structure_equals(&block));
    }

    #[test]
    fn test_sort_columns_is_deterministic_and_idempotent() {
        let a = Block::new(vec![text_column("b", &["x"]), int_column("a", &[1])]).unwrap();
        let b = Block::new(vec![int_column("a", &[1]), text_column("b", &["x"])]).unwrap();
        let sa = a.sort_columns();
        let sb = b.sort_columns();
        assert!(sa.structure_equals(&sb));
        assert!(sa.sort_columns().structure_equals(&sa));
        assert_eq!(sa.column_at(0).unwrap().name(), "a");
    }

    #[test]
    fn test_append_block_moves_rows() {
        let mut to = two_column_block(&[1, 2], &["a", "b"]).sort_columns();
        let from = two_column_block(&[3], &["c"]).sort_columns();
        append_block(&from, &mut to).unwrap();
        assert_eq!(to.rows(), 3);
        assert_eq!(to.column_by_name("id").unwrap().values()[2], Datum::Int64(3));
        assert_eq!(from.rows(), 1, "source block is untouched");
    }

    #[test]
    fn test_append_to_empty_block_is_logical_error() {
        let mut to = Block::empty();
        let from = two_column_block(&[1], &["a"]);
        let err = append_block(&from, &mut to).unwrap_err();
        assert!(matches!(err, HeronError::LogicalError(_)));
    }

    #[test]
    fn test_append_structure_mismatch() {
        let mut to = Block::new(vec![int_column("id", &[1])]).unwrap();
        let from = Block::new(vec![int_column("other", &[2])]).unwrap();
        let err = append_block(&from, &mut to).unwrap_err();
        assert!(matches!(err, HeronError::StructureMismatch(_)));
    }

    #[test]
    fn test_append_rollback_restores_all_columns() {
        // Second column of `from` carries a corrupt value that fails the
        // per-value type check mid-append; the first column must be rolled
        // back to its prior length.
        let mut to = two_column_block(&[1, 2], &["a", "b"]).sort_columns();
        let good = int_column("id", &[3]);
        let bad = Column {
            name: "name".to_string(),
            data_type: DataType::Text,
            values: Arc::new(vec![Datum::Int64(99)]),
            bytes: 8,
        };
        let from = Block { columns: vec![good, bad] }.sort_columns();

        let before_rows = to.rows();
        let before_bytes = to.bytes();
        let err = append_block(&from, &mut to).unwrap_err();
        assert!(matches!(err, HeronError::LogicalError(_)));
        assert_eq!(to.rows(), before_rows);
        assert_eq!(to.bytes(), before_bytes);
        to.check_row_counts().unwrap();
    }

    #[test]
    fn test_cut_and_truncate() {
        let col = int_column("n", &[1, 2, 3, 4]);
        let prefix = col.cut(0, 2);
        assert_eq!(prefix.len(), 2);
        assert_eq!(prefix.values()[1], Datum::Int64(2));
        assert_eq!(col.len(), 4);

        let mut col = col;
        let bytes_before = col.estimated_bytes();
        col.truncate(1);
        assert_eq!(col.len(), 1);
        assert!(col.estimated_bytes() < bytes_before);
    }

    #[test]
    fn test_copy_on_write_snapshot_does_not_alias_after_append() {
        let mut live = two_column_block(&[1, 2], &["a", "b"]).sort_columns();
        let snapshot = live.clone();
        assert!(snapshot
            .column_by_name("id")
            .unwrap()
            .shares_storage_with(live.column_by_name("id").unwrap()));

        let incoming = two_column_block(&[3], &["c"]).sort_columns();
        append_block(&incoming, &mut live).unwrap();

        // The append forced a copy; the snapshot still sees the old rows.
        assert_eq!(snapshot.rows(), 2);
        assert_eq!(live.rows(), 3);
        assert!(!snapshot
            .column_by_name("id")
            .unwrap()
            .shares_storage_with(live.column_by_name("id").unwrap()));
    }

    #[test]
    fn test_project_and_filter() {
        let block = two_column_block(&[1, 2, 3], &["a", "b", "c"]);
        let projected = block.project(&["name".to_string()]).unwrap();
        assert_eq!(projected.num_columns(), 1);
        assert_eq!(projected.rows(), 3);

        let filtered = block.filter(&[true, false, true]).unwrap();
        assert_eq!(filtered.rows(), 2);
        assert_eq!(filtered.column_by_name("id").unwrap().values()[1], Datum::Int64(3));

        assert!(block.project(&["missing".to_string()]).is_err());
        assert!(block.filter(&[true]).is_err());
    }

    #[test]
    fn test_sample_block_for_subset() {
        use heron_common::schema::ColumnDef;
        let schema = ColumnsDescription::new(vec![
            ColumnDef::new("id", DataType::Int64),
            ColumnDef::new("name", DataType::Text),
        ]);
        let header = sample_block_for(&schema, &["name".to_string()]).unwrap();
        assert_eq!(header.num_columns(), 1);
        assert_eq!(header.column_at(0).unwrap().data_type(), DataType::Text);
        assert!(sample_block_for(&schema, &["zzz".to_string()]).is_err());
    }
}
