//! Pipes: independent chunk sources produced by `Table::read`, plus the
//! per-chunk transforms a plan can attach to them.

use std::collections::HashMap;
use std::sync::Arc;

use heron_common::datum::Datum;
use heron_common::error::{HeronError, HeronResult};
use heron_common::types::DataType;

use crate::block::{Block, Column};
use crate::table::{StructureReadLock, Table};
use crate::{cast_column, cast_datum};

/// Sort order of one column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortColumnDescription {
    pub column: String,
    pub descending: bool,
}

/// Physical sort order of a source, outermost column first.
pub type SortDescription = Vec<SortColumnDescription>;

/// Resolves the input order a table can provide for the current query, so
/// the upper plan can skip re-sorting.
pub trait InputOrderResolver: Send + Sync {
    fn input_order(&self, table: &dyn Table) -> Option<SortDescription>;
}

/// A per-chunk rewrite attached to a pipe.
pub trait BlockTransform: Send + Sync {
    fn transform(&self, block: Block) -> HeronResult<Block>;
}

/// PREWHERE: filter chunks by a boolean column before the main pipeline.
#[derive(Clone)]
pub struct PrewhereInfo {
    /// The boolean column driving the filter.
    pub column_name: String,
    /// Drop the filter column from the result once applied.
    pub remove_filtered_column: bool,
    /// Expression run over each chunk before the filter, when the filter
    /// column is computed rather than stored.
    pub alias_transform: Option<Arc<dyn BlockTransform>>,
}

/// Per-query information handed to `Table::read`.
#[derive(Clone, Default)]
pub struct QueryInfo {
    pub prewhere: Option<PrewhereInfo>,
    /// Processing to apply to raw sources when the query is being answered
    /// at a stage beyond `FetchColumns`, so chunks from every branch of a
    /// union are at the same stage.
    pub stage_transform: Option<Arc<dyn BlockTransform>>,
    /// Present when the plan has a sort it would like to push down.
    pub sort_optimizer: Option<Arc<dyn InputOrderResolver>>,
}

/// Generates the chunks of one pipe.
pub trait Source: Send {
    /// Next chunk, or `None` once exhausted.
    fn generate(&mut self) -> HeronResult<Option<Block>>;
}

/// One independent source of chunks, with attached transforms and an
/// optional structure-lock hold that outlives the producing `read` call.
pub struct Pipe {
    header: Block,
    source: Box<dyn Source>,
    transforms: Vec<Arc<dyn BlockTransform>>,
    table_lock: Option<Arc<StructureReadLock>>,
    input_sort: Option<SortDescription>,
}

impl std::fmt::Debug for Pipe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipe")
            .field("header", &self.header)
            .field("transforms", &self.transforms.len())
            .field("table_lock", &self.table_lock.is_some())
            .field("input_sort", &self.input_sort)
            .finish()
    }
}

impl Pipe {
    pub fn new(header: Block, source: Box<dyn Source>) -> Self {
        Self {
            header,
            source,
            transforms: Vec::new(),
            table_lock: None,
            input_sort: None,
        }
    }

    /// Structure of the chunks the underlying source emits (transforms may
    /// reshape them downstream).
    pub fn header(&self) -> &Block {
        &self.header
    }

    pub fn add_transform(&mut self, transform: Arc<dyn BlockTransform>) {
        self.transforms.push(transform);
    }

    /// Keep a shared structure lock alive for as long as this pipe exists.
    pub fn attach_table_lock(&mut self, lock: Arc<StructureReadLock>) {
        self.table_lock = Some(lock);
    }

    pub fn set_input_sort(&mut self, sort: Option<SortDescription>) {
        self.input_sort = sort;
    }

    pub fn input_sort(&self) -> Option<&SortDescription> {
        self.input_sort.as_ref()
    }

    /// True when this pipe pins a collaborator's structure lock open.
    pub fn holds_table_lock(&self) -> bool {
        self.table_lock.is_some()
    }

    /// Pull the next chunk through all attached transforms.
    pub fn next_chunk(&mut self) -> HeronResult<Option<Block>> {
        let Some(mut block) = self.source.generate()? else {
            return Ok(None);
        };
        for transform in &self.transforms {
            block = transform.transform(block)?;
        }
        Ok(Some(block))
    }

    /// Drain the pipe. Chunks with zero rows are dropped.
    pub fn collect_chunks(&mut self) -> HeronResult<Vec<Block>> {
        let mut chunks = Vec::new();
        while let Some(block) = self.next_chunk()? {
            if block.rows() > 0 {
                chunks.push(block);
            }
        }
        Ok(chunks)
    }
}

/// Source over a fixed list of chunks.
pub struct BlocksSource {
    blocks: std::vec::IntoIter<Block>,
}

impl BlocksSource {
    pub fn new(blocks: Vec<Block>) -> Self {
        Self {
            blocks: blocks.into_iter(),
        }
    }
}

impl Source for BlocksSource {
    fn generate(&mut self) -> HeronResult<Option<Block>> {
        Ok(self.blocks.next())
    }
}

/// Filters chunks by a boolean column (NULL counts as false), optionally
/// removing the column afterwards.
pub struct FilterTransform {
    column_name: String,
    remove_column: bool,
}

impl FilterTransform {
    pub fn new(column_name: impl Into<String>, remove_column: bool) -> Self {
        Self {
            column_name: column_name.into(),
            remove_column,
        }
    }
}

impl BlockTransform for FilterTransform {
    fn transform(&self, block: Block) -> HeronResult<Block> {
        let filter_col = block
            .column_by_name(&self.column_name)
            .ok_or_else(|| HeronError::ColumnNotFound(self.column_name.clone()))?;
        let mask: Vec<bool> = filter_col
            .values()
            .iter()
            .map(|v| v.as_bool().unwrap_or(false))
            .collect();
        let filtered = block.filter(&mask)?;
        if !self.remove_column {
            return Ok(filtered);
        }
        let kept: Vec<String> = filtered
            .iter()
            .map(|c| c.name().to_string())
            .filter(|n| n != &self.column_name)
            .collect();
        filtered.project(&kept)
    }
}

/// Reshapes chunks to a target header: reorders by name, casts drifted
/// types, and synthesizes missing columns from default values.
pub struct ConvertingTransform {
    header: Block,
    defaults: HashMap<String, Datum>,
}

impl ConvertingTransform {
    pub fn new(header: Block, defaults: HashMap<String, Datum>) -> Self {
        Self { header, defaults }
    }

    fn default_column(&self, name: &str, data_type: DataType, rows: usize) -> HeronResult<Column> {
        let value = match self.defaults.get(name) {
            Some(v) => cast_datum(v, data_type)?,
            None => Datum::default_for(data_type),
        };
        Column::constant(name.to_string(), data_type, value, rows)
    }
}

impl BlockTransform for ConvertingTransform {
    fn transform(&self, block: Block) -> HeronResult<Block> {
        let rows = block.rows();
        let mut columns = Vec::with_capacity(self.header.num_columns());
        for target in self.header.iter() {
            let column = match block.column_by_name(target.name()) {
                Some(col) if col.data_type() == target.data_type() => col.clone(),
                Some(col) => cast_column(col, target.data_type())?,
                None => self.default_column(target.name(), target.data_type(), rows)?,
            };
            columns.push(column);
        }
        Block::new(columns)
    }
}
