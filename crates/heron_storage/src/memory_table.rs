//! Plain in-memory table: appended blocks, no durability, no indexes.
//!
//! Serves as the flush destination for buffering engines and as a simple
//! standalone engine for small reference data.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::RwLock;

use heron_common::config::EngineContext;
use heron_common::datum::Datum;
use heron_common::error::{HeronError, HeronResult};
use heron_common::schema::ColumnsDescription;
use heron_common::types::{QueryStage, TableRef};

use crate::block::{sample_block, sample_block_for, Block, Column};
use crate::pipe::{BlocksSource, FilterTransform, Pipe, QueryInfo};
use crate::table::{StructureLock, StructureReadLock, Table};

pub struct MemoryTable {
    table_ref: TableRef,
    columns: ColumnsDescription,
    structure_lock: StructureLock,
    data: RwLock<Vec<Block>>,
    total_rows: AtomicU64,
    total_bytes: AtomicU64,
}

impl MemoryTable {
    pub fn new(table_ref: TableRef, columns: ColumnsDescription) -> Self {
        Self {
            table_ref,
            columns,
            structure_lock: StructureLock::new(),
            data: RwLock::new(Vec::new()),
            total_rows: AtomicU64::new(0),
            total_bytes: AtomicU64::new(0),
        }
    }

    /// Number of stored blocks (each insert appends one).
    pub fn block_count(&self) -> usize {
        self.data.read().len()
    }

    /// Reorder an inserted block to schema order, filling omitted columns
    /// with their defaults. Unknown columns and type drift are rejected —
    /// callers cast before writing.
    fn conform(&self, block: &Block) -> HeronResult<Block> {
        for col in block.iter() {
            match self.columns.get(col.name()) {
                None => return Err(HeronError::ColumnNotFound(col.name().to_string())),
                Some(def) if def.data_type != col.data_type() => {
                    return Err(HeronError::StructureMismatch(format!(
                        "column {} is {} in table {}, block carries {}",
                        col.name(),
                        def.data_type,
                        self.table_ref,
                        col.data_type()
                    )))
                }
                Some(_) => {}
            }
        }
        let rows = block.rows();
        let mut columns = Vec::with_capacity(self.columns.len());
        for def in self.columns.iter() {
            match block.column_by_name(&def.name) {
                Some(col) => columns.push(col.clone()),
                None => columns.push(Column::constant(
                    def.name.clone(),
                    def.data_type,
                    def.default_datum(),
                    rows,
                )?),
            }
        }
        Block::new(columns)
    }
}

impl Table for MemoryTable {
    fn table_ref(&self) -> TableRef {
        self.table_ref.clone()
    }

    fn columns(&self) -> ColumnsDescription {
        self.columns.clone()
    }

    fn sample_block(&self) -> Block {
        sample_block(&self.columns)
    }

    fn sample_block_non_materialized(&self) -> Block {
        let names: Vec<String> = self
            .columns
            .non_materialized()
            .map(|c| c.name.clone())
            .collect();
        sample_block_for(&self.columns, &names).unwrap_or_else(|_| Block::empty())
    }

    fn read(
        &self,
        column_names: &[String],
        query_info: &QueryInfo,
        _ctx: &EngineContext,
        _stage: QueryStage,
        _max_block_size: usize,
        _num_streams: usize,
    ) -> HeronResult<Vec<Pipe>> {
        let header = sample_block_for(&self.columns, column_names)?;
        let stored = self.data.read();
        let mut chunks = Vec::with_capacity(stored.len());
        for block in stored.iter() {
            chunks.push(block.project(column_names)?);
        }
        drop(stored);
        let mut pipe = Pipe::new(header, Box::new(BlocksSource::new(chunks)));
        if let Some(prewhere) = &query_info.prewhere {
            if let Some(alias) = &prewhere.alias_transform {
                pipe.add_transform(std::sync::Arc::clone(alias));
            }
            pipe.add_transform(std::sync::Arc::new(FilterTransform::new(
                prewhere.column_name.clone(),
                prewhere.remove_filtered_column,
            )));
        }
        Ok(vec![pipe])
    }

    fn write(&self, block: Block, _ctx: &EngineContext) -> HeronResult<()> {
        if block.rows() == 0 {
            return Ok(());
        }
        let stored = self.conform(&block)?;
        self.total_rows.fetch_add(stored.rows() as u64, Ordering::Relaxed);
        self.total_bytes
            .fetch_add(stored.bytes() as u64, Ordering::Relaxed);
        self.data.write().push(stored);
        Ok(())
    }

    fn total_rows(&self) -> Option<u64> {
        Some(self.total_rows.load(Ordering::Relaxed))
    }

    fn total_bytes(&self) -> Option<u64> {
        Some(self.total_bytes.load(Ordering::Relaxed))
    }

    fn lock_structure_shared(&self, timeout: Duration) -> HeronResult<StructureReadLock> {
        self.structure_lock.read_shared(timeout)
    }
}

/// Collect every row of one column across all chunks of a pipe set.
/// Test and tooling helper.
pub fn collect_column(pipes: &mut [Pipe], column: &str) -> HeronResult<Vec<Datum>> {
    let mut out = Vec::new();
    for pipe in pipes {
        for chunk in pipe.collect_chunks()? {
            let col = chunk
                .column_by_name(column)
                .ok_or_else(|| HeronError::ColumnNotFound(column.to_string()))?;
            out.extend(col.values().iter().cloned());
        }
    }
    Ok(out)
}
