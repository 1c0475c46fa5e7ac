//! The table engine interface and structure locking.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{RawRwLock, RwLock};

use heron_common::config::EngineContext;
use heron_common::error::{HeronError, HeronResult};
use heron_common::schema::{AlterCommand, ColumnsDescription};
use heron_common::types::{QueryStage, TableRef};

use crate::block::Block;
use crate::pipe::{Pipe, QueryInfo};

/// Shared (reader) hold on a table's structure. Arc-owned so it can be
/// attached to pipes and outlive the `read` call that acquired it.
pub type StructureReadLock = ArcRwLockReadGuard<RawRwLock, ()>;
/// Exclusive hold on a table's structure, for ALTER.
pub type StructureWriteLock = ArcRwLockWriteGuard<RawRwLock, ()>;

/// Guards a table's schema: readers hold it shared for the lifetime of
/// their pipes, ALTER holds it exclusively.
#[derive(Debug, Clone, Default)]
pub struct StructureLock {
    lock: Arc<RwLock<()>>,
}

impl StructureLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read_shared(&self, timeout: Duration) -> HeronResult<StructureReadLock> {
        self.lock
            .try_read_arc_for(timeout)
            .ok_or(HeronError::LockTimeout { timeout })
    }

    pub fn write_exclusive(&self, timeout: Duration) -> HeronResult<StructureWriteLock> {
        self.lock
            .try_write_arc_for(timeout)
            .ok_or(HeronError::LockTimeout { timeout })
    }
}

/// Options for OPTIMIZE TABLE.
#[derive(Debug, Clone, Default)]
pub struct OptimizeOptions {
    /// Restrict the optimize to one partition. Engines without partitions
    /// reject a non-empty value.
    pub partition: Option<String>,
    /// Merge down to a single part.
    pub is_final: bool,
    /// Drop duplicate rows while merging.
    pub deduplicate: bool,
}

/// A table engine.
///
/// Engines are registered in a [`crate::catalog::Catalog`] and collaborate
/// through this interface only; no engine holds an owning pointer to
/// another.
impl std::fmt::Debug for dyn Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Table").field(&self.table_ref()).finish()
    }
}

pub trait Table: Send + Sync {
    fn table_ref(&self) -> TableRef;

    /// Current schema snapshot.
    fn columns(&self) -> ColumnsDescription;

    /// Empty block with the full table structure.
    fn sample_block(&self) -> Block;

    /// Empty block with the structure a plain INSERT must provide.
    fn sample_block_non_materialized(&self) -> Block;

    /// Produce one pipe per independent source of the requested columns.
    fn read(
        &self,
        column_names: &[String],
        query_info: &QueryInfo,
        ctx: &EngineContext,
        stage: QueryStage,
        max_block_size: usize,
        num_streams: usize,
    ) -> HeronResult<Vec<Pipe>>;

    /// Insert one block.
    fn write(&self, block: Block, ctx: &EngineContext) -> HeronResult<()>;

    /// Force maintenance work. Returns true when the engine did something.
    fn optimize(&self, _options: OptimizeOptions, _ctx: &EngineContext) -> HeronResult<bool> {
        Err(HeronError::NotImplemented(format!(
            "OPTIMIZE is not supported by table {}",
            self.table_ref()
        )))
    }

    fn check_alter_is_possible(&self, _commands: &[AlterCommand]) -> HeronResult<()> {
        Err(HeronError::NotImplemented(format!(
            "ALTER is not supported by table {}",
            self.table_ref()
        )))
    }

    fn alter(&self, _commands: &[AlterCommand], _ctx: &EngineContext) -> HeronResult<()> {
        Err(HeronError::NotImplemented(format!(
            "ALTER is not supported by table {}",
            self.table_ref()
        )))
    }

    /// Called once after the table is registered.
    fn startup(&self) {}

    /// Called once before the table is dropped or the process exits.
    fn shutdown(&self) {}

    /// Exact row count if the engine can report one cheaply.
    fn total_rows(&self) -> Option<u64> {
        None
    }

    /// Resident bytes if the engine can report them cheaply.
    fn total_bytes(&self) -> Option<u64> {
        None
    }

    /// The stage this table's `read` already processes queries to.
    fn query_processing_stage(&self, _ctx: &EngineContext) -> HeronResult<QueryStage> {
        Ok(QueryStage::FetchColumns)
    }

    /// Whether a set-membership predicate on `column` could use an index.
    fn may_benefit_from_index_for_in(&self, _column: &str) -> HeronResult<bool> {
        Ok(false)
    }

    /// Take a shared hold on this table's structure.
    fn lock_structure_shared(&self, timeout: Duration) -> HeronResult<StructureReadLock>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structure_lock_shared_is_reentrant_across_holders() {
        let lock = StructureLock::new();
        let a = lock.read_shared(Duration::from_millis(100)).unwrap();
        let b = lock.read_shared(Duration::from_millis(100)).unwrap();
        drop(a);
        drop(b);
    }

    #[test]
    fn test_exclusive_blocks_shared() {
        let lock = StructureLock::new();
        let w = lock.write_exclusive(Duration::from_millis(100)).unwrap();
        let err = lock.read_shared(Duration::from_millis(20)).unwrap_err();
        assert!(matches!(err, HeronError::LockTimeout { .. }));
        drop(w);
        assert!(lock.read_shared(Duration::from_millis(100)).is_ok());
    }

    #[test]
    fn test_shared_blocks_exclusive() {
        let lock = StructureLock::new();
        let r = lock.read_shared(Duration::from_millis(100)).unwrap();
        assert!(lock.write_exclusive(Duration::from_millis(20)).is_err());
        drop(r);
        assert!(lock.write_exclusive(Duration::from_millis(100)).is_ok());
    }
}
