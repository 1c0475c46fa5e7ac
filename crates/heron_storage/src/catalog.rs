//! Table registry: resolves a `TableRef` to a live engine.

use std::sync::Arc;

use dashmap::DashMap;

use heron_common::error::{HeronError, HeronResult};
use heron_common::types::TableRef;

use crate::table::Table;

/// All registered tables, keyed by fully qualified name.
///
/// Engines that collaborate (for example a buffering engine and its
/// destination) resolve each other here at every use, so dropping and
/// re-creating a table does not leave stale pointers behind.
#[derive(Default)]
pub struct Catalog {
    tables: DashMap<TableRef, Arc<dyn Table>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, table: Arc<dyn Table>) -> HeronResult<()> {
        let table_ref = table.table_ref();
        if self.tables.contains_key(&table_ref) {
            return Err(HeronError::LogicalError(format!(
                "table {} is already registered",
                table_ref
            )));
        }
        self.tables.insert(table_ref, table);
        Ok(())
    }

    /// Resolve, or error when the table does not exist.
    pub fn get(&self, table_ref: &TableRef) -> HeronResult<Arc<dyn Table>> {
        self.try_get(table_ref)
            .ok_or_else(|| HeronError::TableNotFound(table_ref.clone()))
    }

    /// Resolve, or `None` when the table does not exist.
    pub fn try_get(&self, table_ref: &TableRef) -> Option<Arc<dyn Table>> {
        self.tables.get(table_ref).map(|entry| Arc::clone(entry.value()))
    }

    pub fn deregister(&self, table_ref: &TableRef) -> Option<Arc<dyn Table>> {
        self.tables.remove(table_ref).map(|(_, table)| table)
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}
