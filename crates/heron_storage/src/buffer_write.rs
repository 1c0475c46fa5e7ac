//! Buffer engine write path: shard selection, insert, flush, destination
//! delivery.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use parking_lot::MutexGuard;

use heron_common::config::EngineContext;
use heron_common::error::{HeronError, HeronResult};
use heron_common::types::epoch_seconds;

use crate::block::{append_block, Block};
use crate::buffer::{BufferTable, Shard, ShardState};
use crate::cast_column;
use crate::table::Table;

/// Spread concurrent writers across shards by their thread identity.
fn thread_start_shard(num_shards: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    std::thread::current().id().hash(&mut hasher);
    (hasher.finish() % num_shards as u64) as usize
}

impl BufferTable {
    pub(crate) fn do_write(&self, block: Block, ctx: &EngineContext) -> HeronResult<()> {
        if block.num_columns() == 0 || block.rows() == 0 {
            return Ok(());
        }
        self.check_insert_block(&block, ctx)?;

        let destination = match &self.destination_id {
            Some(id) => {
                let destination = self.catalog.try_get(id);
                if let Some(destination) = &destination {
                    self.ensure_not_self(destination)?;
                }
                destination
            }
            None => None,
        };

        let rows = block.rows();
        let bytes = block.bytes();

        // A block already past the maximum limits skips the buffer: keeping
        // it would trigger an immediate flush and double the memory spent on
        // the same rows.
        if rows as u64 > self.max_thresholds.rows || bytes as u64 > self.max_thresholds.bytes {
            match destination {
                Some(destination) => {
                    tracing::trace!(
                        table = %self.table_ref(),
                        rows,
                        bytes,
                        "writing oversize block directly to destination"
                    );
                    self.stats.record_bypass_write();
                    self.write_block_to_destination(&block, destination)?;
                }
                None => {
                    if let Some(destination_id) = &self.destination_id {
                        tracing::error!(
                            table = %self.table_ref(),
                            destination = %destination_id,
                            "destination table does not exist, block of data is discarded"
                        );
                    }
                }
            }
            return Ok(());
        }

        // Walk the shards once with non-blocking locks, keeping the lock on
        // the least loaded shard seen so far and dropping the losers.
        let num_shards = self.shards.len();
        let start_shard = thread_start_shard(num_shards);
        let mut least_busy: Option<MutexGuard<'_, ShardState>> = None;
        let mut least_busy_rows = usize::MAX;
        for attempt in 0..num_shards {
            let index = (start_shard + attempt) % num_shards;
            if let Some(guard) = self.shards[index].state.try_lock() {
                let shard_rows = guard.rows();
                if least_busy.is_none() || shard_rows < least_busy_rows {
                    least_busy_rows = shard_rows;
                    least_busy = Some(guard);
                }
            }
        }

        {
            // Every shard was contended: wait on the home shard.
            let mut guard = match least_busy {
                Some(guard) => guard,
                None => self.shards[start_shard].state.lock(),
            };
            self.insert_into_shard(&mut guard, block)?;
        }

        self.reschedule();
        Ok(())
    }

    /// The inserted block must carry exactly the insertable columns of the
    /// current schema, with matching types.
    fn check_insert_block(&self, block: &Block, ctx: &EngineContext) -> HeronResult<()> {
        let columns = self.columns.read();
        let allow_materialized =
            self.allow_materialized || ctx.settings.insert_allow_materialized;
        for col in block.iter() {
            let def = columns
                .get(col.name())
                .ok_or_else(|| HeronError::ColumnNotFound(col.name().to_string()))?;
            if def.data_type != col.data_type() {
                return Err(HeronError::StructureMismatch(format!(
                    "column {} is declared {} but the block carries {}",
                    col.name(),
                    def.data_type,
                    col.data_type()
                )));
            }
            if def.materialized && !allow_materialized {
                return Err(HeronError::StructureMismatch(format!(
                    "cannot insert into materialized column {}",
                    col.name()
                )));
            }
        }
        for def in columns.non_materialized() {
            if !block.has_column(&def.name) {
                return Err(HeronError::StructureMismatch(format!(
                    "missing column {} in inserted block",
                    def.name
                )));
            }
        }
        block.check_row_counts()
    }

    /// Insert under an already-held shard lock. When admitting the block
    /// would cross the flush predicate, the shard is flushed inline first so
    /// it never exceeds the limits by more than this one block.
    fn insert_into_shard(&self, state: &mut ShardState, block: Block) -> HeronResult<()> {
        let now = epoch_seconds();
        // Deterministic column order makes blocks from unrelated writers
        // appendable onto the same accumulator.
        let sorted = block.sort_columns();

        if state.data.is_none() {
            state.data = Some(sorted.clone_empty());
        } else if self.shard_would_exceed(state, now, sorted.rows(), sorted.bytes()) {
            // If the destination rejects the flush the error propagates and
            // this block is not admitted — that bound on shard memory is
            // what keeps a broken destination from filling RAM.
            self.flush_locked(state, false)?;
            if state.data.is_none() {
                state.data = Some(sorted.clone_empty());
            }
        }

        let rows = sorted.rows();
        let bytes = sorted.bytes();
        let data = state.data.as_mut().ok_or_else(|| {
            HeronError::LogicalError("shard accumulator missing during insert".to_string())
        })?;
        append_block(&sorted, data)?;
        self.stats.add_buffered(rows, bytes);
        if state.first_write_at == 0 {
            state.first_write_at = now;
        }
        Ok(())
    }

    pub(crate) fn flush_shard(&self, shard: &Shard, check_thresholds: bool) -> HeronResult<()> {
        let mut state = shard.state.lock();
        self.flush_locked(&mut state, check_thresholds)
    }

    /// Drain every shard. Used by OPTIMIZE, ALTER and shutdown; the first
    /// failing shard aborts the pass and its rows stay buffered.
    pub(crate) fn flush_all(&self, check_thresholds: bool) -> HeronResult<()> {
        for shard in &self.shards {
            self.flush_shard(shard, check_thresholds)?;
        }
        Ok(())
    }

    /// Move the shard's block out, reset the shard, deliver to the
    /// destination. On delivery failure the block is swapped back so the
    /// next attempt retries exactly the same rows — a shard never keeps a
    /// partial block.
    ///
    /// The shard mutex stays held across the destination write on purpose:
    /// releasing it would let concurrent inserts observe phantom emptiness,
    /// and a failed write would then have to merge two generations of rows.
    /// The cost is that a slow destination stalls this one shard only.
    pub(crate) fn flush_locked(
        &self,
        state: &mut ShardState,
        check_thresholds: bool,
    ) -> HeronResult<()> {
        let now = epoch_seconds();
        let rows = state.rows();
        let bytes = state.bytes();
        let age_s = if state.first_write_at > 0 {
            now.saturating_sub(state.first_write_at) as i64
        } else {
            0
        };

        if check_thresholds && !self.thresholds_exceeded(rows as u64, bytes as u64, age_s) {
            return Ok(());
        }
        if rows == 0 {
            return Ok(());
        }

        let Some(block_to_write) = state.data.take() else {
            return Ok(());
        };
        state.first_write_at = 0;
        self.stats.sub_buffered(rows, bytes);
        self.stats.record_flush();
        tracing::trace!(
            table = %self.table_ref(),
            rows,
            bytes,
            age_s,
            background = check_thresholds,
            "flushing shard"
        );

        // No destination: buffered rows are dropped, which is the point of
        // an unconnected buffer (absorb and forget).
        let Some(destination_id) = self.destination_id.clone() else {
            return Ok(());
        };
        let Some(destination) = self.catalog.try_get(&destination_id) else {
            tracing::error!(
                table = %self.table_ref(),
                destination = %destination_id,
                "destination table does not exist, block of data is discarded"
            );
            return Ok(());
        };

        if let Err(err) = self.write_block_to_destination(&block_to_write, destination) {
            self.stats.record_flush_error();
            // Return the rows to their place in the shard.
            self.stats.add_buffered(rows, bytes);
            state.data = Some(block_to_write);
            if state.first_write_at == 0 {
                state.first_write_at = now;
            }
            return Err(err);
        }
        Ok(())
    }

    /// Write the intersection of the block's columns and the destination's
    /// columns, casting where the types drifted. Supports the common cases
    /// of schema mismatch; rows in columns the destination dropped are lost
    /// with a warning.
    pub(crate) fn write_block_to_destination(
        &self,
        block: &Block,
        destination: Arc<dyn Table>,
    ) -> HeronResult<()> {
        if block.rows() == 0 {
            return Ok(());
        }
        let structure = if self.allow_materialized {
            destination.sample_block()
        } else {
            destination.sample_block_non_materialized()
        };

        let mut block_to_write = Block::empty();
        for dst_col in structure.iter() {
            let Some(col) = block.column_by_name(dst_col.name()) else {
                continue;
            };
            let col = if col.data_type() != dst_col.data_type() {
                tracing::warn!(
                    table = %self.table_ref(),
                    destination = %destination.table_ref(),
                    column = dst_col.name(),
                    from = %col.data_type(),
                    to = %dst_col.data_type(),
                    "destination column type differs, block data is converted"
                );
                cast_column(col, dst_col.data_type())?
            } else {
                col.clone()
            };
            block_to_write.try_push(col)?;
        }

        if block_to_write.num_columns() == 0 {
            tracing::error!(
                table = %self.table_ref(),
                destination = %destination.table_ref(),
                "destination table has no common columns with block in buffer, block of data is discarded"
            );
            return Ok(());
        }
        if block_to_write.num_columns() != block.num_columns() {
            tracing::warn!(
                table = %self.table_ref(),
                destination = %destination.table_ref(),
                "not all columns from block in buffer exist in destination table, some columns are discarded"
            );
        }

        destination
            .write(block_to_write, &self.context)
            .map_err(|err| HeronError::destination(destination.table_ref(), err))
    }
}
