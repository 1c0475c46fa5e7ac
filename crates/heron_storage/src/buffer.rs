//! Buffer table engine: a sharded in-memory accumulator in front of a
//! destination table.
//!
//! Writers append column blocks into one of `N` independent shards; a
//! background task and the write path flush shards to the destination when
//! the time/rows/bytes thresholds are crossed. Readers see the union of
//! buffered rows and rows already delivered to the destination.
//!
//! Data in shards is not durable: a crash loses whatever has not been
//! flushed yet. That is the price of absorbing many small inserts cheaply.
//!
//! ## Flush predicate
//!
//! A shard flushes when **all** minimum thresholds are passed, or when
//! **any** maximum threshold is passed (strict comparisons):
//!
//! ```text
//! (age > min.time AND rows > min.rows AND bytes > min.bytes)
//!   OR age > max.time OR rows > max.rows OR bytes > max.bytes
//! ```
//!
//! ## Known race
//!
//! OPTIMIZE drains every shard, but a concurrently running background flush
//! that already swapped a block out may still be writing it when OPTIMIZE
//! returns. A SELECT issued immediately afterwards can miss rows that a
//! later SELECT will see. Serializing all flushes behind a global lock
//! would close the window but stall every writer, so the race stays.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use heron_common::config::EngineContext;
use heron_common::error::{HeronError, HeronResult};
use heron_common::schema::{AlterCommand, ColumnsDescription, ConstraintsDescription};
use heron_common::shutdown::TaskSignal;
use heron_common::types::{epoch_seconds, QueryStage, TableRef};

use crate::block::{sample_block, sample_block_for, Block};
use crate::catalog::Catalog;
use crate::pipe::{Pipe, QueryInfo};
use crate::stats::{BufferStats, ThresholdBranch};
use crate::table::{OptimizeOptions, StructureLock, StructureReadLock, Table};

/// One set of flush limits. Immutable after construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    /// Seconds since the shard's first unflushed write.
    pub time_s: i64,
    pub rows: u64,
    pub bytes: u64,
}

impl Thresholds {
    pub fn new(time_s: i64, rows: u64, bytes: u64) -> Self {
        Self { time_s, rows, bytes }
    }
}

/// Mutable state of one shard. Protected by the shard mutex; both fields
/// change together and `data.rows() == 0 ⇔ first_write_at == 0` holds at
/// every release of the lock.
pub(crate) struct ShardState {
    /// Accumulated rows. `None` until the first write after a flush.
    pub(crate) data: Option<Block>,
    /// Wall-clock second the accumulator became non-empty; 0 when empty.
    pub(crate) first_write_at: u64,
}

impl ShardState {
    pub(crate) fn rows(&self) -> usize {
        self.data.as_ref().map_or(0, Block::rows)
    }

    pub(crate) fn bytes(&self) -> usize {
        self.data.as_ref().map_or(0, Block::bytes)
    }
}

pub(crate) struct Shard {
    pub(crate) state: Mutex<ShardState>,
}

impl Shard {
    fn new() -> Self {
        Self {
            state: Mutex::new(ShardState {
                data: None,
                first_write_at: 0,
            }),
        }
    }
}

/// Deadline value meaning "nothing buffered, nothing to schedule".
const FLUSH_IDLE: u64 = u64::MAX;
/// How long the background task dozes while idle; inserts wake it earlier.
const IDLE_POLL: Duration = Duration::from_secs(60);

/// The buffering table engine. See the module docs for semantics.
pub struct BufferTable {
    table_ref: TableRef,
    pub(crate) catalog: Arc<Catalog>,
    /// Creation-time context, used for internal flushes and drains.
    pub(crate) context: EngineContext,
    pub(crate) columns: RwLock<ColumnsDescription>,
    constraints: RwLock<ConstraintsDescription>,
    structure_lock: StructureLock,
    pub(crate) shards: Vec<Shard>,
    pub(crate) min_thresholds: Thresholds,
    pub(crate) max_thresholds: Thresholds,
    pub(crate) destination_id: Option<TableRef>,
    pub(crate) allow_materialized: bool,
    pub(crate) stats: BufferStats,
    flush_signal: TaskSignal,
    flush_thread: Mutex<Option<JoinHandle<()>>>,
    /// Epoch second of the next background flush; `FLUSH_IDLE` when empty.
    next_flush_at: AtomicU64,
    pub(crate) self_ref: Weak<BufferTable>,
}

impl std::fmt::Debug for BufferTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferTable")
            .field("table_ref", &self.table_ref)
            .field("destination_id", &self.destination_id)
            .finish()
    }
}

impl BufferTable {
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        table_ref: TableRef,
        columns: ColumnsDescription,
        constraints: ConstraintsDescription,
        catalog: Arc<Catalog>,
        context: EngineContext,
        num_shards: usize,
        min_thresholds: Thresholds,
        max_thresholds: Thresholds,
        destination_id: Option<TableRef>,
        allow_materialized: bool,
    ) -> HeronResult<Arc<BufferTable>> {
        if num_shards == 0 {
            return Err(HeronError::BadArgument(
                "num_shards must be greater than zero".to_string(),
            ));
        }
        let stats = BufferStats::new(table_ref.to_string());
        Ok(Arc::new_cyclic(|weak| BufferTable {
            table_ref,
            catalog,
            context,
            columns: RwLock::new(columns),
            constraints: RwLock::new(constraints),
            structure_lock: StructureLock::new(),
            shards: (0..num_shards).map(|_| Shard::new()).collect(),
            min_thresholds,
            max_thresholds,
            destination_id,
            allow_materialized,
            stats,
            flush_signal: TaskSignal::new(),
            flush_thread: Mutex::new(None),
            next_flush_at: AtomicU64::new(FLUSH_IDLE),
            self_ref: weak.clone(),
        }))
    }

    pub fn num_shards(&self) -> usize {
        self.shards.len()
    }

    pub fn constraints(&self) -> ConstraintsDescription {
        self.constraints.read().clone()
    }

    pub fn stats(&self) -> &BufferStats {
        &self.stats
    }

    pub fn destination_ref(&self) -> Option<&TableRef> {
        self.destination_id.as_ref()
    }

    /// Row count of each shard, for admin surfaces.
    pub fn rows_per_shard(&self) -> Vec<usize> {
        self.shards.iter().map(|s| s.state.lock().rows()).collect()
    }

    /// Resolve the destination, rejecting self-reference. `Ok(None)` when
    /// the engine has no destination configured.
    pub(crate) fn destination(&self) -> HeronResult<Option<Arc<dyn Table>>> {
        let Some(id) = &self.destination_id else {
            return Ok(None);
        };
        let destination = self.catalog.get(id)?;
        self.ensure_not_self(&destination)?;
        Ok(Some(destination))
    }

    /// Every destination-using path must reject a destination that resolves
    /// back to this engine before any I/O happens.
    pub(crate) fn ensure_not_self(&self, destination: &Arc<dyn Table>) -> HeronResult<()> {
        let same_object = self.self_ref.upgrade().is_some_and(|me| {
            Arc::as_ptr(&me) as *const () == Arc::as_ptr(destination) as *const ()
        });
        if same_object || destination.table_ref() == self.table_ref {
            return Err(HeronError::InfiniteLoop(self.table_ref.clone()));
        }
        Ok(())
    }

    /// The flush predicate. Each branch has its own counter so operators can
    /// see *why* buffers are flushing.
    pub(crate) fn thresholds_exceeded(&self, rows: u64, bytes: u64, age_s: i64) -> bool {
        if age_s > self.min_thresholds.time_s
            && rows > self.min_thresholds.rows
            && bytes > self.min_thresholds.bytes
        {
            self.stats.record_threshold(ThresholdBranch::AllMin);
            return true;
        }
        if age_s > self.max_thresholds.time_s {
            self.stats.record_threshold(ThresholdBranch::TimeMax);
            return true;
        }
        if rows > self.max_thresholds.rows {
            self.stats.record_threshold(ThresholdBranch::RowsMax);
            return true;
        }
        if bytes > self.max_thresholds.bytes {
            self.stats.record_threshold(ThresholdBranch::BytesMax);
            return true;
        }
        false
    }

    /// Would the shard cross the flush predicate after admitting
    /// `extra_rows`/`extra_bytes`?
    pub(crate) fn shard_would_exceed(
        &self,
        state: &ShardState,
        now: u64,
        extra_rows: usize,
        extra_bytes: usize,
    ) -> bool {
        let age_s = if state.first_write_at > 0 {
            now.saturating_sub(state.first_write_at) as i64
        } else {
            0
        };
        self.thresholds_exceeded(
            (state.rows() + extra_rows) as u64,
            (state.bytes() + extra_bytes) as u64,
            age_s,
        )
    }

    // ── Background flush task ────────────────────────────────────────

    fn flush_loop(&self) {
        tracing::debug!(table = %self.table_ref, "background flush task started");
        while !self.flush_signal.is_shutdown() {
            let deadline = self.next_flush_at.load(Ordering::SeqCst);
            let now = epoch_seconds();
            if deadline != FLUSH_IDLE && now >= deadline {
                self.background_flush();
                self.reschedule();
                continue;
            }
            let wait = if deadline == FLUSH_IDLE {
                IDLE_POLL
            } else {
                Duration::from_secs(deadline - now)
            };
            self.flush_signal.wait_timeout(wait);
        }
        tracing::debug!(table = %self.table_ref, "background flush task stopped");
    }

    /// Flush every shard that crosses the thresholds. A failing shard is
    /// logged and skipped; its rows were rolled back and the next tick
    /// retries them.
    fn background_flush(&self) {
        for (index, shard) in self.shards.iter().enumerate() {
            if let Err(err) = self.flush_shard(shard, true) {
                tracing::error!(
                    table = %self.table_ref,
                    shard = index,
                    error = %err,
                    "background flush failed, rows kept in shard for retry"
                );
            }
        }
    }

    /// Recompute the background deadline from the oldest unflushed write.
    ///
    /// Called after every insert and after every background pass, so a
    /// freshly opened shard flushes within a bounded time even if no
    /// further writes arrive.
    pub(crate) fn reschedule(&self) {
        let mut oldest_first_write = u64::MAX;
        let mut total_rows: u64 = 0;
        for shard in &self.shards {
            let state = shard.state.lock();
            if state.first_write_at != 0 {
                oldest_first_write = oldest_first_write.min(state.first_write_at);
            }
            total_rows += state.rows() as u64;
        }

        // Empty buffer: the next insert reschedules.
        if total_rows == 0 {
            self.next_flush_at.store(FLUSH_IDLE, Ordering::SeqCst);
            return;
        }

        let now = epoch_seconds();
        let age_s = now.saturating_sub(oldest_first_write) as i64;
        let until_min = self.min_thresholds.time_s - age_s;
        let until_max = self.max_thresholds.time_s - age_s;
        let delay = until_min.min(until_max).max(1) as u64;
        self.next_flush_at.store(now + delay, Ordering::SeqCst);
        self.flush_signal.notify();
    }

    #[cfg(test)]
    pub(crate) fn next_flush_deadline(&self) -> Option<u64> {
        match self.next_flush_at.load(Ordering::SeqCst) {
            FLUSH_IDLE => None,
            at => Some(at),
        }
    }
}

impl Table for BufferTable {
    fn table_ref(&self) -> TableRef {
        self.table_ref.clone()
    }

    fn columns(&self) -> ColumnsDescription {
        self.columns.read().clone()
    }

    fn sample_block(&self) -> Block {
        sample_block(&self.columns.read())
    }

    fn sample_block_non_materialized(&self) -> Block {
        let columns = self.columns.read();
        let names: Vec<String> = columns.non_materialized().map(|c| c.name.clone()).collect();
        sample_block_for(&columns, &names).unwrap_or_else(|_| Block::empty())
    }

    fn read(
        &self,
        column_names: &[String],
        query_info: &QueryInfo,
        ctx: &EngineContext,
        stage: QueryStage,
        max_block_size: usize,
        num_streams: usize,
    ) -> HeronResult<Vec<Pipe>> {
        self.do_read(column_names, query_info, ctx, stage, max_block_size, num_streams)
    }

    fn write(&self, block: Block, ctx: &EngineContext) -> HeronResult<()> {
        self.do_write(block, ctx)
    }

    fn optimize(&self, options: OptimizeOptions, _ctx: &EngineContext) -> HeronResult<bool> {
        if options.partition.is_some() {
            return Err(HeronError::NotImplemented(
                "partition cannot be specified when optimizing a Buffer table".to_string(),
            ));
        }
        if options.is_final {
            return Err(HeronError::NotImplemented(
                "FINAL cannot be specified when optimizing a Buffer table".to_string(),
            ));
        }
        if options.deduplicate {
            return Err(HeronError::NotImplemented(
                "DEDUPLICATE cannot be specified when optimizing a Buffer table".to_string(),
            ));
        }
        self.flush_all(false)?;
        Ok(true)
    }

    fn check_alter_is_possible(&self, commands: &[AlterCommand]) -> HeronResult<()> {
        for command in commands {
            match command {
                AlterCommand::AddColumn { .. }
                | AlterCommand::ModifyColumn { .. }
                | AlterCommand::DropColumn { .. }
                | AlterCommand::CommentColumn { .. } => {}
                other => {
                    return Err(HeronError::NotImplemented(format!(
                        "alter of type '{}' is not supported by storage Buffer",
                        other.kind_name()
                    )))
                }
            }
        }
        Ok(())
    }

    fn alter(&self, commands: &[AlterCommand], ctx: &EngineContext) -> HeronResult<()> {
        let timeout = Duration::from_millis(ctx.settings.lock_acquire_timeout_ms);
        let _structure_guard = self.structure_lock.write_exclusive(timeout)?;
        self.check_alter_is_possible(commands)?;

        // Drain first so no shard keeps a block of the old structure.
        self.flush_all(false)?;

        let mut columns = self.columns.write();
        for command in commands {
            command.apply(&mut columns)?;
        }
        Ok(())
    }

    fn startup(&self) {
        if self.context.settings.readonly {
            tracing::warn!(
                table = %self.table_ref,
                "storage is running with readonly settings and will not be able to insert data"
            );
        }
        let Some(me) = self.self_ref.upgrade() else {
            return;
        };
        let mut thread = self.flush_thread.lock();
        if thread.is_some() {
            return;
        }
        // First pass runs right away; it is a no-op while shards are empty.
        self.next_flush_at.store(epoch_seconds(), Ordering::SeqCst);
        let table_name = self.table_ref.to_string();
        let handle = std::thread::Builder::new()
            .name(format!("buffer-flush-{}", self.table_ref.table))
            .spawn(move || me.flush_loop())
            .unwrap_or_else(|err| {
                tracing::error!(table = %table_name, error = %err, "failed to spawn buffer flush task");
                panic!("buffer flush thread spawn failed");
            });
        *thread = Some(handle);
    }

    fn shutdown(&self) {
        self.flush_signal.shutdown();
        if let Some(handle) = self.flush_thread.lock().take() {
            if handle.join().is_err() {
                tracing::error!(table = %self.table_ref, "buffer flush task panicked");
            }
        }
        // Final drain. Errors are logged, not rethrown: shutdown must finish.
        if let Err(err) = self.optimize(OptimizeOptions::default(), &self.context) {
            tracing::error!(table = %self.table_ref, error = %err, "final drain on shutdown failed");
        }
    }

    fn total_rows(&self) -> Option<u64> {
        let destination_rows = self
            .destination_id
            .as_ref()
            .and_then(|id| self.catalog.try_get(id))
            .and_then(|t| t.total_rows())?;
        let mut rows: u64 = 0;
        for shard in &self.shards {
            rows += shard.state.lock().rows() as u64;
        }
        Some(rows + destination_rows)
    }

    /// Bytes resident in shards. Destination bytes are excluded: they are
    /// that table's to report.
    fn total_bytes(&self) -> Option<u64> {
        let mut bytes: u64 = 0;
        for shard in &self.shards {
            bytes += shard.state.lock().bytes() as u64;
        }
        Some(bytes)
    }

    fn query_processing_stage(&self, ctx: &EngineContext) -> HeronResult<QueryStage> {
        match self.destination()? {
            Some(destination) => destination.query_processing_stage(ctx),
            None => Ok(QueryStage::FetchColumns),
        }
    }

    fn may_benefit_from_index_for_in(&self, column: &str) -> HeronResult<bool> {
        match self.destination()? {
            Some(destination) => destination.may_benefit_from_index_for_in(column),
            None => Ok(false),
        }
    }

    fn lock_structure_shared(&self, timeout: Duration) -> HeronResult<StructureReadLock> {
        self.structure_lock.read_shared(timeout)
    }
}

impl Drop for BufferTable {
    fn drop(&mut self) {
        // Normally shutdown() ran already; this only stops a task whose
        // owner forgot, without draining (no Arc<Self> exists any more).
        self.flush_signal.shutdown();
        if let Some(handle) = self.flush_thread.lock().take() {
            let _ = handle.join();
        }
    }
}
