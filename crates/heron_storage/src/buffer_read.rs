//! Buffer engine read path: union of live shard snapshots and the
//! destination table, with schema-drift compensation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use heron_common::config::EngineContext;
use heron_common::datum::Datum;
use heron_common::error::{HeronError, HeronResult};
use heron_common::types::QueryStage;

use crate::block::{sample_block_for, Block};
use crate::buffer::BufferTable;
use crate::pipe::{ConvertingTransform, FilterTransform, Pipe, QueryInfo, Source};
use crate::table::Table;

/// Emits one shard's current contents as a single chunk, taken under the
/// shard mutex. Column storage is shared copy-on-write with the shard, so
/// inserts that land after the snapshot never mutate the emitted chunk.
struct BufferSource {
    table: Arc<BufferTable>,
    shard_index: usize,
    column_names: Vec<String>,
    has_been_read: bool,
}

impl Source for BufferSource {
    fn generate(&mut self) -> HeronResult<Option<Block>> {
        if self.has_been_read {
            return Ok(None);
        }
        self.has_been_read = true;

        let state = self.table.shards[self.shard_index].state.lock();
        let Some(data) = &state.data else {
            return Ok(None);
        };
        if data.rows() == 0 {
            return Ok(None);
        }
        Ok(Some(data.project(&self.column_names)?))
    }
}

impl BufferTable {
    pub(crate) fn do_read(
        &self,
        column_names: &[String],
        query_info: &QueryInfo,
        ctx: &EngineContext,
        stage: QueryStage,
        max_block_size: usize,
        num_streams: usize,
    ) -> HeronResult<Vec<Pipe>> {
        let our_columns = self.columns.read().clone();
        // Validates the requested names up front.
        let header = sample_block_for(&our_columns, column_names)?;

        let mut pipes: Vec<Pipe> = Vec::new();

        if let Some(destination) = self.destination()? {
            let timeout = Duration::from_millis(ctx.settings.lock_acquire_timeout_ms);
            // The lock rides along on every destination pipe so the
            // structure cannot change while chunks are still flowing.
            let destination_lock = Arc::new(destination.lock_structure_shared(timeout)?);
            let dest_columns = destination.columns();

            let same_structure = column_names.iter().all(|name| {
                match (dest_columns.get(name), our_columns.get(name)) {
                    (Some(theirs), Some(ours)) => theirs.data_type == ours.data_type,
                    _ => false,
                }
            });

            let mut dest_pipes = if same_structure {
                let input_sort = query_info
                    .sort_optimizer
                    .as_ref()
                    .and_then(|optimizer| optimizer.input_order(destination.as_ref()));
                let mut dest_pipes = destination.read(
                    column_names,
                    query_info,
                    ctx,
                    stage,
                    max_block_size,
                    num_streams,
                )?;
                for pipe in &mut dest_pipes {
                    pipe.set_input_sort(input_sort.clone());
                }
                dest_pipes
            } else {
                self.read_from_drifted_destination(
                    column_names,
                    &our_columns,
                    &dest_columns,
                    destination.as_ref(),
                    query_info,
                    ctx,
                    stage,
                    max_block_size,
                    num_streams,
                )?
            };

            for pipe in &mut dest_pipes {
                pipe.attach_table_lock(Arc::clone(&destination_lock));
            }
            pipes.append(&mut dest_pipes);
        }

        // One single-chunk source per shard.
        let me = self.self_ref.upgrade().ok_or_else(|| {
            HeronError::LogicalError("buffer table read during teardown".to_string())
        })?;
        for shard_index in 0..self.shards.len() {
            let source = BufferSource {
                table: Arc::clone(&me),
                shard_index,
                column_names: column_names.to_vec(),
                has_been_read: false,
            };
            let mut pipe = Pipe::new(header.clone(), Box::new(source));

            // Chunks from the destination may already be processed past
            // FetchColumns; raw shard chunks must catch up before the union.
            if stage > QueryStage::FetchColumns {
                if let Some(transform) = &query_info.stage_transform {
                    pipe.add_transform(Arc::clone(transform));
                }
            }
            if let Some(prewhere) = &query_info.prewhere {
                if let Some(alias) = &prewhere.alias_transform {
                    pipe.add_transform(Arc::clone(alias));
                }
                pipe.add_transform(Arc::new(FilterTransform::new(
                    prewhere.column_name.clone(),
                    prewhere.remove_filtered_column,
                )));
            }
            pipes.push(pipe);
        }

        Ok(pipes)
    }

    /// The destination's physical columns no longer line up with ours:
    /// read the intersection, synthesize what is missing from defaults, and
    /// cast what drifted.
    #[allow(clippy::too_many_arguments)]
    fn read_from_drifted_destination(
        &self,
        column_names: &[String],
        our_columns: &heron_common::schema::ColumnsDescription,
        dest_columns: &heron_common::schema::ColumnsDescription,
        destination: &dyn Table,
        query_info: &QueryInfo,
        ctx: &EngineContext,
        stage: QueryStage,
        max_block_size: usize,
        num_streams: usize,
    ) -> HeronResult<Vec<Pipe>> {
        let mut intersection: Vec<String> = Vec::new();
        let mut defaults: HashMap<String, Datum> = HashMap::new();

        for name in column_names {
            let ours = our_columns
                .get(name)
                .ok_or_else(|| HeronError::ColumnNotFound(name.clone()))?;
            match dest_columns.get(name) {
                None => {
                    tracing::warn!(
                        table = %self.table_ref(),
                        destination = %destination.table_ref(),
                        column = name.as_str(),
                        "destination table does not have this column, default values are used"
                    );
                    defaults.insert(name.clone(), ours.default_datum());
                }
                Some(theirs) => {
                    if theirs.data_type != ours.data_type {
                        tracing::warn!(
                            table = %self.table_ref(),
                            destination = %destination.table_ref(),
                            column = name.as_str(),
                            from = %theirs.data_type,
                            to = %ours.data_type,
                            "destination column type differs, data from the destination is converted"
                        );
                    }
                    intersection.push(name.clone());
                }
            }
        }

        if intersection.is_empty() {
            tracing::warn!(
                table = %self.table_ref(),
                destination = %destination.table_ref(),
                "destination table has no columns in common with the requested set, reading from the buffer only"
            );
            return Ok(Vec::new());
        }

        let target_header = sample_block_for(our_columns, column_names)?;
        let mut dest_pipes = destination.read(
            &intersection,
            query_info,
            ctx,
            stage,
            max_block_size,
            num_streams,
        )?;
        for pipe in &mut dest_pipes {
            pipe.add_transform(Arc::new(ConvertingTransform::new(
                target_header.clone(),
                defaults.clone(),
            )));
        }
        Ok(dest_pipes)
    }
}
