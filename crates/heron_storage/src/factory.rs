//! Table engine factory: maps an engine name plus constant declaration
//! arguments to a live engine instance.

use std::sync::Arc;

use dashmap::DashMap;

use heron_common::config::EngineContext;
use heron_common::datum::Datum;
use heron_common::error::{HeronError, HeronResult};
use heron_common::schema::{ColumnsDescription, ConstraintsDescription};
use heron_common::types::TableRef;

use crate::buffer::{BufferTable, Thresholds};
use crate::catalog::Catalog;
use crate::table::Table;

/// Everything an engine needs at creation time.
pub struct EngineArguments {
    pub table_ref: TableRef,
    pub columns: ColumnsDescription,
    pub constraints: ConstraintsDescription,
    /// Positional engine parameters, already evaluated to constants.
    pub engine_args: Vec<Datum>,
    pub catalog: Arc<Catalog>,
    pub context: EngineContext,
}

pub type EngineCreator =
    Arc<dyn Fn(EngineArguments) -> HeronResult<Arc<dyn Table>> + Send + Sync>;

/// Registry of engine constructors keyed by engine name.
#[derive(Default)]
pub struct TableFactory {
    creators: DashMap<String, EngineCreator>,
}

impl TableFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, engine: &str, creator: EngineCreator) {
        self.creators.insert(engine.to_string(), creator);
    }

    pub fn create(&self, engine: &str, args: EngineArguments) -> HeronResult<Arc<dyn Table>> {
        let creator = self
            .creators
            .get(engine)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| HeronError::UnknownEngine(engine.to_string()))?;
        creator(args)
    }
}

const BUFFER_ARGS_HINT: &str = "destination_database, destination_table, num_shards, \
     min_time, max_time, min_rows, max_rows, min_bytes, max_bytes";

fn arg_str(value: &Datum, name: &str) -> HeronResult<String> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| HeronError::BadArgument(format!("{} must be a string, got {}", name, value)))
}

fn arg_u64(value: &Datum, name: &str) -> HeronResult<u64> {
    value.as_u64().ok_or_else(|| {
        HeronError::BadArgument(format!(
            "{} must be a non-negative integer, got {}",
            name, value
        ))
    })
}

fn arg_i64(value: &Datum, name: &str) -> HeronResult<i64> {
    value
        .as_i64()
        .ok_or_else(|| HeronError::BadArgument(format!("{} must be an integer, got {}", name, value)))
}

/// Register the `Buffer` engine.
///
/// `Buffer(destination_database, destination_table, num_shards,
///         min_time, max_time, min_rows, max_rows, min_bytes, max_bytes)`
///
/// An empty destination table name means the buffer has no destination and
/// simply drops data on flush. An empty destination database resolves to
/// the buffer's own database.
pub fn register_buffer_engine(factory: &TableFactory) {
    factory.register(
        "Buffer",
        Arc::new(|args: EngineArguments| {
            if args.engine_args.len() != 9 {
                return Err(HeronError::ArgumentCountMismatch {
                    engine: "Buffer",
                    expected: 9,
                    hint: BUFFER_ARGS_HINT,
                });
            }

            let destination_database = arg_str(&args.engine_args[0], "destination_database")?;
            let destination_table = arg_str(&args.engine_args[1], "destination_table")?;
            let num_shards = arg_u64(&args.engine_args[2], "num_shards")?;
            let min_time = arg_i64(&args.engine_args[3], "min_time")?;
            let max_time = arg_i64(&args.engine_args[4], "max_time")?;
            let min_rows = arg_u64(&args.engine_args[5], "min_rows")?;
            let max_rows = arg_u64(&args.engine_args[6], "max_rows")?;
            let min_bytes = arg_u64(&args.engine_args[7], "min_bytes")?;
            let max_bytes = arg_u64(&args.engine_args[8], "max_bytes")?;

            if num_shards == 0 {
                return Err(HeronError::BadArgument(
                    "num_shards must be greater than zero".to_string(),
                ));
            }

            let destination_id = if destination_table.is_empty() {
                None
            } else {
                let database = if destination_database.is_empty() {
                    args.table_ref.database.clone()
                } else {
                    destination_database
                };
                Some(TableRef::new(database, destination_table))
            };

            let allow_materialized = args.context.settings.insert_allow_materialized;
            let table = BufferTable::create(
                args.table_ref,
                args.columns,
                args.constraints,
                args.catalog,
                args.context,
                num_shards as usize,
                Thresholds::new(min_time, min_rows, min_bytes),
                Thresholds::new(max_time, max_rows, max_bytes),
                destination_id,
                allow_materialized,
            )?;
            Ok(table as Arc<dyn Table>)
        }),
    );
}
