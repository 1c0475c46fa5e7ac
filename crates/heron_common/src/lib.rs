//! Shared foundation for the HeronDB storage layer.
//!
//! - [`types`]: identifiers, data types, query stages, clock helpers
//! - [`datum`]: scalar values
//! - [`schema`]: column definitions, table schemas, ALTER commands
//! - [`error`]: error taxonomy shared by every layer
//! - [`config`]: runtime settings and the per-operation context
//! - [`shutdown`]: interruptible signal for background tasks

pub mod config;
pub mod datum;
pub mod error;
pub mod schema;
pub mod shutdown;
pub mod types;

pub use datum::Datum;
pub use error::{HeronError, HeronResult};
pub use types::{DataType, QueryStage, TableRef};
