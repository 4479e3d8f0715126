//! Bulk Sink Adapter - Abstract interface for warehouse writes

pub mod bigquery;
pub mod memory;

pub use bigquery::{BigQueryConfig, BigQuerySink};
pub use memory::MemorySink;

use crate::error::SinkError;
use crate::ingestion::NormalizedRow;
use async_trait::async_trait;

/// Bulk Sink Trait
///
/// Implementations:
/// - BigQuerySink: streaming inserts into a BigQuery table
/// - MemorySink: in-process capture for tests and local runs
///
/// One `insert` is one remote write. Implementations add no retry,
/// chunking or row cap of their own.
#[async_trait]
pub trait BulkSink: Send + Sync {
    /// Write all rows in a single call
    async fn insert(&self, rows: &[NormalizedRow]) -> Result<(), SinkError>;

    /// Sink name used in logs (e.g. "bigquery", "memory")
    fn name(&self) -> &str;
}
