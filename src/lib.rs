pub mod config;
pub mod error;
pub mod ingestion;
pub mod server;
pub mod sink;

pub use error::{IngestError, Result, SinkError};
pub use ingestion::{IngestRequest, IngestResponse, IngestSummary, IngestionOrchestrator};
pub use sink::BulkSink;
