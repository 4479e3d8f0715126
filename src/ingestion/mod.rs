//! Ingestion Module - message events from the boundary into the warehouse
//!
//! Handles one ingest request end to end:
//! - Request validation
//! - Flattening of the grouped payload
//! - Schema mapping into fixed-shape rows
//! - One bulk write to the configured sink

pub mod schema_mapper;
pub mod flattener;
pub mod orchestrator;

pub use schema_mapper::{NormalizedRow, SchemaMapper};
pub use flattener::BatchFlattener;
pub use orchestrator::{IngestOptions, IngestionOrchestrator};

use crate::error::IngestError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Untyped event as received from a client
pub type RawEvent = Map<String, Value>;

/// group key -> sub-group key -> events
pub type NestedGrouping = BTreeMap<String, BTreeMap<String, Vec<RawEvent>>>;

/// Rows produced from one request, in mapping order
pub type IngestBatch = Vec<NormalizedRow>;

/// Inbound ingest request
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct IngestRequest {
    /// Grouped payload; shape is checked by the orchestrator, not by serde
    #[serde(default)]
    pub grouping: Option<Value>,

    #[serde(default, rename = "orgId", alias = "org_id")]
    pub org_id: Option<String>,
}

impl IngestRequest {
    pub fn new(grouping: Value, org_id: impl Into<String>) -> Self {
        Self {
            grouping: Some(grouping),
            org_id: Some(org_id.into()),
        }
    }
}

/// Successful ingest outcome
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestSummary {
    pub row_count: usize,
}

/// Wire form of an ingest outcome
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum IngestResponse {
    Success {
        #[serde(rename = "rowCount")]
        row_count: usize,
    },
    Error {
        message: String,
    },
}

impl From<&std::result::Result<IngestSummary, IngestError>> for IngestResponse {
    fn from(result: &std::result::Result<IngestSummary, IngestError>) -> Self {
        match result {
            Ok(summary) => IngestResponse::Success {
                row_count: summary.row_count,
            },
            Err(err) => IngestResponse::Error {
                message: err.to_string(),
            },
        }
    }
}
