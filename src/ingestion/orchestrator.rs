//! Ingestion Orchestrator - Main ingestion coordinator
//! Validates the request, flattens, maps and hands one batch to the sink.

use crate::error::{IngestError, Result};
use crate::ingestion::schema_mapper::{field, parse_timestamp};
use crate::ingestion::{
    BatchFlattener, IngestBatch, IngestRequest, IngestSummary, RawEvent, SchemaMapper,
};
use crate::sink::BulkSink;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Fields checked when `require_fields` is on
const REQUIRED_EVENT_FIELDS: &[&str] = &["message_id", "conversation_id", "message_timestamp"];

/// Options controlling pre-mapping checks and ordering
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct IngestOptions {
    /// Stable sort of flattened events by message timestamp
    #[serde(default)]
    pub sort_by_timestamp: bool,
    /// Reject events missing required fields before the sink sees them
    #[serde(default)]
    pub require_fields: bool,
}

/// Ingestion Orchestrator - Coordinates one ingest request
pub struct IngestionOrchestrator {
    flattener: BatchFlattener,
    mapper: SchemaMapper,
    sink: Arc<dyn BulkSink>,
    options: IngestOptions,
}

impl IngestionOrchestrator {
    pub fn new(sink: Arc<dyn BulkSink>) -> Self {
        Self::with_options(sink, IngestOptions::default())
    }

    pub fn with_options(sink: Arc<dyn BulkSink>, options: IngestOptions) -> Self {
        Self {
            flattener: BatchFlattener::new(),
            mapper: SchemaMapper::new(),
            sink,
            options,
        }
    }

    pub fn options(&self) -> &IngestOptions {
        &self.options
    }

    pub fn sink_name(&self) -> &str {
        self.sink.name()
    }

    /// Ingest one request into the sink
    pub async fn ingest(&self, request: IngestRequest) -> Result<IngestSummary> {
        let org_id = request
            .org_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| IngestError::InvalidRequest("orgId is required".to_string()))?
            .to_string();

        let grouping = match request.grouping {
            Some(value) if !value.is_null() => self
                .flattener
                .parse_grouping(value)
                .map_err(IngestError::InvalidRequest)?,
            _ => return Err(IngestError::InvalidRequest("grouping is required".to_string())),
        };

        let mut events = self.flattener.flatten(grouping);
        if events.is_empty() {
            debug!(org_id = %org_id, "empty grouping, nothing to insert");
            return Ok(IngestSummary { row_count: 0 });
        }

        if self.options.require_fields {
            check_required_fields(&events)?;
        }
        if self.options.sort_by_timestamp {
            sort_by_message_timestamp(&mut events);
        }

        let batch: IngestBatch = events
            .iter()
            .map(|event| self.mapper.map(event, &org_id))
            .collect();

        info!(
            org_id = %org_id,
            row_count = batch.len(),
            sink = self.sink.name(),
            "inserting batch"
        );

        if let Err(e) = self.sink.insert(&batch).await {
            error!(org_id = %org_id, sink = self.sink.name(), "bulk insert failed: {}", e);
            return Err(IngestError::SinkFailure(e));
        }

        Ok(IngestSummary {
            row_count: batch.len(),
        })
    }
}

fn check_required_fields(events: &[RawEvent]) -> Result<()> {
    for (position, event) in events.iter().enumerate() {
        for column in REQUIRED_EVENT_FIELDS {
            if field(event, column).is_none() {
                return Err(IngestError::InvalidRequest(format!(
                    "event {} is missing required field '{}'",
                    position, column
                )));
            }
        }
    }
    Ok(())
}

/// Undated or unparseable events keep their relative order and go last
fn sort_by_message_timestamp(events: &mut [RawEvent]) {
    events.sort_by_cached_key(|event| {
        let ts = field(event, "message_timestamp").and_then(parse_timestamp);
        (ts.is_none(), ts)
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;
    use serde_json::json;

    fn orchestrator(sink: Arc<MemorySink>, options: IngestOptions) -> IngestionOrchestrator {
        IngestionOrchestrator::with_options(sink, options)
    }

    #[test]
    fn test_accessors_reflect_construction() {
        let options = IngestOptions {
            sort_by_timestamp: true,
            require_fields: false,
        };
        let orchestrator = orchestrator(Arc::new(MemorySink::new()), options);
        assert_eq!(orchestrator.sink_name(), "memory");
        assert!(orchestrator.options().sort_by_timestamp);
        assert!(!orchestrator.options().require_fields);

        let orchestrator = IngestionOrchestrator::new(Arc::new(MemorySink::new()));
        assert!(!orchestrator.options().sort_by_timestamp);
    }

    #[tokio::test]
    async fn test_blank_org_id_is_invalid() {
        let sink = Arc::new(MemorySink::new());
        let err = orchestrator(sink.clone(), IngestOptions::default())
            .ingest(IngestRequest::new(json!({}), "   "))
            .await
            .unwrap_err();
        assert!(err.is_client_error());
        assert_eq!(sink.insert_calls(), 0);
    }

    #[tokio::test]
    async fn test_null_grouping_is_absent() {
        let sink = Arc::new(MemorySink::new());
        let request = IngestRequest {
            grouping: Some(serde_json::Value::Null),
            org_id: Some("org1".to_string()),
        };
        let err = orchestrator(sink.clone(), IngestOptions::default())
            .ingest(request)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid request: grouping is required");
    }

    #[tokio::test]
    async fn test_require_fields_rejects_locally() {
        let sink = Arc::new(MemorySink::new());
        let options = IngestOptions {
            require_fields: true,
            ..Default::default()
        };
        let grouping = json!({"g": {"s": [
            {"message_id": "m1", "conversation_id": "c1", "message_timestamp": "2024-01-01T00:00:00Z"},
            {"message_id": "m2", "conversation_id": "c1"}
        ]}});
        let err = orchestrator(sink.clone(), options)
            .ingest(IngestRequest::new(grouping, "org1"))
            .await
            .unwrap_err();
        assert!(err.is_client_error());
        assert!(err.to_string().contains("event 1 is missing required field 'message_timestamp'"));
        assert_eq!(sink.insert_calls(), 0);
    }

    #[tokio::test]
    async fn test_sort_by_timestamp() {
        let sink = Arc::new(MemorySink::new());
        let options = IngestOptions {
            sort_by_timestamp: true,
            ..Default::default()
        };
        let grouping = json!({
            "a": {"s": [
                {"message_id": "undated"},
                {"message_id": "late", "message_timestamp": "2024-01-03T00:00:00Z"}
            ]},
            "b": {"s": [
                {"message_id": "early", "message_timestamp": "2024-01-01T00:00:00Z"},
                {"message_id": "bad", "message_timestamp": "not a date"}
            ]}
        });
        let summary = orchestrator(sink.clone(), options)
            .ingest(IngestRequest::new(grouping, "org1"))
            .await
            .unwrap();
        assert_eq!(summary.row_count, 4);

        let ids: Vec<String> = sink
            .rows()
            .into_iter()
            .map(|row| row.message_id.unwrap())
            .collect();
        assert_eq!(ids, vec!["early", "late", "undated", "bad"]);
    }

    #[tokio::test]
    async fn test_sink_failure_is_server_error() {
        let sink = Arc::new(MemorySink::failing("quota exceeded"));
        let err = orchestrator(sink.clone(), IngestOptions::default())
            .ingest(IngestRequest::new(json!({"g": {"s": [{"message_text": "x"}]}}), "org1"))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 500);
        assert!(err.to_string().contains("quota exceeded"));
        assert_eq!(sink.insert_calls(), 1);
        assert!(sink.rows().is_empty());
    }
}
