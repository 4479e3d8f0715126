//! BigQuery Sink - streaming inserts through the `tabledata.insertAll` REST API

use crate::error::SinkError;
use crate::ingestion::NormalizedRow;
use crate::sink::BulkSink;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_BIGQUERY_URL: &str = "https://bigquery.googleapis.com/bigquery/v2";

/// Row errors quoted in a `RowsRejected` message
const MAX_REPORTED_ROW_ERRORS: usize = 5;

#[derive(Clone, Debug)]
pub struct BigQueryConfig {
    pub base_url: String,
    pub project_id: String,
    pub dataset: String,
    pub table: String,
    pub access_token: String,
    pub timeout: Duration,
}

impl BigQueryConfig {
    pub fn validate(&self) -> Result<(), SinkError> {
        if self.project_id.trim().is_empty() {
            return Err(SinkError::Config("BigQuery project id is not set".to_string()));
        }
        if self.access_token.trim().is_empty() {
            return Err(SinkError::Config("BigQuery access token is not set".to_string()));
        }
        if self.dataset.trim().is_empty() || self.table.trim().is_empty() {
            return Err(SinkError::Config("BigQuery dataset and table must be set".to_string()));
        }
        Ok(())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InsertAllRequest<'a> {
    kind: &'static str,
    skip_invalid_rows: bool,
    ignore_unknown_values: bool,
    rows: Vec<InsertAllRow<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InsertAllRow<'a> {
    insert_id: &'a str,
    json: &'a NormalizedRow,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct InsertAllResponse {
    #[serde(default)]
    insert_errors: Vec<RowInsertErrors>,
}

#[derive(Deserialize)]
struct RowInsertErrors {
    #[serde(default)]
    index: usize,
    #[serde(default)]
    errors: Vec<ErrorProto>,
}

#[derive(Deserialize)]
struct ErrorProto {
    #[serde(default)]
    reason: String,
    #[serde(default)]
    location: String,
    #[serde(default)]
    message: String,
}

/// BigQuery Sink
#[derive(Clone)]
pub struct BigQuerySink {
    cfg: BigQueryConfig,
    http: Client,
}

impl BigQuerySink {
    pub fn new(cfg: BigQueryConfig) -> Result<Self, SinkError> {
        cfg.validate()?;
        let http = Client::builder()
            .timeout(cfg.timeout)
            .build()
            .map_err(|e| SinkError::Config(format!("failed to construct HTTP client: {}", e)))?;

        Ok(Self { cfg, http })
    }

    pub fn insert_all_url(&self) -> String {
        format!(
            "{}/projects/{}/datasets/{}/tables/{}/insertAll",
            self.cfg.base_url.trim_end_matches('/'),
            self.cfg.project_id,
            self.cfg.dataset,
            self.cfg.table
        )
    }
}

#[async_trait]
impl BulkSink for BigQuerySink {
    async fn insert(&self, rows: &[NormalizedRow]) -> Result<(), SinkError> {
        // Invalid rows fail the whole request instead of being skipped
        let body = InsertAllRequest {
            kind: "bigquery#tableDataInsertAllRequest",
            skip_invalid_rows: false,
            ignore_unknown_values: false,
            rows: rows
                .iter()
                .map(|row| InsertAllRow {
                    insert_id: &row.event_id,
                    json: row,
                })
                .collect(),
        };
        let payload = serde_json::to_vec(&body)
            .map_err(|e| SinkError::Encode(format!("failed to encode insertAll body: {}", e)))?;

        debug!(
            table = %self.cfg.table,
            rows = rows.len(),
            bytes = payload.len(),
            "sending insertAll request"
        );

        let response = self
            .http
            .post(self.insert_all_url())
            .bearer_auth(&self.cfg.access_token)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(payload)
            .send()
            .await?;

        let status = response.status().as_u16();
        let text = response.text().await?;
        interpret_response(status, &text)
    }

    fn name(&self) -> &str {
        "bigquery"
    }
}

/// Turn an insertAll HTTP response into the sink outcome
fn interpret_response(status: u16, body: &str) -> Result<(), SinkError> {
    if !(200..300).contains(&status) {
        return Err(SinkError::Rejected {
            status,
            message: error_message(body),
        });
    }

    if body.trim().is_empty() {
        return Ok(());
    }

    let parsed: InsertAllResponse = serde_json::from_str(body)
        .map_err(|e| SinkError::Transport(format!("invalid insertAll response: {}", e)))?;
    if parsed.insert_errors.is_empty() {
        return Ok(());
    }

    // Rows marked "stopped" were valid but dropped with the rest of the request
    let invalid: Vec<String> = parsed
        .insert_errors
        .iter()
        .flat_map(|row| {
            row.errors
                .iter()
                .filter(|e| e.reason != "stopped")
                .map(move |e| format_row_error(row.index, e))
        })
        .collect();
    warn!(
        failed = parsed.insert_errors.len(),
        invalid = invalid.len(),
        "insertAll reported row errors"
    );

    let mut message = invalid
        .iter()
        .take(MAX_REPORTED_ROW_ERRORS)
        .cloned()
        .collect::<Vec<_>>()
        .join("; ");
    if invalid.len() > MAX_REPORTED_ROW_ERRORS {
        message.push_str(&format!(" (+{} more)", invalid.len() - MAX_REPORTED_ROW_ERRORS));
    }
    if message.is_empty() {
        message = "rows were not inserted".to_string();
    }

    Err(SinkError::RowsRejected {
        failed: parsed.insert_errors.len(),
        message,
    })
}

fn format_row_error(index: usize, error: &ErrorProto) -> String {
    if error.location.is_empty() {
        format!("row {}: {}: {}", index, error.reason, error.message)
    } else {
        format!(
            "row {} ({}): {}: {}",
            index, error.location, error.reason, error.message
        )
    }
}

/// Google API errors carry `{"error": {"message": ...}}`; fall back to the raw body
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}
