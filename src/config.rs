//! Server configuration: CLI flags with environment fallbacks

use crate::error::SinkError;
use crate::ingestion::IngestOptions;
use crate::server::ServerSettings;
use crate::sink::bigquery::DEFAULT_BIGQUERY_URL;
use crate::sink::{BigQueryConfig, BigQuerySink, BulkSink, MemorySink};
use clap::{Parser, ValueEnum};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3004";
pub const DEFAULT_DATASET: &str = "whatsapp_analytics";
pub const DEFAULT_TABLE: &str = "message_events";

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum SinkKind {
    /// BigQuery streaming inserts
    Bigquery,
    /// Keep rows in process memory (local runs)
    Memory,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "message-ingest")]
#[command(about = "HTTP ingestion endpoint for chat message events")]
pub struct ServerArgs {
    /// Listen address (or set INGEST_BIND_ADDR)
    #[arg(long)]
    pub bind_addr: Option<String>,

    /// Where normalized rows are written
    #[arg(long, value_enum, default_value_t = SinkKind::Bigquery)]
    pub sink: SinkKind,

    /// GCP project (or set BIGQUERY_PROJECT_ID)
    #[arg(long)]
    pub project_id: Option<String>,

    /// Dataset (or set BIGQUERY_DATASET)
    #[arg(long)]
    pub dataset: Option<String>,

    /// Table (or set BIGQUERY_TABLE)
    #[arg(long)]
    pub table: Option<String>,

    /// OAuth access token (or set BIGQUERY_ACCESS_TOKEN)
    #[arg(long)]
    pub access_token: Option<String>,

    /// BigQuery REST base URL (or set BIGQUERY_URL)
    #[arg(long)]
    pub bigquery_url: Option<String>,

    /// Client-side timeout for one insert call
    #[arg(long, default_value_t = 30)]
    pub sink_timeout_secs: u64,

    /// Time allowed to read one inbound request
    #[arg(long, default_value_t = 5)]
    pub read_timeout_secs: u64,

    /// Largest accepted request body
    #[arg(long, default_value_t = 1_048_576)]
    pub max_body_bytes: usize,

    /// Sort flattened events by message timestamp before mapping
    #[arg(long)]
    pub sort_by_timestamp: bool,

    /// Reject events missing message_id, conversation_id or message_timestamp
    #[arg(long)]
    pub require_fields: bool,
}

#[derive(Clone, Debug)]
pub enum SinkConfig {
    BigQuery(BigQueryConfig),
    Memory,
}

/// Resolved configuration for the server binary
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub settings: ServerSettings,
    pub sink: SinkConfig,
    pub options: IngestOptions,
}

impl ServerConfig {
    /// Resolve flags against the process environment
    pub fn from_args(args: ServerArgs) -> Self {
        Self::resolve(args, |key| std::env::var(key).ok())
    }

    /// Resolve flags, filling unset values through `env`
    pub fn resolve<F>(args: ServerArgs, env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let pick = |flag: Option<String>, key: &str| -> Option<String> {
            flag.or_else(|| env(key)).filter(|v| !v.trim().is_empty())
        };

        let sink = match args.sink {
            SinkKind::Memory => SinkConfig::Memory,
            SinkKind::Bigquery => SinkConfig::BigQuery(BigQueryConfig {
                base_url: pick(args.bigquery_url, "BIGQUERY_URL")
                    .unwrap_or_else(|| DEFAULT_BIGQUERY_URL.to_string()),
                project_id: pick(args.project_id, "BIGQUERY_PROJECT_ID").unwrap_or_default(),
                dataset: pick(args.dataset, "BIGQUERY_DATASET")
                    .unwrap_or_else(|| DEFAULT_DATASET.to_string()),
                table: pick(args.table, "BIGQUERY_TABLE")
                    .unwrap_or_else(|| DEFAULT_TABLE.to_string()),
                access_token: pick(args.access_token, "BIGQUERY_ACCESS_TOKEN").unwrap_or_default(),
                timeout: Duration::from_secs(args.sink_timeout_secs.max(1)),
            }),
        };

        Self {
            bind_addr: pick(args.bind_addr, "INGEST_BIND_ADDR")
                .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
            settings: ServerSettings {
                read_timeout: Duration::from_secs(args.read_timeout_secs.max(1)),
                max_body_bytes: args.max_body_bytes,
            },
            sink,
            options: IngestOptions {
                sort_by_timestamp: args.sort_by_timestamp,
                require_fields: args.require_fields,
            },
        }
    }

    /// Construct the process-wide sink handle
    pub fn build_sink(&self) -> Result<Arc<dyn BulkSink>, SinkError> {
        match &self.sink {
            SinkConfig::BigQuery(cfg) => Ok(Arc::new(BigQuerySink::new(cfg.clone())?)),
            SinkConfig::Memory => Ok(Arc::new(MemorySink::new())),
        }
    }
}
