//! Memory Sink - Captures batches in process

use crate::error::SinkError;
use crate::ingestion::NormalizedRow;
use crate::sink::BulkSink;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

/// Memory Sink - keeps every inserted batch
#[derive(Default)]
pub struct MemorySink {
    batches: Mutex<Vec<Vec<NormalizedRow>>>,
    failure: Mutex<Option<String>>,
    fail_next_only: AtomicBool,
    calls: AtomicUsize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every following insert with `message`
    pub fn failing(message: impl Into<String>) -> Self {
        let sink = Self::new();
        sink.set_failure(Some(message.into()), false);
        sink
    }

    /// Reject only the next insert with `message`
    pub fn fail_next(&self, message: impl Into<String>) {
        self.set_failure(Some(message.into()), true);
    }

    fn set_failure(&self, message: Option<String>, once: bool) {
        *self.failure.lock().unwrap_or_else(|e| e.into_inner()) = message;
        self.fail_next_only.store(once, Ordering::SeqCst);
    }

    /// Number of insert calls made, accepted or not
    pub fn insert_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn batches(&self) -> Vec<Vec<NormalizedRow>> {
        self.batches.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// All accepted rows, in insert order
    pub fn rows(&self) -> Vec<NormalizedRow> {
        self.batches().into_iter().flatten().collect()
    }
}

#[async_trait]
impl BulkSink for MemorySink {
    async fn insert(&self, rows: &[NormalizedRow]) -> Result<(), SinkError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        {
            let mut failure = self.failure.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(message) = failure.clone() {
                if self.fail_next_only.swap(false, Ordering::SeqCst) {
                    *failure = None;
                }
                return Err(SinkError::Rejected { status: 500, message });
            }
        }

        self.batches
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(rows.to_vec());
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
