//! Call record persistence.
//!
//! The handler hands every finished call to a [`RecordSink`]. The
//! default sink emits the record as structured JSON on the log stream,
//! which downstream collectors already ingest; a database-backed sink
//! can be swapped in without touching the handler.

use async_trait::async_trait;
use dispatch_core::session::CallRecord;
use tracing::info;

/// Destination for finished call records.
#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn persist(&self, record: &CallRecord) -> anyhow::Result<()>;
}

/// Writes each record to the structured log stream.
pub struct LogRecordSink;

#[async_trait]
impl RecordSink for LogRecordSink {
    async fn persist(&self, record: &CallRecord) -> anyhow::Result<()> {
        let payload = serde_json::to_string(record)?;
        info!(call_id = %record.call_id, record = %payload, "call record");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dispatch_core::session::{Scenario, Session, Subject};

    #[tokio::test]
    async fn log_sink_accepts_any_record() {
        let session = Session::new(
            "rec-1".into(),
            Scenario::Delivery,
            Subject {
                driver_name: "Mike".into(),
                load_number: "7891-B".into(),
                phone_number: None,
            },
        );
        LogRecordSink.persist(&session.record()).await.unwrap();
    }
}
