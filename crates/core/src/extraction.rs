//! The Extraction Bridge.
//!
//! Runs once at call finalization: hands the full turn log to the
//! external structured-extraction capability and merges the result into
//! the session's extracted map. Merging is last-write-wins except for
//! terminal fields, and required fields the extractor could not fill
//! are recorded as null so the call record is always produced.

use crate::llm_client::{ExtractionUnavailable, StructuredExtractor};
use crate::schemas::schema_for;
use crate::session::Session;
use serde_json::Value;
use tracing::{info, warn};

/// Finalizes the session's extracted data.
///
/// On success the extracted map satisfies the scenario schema (missing
/// required fields become explicit nulls). If the extraction
/// collaborator is unreachable the error is surfaced for offline
/// reprocessing; the session keeps its incrementally gathered fields
/// and the caller still persists the raw turn log.
pub async fn finalize(
    extractor: &dyn StructuredExtractor,
    session: &mut Session,
) -> Result<(), ExtractionUnavailable> {
    let fields = match extractor.extract(session.turns(), session.scenario).await {
        Ok(fields) => fields,
        Err(e) => {
            warn!(call_id = %session.call_id, error = %e, "extraction collaborator unreachable");
            return Err(e);
        }
    };

    let mut dropped = 0usize;
    for (name, value) in fields {
        // Null from the extractor never clobbers a value gathered live.
        if value.is_null() && session.field_filled(&name) {
            continue;
        }
        if !session.set_field(&name, value) {
            dropped += 1;
        }
    }
    if dropped > 0 {
        info!(call_id = %session.call_id, dropped, "extraction tried to rewrite terminal fields");
    }

    for spec in schema_for(session.scenario) {
        if spec.required && !session.extracted().contains_key(spec.name) {
            session.set_field(spec.name, Value::Null);
        }
    }
    Ok(())
}
