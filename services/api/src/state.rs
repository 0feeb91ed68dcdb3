use crate::config::Config;
use crate::records::RecordSink;
use crate::store::SessionStore;
use dispatch_core::llm_client::{RouteLookup, StructuredExtractor, UtteranceGenerator};
use dispatch_core::policy::PolicyEngine;
use std::sync::Arc;

/// Shared application state, cloned into every connection handler. All
/// collaborators sit behind trait objects so tests can wire in fakes.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<SessionStore>,
    pub policy: Arc<PolicyEngine>,
    pub generator: Arc<dyn UtteranceGenerator>,
    pub extractor: Arc<dyn StructuredExtractor>,
    pub routes: Arc<dyn RouteLookup>,
    pub record_sink: Arc<dyn RecordSink>,
    pub config: Arc<Config>,
}
