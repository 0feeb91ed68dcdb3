//! The Session Store.
//!
//! An explicit, injectable index of live call sessions. The index lock
//! is only held for map operations, so calls on different ids never
//! contend; each session is wrapped in its own async mutex and owned by
//! exactly one connection task at a time.

use dispatch_core::session::Session;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;

/// Shared handle to one live session.
pub type SessionHandle = Arc<Mutex<Session>>;

/// Integration errors: both indicate a caller bug, never retried or
/// silently ignored.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("a live session already exists for call {0}")]
    DuplicateSession(String),
    #[error("no session found for call {0}")]
    SessionNotFound(String),
}

/// Concurrency-safe index of active sessions, keyed by call id.
#[derive(Default)]
pub struct SessionStore {
    index: RwLock<HashMap<String, SessionHandle>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new session. Fails if the call id is already live.
    pub fn create(&self, session: Session) -> Result<SessionHandle, StoreError> {
        let call_id = session.call_id.clone();
        let mut index = self.index.write().expect("session index poisoned");
        if index.contains_key(&call_id) {
            return Err(StoreError::DuplicateSession(call_id));
        }
        let handle = Arc::new(Mutex::new(session));
        index.insert(call_id, handle.clone());
        Ok(handle)
    }

    /// Looks up a live session.
    pub fn get(&self, call_id: &str) -> Result<SessionHandle, StoreError> {
        let index = self.index.read().expect("session index poisoned");
        index
            .get(call_id)
            .cloned()
            .ok_or_else(|| StoreError::SessionNotFound(call_id.to_string()))
    }

    /// Evicts a session, returning its handle so finalization can read
    /// the remaining state.
    pub fn remove(&self, call_id: &str) -> Result<SessionHandle, StoreError> {
        let mut index = self.index.write().expect("session index poisoned");
        index
            .remove(call_id)
            .ok_or_else(|| StoreError::SessionNotFound(call_id.to_string()))
    }

    pub fn len(&self) -> usize {
        self.index.read().expect("session index poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
