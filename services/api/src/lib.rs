//! Dispatch API Library Crate
//!
//! This library contains the service shell around the dialogue session
//! engine: configuration, the session store, the WebSocket protocol
//! handler, and routing. The `api` binary is a thin wrapper around it.

pub mod config;
pub mod records;
pub mod router;
pub mod state;
pub mod store;
pub mod ws;
