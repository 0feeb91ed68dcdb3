//! Dispatch Core Library
//!
//! Domain logic for the live dialogue session engine that drives
//! logistics check-in and emergency calls. This crate is transport-free:
//! the service crate feeds it wire events and it answers with dialogue
//! decisions and, at call end, a structured call record.
//!
//! - `session`: per-call state (turn log, scenario, extracted data).
//! - `quality`: terseness / transcription-confidence streak tracking.
//! - `checklist`: required-field checklists and status classification.
//! - `policy`: the per-turn decision state machine.
//! - `schemas`: per-scenario extraction field specifications.
//! - `extraction`: end-of-call structured data finalization.
//! - `llm_client`: traits (and OpenAI-compatible impls) for the external
//!   utterance-generation, extraction, and route-lookup capabilities.

pub mod checklist;
pub mod extraction;
pub mod llm_client;
pub mod policy;
pub mod quality;
pub mod schemas;
pub mod session;
