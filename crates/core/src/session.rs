//! Per-call session state.
//!
//! A `Session` is created on the first protocol event for a call id and
//! owned by exactly one connection task for its whole life. All mutation
//! happens sequentially on that task; the store only hands out the
//! owning handle. The turn log is append-only and the emergency switch
//! is one-way.

use crate::checklist::DriverStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Fields that lock once written: later extraction passes must never
/// rewrite the call's outcome classification.
pub const TERMINAL_FIELDS: &[&str] = &["call_outcome", "escalation_status"];

/// Default emergency trigger lexicon. Matching is literal substring
/// containment with no negation handling: "no accident here" still
/// triggers, and a false positive costs one safety question.
pub const DEFAULT_EMERGENCY_PHRASES: &[&str] = &[
    "accident",
    "crash",
    "blowout",
    "breakdown",
    "medical",
    "emergency",
    "injured",
    "hurt",
    "pulling over",
    "can't drive",
    "need help",
    "hospital",
    "ambulance",
    "collision",
    "wreck",
];

/// The active conversational mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scenario {
    CheckIn,
    Emergency,
    Delivery,
    Custom,
}

impl Scenario {
    /// Parses the scenario string carried in `call_details` variables.
    /// Unknown values map to `Custom` rather than failing the call.
    pub fn parse(s: &str) -> Self {
        match s {
            "check_in" => Scenario::CheckIn,
            "emergency" => Scenario::Emergency,
            "delivery" => Scenario::Delivery,
            _ => Scenario::Custom,
        }
    }
}

/// Lifecycle status of a call. `Completed` and `Abandoned` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Active,
    Escalated,
    Completed,
    Abandoned,
}

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    Agent,
    Counterparty,
}

/// One utterance with metadata. Never mutated after append.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub speaker: Speaker,
    pub text: String,
    /// Transcription confidence for counterparty turns, when the
    /// platform provides one.
    pub confidence: Option<f32>,
    /// Milliseconds since the session started.
    pub offset_ms: i64,
}

/// Static dispatch context supplied at call start. Immutable thereafter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subject {
    pub driver_name: String,
    pub load_number: String,
    pub phone_number: Option<String>,
}

/// Step ladder for the emergency protocol. Strictly ordered, never
/// skipped; `Escalating` is the final statement before hand-off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EmergencyStep {
    SafetyCheck,
    InjuryCheck,
    LocationCheck,
    LoadCheck,
    Escalating,
}

impl EmergencyStep {
    pub fn next(self) -> EmergencyStep {
        match self {
            EmergencyStep::SafetyCheck => EmergencyStep::InjuryCheck,
            EmergencyStep::InjuryCheck => EmergencyStep::LocationCheck,
            EmergencyStep::LocationCheck => EmergencyStep::LoadCheck,
            EmergencyStep::LoadCheck | EmergencyStep::Escalating => EmergencyStep::Escalating,
        }
    }
}

/// Where the dialogue currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DialoguePhase {
    /// Check-in opening: waiting for a classifiable status.
    Open,
    /// Check-in gathering: working the checklist for a classified status.
    Gathering(DriverStatus),
    /// Emergency protocol, at the given step.
    Emergency(EmergencyStep),
    /// A closing utterance has been issued; no further questions.
    Closed,
}

/// Why the call ended, carried on the persisted record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    ConversationComplete,
    UnresponsiveDriver,
    PoorConnection,
    EmergencyEscalation,
    MaxDuration,
    Abandoned,
}

/// Live state of one in-progress call.
#[derive(Debug, Clone)]
pub struct Session {
    pub call_id: String,
    pub scenario: Scenario,
    /// Scenario the call was configured with, before any emergency switch.
    pub original_scenario: Scenario,
    pub subject: Subject,
    pub status: CallStatus,
    pub phase: DialoguePhase,
    pub started_at: DateTime<Utc>,
    /// Trigger lexicon for the emergency switch.
    pub emergency_phrases: Vec<String>,
    /// Turn index at which the emergency switch fired, if it did.
    pub emergency_triggered_at: Option<usize>,
    /// Whether the current emergency step has already been re-asked once.
    pub emergency_reasked: bool,
    /// Checklist field the agent asked for on its last turn.
    pub pending_field: Option<crate::checklist::FieldKey>,
    /// Location-conflict probe: checked at most once per call.
    pub location_checked: bool,
    /// A location confirmation question is outstanding.
    pub location_confirm_pending: bool,
    pub terse_streak: u32,
    pub clarification_streak: u32,
    pub end_reason: Option<EndReason>,
    turns: Vec<Turn>,
    extracted: BTreeMap<String, Value>,
}

impl Session {
    pub fn new(call_id: String, scenario: Scenario, subject: Subject) -> Self {
        let phase = match scenario {
            Scenario::Emergency => DialoguePhase::Emergency(EmergencyStep::SafetyCheck),
            _ => DialoguePhase::Open,
        };
        Self {
            call_id,
            scenario,
            original_scenario: scenario,
            subject,
            status: CallStatus::Active,
            phase,
            started_at: Utc::now(),
            emergency_phrases: DEFAULT_EMERGENCY_PHRASES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            emergency_triggered_at: None,
            emergency_reasked: false,
            pending_field: None,
            location_checked: false,
            location_confirm_pending: false,
            terse_streak: 0,
            clarification_streak: 0,
            end_reason: None,
            turns: Vec::new(),
            extracted: BTreeMap::new(),
        }
    }

    /// Appends a turn to the log. The log is append-only; callers never
    /// get mutable access to recorded turns.
    pub fn push_turn(&mut self, speaker: Speaker, text: impl Into<String>, confidence: Option<f32>) {
        let offset_ms = (Utc::now() - self.started_at).num_milliseconds();
        self.turns.push(Turn {
            speaker,
            text: text.into(),
            confidence,
            offset_ms,
        });
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn last_counterparty_turn(&self) -> Option<&Turn> {
        self.turns
            .iter()
            .rev()
            .find(|t| t.speaker == Speaker::Counterparty)
    }

    pub fn is_emergency(&self) -> bool {
        self.scenario == Scenario::Emergency
    }

    /// One-way switch into the emergency protocol. Discards any check-in
    /// checklist progress; subsequent calls are no-ops.
    pub fn switch_to_emergency(&mut self) {
        if self.scenario == Scenario::Emergency {
            return;
        }
        self.scenario = Scenario::Emergency;
        self.phase = DialoguePhase::Emergency(EmergencyStep::SafetyCheck);
        self.pending_field = None;
        self.location_confirm_pending = false;
        self.emergency_reasked = false;
        self.emergency_triggered_at = Some(self.turns.len());
        let at = self.turns.len();
        self.set_field("emergency_detected_at_turn", Value::from(at as u64));
    }

    /// Writes an extracted field. Last write wins, except terminal
    /// fields which lock once set to a non-null value. Returns whether
    /// the write took effect.
    pub fn set_field(&mut self, name: &str, value: Value) -> bool {
        if TERMINAL_FIELDS.contains(&name) {
            if let Some(existing) = self.extracted.get(name) {
                if !existing.is_null() {
                    return false;
                }
            }
        }
        self.extracted.insert(name.to_string(), value);
        true
    }

    /// Whether a field has been collected with a non-null value.
    pub fn field_filled(&self, name: &str) -> bool {
        self.extracted.get(name).is_some_and(|v| !v.is_null())
    }

    pub fn extracted(&self) -> &BTreeMap<String, Value> {
        &self.extracted
    }

    /// Marks the call for termination. The first reason sticks.
    pub fn mark_for_end(&mut self, reason: EndReason) {
        if self.end_reason.is_none() {
            self.end_reason = Some(reason);
        }
    }

    /// Snapshot of the persisted call record.
    pub fn record(&self) -> CallRecord {
        CallRecord {
            call_id: self.call_id.clone(),
            scenario: self.scenario,
            status: self.status,
            turns: self.turns.clone(),
            extracted: self.extracted.clone(),
            end_reason: self.end_reason,
        }
    }
}

/// The structured record handed to the persistence sink at
/// finalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRecord {
    pub call_id: String,
    pub scenario: Scenario,
    pub status: CallStatus,
    pub turns: Vec<Turn>,
    pub extracted: BTreeMap<String, Value>,
    pub end_reason: Option<EndReason>,
}
