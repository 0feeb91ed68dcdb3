//! Required-field checklists for check-in calls.
//!
//! Each driver status maps to an ordered list of fields the agent must
//! collect before the call can close. Field selection prefers the field
//! the counterparty's latest utterance already touches on (topic
//! continuity) before falling back to checklist order.

use serde::{Deserialize, Serialize};

/// Classified driver status after the first substantive counterparty turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DriverStatus {
    Driving,
    Arrived,
    Delayed,
    Unloading,
}

impl DriverStatus {
    /// The extraction-schema label for this status.
    pub fn label(&self) -> &'static str {
        match self {
            DriverStatus::Driving => "Driving",
            DriverStatus::Arrived => "Arrived",
            DriverStatus::Delayed => "Delayed",
            DriverStatus::Unloading => "Unloading",
        }
    }
}

/// A field the check-in checklist can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldKey {
    CurrentLocation,
    Eta,
    DelayReason,
    UnloadingStatus,
    PodReminder,
}

impl FieldKey {
    /// Name of the field in the extracted-data map.
    pub fn name(&self) -> &'static str {
        match self {
            FieldKey::CurrentLocation => "current_location",
            FieldKey::Eta => "eta",
            FieldKey::DelayReason => "delay_reason",
            FieldKey::UnloadingStatus => "unloading_status",
            FieldKey::PodReminder => "pod_reminder_acknowledged",
        }
    }

    /// Canned question used when the utterance generator is unavailable.
    pub fn canned_question(&self) -> &'static str {
        match self {
            FieldKey::CurrentLocation => "Where are you right now?",
            FieldKey::Eta => "What's your ETA to the receiver?",
            FieldKey::DelayReason => "Any delays or issues I should note?",
            FieldKey::UnloadingStatus => "Are you in a door yet, or still waiting to unload?",
            FieldKey::PodReminder => {
                "One last thing: please remember to send in the POD paperwork after unloading. Can you do that?"
            }
        }
    }
}

/// Ordered checklist for a given driver status.
///
/// Delayed shares the Driving checklist and Unloading shares the
/// Arrived one, since they describe the same two call families
/// (in-transit vs. at the receiver).
pub fn required_fields(status: DriverStatus) -> &'static [FieldKey] {
    match status {
        DriverStatus::Driving | DriverStatus::Delayed => &[
            FieldKey::CurrentLocation,
            FieldKey::Eta,
            FieldKey::DelayReason,
        ],
        DriverStatus::Arrived | DriverStatus::Unloading => {
            &[FieldKey::UnloadingStatus, FieldKey::PodReminder]
        }
    }
}

const DRIVING_HINTS: &[&str] = &["driving", "on the road", "en route", "rolling", "heading"];
const ARRIVED_HINTS: &[&str] = &["arrived", "at the receiver", "at the dock", "made it", "here now"];
const DELAYED_HINTS: &[&str] = &["delayed", "running late", "behind schedule", "stuck"];
const UNLOADING_HINTS: &[&str] = &["unloading", "in a door", "in door", "lumper", "getting unloaded"];

/// Classifies the driver's status from their utterance, if possible.
///
/// Purely lexical; returns `None` when no status phrasing matches so the
/// policy engine can ask a clarifying question instead of guessing.
pub fn classify_status(utterance: &str) -> Option<DriverStatus> {
    let text = utterance.to_lowercase();
    let contains_any = |hints: &[&str]| hints.iter().any(|h| text.contains(h));

    // More specific states first: "stuck at the dock unloading" is
    // Unloading, not Delayed.
    if contains_any(UNLOADING_HINTS) {
        Some(DriverStatus::Unloading)
    } else if contains_any(ARRIVED_HINTS) {
        Some(DriverStatus::Arrived)
    } else if contains_any(DELAYED_HINTS) {
        Some(DriverStatus::Delayed)
    } else if contains_any(DRIVING_HINTS) {
        Some(DriverStatus::Driving)
    } else {
        None
    }
}

const LOCATION_PHRASES: &[&str] = &[
    "i-", "i10", "i40", "interstate", "highway", "route ", "mile marker", "just past",
];
const LOCATION_TOKENS: &[&str] = &["near", "exit", "outside"];
const ETA_PHRASES: &[&str] = &["tomorrow", "tonight", "o'clock", "hour", "minute"];
const ETA_TOKENS: &[&str] = &["eta"];
const DELAY_PHRASES: &[&str] = &["traffic", "weather", "delay", "mechanical", "no issues", "smooth"];
const DELAY_TOKENS: &[&str] = &["late"];
const DOOR_PHRASES: &[&str] = &["door", "dock", "lumper", "unload", "waiting"];
const POD_PHRASES: &[&str] = &["paperwork", "proof of delivery"];
const POD_TOKENS: &[&str] = &["pod", "bol"];

/// Whole-word match. Hint words inside larger words never count:
/// "I am" is not an ETA and "symbol" is not a BOL.
fn has_token(text: &str, token: &str) -> bool {
    text.split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()))
        .any(|w| w == token)
}

/// Clock-time references: "8am", "10:30pm", or a bare "am"/"pm"
/// directly after a number.
fn mentions_clock_time(text: &str) -> bool {
    let mut prev_is_number = false;
    for raw in text.split_whitespace() {
        let word = raw.trim_matches(|c: char| !c.is_alphanumeric() && c != ':');
        let is_number =
            !word.is_empty() && word.chars().all(|c| c.is_ascii_digit() || c == ':');
        if let Some(stem) = word.strip_suffix("am").or_else(|| word.strip_suffix("pm")) {
            let digit_prefixed =
                !stem.is_empty() && stem.chars().all(|c| c.is_ascii_digit() || c == ':');
            if digit_prefixed || (stem.is_empty() && prev_is_number) {
                return true;
            }
        }
        prev_is_number = is_number;
    }
    false
}

/// The checklist field the utterance most plausibly speaks to, if any.
/// Short ambiguous hints match on word boundaries; longer phrases by
/// containment.
pub fn implied_field(utterance: &str) -> Option<FieldKey> {
    let text = utterance.to_lowercase();
    let phrase = |hints: &[&str]| hints.iter().any(|h| text.contains(h));
    let token = |hints: &[&str]| hints.iter().any(|h| has_token(&text, h));

    if phrase(LOCATION_PHRASES) || token(LOCATION_TOKENS) {
        Some(FieldKey::CurrentLocation)
    } else if phrase(ETA_PHRASES) || token(ETA_TOKENS) || mentions_clock_time(&text) {
        Some(FieldKey::Eta)
    } else if phrase(POD_PHRASES) || token(POD_TOKENS) {
        Some(FieldKey::PodReminder)
    } else if phrase(DOOR_PHRASES) {
        Some(FieldKey::UnloadingStatus)
    } else if phrase(DELAY_PHRASES) || token(DELAY_TOKENS) {
        Some(FieldKey::DelayReason)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_driving_from_utterance() {
        assert_eq!(
            classify_status("I'm driving on I-10 near Indio"),
            Some(DriverStatus::Driving)
        );
    }

    #[test]
    fn classifies_arrived_and_unloading() {
        assert_eq!(classify_status("just arrived at the receiver"), Some(DriverStatus::Arrived));
        assert_eq!(classify_status("we're in a door unloading now"), Some(DriverStatus::Unloading));
    }

    #[test]
    fn unclassifiable_utterance_returns_none() {
        assert_eq!(classify_status("uh, what do you want"), None);
    }

    #[test]
    fn delayed_shares_the_driving_checklist() {
        assert_eq!(
            required_fields(DriverStatus::Delayed),
            required_fields(DriverStatus::Driving)
        );
    }

    #[test]
    fn implied_field_prefers_location_over_delay() {
        // "traffic" alone implies delay; a highway reference wins.
        assert_eq!(
            implied_field("stuck in traffic on I-40 near Flagstaff"),
            Some(FieldKey::CurrentLocation)
        );
        assert_eq!(implied_field("heavy traffic out here"), Some(FieldKey::DelayReason));
    }

    #[test]
    fn implied_field_detects_eta() {
        assert_eq!(implied_field("should be there tomorrow 8am"), Some(FieldKey::Eta));
    }

    #[test]
    fn bare_am_never_implies_an_eta() {
        assert_eq!(implied_field("I am driving to Phoenix right now"), None);
        assert_eq!(implied_field("should be there by 8 am"), Some(FieldKey::Eta));
        assert_eq!(implied_field("probably 10:30pm"), Some(FieldKey::Eta));
    }

    #[test]
    fn hint_words_inside_larger_words_do_not_match() {
        // "translate" contains "late", "symbol" contains "bol".
        assert_eq!(implied_field("let me translate that for the broker"), None);
        assert_eq!(implied_field("there's a symbol on the placard"), None);
        assert_eq!(implied_field("running late out here"), Some(FieldKey::DelayReason));
        assert_eq!(implied_field("I'll send the BOL tonight"), Some(FieldKey::Eta));
        assert_eq!(implied_field("I'll send the bol over"), Some(FieldKey::PodReminder));
    }
}
