//! Wire protocol for the voice-platform WebSocket.
//!
//! Inbound messages are tagged by `interaction_type`; the service
//! answers `response_required` and `reminder_required` with exactly one
//! `response` frame echoing the request's `response_id`. `update_only`
//! frames carry transcript context and get no reply.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Messages the voice platform sends us.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "interaction_type", rename_all = "snake_case")]
pub enum InboundMessage {
    /// First message of every call: identity and dispatch variables.
    CallDetails { call: CallStart },
    /// The counterparty finished speaking; a reply is owed.
    ResponseRequired {
        response_id: u64,
        transcript: Vec<TranscriptEntry>,
    },
    /// Prolonged silence; a nudge is owed.
    ReminderRequired { response_id: u64 },
    /// Transcript refresh only. No reply permitted.
    UpdateOnly,
    /// The platform ended the call.
    CallEnded,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallStart {
    pub call_id: String,
    /// Dispatch context injected by the platform at call creation.
    #[serde(default, alias = "retell_llm_dynamic_variables")]
    pub variables: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptRole {
    Agent,
    User,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TranscriptEntry {
    pub role: TranscriptRole,
    pub content: String,
    /// Transcription confidence, when the platform provides one.
    pub confidence: Option<f32>,
}

/// The single frame we send per answered request.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "response_type", rename_all = "snake_case")]
pub enum OutboundMessage {
    Response {
        response_id: u64,
        content: String,
        content_complete: bool,
        end_call: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        transfer_to_human: Option<bool>,
    },
}

impl OutboundMessage {
    pub fn response(response_id: u64, content: String, end_call: bool, transfer: bool) -> Self {
        OutboundMessage::Response {
            response_id,
            content,
            content_complete: true,
            end_call,
            transfer_to_human: if transfer { Some(true) } else { None },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_call_details_with_platform_variable_alias() {
        let raw = r#"{
            "interaction_type": "call_details",
            "call": {
                "call_id": "c-77",
                "retell_llm_dynamic_variables": {
                    "driver_name": "Mike",
                    "load_number": "7891-B",
                    "scenario": "check_in"
                }
            }
        }"#;
        let msg: InboundMessage = serde_json::from_str(raw).unwrap();
        match msg {
            InboundMessage::CallDetails { call } => {
                assert_eq!(call.call_id, "c-77");
                assert_eq!(call.variables["driver_name"], "Mike");
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn parses_response_required_transcript() {
        let raw = r#"{
            "interaction_type": "response_required",
            "response_id": 3,
            "transcript": [
                {"role": "agent", "content": "Can you give me an update?"},
                {"role": "user", "content": "yeah driving, near Indio", "confidence": 0.92}
            ]
        }"#;
        let msg: InboundMessage = serde_json::from_str(raw).unwrap();
        match msg {
            InboundMessage::ResponseRequired {
                response_id,
                transcript,
            } => {
                assert_eq!(response_id, 3);
                assert_eq!(transcript.len(), 2);
                assert_eq!(transcript[1].role, TranscriptRole::User);
                assert_eq!(transcript[1].confidence, Some(0.92));
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn unknown_transcript_roles_do_not_break_parsing() {
        let raw = r#"{"role": "tool", "content": "x"}"#;
        let entry: TranscriptEntry = serde_json::from_str(raw).unwrap();
        assert_eq!(entry.role, TranscriptRole::Other);
    }

    #[test]
    fn unknown_interaction_type_is_a_parse_error() {
        let raw = r#"{"interaction_type": "ping_pong"}"#;
        assert!(serde_json::from_str::<InboundMessage>(raw).is_err());
    }

    #[test]
    fn response_frame_shape() {
        let frame = OutboundMessage::response(4, "On it.".into(), false, false);
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["response_type"], "response");
        assert_eq!(json["response_id"], 4);
        assert_eq!(json["content_complete"], true);
        assert_eq!(json["end_call"], false);
        assert!(json.get("transfer_to_human").is_none());

        let frame = OutboundMessage::response(5, "Transferring.".into(), true, true);
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["end_call"], true);
        assert_eq!(json["transfer_to_human"], true);
    }
}
