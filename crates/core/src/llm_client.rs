//! External language-model and route-lookup collaborators.
//!
//! The policy engine and extraction bridge only ever see the narrow
//! traits defined here, so tests run against deterministic fakes while
//! production wires in the OpenAI-compatible implementations.

use crate::checklist::FieldKey;
use crate::session::{Scenario, Speaker, Subject, Turn};
use crate::schemas::schema_description;
use anyhow::Result;
use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

/// Failure modes of the utterance generator. Both are recovered locally
/// with a canned utterance; the counterparty never hears raw errors.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("utterance generation timed out")]
    Timeout,
    #[error("utterance generation failed: {0}")]
    Failed(String),
}

/// The extraction collaborator was unreachable. The call record is
/// still persisted with the raw turn log for offline reprocessing.
#[derive(Debug, thiserror::Error)]
#[error("structured extraction unavailable: {0}")]
pub struct ExtractionUnavailable(pub String);

/// What the policy engine wants the generator to say.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    /// The driver's status could not be classified; ask which it is.
    ClarifyStatus,
    /// Ask for one unanswered checklist field.
    AskField(FieldKey),
    /// Non-confrontational confirmation of a conflicting location.
    ConfirmLocation,
}

impl PromptKind {
    /// Fixed utterance used when generation fails or times out. Never
    /// silence: a human is waiting on the line.
    pub fn canned_fallback(&self) -> String {
        match self {
            PromptKind::ClarifyStatus => {
                "Sorry, just to confirm: are you still driving, or have you arrived at the receiver?"
                    .to_string()
            }
            PromptKind::AskField(field) => field.canned_question().to_string(),
            PromptKind::ConfirmLocation => {
                "Just to make sure I have it right, can you confirm your current location for me?"
                    .to_string()
            }
        }
    }

    fn instruction(&self) -> String {
        match self {
            PromptKind::ClarifyStatus => {
                "Ask the driver, in one short sentence, whether they are still driving or have arrived at the receiver.".to_string()
            }
            PromptKind::AskField(field) => format!(
                "Ask the driver, in one short conversational sentence, for this information: {}.",
                field.canned_question()
            ),
            PromptKind::ConfirmLocation => {
                "The location the driver gave does not match the planned route. Without arguing, ask them once to confirm their current location.".to_string()
            }
        }
    }
}

/// Everything the generator may condition on for one utterance.
pub struct GenerationRequest<'a> {
    pub kind: PromptKind,
    pub scenario: Scenario,
    pub subject: &'a Subject,
    /// Recent window of the turn log, oldest first.
    pub recent_turns: &'a [Turn],
}

/// Produces the agent's next utterance. May fail or time out; the
/// policy engine handles both with canned fallbacks.
#[async_trait]
pub trait UtteranceGenerator: Send + Sync {
    async fn generate(
        &self,
        request: &GenerationRequest<'_>,
        timeout: Duration,
    ) -> Result<String, GenerationError>;
}

/// Extracts structured fields from the accumulated turn log. The schema
/// depends on the final scenario.
#[async_trait]
pub trait StructuredExtractor: Send + Sync {
    async fn extract(
        &self,
        turns: &[Turn],
        scenario: Scenario,
    ) -> Result<BTreeMap<String, Value>, ExtractionUnavailable>;
}

/// Expected route corridor for a dispatched load.
#[derive(Debug, Clone)]
pub struct RouteCorridor {
    pub origin: String,
    pub destination: String,
    pub waypoints: Vec<String>,
}

impl RouteCorridor {
    /// Whether the stated location plausibly lies on this corridor:
    /// case-insensitive containment of any corridor place name (the
    /// part before a comma, so "Kingman, AZ" matches "near kingman").
    pub fn mentions(&self, stated_location: &str) -> bool {
        let stated = stated_location.to_lowercase();
        std::iter::once(self.origin.as_str())
            .chain(std::iter::once(self.destination.as_str()))
            .chain(self.waypoints.iter().map(String::as_str))
            .filter_map(|place| place.split(',').next())
            .map(|city| city.trim().to_lowercase())
            .any(|city| !city.is_empty() && stated.contains(&city))
    }
}

/// Looks up the expected route for a subject. Returning `None` simply
/// disables the location-conflict check.
#[async_trait]
pub trait RouteLookup: Send + Sync {
    async fn expected_route(&self, subject: &Subject) -> Option<RouteCorridor>;
}

/// A lookup with no route data; the conflict check stays off.
pub struct NoRouteLookup;

#[async_trait]
impl RouteLookup for NoRouteLookup {
    async fn expected_route(&self, _subject: &Subject) -> Option<RouteCorridor> {
        None
    }
}

const CHECK_IN_SYSTEM_PROMPT: &str = "You are a dispatch agent making a check call to driver \
{driver_name} about load {load_number}. Sound like a human dispatcher: brief, friendly, one \
question at a time. Never mention that you are an AI. Keep every reply under two sentences.";

const EMERGENCY_SYSTEM_PROMPT: &str = "You are a dispatch agent on an emergency call with driver \
{driver_name} on load {load_number}. Stay calm and direct. Ask exactly one question at a time \
and keep replies under two sentences.";

const EXTRACTION_SYSTEM_PROMPT: &str = "You are a data extraction specialist for a logistics call \
center. Analyze the transcript and return ONLY a JSON object matching the schema. Use null for \
missing information. Extract exact values from the transcript; never invent information.";

/// Production client for any OpenAI-compatible chat completion API.
/// Serves as both the utterance generator and the structured extractor.
pub struct OpenAICompatibleClient {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAICompatibleClient {
    pub fn new(config: OpenAIConfig, model: String) -> Self {
        Self {
            client: Client::with_config(config),
            model,
        }
    }

    fn system_prompt(scenario: Scenario, subject: &Subject) -> String {
        let template = match scenario {
            Scenario::Emergency => EMERGENCY_SYSTEM_PROMPT,
            _ => CHECK_IN_SYSTEM_PROMPT,
        };
        template
            .replace("{driver_name}", &subject.driver_name)
            .replace("{load_number}", &subject.load_number)
    }

    fn history_messages(turns: &[Turn]) -> Result<Vec<ChatCompletionRequestMessage>> {
        let mut messages = Vec::with_capacity(turns.len());
        for turn in turns {
            let message: ChatCompletionRequestMessage = match turn.speaker {
                Speaker::Agent => ChatCompletionRequestAssistantMessageArgs::default()
                    .content(turn.text.clone())
                    .build()?
                    .into(),
                Speaker::Counterparty => ChatCompletionRequestUserMessageArgs::default()
                    .content(turn.text.clone())
                    .build()?
                    .into(),
            };
            messages.push(message);
        }
        Ok(messages)
    }

    /// Strips meta-commentary the model sometimes adds ("Agent: ...",
    /// fully quoted replies).
    fn clean_utterance(raw: &str) -> String {
        let mut text = raw.trim();
        for prefix in ["Agent:", "Dispatcher:", "agent:", "dispatcher:"] {
            if let Some(rest) = text.strip_prefix(prefix) {
                text = rest.trim();
            }
        }
        if text.len() >= 2 && text.starts_with('"') && text.ends_with('"') {
            text = &text[1..text.len() - 1];
        }
        text.trim().to_string()
    }

    fn transcript_text(turns: &[Turn]) -> String {
        turns
            .iter()
            .map(|t| {
                let who = match t.speaker {
                    Speaker::Agent => "Agent",
                    Speaker::Counterparty => "Driver",
                };
                format!("{}: {}", who, t.text)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Pulls a JSON object out of a model reply, tolerating code fences
    /// and leading prose.
    fn parse_json_object(raw: &str) -> Result<BTreeMap<String, Value>> {
        let start = raw
            .find('{')
            .ok_or_else(|| anyhow::anyhow!("no JSON object in extraction reply"))?;
        let end = raw
            .rfind('}')
            .ok_or_else(|| anyhow::anyhow!("unterminated JSON object in extraction reply"))?;
        let parsed: BTreeMap<String, Value> = serde_json::from_str(&raw[start..=end])?;
        Ok(parsed)
    }

    async fn chat(&self, messages: Vec<ChatCompletionRequestMessage>, temperature: f32) -> Result<String> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .max_tokens(200_u32)
            .temperature(temperature)
            .build()?;
        let response = self.client.chat().create(request).await?;
        let choice = response
            .choices
            .first()
            .ok_or_else(|| anyhow::anyhow!("chat completion returned no choices"))?;
        choice
            .message
            .content
            .clone()
            .ok_or_else(|| anyhow::anyhow!("chat completion had no text content"))
    }
}

#[async_trait]
impl UtteranceGenerator for OpenAICompatibleClient {
    async fn generate(
        &self,
        request: &GenerationRequest<'_>,
        timeout: Duration,
    ) -> Result<String, GenerationError> {
        let build = || -> Result<Vec<ChatCompletionRequestMessage>> {
            let mut messages: Vec<ChatCompletionRequestMessage> = vec![
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(Self::system_prompt(request.scenario, request.subject))
                    .build()?
                    .into(),
            ];
            messages.extend(Self::history_messages(request.recent_turns)?);
            messages.push(
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(request.kind.instruction())
                    .build()?
                    .into(),
            );
            Ok(messages)
        };
        let messages = build().map_err(|e| GenerationError::Failed(e.to_string()))?;

        match tokio::time::timeout(timeout, self.chat(messages, 0.7)).await {
            Err(_elapsed) => Err(GenerationError::Timeout),
            Ok(Err(e)) => Err(GenerationError::Failed(e.to_string())),
            Ok(Ok(raw)) => {
                let text = Self::clean_utterance(&raw);
                if text.is_empty() {
                    Err(GenerationError::Failed("empty utterance".to_string()))
                } else {
                    Ok(text)
                }
            }
        }
    }
}

#[async_trait]
impl StructuredExtractor for OpenAICompatibleClient {
    async fn extract(
        &self,
        turns: &[Turn],
        scenario: Scenario,
    ) -> Result<BTreeMap<String, Value>, ExtractionUnavailable> {
        let prompt = format!(
            "Extract structured data from this logistics call transcript.\n\nTRANSCRIPT:\n{}\n\nEXTRACT THE FOLLOWING DATA AS JSON:\n{}\n\nReturn ONLY the JSON object.",
            Self::transcript_text(turns),
            schema_description(scenario),
        );
        let build = || -> Result<Vec<ChatCompletionRequestMessage>> {
            Ok(vec![
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(EXTRACTION_SYSTEM_PROMPT)
                    .build()?
                    .into(),
                ChatCompletionRequestUserMessageArgs::default()
                    .content(prompt.clone())
                    .build()?
                    .into(),
            ])
        };
        let messages = build().map_err(|e| ExtractionUnavailable(e.to_string()))?;

        let raw = self
            .chat(messages, 0.0)
            .await
            .map_err(|e| ExtractionUnavailable(e.to_string()))?;
        Self::parse_json_object(&raw).map_err(|e| ExtractionUnavailable(e.to_string()))
    }
}
