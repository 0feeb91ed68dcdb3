//! The Dialogue Policy Engine.
//!
//! One decision cycle per inbound counterparty turn: update quality
//! streaks, run the precedence ladder (emergency trigger, then noisy /
//! uncooperative / location-conflict overrides), then advance the
//! scenario state machine and produce exactly one utterance. The engine
//! appends both the counterparty turn and its own reply to the session
//! turn log, so the log always alternates in wire order.

use crate::checklist::{self, DriverStatus, FieldKey};
use crate::llm_client::{GenerationRequest, PromptKind, RouteLookup, UtteranceGenerator};
use crate::quality::QualityMonitor;
use crate::session::{
    CallStatus, DialoguePhase, EmergencyStep, EndReason, Scenario, Session, Speaker,
};
use serde_json::Value;
use std::time::Duration;
use tracing::{info, warn};

/// How many trailing turns the generator gets to condition on.
const RECENT_TURN_WINDOW: usize = 6;

/// One outbound reply: the utterance, whether to hang up after it, and
/// whether the call is being handed to a human dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub content: String,
    pub end_call: bool,
    pub transfer: bool,
}

impl Decision {
    fn reply(content: String) -> Self {
        Self {
            content,
            end_call: false,
            transfer: false,
        }
    }

    fn hang_up(content: String) -> Self {
        Self {
            content,
            end_call: true,
            transfer: false,
        }
    }

    fn escalate(content: String) -> Self {
        Self {
            content,
            end_call: true,
            transfer: true,
        }
    }
}

/// Words that make a terse reply still count as an answer ("yes" to
/// "is everyone safe?" must advance the emergency ladder).
const ANSWER_TOKENS: &[&str] = &[
    "yes", "yeah", "yep", "no", "nope", "ok", "okay", "safe", "fine", "sure", "secure", "good",
];

const AFFIRMATIVE_TOKENS: &[&str] = &["yes", "yeah", "yep", "secure", "safe", "fine", "intact", "good", "sure"];
const NEGATIVE_TOKENS: &[&str] = &["no", "not", "nope", "lost", "shifted", "spilled"];

fn emergency_question(step: EmergencyStep) -> &'static str {
    match step {
        EmergencyStep::SafetyCheck => "I understand, let me help you. Is everyone safe right now?",
        EmergencyStep::InjuryCheck => "Is anyone injured or hurt?",
        EmergencyStep::LocationCheck => {
            "What's your exact location? A mile marker or nearest exit helps."
        }
        EmergencyStep::LoadCheck => "Is the load secure?",
        EmergencyStep::Escalating => {
            "I'm connecting you to a human dispatcher now who will coordinate help. Stay safe."
        }
    }
}

/// Maps a free-form yes/no reply to a boolean where possible; falls
/// back to the verbatim text so nothing the driver said is lost.
fn bool_from_reply(text: &str) -> Value {
    let lowered = text.to_lowercase();
    let has = |tokens: &[&str]| {
        tokens
            .iter()
            .any(|t| lowered.split_whitespace().any(|w| w.trim_matches(|c: char| !c.is_alphanumeric()) == *t))
    };
    if has(NEGATIVE_TOKENS) {
        Value::from(false)
    } else if has(AFFIRMATIVE_TOKENS) {
        Value::from(true)
    } else {
        Value::from(text)
    }
}

/// Per-turn decision engine. Stateless apart from its thresholds; all
/// dialogue state lives on the session.
pub struct PolicyEngine {
    pub monitor: QualityMonitor,
    pub generation_timeout: Duration,
}

impl PolicyEngine {
    pub fn new(monitor: QualityMonitor, generation_timeout: Duration) -> Self {
        Self {
            monitor,
            generation_timeout,
        }
    }

    /// The agent speaks first. Canned per scenario; appended to the log.
    pub fn opening_utterance(&self, session: &mut Session) -> String {
        let subject = &session.subject;
        let content = match session.scenario {
            Scenario::Emergency => format!(
                "This is Dispatch calling about an emergency. {}, are you able to talk?",
                subject.driver_name
            ),
            _ => format!(
                "Hi {}, this is Dispatch with a check call on load {}. Can you give me an update on your status?",
                subject.driver_name, subject.load_number
            ),
        };
        session.push_turn(Speaker::Agent, content.clone(), None);
        content
    }

    /// Reminder after prolonged silence. No counterparty turn is
    /// recorded and no checklist state moves.
    pub fn reminder_utterance(&self, session: &mut Session) -> Decision {
        let content = if session.is_emergency() {
            "Are you still there? Can you hear me?".to_string()
        } else {
            format!("{}, are you still there?", session.subject.driver_name)
        };
        session.push_turn(Speaker::Agent, content.clone(), None);
        Decision::reply(content)
    }

    /// Forced wrap-up when the per-call maximum duration is exceeded.
    pub fn max_duration_decision(&self, session: &mut Session) -> Decision {
        session.mark_for_end(EndReason::MaxDuration);
        let content = format!(
            "I have to wrap up for now, {}. A dispatcher will follow up with you shortly. Drive safe!",
            session.subject.driver_name
        );
        session.push_turn(Speaker::Agent, content.clone(), None);
        Decision::hang_up(content)
    }

    /// Runs one full decision cycle for an inbound counterparty turn.
    pub async fn on_counterparty_turn(
        &self,
        session: &mut Session,
        generator: &dyn UtteranceGenerator,
        routes: &dyn RouteLookup,
        text: &str,
        confidence: Option<f32>,
    ) -> Decision {
        session.push_turn(Speaker::Counterparty, text, confidence);
        let turn = session
            .turns()
            .last()
            .expect("turn was just appended")
            .clone();
        let quality = self.monitor.observe(session, &turn);

        // Safety-first precedence: a life-safety signal always wins.
        if !session.is_emergency() && self.contains_emergency_phrase(session, text) {
            info!(call_id = %session.call_id, "emergency trigger phrase detected");
            session.switch_to_emergency();
            session.set_field("emergency_type", Value::from(classify_emergency_type(text)));
            let content = emergency_question(EmergencyStep::SafetyCheck).to_string();
            session.push_turn(Speaker::Agent, content.clone(), None);
            return Decision::reply(content);
        }

        // Noisy environment: repeated unreliable audio escalates to a
        // human; a single bad turn just gets a repeat request.
        if quality.is_low_confidence {
            if session.clarification_streak >= 3 {
                info!(call_id = %session.call_id, "escalating due to persistent noise");
                session.mark_for_end(EndReason::PoorConnection);
                session.status = CallStatus::Escalated;
                let content = "I'm having trouble hearing you clearly. Let me have a human dispatcher call you back on a better line.".to_string();
                session.push_turn(Speaker::Agent, content.clone(), None);
                return Decision::escalate(content);
            }
            let content = "I didn't quite catch that. Could you repeat that for me?".to_string();
            session.push_turn(Speaker::Agent, content.clone(), None);
            return Decision::reply(content);
        }

        // Uncooperative driver: probe twice, then let them go.
        if session.terse_streak >= 5 {
            info!(call_id = %session.call_id, "ending call: unresponsive driver");
            session.set_field("call_outcome", Value::from("Unresponsive"));
            session.mark_for_end(EndReason::UnresponsiveDriver);
            session.status = CallStatus::Completed;
            let content = "I'll let you go for now. Please call dispatch back when you have a moment. Drive safe!".to_string();
            session.push_turn(Speaker::Agent, content.clone(), None);
            return Decision::hang_up(content);
        }
        if session.terse_streak == 3 || session.terse_streak == 4 {
            let content = if session.terse_streak == 3 {
                "I need a bit more detail to update the system. Can you give me a few more specifics?"
            } else {
                "I know you're busy, but I just need a little more information real quick."
            };
            session.push_turn(Speaker::Agent, content.to_string(), None);
            return Decision::reply(content.to_string());
        }

        if session.is_emergency() {
            self.advance_emergency(session, text, quality.is_terse)
        } else {
            self.advance_check_in(session, generator, routes, text).await
        }
    }

    fn contains_emergency_phrase(&self, session: &Session, text: &str) -> bool {
        let lowered = text.to_lowercase();
        session
            .emergency_phrases
            .iter()
            .any(|phrase| lowered.contains(phrase.as_str()))
    }

    /// Walks the fixed emergency ladder. Evasive answers are re-asked
    /// once and then the ladder advances anyway: an emergency must
    /// never stall on a mumble.
    fn advance_emergency(&self, session: &mut Session, text: &str, is_terse: bool) -> Decision {
        let step = match session.phase {
            DialoguePhase::Emergency(step) => step,
            // A turn arriving after hand-off gets the hand-off statement
            // again, never a restarted ladder.
            DialoguePhase::Closed => {
                let content = emergency_question(EmergencyStep::Escalating).to_string();
                session.push_turn(Speaker::Agent, content.clone(), None);
                return Decision::escalate(content);
            }
            // Trigger mid-call always lands on the ladder before this
            // runs; a non-emergency phase here means the scenario was
            // emergency from call start and the opener was just answered.
            _ => {
                session.phase = DialoguePhase::Emergency(EmergencyStep::SafetyCheck);
                EmergencyStep::SafetyCheck
            }
        };

        let lowered = text.to_lowercase();
        let has_answer_token = ANSWER_TOKENS
            .iter()
            .any(|t| lowered.split_whitespace().any(|w| w.trim_matches(|c: char| !c.is_alphanumeric()) == *t));
        let evasive = text.trim().is_empty() || (is_terse && !has_answer_token);

        if evasive && !session.emergency_reasked {
            session.emergency_reasked = true;
            let content = emergency_question(step).to_string();
            session.push_turn(Speaker::Agent, content.clone(), None);
            return Decision::reply(content);
        }

        if !evasive {
            match step {
                EmergencyStep::SafetyCheck => {
                    session.set_field("safety_status", Value::from(text));
                }
                EmergencyStep::InjuryCheck => {
                    session.set_field("injury_status", Value::from(text));
                }
                EmergencyStep::LocationCheck => {
                    session.set_field("emergency_location", Value::from(text));
                }
                EmergencyStep::LoadCheck => {
                    session.set_field("load_secure", bool_from_reply(text));
                }
                EmergencyStep::Escalating => {}
            }
        }

        session.emergency_reasked = false;
        let next = step.next();
        session.phase = DialoguePhase::Emergency(next);

        if next == EmergencyStep::Escalating {
            session.set_field("call_outcome", Value::from("Emergency Escalation"));
            session.set_field("escalation_status", Value::from("Connected to Human Dispatcher"));
            session.mark_for_end(EndReason::EmergencyEscalation);
            session.status = CallStatus::Escalated;
            session.phase = DialoguePhase::Closed;
            let content = emergency_question(EmergencyStep::Escalating).to_string();
            session.push_turn(Speaker::Agent, content.clone(), None);
            return Decision::escalate(content);
        }

        let content = emergency_question(next).to_string();
        session.push_turn(Speaker::Agent, content.clone(), None);
        Decision::reply(content)
    }

    /// The check-in machine: classify status, then work the checklist
    /// one field per turn with topic continuity.
    async fn advance_check_in(
        &self,
        session: &mut Session,
        generator: &dyn UtteranceGenerator,
        routes: &dyn RouteLookup,
        text: &str,
    ) -> Decision {
        // An outstanding location confirmation is accepted verbatim and
        // never re-argued.
        if session.location_confirm_pending {
            session.location_confirm_pending = false;
            session.set_field("current_location", Value::from(text));
            session.set_field("location_discrepancy", Value::from(true));
            return self.next_checklist_question(session, generator, text).await;
        }

        let status = match session.phase {
            DialoguePhase::Gathering(status) => status,
            DialoguePhase::Open => match checklist::classify_status(text) {
                Some(status) => {
                    session.set_field("driver_status", Value::from(status.label()));
                    session.phase = DialoguePhase::Gathering(status);
                    status
                }
                None => {
                    let content = self.ask(session, generator, PromptKind::ClarifyStatus).await;
                    session.push_turn(Speaker::Agent, content.clone(), None);
                    return Decision::reply(content);
                }
            },
            // Closed or stale emergency phase: nothing left to gather.
            _ => {
                let content = self.closing_utterance(session);
                session.mark_for_end(EndReason::ConversationComplete);
                session.status = CallStatus::Completed;
                session.push_turn(Speaker::Agent, content.clone(), None);
                return Decision::hang_up(content);
            }
        };

        // Record the answer to whatever the agent asked last turn, then
        // any additional field the utterance clearly speaks to.
        if let Some(field) = session.pending_field.take() {
            let value = match field {
                FieldKey::PodReminder => Value::from(true),
                _ => Value::from(text),
            };
            session.set_field(field.name(), value);
        }
        if let Some(field) = checklist::implied_field(text) {
            if checklist::required_fields(status).contains(&field) && !session.field_filled(field.name()) {
                let value = match field {
                    FieldKey::PodReminder => Value::from(true),
                    _ => Value::from(text),
                };
                session.set_field(field.name(), value);
            }
        }

        // Location-conflict probe, at most once per call, check-in only.
        if session.scenario == Scenario::CheckIn
            && !session.location_checked
            && session.field_filled("current_location")
        {
            session.location_checked = true;
            if let Some(corridor) = routes.expected_route(&session.subject).await {
                let stated = session
                    .extracted()
                    .get("current_location")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                if !corridor.mentions(&stated) {
                    info!(call_id = %session.call_id, %stated, "stated location off the expected corridor");
                    session.location_confirm_pending = true;
                    let content = self.ask(session, generator, PromptKind::ConfirmLocation).await;
                    session.push_turn(Speaker::Agent, content.clone(), None);
                    return Decision::reply(content);
                }
            }
        }

        self.next_checklist_question(session, generator, text).await
    }

    /// Asks for the next unanswered field, or closes the call when the
    /// checklist is complete.
    async fn next_checklist_question(
        &self,
        session: &mut Session,
        generator: &dyn UtteranceGenerator,
        latest_text: &str,
    ) -> Decision {
        let status = match session.phase {
            DialoguePhase::Gathering(status) => status,
            _ => DriverStatus::Driving,
        };
        let fields = checklist::required_fields(status);

        let next_field = checklist::implied_field(latest_text)
            .filter(|f| fields.contains(f) && !session.field_filled(f.name()))
            .or_else(|| {
                fields
                    .iter()
                    .copied()
                    .find(|f| !session.field_filled(f.name()))
            });

        match next_field {
            Some(field) => {
                let content = self.ask(session, generator, PromptKind::AskField(field)).await;
                session.pending_field = Some(field);
                session.push_turn(Speaker::Agent, content.clone(), None);
                Decision::reply(content)
            }
            None => {
                let outcome = match status {
                    DriverStatus::Driving | DriverStatus::Delayed => "In-Transit Update",
                    DriverStatus::Arrived | DriverStatus::Unloading => "Arrival Confirmation",
                };
                session.set_field("call_outcome", Value::from(outcome));
                session.mark_for_end(EndReason::ConversationComplete);
                session.status = CallStatus::Completed;
                session.phase = DialoguePhase::Closed;
                let content = self.closing_utterance(session);
                session.push_turn(Speaker::Agent, content.clone(), None);
                Decision::hang_up(content)
            }
        }
    }

    fn closing_utterance(&self, session: &Session) -> String {
        format!(
            "Perfect. Thanks for the update, {}. Drive safe!",
            session.subject.driver_name
        )
    }

    /// Calls the generator with the canned fallback on failure. The
    /// pending field is untouched on fallback, so the same question is
    /// simply re-asked in canned form.
    async fn ask(
        &self,
        session: &Session,
        generator: &dyn UtteranceGenerator,
        kind: PromptKind,
    ) -> String {
        let turns = session.turns();
        let start = turns.len().saturating_sub(RECENT_TURN_WINDOW);
        let request = GenerationRequest {
            kind,
            scenario: session.scenario,
            subject: &session.subject,
            recent_turns: &turns[start..],
        };
        match generator.generate(&request, self.generation_timeout).await {
            Ok(text) => text,
            Err(e) => {
                warn!(call_id = %session.call_id, error = %e, "utterance generation failed, using canned fallback");
                kind.canned_fallback()
            }
        }
    }
}

fn classify_emergency_type(text: &str) -> &'static str {
    let lowered = text.to_lowercase();
    let has = |words: &[&str]| words.iter().any(|w| lowered.contains(w));
    if has(&["accident", "crash", "collision", "wreck"]) {
        "Accident"
    } else if has(&["medical", "ambulance", "hospital", "injured", "hurt"]) {
        "Medical"
    } else if has(&["blowout", "breakdown", "can't drive"]) {
        "Breakdown"
    } else {
        "Other"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm_client::{GenerationError, NoRouteLookup, RouteCorridor};
    use crate::session::Subject;
    use async_trait::async_trait;

    /// Deterministic generator: always succeeds with a recognizable
    /// utterance for the requested kind.
    struct EchoGenerator;

    #[async_trait]
    impl UtteranceGenerator for EchoGenerator {
        async fn generate(
            &self,
            request: &GenerationRequest<'_>,
            _timeout: Duration,
        ) -> Result<String, GenerationError> {
            Ok(request.kind.canned_fallback())
        }
    }

    /// Generator that always fails, exercising the fallback path.
    struct FailingGenerator;

    #[async_trait]
    impl UtteranceGenerator for FailingGenerator {
        async fn generate(
            &self,
            _request: &GenerationRequest<'_>,
            _timeout: Duration,
        ) -> Result<String, GenerationError> {
            Err(GenerationError::Timeout)
        }
    }

    struct FixedRoute(RouteCorridor);

    #[async_trait]
    impl RouteLookup for FixedRoute {
        async fn expected_route(&self, _subject: &Subject) -> Option<RouteCorridor> {
            Some(self.0.clone())
        }
    }

    fn engine() -> PolicyEngine {
        PolicyEngine::new(QualityMonitor::default(), Duration::from_millis(50))
    }

    fn session() -> Session {
        Session::new(
            "c-1".into(),
            Scenario::CheckIn,
            Subject {
                driver_name: "Mike".into(),
                load_number: "7891-B".into(),
                phone_number: None,
            },
        )
    }

    async fn say(engine: &PolicyEngine, s: &mut Session, text: &str) -> Decision {
        engine
            .on_counterparty_turn(s, &EchoGenerator, &NoRouteLookup, text, Some(0.95))
            .await
    }

    #[tokio::test]
    async fn opening_utterance_speaks_first() {
        let eng = engine();
        let mut s = session();
        let opening = eng.opening_utterance(&mut s);
        assert!(opening.contains("Mike"));
        assert!(opening.contains("7891-B"));
        assert_eq!(s.turns().len(), 1);
        assert_eq!(s.turns()[0].speaker, Speaker::Agent);
    }

    #[tokio::test]
    async fn check_in_happy_path_fills_checklist_and_closes() {
        let eng = engine();
        let mut s = session();
        eng.opening_utterance(&mut s);

        let d1 = say(&eng, &mut s, "I'm driving on I-10 near Indio").await;
        assert!(!d1.end_call);
        assert_eq!(s.extracted()["driver_status"], Value::from("Driving"));
        assert!(
            s.extracted()["current_location"]
                .as_str()
                .unwrap()
                .contains("Indio")
        );

        let d2 = say(&eng, &mut s, "ETA tomorrow 8am").await;
        assert!(!d2.end_call);
        assert!(s.extracted()["eta"].as_str().unwrap().contains("8"));

        let d3 = say(&eng, &mut s, "no issues at all").await;
        assert!(d3.end_call);
        assert_eq!(s.extracted()["call_outcome"], Value::from("In-Transit Update"));
        assert_eq!(s.end_reason, Some(EndReason::ConversationComplete));
        assert_eq!(s.status, CallStatus::Completed);
    }

    #[tokio::test]
    async fn emergency_trigger_preempts_checklist() {
        let eng = engine();
        let mut s = session();
        eng.opening_utterance(&mut s);

        say(&eng, &mut s, "driving to Phoenix").await;
        assert_eq!(s.scenario, Scenario::CheckIn);

        let d = say(&eng, &mut s, "I just had a blowout!").await;
        assert_eq!(s.scenario, Scenario::Emergency);
        assert_eq!(d.content, emergency_question(EmergencyStep::SafetyCheck));
        assert!(!d.end_call);
        assert_eq!(s.extracted()["emergency_type"], Value::from("Breakdown"));
    }

    #[tokio::test]
    async fn emergency_ladder_walks_in_order_and_escalates() {
        let eng = engine();
        let mut s = session();
        eng.opening_utterance(&mut s);
        say(&eng, &mut s, "there's been an accident on the highway").await;

        let d = say(&eng, &mut s, "yes everyone is safe").await;
        assert_eq!(d.content, emergency_question(EmergencyStep::InjuryCheck));

        let d = say(&eng, &mut s, "no injuries at all").await;
        assert_eq!(d.content, emergency_question(EmergencyStep::LocationCheck));

        let d = say(&eng, &mut s, "I-15 North, mile marker 123").await;
        assert_eq!(d.content, emergency_question(EmergencyStep::LoadCheck));

        let d = say(&eng, &mut s, "yes the load is fine").await;
        assert!(d.end_call);
        assert!(d.transfer);
        assert_eq!(s.status, CallStatus::Escalated);
        assert_eq!(s.end_reason, Some(EndReason::EmergencyEscalation));
        assert_eq!(s.extracted()["call_outcome"], Value::from("Emergency Escalation"));
        assert_eq!(
            s.extracted()["escalation_status"],
            Value::from("Connected to Human Dispatcher")
        );
        assert_eq!(s.extracted()["load_secure"], Value::from(true));
        assert!(
            s.extracted()["emergency_location"]
                .as_str()
                .unwrap()
                .contains("mile marker 123")
        );
    }

    #[tokio::test]
    async fn evasive_emergency_answer_reasks_once_then_advances() {
        let eng = engine();
        let mut s = session();
        eng.opening_utterance(&mut s);
        say(&eng, &mut s, "I crashed the truck").await;

        // "huh" is terse with no answer token: re-ask once.
        let d = say(&eng, &mut s, "huh").await;
        assert_eq!(d.content, emergency_question(EmergencyStep::SafetyCheck));
        // Second evasive answer: advance anyway, nothing recorded.
        let d = say(&eng, &mut s, "what").await;
        assert_eq!(d.content, emergency_question(EmergencyStep::InjuryCheck));
        assert!(!s.field_filled("safety_status"));
    }

    #[tokio::test]
    async fn scenario_never_leaves_emergency() {
        let eng = engine();
        let mut s = session();
        eng.opening_utterance(&mut s);
        say(&eng, &mut s, "bad accident here").await;
        say(&eng, &mut s, "yes we are safe and fine").await;
        say(&eng, &mut s, "no injuries, everyone is okay").await;
        assert_eq!(s.scenario, Scenario::Emergency);
        assert_eq!(s.phase, DialoguePhase::Emergency(EmergencyStep::LocationCheck));
    }

    #[tokio::test]
    async fn five_one_word_turns_end_as_unresponsive() {
        let eng = engine();
        let mut s = session();
        eng.opening_utterance(&mut s);

        let mut last = None;
        for word in ["yeah", "fine", "ok", "sure", "yep"] {
            last = Some(say(&eng, &mut s, word).await);
        }
        let d = last.unwrap();
        assert!(d.end_call);
        assert_eq!(s.extracted()["call_outcome"], Value::from("Unresponsive"));
        assert_eq!(s.end_reason, Some(EndReason::UnresponsiveDriver));
    }

    #[tokio::test]
    async fn terse_streak_of_three_probes_for_detail() {
        let eng = engine();
        let mut s = session();
        eng.opening_utterance(&mut s);
        say(&eng, &mut s, "yeah").await;
        say(&eng, &mut s, "fine").await;
        let d = say(&eng, &mut s, "ok").await;
        assert!(d.content.contains("more detail"));
        assert!(!d.end_call);
    }

    #[tokio::test]
    async fn low_confidence_turn_gets_a_repeat_request() {
        let eng = engine();
        let mut s = session();
        eng.opening_utterance(&mut s);
        let d = eng
            .on_counterparty_turn(&mut s, &EchoGenerator, &NoRouteLookup, "krzzt mmph road", Some(0.4))
            .await;
        assert!(d.content.contains("repeat"));
        assert!(!d.end_call);
    }

    #[tokio::test]
    async fn three_low_confidence_turns_escalate_to_human() {
        let eng = engine();
        let mut s = session();
        eng.opening_utterance(&mut s);
        for _ in 0..2 {
            let d = eng
                .on_counterparty_turn(&mut s, &EchoGenerator, &NoRouteLookup, "static noise words", Some(0.3))
                .await;
            assert!(!d.end_call);
        }
        let d = eng
            .on_counterparty_turn(&mut s, &EchoGenerator, &NoRouteLookup, "more static noise", Some(0.3))
            .await;
        assert!(d.end_call);
        assert!(d.transfer);
        assert_eq!(s.status, CallStatus::Escalated);
        assert_eq!(s.end_reason, Some(EndReason::PoorConnection));
    }

    #[tokio::test]
    async fn location_conflict_confirms_once_and_accepts_the_answer() {
        let eng = engine();
        let mut s = session();
        eng.opening_utterance(&mut s);
        let routes = FixedRoute(RouteCorridor {
            origin: "Barstow, CA".into(),
            destination: "Phoenix, AZ".into(),
            waypoints: vec!["Needles, CA".into(), "Kingman, AZ".into()],
        });

        let d = eng
            .on_counterparty_turn(
                &mut s,
                &EchoGenerator,
                &routes,
                "I'm driving on I-5 near Sacramento",
                Some(0.95),
            )
            .await;
        assert!(d.content.contains("confirm your current location"));
        assert!(s.location_confirm_pending);

        // Whatever the driver answers is accepted verbatim, flagged,
        // and never re-argued.
        let d = eng
            .on_counterparty_turn(&mut s, &EchoGenerator, &routes, "I said near Sacramento", Some(0.95))
            .await;
        assert!(!d.content.contains("confirm your current location"));
        assert_eq!(
            s.extracted()["current_location"],
            Value::from("I said near Sacramento")
        );
        assert_eq!(s.extracted()["location_discrepancy"], Value::from(true));
    }

    #[tokio::test]
    async fn on_route_location_raises_no_conflict() {
        let eng = engine();
        let mut s = session();
        eng.opening_utterance(&mut s);
        let routes = FixedRoute(RouteCorridor {
            origin: "Barstow, CA".into(),
            destination: "Phoenix, AZ".into(),
            waypoints: vec!["Kingman, AZ".into()],
        });
        let d = eng
            .on_counterparty_turn(
                &mut s,
                &EchoGenerator,
                &routes,
                "I'm driving just past Kingman on I-40",
                Some(0.95),
            )
            .await;
        assert!(!s.location_confirm_pending);
        assert!(!d.content.contains("confirm your current location"));
        assert!(!s.field_filled("location_discrepancy"));
    }

    #[tokio::test]
    async fn generation_failure_falls_back_to_canned_question() {
        let eng = engine();
        let mut s = session();
        eng.opening_utterance(&mut s);
        let d = eng
            .on_counterparty_turn(
                &mut s,
                &FailingGenerator,
                &NoRouteLookup,
                "I'm driving on I-10 near Indio",
                Some(0.95),
            )
            .await;
        // Location was implied, so ETA is the next unanswered field; on
        // generator failure the canned wording is used and the field
        // stays pending for re-ask.
        assert_eq!(d.content, FieldKey::Eta.canned_question());
        assert_eq!(s.pending_field, Some(FieldKey::Eta));
    }

    #[tokio::test]
    async fn arrived_status_works_the_arrival_checklist() {
        let eng = engine();
        let mut s = session();
        eng.opening_utterance(&mut s);

        say(&eng, &mut s, "just arrived at the receiver").await;
        assert_eq!(s.extracted()["driver_status"], Value::from("Arrived"));
        assert_eq!(s.pending_field, Some(FieldKey::UnloadingStatus));

        say(&eng, &mut s, "in door 42, lumper is on it").await;
        assert_eq!(s.pending_field, Some(FieldKey::PodReminder));

        let d = say(&eng, &mut s, "yeah will do, no problem").await;
        assert!(d.end_call);
        assert_eq!(s.extracted()["pod_reminder_acknowledged"], Value::from(true));
        assert_eq!(s.extracted()["call_outcome"], Value::from("Arrival Confirmation"));
    }

    #[tokio::test]
    async fn eta_is_still_asked_when_the_driver_says_i_am() {
        let eng = engine();
        let mut s = session();
        eng.opening_utterance(&mut s);

        // "I am" must not read as a clock time and credit the ETA field.
        say(&eng, &mut s, "I am driving to Phoenix right now").await;
        assert!(!s.field_filled("eta"));
        assert_eq!(s.pending_field, Some(FieldKey::CurrentLocation));

        say(&eng, &mut s, "on I-10 near Indio").await;
        assert_eq!(s.pending_field, Some(FieldKey::Eta));

        let d = say(&eng, &mut s, "about two hours out").await;
        assert!(!d.end_call);
        assert_eq!(s.extracted()["eta"], Value::from("about two hours out"));

        let d = say(&eng, &mut s, "no delays at all").await;
        assert!(d.end_call);
        assert_eq!(s.extracted()["call_outcome"], Value::from("In-Transit Update"));
    }

    #[tokio::test]
    async fn unclassifiable_open_turn_asks_for_clarification() {
        let eng = engine();
        let mut s = session();
        eng.opening_utterance(&mut s);
        let d = say(&eng, &mut s, "well you tell me what's up").await;
        assert_eq!(s.phase, DialoguePhase::Open);
        assert_eq!(d.content, PromptKind::ClarifyStatus.canned_fallback());
    }

    #[tokio::test]
    async fn emergency_scenario_call_starts_on_the_ladder() {
        let eng = engine();
        let mut s = Session::new(
            "c-2".into(),
            Scenario::Emergency,
            Subject {
                driver_name: "Dana".into(),
                load_number: "L-7".into(),
                phone_number: None,
            },
        );
        let opening = eng.opening_utterance(&mut s);
        assert!(opening.contains("emergency"));

        let d = say(&eng, &mut s, "yes I can talk, we are safe").await;
        assert_eq!(d.content, emergency_question(EmergencyStep::InjuryCheck));
        assert_eq!(s.extracted()["safety_status"], Value::from("yes I can talk, we are safe"));
    }

    #[tokio::test]
    async fn reminder_is_scenario_aware_and_never_ends_the_call() {
        let eng = engine();
        let mut s = session();
        let d = eng.reminder_utterance(&mut s);
        assert!(d.content.contains("Mike"));
        assert!(!d.end_call);

        s.switch_to_emergency();
        let d = eng.reminder_utterance(&mut s);
        assert!(d.content.contains("Can you hear me"));
    }

    #[tokio::test]
    async fn max_duration_forces_hang_up() {
        let eng = engine();
        let mut s = session();
        let d = eng.max_duration_decision(&mut s);
        assert!(d.end_call);
        assert_eq!(s.end_reason, Some(EndReason::MaxDuration));
    }
}
