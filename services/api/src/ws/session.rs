//! Manages the WebSocket connection lifecycle for one dispatch call.

use super::protocol::{InboundMessage, OutboundMessage, TranscriptEntry, TranscriptRole};
use crate::state::AppState;
use crate::store::SessionHandle;
use anyhow::Result;
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use dispatch_core::llm_client::{RouteLookup, UtteranceGenerator};
use dispatch_core::policy::{Decision, PolicyEngine};
use dispatch_core::session::{CallStatus, EndReason, Scenario, Session, Subject};
use futures_util::{
    SinkExt, Stream, StreamExt,
    stream::{SplitSink, SplitStream},
};
use tokio::time::{Instant, sleep_until};
use tracing::{Instrument, error, info, instrument, warn};

/// Malformed frames tolerated in a row before the connection is closed.
const MAX_CONSECUTIVE_MALFORMED: u32 = 3;

/// Axum handler to upgrade an HTTP connection to a WebSocket.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Entry point for a new voice-platform connection. Performs the
/// `call_details` handshake, registers the session, then runs the call
/// loop in an instrumented task.
#[instrument(name = "ws_call", skip_all, fields(call_id))]
async fn handle_socket(socket: WebSocket, state: AppState) {
    info!("New WebSocket connection. Awaiting call details...");
    let (mut socket_tx, mut socket_rx) = socket.split();

    // The first parseable frame must be `call_details`.
    let session = match await_call_details(&mut socket_rx).await {
        Ok(Some(session)) => session,
        Ok(None) => {
            info!("Platform disconnected before sending call details.");
            return;
        }
        Err(e) => {
            warn!(error = %e, "Handshake failed; closing connection.");
            let _ = socket_tx.send(Message::Close(None)).await;
            return;
        }
    };

    let call_id = session.call_id.clone();
    tracing::Span::current().record("call_id", call_id.as_str());

    let handle = match state.store.create(session) {
        Ok(handle) => handle,
        Err(e) => {
            error!(error = %e, "Session registration failed; closing connection.");
            let _ = socket_tx.send(Message::Close(None)).await;
            return;
        }
    };

    // The agent speaks first, as reply 0.
    let opening = state.policy.opening_utterance(&mut *handle.lock().await);
    if send_msg(
        &mut socket_tx,
        OutboundMessage::response(0, opening, false, false),
    )
    .await
    .is_err()
    {
        error!("Failed to send opening utterance.");
        finalize_call(&state, &call_id, &handle).await;
        return;
    }

    let call_span = tracing::info_span!("call_runtime", %call_id);
    tokio::spawn(
        async move {
            if let Err(e) =
                run_call_session(&state, socket_tx, socket_rx, &handle, &call_id).await
            {
                error!(error = ?e, "Call session terminated with error.");
            }
            finalize_call(&state, &call_id, &handle).await;
            info!("Call session finished.");
        }
        .instrument(call_span),
    );
}

/// Waits for the handshake frame and builds the session from it.
/// Returns `Ok(None)` if the platform hung up first.
async fn await_call_details(socket_rx: &mut SplitStream<WebSocket>) -> Result<Option<Session>> {
    while let Some(msg_result) = socket_rx.next().await {
        match msg_result? {
            Message::Text(text) => {
                let msg: InboundMessage = serde_json::from_str(&text)
                    .map_err(|e| anyhow::anyhow!("unparseable first frame: {e}"))?;
                let InboundMessage::CallDetails { call } = msg else {
                    anyhow::bail!("first message must be call_details");
                };
                return Ok(Some(session_from_call_details(call)));
            }
            Message::Close(_) => return Ok(None),
            // Ignore pings and other noise before the handshake.
            _ => continue,
        }
    }
    Ok(None)
}

/// Builds the session from the handshake's dispatch variables. Absent
/// variables get neutral defaults so a misconfigured call still runs.
fn session_from_call_details(call: super::protocol::CallStart) -> Session {
    let subject = Subject {
        driver_name: call
            .variables
            .get("driver_name")
            .cloned()
            .unwrap_or_else(|| "Driver".to_string()),
        load_number: call
            .variables
            .get("load_number")
            .cloned()
            .unwrap_or_else(|| "Unknown".to_string()),
        phone_number: call.variables.get("phone_number").cloned(),
    };
    let scenario = call
        .variables
        .get("scenario")
        .map(|s| Scenario::parse(s))
        .unwrap_or(Scenario::CheckIn);
    let mut session = Session::new(call.call_id, scenario, subject);
    // Callers may extend the default trigger lexicon per call.
    if let Some(extra) = call.variables.get("emergency_phrases") {
        session.emergency_phrases.extend(
            extra
                .split(',')
                .map(|p| p.trim().to_lowercase())
                .filter(|p| !p.is_empty()),
        );
    }
    session
}

/// The main event loop for an active call: one decision per
/// `response_required`, nudges on `reminder_required`, and a hard
/// deadline on total call duration.
async fn run_call_session(
    state: &AppState,
    mut socket_tx: SplitSink<WebSocket, Message>,
    mut socket_rx: SplitStream<WebSocket>,
    handle: &SessionHandle,
    call_id: &str,
) -> Result<()> {
    let deadline = Instant::now() + state.config.max_call_duration;
    let mut malformed_streak: u32 = 0;

    loop {
        tokio::select! {
            msg_result = socket_rx.next() => {
                let Some(msg_result) = msg_result else {
                    info!("Platform stream ended.");
                    break;
                };
                let ws_msg = match msg_result {
                    Ok(msg) => msg,
                    Err(e) => {
                        warn!(error = %e, "WebSocket receive error.");
                        break;
                    }
                };
                match ws_msg {
                    Message::Text(text) => {
                        let msg = match serde_json::from_str::<InboundMessage>(&text) {
                            Ok(msg) => msg,
                            Err(e) => {
                                malformed_streak += 1;
                                warn!(error = %e, malformed_streak, "Malformed frame.");
                                if malformed_streak >= MAX_CONSECUTIVE_MALFORMED {
                                    warn!("Too many malformed frames; closing connection.");
                                    let _ = socket_tx.send(Message::Close(None)).await;
                                    break;
                                }
                                continue;
                            }
                        };
                        malformed_streak = 0;
                        match msg {
                            InboundMessage::ResponseRequired { response_id, transcript } => {
                                // Every request gets exactly one reply; with no
                                // user turn to react to, nudge instead.
                                let Some((turn_text, confidence)) = current_counterparty_turn(&transcript) else {
                                    warn!(response_id, "response_required without a user turn.");
                                    let decision = {
                                        let mut session = handle.lock().await;
                                        state.policy.reminder_utterance(&mut session)
                                    };
                                    send_decision(&mut socket_tx, response_id, decision).await?;
                                    continue;
                                };
                                let decision = decide_or_cancel(
                                    &state.policy,
                                    state.generator.as_ref(),
                                    state.routes.as_ref(),
                                    handle,
                                    &mut socket_rx,
                                    &turn_text,
                                    confidence,
                                )
                                .await;
                                let Some(decision) = decision else {
                                    info!("Platform hung up mid-decision; cancelling generation.");
                                    break;
                                };
                                let hang_up = decision.end_call;
                                send_decision(&mut socket_tx, response_id, decision).await?;
                                if hang_up {
                                    info!(call_id, "Decision ended the call.");
                                    break;
                                }
                            }
                            InboundMessage::ReminderRequired { response_id } => {
                                let decision = {
                                    let mut session = handle.lock().await;
                                    state.policy.reminder_utterance(&mut session)
                                };
                                send_decision(&mut socket_tx, response_id, decision).await?;
                            }
                            InboundMessage::UpdateOnly => {}
                            InboundMessage::CallEnded => {
                                info!("Platform reported call ended.");
                                break;
                            }
                            InboundMessage::CallDetails { .. } => {
                                warn!("Duplicate call_details mid-call; ignoring.");
                            }
                        }
                    }
                    Message::Close(_) => {
                        info!("Platform sent close frame.");
                        break;
                    }
                    Message::Ping(_) | Message::Pong(_) | Message::Binary(_) => {}
                }
            }
            _ = sleep_until(deadline) => {
                info!("Maximum call duration reached; forcing wrap-up.");
                let decision = {
                    let mut session = handle.lock().await;
                    state.policy.max_duration_decision(&mut session)
                };
                // Reminder-style frames carry no request id; 0 is the
                // agent-initiated channel.
                send_decision(&mut socket_tx, 0, decision).await?;
                break;
            }
        }
    }
    Ok(())
}

/// The counterparty's current turn: every user entry after the last
/// agent entry, oldest first. Transcription may split one reply across
/// several entries, so they are joined into a single turn; confidence
/// is the lowest of the segments.
fn current_counterparty_turn(transcript: &[TranscriptEntry]) -> Option<(String, Option<f32>)> {
    let tail_start = transcript
        .iter()
        .rposition(|e| e.role == TranscriptRole::Agent)
        .map_or(0, |i| i + 1);
    let segments: Vec<&TranscriptEntry> = transcript[tail_start..]
        .iter()
        .filter(|e| e.role == TranscriptRole::User)
        .collect();
    let text = segments
        .iter()
        .map(|e| e.content.trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    if text.is_empty() {
        return None;
    }
    let confidence = segments.iter().filter_map(|e| e.confidence).reduce(f32::min);
    Some((text, confidence))
}

/// Runs one policy decision cycle, racing it against the socket so a
/// platform hang-up aborts an in-flight generation instead of waiting
/// it out. `None` means the connection is gone and the call should
/// finalize with whatever state exists.
async fn decide_or_cancel<S>(
    policy: &PolicyEngine,
    generator: &dyn UtteranceGenerator,
    routes: &dyn RouteLookup,
    handle: &SessionHandle,
    socket_rx: &mut S,
    turn_text: &str,
    confidence: Option<f32>,
) -> Option<Decision>
where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let mut session = handle.lock().await;
    let cycle = policy.on_counterparty_turn(&mut session, generator, routes, turn_text, confidence);
    tokio::pin!(cycle);
    loop {
        tokio::select! {
            decision = &mut cycle => return Some(decision),
            frame = socket_rx.next() => match frame {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => return None,
                Some(Ok(Message::Text(raw))) => {
                    if matches!(
                        serde_json::from_str::<InboundMessage>(&raw),
                        Ok(InboundMessage::CallEnded)
                    ) {
                        return None;
                    }
                    // Strict request/reply ordering: no new request is
                    // owed before this reply goes out.
                    warn!("Frame received mid-decision; ignoring.");
                }
                Some(Ok(_)) => {}
            },
        }
    }
}

async fn send_decision(
    socket_tx: &mut SplitSink<WebSocket, Message>,
    response_id: u64,
    decision: Decision,
) -> Result<()> {
    send_msg(
        socket_tx,
        OutboundMessage::response(
            response_id,
            decision.content,
            decision.end_call,
            decision.transfer,
        ),
    )
    .await
}

/// Serializes and sends one outbound frame.
async fn send_msg(socket_tx: &mut SplitSink<WebSocket, Message>, msg: OutboundMessage) -> Result<()> {
    let serialized = serde_json::to_string(&msg)?;
    socket_tx.send(Message::Text(serialized.into())).await?;
    Ok(())
}

/// Runs once per call, however the connection ended: settles the final
/// status, bridges extraction, persists the record, and evicts the
/// session from the store.
async fn finalize_call(state: &AppState, call_id: &str, handle: &SessionHandle) {
    {
        let mut session = handle.lock().await;
        if session.status == CallStatus::Active {
            if session.end_reason.is_some() {
                session.status = CallStatus::Completed;
            } else {
                session.mark_for_end(EndReason::Abandoned);
                session.status = CallStatus::Abandoned;
            }
        }

        if let Err(e) =
            dispatch_core::extraction::finalize(state.extractor.as_ref(), &mut session).await
        {
            // The record still goes out with the raw turn log.
            warn!(error = %e, "Final extraction unavailable; persisting partial record.");
        }

        let record = session.record();
        if let Err(e) = state.record_sink.persist(&record).await {
            error!(error = ?e, "Failed to persist call record.");
        }
    }

    if let Err(e) = state.store.remove(call_id) {
        warn!(error = %e, "Session already evicted.");
    }
}
