//! JSON wire protocol for the signaling WebSocket.
//!
//! Every control message is a text frame carrying `{"type": ..., "payload": ...}`.
//! Binary frames bypass the envelope entirely and carry raw audio samples.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::signaling::calls;
use crate::state::AppState;
use crate::translation::coordinator;
use crate::translation::settings::TranslationSettings;
use crate::ws::ConnectionSender;

/// Messages accepted from clients. The `type` tag is kebab-case on the wire,
/// payload fields are camelCase.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum ClientMessage {
    Register(RegisterRequest),
    Call(CallRequest),
    Answer(AnswerRequest),
    IceCandidate(IceCandidateRequest),
    Hangup(HangupRequest),
    TranslationSettings(TranslationSettingsRequest),
    ToggleTranslation(ToggleTranslationRequest),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub user_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRequest {
    pub target_user_id: String,
    #[serde(default)]
    pub call_type: CallType,
    pub offer: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerRequest {
    pub room_id: String,
    pub accepted: bool,
    #[serde(default)]
    pub answer: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidateRequest {
    pub room_id: String,
    pub candidate: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HangupRequest {
    pub room_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationSettingsRequest {
    pub source_language: Option<String>,
    pub target_language: Option<String>,
    pub voice: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleTranslationRequest {
    pub room_id: String,
    pub enabled: bool,
}

/// Call media kind, relayed to the callee so the UI can pick its layout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallType {
    #[default]
    Audio,
    Video,
}

/// Messages produced by the server. Mirrors `ClientMessage` envelope framing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum ServerMessage {
    Register(RegisterAck),
    CallInitiated(CallInitiated),
    IncomingCall(IncomingCall),
    CallAccepted(CallAccepted),
    CallRejected(CallRejected),
    IceCandidate(IceCandidateEvent),
    Hangup(HangupEvent),
    UserDisconnected(UserDisconnected),
    TranslationSettingsUpdated(TranslationSettingsUpdated),
    TranslationToggled(TranslationToggled),
    TranslationStateChanged(TranslationStateChanged),
    TranslationResult(TranslationResult),
    Error(ErrorMessage),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterAck {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallInitiated {
    pub target_user_id: String,
    pub room_id: String,
    pub call_type: CallType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingCall {
    pub caller_id: String,
    pub room_id: String,
    pub call_type: CallType,
    pub offer: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallAccepted {
    pub room_id: String,
    pub answer: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRejected {
    pub room_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidateEvent {
    pub room_id: String,
    pub candidate: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HangupEvent {
    pub room_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDisconnected {
    pub room_id: String,
    pub user_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationSettingsUpdated {
    pub success: bool,
    pub settings: TranslationSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationToggled {
    pub success: bool,
    pub room_id: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationStateChanged {
    pub room_id: String,
    pub user_id: String,
    pub translating: bool,
}

/// Transcript or translated text pushed to the speaker's peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationResult {
    pub kind: ResultKind,
    pub user_id: String,
    pub text: String,
    #[serde(rename = "final")]
    pub is_final: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultKind {
    Transcript,
    Translation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorMessage {
    pub message: String,
}

/// Serialize a server message and queue it on a connection's channel.
/// Send failures mean the connection is already gone; nothing to do about them.
pub fn send_message(tx: &ConnectionSender, msg: &ServerMessage) {
    if let Ok(text) = serde_json::to_string(msg) {
        let _ = tx.send(axum::extract::ws::Message::Text(text.into()));
    }
}

/// Like [`send_message`], but reports whether the message was queued. Used
/// where delivery failure changes the protocol outcome (e.g. a vanished
/// callee aborts call setup).
pub fn try_send_message(tx: &ConnectionSender, msg: &ServerMessage) -> bool {
    match serde_json::to_string(msg) {
        Ok(text) => tx
            .send(axum::extract::ws::Message::Text(text.into()))
            .is_ok(),
        Err(_) => false,
    }
}

/// Send an `error{message}` envelope to a connection.
pub fn send_error(tx: &ConnectionSender, message: &str) {
    send_message(
        tx,
        &ServerMessage::Error(ErrorMessage {
            message: message.to_string(),
        }),
    );
}

/// Handle an incoming text (JSON) frame: decode the envelope and dispatch.
///
/// Every message except `register` requires the connection to be bound to a
/// user id in the connection registry.
pub async fn handle_text_message(
    text: &str,
    tx: &ConnectionSender,
    state: &AppState,
    conn_id: &str,
) {
    let message: ClientMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => {
            tracing::debug!(conn_id = %conn_id, error = %e, "Failed to decode client envelope");
            send_error(tx, "Unrecognized or malformed message");
            return;
        }
    };

    let message = match message {
        ClientMessage::Register(req) => {
            calls::handle_register(state, conn_id, tx, req).await;
            return;
        }
        other => other,
    };

    let user_id = match state.registry.reverse_resolve(conn_id) {
        Some(id) => id,
        None => {
            send_error(tx, "You are not registered");
            return;
        }
    };

    match message {
        ClientMessage::Register(_) => {}
        ClientMessage::Call(req) => calls::handle_call(state, &user_id, tx, req),
        ClientMessage::Answer(req) => calls::handle_answer(state, &user_id, tx, req),
        ClientMessage::IceCandidate(req) => calls::handle_ice_candidate(state, &user_id, tx, req),
        ClientMessage::Hangup(req) => calls::handle_hangup(state, &user_id, tx, req),
        ClientMessage::TranslationSettings(req) => {
            let settings = TranslationSettings::merged(req);
            coordinator::handle_translation_settings(state, &user_id, tx, settings);
        }
        ClientMessage::ToggleTranslation(req) => {
            coordinator::handle_toggle_translation(state, &user_id, tx, req);
        }
    }
}
