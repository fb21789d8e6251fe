//! Translation session coordination.
//!
//! Owns per-user settings, per-user backend sessions, and per-room enable
//! flags. Session setup talks to the external backend and therefore never
//! runs inside a connection's message loop: it is dispatched as a background
//! task whose completion delivers the acknowledgement envelope. The call
//! state machine never branches on backend availability — that decision
//! lives entirely here.

use bytes::Bytes;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::signaling::registry::ConnectionRegistry;
use crate::signaling::rooms::RoomManager;
use crate::state::AppState;
use crate::translation::connector::{
    ConnectorError, SessionEvent, SessionHandle, TranslationConnector,
};
use crate::translation::settings::TranslationSettings;
use crate::ws::protocol::{
    self, ResultKind, ServerMessage, ToggleTranslationRequest, TranslationResult,
    TranslationSettingsUpdated, TranslationStateChanged, TranslationToggled,
};
use crate::ws::ConnectionSender;

/// Per-room translation flags. `enabled` is the OR of the participant flags;
/// participant keys are always a subset of the room's members.
#[derive(Debug, Default)]
pub struct RoomTranslationState {
    pub enabled: bool,
    pub per_participant: HashMap<String, bool>,
}

struct ActiveSession {
    settings: TranslationSettings,
    room_id: Option<String>,
    handle: SessionHandle,
}

/// Owner of all translation state, keyed by user id and room id.
pub struct TranslationCoordinator {
    connector: Arc<dyn TranslationConnector>,
    registry: Arc<ConnectionRegistry>,
    rooms: Arc<RoomManager>,
    settings: DashMap<String, TranslationSettings>,
    sessions: DashMap<String, ActiveSession>,
    room_state: Arc<DashMap<String, RoomTranslationState>>,
}

impl TranslationCoordinator {
    pub fn new(
        connector: Arc<dyn TranslationConnector>,
        registry: Arc<ConnectionRegistry>,
        rooms: Arc<RoomManager>,
    ) -> Self {
        Self {
            connector,
            registry,
            rooms,
            settings: DashMap::new(),
            sessions: DashMap::new(),
            room_state: Arc::new(DashMap::new()),
        }
    }

    pub fn available(&self) -> bool {
        self.connector.available()
    }

    /// Stored settings for a user, or the defaults when never configured.
    pub fn settings_for(&self, user_id: &str) -> TranslationSettings {
        self.settings
            .get(user_id)
            .map(|s| s.value().clone())
            .unwrap_or_default()
    }

    pub fn store_settings(&self, user_id: &str, settings: TranslationSettings) {
        self.settings.insert(user_id.to_string(), settings);
    }

    pub fn has_session(&self, user_id: &str) -> bool {
        self.sessions.contains_key(user_id)
    }

    /// Make sure the user has a live session matching their current settings.
    ///
    /// Idempotent: a session whose settings already match is reused. A
    /// mismatched one is replaced; dropping the old handle shuts it down.
    pub async fn ensure_session(&self, user_id: &str) -> Result<(), ConnectorError> {
        let desired = self.settings_for(user_id);
        let prior_room = match self.sessions.get(user_id) {
            Some(session) if session.settings == desired => return Ok(()),
            Some(session) => session.room_id.clone(),
            None => None,
        };

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let handle = self
            .connector
            .open_session(user_id, &desired, events_tx)
            .await?;
        self.spawn_event_pump(user_id, events_rx);
        self.sessions.insert(
            user_id.to_string(),
            ActiveSession {
                settings: desired,
                room_id: prior_room,
                handle,
            },
        );
        Ok(())
    }

    /// Tag the user's session with the room it is translating for.
    pub fn tag_session(&self, user_id: &str, room_id: &str) {
        if let Some(mut session) = self.sessions.get_mut(user_id) {
            session.room_id = Some(room_id.to_string());
        }
    }

    /// Tear down the user's session, closing any live streaming connection.
    /// Best-effort by construction: dropping the handle does the work.
    pub fn close_session(&self, user_id: &str) {
        if self.sessions.remove(user_id).is_some() {
            tracing::debug!(user_id = %user_id, "Translation session closed");
        }
    }

    /// Set a participant's translating flag, auto-creating the room state if
    /// the room predates translation availability.
    pub fn set_participant(&self, room_id: &str, user_id: &str, enabled: bool) {
        let mut state = self.room_state.entry(room_id.to_string()).or_default();
        state.per_participant.insert(user_id.to_string(), enabled);
        state.enabled = state.per_participant.values().any(|v| *v);
    }

    /// Revert a participant's flag after a failed or cancelled activation.
    /// Unlike [`set_participant`], never resurrects state for a dead room.
    pub fn revert_participant(&self, room_id: &str, user_id: &str) {
        if let Some(mut state) = self.room_state.get_mut(room_id) {
            state.per_participant.insert(user_id.to_string(), false);
            state.enabled = state.per_participant.values().any(|v| *v);
        }
    }

    /// Whether audio from this user should reach the backend: both the
    /// room-level flag and the user's own flag must be on.
    pub fn translating(&self, room_id: &str, user_id: &str) -> bool {
        self.room_state
            .get(room_id)
            .map(|st| st.enabled && st.per_participant.get(user_id).copied().unwrap_or(false))
            .unwrap_or(false)
    }

    /// Room-creation hook: seed the per-room flags for both members.
    pub fn create_room_state(&self, room_id: &str, members: &[String; 2]) {
        let mut per_participant = HashMap::new();
        for member in members {
            per_participant.insert(member.clone(), false);
        }
        self.room_state.insert(
            room_id.to_string(),
            RoomTranslationState {
                enabled: false,
                per_participant,
            },
        );
    }

    /// Room-destruction hook: drop the room flags and tear down both members'
    /// sessions. The next call re-provisions from stored settings.
    pub fn release_room(&self, room_id: &str, members: &[String; 2]) {
        self.room_state.remove(room_id);
        for member in members {
            if self.sessions.remove(member).is_some() {
                tracing::debug!(
                    user_id = %member,
                    room_id = %room_id,
                    "Translation session released with room"
                );
            }
        }
    }

    /// Forward one raw audio frame to the speaker's session.
    ///
    /// Silently drops the frame unless the speaker is in a room with both
    /// translation flags on and a live session — the steady-state path when
    /// translation is off, not an error.
    pub fn route_audio(&self, user_id: &str, frame: Bytes) {
        let Some(room_id) = self.rooms.room_of(user_id) else {
            return;
        };
        if !self.translating(&room_id, user_id) {
            return;
        }
        if let Some(session) = self.sessions.get(user_id) {
            if !session.handle.push_audio(frame) {
                tracing::debug!(user_id = %user_id, "Dropped audio frame for closed session");
            }
        }
    }

    /// Consume a session's event stream and fan results out to the speaker's
    /// peer. The pump ends when the session's event channel closes.
    fn spawn_event_pump(&self, user_id: &str, mut rx: mpsc::UnboundedReceiver<SessionEvent>) {
        let registry = self.registry.clone();
        let rooms = self.rooms.clone();
        let room_state = self.room_state.clone();
        let user = user_id.to_string();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    SessionEvent::Transcript { text, is_final } => {
                        deliver_result(
                            &registry,
                            &rooms,
                            &room_state,
                            &user,
                            ResultKind::Transcript,
                            text,
                            is_final,
                        );
                    }
                    SessionEvent::Translation { text, is_final } => {
                        deliver_result(
                            &registry,
                            &rooms,
                            &room_state,
                            &user,
                            ResultKind::Translation,
                            text,
                            is_final,
                        );
                    }
                    SessionEvent::Audio(frame) => {
                        if let Some(peer_tx) = peer_route(&registry, &rooms, &room_state, &user) {
                            let _ = peer_tx.send(axum::extract::ws::Message::Binary(frame));
                        }
                    }
                    SessionEvent::Error(message) => {
                        tracing::warn!(
                            user_id = %user,
                            error = %message,
                            "Translation backend reported an error"
                        );
                    }
                    SessionEvent::Closed => {
                        tracing::debug!(user_id = %user, "Translation session stream closed");
                    }
                }
            }
        });
    }
}

/// Resolve the connection of the speaker's peer, gated on the speaker still
/// translating in a live room. None means the event is dropped.
fn peer_route(
    registry: &ConnectionRegistry,
    rooms: &RoomManager,
    room_state: &DashMap<String, RoomTranslationState>,
    user_id: &str,
) -> Option<ConnectionSender> {
    let room_id = rooms.room_of(user_id)?;
    let translating = room_state
        .get(&room_id)
        .map(|st| st.enabled && st.per_participant.get(user_id).copied().unwrap_or(false))
        .unwrap_or(false);
    if !translating {
        return None;
    }
    let peer = rooms.other_member(&room_id, user_id)?;
    registry.resolve(&peer)
}

fn deliver_result(
    registry: &ConnectionRegistry,
    rooms: &RoomManager,
    room_state: &DashMap<String, RoomTranslationState>,
    user_id: &str,
    kind: ResultKind,
    text: String,
    is_final: bool,
) {
    if let Some(peer_tx) = peer_route(registry, rooms, room_state, user_id) {
        protocol::send_message(
            &peer_tx,
            &ServerMessage::TranslationResult(TranslationResult {
                kind,
                user_id: user_id.to_string(),
                text,
                is_final,
            }),
        );
    }
}

// --- WebSocket payload handlers ---

/// Handle a `translation-settings` update: store, acknowledge, and
/// reprovision a live session in the background when the settings drifted.
pub fn handle_translation_settings(
    state: &AppState,
    user_id: &str,
    tx: &ConnectionSender,
    settings: TranslationSettings,
) {
    let coord = state.translation.clone();
    coord.store_settings(user_id, settings.clone());
    tracing::info!(
        user_id = %user_id,
        source = %settings.source_language,
        target = %settings.target_language,
        "Translation settings updated"
    );
    protocol::send_message(
        tx,
        &ServerMessage::TranslationSettingsUpdated(TranslationSettingsUpdated {
            success: true,
            settings,
        }),
    );

    if coord.available() && coord.has_session(user_id) {
        let user = user_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = coord.ensure_session(&user).await {
                tracing::warn!(
                    user_id = %user,
                    error = %e,
                    "Failed to reprovision translation session"
                );
            }
        });
    }
}

/// Handle a `toggle-translation` request for a room the user is a member of.
///
/// Disabling is immediate and best-effort. Enabling flips the participant
/// flag optimistically, then activates the session off the message loop; the
/// acknowledgement (or error plus revert) follows when activation completes.
pub fn handle_toggle_translation(
    state: &AppState,
    user_id: &str,
    tx: &ConnectionSender,
    req: ToggleTranslationRequest,
) {
    let membership = match state.rooms.lookup(&req.room_id, user_id) {
        Ok(m) => m,
        Err(e) => {
            protocol::send_error(tx, &e.to_string());
            return;
        }
    };
    let coord = state.translation.clone();

    if !req.enabled {
        coord.set_participant(&req.room_id, user_id, false);
        coord.close_session(user_id);
        protocol::send_message(
            tx,
            &ServerMessage::TranslationToggled(TranslationToggled {
                success: true,
                room_id: req.room_id.clone(),
                enabled: false,
            }),
        );
        if let Some(peer_tx) = state.registry.resolve(&membership.peer) {
            protocol::send_message(
                &peer_tx,
                &ServerMessage::TranslationStateChanged(TranslationStateChanged {
                    room_id: req.room_id.clone(),
                    user_id: user_id.to_string(),
                    translating: false,
                }),
            );
        }
        tracing::info!(user_id = %user_id, room_id = %req.room_id, "Translation disabled");
        return;
    }

    coord.set_participant(&req.room_id, user_id, true);

    let registry = state.registry.clone();
    let rooms = state.rooms.clone();
    let user = user_id.to_string();
    let room_id = req.room_id.clone();
    let tx = tx.clone();
    tokio::spawn(async move {
        match coord.ensure_session(&user).await {
            Ok(()) => {
                // The room may have died while the session was provisioning;
                // a destroyed room must read as "room not found", not success.
                let peer = match rooms.lookup(&room_id, &user) {
                    Ok(m) => m.peer,
                    Err(e) => {
                        coord.close_session(&user);
                        coord.revert_participant(&room_id, &user);
                        protocol::send_error(&tx, &e.to_string());
                        return;
                    }
                };
                coord.tag_session(&user, &room_id);
                protocol::send_message(
                    &tx,
                    &ServerMessage::TranslationToggled(TranslationToggled {
                        success: true,
                        room_id: room_id.clone(),
                        enabled: true,
                    }),
                );
                if let Some(peer_tx) = registry.resolve(&peer) {
                    protocol::send_message(
                        &peer_tx,
                        &ServerMessage::TranslationStateChanged(TranslationStateChanged {
                            room_id: room_id.clone(),
                            user_id: user.clone(),
                            translating: true,
                        }),
                    );
                }
                tracing::info!(user_id = %user, room_id = %room_id, "Translation enabled");
            }
            Err(e) => {
                tracing::warn!(user_id = %user, error = %e, "Translation activation failed");
                coord.revert_participant(&room_id, &user);
                protocol::send_error(&tx, "Translation session could not be started");
            }
        }
    });
}

/// Room-creation hook called by the call state machine. Seeds the room flags
/// and eagerly warms both members' sessions so a mid-call toggle does not pay
/// session-creation latency. Warming failures only log — the call proceeds.
pub fn notify_room_created(state: &AppState, room_id: &str, members: &[String; 2]) {
    let coord = state.translation.clone();
    coord.create_room_state(room_id, members);
    if !coord.available() {
        return;
    }
    for member in members {
        let coord = coord.clone();
        let user = member.clone();
        tokio::spawn(async move {
            if let Err(e) = coord.ensure_session(&user).await {
                tracing::warn!(
                    user_id = %user,
                    error = %e,
                    "Eager translation provisioning failed"
                );
            }
        });
    }
}
