//! Call state machine: register, call, answer, ICE relay, hangup, disconnect.
//!
//! Per room the call moves `none → ringing → connected → ended`; `ended` is
//! immediate room destruction, never a lingering state. Every handler path
//! ends in an acknowledgement, an `error{message}` envelope, or deliberate
//! silence for best-effort notifications.

use crate::signaling::rooms::CallPhase;
use crate::state::AppState;
use crate::translation::coordinator;
use crate::ws::protocol::{
    self, AnswerRequest, CallAccepted, CallInitiated, CallRejected, CallRequest, HangupEvent,
    HangupRequest, IceCandidateEvent, IceCandidateRequest, IncomingCall, RegisterAck,
    RegisterRequest, ServerMessage, UserDisconnected,
};
use crate::ws::ConnectionSender;

/// Handle a `register` message: bind this connection to a user id.
///
/// The user directory is consulted first; an unknown id is rejected without
/// touching the registry. A duplicate registration supersedes the old
/// connection — the reconnection path.
pub async fn handle_register(
    state: &AppState,
    conn_id: &str,
    tx: &ConnectionSender,
    req: RegisterRequest,
) {
    if req.user_id.is_empty() {
        protocol::send_error(tx, "Missing user ID");
        return;
    }
    if !state.directory.is_known(&req.user_id).await {
        tracing::warn!(user_id = %req.user_id, "Registration rejected by user directory");
        protocol::send_error(tx, "Unknown user");
        return;
    }

    state.registry.register(&req.user_id, conn_id, tx.clone());
    tracing::info!(user_id = %req.user_id, "User registered for signaling");

    protocol::send_message(
        tx,
        &ServerMessage::Register(RegisterAck {
            success: true,
            message: "Registered".to_string(),
        }),
    );
}

/// Handle a `call`: create a ringing room and deliver the offer to the callee.
///
/// Both parties must be registered and idle. On any failure the caller gets
/// an error and no room exists; the callee is never notified of a failed
/// attempt.
pub fn handle_call(state: &AppState, caller_id: &str, tx: &ConnectionSender, req: CallRequest) {
    if req.target_user_id.is_empty() {
        protocol::send_error(tx, "Missing target user ID");
        return;
    }

    let Some(target_tx) = state.registry.resolve(&req.target_user_id) else {
        protocol::send_error(tx, "User is not online");
        return;
    };

    let room_id = match state.rooms.create_room(caller_id, &req.target_user_id) {
        Ok(id) => id,
        Err(e) => {
            protocol::send_error(tx, &e.to_string());
            return;
        }
    };

    tracing::info!(
        room_id = %room_id,
        caller_id = %caller_id,
        target_user_id = %req.target_user_id,
        "Call room created"
    );

    let members = [caller_id.to_string(), req.target_user_id.clone()];
    coordinator::notify_room_created(state, &room_id, &members);

    let incoming = ServerMessage::IncomingCall(IncomingCall {
        caller_id: caller_id.to_string(),
        room_id: room_id.clone(),
        call_type: req.call_type,
        offer: req.offer,
    });
    if !protocol::try_send_message(&target_tx, &incoming) {
        // The callee vanished between the resolve and the push.
        destroy_room_with_translation(state, &room_id);
        protocol::send_error(tx, "User is not online");
        return;
    }

    protocol::send_message(
        tx,
        &ServerMessage::CallInitiated(CallInitiated {
            target_user_id: req.target_user_id,
            room_id,
            call_type: req.call_type,
        }),
    );
}

/// Handle an `answer` for a ringing room.
///
/// Rejection notifies the peer and destroys the room. Acceptance requires a
/// non-empty SDP answer; forwarding it moves the room to `connected`. An
/// unreachable peer at forwarding time is call-fatal.
pub fn handle_answer(state: &AppState, user_id: &str, tx: &ConnectionSender, req: AnswerRequest) {
    let membership = match state.rooms.lookup(&req.room_id, user_id) {
        Ok(m) => m,
        Err(e) => {
            protocol::send_error(tx, &e.to_string());
            return;
        }
    };
    if membership.phase != CallPhase::Ringing {
        protocol::send_error(tx, "Call already answered");
        return;
    }

    if !req.accepted {
        if let Some(peer_tx) = state.registry.resolve(&membership.peer) {
            protocol::send_message(
                &peer_tx,
                &ServerMessage::CallRejected(CallRejected {
                    room_id: req.room_id.clone(),
                }),
            );
        }
        destroy_room_with_translation(state, &req.room_id);
        tracing::info!(room_id = %req.room_id, user_id = %user_id, "Call rejected");
        return;
    }

    let answer = match req.answer {
        Some(answer) if !answer.is_null() => answer,
        // No state change: the room stays ringing and a retry is possible.
        _ => {
            protocol::send_error(tx, "Missing SDP answer");
            return;
        }
    };

    let Some(peer_tx) = state.registry.resolve(&membership.peer) else {
        // The call cannot proceed with an unreachable caller.
        destroy_room_with_translation(state, &req.room_id);
        protocol::send_error(tx, "Other participant is unreachable");
        return;
    };

    protocol::send_message(
        &peer_tx,
        &ServerMessage::CallAccepted(CallAccepted {
            room_id: req.room_id.clone(),
            answer,
        }),
    );
    state.rooms.set_connected(&req.room_id);
    tracing::info!(room_id = %req.room_id, user_id = %user_id, "Call accepted");
}

/// Handle an `ice-candidate`: relay it verbatim to the other member.
///
/// A currently unreachable peer drops the candidate silently — candidates
/// legitimately race with peer disconnection and are best-effort.
pub fn handle_ice_candidate(
    state: &AppState,
    user_id: &str,
    tx: &ConnectionSender,
    req: IceCandidateRequest,
) {
    let membership = match state.rooms.lookup(&req.room_id, user_id) {
        Ok(m) => m,
        Err(e) => {
            protocol::send_error(tx, &e.to_string());
            return;
        }
    };
    if req.candidate.is_null() {
        protocol::send_error(tx, "Missing ICE candidate");
        return;
    }

    match state.registry.resolve(&membership.peer) {
        Some(peer_tx) => {
            protocol::send_message(
                &peer_tx,
                &ServerMessage::IceCandidate(IceCandidateEvent {
                    room_id: req.room_id,
                    candidate: req.candidate,
                }),
            );
        }
        None => {
            tracing::debug!(
                room_id = %req.room_id,
                user_id = %user_id,
                "Dropped ICE candidate for unreachable peer"
            );
        }
    }
}

/// Handle a `hangup`: notify the peer if reachable, then destroy the room
/// unconditionally.
pub fn handle_hangup(state: &AppState, user_id: &str, tx: &ConnectionSender, req: HangupRequest) {
    let membership = match state.rooms.lookup(&req.room_id, user_id) {
        Ok(m) => m,
        Err(e) => {
            protocol::send_error(tx, &e.to_string());
            return;
        }
    };

    if let Some(peer_tx) = state.registry.resolve(&membership.peer) {
        protocol::send_message(
            &peer_tx,
            &ServerMessage::Hangup(HangupEvent {
                room_id: req.room_id.clone(),
            }),
        );
    }
    destroy_room_with_translation(state, &req.room_id);
    tracing::info!(room_id = %req.room_id, user_id = %user_id, "Call ended by hangup");
}

/// Transport-close cleanup: notify the peer of a mid-call disconnect, destroy
/// the room, release translation state, and unbind the registration.
///
/// A superseded connection resolves to no user here and cleans up nothing —
/// its replacement owns the registration now.
pub fn handle_disconnect(state: &AppState, conn_id: &str) {
    let Some(user_id) = state.registry.reverse_resolve(conn_id) else {
        return;
    };

    if let Some(room_id) = state.rooms.room_of(&user_id) {
        if let Some(peer) = state.rooms.other_member(&room_id, &user_id) {
            if let Some(peer_tx) = state.registry.resolve(&peer) {
                protocol::send_message(
                    &peer_tx,
                    &ServerMessage::UserDisconnected(UserDisconnected {
                        room_id: room_id.clone(),
                        user_id: user_id.clone(),
                    }),
                );
            }
        }
        destroy_room_with_translation(state, &room_id);
    }

    // A session can outlive its room (provisioned but never toggled); a
    // disconnected user keeps nothing open against the backend.
    state.translation.close_session(&user_id);
    state.registry.remove(conn_id);
    tracing::info!(user_id = %user_id, "User removed from signaling registry");
}

/// Destroy a room and release any translation state tied to it. Idempotent:
/// a second destroy finds nothing and releases nothing.
fn destroy_room_with_translation(state: &AppState, room_id: &str) {
    if let Some(members) = state.rooms.destroy_room(room_id) {
        state.translation.release_room(room_id, &members);
        tracing::info!(room_id = %room_id, "Call room destroyed");
    }
}
