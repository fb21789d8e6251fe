//! Connection registry: binds a user id to exactly one live WebSocket connection.
//!
//! Registering a user id that is already bound supersedes the old connection:
//! the stale transport is sent a Close frame and both mapping directions are
//! replaced. This is the reconnection path, not an error.

use axum::extract::ws::{CloseFrame, Message};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::ws::ConnectionSender;

/// Close code sent to a connection replaced by a newer registration.
const CLOSE_SUPERSEDED: u16 = 4000;

#[derive(Clone)]
struct Connection {
    conn_id: String,
    sender: ConnectionSender,
}

#[derive(Default)]
struct RegistryTables {
    by_user: HashMap<String, Connection>,
    by_conn: HashMap<String, String>,
}

/// Two-way user ↔ connection map. Both directions are mutated under one
/// mutex so a lookup can never observe a half-applied registration.
#[derive(Default)]
pub struct ConnectionRegistry {
    inner: Mutex<RegistryTables>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `user_id` to this connection, superseding any prior binding.
    ///
    /// A previous connection for the same user is sent a Close frame and
    /// forgotten. Re-registering the same user on the same connection is a
    /// no-op refresh.
    pub fn register(&self, user_id: &str, conn_id: &str, sender: ConnectionSender) {
        let mut tables = self.inner.lock().expect("registry lock poisoned");

        // This connection may have been bound to a different user id before.
        if let Some(prev_user) = tables.by_conn.remove(conn_id) {
            if prev_user != user_id {
                let stale = tables
                    .by_user
                    .get(&prev_user)
                    .map(|c| c.conn_id == conn_id)
                    .unwrap_or(false);
                if stale {
                    tables.by_user.remove(&prev_user);
                }
            }
        }

        if let Some(old) = tables.by_user.remove(user_id) {
            if old.conn_id != conn_id {
                tables.by_conn.remove(&old.conn_id);
                let _ = old.sender.send(Message::Close(Some(CloseFrame {
                    code: CLOSE_SUPERSEDED,
                    reason: "Superseded by a new connection".into(),
                })));
                tracing::info!(
                    user_id = %user_id,
                    "Stale connection superseded by new registration"
                );
            }
        }

        tables.by_user.insert(
            user_id.to_string(),
            Connection {
                conn_id: conn_id.to_string(),
                sender,
            },
        );
        tables
            .by_conn
            .insert(conn_id.to_string(), user_id.to_string());
    }

    /// Sender for a user's live connection, if any.
    pub fn resolve(&self, user_id: &str) -> Option<ConnectionSender> {
        let tables = self.inner.lock().expect("registry lock poisoned");
        tables.by_user.get(user_id).map(|c| c.sender.clone())
    }

    /// User id bound to a connection, if the connection has registered.
    pub fn reverse_resolve(&self, conn_id: &str) -> Option<String> {
        let tables = self.inner.lock().expect("registry lock poisoned");
        tables.by_conn.get(conn_id).cloned()
    }

    /// Drop both mapping directions for a closed connection.
    ///
    /// Guarded: if the user's forward entry no longer points at this
    /// connection (it was superseded), the forward entry is left alone.
    /// Returns the user id that was unbound, if any.
    pub fn remove(&self, conn_id: &str) -> Option<String> {
        let mut tables = self.inner.lock().expect("registry lock poisoned");
        let user_id = tables.by_conn.remove(conn_id)?;
        let owns_binding = tables
            .by_user
            .get(&user_id)
            .map(|c| c.conn_id == conn_id)
            .unwrap_or(false);
        if owns_binding {
            tables.by_user.remove(&user_id);
        }
        Some(user_id)
    }
}
