//! User directory: decides whether a user id may register for signaling.
//!
//! The directory is an external collaborator (the messaging platform knows
//! who its users are); the signaling core only asks a yes/no question.

use async_trait::async_trait;
use std::collections::HashSet;

/// Read-only lookup of whether a user id is known. Consulted only by the
/// `register` handler.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn is_known(&self, user_id: &str) -> bool;
}

/// Directory that accepts every user id. The default when no roster is
/// configured, matching an open deployment.
pub struct OpenDirectory;

#[async_trait]
impl UserDirectory for OpenDirectory {
    async fn is_known(&self, _user_id: &str) -> bool {
        true
    }
}

/// Directory backed by a fixed allowlist from configuration.
pub struct RosterDirectory {
    members: HashSet<String>,
}

impl RosterDirectory {
    pub fn new<I, S>(members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            members: members.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl UserDirectory for RosterDirectory {
    async fn is_known(&self, user_id: &str) -> bool {
        self.members.contains(user_id)
    }
}
