//! Authenticated session held in the client store.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of a logged-in user: opaque id plus bearer credential.
///
/// Presence of a session means "online behavior preferred"; absence
/// means local-only behavior.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub user_id: i64,
    pub username: String,
    pub token: String,
}

impl fmt::Debug for Session {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Session")
            .field("user_id", &self.user_id)
            .field("username", &self.username)
            .field("token", &"[REDACTED]")
            .finish()
    }
}
