use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// A single-use token binding one submission attempt to one session.
#[derive(Debug, Clone, Serialize)]
pub struct Nonce {
    /// The URL-safe token, unique across all sessions.
    pub nonce: String,
    /// The session the token was issued for.
    pub session_id: Uuid,
    /// Set once the token has been redeemed.
    pub used: bool,
    pub created_at: DateTime<Utc>,
}
