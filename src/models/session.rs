use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_postgres::Row;
use uuid::Uuid;

/// A signed attendance session.
///
/// `payload_b64` holds the exact bytes that were signed. It is never rebuilt
/// from the other fields; verification always reads it back as stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttendanceSession {
    /// The session id, also embedded in the signed payload.
    pub id: Uuid,
    /// The teacher that opened the session.
    pub teacher_id: i64,
    /// The class whose roster may attend.
    pub class_id: i64,
    /// The subject being taught.
    pub subject_id: i64,
    /// Base64 of the canonical payload bytes.
    pub payload_b64: String,
    /// Base64 of the detached signature over the payload bytes.
    pub signature_b64: String,
    /// Teacher key that signed the payload, `None` for the server signer.
    pub signing_key_id: Option<i64>,
    /// Start of the validity window.
    pub issued_at: DateTime<Utc>,
    /// End of the validity window, inclusive.
    pub expires_at: DateTime<Utc>,
    /// Reserved; stored but not enforced against reuse.
    pub consumed: bool,
}

impl AttendanceSession {
    /// Whether `now` lies inside `[issued_at, expires_at]`.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.issued_at <= now && now <= self.expires_at
    }
}

impl From<&Row> for AttendanceSession {
    fn from(row: &Row) -> Self {
        Self {
            id: row.get("id"),
            teacher_id: row.get("teacher_id"),
            class_id: row.get("class_id"),
            subject_id: row.get("subject_id"),
            payload_b64: row.get("payload_b64"),
            signature_b64: row.get("signature_b64"),
            signing_key_id: row.get("signing_key_id"),
            issued_at: row.get("issued_at"),
            expires_at: row.get("expires_at"),
            consumed: row.get("consumed"),
        }
    }
}

/// The fields of the canonical payload, as parsed back from a device.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SessionPayload {
    pub session_id: Uuid,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub class_id: i64,
    pub subject_id: i64,
}
