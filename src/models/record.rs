use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_postgres::Row;
use uuid::Uuid;

/// Proof that a student attended a session. At most one per (session, student).
#[derive(Debug, Clone, Serialize)]
pub struct AttendanceRecord {
    pub id: i64,
    pub session_id: Uuid,
    pub student_id: i64,
    pub face_verified: bool,
    pub created_at: DateTime<Utc>,
}

impl From<&Row> for AttendanceRecord {
    fn from(row: &Row) -> Self {
        Self {
            id: row.get("id"),
            session_id: row.get("session_id"),
            student_id: row.get("student_id"),
            face_verified: row.get("face_verified"),
            created_at: row.get("created_at"),
        }
    }
}
