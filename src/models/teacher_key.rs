use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_postgres::Row;

/// A teacher's RSA public key and the closed interval in which it is valid.
#[derive(Debug, Clone, Serialize)]
pub struct TeacherKey {
    /// Monotonic id; a higher id means a more recently uploaded key.
    pub id: i64,
    pub teacher_id: i64,
    /// The key as uploaded, header and all.
    pub public_key_pem: String,
    pub valid_from: DateTime<Utc>,
    pub valid_to: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl TeacherKey {
    /// Exact interval check, no skew.
    pub fn is_valid_at(&self, at: DateTime<Utc>) -> bool {
        self.valid_from <= at && at <= self.valid_to
    }
}

impl From<&Row> for TeacherKey {
    fn from(row: &Row) -> Self {
        Self {
            id: row.get("id"),
            teacher_id: row.get("teacher_id"),
            public_key_pem: row.get("public_key_pem"),
            valid_from: row.get("valid_from"),
            valid_to: row.get("valid_to"),
            created_at: row.get("created_at"),
        }
    }
}

/// A key waiting to be stored.
#[derive(Debug, Clone)]
pub struct NewTeacherKey {
    pub teacher_id: i64,
    pub public_key_pem: String,
    pub valid_from: DateTime<Utc>,
    pub valid_to: DateTime<Utc>,
}
