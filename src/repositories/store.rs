use std::future::Future;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    nonce::Nonce,
    record::AttendanceRecord,
    session::AttendanceSession,
    teacher_key::{NewTeacherKey, TeacherKey},
};

/// A durable store that hands out transactions.
///
/// Every protocol operation runs inside one `StoreTx`. Uniqueness of nonce
/// values and of (session, student) records is enforced by the store itself,
/// so two concurrent transactions racing on the same row cannot both win.
pub trait Store: Clone + Send + Sync + 'static {
    type Tx: StoreTx;

    /// Opens a new transaction.
    fn begin(&self) -> impl Future<Output = Result<Self::Tx>> + Send;
}

/// Operations available inside a transaction.
///
/// Dropping a transaction without calling `commit` discards its effects.
pub trait StoreTx: Send {
    /// Inserts a session. Returns `false` if the id is already taken.
    fn insert_session(
        &mut self,
        session: &AttendanceSession,
    ) -> impl Future<Output = Result<bool>> + Send;

    /// Loads a session only if `now` is inside its validity window.
    fn find_active_session(
        &mut self,
        session_id: Uuid,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<Option<AttendanceSession>>> + Send;

    /// Whether the student is on the roster of the session's class.
    fn student_in_session_class(
        &mut self,
        session_id: Uuid,
        student_id: i64,
    ) -> impl Future<Output = Result<bool>> + Send;

    /// Inserts a nonce. Returns `false` when the value already exists anywhere.
    fn insert_nonce(&mut self, nonce: &Nonce) -> impl Future<Output = Result<bool>> + Send;

    /// Atomically marks an unused nonce of this session as used.
    /// Returns `false` if there was no such unused nonce.
    fn consume_nonce(
        &mut self,
        session_id: Uuid,
        nonce: &str,
    ) -> impl Future<Output = Result<bool>> + Send;

    /// Deletes nonces whose session expired before `cutoff`.
    fn purge_nonces_expired_before(
        &mut self,
        cutoff: DateTime<Utc>,
    ) -> impl Future<Output = Result<u64>> + Send;

    /// Whether a record exists for the pair.
    fn record_exists(
        &mut self,
        session_id: Uuid,
        student_id: i64,
    ) -> impl Future<Output = Result<bool>> + Send;

    /// Inserts a record. Returns `None` if the pair already has one.
    fn insert_record(
        &mut self,
        session_id: Uuid,
        student_id: i64,
        face_verified: bool,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<Option<AttendanceRecord>>> + Send;

    /// Stores a teacher key and returns it with its assigned id.
    fn insert_teacher_key(
        &mut self,
        key: &NewTeacherKey,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<TeacherKey>> + Send;

    /// The most recently created key of the teacher whose interval contains `at`.
    fn active_teacher_key(
        &mut self,
        teacher_id: i64,
        at: DateTime<Utc>,
    ) -> impl Future<Output = Result<Option<TeacherKey>>> + Send;

    /// Loads a key by id regardless of its interval.
    fn teacher_key(&mut self, key_id: i64) -> impl Future<Output = Result<Option<TeacherKey>>> + Send;

    /// Makes every effect of the transaction durable.
    fn commit(self) -> impl Future<Output = Result<()>> + Send;

    /// Discards every effect of the transaction.
    fn rollback(self) -> impl Future<Output = Result<()>> + Send;
}
