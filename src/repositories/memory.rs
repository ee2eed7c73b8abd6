use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::{
    error::Result,
    models::{
        nonce::Nonce,
        record::AttendanceRecord,
        session::AttendanceSession,
        teacher_key::{NewTeacherKey, TeacherKey},
    },
    repositories::store::{Store, StoreTx},
};

#[derive(Default)]
struct MemoryState {
    sessions: HashMap<Uuid, AttendanceSession>,
    // Keyed by value: uniqueness spans every session.
    nonces: HashMap<String, Nonce>,
    records: HashMap<(Uuid, i64), AttendanceRecord>,
    teacher_keys: BTreeMap<i64, TeacherKey>,
    // (class_id, student_id)
    roster: HashSet<(i64, i64)>,
    next_record_id: i64,
    next_key_id: i64,
}

/// An in-process store with the same uniqueness guarantees as `PgStore`.
///
/// A transaction holds the single state lock for its whole lifetime, so
/// transactions are fully serialised. Effects are applied in place and
/// undone from a journal on rollback.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    /// Creates a new, empty `MemoryStore`.
    pub fn new() -> Self {
        Self::default()
    }
}

// Seeding and inspection for tests. The roster is owned by the external
// student registry, so nothing in the service writes it.
#[cfg(any(test, feature = "test-util"))]
impl MemoryStore {
    /// Puts a student on a class roster.
    pub async fn enroll(&self, class_id: i64, student_id: i64) {
        self.state.lock().await.roster.insert((class_id, student_id));
    }

    /// Number of records stored for a session.
    pub async fn record_count(&self, session_id: Uuid) -> usize {
        self.state
            .lock()
            .await
            .records
            .keys()
            .filter(|(sid, _)| *sid == session_id)
            .count()
    }

    /// Looks up a nonce by value.
    pub async fn nonce(&self, value: &str) -> Option<Nonce> {
        self.state.lock().await.nonces.get(value).cloned()
    }

    /// Loads a session regardless of its window.
    pub async fn session(&self, session_id: Uuid) -> Option<AttendanceSession> {
        self.state.lock().await.sessions.get(&session_id).cloned()
    }

    /// Overwrites a stored session. Lets tests simulate tampering at rest.
    pub async fn replace_session(&self, session: AttendanceSession) {
        self.state.lock().await.sessions.insert(session.id, session);
    }
}

impl Store for MemoryStore {
    type Tx = MemoryTx;

    async fn begin(&self) -> Result<MemoryTx> {
        let guard = self.state.clone().lock_owned().await;
        Ok(MemoryTx {
            guard,
            journal: Vec::new(),
            committed: false,
        })
    }
}

enum Undo {
    Session(Uuid),
    Nonce(String),
    NonceUsed(String),
    Record((Uuid, i64)),
    TeacherKey(i64),
    PurgedNonces(Vec<Nonce>),
}

/// A transaction over `MemoryStore`.
pub struct MemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    journal: Vec<Undo>,
    committed: bool,
}

impl MemoryTx {
    fn undo_all(&mut self) {
        let state = &mut *self.guard;
        while let Some(entry) = self.journal.pop() {
            match entry {
                Undo::Session(id) => {
                    state.sessions.remove(&id);
                }
                Undo::Nonce(value) => {
                    state.nonces.remove(&value);
                }
                Undo::NonceUsed(value) => {
                    if let Some(n) = state.nonces.get_mut(&value) {
                        n.used = false;
                    }
                }
                Undo::Record(key) => {
                    state.records.remove(&key);
                }
                Undo::TeacherKey(id) => {
                    state.teacher_keys.remove(&id);
                }
                Undo::PurgedNonces(nonces) => {
                    for n in nonces {
                        state.nonces.insert(n.nonce.clone(), n);
                    }
                }
            }
        }
    }
}

impl Drop for MemoryTx {
    fn drop(&mut self) {
        if !self.committed {
            self.undo_all();
        }
    }
}

impl StoreTx for MemoryTx {
    async fn insert_session(&mut self, session: &AttendanceSession) -> Result<bool> {
        if self.guard.sessions.contains_key(&session.id) {
            return Ok(false);
        }
        self.guard.sessions.insert(session.id, session.clone());
        self.journal.push(Undo::Session(session.id));
        Ok(true)
    }

    async fn find_active_session(
        &mut self,
        session_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<AttendanceSession>> {
        Ok(self
            .guard
            .sessions
            .get(&session_id)
            .filter(|s| s.is_active_at(now))
            .cloned())
    }

    async fn student_in_session_class(&mut self, session_id: Uuid, student_id: i64) -> Result<bool> {
        Ok(self
            .guard
            .sessions
            .get(&session_id)
            .is_some_and(|s| self.guard.roster.contains(&(s.class_id, student_id))))
    }

    async fn insert_nonce(&mut self, nonce: &Nonce) -> Result<bool> {
        if self.guard.nonces.contains_key(&nonce.nonce) {
            return Ok(false);
        }
        self.guard.nonces.insert(nonce.nonce.clone(), nonce.clone());
        self.journal.push(Undo::Nonce(nonce.nonce.clone()));
        Ok(true)
    }

    async fn consume_nonce(&mut self, session_id: Uuid, nonce: &str) -> Result<bool> {
        match self.guard.nonces.get_mut(nonce) {
            Some(n) if n.session_id == session_id && !n.used => {
                n.used = true;
                self.journal.push(Undo::NonceUsed(nonce.to_string()));
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn purge_nonces_expired_before(&mut self, cutoff: DateTime<Utc>) -> Result<u64> {
        let state = &mut *self.guard;
        let expired: HashSet<Uuid> = state
            .sessions
            .values()
            .filter(|s| s.expires_at < cutoff)
            .map(|s| s.id)
            .collect();

        let doomed: Vec<String> = state
            .nonces
            .values()
            .filter(|n| expired.contains(&n.session_id))
            .map(|n| n.nonce.clone())
            .collect();

        let purged: Vec<Nonce> = doomed
            .iter()
            .filter_map(|value| state.nonces.remove(value))
            .collect();
        let count = purged.len() as u64;
        self.journal.push(Undo::PurgedNonces(purged));
        Ok(count)
    }

    async fn record_exists(&mut self, session_id: Uuid, student_id: i64) -> Result<bool> {
        Ok(self.guard.records.contains_key(&(session_id, student_id)))
    }

    async fn insert_record(
        &mut self,
        session_id: Uuid,
        student_id: i64,
        face_verified: bool,
        now: DateTime<Utc>,
    ) -> Result<Option<AttendanceRecord>> {
        let key = (session_id, student_id);
        if self.guard.records.contains_key(&key) {
            return Ok(None);
        }

        self.guard.next_record_id += 1;
        let record = AttendanceRecord {
            id: self.guard.next_record_id,
            session_id,
            student_id,
            face_verified,
            created_at: now,
        };
        self.guard.records.insert(key, record.clone());
        self.journal.push(Undo::Record(key));
        Ok(Some(record))
    }

    async fn insert_teacher_key(&mut self, key: &NewTeacherKey, now: DateTime<Utc>) -> Result<TeacherKey> {
        self.guard.next_key_id += 1;
        let stored = TeacherKey {
            id: self.guard.next_key_id,
            teacher_id: key.teacher_id,
            public_key_pem: key.public_key_pem.clone(),
            valid_from: key.valid_from,
            valid_to: key.valid_to,
            created_at: now,
        };
        self.guard.teacher_keys.insert(stored.id, stored.clone());
        self.journal.push(Undo::TeacherKey(stored.id));
        Ok(stored)
    }

    async fn active_teacher_key(&mut self, teacher_id: i64, at: DateTime<Utc>) -> Result<Option<TeacherKey>> {
        Ok(self
            .guard
            .teacher_keys
            .values()
            .rev()
            .find(|k| k.teacher_id == teacher_id && k.is_valid_at(at))
            .cloned())
    }

    async fn teacher_key(&mut self, key_id: i64) -> Result<Option<TeacherKey>> {
        Ok(self.guard.teacher_keys.get(&key_id).cloned())
    }

    async fn commit(mut self) -> Result<()> {
        self.committed = true;
        self.journal.clear();
        Ok(())
    }

    async fn rollback(mut self) -> Result<()> {
        self.undo_all();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nonce(value: &str, session_id: Uuid) -> Nonce {
        Nonce {
            nonce: value.to_string(),
            session_id,
            used: false,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn dropped_transaction_rolls_back() {
        let store = MemoryStore::new();
        let sid = Uuid::new_v4();
        {
            let mut tx = store.begin().await.unwrap();
            assert!(tx.insert_nonce(&nonce("abc", sid)).await.unwrap());
        }
        assert!(store.nonce("abc").await.is_none());
    }

    #[tokio::test]
    async fn rollback_restores_consumed_nonce() {
        let store = MemoryStore::new();
        let sid = Uuid::new_v4();
        let mut tx = store.begin().await.unwrap();
        tx.insert_nonce(&nonce("abc", sid)).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert!(tx.consume_nonce(sid, "abc").await.unwrap());
        tx.rollback().await.unwrap();

        assert!(!store.nonce("abc").await.unwrap().used);
    }

    #[tokio::test]
    async fn nonce_values_are_unique_across_sessions() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        assert!(tx.insert_nonce(&nonce("same", Uuid::new_v4())).await.unwrap());
        assert!(!tx.insert_nonce(&nonce("same", Uuid::new_v4())).await.unwrap());
    }

    #[tokio::test]
    async fn consume_requires_matching_session() {
        let store = MemoryStore::new();
        let sid = Uuid::new_v4();
        let mut tx = store.begin().await.unwrap();
        tx.insert_nonce(&nonce("abc", sid)).await.unwrap();
        assert!(!tx.consume_nonce(Uuid::new_v4(), "abc").await.unwrap());
        assert!(tx.consume_nonce(sid, "abc").await.unwrap());
        assert!(!tx.consume_nonce(sid, "abc").await.unwrap());
    }

    #[tokio::test]
    async fn second_record_for_pair_is_refused() {
        let store = MemoryStore::new();
        let sid = Uuid::new_v4();
        let mut tx = store.begin().await.unwrap();
        assert!(tx.insert_record(sid, 7, true, Utc::now()).await.unwrap().is_some());
        assert!(tx.insert_record(sid, 7, true, Utc::now()).await.unwrap().is_none());
        assert!(tx.insert_record(sid, 8, true, Utc::now()).await.unwrap().is_some());
    }
}
