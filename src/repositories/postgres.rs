use chrono::{DateTime, Utc};
use deadpool_postgres::{Object, Pool};
use uuid::Uuid;

use crate::{
    error::{AppError, Result},
    models::{
        nonce::Nonce,
        record::AttendanceRecord,
        session::AttendanceSession,
        teacher_key::{NewTeacherKey, TeacherKey},
    },
    repositories::store::{Store, StoreTx},
};

const SESSION_COLUMNS: &str = "id, teacher_id, class_id, subject_id, payload_b64, signature_b64, \
     signing_key_id, issued_at, expires_at, consumed";

const KEY_COLUMNS: &str = "id, teacher_id, public_key_pem, valid_from, valid_to, created_at";

/// PostgreSQL-backed store.
#[derive(Clone)]
pub struct PgStore {
    pool: Pool,
}

impl PgStore {
    /// Creates a new `PgStore` over an existing pool.
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// The underlying connection pool.
    pub fn pool(&self) -> &Pool {
        &self.pool
    }
}

impl Store for PgStore {
    type Tx = PgTx;

    async fn begin(&self) -> Result<PgTx> {
        let client = self.pool.get().await?;
        client.batch_execute("BEGIN ISOLATION LEVEL READ COMMITTED").await?;
        Ok(PgTx { client: Some(client) })
    }
}

/// A transaction that owns its pooled connection.
///
/// `BEGIN`/`COMMIT` are issued by hand so the transaction can outlive the
/// borrow of the pool object. A transaction dropped mid-flight detaches its
/// connection from the pool, which closes it and makes the server roll back.
pub struct PgTx {
    client: Option<Object>,
}

impl PgTx {
    fn client(&self) -> Result<&Object> {
        self.client
            .as_ref()
            .ok_or_else(|| AppError::Unexpected("transaction already finished".to_string()))
    }

    async fn finish(mut self, statement: &str) -> Result<()> {
        let client = self
            .client
            .take()
            .ok_or_else(|| AppError::Unexpected("transaction already finished".to_string()))?;

        if let Err(e) = client.batch_execute(statement).await {
            let _ = Object::take(client);
            return Err(AppError::from(e));
        }
        Ok(())
    }
}

impl Drop for PgTx {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            tracing::warn!("⚠️  Transaction dropped without commit, discarding connection");
            let _ = Object::take(client);
        }
    }
}

impl StoreTx for PgTx {
    async fn insert_session(&mut self, session: &AttendanceSession) -> Result<bool> {
        let client = self.client()?;
        let stmt = client
            .prepare_cached(
                r#"
                INSERT INTO attendance_sessions (
                    id, teacher_id, class_id, subject_id, payload_b64, signature_b64,
                    signing_key_id, issued_at, expires_at, consumed
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                ON CONFLICT (id) DO NOTHING
                "#,
            )
            .await?;
        let inserted = client
            .execute(
                &stmt,
                &[
                    &session.id,
                    &session.teacher_id,
                    &session.class_id,
                    &session.subject_id,
                    &session.payload_b64,
                    &session.signature_b64,
                    &session.signing_key_id,
                    &session.issued_at,
                    &session.expires_at,
                    &session.consumed,
                ],
            )
            .await?;
        Ok(inserted == 1)
    }

    async fn find_active_session(
        &mut self,
        session_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<AttendanceSession>> {
        let client = self.client()?;
        let stmt = client
            .prepare_cached(&format!(
                "SELECT {} FROM attendance_sessions \
                 WHERE id = $1 AND $2 BETWEEN issued_at AND expires_at",
                SESSION_COLUMNS
            ))
            .await?;
        let row = client.query_opt(&stmt, &[&session_id, &now]).await?;
        Ok(row.as_ref().map(AttendanceSession::from))
    }

    async fn student_in_session_class(&mut self, session_id: Uuid, student_id: i64) -> Result<bool> {
        let client = self.client()?;
        let stmt = client
            .prepare_cached(
                r#"
                SELECT EXISTS (
                    SELECT 1
                    FROM class_students cs
                    JOIN attendance_sessions s ON s.class_id = cs.class_id
                    WHERE s.id = $1 AND cs.student_id = $2
                )
                "#,
            )
            .await?;
        let row = client.query_one(&stmt, &[&session_id, &student_id]).await?;
        Ok(row.try_get(0)?)
    }

    async fn insert_nonce(&mut self, nonce: &Nonce) -> Result<bool> {
        let client = self.client()?;
        let stmt = client
            .prepare_cached(
                r#"
                INSERT INTO attendance_nonces (nonce, session_id, used, created_at)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (nonce) DO NOTHING
                "#,
            )
            .await?;
        let inserted = client
            .execute(
                &stmt,
                &[&nonce.nonce, &nonce.session_id, &nonce.used, &nonce.created_at],
            )
            .await?;
        Ok(inserted == 1)
    }

    async fn consume_nonce(&mut self, session_id: Uuid, nonce: &str) -> Result<bool> {
        let client = self.client()?;
        // The row lock taken by UPDATE serialises concurrent consumers; the
        // loser re-evaluates `used = false` and matches nothing.
        let stmt = client
            .prepare_cached(
                r#"
                UPDATE attendance_nonces
                SET used = true
                WHERE session_id = $1 AND nonce = $2 AND used = false
                "#,
            )
            .await?;
        let updated = client.execute(&stmt, &[&session_id, &nonce]).await?;
        Ok(updated == 1)
    }

    async fn purge_nonces_expired_before(&mut self, cutoff: DateTime<Utc>) -> Result<u64> {
        let client = self.client()?;
        let stmt = client
            .prepare_cached(
                r#"
                DELETE FROM attendance_nonces n
                USING attendance_sessions s
                WHERE n.session_id = s.id AND s.expires_at < $1
                "#,
            )
            .await?;
        Ok(client.execute(&stmt, &[&cutoff]).await?)
    }

    async fn record_exists(&mut self, session_id: Uuid, student_id: i64) -> Result<bool> {
        let client = self.client()?;
        let stmt = client
            .prepare_cached(
                r#"
                SELECT EXISTS (
                    SELECT 1 FROM attendance_records
                    WHERE session_id = $1 AND student_id = $2
                )
                "#,
            )
            .await?;
        let row = client.query_one(&stmt, &[&session_id, &student_id]).await?;
        Ok(row.try_get(0)?)
    }

    async fn insert_record(
        &mut self,
        session_id: Uuid,
        student_id: i64,
        face_verified: bool,
        now: DateTime<Utc>,
    ) -> Result<Option<AttendanceRecord>> {
        let client = self.client()?;
        let stmt = client
            .prepare_cached(
                r#"
                INSERT INTO attendance_records (session_id, student_id, face_verified, created_at)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (session_id, student_id) DO NOTHING
                RETURNING id, session_id, student_id, face_verified, created_at
                "#,
            )
            .await?;
        let row = client
            .query_opt(&stmt, &[&session_id, &student_id, &face_verified, &now])
            .await?;
        Ok(row.as_ref().map(AttendanceRecord::from))
    }

    async fn insert_teacher_key(&mut self, key: &NewTeacherKey, now: DateTime<Utc>) -> Result<TeacherKey> {
        let client = self.client()?;
        let stmt = client
            .prepare_cached(&format!(
                "INSERT INTO teacher_keys (teacher_id, public_key_pem, valid_from, valid_to, created_at) \
                 VALUES ($1, $2, $3, $4, $5) RETURNING {}",
                KEY_COLUMNS
            ))
            .await?;
        let row = client
            .query_one(
                &stmt,
                &[&key.teacher_id, &key.public_key_pem, &key.valid_from, &key.valid_to, &now],
            )
            .await?;
        Ok(TeacherKey::from(&row))
    }

    async fn active_teacher_key(&mut self, teacher_id: i64, at: DateTime<Utc>) -> Result<Option<TeacherKey>> {
        let client = self.client()?;
        let stmt = client
            .prepare_cached(&format!(
                "SELECT {} FROM teacher_keys \
                 WHERE teacher_id = $1 AND valid_from <= $2 AND valid_to >= $2 \
                 ORDER BY id DESC LIMIT 1",
                KEY_COLUMNS
            ))
            .await?;
        let row = client.query_opt(&stmt, &[&teacher_id, &at]).await?;
        Ok(row.as_ref().map(TeacherKey::from))
    }

    async fn teacher_key(&mut self, key_id: i64) -> Result<Option<TeacherKey>> {
        let client = self.client()?;
        let stmt = client
            .prepare_cached(&format!("SELECT {} FROM teacher_keys WHERE id = $1", KEY_COLUMNS))
            .await?;
        let row = client.query_opt(&stmt, &[&key_id]).await?;
        Ok(row.as_ref().map(TeacherKey::from))
    }

    async fn commit(self) -> Result<()> {
        self.finish("COMMIT").await
    }

    async fn rollback(self) -> Result<()> {
        self.finish("ROLLBACK").await
    }
}
