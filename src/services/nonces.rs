use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::{
    crypto::nonce::generate_nonce,
    error::{AppError, Result},
    models::nonce::Nonce,
    repositories::store::{Store, StoreTx},
    validation::attendance,
};

/// Attempts before issuance gives up on finding an unused value.
pub const MAX_NONCE_ATTEMPTS: usize = 10;

/// Issues a fresh nonce for a student in an active session.
///
/// # Arguments
///
/// * `store` - The backing store.
/// * `session_id` - The raw session id from the path.
/// * `student_id` - The requesting student.
/// * `now` - The current instant.
///
/// # Returns
///
/// A `Result` containing the stored `Nonce`.
pub async fn issue<S: Store>(
    store: &S,
    session_id: &str,
    student_id: Option<i64>,
    now: DateTime<Utc>,
) -> Result<Nonce> {
    issue_with(store, session_id, student_id, now, generate_nonce).await
}

/// Same as [`issue`], drawing candidate values from `generate`.
pub async fn issue_with<S, F>(
    store: &S,
    session_id: &str,
    student_id: Option<i64>,
    now: DateTime<Utc>,
    mut generate: F,
) -> Result<Nonce>
where
    S: Store,
    F: FnMut() -> String + Send,
{
    let session_id = attendance::parse_session_id(session_id)?;
    let student_id =
        student_id.ok_or_else(|| AppError::MissingFields("studentId required".to_string()))?;

    let mut tx = store.begin().await?;
    if tx.find_active_session(session_id, now).await?.is_none() {
        tracing::debug!("Nonce refused: session {} not active", session_id);
        return Err(AppError::SessionNotActive);
    }
    if !tx.student_in_session_class(session_id, student_id).await? {
        tracing::warn!(
            "⚠️  Student {} asked for a nonce outside class of session {}",
            student_id,
            session_id
        );
        return Err(AppError::StudentNotInClass);
    }

    for attempt in 1..=MAX_NONCE_ATTEMPTS {
        let nonce = Nonce {
            nonce: generate(),
            session_id,
            used: false,
            created_at: now,
        };
        if tx.insert_nonce(&nonce).await? {
            tx.commit().await?;
            tracing::debug!(
                "Nonce issued for student {} in session {} (attempt {})",
                student_id,
                session_id,
                attempt
            );
            return Ok(nonce);
        }
        tracing::warn!("⚠️  Nonce collision on attempt {}", attempt);
    }

    tracing::error!(
        "❌ Nonce generation exhausted after {} attempts for session {}",
        MAX_NONCE_ATTEMPTS,
        session_id
    );
    Err(AppError::NonceGenerationFailed(MAX_NONCE_ATTEMPTS))
}

/// Marks an unused nonce of the session as used.
///
/// Returns `false` when it was already used, belongs to another session, or
/// was never issued.
pub async fn consume<T: StoreTx>(tx: &mut T, session_id: Uuid, nonce: &str) -> Result<bool> {
    tx.consume_nonce(session_id, nonce).await
}

/// Deletes nonces of sessions that expired more than `retention` ago.
pub async fn purge_expired<S: Store>(store: &S, now: DateTime<Utc>, retention: Duration) -> Result<u64> {
    let mut tx = store.begin().await?;
    let purged = tx.purge_nonces_expired_before(now - retention).await?;
    tx.commit().await?;
    Ok(purged)
}
