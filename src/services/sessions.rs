use base64::{Engine as _, engine::general_purpose};
use chrono::{DateTime, Duration, SecondsFormat, Timelike, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    crypto::signer::{self, Signer},
    error::{AppError, Result},
    models::session::{AttendanceSession, SessionPayload},
    repositories::store::{Store, StoreTx},
    services::key_store,
};

/// What the teacher device distributes to students.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedSession {
    #[serde(rename = "sessionId")]
    pub session_id: Uuid,
    pub payload_b64: String,
    pub signature_b64: String,
    #[serde(rename = "expiresAt")]
    pub expires_at: DateTime<Utc>,
}

impl From<&AttendanceSession> for IssuedSession {
    fn from(session: &AttendanceSession) -> Self {
        Self {
            session_id: session.id,
            payload_b64: session.payload_b64.clone(),
            signature_b64: session.signature_b64.clone(),
            expires_at: session.expires_at,
        }
    }
}

/// Renders the canonical payload.
///
/// Layout is fixed and signed byte for byte: UTF-8 JSON, no whitespace, keys
/// in this order, timestamps as RFC 3339 UTC with whole seconds and a `Z`
/// suffix, ids as bare integers.
///
/// ```text
/// {"sessionId":"<uuid>","issuedAt":"<ts>","expiresAt":"<ts>","classId":<n>,"subjectId":<n>}
/// ```
pub fn canonical_payload(
    session_id: Uuid,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    class_id: i64,
    subject_id: i64,
) -> String {
    format!(
        r#"{{"sessionId":"{}","issuedAt":"{}","expiresAt":"{}","classId":{},"subjectId":{}}}"#,
        session_id.hyphenated(),
        issued_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        expires_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        class_id,
        subject_id
    )
}

/// Creates and stores a server-signed session.
///
/// # Arguments
///
/// * `store` - The backing store.
/// * `signer` - The server signing keypair.
/// * `teacher_id`, `class_id`, `subject_id` - All required.
/// * `lifetime_secs` - Length of the validity window.
/// * `now` - The issuing instant; truncated to whole seconds.
///
/// # Returns
///
/// A `Result` containing the stored `AttendanceSession`.
pub async fn create_session<S: Store>(
    store: &S,
    signer: &Signer,
    teacher_id: Option<i64>,
    class_id: Option<i64>,
    subject_id: Option<i64>,
    lifetime_secs: i64,
    now: DateTime<Utc>,
) -> Result<AttendanceSession> {
    let (Some(teacher_id), Some(class_id), Some(subject_id)) = (teacher_id, class_id, subject_id) else {
        return Err(AppError::MissingFields(
            "teacherId, classId, subjectId required".to_string(),
        ));
    };

    // The payload carries whole seconds; the row must agree with it.
    let issued_at = now.with_nanosecond(0).unwrap_or(now);
    let expires_at = issued_at + Duration::seconds(lifetime_secs);
    let session_id = Uuid::new_v4();

    let payload = canonical_payload(session_id, issued_at, expires_at, class_id, subject_id);
    let signature = signer.sign(payload.as_bytes());

    let session = AttendanceSession {
        id: session_id,
        teacher_id,
        class_id,
        subject_id,
        payload_b64: general_purpose::STANDARD.encode(payload.as_bytes()),
        signature_b64: general_purpose::STANDARD.encode(&signature),
        signing_key_id: None,
        issued_at,
        expires_at,
        consumed: false,
    };

    let mut tx = store.begin().await?;
    if !tx.insert_session(&session).await? {
        return Err(AppError::Unexpected(format!(
            "session id {} collided on insert",
            session_id
        )));
    }
    tx.commit().await?;

    tracing::info!(
        "✅ Session {} created by teacher {} for class {} (expires {})",
        session.id,
        teacher_id,
        class_id,
        expires_at
    );
    Ok(session)
}

/// Stores a session whose payload was signed on the teacher's device.
///
/// The signature must verify under the teacher's key active at the payload's
/// `issuedAt`, the same key submissions are later checked against. The
/// session is pinned to that key so later rotation cannot change the outcome
/// of verification.
pub async fn register_signed_session<S: Store>(
    store: &S,
    teacher_id: Option<i64>,
    payload_b64: Option<&str>,
    signature_b64: Option<&str>,
    max_lifetime_secs: i64,
    now: DateTime<Utc>,
) -> Result<AttendanceSession> {
    let (Some(teacher_id), Some(payload_b64), Some(signature_b64)) =
        (teacher_id, payload_b64, signature_b64)
    else {
        return Err(AppError::MissingFields(
            "teacherId, payload_b64, signature_b64 required".to_string(),
        ));
    };

    let payload_bytes = general_purpose::STANDARD
        .decode(payload_b64)
        .map_err(|_| AppError::Validation("payload_b64 is not valid base64".to_string()))?;
    let signature_bytes = general_purpose::STANDARD
        .decode(signature_b64)
        .map_err(|_| AppError::InvalidSessionSignature)?;
    let payload: SessionPayload = sonic_rs::from_slice(&payload_bytes)
        .map_err(|_| AppError::Validation("payload is not a session payload".to_string()))?;

    if payload.issued_at > now || payload.expires_at < now {
        return Err(AppError::SessionNotActive);
    }
    if payload.expires_at - payload.issued_at > Duration::seconds(max_lifetime_secs) {
        return Err(AppError::Validation(format!(
            "session window exceeds {} seconds",
            max_lifetime_secs
        )));
    }

    let mut tx = store.begin().await?;
    let Some((key, public_key)) = key_store::active_key_for(&mut tx, teacher_id, payload.issued_at).await?
    else {
        tracing::warn!(
            "❌ Teacher {} had no active key at {}",
            teacher_id,
            payload.issued_at
        );
        return Err(AppError::InvalidSessionSignature);
    };
    if !signer::verify(&payload_bytes, &signature_bytes, &public_key) {
        return Err(AppError::InvalidSessionSignature);
    }

    let session = AttendanceSession {
        id: payload.session_id,
        teacher_id,
        class_id: payload.class_id,
        subject_id: payload.subject_id,
        payload_b64: payload_b64.to_string(),
        signature_b64: signature_b64.to_string(),
        signing_key_id: Some(key.id),
        issued_at: payload.issued_at,
        expires_at: payload.expires_at,
        consumed: false,
    };

    if !tx.insert_session(&session).await? {
        return Err(AppError::Validation("session already registered".to_string()));
    }
    tx.commit().await?;

    tracing::info!(
        "✅ Session {} registered by teacher {} with key {}",
        session.id,
        teacher_id,
        key.id
    );
    Ok(session)
}

/// Returns the session only while `now` is inside its window.
///
/// Unknown, not yet started and expired sessions all come back as `None`.
pub async fn find_active_session<S: Store>(
    store: &S,
    session_id: Uuid,
    now: DateTime<Utc>,
) -> Result<Option<AttendanceSession>> {
    let mut tx = store.begin().await?;
    let session = tx.find_active_session(session_id, now).await?;
    tx.commit().await?;
    Ok(session)
}

/// Whether the student is on the roster of the session's class.
pub async fn student_belongs_to_class<S: Store>(
    store: &S,
    session_id: Uuid,
    student_id: i64,
) -> Result<bool> {
    let mut tx = store.begin().await?;
    let belongs = tx.student_in_session_class(session_id, student_id).await?;
    tx.commit().await?;
    Ok(belongs)
}

/// Checks the stored signature of a session against the key pinned at issuance.
///
/// The payload is decoded from its stored base64 form, never rebuilt.
pub async fn verify_stored_signature<T: StoreTx>(
    tx: &mut T,
    signer: &Signer,
    session: &AttendanceSession,
) -> Result<bool> {
    let (Ok(payload), Ok(signature)) = (
        general_purpose::STANDARD.decode(&session.payload_b64),
        general_purpose::STANDARD.decode(&session.signature_b64),
    ) else {
        return Ok(false);
    };

    match session.signing_key_id {
        None => Ok(signer::verify(&payload, &signature, signer.public_key())),
        Some(key_id) => match key_store::key_valid_at(tx, key_id, session.issued_at).await? {
            Some(public_key) => Ok(signer::verify(&payload, &signature, &public_key)),
            None => Ok(false),
        },
    }
}
