use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    crypto::signer::Signer,
    error::{AppError, Result},
    models::record::AttendanceRecord,
    repositories::store::{Store, StoreTx},
    services::{nonces, sessions},
    validation::attendance::{self, present},
};

/// An attendance submission as sent by a student device.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionRequest {
    pub session_id: Option<String>,
    pub student_id: Option<i64>,
    pub nonce: Option<String>,
    /// Accepted for compatibility with older clients and never trusted. Only
    /// the server-held session signature is authoritative.
    #[serde(default)]
    pub signature: Option<String>,
    /// Client hint; the face check does not consult it.
    #[serde(default)]
    pub face_verified: Option<bool>,
}

/// Face verification boundary. Always succeeds until a real matcher exists.
fn verify_face(_student_id: i64) -> bool {
    true
}

/// Validates a submission and records attendance exactly once.
///
/// Checks run in a fixed order and the first failure wins. Steps from the
/// session lookup onward share one transaction: it commits on success and
/// on rejections raised after the nonce was consumed, and rolls back on
/// everything else.
///
/// # Arguments
///
/// * `store` - The backing store.
/// * `signer` - The server signer, for sessions it issued itself.
/// * `request` - The submission.
/// * `now` - The current instant.
///
/// # Returns
///
/// A `Result` containing the new `AttendanceRecord`.
pub async fn submit<S: Store>(
    store: &S,
    signer: &Signer,
    request: &SubmissionRequest,
    now: DateTime<Utc>,
) -> Result<AttendanceRecord> {
    let (Some(raw_session_id), Some(student_id), Some(nonce)) = (
        present(request.session_id.as_deref()),
        request.student_id,
        present(request.nonce.as_deref()),
    ) else {
        return Err(AppError::MissingFields(
            "sessionId, studentId, nonce required".to_string(),
        ));
    };
    let session_id = attendance::parse_session_id(raw_session_id)?;

    let mut tx = store.begin().await?;
    match run_checks(&mut tx, signer, session_id, student_id, nonce, now).await {
        Ok(record) => {
            tx.commit().await?;
            tracing::info!(
                "✅ Attendance recorded for student {} in session {}",
                student_id,
                session_id
            );
            Ok(record)
        }
        Err(e) if e.burns_nonce() => {
            tx.commit().await?;
            tracing::warn!(
                "⚠️  Submission by student {} for session {} rejected after nonce use: {}",
                student_id,
                session_id,
                e
            );
            Err(e)
        }
        Err(e) => {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::error!("❌ Rollback failed: {}", rollback_err);
            }
            Err(e)
        }
    }
}

async fn run_checks<T: StoreTx>(
    tx: &mut T,
    signer: &Signer,
    session_id: Uuid,
    student_id: i64,
    nonce: &str,
    now: DateTime<Utc>,
) -> Result<AttendanceRecord> {
    let session = tx
        .find_active_session(session_id, now)
        .await?
        .ok_or(AppError::SessionNotActive)?;

    if !sessions::verify_stored_signature(tx, signer, &session).await? {
        tracing::warn!("⚠️  Stored signature of session {} does not verify", session.id);
        return Err(AppError::InvalidSessionSignature);
    }

    attendance::validate_nonce(nonce)?;
    if !nonces::consume(tx, session_id, nonce).await? {
        return Err(AppError::InvalidOrReusedNonce);
    }

    if !tx.student_in_session_class(session_id, student_id).await? {
        return Err(AppError::StudentNotInClass);
    }

    if tx.record_exists(session_id, student_id).await? {
        return Err(AppError::DuplicateAttendance);
    }

    let face_verified = verify_face(student_id);

    // A concurrent submission may have inserted between the check and here;
    // the unique (session, student) constraint decides.
    tx.insert_record(session_id, student_id, face_verified, now)
        .await?
        .ok_or(AppError::DuplicateAttendance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{models::session::AttendanceSession, repositories::memory::MemoryStore, services::key_store};
    use base64::{Engine as _, engine::general_purpose};
    use chrono::TimeZone;
    use rsa::pkcs1v15::SigningKey;
    use rsa::signature::{SignatureEncoding, Signer as _};
    use sha2::Sha256;
    use std::sync::Arc;

    const SERVER_KEY: &str = include_str!("../../tests/fixtures/server_key.pem");
    const TEACHER_KEY: &str = include_str!("../../tests/fixtures/teacher_key.pem");
    const TEACHER_PUB: &str = include_str!("../../tests/fixtures/teacher_pub.pem");

    const STUDENT: i64 = 1001;
    const OUTSIDER: i64 = 2002;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    struct Fixture {
        store: MemoryStore,
        signer: Arc<Signer>,
        session: AttendanceSession,
    }

    impl Fixture {
        async fn new() -> Self {
            let store = MemoryStore::new();
            store.enroll(1, STUDENT).await;
            store.enroll(2, OUTSIDER).await;
            let signer = Arc::new(Signer::from_pem(SERVER_KEY, None).unwrap());
            let session =
                sessions::create_session(&store, &signer, Some(42), Some(1), Some(1), 120, at(0))
                    .await
                    .unwrap();
            Self { store, signer, session }
        }

        async fn nonce(&self, student_id: i64) -> String {
            nonces::issue(&self.store, &self.session.id.to_string(), Some(student_id), at(1))
                .await
                .unwrap()
                .nonce
        }

        fn request(&self, student_id: i64, nonce: &str) -> SubmissionRequest {
            SubmissionRequest {
                session_id: Some(self.session.id.to_string()),
                student_id: Some(student_id),
                nonce: Some(nonce.to_string()),
                ..Default::default()
            }
        }

        async fn submit_at(&self, request: &SubmissionRequest, now: DateTime<Utc>) -> Result<AttendanceRecord> {
            submit(&self.store, &self.signer, request, now).await
        }
    }

    #[tokio::test]
    async fn valid_submission_records_once() {
        let fx = Fixture::new().await;
        let n1 = fx.nonce(STUDENT).await;

        let record = fx.submit_at(&fx.request(STUDENT, &n1), at(5)).await.unwrap();
        assert_eq!(record.student_id, STUDENT);
        assert_eq!(record.session_id, fx.session.id);
        assert!(record.face_verified);
        assert!(fx.store.nonce(&n1).await.unwrap().used);

        let err = fx.submit_at(&fx.request(STUDENT, &n1), at(6)).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidOrReusedNonce));

        let n2 = fx.nonce(STUDENT).await;
        let err = fx.submit_at(&fx.request(STUDENT, &n2), at(7)).await.unwrap_err();
        assert!(matches!(err, AppError::DuplicateAttendance));
        // The duplicate still burns the nonce.
        assert!(fx.store.nonce(&n2).await.unwrap().used);

        assert_eq!(fx.store.record_count(fx.session.id).await, 1);
    }

    #[tokio::test]
    async fn missing_and_malformed_fields() {
        let fx = Fixture::new().await;

        let err = fx.submit_at(&SubmissionRequest::default(), at(5)).await.unwrap_err();
        assert!(matches!(err, AppError::MissingFields(_)));

        let mut request = fx.request(STUDENT, "  ");
        let err = fx.submit_at(&request, at(5)).await.unwrap_err();
        assert!(matches!(err, AppError::MissingFields(_)));

        request.nonce = Some("abc".to_string());
        request.session_id = Some("not-a-uuid".to_string());
        let err = fx.submit_at(&request, at(5)).await.unwrap_err();
        assert!(matches!(err, AppError::MalformedSessionId));
    }

    #[tokio::test]
    async fn expiry_boundary() {
        let fx = Fixture::new().await;

        let nonce = fx.nonce(STUDENT).await;
        let err = fx.submit_at(&fx.request(STUDENT, &nonce), at(121)).await.unwrap_err();
        assert!(matches!(err, AppError::SessionNotActive));
        // Rejected before consumption; the nonce is still usable.
        assert!(!fx.store.nonce(&nonce).await.unwrap().used);

        fx.submit_at(&fx.request(STUDENT, &nonce), at(119)).await.unwrap();
    }

    #[tokio::test]
    async fn unknown_session_is_not_active() {
        let fx = Fixture::new().await;
        let mut request = fx.request(STUDENT, "abc");
        request.session_id = Some(Uuid::new_v4().to_string());
        let err = fx.submit_at(&request, at(5)).await.unwrap_err();
        assert!(matches!(err, AppError::SessionNotActive));
    }

    #[tokio::test]
    async fn tampered_payload_is_rejected_without_consuming() {
        let fx = Fixture::new().await;
        let nonce = fx.nonce(STUDENT).await;

        let mut tampered = fx.session.clone();
        let forged = sessions::canonical_payload(tampered.id, at(0), at(120), 2, 1);
        tampered.payload_b64 = general_purpose::STANDARD.encode(forged);
        fx.store.replace_session(tampered).await;

        let err = fx.submit_at(&fx.request(STUDENT, &nonce), at(5)).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidSessionSignature));
        assert!(!fx.store.nonce(&nonce).await.unwrap().used);
        assert_eq!(fx.store.record_count(fx.session.id).await, 0);
    }

    #[tokio::test]
    async fn signature_from_another_key_is_rejected() {
        let fx = Fixture::new().await;
        let nonce = fx.nonce(STUDENT).await;

        let payload = general_purpose::STANDARD.decode(&fx.session.payload_b64).unwrap();
        let other = crate::crypto::pem::parse_private_key(TEACHER_KEY).unwrap();
        let signature = SigningKey::<Sha256>::new(other).sign(&payload).to_vec();

        let mut resigned = fx.session.clone();
        resigned.signature_b64 = general_purpose::STANDARD.encode(signature);
        fx.store.replace_session(resigned).await;

        let err = fx.submit_at(&fx.request(STUDENT, &nonce), at(5)).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidSessionSignature));
    }

    #[tokio::test]
    async fn unknown_or_foreign_nonce_is_rejected() {
        let fx = Fixture::new().await;
        let err = fx.submit_at(&fx.request(STUDENT, "never-issued"), at(5)).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidOrReusedNonce));

        let err = fx.submit_at(&fx.request(STUDENT, "bad nonce!"), at(5)).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidOrReusedNonce));

        // A nonce of another session does not match this one.
        let other = sessions::create_session(&fx.store, &fx.signer, Some(42), Some(1), Some(1), 120, at(0))
            .await
            .unwrap();
        let foreign = nonces::issue(&fx.store, &other.id.to_string(), Some(STUDENT), at(1))
            .await
            .unwrap();
        let err = fx.submit_at(&fx.request(STUDENT, &foreign.nonce), at(5)).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidOrReusedNonce));
        assert!(!fx.store.nonce(&foreign.nonce).await.unwrap().used);
    }

    #[tokio::test]
    async fn outsider_burns_nonce_without_record() {
        let fx = Fixture::new().await;
        let nonce = fx.nonce(STUDENT).await;

        let err = fx.submit_at(&fx.request(OUTSIDER, &nonce), at(5)).await.unwrap_err();
        assert!(matches!(err, AppError::StudentNotInClass));
        assert!(fx.store.nonce(&nonce).await.unwrap().used);
        assert_eq!(fx.store.record_count(fx.session.id).await, 0);
    }

    #[tokio::test]
    async fn client_signature_is_ignored() {
        let fx = Fixture::new().await;
        let nonce = fx.nonce(STUDENT).await;
        let mut request = fx.request(STUDENT, &nonce);
        request.signature = Some("bm90IGEgc2lnbmF0dXJl".to_string());
        request.face_verified = Some(false);

        let record = fx.submit_at(&request, at(5)).await.unwrap();
        assert!(record.face_verified);
    }

    #[tokio::test]
    async fn concurrent_submissions_record_at_most_once() {
        let fx = Arc::new(Fixture::new().await);
        let mut requests = Vec::new();
        for _ in 0..16 {
            requests.push(fx.request(STUDENT, &fx.nonce(STUDENT).await));
        }

        let handles: Vec<_> = requests
            .into_iter()
            .map(|request| {
                let fx = fx.clone();
                tokio::spawn(async move { fx.submit_at(&request, at(5)).await })
            })
            .collect();

        let results: Vec<_> = futures::future::join_all(handles)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, AppError::DuplicateAttendance)));
        assert_eq!(fx.store.record_count(fx.session.id).await, 1);
    }

    #[tokio::test]
    async fn concurrent_replay_of_one_nonce_has_one_winner() {
        let fx = Arc::new(Fixture::new().await);
        let nonce = fx.nonce(STUDENT).await;

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let fx = fx.clone();
                let request = fx.request(STUDENT, &nonce);
                tokio::spawn(async move { fx.submit_at(&request, at(5)).await })
            })
            .collect();

        let results: Vec<_> = futures::future::join_all(handles)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, AppError::InvalidOrReusedNonce)));
    }

    #[tokio::test]
    async fn teacher_signed_session_accepts_submissions() {
        let fx = Fixture::new().await;
        key_store::upload_key(&fx.store, 42, Some(TEACHER_PUB), None, None, at(0))
            .await
            .unwrap();

        let id = Uuid::new_v4();
        let payload = sessions::canonical_payload(id, at(0), at(120), 1, 1);
        let key = crate::crypto::pem::parse_private_key(TEACHER_KEY).unwrap();
        let signature = SigningKey::<Sha256>::new(key).sign(payload.as_bytes()).to_vec();

        let session = sessions::register_signed_session(
            &fx.store,
            Some(42),
            Some(&general_purpose::STANDARD.encode(&payload)),
            Some(&general_purpose::STANDARD.encode(signature)),
            600,
            at(1),
        )
        .await
        .unwrap();

        let nonce = nonces::issue(&fx.store, &session.id.to_string(), Some(STUDENT), at(2))
            .await
            .unwrap();
        let request = SubmissionRequest {
            session_id: Some(session.id.to_string()),
            student_id: Some(STUDENT),
            nonce: Some(nonce.nonce),
            ..Default::default()
        };
        submit(&fx.store, &fx.signer, &request, at(3)).await.unwrap();
        assert_eq!(fx.store.record_count(session.id).await, 1);
    }

    #[tokio::test]
    async fn registered_teacher_session_stays_redeemable_after_rotation() {
        let fx = Fixture::new().await;
        key_store::upload_key(
            &fx.store,
            42,
            Some(TEACHER_PUB),
            Some(at(-60).to_rfc3339().as_str()),
            Some(at(1000).to_rfc3339().as_str()),
            at(-60),
        )
        .await
        .unwrap();
        key_store::upload_key(
            &fx.store,
            42,
            Some(include_str!("../../tests/fixtures/server_pub.pem")),
            Some(at(5).to_rfc3339().as_str()),
            None,
            at(5),
        )
        .await
        .unwrap();

        let id = Uuid::new_v4();
        let payload = sessions::canonical_payload(id, at(0), at(120), 1, 1);
        let key = crate::crypto::pem::parse_private_key(TEACHER_KEY).unwrap();
        let signature = SigningKey::<Sha256>::new(key).sign(payload.as_bytes()).to_vec();
        sessions::register_signed_session(
            &fx.store,
            Some(42),
            Some(&general_purpose::STANDARD.encode(&payload)),
            Some(&general_purpose::STANDARD.encode(signature)),
            600,
            at(10),
        )
        .await
        .unwrap();

        let nonce = nonces::issue(&fx.store, &id.to_string(), Some(STUDENT), at(11))
            .await
            .unwrap();
        let request = SubmissionRequest {
            session_id: Some(id.to_string()),
            student_id: Some(STUDENT),
            nonce: Some(nonce.nonce),
            ..Default::default()
        };
        submit(&fx.store, &fx.signer, &request, at(12)).await.unwrap();
    }
}
