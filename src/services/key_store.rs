use chrono::{DateTime, Duration, Utc};
use rsa::RsaPublicKey;

use crate::{
    crypto::pem,
    error::{AppError, Result},
    models::teacher_key::{NewTeacherKey, TeacherKey},
    repositories::store::{Store, StoreTx},
};

/// How far before upload a key without an explicit `validFrom` becomes valid.
pub const DEFAULT_KEY_BACKDATE_SECS: i64 = 60;
/// Validity of a key uploaded without an explicit `validTo`.
pub const DEFAULT_KEY_VALIDITY_SECS: i64 = 3600;

fn parse_bound(field: &str, value: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|v| {
            DateTime::parse_from_rfc3339(v)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|_| AppError::Validation(format!("{} must be an RFC 3339 timestamp", field)))
        })
        .transpose()
}

/// Stores a new public key for a teacher.
///
/// # Arguments
///
/// * `store` - The backing store.
/// * `teacher_id` - The teacher the key belongs to.
/// * `public_key_pem` - SPKI PEM or bare base64 DER.
/// * `valid_from` / `valid_to` - Optional RFC 3339 bounds.
/// * `now` - The upload instant, used for the default bounds.
///
/// # Returns
///
/// A `Result` containing the stored `TeacherKey`.
pub async fn upload_key<S: Store>(
    store: &S,
    teacher_id: i64,
    public_key_pem: Option<&str>,
    valid_from: Option<&str>,
    valid_to: Option<&str>,
    now: DateTime<Utc>,
) -> Result<TeacherKey> {
    let pem_text = public_key_pem
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .ok_or_else(|| AppError::MissingFields("publicKeyPem is required".to_string()))?;

    pem::parse_public_key(pem_text)?;

    let valid_from = parse_bound("validFrom", valid_from)?
        .unwrap_or(now - Duration::seconds(DEFAULT_KEY_BACKDATE_SECS));
    let valid_to = parse_bound("validTo", valid_to)?
        .unwrap_or(now + Duration::seconds(DEFAULT_KEY_VALIDITY_SECS));

    if valid_from > valid_to {
        return Err(AppError::Validation(
            "validFrom must not be after validTo".to_string(),
        ));
    }

    let new_key = NewTeacherKey {
        teacher_id,
        public_key_pem: pem_text.to_string(),
        valid_from,
        valid_to,
    };

    let mut tx = store.begin().await?;
    let key = tx.insert_teacher_key(&new_key, now).await?;
    tx.commit().await?;

    tracing::info!(
        "🔑 Key {} stored for teacher {} (valid {} → {})",
        key.id,
        teacher_id,
        key.valid_from,
        key.valid_to
    );
    Ok(key)
}

/// Selects the teacher's active key at `at` and decodes it.
///
/// `None` means "cannot verify"; callers must never treat it as "allow".
pub async fn active_key_for<T: StoreTx>(
    tx: &mut T,
    teacher_id: i64,
    at: DateTime<Utc>,
) -> Result<Option<(TeacherKey, RsaPublicKey)>> {
    let Some(key) = tx.active_teacher_key(teacher_id, at).await? else {
        return Ok(None);
    };
    let public_key = decode_stored(&key)?;
    Ok(Some((key, public_key)))
}

/// Resolves a pinned key reference, requiring that the key was valid at `at`.
pub async fn key_valid_at<T: StoreTx>(
    tx: &mut T,
    key_id: i64,
    at: DateTime<Utc>,
) -> Result<Option<RsaPublicKey>> {
    match tx.teacher_key(key_id).await? {
        Some(key) if key.is_valid_at(at) => Ok(Some(decode_stored(&key)?)),
        Some(key) => {
            tracing::warn!("⚠️  Key {} was not valid at {}", key.id, at);
            Ok(None)
        }
        None => Ok(None),
    }
}

fn decode_stored(key: &TeacherKey) -> Result<RsaPublicKey> {
    // Keys are validated on upload, so a failure here means the row was
    // altered behind our back.
    pem::parse_public_key(&key.public_key_pem).map_err(|e| {
        AppError::Unexpected(format!("stored key {} no longer decodes: {}", key.id, e))
    })
}
