use uuid::Uuid;

use crate::error::{AppError, Result};

/// Upper bound on a nonce value accepted from a client.
pub const MAX_NONCE_LEN: usize = 128;

/// Parses a session id.
///
/// # Arguments
///
/// * `raw` - The session id as sent by the client.
///
/// # Returns
///
/// A `Result` containing the parsed `Uuid`, or `MalformedSessionId`.
pub fn parse_session_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw.trim()).map_err(|_| AppError::MalformedSessionId)
}

/// Returns the trimmed value when present and non-blank.
pub fn present(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Validates the shape of a client-supplied nonce.
///
/// A nonce that fails this check can never match a stored one, so it is
/// reported exactly like a reused nonce.
pub fn validate_nonce(nonce: &str) -> Result<()> {
    if nonce.len() > MAX_NONCE_LEN
        || !nonce
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(AppError::InvalidOrReusedNonce);
    }
    Ok(())
}
