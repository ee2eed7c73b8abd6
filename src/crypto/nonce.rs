use base64::{Engine as _, engine::general_purpose};
use rand::RngCore;
use rand::rngs::OsRng;

/// Entropy drawn for each nonce, in bytes.
pub const NONCE_BYTES: usize = 24;

/// Generates a new random nonce.
///
/// # Returns
///
/// A URL-safe base64-encoded token without padding (32 characters).
pub fn generate_nonce() -> String {
    let mut token = [0u8; NONCE_BYTES];
    OsRng.fill_bytes(&mut token);

    general_purpose::URL_SAFE_NO_PAD.encode(token)
}
