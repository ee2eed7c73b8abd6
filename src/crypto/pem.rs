use base64::{Engine as _, engine::general_purpose};
use rsa::{
    RsaPrivateKey, RsaPublicKey,
    pkcs8::{DecodePrivateKey, DecodePublicKey},
};

use crate::error::{AppError, Result};

/// Strips `-----BEGIN …-----` / `-----END …-----` lines and all whitespace,
/// leaving only the base64 body. Bare base64 passes through unchanged.
pub fn strip_armor(material: &str) -> String {
    material
        .lines()
        .map(str::trim)
        .filter(|line| !line.starts_with("-----"))
        .flat_map(|line| line.chars())
        .filter(|c| !c.is_whitespace())
        .collect()
}

fn decode_der(material: &str) -> Result<Vec<u8>> {
    let body = strip_armor(material);
    if body.is_empty() {
        return Err(AppError::KeyMaterialInvalid("empty key material".to_string()));
    }

    general_purpose::STANDARD
        .decode(body.as_bytes())
        .map_err(|e| AppError::KeyMaterialInvalid(format!("not valid base64: {}", e)))
}

/// Parses an RSA public key from SPKI PEM or bare base64 DER.
///
/// # Arguments
///
/// * `material` - The key text as uploaded or configured.
///
/// # Returns
///
/// A `Result` containing the `RsaPublicKey`.
pub fn parse_public_key(material: &str) -> Result<RsaPublicKey> {
    let der = decode_der(material)?;
    RsaPublicKey::from_public_key_der(&der)
        .map_err(|e| AppError::KeyMaterialInvalid(format!("not an RSA public key: {}", e)))
}

/// Parses an RSA private key from PKCS#8 PEM or bare base64 DER.
pub fn parse_private_key(material: &str) -> Result<RsaPrivateKey> {
    let der = zeroize::Zeroizing::new(decode_der(material)?);
    RsaPrivateKey::from_pkcs8_der(&der)
        .map_err(|e| AppError::KeyMaterialInvalid(format!("not an RSA private key: {}", e)))
}
