use rand::rngs::OsRng;
use rsa::{
    RsaPrivateKey, RsaPublicKey,
    pkcs1v15::{Signature, SigningKey, VerifyingKey},
    pkcs8::{EncodePublicKey, LineEnding},
    signature::{SignatureEncoding, Signer as _, Verifier as _},
};
use sha2::{Digest, Sha256};

use crate::config::SigningConfig;
use crate::crypto::pem;
use crate::error::{AppError, Result};

/// Modulus size of generated signing keys.
pub const RSA_KEY_BITS: usize = 2048;
/// Signature scheme advertised to devices.
pub const SIGNATURE_ALGORITHM: &str = "SHA256withRSA";

/// The server's session signing keypair.
///
/// Built once at startup and never mutated afterwards. Rotation happens by
/// adding teacher keys, not by replacing this keypair in place.
pub struct Signer {
    signing_key: SigningKey<Sha256>,
    public_key: RsaPublicKey,
    public_key_pem: String,
    fingerprint: String,
}

impl Signer {
    /// Builds a signer from a private key and an optional matching public key.
    ///
    /// # Arguments
    ///
    /// * `private_material` - PKCS#8 PEM or bare base64 DER.
    /// * `public_material` - SPKI PEM or bare base64 DER; must match the private key.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `Signer`.
    pub fn from_pem(private_material: &str, public_material: Option<&str>) -> Result<Self> {
        let private_key = pem::parse_private_key(private_material)?;

        if let Some(public_material) = public_material {
            let configured = pem::parse_public_key(public_material)?;
            if configured != RsaPublicKey::from(&private_key) {
                return Err(AppError::KeyMaterialInvalid(
                    "configured public key does not match the private key".to_string(),
                ));
            }
        }

        Self::from_private_key(private_key)
    }

    /// Generates a fresh 2048-bit keypair.
    pub fn generate() -> Result<Self> {
        let private_key = RsaPrivateKey::new(&mut OsRng, RSA_KEY_BITS)
            .map_err(|e| AppError::Unexpected(format!("RSA key generation failed: {}", e)))?;
        Self::from_private_key(private_key)
    }

    /// Loads the configured keypair, or generates one when none is configured
    /// and the deployment allows ephemeral keys.
    pub fn from_config(config: &SigningConfig) -> Result<Self> {
        match config.private_key {
            Some(ref private_key) => {
                let signer = Self::from_pem(private_key, config.public_key.as_deref())?;
                tracing::info!("✅ Signing key loaded from configuration - fingerprint: {}", signer.fingerprint);
                Ok(signer)
            }
            None if config.require_persistent => Err(AppError::KeyMaterialInvalid(
                "ATTENDANCE_SIGNING_PRIVATE_KEY is required when persistent signing keys are enforced"
                    .to_string(),
            )),
            None => {
                let signer = Self::generate()?;
                tracing::warn!(
                    "⚠️  No signing key configured, generated ephemeral key {} - sessions will not survive a restart",
                    signer.fingerprint
                );
                Ok(signer)
            }
        }
    }

    fn from_private_key(private_key: RsaPrivateKey) -> Result<Self> {
        let public_key = RsaPublicKey::from(&private_key);
        let der = public_key
            .to_public_key_der()
            .map_err(|e| AppError::Unexpected(format!("Public key encoding failed: {}", e)))?;
        let public_key_pem = public_key
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| AppError::Unexpected(format!("Public key encoding failed: {}", e)))?;
        let fingerprint = hex::encode(&Sha256::digest(der.as_bytes())[..8]);

        Ok(Self {
            signing_key: SigningKey::<Sha256>::new(private_key),
            public_key,
            public_key_pem,
            fingerprint,
        })
    }

    /// Signs `payload` with RSASSA-PKCS1-v1_5 over SHA-256. Deterministic.
    pub fn sign(&self, payload: &[u8]) -> Vec<u8> {
        self.signing_key.sign(payload).to_vec()
    }

    /// The public half of the signing keypair.
    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public_key
    }

    /// The public key as SPKI PEM.
    pub fn public_key_pem(&self) -> &str {
        &self.public_key_pem
    }

    /// First 8 bytes of SHA-256 over the SPKI DER, hex encoded.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

/// Verifies a detached signature. Malformed signature bytes yield `false`.
pub fn verify(payload: &[u8], signature: &[u8], public_key: &RsaPublicKey) -> bool {
    let Ok(signature) = Signature::try_from(signature) else {
        return false;
    };

    VerifyingKey::<Sha256>::new(public_key.clone())
        .verify(payload, &signature)
        .is_ok()
}
