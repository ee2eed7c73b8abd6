use std::env;
use std::net::SocketAddr;
use anyhow::{Context, Result};
use zeroize::Zeroizing;

/// The default lifetime of a server-signed attendance session, in seconds.
pub const DEFAULT_SESSION_LIFETIME_SECS: i64 = 120;

/// Upper bound for any session window, in seconds.
pub const MAX_SESSION_WINDOW_SECS: i64 = 86_400;

/// Upper bound for nonce retention, in hours.
pub const MAX_NONCE_RETENTION_HOURS: i64 = 24 * 365;

/// Where the server signing keypair comes from.
#[derive(Clone)]
pub struct SigningConfig {
    /// PKCS#8 PEM (or bare base64 DER) private key.
    pub private_key: Option<Zeroizing<String>>,
    /// SPKI PEM (or bare base64 DER) public key, checked against the private key.
    pub public_key: Option<String>,
    /// Refuse to start with a freshly generated keypair.
    pub require_persistent: bool,
}

/// The application's configuration.
#[derive(Clone)]
pub struct Config {
    /// The URL of the PostgreSQL database.
    pub database_url: String,
    /// The address the HTTP server binds to.
    pub bind_addr: SocketAddr,
    /// Lifetime of server-signed sessions in seconds.
    pub session_lifetime_secs: i64,
    /// Longest window a teacher-signed session may declare, in seconds.
    pub max_signed_session_lifetime_secs: i64,
    /// How long nonces of expired sessions are kept, in hours.
    pub nonce_retention_hours: i64,
    /// Per-request timeout at the HTTP boundary, in seconds.
    pub request_timeout_secs: u64,
    /// Replenish interval of the per-IP rate limiter, in milliseconds.
    pub rate_limit_replenish_ms: u64,
    /// Burst size of the per-IP rate limiter.
    pub rate_limit_burst: u32,
    /// Server signing key settings.
    pub signing: SigningConfig,
}

impl Config {
    /// Creates a new `Config` from environment variables.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `Config`.
    pub fn from_env() -> Result<Self> {
        let is_production = env::var("APP_ENV")
            .unwrap_or_else(|_| "development".to_string()) == "production";

        let require_persistent = match env::var("REQUIRE_PERSISTENT_SIGNING_KEY") {
            Ok(v) => v
                .parse()
                .context("REQUIRE_PERSISTENT_SIGNING_KEY must be true or false")?,
            Err(_) => is_production,
        };

        let private_key = env::var("ATTENDANCE_SIGNING_PRIVATE_KEY")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(Zeroizing::new);
        let public_key = env::var("ATTENDANCE_SIGNING_PUBLIC_KEY")
            .ok()
            .filter(|v| !v.trim().is_empty());

        if public_key.is_some() && private_key.is_none() {
            anyhow::bail!(
                "ATTENDANCE_SIGNING_PUBLIC_KEY is set but ATTENDANCE_SIGNING_PRIVATE_KEY is missing"
            );
        }

        let rate_limit_per_second: u64 = env::var("RATE_LIMIT_PER_SECOND")
            .unwrap_or_else(|_| "50".to_string())
            .parse()
            .context("Invalid RATE_LIMIT_PER_SECOND")?;
        if rate_limit_per_second == 0 {
            anyhow::bail!("RATE_LIMIT_PER_SECOND must be positive");
        }

        let session_lifetime_secs: i64 = env::var("SESSION_LIFETIME_SECS")
            .unwrap_or_else(|_| DEFAULT_SESSION_LIFETIME_SECS.to_string())
            .parse()
            .context("Invalid SESSION_LIFETIME_SECS")?;
        let session_lifetime_secs =
            bounded("SESSION_LIFETIME_SECS", session_lifetime_secs, MAX_SESSION_WINDOW_SECS)?;

        let max_signed_session_lifetime_secs: i64 = env::var("MAX_SIGNED_SESSION_LIFETIME_SECS")
            .unwrap_or_else(|_| "600".to_string())
            .parse()
            .context("Invalid MAX_SIGNED_SESSION_LIFETIME_SECS")?;
        let max_signed_session_lifetime_secs = bounded(
            "MAX_SIGNED_SESSION_LIFETIME_SECS",
            max_signed_session_lifetime_secs,
            MAX_SESSION_WINDOW_SECS,
        )?;

        let nonce_retention_hours: i64 = env::var("NONCE_RETENTION_HOURS")
            .unwrap_or_else(|_| "24".to_string())
            .parse()
            .context("Invalid NONCE_RETENTION_HOURS")?;
        let nonce_retention_hours =
            bounded("NONCE_RETENTION_HOURS", nonce_retention_hours, MAX_NONCE_RETENTION_HOURS)?;

        Ok(Self {
            database_url: env::var("DATABASE_URL")
                .context("DATABASE_URL must be set")?,
            bind_addr: env::var("BIND_ADDR")
                .unwrap_or_else(|_| "127.0.0.1:3000".to_string())
                .parse()
                .context("Invalid BIND_ADDR")?,
            session_lifetime_secs,
            max_signed_session_lifetime_secs,
            nonce_retention_hours,
            request_timeout_secs: env::var("REQUEST_TIMEOUT_SECS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .context("Invalid REQUEST_TIMEOUT_SECS")?,
            rate_limit_replenish_ms: (1000 / rate_limit_per_second).max(1),
            rate_limit_burst: env::var("RATE_LIMIT_BURST")
                .unwrap_or_else(|_| "100".to_string())
                .parse()
                .context("Invalid RATE_LIMIT_BURST")?,
            signing: SigningConfig {
                private_key,
                public_key,
                require_persistent,
            },
        })
    }

    /// A configuration for serving an in-memory store on an ephemeral port.
    pub fn local(signing: SigningConfig) -> Self {
        Self {
            database_url: String::new(),
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            session_lifetime_secs: DEFAULT_SESSION_LIFETIME_SECS,
            max_signed_session_lifetime_secs: 600,
            nonce_retention_hours: 24,
            request_timeout_secs: 10,
            rate_limit_replenish_ms: 1,
            rate_limit_burst: 10_000,
            signing,
        }
    }
}

/// Checks that a duration setting lies in `1..=max`.
///
/// Out-of-range values would overflow `chrono::Duration` arithmetic later.
fn bounded(name: &str, value: i64, max: i64) -> Result<i64> {
    if value <= 0 {
        anyhow::bail!("{} must be positive", name);
    }
    if value > max {
        anyhow::bail!("{} must be at most {}", name, max);
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_values_within_bounds() {
        assert_eq!(bounded("NONCE_RETENTION_HOURS", 1, MAX_NONCE_RETENTION_HOURS).unwrap(), 1);
        assert_eq!(
            bounded("MAX_SIGNED_SESSION_LIFETIME_SECS", MAX_SESSION_WINDOW_SECS, MAX_SESSION_WINDOW_SECS)
                .unwrap(),
            MAX_SESSION_WINDOW_SECS
        );
    }

    #[test]
    fn rejects_zero_and_negative() {
        let err = bounded("SESSION_LIFETIME_SECS", 0, MAX_SESSION_WINDOW_SECS).unwrap_err();
        assert!(err.to_string().contains("must be positive"));
        assert!(bounded("NONCE_RETENTION_HOURS", -5, MAX_NONCE_RETENTION_HOURS).is_err());
    }

    #[test]
    fn rejects_values_that_would_overflow_durations() {
        // chrono::Duration::hours panics well below i64::MAX.
        let err = bounded("NONCE_RETENTION_HOURS", i64::MAX, MAX_NONCE_RETENTION_HOURS).unwrap_err();
        assert!(err.to_string().contains("NONCE_RETENTION_HOURS must be at most"));
        assert!(bounded(
            "MAX_SIGNED_SESSION_LIFETIME_SECS",
            MAX_SESSION_WINDOW_SECS + 1,
            MAX_SESSION_WINDOW_SECS
        )
        .is_err());
    }

    #[test]
    fn local_config_stays_within_bounds() {
        let config = Config::local(SigningConfig {
            private_key: None,
            public_key: None,
            require_persistent: false,
        });
        assert!(bounded("SESSION_LIFETIME_SECS", config.session_lifetime_secs, MAX_SESSION_WINDOW_SECS).is_ok());
        assert!(bounded(
            "MAX_SIGNED_SESSION_LIFETIME_SECS",
            config.max_signed_session_lifetime_secs,
            MAX_SESSION_WINDOW_SECS
        )
        .is_ok());
        assert!(bounded("NONCE_RETENTION_HOURS", config.nonce_retention_hours, MAX_NONCE_RETENTION_HOURS).is_ok());
    }
}
