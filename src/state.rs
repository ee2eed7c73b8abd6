use std::sync::Arc;

use crate::config::Config;
use crate::crypto::signer::Signer;
use crate::repositories::store::Store;

/// The application's state.
#[derive(Clone)]
pub struct AppState<S: Store> {
    /// The session, nonce, record and key store.
    pub store: S,
    /// The server signing keypair, fixed for the process lifetime.
    pub signer: Arc<Signer>,
    /// The application's configuration.
    pub config: Config,
}

impl<S: Store> AppState<S> {
    /// Creates a new `AppState`.
    ///
    /// # Arguments
    ///
    /// * `store` - The backing store.
    /// * `signer` - The server signing keypair.
    /// * `config` - The application's configuration.
    ///
    /// # Returns
    ///
    /// The `AppState`.
    pub fn new(store: S, signer: Signer, config: Config) -> Self {
        tracing::info!(
            "✅ AppState initialized (signing key {})",
            signer.fingerprint()
        );
        Self {
            store,
            signer: Arc::new(signer),
            config,
        }
    }
}
