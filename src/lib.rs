//! Signed attendance sessions: canonical payload signing, per-teacher
//! verification keys, single-use nonces and exactly-once submission.

pub mod config;
pub mod db;
pub mod error;
pub mod routes;
pub mod state;

pub mod crypto {
    pub mod nonce;
    pub mod pem;
    pub mod signer;
}

pub mod models {
    pub mod nonce;
    pub mod record;
    pub mod session;
    pub mod teacher_key;
}

pub mod repositories {
    pub mod memory;
    pub mod postgres;
    pub mod store;
}

pub mod services {
    pub mod key_store;
    pub mod nonces;
    pub mod sessions;
    pub mod submission;
}

pub mod handlers {
    pub mod attendance;
    pub mod json;
    pub mod sessions;
    pub mod teacher_keys;
}

pub mod validation {
    pub mod attendance;
}
