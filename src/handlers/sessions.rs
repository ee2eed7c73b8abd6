use axum::{
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::Response,
    Json,
};
use chrono::Utc;
use serde::Deserialize;

use crate::{
    crypto::signer::SIGNATURE_ALGORITHM,
    error::Result,
    handlers::json::respond,
    repositories::store::Store,
    services::sessions::{self as session_service, IssuedSession},
    state::AppState,
};

/// The request payload for creating a server-signed session.
#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    pub teacher_id: Option<i64>,
    pub class_id: Option<i64>,
    pub subject_id: Option<i64>,
}

/// The request payload for registering a session signed on a teacher device.
#[derive(Deserialize, Debug)]
pub struct SignedSessionRequest {
    #[serde(rename = "teacherId")]
    pub teacher_id: Option<i64>,
    pub payload_b64: Option<String>,
    pub signature_b64: Option<String>,
}

/// Creates a session signed with the server key.
pub async fn create_session<S: Store>(
    State(state): State<AppState<S>>,
    body: std::result::Result<Json<CreateSessionRequest>, JsonRejection>,
) -> Result<Response> {
    let Json(req) = body?;
    let session = session_service::create_session(
        &state.store,
        &state.signer,
        req.teacher_id,
        req.class_id,
        req.subject_id,
        state.config.session_lifetime_secs,
        Utc::now(),
    )
    .await?;

    respond(StatusCode::CREATED, &IssuedSession::from(&session))
}

/// Registers a session whose payload the teacher device signed itself.
pub async fn register_signed_session<S: Store>(
    State(state): State<AppState<S>>,
    body: std::result::Result<Json<SignedSessionRequest>, JsonRejection>,
) -> Result<Response> {
    let Json(req) = body?;
    let session = session_service::register_signed_session(
        &state.store,
        req.teacher_id,
        req.payload_b64.as_deref(),
        req.signature_b64.as_deref(),
        state.config.max_signed_session_lifetime_secs,
        Utc::now(),
    )
    .await?;

    respond(StatusCode::CREATED, &IssuedSession::from(&session))
}

/// Publishes the server verification key so devices can check session
/// payloads offline.
pub async fn signing_key<S: Store>(State(state): State<AppState<S>>) -> Result<Response> {
    respond(
        StatusCode::OK,
        &sonic_rs::json!({
            "algorithm": SIGNATURE_ALGORITHM,
            "fingerprint": state.signer.fingerprint(),
            "publicKeyPem": state.signer.public_key_pem(),
        }),
    )
}
