use axum::{
    extract::{
        Path, State,
        rejection::{JsonRejection, PathRejection},
    },
    http::StatusCode,
    response::Response,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::{
    error::Result,
    handlers::json::respond,
    repositories::store::Store,
    services::{
        nonces as nonce_service,
        submission::{self as submission_service, SubmissionRequest},
    },
    state::AppState,
};

/// The request payload for a nonce.
#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct NonceRequest {
    pub student_id: Option<i64>,
}

/// The response payload for a successful submission.
#[derive(Serialize)]
pub struct SubmissionResponse {
    pub success: bool,
    pub message: String,
}

/// Issues a single-use nonce to a student of the session's class.
pub async fn issue_nonce<S: Store>(
    State(state): State<AppState<S>>,
    path: std::result::Result<Path<String>, PathRejection>,
    body: std::result::Result<Json<NonceRequest>, JsonRejection>,
) -> Result<Response> {
    let Path(session_id) = path?;
    let Json(req) = body?;
    let nonce = nonce_service::issue(&state.store, &session_id, req.student_id, Utc::now()).await?;

    respond(
        StatusCode::CREATED,
        &sonic_rs::json!({ "nonce": nonce.nonce }),
    )
}

/// Records attendance for a signed session.
pub async fn submit<S: Store>(
    State(state): State<AppState<S>>,
    body: std::result::Result<Json<SubmissionRequest>, JsonRejection>,
) -> Result<Response> {
    let Json(req) = body?;
    submission_service::submit(&state.store, &state.signer, &req, Utc::now()).await?;

    respond(
        StatusCode::OK,
        &SubmissionResponse {
            success: true,
            message: "Attendance recorded".to_string(),
        },
    )
}
