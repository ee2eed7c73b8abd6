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
use serde::Deserialize;

use crate::{
    error::Result,
    handlers::json::respond,
    repositories::store::Store,
    services::key_store,
    state::AppState,
};

/// The request payload for uploading a teacher public key.
#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct UploadKeyRequest {
    pub public_key_pem: Option<String>,
    pub valid_from: Option<String>,
    pub valid_to: Option<String>,
}

/// Stores a new verification key for a teacher.
pub async fn upload_key<S: Store>(
    State(state): State<AppState<S>>,
    path: std::result::Result<Path<i64>, PathRejection>,
    body: std::result::Result<Json<UploadKeyRequest>, JsonRejection>,
) -> Result<Response> {
    let Path(teacher_id) = path?;
    let Json(req) = body?;
    let key = key_store::upload_key(
        &state.store,
        teacher_id,
        req.public_key_pem.as_deref(),
        req.valid_from.as_deref(),
        req.valid_to.as_deref(),
        Utc::now(),
    )
    .await?;

    respond(
        StatusCode::CREATED,
        &sonic_rs::json!({
            "teacherId": teacher_id,
            "keyId": key.id,
            "validFrom": key.valid_from.to_rfc3339(),
            "validTo": key.valid_to.to_rfc3339(),
            "saved": true,
        }),
    )
}
