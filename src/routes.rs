use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    routing::{get, post},
};
use http::{HeaderValue, Method, header};
use tower::ServiceBuilder;
use tower_governor::governor::GovernorConfigBuilder;
use tower_http::{
    cors::CorsLayer,
    timeout::TimeoutLayer,
    trace::{DefaultMakeSpan, DefaultOnFailure, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::{
    error::{AppError, Result},
    handlers,
    repositories::store::Store,
    state::AppState,
};

/// Builds the application router.
///
/// Student-facing routes sit behind a per-IP rate limiter, which keys on
/// the peer address; serve the router with
/// `into_make_service_with_connect_info::<SocketAddr>()`.
///
/// # Arguments
///
/// * `state` - The application state.
///
/// # Returns
///
/// A `Result` containing the `Router`.
pub fn router<S: Store>(state: AppState<S>) -> Result<Router> {
    let cors = CorsLayer::new()
        .allow_origin([
            HeaderValue::from_static("http://localhost:3000"),
            HeaderValue::from_static("http://127.0.0.1:3000"),
            HeaderValue::from_static("http://[::1]:3000"),
        ])
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
        .max_age(Duration::from_secs(86400));

    let student_governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_millisecond(state.config.rate_limit_replenish_ms)
            .burst_size(state.config.rate_limit_burst)
            .use_headers()
            .finish()
            .ok_or_else(|| AppError::Unexpected("invalid rate limit settings".to_string()))?,
    );

    let student_routes = Router::new()
        .route(
            "/api/attendance/sessions/{session_id}/nonce",
            post(handlers::attendance::issue_nonce::<S>),
        )
        .route("/api/attendance/submit", post(handlers::attendance::submit::<S>))
        .layer(tower_governor::GovernorLayer::new(student_governor_conf));

    let teacher_routes = Router::new()
        .route("/api/attendance/sessions", post(handlers::sessions::create_session::<S>))
        .route(
            "/api/attendance/sessions/signed",
            post(handlers::sessions::register_signed_session::<S>),
        )
        .route(
            "/api/attendance/signing-key",
            get(handlers::sessions::signing_key::<S>),
        )
        .route(
            "/api/teachers/{teacher_id}/key",
            post(handlers::teacher_keys::upload_key::<S>),
        );

    let timeout = Duration::from_secs(state.config.request_timeout_secs);

    Ok(Router::new()
        .merge(student_routes)
        .merge(teacher_routes)
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(DefaultMakeSpan::default().include_headers(false))
                        .on_request(DefaultOnRequest::default().level(Level::DEBUG))
                        .on_response(DefaultOnResponse::default().level(Level::DEBUG))
                        .on_failure(DefaultOnFailure::default().level(Level::ERROR)),
                )
                .layer(cors)
                .layer(TimeoutLayer::new(timeout)),
        ))
}
