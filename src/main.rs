use std::time::Duration;

use chrono::Utc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use attendance_signing::{
    config::Config,
    crypto::signer::Signer,
    db,
    repositories::postgres::PgStore,
    routes,
    services::nonces,
    state::AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    tracing::info!("✅ Configuration loaded successfully");

    let pool = db::create_pool(&config.database_url)?;
    tracing::info!("✅ PostgreSQL Pool initialized with deadpool-postgres");

    if let Err(e) = db::verify_schema(&pool).await {
        tracing::error!("❌ Schema verification failed: {}", e);
        return Err(e.into());
    }

    let signer = match Signer::from_config(&config.signing) {
        Ok(signer) => signer,
        Err(e) => {
            tracing::error!("❌ Failed to load signing key: {}", e);
            return Err(e.into());
        }
    };

    let bind_addr = config.bind_addr;
    let retention = chrono::Duration::hours(config.nonce_retention_hours);
    let state = AppState::new(PgStore::new(pool), signer, config);
    let app = routes::router(state.clone())?;

    let cleanup_store = state.store.clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            tracing::info!("🧹 Running scheduled purge of expired nonces...");
            match nonces::purge_expired(&cleanup_store, Utc::now(), retention).await {
                Ok(purged) => {
                    tracing::info!("✅ Purge completed, {} nonces removed", purged);
                }
                Err(e) => {
                    tracing::error!("❌ Purge failed: {}", e);
                }
            }
        }
    });

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("🚀 Server listening on http://{}", listener.local_addr()?);
    tracing::info!("✅ Background purge job started (runs every hour)");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}
