use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime};
use tokio_postgres::NoTls;
use crate::error::{AppError, Result};
use std::time::Duration;

/// Columns that hold base64 payloads or signatures. A 2048-bit signature is
/// 344 base64 characters, so none of these may be a bounded `varchar`.
const TEXT_COLUMNS: &[(&str, &str)] = &[
    ("attendance_sessions", "payload_b64"),
    ("attendance_sessions", "signature_b64"),
    ("teacher_keys", "public_key_pem"),
];

/// Creates a new database connection pool.
///
/// # Arguments
///
/// * `database_url` - The URL of the PostgreSQL database.
///
/// # Returns
///
/// A `Result` containing the `Pool`.
pub fn create_pool(database_url: &str) -> Result<Pool> {
    let mut cfg = Config::new();
    let pg_config: tokio_postgres::Config = database_url.parse()?;

    if let Some(host) = pg_config.get_hosts().first() {
        match host {
            tokio_postgres::config::Host::Tcp(hostname) => cfg.host = Some(hostname.clone()),
            #[cfg(unix)]
            tokio_postgres::config::Host::Unix(path) => {
                cfg.host = Some(path.to_string_lossy().to_string())
            }
        }
    }
    if let Some(port) = pg_config.get_ports().first() {
        cfg.port = Some(*port);
    }

    cfg.dbname = pg_config.get_dbname().map(str::to_string);
    cfg.user = pg_config.get_user().map(str::to_string);
    cfg.password = pg_config
        .get_password()
        .map(|p| String::from_utf8_lossy(p).to_string());

    cfg.manager = Some(ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    });

    cfg.pool = Some(PoolConfig {
        max_size: 32,
        timeouts: deadpool_postgres::Timeouts {
            wait: Some(Duration::from_secs(5)),
            create: Some(Duration::from_secs(2)),
            recycle: Some(Duration::from_secs(1)),
        },
        ..Default::default()
    });

    cfg.create_pool(Some(Runtime::Tokio1), NoTls)
        .map_err(|e| AppError::Unexpected(format!("failed to create pool: {}", e)))
}

/// Checks that the tables exist and that signature-bearing columns are
/// unbounded `text`.
pub async fn verify_schema(pool: &Pool) -> Result<()> {
    let client = pool.get().await?;
    let stmt = client
        .prepare_cached(
            r#"
            SELECT data_type
            FROM information_schema.columns
            WHERE table_name = $1 AND column_name = $2
            "#,
        )
        .await?;

    for (table, column) in TEXT_COLUMNS {
        let row = client.query_opt(&stmt, &[table, column]).await?;
        match row.map(|r| r.get::<_, String>(0)) {
            Some(data_type) if data_type == "text" => {}
            Some(data_type) => {
                return Err(AppError::Unexpected(format!(
                    "{}.{} is {}, expected text",
                    table, column, data_type
                )));
            }
            None => {
                return Err(AppError::Unexpected(format!(
                    "{}.{} is missing; apply sql/schema.sql",
                    table, column
                )));
            }
        }
    }

    tracing::info!("✅ Database schema verified");
    Ok(())
}
