use chrono::{DateTime, Utc};
use clap::Parser;
use refresh_lifecycle::configuration::get_configuration;
use refresh_lifecycle::error::AppError;
use refresh_lifecycle::refresh_token::{PgRefreshTokenStore, RefreshTokenStore};
use refresh_lifecycle::telemetry::init_telemetry;
use sqlx::postgres::PgPoolOptions;

/// Revokes refresh tokens that expired before a cut-off.
#[derive(Debug, Parser)]
#[command(name = "refresh_lifecycle", version)]
struct Cli {
    /// RFC 3339 cut-off (e.g. 2024-01-01T00:00:00Z); defaults to now.
    #[arg(long, env = "REVOKE_BEFORE")]
    before: Option<DateTime<Utc>>,

    /// Log each revoked token's identity and expiry.
    #[arg(long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let cli = Cli::parse();
    init_telemetry("info");

    let configuration = match get_configuration() {
        Ok(config) => {
            tracing::info!("Configuration loaded successfully");
            config
        }
        Err(e) => {
            tracing::error!("Failed to read configuration: {}", e);
            return Err(e.into());
        }
    };
    configuration.refresh_token.validate()?;

    tracing::info!("Attempting to connect to database");
    let pool = PgPoolOptions::new()
        .max_connections(configuration.database.max_connections)
        .connect(&configuration.database.connection_string())
        .await
        .map_err(|e| {
            tracing::error!("Failed to create connection pool: {}", e);
            AppError::from(e)
        })?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| AppError::Internal(format!("Failed to migrate the database: {}", e)))?;

    let store = PgRefreshTokenStore::new(pool);
    let before = cli.before.unwrap_or_else(Utc::now);
    let revoked = store.revoke_all_expired(before).await?;

    if cli.verbose {
        for token in &revoked {
            tracing::info!(
                token_id = %token.id(),
                identity = %token.identity(),
                valid_until = token.expiration_timestamp(),
                "Revoked refresh token"
            );
        }
    }

    tracing::info!(count = revoked.len(), before = %before, "Revocation finished");
    Ok(())
}
