use anyhow::Context;
use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::info;

pub async fn connection_manager(
    uri: &str,
    max_size: u32,
    min_idle: u32,
) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_size)
        .min_connections(min_idle)
        .connect(uri)
        .await
        .context("error while initializing the database connection pool")?;

    info!(max_size, min_idle, "database connection pool initialized");
    Ok(pool)
}
