use sqlx::postgres::PgPoolOptions;

use crate::config::ServerConfig;

pub type DbPool = sqlx::PgPool;

pub async fn get_pool(config: &ServerConfig) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(16)
        .connect(&config.database_url)
        .await
}
