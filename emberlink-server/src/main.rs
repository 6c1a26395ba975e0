use config::ServerConfig;
use sqlx::migrate::Migrator;
use state::AppState;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;

use crate::{
    mailer::{LogMailer, Mailer, SmtpMailer},
    rate_limit::RateLimiter,
    sse::SseBroker,
    store::{MemoryStore, RedisStore, SessionStore},
    tenant::TenantCache,
};

mod api;
mod config;
mod crypto;
mod db;
mod error;
mod flow;
mod keys;
mod mailer;
mod ops;
mod pages;
mod queries;
mod rate_limit;
mod sse;
mod sso;
mod state;
mod store;
mod tenant;

// Embed all sql migrations in binary
static MIGRATOR: Migrator = sqlx::migrate!();

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    // Reads RUST_LOG; defaults to info
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info"),
    )
    .init();

    let config = ServerConfig::from_env()?;

    let db_pool = Arc::new(db::get_pool(&config).await?);
    MIGRATOR.run(db_pool.as_ref()).await?;
    log::info!("Migrations are up to date.");

    // session store + SSE bridge: fast store when configured, in-process
    // fallback otherwise
    let (session_store, sse_broker): (Arc<dyn SessionStore>, SseBroker) =
        match &config.fast_store_url {
            Some(url) => {
                let store = RedisStore::connect(url).await?;
                let client = redis::Client::open(url.as_str())?;
                let publisher =
                    redis::aio::ConnectionManager::new(client.clone())
                        .await?;
                let broker = SseBroker::new(Some(publisher));
                tokio::spawn(broker.clone().run_bridge(client));
                log::info!("Using fast store at {url}");
                (Arc::new(store), broker)
            }
            None => {
                log::info!(
                    "No fast store configured; using the in-process store"
                );
                (Arc::new(MemoryStore::new()), SseBroker::new(None))
            }
        };

    let mailer: Arc<dyn Mailer> = match &config.smtp {
        Some(smtp) => Arc::new(SmtpMailer::new(smtp.clone())),
        None => Arc::new(LogMailer),
    };

    let app_state = AppState {
        config: Arc::new(config.clone()),
        db_pool,
        http_client: reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()?,
        session_store: session_store.clone(),
        sse: sse_broker,
        rate_limiter: RateLimiter::new(session_store),
        tenant_cache: Arc::new(TenantCache::new()),
        upstream_jwks: Arc::new(tokio::sync::RwLock::new(
            std::collections::HashMap::new(),
        )),
        mailer,
    };

    ops::bootstrap::seed_default_tenant(&app_state).await?;

    let app = api::router()
        .layer(CorsLayer::permissive())
        .with_state(app_state);

    let ip_addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&ip_addr).await?;

    log::info!("Starting server on {ip_addr}");
    axum::serve(listener, app).await?;
    Ok(())
}
