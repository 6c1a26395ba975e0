use std::collections::HashMap;
use std::sync::Arc;

use crate::{
    config::ServerConfig,
    db::DbPool,
    mailer::Mailer,
    rate_limit::RateLimiter,
    sse::SseBroker,
    store::SessionStore,
    tenant::TenantCache,
};

pub type UpstreamJwksCache =
    HashMap<String, crate::sso::verify::CachedJwks>;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub db_pool: Arc<DbPool>,
    pub http_client: reqwest::Client,
    pub session_store: Arc<dyn SessionStore>,
    pub sse: SseBroker,
    pub rate_limiter: RateLimiter,
    pub tenant_cache: Arc<TenantCache>,
    pub upstream_jwks: Arc<tokio::sync::RwLock<UpstreamJwksCache>>,
    pub mailer: Arc<dyn Mailer>,
}
