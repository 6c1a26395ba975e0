use async_trait::async_trait;
use emberlink_types::ProviderType;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

mod memory;
mod redis_store;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("Fast store error: {0}")]
    Backend(String),

    #[error("Store serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// A pending authorization request: the cross-device ceremony's shared
/// state, created at `/authorize` and consumed when the code is issued.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PendingAuthRequest {
    pub rid: String,
    pub tenant_id: Uuid,
    pub client_db_id: Uuid,
    pub client_id: String,
    pub redirect_uri: String,
    pub scope: String,
    pub state: Option<String>,
    pub nonce: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    pub user_id: Option<Uuid>,
    pub completed: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

impl PendingAuthRequest {
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at <= now
    }
}

/// A single-use magic-link token bound to a pending request and email.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MagicToken {
    pub tenant_id: Uuid,
    pub rid: String,
    pub email: String,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

/// Upstream OAuth state minted at `/sso/{type}/start`, consumed at callback.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct UpstreamState {
    pub tenant_id: Uuid,
    pub rid: String,
    pub provider_id: Uuid,
    pub provider_type: ProviderType,
    pub nonce: String,
    pub code_verifier: String,
    pub code_challenge: String,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

/// Transient companion of an auth code: PKCE binding and auth time.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthCodeMeta {
    pub nonce: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    pub auth_time: i64,
}

/// Single-use handle that resumes an interrupted flow run at a node.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResumeToken {
    pub run_id: Uuid,
    pub node_id: String,
    pub rid: String,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

/// The transient-state capability of the provider: pending requests, magic
/// tokens, upstream states, code/refresh metadata, resume tokens, replay
/// guards and rate-limit counters.
///
/// Two implementations: `MemoryStore` (single process) and `RedisStore`.
/// Every `take_*` is an atomic get-and-delete; a value is handed to at most
/// one caller. Expired entries are collected on read.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn put_pending(&self, p: &PendingAuthRequest) -> StoreResult<()>;
    async fn get_pending(
        &self,
        rid: &str,
    ) -> StoreResult<Option<PendingAuthRequest>>;
    async fn set_pending_user(
        &self,
        rid: &str,
        user_id: Uuid,
    ) -> StoreResult<Option<PendingAuthRequest>>;
    async fn complete_pending(&self, rid: &str) -> StoreResult<()>;
    async fn remove_pending(&self, rid: &str) -> StoreResult<()>;

    async fn put_magic(&self, token: &str, m: &MagicToken) -> StoreResult<()>;
    async fn take_magic(&self, token: &str)
    -> StoreResult<Option<MagicToken>>;

    async fn put_upstream(
        &self,
        state: &str,
        u: &UpstreamState,
    ) -> StoreResult<()>;
    async fn take_upstream(
        &self,
        state: &str,
    ) -> StoreResult<Option<UpstreamState>>;

    async fn put_code_meta(
        &self,
        code: &str,
        meta: &AuthCodeMeta,
    ) -> StoreResult<()>;
    async fn get_code_meta(
        &self,
        code: &str,
    ) -> StoreResult<Option<AuthCodeMeta>>;
    async fn take_code_meta(
        &self,
        code: &str,
    ) -> StoreResult<Option<AuthCodeMeta>>;

    async fn put_refresh_meta(
        &self,
        token: &str,
        scope: &str,
    ) -> StoreResult<()>;
    async fn get_refresh_meta(
        &self,
        token: &str,
    ) -> StoreResult<Option<String>>;
    async fn remove_refresh_meta(&self, token: &str) -> StoreResult<()>;

    async fn put_resume(&self, token: &str, r: &ResumeToken)
    -> StoreResult<()>;
    async fn take_resume(
        &self,
        token: &str,
    ) -> StoreResult<Option<ResumeToken>>;

    /// Replay guard: record `key` and report whether this is the first
    /// sighting inside `ttl_secs`.
    async fn mark_seen_once(&self, key: &str, ttl_secs: u64)
    -> StoreResult<bool>;

    /// Fixed-window counter for the rate limiter: increment and return the
    /// count within the window.
    async fn incr_window(&self, key: &str, window_secs: u64)
    -> StoreResult<u64>;
}

/// TTLs for the transient records.
pub mod ttl {
    pub const PENDING_SECS: u64 = 5 * 60;
    pub const MAGIC_SECS: u64 = 10 * 60;
    pub const UPSTREAM_SECS: u64 = 5 * 60;
    pub const CODE_META_SECS: u64 = 10 * 60;
    pub const REFRESH_META_SECS: u64 = 60 * 60 * 24 * 60;
    pub const RESUME_SECS: u64 = 10 * 60;
}
