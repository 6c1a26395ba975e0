use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Append-only audit record emitted by every state-changing operation.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct AuditEntry {
    pub id: i64,
    pub tenant_id: Uuid,
    pub user_id: Option<Uuid>,
    pub action: String,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Audit action names. Kept in one place so readers can grep the log.
pub mod actions {
    pub const LOGIN_MAGIC: &str = "login.magic";
    pub const LOGIN_SSO_PREFIX: &str = "login.sso.";
    pub const IDP_LINKED: &str = "idp.linked";
    pub const TOKEN_EXCHANGE: &str = "token.exchange";
    pub const TOKEN_REFRESH: &str = "token.refresh";
    pub const TOKEN_REUSE_DETECTED: &str = "token.reuse_detected";
    pub const TOKEN_REVOKED: &str = "token.revoked";
    pub const JWKS_ROTATE: &str = "jwks.rotate";
    pub const CLIENT_REGISTERED: &str = "client.registered";
    pub const CONSENT_GRANTED: &str = "consent.granted";
    pub const CONSENT_DENIED: &str = "consent.denied";
    pub const LOGOUT: &str = "logout";
    pub const SECURITY_CROSS_TENANT: &str = "security.cross_tenant";
}
