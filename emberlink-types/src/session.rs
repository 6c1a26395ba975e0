use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::{RngCore, rngs::OsRng};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

/// A single-use authorization code, redeemed at the token endpoint within
/// five minutes of issuance. PKCE material travels separately as transient
/// code metadata.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct AuthCode {
    pub code: String,
    pub tenant_id: Uuid,
    pub client_db_id: Uuid,
    pub user_id: Uuid,
    pub redirect_uri: String,
    pub scope: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

impl AuthCode {
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at <= now
    }
}

/// A login session created at code exchange. Refresh tokens hang off the
/// session; an expired session rejects further refreshes.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Session {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

impl Session {
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at <= now
    }
}

/// An opaque refresh token bound to a session and client. Exactly one
/// non-revoked token exists per session; rotation revokes the old one and a
/// revoked token presented again revokes the whole sibling set.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct RefreshToken {
    pub id: Uuid,
    pub token: String,
    pub tenant_id: Uuid,
    pub session_id: Uuid,
    pub client_id: String,
    pub revoked: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

impl RefreshToken {
    /// Mint a fresh token value: 24 random bytes, base64url without padding.
    pub fn mint(
        tenant_id: Uuid,
        session_id: Uuid,
        client_id: String,
        lifetime: Duration,
    ) -> Self {
        let mut bytes = [0u8; 24];
        OsRng.fill_bytes(&mut bytes);
        let now = OffsetDateTime::now_utc();
        Self {
            id: Uuid::new_v4(),
            token: URL_SAFE_NO_PAD.encode(bytes),
            tenant_id,
            session_id,
            client_id,
            revoked: false,
            created_at: now,
            expires_at: now + lifetime,
        }
    }

    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at <= now
    }
}

impl std::fmt::Debug for RefreshToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshToken")
            .field("id", &self.id)
            .field("token", &"[REDACTED]")
            .field("tenant_id", &self.tenant_id)
            .field("session_id", &self.session_id)
            .field("client_id", &self.client_id)
            .field("revoked", &self.revoked)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}
