use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

/// Lifecycle status of a tenant signing key.
///
/// `staged` keys are freshly minted and not yet signing; at most one `active`
/// key signs per tenant; `retired` keys stop signing but stay published in
/// JWKS until `not_after` so recently issued tokens keep verifying.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum KeyStatus {
    Staged,
    Active,
    Retired,
}

impl std::fmt::Display for KeyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            KeyStatus::Staged => "staged",
            KeyStatus::Active => "active",
            KeyStatus::Retired => "retired",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for KeyStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "staged" => Ok(KeyStatus::Staged),
            "active" => Ok(KeyStatus::Active),
            "retired" => Ok(KeyStatus::Retired),
            other => Err(format!("unknown key status: {other}")),
        }
    }
}

/// A per-tenant RSA signing key. The private JWK is sealed with AES-256-GCM
/// (`v1:gcm:<iv>:<ct>:<tag>`, base64url segments); `kid` is the SHA-256 JWK
/// thumbprint of the public key.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct JwkKey {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub kid: String,
    pub pub_jwk: Value,
    pub priv_jwk_enc: String,
    pub status: KeyStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub not_before: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub not_after: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl JwkKey {
    /// Whether this key should appear in the published JWKS.
    pub fn is_published(&self, now: OffsetDateTime) -> bool {
        match self.status {
            KeyStatus::Active => true,
            KeyStatus::Retired => self.not_after.map(|t| t > now).unwrap_or(false),
            KeyStatus::Staged => false,
        }
    }
}

impl std::fmt::Debug for JwkKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwkKey")
            .field("id", &self.id)
            .field("tenant_id", &self.tenant_id)
            .field("kid", &self.kid)
            .field("priv_jwk_enc", &"[REDACTED]")
            .field("status", &self.status)
            .field("not_after", &self.not_after)
            .finish()
    }
}
