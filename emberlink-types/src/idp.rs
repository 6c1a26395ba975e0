use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

/// Supported upstream identity provider types. One provider of each type per
/// tenant.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProviderType {
    Google,
    Microsoft,
    Github,
    OidcGeneric,
}

impl ProviderType {
    pub const ALL: [ProviderType; 4] = [
        ProviderType::Google,
        ProviderType::Microsoft,
        ProviderType::Github,
        ProviderType::OidcGeneric,
    ];
}

impl std::fmt::Display for ProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProviderType::Google => "google",
            ProviderType::Microsoft => "microsoft",
            ProviderType::Github => "github",
            ProviderType::OidcGeneric => "oidc_generic",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ProviderType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "google" => Ok(ProviderType::Google),
            "microsoft" => Ok(ProviderType::Microsoft),
            "github" => Ok(ProviderType::Github),
            "oidc_generic" => Ok(ProviderType::OidcGeneric),
            other => Err(format!("unknown provider type: {other}")),
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IdpStatus {
    Enabled,
    Disabled,
}

impl std::fmt::Display for IdpStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IdpStatus::Enabled => write!(f, "enabled"),
            IdpStatus::Disabled => write!(f, "disabled"),
        }
    }
}

impl std::str::FromStr for IdpStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "enabled" => Ok(IdpStatus::Enabled),
            "disabled" => Ok(IdpStatus::Disabled),
            other => Err(format!("unknown idp status: {other}")),
        }
    }
}

/// Admin-managed upstream provider configuration. The upstream client secret
/// is sealed at rest with the same AES-256-GCM scheme as private JWKs.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IdentityProvider {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub provider_type: ProviderType,
    pub client_id: String,
    pub client_secret_enc: String,
    pub issuer: Option<String>,
    pub scopes: Vec<String>,
    pub status: IdpStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl std::fmt::Debug for IdentityProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityProvider")
            .field("id", &self.id)
            .field("tenant_id", &self.tenant_id)
            .field("provider_type", &self.provider_type)
            .field("client_id", &self.client_id)
            .field("client_secret_enc", &"[REDACTED]")
            .field("issuer", &self.issuer)
            .field("status", &self.status)
            .finish()
    }
}

/// Link between a local user and an upstream subject, upserted on every
/// federated sign-in. Unique on (provider, subject).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ExternalIdentity {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub provider_id: Uuid,
    pub subject: String,
    pub email: String,
    pub claims: Value,
    #[serde(with = "time::serde::rfc3339")]
    pub last_login_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}
