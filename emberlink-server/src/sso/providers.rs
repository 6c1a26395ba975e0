use emberlink_types::{IdentityProvider, ProviderType};
use serde::Deserialize;

use crate::{
    error::{ApiError, ApiResult},
    state::AppState,
};

pub const GITHUB_API_BASE: &str = "https://api.github.com";

const GOOGLE_ISSUER: &str = "https://accounts.google.com";
const MICROSOFT_DEFAULT_AUTHORITY: &str =
    "https://login.microsoftonline.com/common/v2.0";

/// Resolved upstream endpoints for one provider.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderEndpoints {
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub jwks_uri: Option<String>,
    pub issuer: Option<String>,
}

#[derive(Deserialize)]
struct DiscoveryDocument {
    issuer: String,
    authorization_endpoint: String,
    token_endpoint: String,
    jwks_uri: String,
}

/// Google and GitHub publish fixed endpoints; Microsoft and generic OIDC are
/// resolved through `/.well-known/openid-configuration` on the configured
/// issuer.
pub async fn resolve(
    state: &AppState,
    provider: &IdentityProvider,
) -> ApiResult<ProviderEndpoints> {
    match provider.provider_type {
        ProviderType::Google => Ok(ProviderEndpoints {
            authorization_endpoint:
                "https://accounts.google.com/o/oauth2/v2/auth".into(),
            token_endpoint: "https://oauth2.googleapis.com/token".into(),
            jwks_uri: Some(
                "https://www.googleapis.com/oauth2/v3/certs".into(),
            ),
            issuer: Some(GOOGLE_ISSUER.into()),
        }),

        ProviderType::Github => Ok(ProviderEndpoints {
            authorization_endpoint:
                "https://github.com/login/oauth/authorize".into(),
            token_endpoint:
                "https://github.com/login/oauth/access_token".into(),
            jwks_uri: None,
            issuer: None,
        }),

        ProviderType::Microsoft | ProviderType::OidcGeneric => {
            let issuer = match (&provider.issuer, provider.provider_type) {
                (Some(issuer), _) => issuer.clone(),
                (None, ProviderType::Microsoft) => {
                    MICROSOFT_DEFAULT_AUTHORITY.into()
                }
                (None, _) => {
                    return Err(ApiError::Internal(
                        "generic OIDC provider has no issuer".into(),
                    ));
                }
            };
            discover(state, &issuer).await
        }
    }
}

async fn discover(
    state: &AppState,
    issuer: &str,
) -> ApiResult<ProviderEndpoints> {
    let url = format!(
        "{}/.well-known/openid-configuration",
        issuer.trim_end_matches('/')
    );
    let doc: DiscoveryDocument = state
        .http_client
        .get(&url)
        .send()
        .await?
        .error_for_status()
        .map_err(|e| ApiError::Upstream(format!("discovery failed: {e}")))?
        .json()
        .await?;
    Ok(ProviderEndpoints {
        authorization_endpoint: doc.authorization_endpoint,
        token_endpoint: doc.token_endpoint,
        jwks_uri: Some(doc.jwks_uri),
        issuer: Some(doc.issuer),
    })
}
