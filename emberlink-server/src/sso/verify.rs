use emberlink_types::{IdentityProvider, ProviderType};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use serde_json::Value;
use time::{Duration, OffsetDateTime};

use super::providers::ProviderEndpoints;
use crate::{
    error::{ApiError, ApiResult},
    state::AppState,
};

const JWKS_CACHE_TTL: Duration = Duration::hours(1);

/// A provider's JWKS, cached by URI.
#[derive(Clone, Debug)]
pub struct CachedJwks {
    pub keys: Vec<RemoteJwk>,
    pub fetched_at: OffsetDateTime,
}

#[derive(Clone, Debug, Deserialize)]
pub struct RemoteJwk {
    pub kty: String,
    #[serde(default)]
    pub kid: Option<String>,
    #[serde(default)]
    pub n: Option<String>,
    #[serde(default)]
    pub e: Option<String>,
}

#[derive(Deserialize)]
struct RemoteJwksResponse {
    keys: Vec<RemoteJwk>,
}

/// Claims taken from an upstream ID token. `aud` may be a string or an
/// array, so it stays a raw value until checked.
#[derive(Clone, Debug, Deserialize)]
pub struct UpstreamIdClaims {
    pub iss: String,
    pub sub: String,
    pub aud: Value,
    pub exp: i64,
    #[serde(default)]
    pub nonce: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub email_verified: Option<bool>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub tid: Option<String>,
}

impl UpstreamIdClaims {
    fn aud_contains(&self, client_id: &str) -> bool {
        match &self.aud {
            Value::String(aud) => aud == client_id,
            Value::Array(auds) => {
                auds.iter().any(|a| a.as_str() == Some(client_id))
            }
            _ => false,
        }
    }
}

async fn fetch_jwks(state: &AppState, uri: &str) -> ApiResult<Vec<RemoteJwk>> {
    let now = OffsetDateTime::now_utc();
    {
        let cache = state.upstream_jwks.read().await;
        if let Some(cached) = cache.get(uri) {
            if now - cached.fetched_at < JWKS_CACHE_TTL {
                return Ok(cached.keys.clone());
            }
        }
    }

    let response: RemoteJwksResponse = state
        .http_client
        .get(uri)
        .send()
        .await?
        .error_for_status()
        .map_err(|e| ApiError::Upstream(format!("jwks fetch failed: {e}")))?
        .json()
        .await?;

    let mut cache = state.upstream_jwks.write().await;
    cache.insert(
        uri.to_string(),
        CachedJwks { keys: response.keys.clone(), fetched_at: now },
    );
    Ok(response.keys)
}

/// Verify an upstream ID token: signature against the provider's JWKS,
/// issuer, audience, nonce binding, and the strict tenant-derived issuer for
/// Microsoft.
pub async fn verify_id_token(
    state: &AppState,
    provider: &IdentityProvider,
    endpoints: &ProviderEndpoints,
    id_token: &str,
    expected_nonce: &str,
) -> ApiResult<UpstreamIdClaims> {
    let jwks_uri = endpoints.jwks_uri.as_deref().ok_or_else(|| {
        ApiError::Upstream("provider publishes no JWKS".into())
    })?;

    let header = jsonwebtoken::decode_header(id_token).map_err(|_| {
        ApiError::Upstream("upstream ID token is malformed".into())
    })?;

    let keys = fetch_jwks(state, jwks_uri).await?;
    let jwk = keys
        .iter()
        .filter(|k| k.kty == "RSA")
        .find(|k| header.kid.is_none() || k.kid == header.kid)
        .ok_or_else(|| {
            ApiError::Upstream("no matching key in provider JWKS".into())
        })?;
    let (n, e) = match (&jwk.n, &jwk.e) {
        (Some(n), Some(e)) => (n, e),
        _ => {
            return Err(ApiError::Upstream(
                "provider JWK is missing RSA parameters".into(),
            ));
        }
    };
    let decoding_key = DecodingKey::from_rsa_components(n, e)
        .map_err(|e| ApiError::Upstream(format!("provider JWK: {e}")))?;

    // aud and iss are checked manually below: aud may be an array, and the
    // Microsoft issuer depends on the token's own tid claim
    let mut validation = Validation::new(Algorithm::RS256);
    validation.validate_aud = false;

    let claims = jsonwebtoken::decode::<UpstreamIdClaims>(
        id_token,
        &decoding_key,
        &validation,
    )
    .map_err(|_| {
        ApiError::Upstream("upstream ID token verification failed".into())
    })?
    .claims;

    if !claims.aud_contains(&provider.client_id) {
        return Err(ApiError::Upstream(
            "upstream ID token audience mismatch".into(),
        ));
    }

    match provider.provider_type {
        ProviderType::Microsoft => {
            let tid = claims.tid.as_deref().ok_or_else(|| {
                ApiError::Upstream("Microsoft token carries no tid".into())
            })?;
            let expected_iss =
                format!("https://login.microsoftonline.com/{tid}/v2.0");
            if claims.iss != expected_iss {
                return Err(ApiError::Upstream(
                    "Microsoft issuer does not match the token tenant".into(),
                ));
            }
        }
        _ => {
            if let Some(issuer) = &endpoints.issuer {
                if &claims.iss != issuer {
                    return Err(ApiError::Upstream(
                        "upstream issuer mismatch".into(),
                    ));
                }
            }
        }
    }

    if claims.nonce.as_deref() != Some(expected_nonce) {
        return Err(ApiError::Upstream(
            "upstream nonce does not match the stored state".into(),
        ));
    }

    Ok(claims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn claims(aud: Value) -> UpstreamIdClaims {
        UpstreamIdClaims {
            iss: "https://accounts.google.com".into(),
            sub: "10769150350006150715113082367".into(),
            aud,
            exp: 0,
            nonce: None,
            email: None,
            email_verified: None,
            name: None,
            tid: None,
        }
    }

    #[test]
    fn audience_accepts_string_and_array_forms() {
        assert!(claims(json!("client-1")).aud_contains("client-1"));
        assert!(
            claims(json!(["other", "client-1"])).aud_contains("client-1")
        );
        assert!(!claims(json!("other")).aud_contains("client-1"));
        assert!(!claims(json!(42)).aud_contains("client-1"));
    }
}
