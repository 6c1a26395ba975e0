use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use emberlink_types::OidcDiscoveryDocument;
use log::info;

use crate::{crypto, error::ApiResult, keys, state::AppState};

/// GET /a/{tenant}/.well-known/openid-configuration
pub async fn openid_configuration(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    info!("GET /a/{tenant}/.well-known/openid-configuration");
    let scope = state.tenant_cache.resolve(&state.db_pool, &tenant).await?;
    let issuer = state.config.issuer_for(scope.slug());

    let document = OidcDiscoveryDocument {
        issuer: issuer.clone(),
        authorization_endpoint: format!("{issuer}/oauth/authorize"),
        token_endpoint: format!("{issuer}/oauth/token"),
        userinfo_endpoint: format!("{issuer}/oauth/userinfo"),
        revocation_endpoint: format!("{issuer}/oauth/revoke"),
        introspection_endpoint: format!("{issuer}/oauth/introspect"),
        jwks_uri: format!("{issuer}/.well-known/jwks.json"),
        response_types_supported: vec!["code".into()],
        subject_types_supported: vec!["public".into()],
        id_token_signing_alg_values_supported: vec!["RS256".into()],
        scopes_supported: vec![
            "openid".into(),
            "profile".into(),
            "email".into(),
            "offline_access".into(),
        ],
        grant_types_supported: vec![
            "authorization_code".into(),
            "refresh_token".into(),
        ],
        token_endpoint_auth_methods_supported: vec![
            "client_secret_basic".into(),
            "client_secret_post".into(),
        ],
        code_challenge_methods_supported: vec!["S256".into(), "plain".into()],
    };

    let body = serde_json::to_string(&document)
        .map_err(|e| crate::error::ApiError::Internal(e.to_string()))?;
    Ok(cacheable_json(&headers, body))
}

/// GET /a/{tenant}/.well-known/jwks.json
pub async fn jwks(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    info!("GET /a/{tenant}/.well-known/jwks.json");
    let scope = state.tenant_cache.resolve(&state.db_pool, &tenant).await?;

    // a tenant that has never signed still publishes a key
    keys::ensure_active(&state.db_pool, &scope, &state.config.encryption_key)
        .await?;
    let jwks = keys::public_jwks(&state.db_pool, &scope).await?;

    let body = serde_json::to_string(&jwks)
        .map_err(|e| crate::error::ApiError::Internal(e.to_string()))?;
    Ok(cacheable_json(&headers, body))
}

/// JSON with an ETag; `If-None-Match` short-circuits to 304.
fn cacheable_json(request_headers: &HeaderMap, body: String) -> Response {
    let etag = format!("\"{}\"", crypto::sha256_hex(body.as_bytes()));

    if let Some(candidate) = request_headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
    {
        if candidate == etag {
            return StatusCode::NOT_MODIFIED.into_response();
        }
    }

    (
        [
            (header::CONTENT_TYPE, "application/json".to_string()),
            (header::ETAG, etag),
            (header::CACHE_CONTROL, "public, max-age=300".to_string()),
        ],
        body,
    )
        .into_response()
}
