use axum::http::HeaderMap;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use emberlink_types::{
    AccessClaims, Client, IdClaims, IntrospectionResponse, RefreshToken,
    TokenRequest, TokenResponse, User, audit::actions,
};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use super::{RequestInfo, audit};
use crate::{
    crypto,
    error::{ApiError, ApiResult},
    keys, queries,
    rate_limit::RateDimension,
    state::AppState,
    tenant::TenantScope,
};

pub const ACCESS_TOKEN_LIFETIME_SECS: i64 = 3600;
const REFRESH_TOKEN_LIFETIME_DAYS: i64 = 30;

/// Client credentials taken from HTTP Basic or the form body; the header
/// wins when both are present.
#[derive(Clone, Debug)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: Option<String>,
}

pub fn client_credentials(
    headers: &HeaderMap,
    body: &TokenRequest,
) -> ApiResult<ClientCredentials> {
    if let Some(value) = headers.get(axum::http::header::AUTHORIZATION) {
        let raw = value.to_str().map_err(|_| {
            ApiError::InvalidClient("malformed authorization header".into())
        })?;
        if let Some(encoded) = raw.strip_prefix("Basic ") {
            let decoded = STANDARD.decode(encoded.trim()).map_err(|_| {
                ApiError::InvalidClient("malformed basic credentials".into())
            })?;
            let decoded = String::from_utf8(decoded).map_err(|_| {
                ApiError::InvalidClient("malformed basic credentials".into())
            })?;
            let (id, secret) = decoded.split_once(':').ok_or_else(|| {
                ApiError::InvalidClient("malformed basic credentials".into())
            })?;
            return Ok(ClientCredentials {
                client_id: id.to_string(),
                client_secret: Some(secret.to_string()),
            });
        }
    }

    let client_id = body
        .client_id
        .clone()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            ApiError::InvalidClient("client_id is required".into())
        })?;
    Ok(ClientCredentials {
        client_id,
        client_secret: body.client_secret.clone().filter(|s| !s.is_empty()),
    })
}

/// Authenticate the client. Confidential clients must present their exact
/// secret; public clients skip authentication and rely on PKCE at
/// redemption.
async fn authenticate_client(
    state: &AppState,
    scope: &TenantScope,
    credentials: &ClientCredentials,
) -> ApiResult<Client> {
    let client = queries::clients::get_by_client_id(
        &state.db_pool,
        scope,
        &credentials.client_id,
    )
    .await?
    .ok_or_else(|| ApiError::InvalidClient("unknown client".into()))?;

    if let Some(stored_secret) = &client.client_secret {
        let provided = credentials.client_secret.as_deref().ok_or_else(|| {
            ApiError::InvalidClient("client secret required".into())
        })?;
        if provided != stored_secret {
            return Err(ApiError::InvalidClient("invalid client secret".into()));
        }
    }

    Ok(client)
}

/// `POST /a/{tenant}/oauth/token`.
pub async fn token(
    state: &AppState,
    scope: &TenantScope,
    headers: &HeaderMap,
    request: TokenRequest,
    info: &RequestInfo,
) -> ApiResult<TokenResponse> {
    let rules = state.config.rate_rules_for(scope.slug());
    if let Some(ip) = &info.ip {
        state
            .rate_limiter
            .check(&rules, scope.slug(), RateDimension::TokenPerIp, ip)
            .await?;
    }

    let credentials = client_credentials(headers, &request)?;
    let client_rules = state
        .config
        .rate_rules_for_client(scope.slug(), &credentials.client_id);
    state
        .rate_limiter
        .check(
            &client_rules,
            scope.slug(),
            RateDimension::TokenPerClient,
            &credentials.client_id,
        )
        .await?;

    let client = authenticate_client(state, scope, &credentials).await?;

    match request.grant_type.as_str() {
        "authorization_code" => {
            exchange_code(state, scope, &client, request, info).await
        }
        "refresh_token" => {
            refresh(state, scope, &client, request, info).await
        }
        other => Err(ApiError::UnsupportedGrantType(format!(
            "unsupported grant_type: {other}"
        ))),
    }
}

async fn exchange_code(
    state: &AppState,
    scope: &TenantScope,
    client: &Client,
    request: TokenRequest,
    info: &RequestInfo,
) -> ApiResult<TokenResponse> {
    let code_value = request
        .code
        .as_deref()
        .filter(|c| !c.is_empty() && c.len() <= 128)
        .ok_or_else(|| ApiError::InvalidGrant("code is required".into()))?;

    // expired codes are collected opportunistically on the redemption path
    if let Err(error) = queries::auth_codes::purge_expired(
        &state.db_pool,
        OffsetDateTime::now_utc(),
    )
    .await
    {
        log::warn!("auth code purge failed: {error}");
    }

    // single-use: the delete-and-return wins for exactly one caller
    let code = queries::auth_codes::take(&state.db_pool, code_value)
        .await?
        .ok_or_else(|| {
            ApiError::InvalidGrant("unknown or already used code".into())
        })?;

    if code.tenant_id != scope.id() {
        audit::security_cross_tenant(&state.db_pool, scope.id(), info).await;
        return Err(ApiError::InvalidGrant("unknown or already used code".into()));
    }
    if code.is_expired(OffsetDateTime::now_utc()) {
        return Err(ApiError::InvalidGrant("code expired".into()));
    }
    if code.client_db_id != client.id {
        return Err(ApiError::InvalidGrant(
            "code was issued to a different client".into(),
        ));
    }

    let redirect_uri = request.redirect_uri.as_deref().unwrap_or("");
    if redirect_uri != code.redirect_uri {
        return Err(ApiError::InvalidGrant("redirect_uri mismatch".into()));
    }

    let verifier = request.code_verifier.as_deref().unwrap_or("");
    if verifier.len() < crypto::PKCE_VERIFIER_MIN
        || verifier.len() > crypto::PKCE_VERIFIER_MAX
    {
        return Err(ApiError::InvalidGrant(
            "code_verifier must be 43-128 characters".into(),
        ));
    }

    let meta = state
        .session_store
        .take_code_meta(&code.code)
        .await?
        .unwrap_or_default();
    let challenge = meta
        .code_challenge
        .as_deref()
        .ok_or_else(|| ApiError::InvalidGrant("pkce_required".into()))?;
    let method = meta.code_challenge_method.as_deref().unwrap_or("S256");
    if !crypto::verify_pkce(verifier, challenge, method) {
        return Err(ApiError::InvalidGrant("pkce_verification_failed".into()));
    }

    let user = queries::users::get_by_id(&state.db_pool, scope, code.user_id)
        .await?
        .ok_or_else(|| ApiError::InvalidGrant("user no longer exists".into()))?;

    let session =
        queries::sessions::insert(&state.db_pool, scope, user.id).await?;

    let refresh_token = RefreshToken::mint(
        scope.id(),
        session.id,
        client.client_id.clone(),
        Duration::days(REFRESH_TOKEN_LIFETIME_DAYS),
    );
    queries::refresh_tokens::insert(&state.db_pool, scope, &refresh_token)
        .await?;
    state
        .session_store
        .put_refresh_meta(&refresh_token.token, &code.scope)
        .await?;

    let (access_token, id_token) = sign_pair(
        state,
        scope,
        &client.client_id,
        &user,
        session.id,
        &code.scope,
        meta.nonce.as_deref(),
        meta.auth_time,
    )
    .await?;

    audit::record(
        &state.db_pool,
        scope.id(),
        Some(user.id),
        actions::TOKEN_EXCHANGE,
        info,
    )
    .await;

    Ok(TokenResponse {
        token_type: "Bearer".into(),
        access_token,
        expires_in: ACCESS_TOKEN_LIFETIME_SECS,
        id_token,
        refresh_token: refresh_token.token,
        scope: code.scope,
    })
}

async fn refresh(
    state: &AppState,
    scope: &TenantScope,
    client: &Client,
    request: TokenRequest,
    info: &RequestInfo,
) -> ApiResult<TokenResponse> {
    let presented = request
        .refresh_token
        .as_deref()
        .filter(|t| !t.is_empty())
        .ok_or_else(|| {
            ApiError::InvalidGrant("refresh_token is required".into())
        })?;

    let old = queries::refresh_tokens::get_by_token(&state.db_pool, presented)
        .await?
        .ok_or_else(|| {
            ApiError::InvalidGrant("unknown refresh token".into())
        })?;

    if old.tenant_id != scope.id() {
        audit::security_cross_tenant(&state.db_pool, scope.id(), info).await;
        return Err(ApiError::InvalidGrant("unknown refresh token".into()));
    }
    if old.client_id != client.client_id {
        return Err(ApiError::InvalidGrant(
            "refresh token belongs to a different client".into(),
        ));
    }

    // Reuse detection: a revoked token presented again takes its whole
    // sibling set and session down with it.
    if old.revoked {
        queries::refresh_tokens::revoke_all_for_session(
            &state.db_pool,
            scope,
            old.session_id,
        )
        .await?;
        queries::sessions::expire_now(&state.db_pool, scope, old.session_id)
            .await?;
        audit::record(
            &state.db_pool,
            scope.id(),
            None,
            actions::TOKEN_REUSE_DETECTED,
            info,
        )
        .await;
        log::warn!(
            "refresh token reuse detected for session {}",
            old.session_id
        );
        return Err(ApiError::InvalidGrant("refresh token reuse".into()));
    }

    let now = OffsetDateTime::now_utc();
    if old.is_expired(now) {
        return Err(ApiError::InvalidGrant("refresh token expired".into()));
    }

    let session = queries::sessions::get(&state.db_pool, old.session_id)
        .await?
        .ok_or_else(|| ApiError::InvalidGrant("session gone".into()))?;
    if session.is_expired(now) {
        return Err(ApiError::InvalidGrant("session expired".into()));
    }

    let user = queries::users::get_by_id(&state.db_pool, scope, session.user_id)
        .await?
        .ok_or_else(|| ApiError::InvalidGrant("user no longer exists".into()))?;

    // Rotate. Losing the revoke race means someone else presented this
    // token concurrently; treat it like reuse.
    let revoked_now =
        queries::refresh_tokens::revoke(&state.db_pool, scope, old.id).await?;
    if !revoked_now {
        return Err(ApiError::InvalidGrant("refresh token reuse".into()));
    }

    // scope is preserved across rotations (RFC 6749 §6)
    let granted_scope = state
        .session_store
        .get_refresh_meta(&old.token)
        .await?
        .unwrap_or_default();

    let new_token = RefreshToken::mint(
        scope.id(),
        session.id,
        client.client_id.clone(),
        Duration::days(REFRESH_TOKEN_LIFETIME_DAYS),
    );
    queries::refresh_tokens::insert(&state.db_pool, scope, &new_token).await?;
    state
        .session_store
        .put_refresh_meta(&new_token.token, &granted_scope)
        .await?;
    state.session_store.remove_refresh_meta(&old.token).await?;

    let (access_token, id_token) = sign_pair(
        state,
        scope,
        &client.client_id,
        &user,
        session.id,
        &granted_scope,
        None,
        session.created_at.unix_timestamp(),
    )
    .await?;

    audit::record(
        &state.db_pool,
        scope.id(),
        Some(user.id),
        actions::TOKEN_REFRESH,
        info,
    )
    .await;

    Ok(TokenResponse {
        token_type: "Bearer".into(),
        access_token,
        expires_in: ACCESS_TOKEN_LIFETIME_SECS,
        id_token,
        refresh_token: new_token.token,
        scope: granted_scope,
    })
}

#[allow(clippy::too_many_arguments)]
async fn sign_pair(
    state: &AppState,
    scope: &TenantScope,
    client_id: &str,
    user: &User,
    session_id: Uuid,
    granted_scope: &str,
    nonce: Option<&str>,
    auth_time: i64,
) -> ApiResult<(String, String)> {
    let signer = keys::active_signer(
        &state.db_pool,
        scope,
        &state.config.encryption_key,
    )
    .await?;
    let issuer = state.config.issuer_for(scope.slug());
    let now = OffsetDateTime::now_utc().unix_timestamp();

    let access = signer.sign(&AccessClaims::new(
        issuer.clone(),
        user.id.to_string(),
        client_id.to_string(),
        granted_scope.to_string(),
        session_id.to_string(),
        Duration::seconds(ACCESS_TOKEN_LIFETIME_SECS),
    ))?;

    let scopes: Vec<&str> = granted_scope.split_whitespace().collect();
    let id = signer.sign(&IdClaims {
        iss: issuer,
        sub: user.id.to_string(),
        aud: client_id.to_string(),
        exp: now + ACCESS_TOKEN_LIFETIME_SECS,
        iat: now,
        auth_time,
        nonce: nonce.map(str::to_string),
        email: scopes
            .contains(&"email")
            .then(|| user.email.clone()),
        name: scopes
            .contains(&"profile")
            .then(|| user.name.clone())
            .flatten(),
    })?;

    Ok((access, id))
}

/// RFC 7662 introspection for refresh and access tokens. Requires client
/// authentication; unknown or foreign tokens come back `active: false`.
pub async fn introspect(
    state: &AppState,
    scope: &TenantScope,
    headers: &HeaderMap,
    request: TokenRequest,
    token_value: &str,
) -> ApiResult<IntrospectionResponse> {
    let credentials = client_credentials(headers, &request)?;
    authenticate_client(state, scope, &credentials).await?;

    let now = OffsetDateTime::now_utc();

    if let Some(refresh) =
        queries::refresh_tokens::get_by_token(&state.db_pool, token_value)
            .await?
    {
        if refresh.tenant_id != scope.id()
            || refresh.revoked
            || refresh.is_expired(now)
        {
            return Ok(IntrospectionResponse::inactive());
        }
        let session =
            queries::sessions::get(&state.db_pool, refresh.session_id).await?;
        let sub = session.map(|s| s.user_id.to_string());
        let scope_value = state
            .session_store
            .get_refresh_meta(&refresh.token)
            .await?;
        return Ok(IntrospectionResponse {
            active: true,
            scope: scope_value,
            client_id: Some(refresh.client_id),
            sub,
            exp: Some(refresh.expires_at.unix_timestamp()),
            token_type: Some("refresh_token".into()),
        });
    }

    // otherwise try it as one of our signed access tokens
    let issuer = state.config.issuer_for(scope.slug());
    match keys::verify_tenant_token::<AccessClaims>(
        &state.db_pool,
        scope,
        token_value,
        &issuer,
    )
    .await
    {
        Ok(claims) => Ok(IntrospectionResponse {
            active: true,
            scope: Some(claims.scope),
            client_id: Some(claims.aud),
            sub: Some(claims.sub),
            exp: Some(claims.exp),
            token_type: Some("access_token".into()),
        }),
        Err(_) => Ok(IntrospectionResponse::inactive()),
    }
}

/// RFC 7009 revocation. Always succeeds from the caller's perspective.
pub async fn revoke(
    state: &AppState,
    scope: &TenantScope,
    headers: &HeaderMap,
    request: TokenRequest,
    token_value: &str,
    info: &RequestInfo,
) -> ApiResult<()> {
    let credentials = client_credentials(headers, &request)?;
    let client = authenticate_client(state, scope, &credentials).await?;

    if let Some(refresh) =
        queries::refresh_tokens::get_by_token(&state.db_pool, token_value)
            .await?
    {
        if refresh.tenant_id == scope.id()
            && refresh.client_id == client.client_id
            && !refresh.revoked
        {
            queries::refresh_tokens::revoke(&state.db_pool, scope, refresh.id)
                .await?;
            state.session_store.remove_refresh_meta(&refresh.token).await?;
            audit::record(
                &state.db_pool,
                scope.id(),
                None,
                actions::TOKEN_REVOKED,
                info,
            )
            .await;
        }
    }
    Ok(())
}

/// Logout: expire the session behind a refresh token and revoke every
/// sibling.
pub async fn logout(
    state: &AppState,
    scope: &TenantScope,
    token_value: &str,
    info: &RequestInfo,
) -> ApiResult<()> {
    let Some(refresh) =
        queries::refresh_tokens::get_by_token(&state.db_pool, token_value)
            .await?
    else {
        return Ok(());
    };
    if refresh.tenant_id != scope.id() {
        audit::security_cross_tenant(&state.db_pool, scope.id(), info).await;
        return Err(ApiError::CrossTenant);
    }

    queries::refresh_tokens::revoke_all_for_session(
        &state.db_pool,
        scope,
        refresh.session_id,
    )
    .await?;
    queries::sessions::expire_now(&state.db_pool, scope, refresh.session_id)
        .await?;
    state.session_store.remove_refresh_meta(&refresh.token).await?;

    let session =
        queries::sessions::get(&state.db_pool, refresh.session_id).await?;
    audit::record(
        &state.db_pool,
        scope.id(),
        session.map(|s| s.user_id),
        actions::LOGOUT,
        info,
    )
    .await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn empty_request() -> TokenRequest {
        TokenRequest {
            grant_type: "authorization_code".into(),
            code: None,
            redirect_uri: None,
            code_verifier: None,
            refresh_token: None,
            client_id: None,
            client_secret: None,
        }
    }

    #[test]
    fn basic_header_wins_over_body() {
        let mut headers = HeaderMap::new();
        // c1:s1
        headers.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_static("Basic YzE6czE="),
        );
        let mut body = empty_request();
        body.client_id = Some("other".into());

        let credentials = client_credentials(&headers, &body).unwrap();
        assert_eq!(credentials.client_id, "c1");
        assert_eq!(credentials.client_secret.as_deref(), Some("s1"));
    }

    #[test]
    fn body_credentials_are_accepted() {
        let mut body = empty_request();
        body.client_id = Some("c1".into());
        body.client_secret = Some("s1".into());
        let credentials =
            client_credentials(&HeaderMap::new(), &body).unwrap();
        assert_eq!(credentials.client_id, "c1");
        assert_eq!(credentials.client_secret.as_deref(), Some("s1"));
    }

    #[test]
    fn missing_client_is_invalid_client() {
        let result = client_credentials(&HeaderMap::new(), &empty_request());
        assert!(matches!(result, Err(ApiError::InvalidClient(_))));
    }
}
