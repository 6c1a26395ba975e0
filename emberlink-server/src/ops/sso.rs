use emberlink_types::{
    IdentityProvider, IdpStatus, ProviderType, audit::actions,
};
use serde::Deserialize;
use serde_json::{Value, json};
use time::{Duration, OffsetDateTime};
use url::Url;

use super::{RequestInfo, audit, login::LoginOutcome};
use crate::{
    crypto,
    error::{ApiError, ApiResult},
    queries,
    sso::{providers, verify},
    state::AppState,
    store::{UpstreamState, ttl},
    tenant::TenantScope,
};

/// Build the upstream authorization redirect for `GET /sso/{type}/start`.
/// Mints state, nonce and a PKCE pair, and persists them as single-use
/// upstream state bound to the pending request.
pub async fn start(
    state: &AppState,
    scope: &TenantScope,
    provider_type: ProviderType,
    rid: &str,
) -> ApiResult<String> {
    let pending =
        state.session_store.get_pending(rid).await?.ok_or_else(|| {
            ApiError::InvalidRequest(
                "unknown or expired login request".into(),
            )
        })?;
    scope.ensure(pending.tenant_id)?;

    let provider = enabled_provider(state, scope, provider_type).await?;
    let endpoints = providers::resolve(state, &provider).await?;

    let upstream_state = crypto::mint_token(16);
    let nonce = crypto::mint_token(16);
    let (code_verifier, code_challenge) = crypto::generate_pkce_pair();

    state
        .session_store
        .put_upstream(
            &upstream_state,
            &UpstreamState {
                tenant_id: scope.id(),
                rid: rid.to_string(),
                provider_id: provider.id,
                provider_type,
                nonce: nonce.clone(),
                code_verifier,
                code_challenge: code_challenge.clone(),
                expires_at: OffsetDateTime::now_utc()
                    + Duration::seconds(ttl::UPSTREAM_SECS as i64),
            },
        )
        .await?;

    let mut url = Url::parse(&endpoints.authorization_endpoint)
        .map_err(|e| ApiError::Upstream(format!("authorize url: {e}")))?;
    {
        let mut query = url.query_pairs_mut();
        query
            .append_pair("response_type", "code")
            .append_pair("client_id", &provider.client_id)
            .append_pair("redirect_uri", &callback_uri(state, scope, provider_type))
            .append_pair("scope", &provider.scopes.join(" "))
            .append_pair("state", &upstream_state);
        if provider_type != ProviderType::Github {
            query
                .append_pair("nonce", &nonce)
                .append_pair("code_challenge", &code_challenge)
                .append_pair("code_challenge_method", "S256");
        }
    }
    Ok(url.to_string())
}

#[derive(Deserialize)]
struct UpstreamTokenResponse {
    access_token: Option<String>,
    id_token: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Handle the provider callback: consume the upstream state atomically,
/// exchange the code with the stored PKCE verifier, verify identity, link
/// the user and continue the ceremony.
pub async fn callback(
    state: &AppState,
    scope: &TenantScope,
    provider_type: ProviderType,
    code: &str,
    state_param: &str,
    info: &RequestInfo,
) -> ApiResult<LoginOutcome> {
    let upstream = state
        .session_store
        .take_upstream(state_param)
        .await?
        .ok_or_else(|| {
            ApiError::InvalidRequest(
                "sign-in state expired or already used".into(),
            )
        })?;

    if let Err(error) = scope.ensure(upstream.tenant_id) {
        audit::security_cross_tenant(&state.db_pool, scope.id(), info).await;
        return Err(error);
    }
    if upstream.provider_type != provider_type {
        return Err(ApiError::InvalidRequest(
            "sign-in state does not match this provider".into(),
        ));
    }

    let mut pending = state
        .session_store
        .get_pending(&upstream.rid)
        .await?
        .ok_or_else(|| {
            ApiError::InvalidRequest("login request expired".into())
        })?;

    let provider = enabled_provider(state, scope, provider_type).await?;
    let endpoints = providers::resolve(state, &provider).await?;
    let client_secret: String = crypto::unseal_json(
        &provider.client_secret_enc,
        &state.config.encryption_key,
    )?;

    let exchange: UpstreamTokenResponse = state
        .http_client
        .post(&endpoints.token_endpoint)
        .header(reqwest::header::ACCEPT, "application/json")
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", &callback_uri(state, scope, provider_type)),
            ("client_id", &provider.client_id),
            ("client_secret", &client_secret),
            ("code_verifier", &upstream.code_verifier),
        ])
        .send()
        .await?
        .json()
        .await?;

    if let Some(error) = exchange.error {
        return Err(ApiError::Upstream(format!(
            "provider rejected the code exchange: {error}"
        )));
    }

    let identity = match provider_type {
        ProviderType::Github => {
            let access_token =
                exchange.access_token.as_deref().ok_or_else(|| {
                    ApiError::Upstream("provider returned no access token".into())
                })?;
            github_identity(state, access_token).await?
        }
        _ => {
            let id_token = exchange.id_token.as_deref().ok_or_else(|| {
                ApiError::Upstream("provider returned no ID token".into())
            })?;
            let claims = verify::verify_id_token(
                state,
                &provider,
                &endpoints,
                id_token,
                &upstream.nonce,
            )
            .await?;
            if claims.email_verified == Some(false) {
                return Err(ApiError::AccessDenied(
                    "the provider account has no verified email".into(),
                ));
            }
            let email = claims.email.clone().ok_or_else(|| {
                ApiError::AccessDenied(
                    "the provider account has no verified email".into(),
                )
            })?;
            UpstreamIdentity {
                subject: claims.sub.clone(),
                email,
                name: claims.name.clone(),
                claims: json!({
                    "iss": claims.iss,
                    "sub": claims.sub,
                    "name": claims.name,
                }),
            }
        }
    };

    // race-safe linking: both upserts are ON CONFLICT driven
    let (user, created_now) = queries::users::find_or_create(
        &state.db_pool,
        scope,
        &identity.email,
        identity.name.as_deref(),
    )
    .await?;
    if let Some(name) = &identity.name {
        queries::users::set_name_if_empty(&state.db_pool, scope, user.id, name)
            .await?;
    }

    let (_, linked_now) = queries::idps::upsert_identity(
        &state.db_pool,
        scope,
        user.id,
        provider.id,
        &identity.subject,
        &identity.email,
        &identity.claims,
    )
    .await?;

    audit::record(
        &state.db_pool,
        scope.id(),
        Some(user.id),
        &format!("{}{provider_type}", actions::LOGIN_SSO_PREFIX),
        info,
    )
    .await;
    if linked_now {
        audit::record(
            &state.db_pool,
            scope.id(),
            Some(user.id),
            actions::IDP_LINKED,
            info,
        )
        .await;
    }

    state
        .session_store
        .set_pending_user(&upstream.rid, user.id)
        .await?;
    pending.user_id = Some(user.id);

    super::login::complete_authentication(
        state, scope, &pending, &user, info, created_now,
    )
    .await
}

struct UpstreamIdentity {
    subject: String,
    email: String,
    name: Option<String>,
    claims: Value,
}

#[derive(Deserialize)]
struct GithubUser {
    id: i64,
    login: String,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Deserialize)]
struct GithubEmail {
    email: String,
    primary: bool,
    verified: bool,
}

/// GitHub issues no ID token; identity comes from the user API and the
/// primary verified email.
async fn github_identity(
    state: &AppState,
    access_token: &str,
) -> ApiResult<UpstreamIdentity> {
    let user: GithubUser = state
        .http_client
        .get(format!("{}/user", providers::GITHUB_API_BASE))
        .bearer_auth(access_token)
        .header(reqwest::header::USER_AGENT, "emberlink")
        .send()
        .await?
        .error_for_status()
        .map_err(|e| ApiError::Upstream(format!("github user: {e}")))?
        .json()
        .await?;

    let emails: Vec<GithubEmail> = state
        .http_client
        .get(format!("{}/user/emails", providers::GITHUB_API_BASE))
        .bearer_auth(access_token)
        .header(reqwest::header::USER_AGENT, "emberlink")
        .send()
        .await?
        .error_for_status()
        .map_err(|e| ApiError::Upstream(format!("github emails: {e}")))?
        .json()
        .await?;

    let email = emails
        .iter()
        .find(|e| e.primary && e.verified)
        .or_else(|| emails.iter().find(|e| e.verified))
        .map(|e| e.email.clone())
        .ok_or_else(|| {
            ApiError::AccessDenied(
                "the GitHub account has no verified email".into(),
            )
        })?;

    Ok(UpstreamIdentity {
        subject: user.id.to_string(),
        email,
        name: user.name.clone(),
        claims: json!({ "login": user.login, "id": user.id }),
    })
}

async fn enabled_provider(
    state: &AppState,
    scope: &TenantScope,
    provider_type: ProviderType,
) -> ApiResult<IdentityProvider> {
    let provider =
        queries::idps::get_by_type(&state.db_pool, scope, provider_type)
            .await?
            .ok_or_else(|| {
                ApiError::InvalidRequest(format!(
                    "{provider_type} sign-in is not configured"
                ))
            })?;
    if provider.status != IdpStatus::Enabled {
        return Err(ApiError::InvalidRequest(format!(
            "{provider_type} sign-in is disabled"
        )));
    }
    Ok(provider)
}

fn callback_uri(
    state: &AppState,
    scope: &TenantScope,
    provider_type: ProviderType,
) -> String {
    format!(
        "{}/a/{}/sso/{provider_type}/callback",
        state.config.public_base_url,
        scope.slug()
    )
}
