use emberlink_types::{AuthCode, Client};
use serde::Deserialize;
use time::{Duration, OffsetDateTime};
use url::Url;
use uuid::Uuid;

use crate::{
    crypto,
    error::{ApiError, ApiResult},
    queries,
    state::AppState,
    store::{AuthCodeMeta, PendingAuthRequest, ttl},
    tenant::TenantScope,
};

pub const AUTH_CODE_LIFETIME_SECS: i64 = 5 * 60;

/// Query parameters of `GET /a/{tenant}/oauth/authorize`.
#[derive(Clone, Debug, Deserialize)]
pub struct AuthorizeParams {
    pub response_type: Option<String>,
    pub client_id: Option<String>,
    pub redirect_uri: Option<String>,
    pub scope: Option<String>,
    pub state: Option<String>,
    pub nonce: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
}

/// Validate an authorize request and create the pending request that the
/// rest of the ceremony hangs off. The redirect URI must match a registered
/// one byte-for-byte before anything is stored.
pub async fn create_pending(
    state: &AppState,
    scope: &TenantScope,
    params: &AuthorizeParams,
) -> ApiResult<(PendingAuthRequest, Client)> {
    let response_type = params.response_type.as_deref().unwrap_or("");
    if response_type != "code" {
        return Err(ApiError::InvalidRequest(
            "response_type must be code".into(),
        ));
    }

    let client_id = params
        .client_id
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            ApiError::InvalidRequest("client_id is required".into())
        })?;
    let client =
        queries::clients::get_by_client_id(&state.db_pool, scope, client_id)
            .await?
            .ok_or_else(|| {
                ApiError::UnauthorizedClient("unknown client".into())
            })?;

    let redirect_uri = params
        .redirect_uri
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            ApiError::InvalidRequest("redirect_uri is required".into())
        })?;
    if !client.redirect_uri_registered(redirect_uri) {
        return Err(ApiError::InvalidRequest(
            "redirect_uri not registered for client".into(),
        ));
    }

    if let Some(method) = params.code_challenge_method.as_deref() {
        if method != "S256" && method != "plain" {
            return Err(ApiError::InvalidRequest(
                "unsupported code_challenge_method".into(),
            ));
        }
    }

    let pending = PendingAuthRequest {
        rid: crypto::mint_token(16),
        tenant_id: scope.id(),
        client_db_id: client.id,
        client_id: client.client_id.clone(),
        redirect_uri: redirect_uri.to_string(),
        scope: params.scope.clone().unwrap_or_default(),
        state: params.state.clone(),
        nonce: params.nonce.clone(),
        code_challenge: params.code_challenge.clone(),
        code_challenge_method: params.code_challenge_method.clone(),
        user_id: None,
        completed: false,
        expires_at: OffsetDateTime::now_utc()
            + Duration::seconds(ttl::PENDING_SECS as i64),
    };
    state.session_store.put_pending(&pending).await?;

    Ok((pending, client))
}

/// Consent is skipped for an empty scope, a first-party client, or an
/// existing consent covering every requested scope.
pub async fn consent_required(
    state: &AppState,
    scope: &TenantScope,
    client: &Client,
    user_id: Uuid,
    requested_scope: &str,
) -> ApiResult<bool> {
    let requested: Vec<String> =
        requested_scope.split_whitespace().map(str::to_string).collect();
    if requested.is_empty() || client.first_party {
        return Ok(false);
    }
    let consent =
        queries::consents::get(&state.db_pool, scope, user_id, client.id)
            .await?;
    Ok(match consent {
        Some(consent) => !consent.covers(&requested),
        None => true,
    })
}

/// Issue the authorization code for an authorized pending request and build
/// the redirect back to the relying party. The pending request is marked
/// completed; its PKCE binding moves into the transient code metadata.
pub async fn issue_code(
    state: &AppState,
    scope: &TenantScope,
    pending: &PendingAuthRequest,
) -> ApiResult<String> {
    let user_id = pending.user_id.ok_or_else(|| {
        ApiError::Internal("code issuance without an attached user".into())
    })?;

    // re-read the live record: a pending request authorizes exactly once
    let fresh = state
        .session_store
        .get_pending(&pending.rid)
        .await?
        .ok_or_else(|| {
            ApiError::InvalidRequest("login request expired".into())
        })?;
    if fresh.completed {
        return Err(ApiError::InvalidRequest(
            "login request already completed".into(),
        ));
    }

    let now = OffsetDateTime::now_utc();
    let code = AuthCode {
        code: crypto::mint_token(24),
        tenant_id: scope.id(),
        client_db_id: pending.client_db_id,
        user_id,
        redirect_uri: pending.redirect_uri.clone(),
        scope: pending.scope.clone(),
        created_at: now,
        expires_at: now + Duration::seconds(AUTH_CODE_LIFETIME_SECS),
    };
    queries::auth_codes::insert(&state.db_pool, scope, &code).await?;

    state
        .session_store
        .put_code_meta(
            &code.code,
            &AuthCodeMeta {
                nonce: pending.nonce.clone(),
                code_challenge: pending.code_challenge.clone(),
                code_challenge_method: pending.code_challenge_method.clone(),
                auth_time: now.unix_timestamp(),
            },
        )
        .await?;
    state.session_store.complete_pending(&pending.rid).await?;

    redirect_with(&pending.redirect_uri, &[
        ("code", code.code.as_str()),
        ("state", pending.state.as_deref().unwrap_or("")),
    ])
}

/// Redirect back to the relying party carrying an OIDC error instead of a
/// code.
pub fn error_redirect(
    redirect_uri: &str,
    error: &str,
    state: Option<&str>,
) -> ApiResult<String> {
    redirect_with(redirect_uri, &[
        ("error", error),
        ("state", state.unwrap_or("")),
    ])
}

fn redirect_with(redirect_uri: &str, params: &[(&str, &str)]) -> ApiResult<String> {
    let mut url = Url::parse(redirect_uri).map_err(|_| {
        ApiError::InvalidRequest("redirect_uri is not a valid URL".into())
    })?;
    {
        let mut query = url.query_pairs_mut();
        for (key, value) in params {
            if !value.is_empty() {
                query.append_pair(key, value);
            }
        }
    }
    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redirect_preserves_existing_query_and_appends() {
        let url = redirect_with("https://rp/cb?foo=1", &[
            ("code", "abc"),
            ("state", "xy z"),
        ])
        .unwrap();
        assert!(url.starts_with("https://rp/cb?foo=1&code=abc&state=xy"));
        assert!(url.contains("state=xy+z") || url.contains("state=xy%20z"));
    }

    #[test]
    fn empty_state_is_omitted() {
        let url =
            redirect_with("https://rp/cb", &[("code", "abc"), ("state", "")])
                .unwrap();
        assert_eq!(url, "https://rp/cb?code=abc");
    }
}
