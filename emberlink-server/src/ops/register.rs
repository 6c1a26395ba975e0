use emberlink_types::{
    ClientRegistrationRequest, ClientRegistrationResponse, audit::actions,
};
use url::Url;

use super::{RequestInfo, audit};
use crate::{
    crypto,
    error::{ApiError, ApiResult},
    queries,
    rate_limit::RateDimension,
    state::AppState,
    tenant::TenantScope,
};

/// Minimal dynamic client registration: redirect URIs are validated, the
/// auth method decides whether a secret is minted, and the registration is
/// rate limited per source IP.
pub async fn register(
    state: &AppState,
    scope: &TenantScope,
    request: ClientRegistrationRequest,
    info: &RequestInfo,
) -> ApiResult<ClientRegistrationResponse> {
    let rules = state.config.rate_rules_for(scope.slug());
    if let Some(ip) = &info.ip {
        state
            .rate_limiter
            .check(&rules, scope.slug(), RateDimension::RegisterPerIp, ip)
            .await?;
    }

    if request.client_name.trim().is_empty() {
        return Err(ApiError::InvalidRequest(
            "client_name is required".into(),
        ));
    }
    if request.redirect_uris.is_empty() {
        return Err(ApiError::InvalidRequest(
            "at least one redirect_uri is required".into(),
        ));
    }
    for uri in &request.redirect_uris {
        let parsed = Url::parse(uri).map_err(|_| {
            ApiError::InvalidRequest(format!("invalid redirect_uri: {uri}"))
        })?;
        if parsed.scheme() != "https" && parsed.scheme() != "http" {
            return Err(ApiError::InvalidRequest(format!(
                "unsupported redirect_uri scheme: {uri}"
            )));
        }
    }

    let grant_types = request.grant_types.clone().unwrap_or_else(|| {
        vec!["authorization_code".into(), "refresh_token".into()]
    });
    let auth_method = request
        .token_endpoint_auth_method
        .clone()
        .unwrap_or_else(|| "client_secret_basic".into());
    match auth_method.as_str() {
        "client_secret_basic" | "client_secret_post" | "none" => {}
        other => {
            return Err(ApiError::InvalidRequest(format!(
                "unsupported token_endpoint_auth_method: {other}"
            )));
        }
    }

    let client_id = crypto::mint_token(16);
    let client_secret =
        (auth_method != "none").then(|| crypto::mint_token(24));

    let client = queries::clients::insert(
        &state.db_pool,
        scope,
        queries::clients::NewClientRow {
            client_id: &client_id,
            client_secret: client_secret.as_deref(),
            name: request.client_name.trim(),
            redirect_uris: &request.redirect_uris,
            grant_types: &grant_types,
            first_party: false,
        },
    )
    .await?;

    audit::record(
        &state.db_pool,
        scope.id(),
        None,
        actions::CLIENT_REGISTERED,
        info,
    )
    .await;
    log::info!(
        "registered client {} for tenant {}",
        client.client_id,
        scope.slug()
    );

    Ok(ClientRegistrationResponse {
        client_id: client.client_id,
        client_secret,
        client_name: client.name,
        redirect_uris: client.redirect_uris,
        grant_types: client.grant_types,
        token_endpoint_auth_method: auth_method,
    })
}
