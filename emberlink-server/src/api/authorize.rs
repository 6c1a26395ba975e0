use axum::{
    extract::{Path, Query, State},
    response::{IntoResponse, Redirect, Response},
};
use log::info;

use crate::{
    error::ApiError,
    ops::authorize::{self, AuthorizeParams},
    pages, queries,
    state::AppState,
};

/// GET /a/{tenant}/oauth/authorize
///
/// Success renders the login page for the original device. Parse failures
/// return OIDC JSON; errors with a validated redirect target bounce back to
/// the relying party with an `error` parameter.
pub async fn authorize(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    Query(params): Query<AuthorizeParams>,
) -> Response {
    info!(
        "GET /a/{tenant}/oauth/authorize?client_id={:?}",
        params.client_id
    );

    let scope =
        match state.tenant_cache.resolve(&state.db_pool, &tenant).await {
            Ok(scope) => scope,
            Err(error) => return error.into_response(),
        };

    match authorize::create_pending(&state, &scope, &params).await {
        Ok((pending, client)) => {
            let providers =
                match queries::idps::list_enabled(&state.db_pool, &scope)
                    .await
                {
                    Ok(providers) => {
                        providers.iter().map(|p| p.provider_type).collect()
                    }
                    Err(error) => {
                        log::warn!("failed to list providers: {error}");
                        Vec::new()
                    }
                };
            pages::login(
                &format!("/a/{}", scope.slug()),
                &pending.rid,
                &client.name,
                &pending.scope,
                &providers,
            )
            .into_response()
        }
        Err(error) => {
            // redirect the error to the RP only when the redirect target
            // itself validated; never for server faults
            if !matches!(
                error,
                ApiError::InvalidRequest(_)
                    | ApiError::UnauthorizedClient(_)
                    | ApiError::AccessDenied(_)
            ) {
                return error.into_response();
            }
            let validated = validated_redirect(&state, &scope, &params).await;
            match validated {
                Some(redirect_uri)
                    if !error.to_string().contains("redirect_uri") =>
                {
                    match authorize::error_redirect(
                        &redirect_uri,
                        error.oidc_code(),
                        params.state.as_deref(),
                    ) {
                        Ok(target) => {
                            Redirect::to(&target).into_response()
                        }
                        Err(_) => error.into_response(),
                    }
                }
                _ => error.into_response(),
            }
        }
    }
}

/// The redirect URI, but only once it has been proven to belong to the
/// named client.
async fn validated_redirect(
    state: &AppState,
    scope: &crate::tenant::TenantScope,
    params: &AuthorizeParams,
) -> Option<String> {
    let client_id = params.client_id.as_deref()?;
    let redirect_uri = params.redirect_uri.as_deref()?;
    let client =
        queries::clients::get_by_client_id(&state.db_pool, scope, client_id)
            .await
            .ok()??;
    client
        .redirect_uri_registered(redirect_uri)
        .then(|| redirect_uri.to_string())
}
