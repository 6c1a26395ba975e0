use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
};
use emberlink_types::ProviderType;
use log::info;
use serde::Deserialize;

use super::magic::render_outcome;
use crate::{
    ops::{self, RequestInfo},
    pages,
    state::AppState,
};

#[derive(Deserialize, Debug)]
pub struct StartParams {
    pub rid: String,
}

/// GET /a/{tenant}/sso/{provider}/start?rid=… → 302 to the upstream
/// authorization URL.
pub async fn start(
    State(state): State<AppState>,
    Path((tenant, provider)): Path<(String, String)>,
    Query(params): Query<StartParams>,
) -> Response {
    info!("GET /a/{tenant}/sso/{provider}/start rid={}", params.rid);

    let Ok(provider_type) = provider.parse::<ProviderType>() else {
        return pages::error(
            StatusCode::NOT_FOUND,
            "Unknown sign-in provider.",
        )
        .into_response();
    };

    let scope =
        match state.tenant_cache.resolve(&state.db_pool, &tenant).await {
            Ok(scope) => scope,
            Err(error) => return error.into_response(),
        };

    match ops::sso::start(&state, &scope, provider_type, &params.rid).await {
        Ok(url) => Redirect::to(&url).into_response(),
        Err(error) => {
            let message = error
                .public_description()
                .unwrap_or_else(|| "Could not start the sign-in.".into());
            pages::error(error.status(), &message).into_response()
        }
    }
}

#[derive(Deserialize, Debug)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

/// GET /a/{tenant}/sso/{provider}/callback?code&state — mirrors the magic
/// consume rendering: pages all the way down.
pub async fn callback(
    State(state): State<AppState>,
    Path((tenant, provider)): Path<(String, String)>,
    Query(params): Query<CallbackParams>,
    headers: HeaderMap,
) -> Response {
    info!("GET /a/{tenant}/sso/{provider}/callback");
    let info = RequestInfo::from_headers(&headers);

    let Ok(provider_type) = provider.parse::<ProviderType>() else {
        return pages::error(
            StatusCode::NOT_FOUND,
            "Unknown sign-in provider.",
        )
        .into_response();
    };

    let scope =
        match state.tenant_cache.resolve(&state.db_pool, &tenant).await {
            Ok(scope) => scope,
            Err(_) => {
                return pages::error(
                    StatusCode::NOT_FOUND,
                    "This sign-in does not belong to a known tenant.",
                )
                .into_response();
            }
        };

    if let Some(upstream_error) = params.error.as_deref() {
        return pages::error(
            StatusCode::BAD_REQUEST,
            &format!("The provider declined the sign-in: {upstream_error}"),
        )
        .into_response();
    }
    let (Some(code), Some(state_param)) =
        (params.code.as_deref(), params.state.as_deref())
    else {
        return pages::error(
            StatusCode::BAD_REQUEST,
            "The provider response is missing its code or state.",
        )
        .into_response();
    };

    let outcome = ops::sso::callback(
        &state,
        &scope,
        provider_type,
        code,
        state_param,
        &info,
    )
    .await;
    render_outcome(&scope, outcome)
}
