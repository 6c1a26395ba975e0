use axum::{
    Form, Json,
    extract::{Path, State},
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use emberlink_types::TokenRequest;
use log::info;
use serde::Deserialize;
use serde_json::json;

use crate::{
    ops::{self, RequestInfo},
    state::AppState,
};

/// POST /a/{tenant}/oauth/token
pub async fn token(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    headers: HeaderMap,
    Form(request): Form<TokenRequest>,
) -> Response {
    info!(
        "POST /a/{tenant}/oauth/token grant_type={}",
        request.grant_type
    );
    let info = RequestInfo::from_headers(&headers);

    let scope =
        match state.tenant_cache.resolve(&state.db_pool, &tenant).await {
            Ok(scope) => scope,
            Err(error) => return error.into_response(),
        };

    match ops::tokens::token(&state, &scope, &headers, request, &info).await {
        Ok(response) => Json(response).into_response(),
        Err(error) => error.into_response(),
    }
}

#[derive(Deserialize, Debug)]
pub struct TokenIntrospectionForm {
    pub token: String,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

impl TokenIntrospectionForm {
    fn as_token_request(&self) -> TokenRequest {
        TokenRequest {
            grant_type: String::new(),
            code: None,
            redirect_uri: None,
            code_verifier: None,
            refresh_token: None,
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
        }
    }
}

/// POST /a/{tenant}/oauth/introspect
pub async fn introspect(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    headers: HeaderMap,
    Form(form): Form<TokenIntrospectionForm>,
) -> Response {
    info!("POST /a/{tenant}/oauth/introspect");

    let scope =
        match state.tenant_cache.resolve(&state.db_pool, &tenant).await {
            Ok(scope) => scope,
            Err(error) => return error.into_response(),
        };

    match ops::tokens::introspect(
        &state,
        &scope,
        &headers,
        form.as_token_request(),
        &form.token,
    )
    .await
    {
        Ok(response) => Json(response).into_response(),
        Err(error) => error.into_response(),
    }
}

/// POST /a/{tenant}/oauth/revoke — always 200 once the client is
/// authenticated (RFC 7009).
pub async fn revoke(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    headers: HeaderMap,
    Form(form): Form<TokenIntrospectionForm>,
) -> Response {
    info!("POST /a/{tenant}/oauth/revoke");
    let info = RequestInfo::from_headers(&headers);

    let scope =
        match state.tenant_cache.resolve(&state.db_pool, &tenant).await {
            Ok(scope) => scope,
            Err(error) => return error.into_response(),
        };

    match ops::tokens::revoke(
        &state,
        &scope,
        &headers,
        form.as_token_request(),
        &form.token,
        &info,
    )
    .await
    {
        Ok(()) => Json(json!({})).into_response(),
        Err(error) => error.into_response(),
    }
}
