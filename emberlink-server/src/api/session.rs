use axum::{
    Form, Json,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use emberlink_types::{AccessClaims, OidcErrorBody, UserinfoResponse};
use log::info;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::{
    keys,
    ops::{self, RequestInfo},
    queries,
    state::AppState,
};

/// GET /a/{tenant}/oauth/userinfo — bearer access token in, claims out.
pub async fn userinfo(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    headers: HeaderMap,
) -> Response {
    info!("GET /a/{tenant}/oauth/userinfo");

    let scope =
        match state.tenant_cache.resolve(&state.db_pool, &tenant).await {
            Ok(scope) => scope,
            Err(error) => return error.into_response(),
        };

    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    let Some(token) = token else {
        return invalid_token();
    };

    let issuer = state.config.issuer_for(scope.slug());
    let claims = match keys::verify_tenant_token::<AccessClaims>(
        &state.db_pool,
        &scope,
        token,
        &issuer,
    )
    .await
    {
        Ok(claims) => claims,
        Err(_) => return invalid_token(),
    };

    let Ok(user_id) = claims.sub.parse::<Uuid>() else {
        return invalid_token();
    };
    let user =
        match queries::users::get_by_id(&state.db_pool, &scope, user_id).await
        {
            Ok(Some(user)) => user,
            Ok(None) => return invalid_token(),
            Err(error) => return error.into_response(),
        };

    let scopes: Vec<&str> = claims.scope.split_whitespace().collect();
    Json(UserinfoResponse {
        sub: user.id.to_string(),
        email: scopes.contains(&"email").then(|| user.email.clone()),
        name: scopes.contains(&"profile").then(|| user.name.clone()).flatten(),
    })
    .into_response()
}

fn invalid_token() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, "Bearer error=\"invalid_token\"")],
        Json(OidcErrorBody {
            error: "invalid_token".into(),
            error_description: None,
        }),
    )
        .into_response()
}

#[derive(Deserialize, Debug)]
pub struct LogoutForm {
    pub refresh_token: String,
}

/// POST /a/{tenant}/logout — expire the session behind a refresh token.
pub async fn logout(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    headers: HeaderMap,
    Form(form): Form<LogoutForm>,
) -> Response {
    info!("POST /a/{tenant}/logout");
    let info = RequestInfo::from_headers(&headers);

    let scope =
        match state.tenant_cache.resolve(&state.db_pool, &tenant).await {
            Ok(scope) => scope,
            Err(error) => return error.into_response(),
        };

    match ops::tokens::logout(&state, &scope, &form.refresh_token, &info)
        .await
    {
        Ok(()) => Json(json!({ "ok": true })).into_response(),
        Err(error) => error.into_response(),
    }
}
