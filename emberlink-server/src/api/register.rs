use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use emberlink_types::ClientRegistrationRequest;
use log::info;

use crate::{
    ops::{self, RequestInfo},
    state::AppState,
};

/// POST /a/{tenant}/oauth/register
pub async fn register(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    headers: HeaderMap,
    Json(request): Json<ClientRegistrationRequest>,
) -> Response {
    info!(
        "POST /a/{tenant}/oauth/register client_name={}",
        request.client_name
    );
    let info = RequestInfo::from_headers(&headers);

    let scope =
        match state.tenant_cache.resolve(&state.db_pool, &tenant).await {
            Ok(scope) => scope,
            Err(error) => return error.into_response(),
        };

    match ops::register::register(&state, &scope, request, &info).await {
        Ok(response) => {
            (StatusCode::CREATED, Json(response)).into_response()
        }
        Err(error) => error.into_response(),
    }
}
