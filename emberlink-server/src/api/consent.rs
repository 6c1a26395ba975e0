use axum::{
    Form, Json,
    extract::{Path, State},
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use log::info;
use serde::Deserialize;
use serde_json::json;

use crate::{
    ops::{self, RequestInfo},
    state::AppState,
};

#[derive(Deserialize, Debug)]
pub struct ConsentForm {
    pub rid: String,
    #[serde(default)]
    pub deny: Option<String>,
}

/// POST /a/{tenant}/oauth/consent — submitted from the original device.
pub async fn decide(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    headers: HeaderMap,
    Form(form): Form<ConsentForm>,
) -> Response {
    info!("POST /a/{tenant}/oauth/consent rid={}", form.rid);
    let info = RequestInfo::from_headers(&headers);

    let scope =
        match state.tenant_cache.resolve(&state.db_pool, &tenant).await {
            Ok(scope) => scope,
            Err(error) => return error.into_response(),
        };

    let deny = form.deny.as_deref().is_some_and(|v| !v.is_empty());
    match ops::login::consent_decision(&state, &scope, &form.rid, deny, &info)
        .await
    {
        Ok(redirect) => Json(json!({ "redirect": redirect })).into_response(),
        Err(error) => error.into_response(),
    }
}
