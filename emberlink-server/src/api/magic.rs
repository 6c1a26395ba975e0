use axum::{
    Form, Json,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use log::info;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;

use crate::{
    error::ApiError,
    ops::{self, RequestInfo, login::LoginOutcome},
    pages,
    state::AppState,
    tenant::TenantScope,
};

#[derive(Deserialize, Debug)]
pub struct MagicRequestForm {
    pub email: String,
    pub rid: String,
}

/// POST /a/{tenant}/oauth/magic/request
pub async fn request(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    headers: HeaderMap,
    Form(form): Form<MagicRequestForm>,
) -> Response {
    info!("POST /a/{tenant}/oauth/magic/request rid={}", form.rid);
    let info = RequestInfo::from_headers(&headers);

    let scope =
        match state.tenant_cache.resolve(&state.db_pool, &tenant).await {
            Ok(scope) => scope,
            Err(error) => return error.into_response(),
        };

    match ops::magic::request_link(
        &state, &scope, &form.rid, &form.email, &info,
    )
    .await
    {
        Ok(debug_link) => {
            let mut body = json!({ "ok": true });
            if let Some(link) = debug_link {
                body["debug_link"] = json!(link);
            }
            Json(body).into_response()
        }
        Err(error) => error.into_response(),
    }
}

#[derive(Deserialize, Debug)]
pub struct ConsumeParams {
    pub token: String,
}

/// GET /a/{tenant}/oauth/magic/consume?token=…
///
/// Browser-facing: every outcome is a page, including failures.
pub async fn consume(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    Query(params): Query<ConsumeParams>,
    headers: HeaderMap,
) -> Response {
    info!("GET /a/{tenant}/oauth/magic/consume");
    let info = RequestInfo::from_headers(&headers);

    let scope =
        match state.tenant_cache.resolve(&state.db_pool, &tenant).await {
            Ok(scope) => scope,
            Err(_) => {
                return pages::error(
                    StatusCode::NOT_FOUND,
                    "This sign-in link does not belong to a known tenant.",
                )
                .into_response();
            }
        };

    let outcome =
        ops::magic::consume(&state, &scope, &params.token, &info).await;
    render_outcome(&scope, outcome)
}

/// POST /a/{tenant}/oauth/magic/consume — a flow prompt submission carrying
/// the resume token.
pub async fn resume(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    headers: HeaderMap,
    Form(mut fields): Form<HashMap<String, String>>,
) -> Response {
    info!("POST /a/{tenant}/oauth/magic/consume (flow resume)");
    let info = RequestInfo::from_headers(&headers);

    let scope =
        match state.tenant_cache.resolve(&state.db_pool, &tenant).await {
            Ok(scope) => scope,
            Err(error) => return error.into_response(),
        };

    let Some(resume_token) = fields.remove("resume_token") else {
        return pages::error(
            StatusCode::BAD_REQUEST,
            "The form is missing its continuation token.",
        )
        .into_response();
    };

    let outcome =
        ops::login::resume_flow(&state, &scope, &resume_token, fields, &info)
            .await;
    render_outcome(&scope, outcome)
}

/// Map a login outcome (or error) onto the page the authenticating device
/// should see.
pub fn render_outcome(
    scope: &TenantScope,
    outcome: Result<LoginOutcome, ApiError>,
) -> Response {
    match outcome {
        Ok(LoginOutcome::FlowPrompt(descriptor)) => pages::flow_prompt(
            &format!("/a/{}/oauth/magic/consume", scope.slug()),
            &descriptor,
        )
        .into_response(),
        Ok(LoginOutcome::ConsentPending) => {
            pages::continue_elsewhere().into_response()
        }
        Ok(LoginOutcome::Completed { .. }) => pages::completion(
            "Return to your original device; it will continue automatically.",
        )
        .into_response(),
        Ok(LoginOutcome::Failed { message }) => {
            pages::error(StatusCode::FORBIDDEN, &message).into_response()
        }
        Err(error) => {
            let message = error
                .public_description()
                .unwrap_or_else(|| "Something went wrong.".to_string());
            pages::error(error.status(), &message).into_response()
        }
    }
}
