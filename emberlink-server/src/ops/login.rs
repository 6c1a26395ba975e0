use emberlink_types::{
    FlowPromptDescriptor, FlowTrigger, HandoffClaims, User, audit::actions,
};
use serde_json::json;
use std::collections::HashMap;
use time::OffsetDateTime;

use super::{RequestInfo, audit, authorize};
use crate::{
    error::{ApiError, ApiResult},
    flow::{FlowEngine, FlowResult},
    keys, queries,
    sse::{EVENT_CONSENT_REQUIRED, EVENT_LOGIN_COMPLETE},
    state::AppState,
    store::PendingAuthRequest,
    tenant::TenantScope,
};

const HANDOFF_LIFETIME_SECS: i64 = 120;

/// Where the login ceremony stands after an authentication channel has done
/// its part. The handler renders a page (or JSON) from this.
#[derive(Debug)]
pub enum LoginOutcome {
    /// A flow node wants input from the user on this device.
    FlowPrompt(FlowPromptDescriptor),
    /// Consent is being collected on the original device; this device is
    /// done.
    ConsentPending,
    /// The code was issued and `loginComplete` published.
    Completed { redirect: String },
    /// The flow rejected the login.
    Failed { message: String },
}

/// Drive everything that follows a successful authentication: the tenant's
/// flow for the trigger, then the consent decision, then code issuance.
pub async fn complete_authentication(
    state: &AppState,
    scope: &TenantScope,
    pending: &PendingAuthRequest,
    user: &User,
    info: &RequestInfo,
    created_now: bool,
) -> ApiResult<LoginOutcome> {
    let trigger = if created_now {
        FlowTrigger::Signup
    } else {
        FlowTrigger::Signin
    };

    let engine = FlowEngine::new(state, scope);
    match engine.run_for_trigger(trigger, pending, user, info).await? {
        FlowResult::Suspended(descriptor) => {
            return Ok(LoginOutcome::FlowPrompt(descriptor));
        }
        FlowResult::Failed(message) => {
            return Ok(LoginOutcome::Failed { message });
        }
        FlowResult::Skipped | FlowResult::Success => {}
    }

    finish_after_flow(state, scope, pending).await
}

/// Resume an interrupted flow from a prompt submission, then pick the
/// ceremony back up where `complete_authentication` left it.
pub async fn resume_flow(
    state: &AppState,
    scope: &TenantScope,
    resume_token: &str,
    fields: HashMap<String, String>,
    info: &RequestInfo,
) -> ApiResult<LoginOutcome> {
    let engine = FlowEngine::new(state, scope);
    let (result, run) = engine.resume(resume_token, fields, info).await?;

    match result {
        FlowResult::Suspended(descriptor) => {
            Ok(LoginOutcome::FlowPrompt(descriptor))
        }
        FlowResult::Failed(message) => Ok(LoginOutcome::Failed { message }),
        FlowResult::Skipped | FlowResult::Success => {
            let pending = state
                .session_store
                .get_pending(&run.request_rid)
                .await?
                .ok_or_else(|| {
                    ApiError::InvalidRequest(
                        "login request expired while the flow ran".into(),
                    )
                })?;
            finish_after_flow(state, scope, &pending).await
        }
    }
}

/// Consent decision and completion, shared by every channel.
async fn finish_after_flow(
    state: &AppState,
    scope: &TenantScope,
    pending: &PendingAuthRequest,
) -> ApiResult<LoginOutcome> {
    let user_id = pending.user_id.ok_or_else(|| {
        ApiError::Internal("pending request lost its user".into())
    })?;
    let client =
        queries::clients::get_by_id(&state.db_pool, scope, pending.client_db_id)
            .await?
            .ok_or(ApiError::NotFound)?;

    if authorize::consent_required(
        state,
        scope,
        &client,
        user_id,
        &pending.scope,
    )
    .await?
    {
        state
            .sse
            .publish(
                &pending.rid,
                EVENT_CONSENT_REQUIRED,
                json!({
                    "rid": pending.rid,
                    "client_name": client.name,
                    "scope": pending.scope,
                }),
            )
            .await;
        return Ok(LoginOutcome::ConsentPending);
    }

    let redirect = complete_and_notify(state, scope, pending).await?;
    Ok(LoginOutcome::Completed { redirect })
}

/// Issue the code, publish `loginComplete` with the short-lived handoff
/// token, and hand back the relying-party redirect.
pub async fn complete_and_notify(
    state: &AppState,
    scope: &TenantScope,
    pending: &PendingAuthRequest,
) -> ApiResult<String> {
    let user_id = pending.user_id.ok_or_else(|| {
        ApiError::Internal("pending request lost its user".into())
    })?;

    let redirect = authorize::issue_code(state, scope, pending).await?;

    let signer = keys::active_signer(
        &state.db_pool,
        scope,
        &state.config.encryption_key,
    )
    .await?;
    let now = OffsetDateTime::now_utc().unix_timestamp();
    let handoff = signer.sign(&HandoffClaims {
        iss: state.config.issuer_for(scope.slug()),
        sub: user_id.to_string(),
        aud: pending.client_id.clone(),
        exp: now + HANDOFF_LIFETIME_SECS,
        iat: now,
        rid: pending.rid.clone(),
    })?;

    state
        .sse
        .publish(
            &pending.rid,
            EVENT_LOGIN_COMPLETE,
            json!({ "redirect": redirect, "handoff": handoff }),
        )
        .await;

    Ok(redirect)
}

/// Handle the consent form posted from the original device.
pub async fn consent_decision(
    state: &AppState,
    scope: &TenantScope,
    rid: &str,
    deny: bool,
    info: &RequestInfo,
) -> ApiResult<String> {
    let pending = state
        .session_store
        .get_pending(rid)
        .await?
        .ok_or_else(|| {
            ApiError::InvalidRequest("login request expired".into())
        })?;
    let user_id = pending.user_id.ok_or_else(|| {
        ApiError::InvalidRequest("login request has no authenticated user".into())
    })?;

    if deny {
        audit::record(
            &state.db_pool,
            scope.id(),
            Some(user_id),
            actions::CONSENT_DENIED,
            info,
        )
        .await;
        state.session_store.remove_pending(rid).await?;
        return authorize::error_redirect(
            &pending.redirect_uri,
            "access_denied",
            pending.state.as_deref(),
        );
    }

    let scopes: Vec<String> =
        pending.scope.split_whitespace().map(str::to_string).collect();
    queries::consents::upsert(
        &state.db_pool,
        scope,
        user_id,
        pending.client_db_id,
        &scopes,
    )
    .await?;
    audit::record(
        &state.db_pool,
        scope.id(),
        Some(user_id),
        actions::CONSENT_GRANTED,
        info,
    )
    .await;

    complete_and_notify(state, scope, &pending).await
}
