use emberlink_types::audit::actions;
use time::{Duration, OffsetDateTime};

use super::{RequestInfo, audit, login::LoginOutcome};
use crate::{
    crypto,
    error::{ApiError, ApiResult},
    queries,
    rate_limit::RateDimension,
    state::AppState,
    store::{MagicToken, ttl},
    tenant::TenantScope,
};

/// Issue a magic token for a pending request and hand the link to the
/// mailer. Returns the link itself outside production so local setups can
/// complete the ceremony without an inbox.
pub async fn request_link(
    state: &AppState,
    scope: &TenantScope,
    rid: &str,
    email: &str,
    _info: &RequestInfo,
) -> ApiResult<Option<String>> {
    let email = email.trim().to_lowercase();
    if email.is_empty() || !email.contains('@') {
        return Err(ApiError::InvalidRequest(
            "a valid email is required".into(),
        ));
    }

    let rules = state.config.rate_rules_for(scope.slug());
    state
        .rate_limiter
        .check(&rules, scope.slug(), RateDimension::MagicPerEmail, &email)
        .await?;

    let pending =
        state.session_store.get_pending(rid).await?.ok_or_else(|| {
            ApiError::InvalidRequest(
                "unknown or expired login request".into(),
            )
        })?;
    scope.ensure(pending.tenant_id)?;

    let token = crypto::mint_token(24);
    state
        .session_store
        .put_magic(
            &token,
            &MagicToken {
                tenant_id: scope.id(),
                rid: rid.to_string(),
                email: email.clone(),
                expires_at: OffsetDateTime::now_utc()
                    + Duration::seconds(ttl::MAGIC_SECS as i64),
            },
        )
        .await?;

    let link = format!(
        "{}/oauth/magic/consume?token={token}",
        state.config.issuer_for(scope.slug())
    );
    state.mailer.send_magic_link(&email, &link).await?;

    if state.config.environment.is_production() {
        Ok(None)
    } else {
        Ok(Some(link))
    }
}

/// Consume a magic token: atomic single-use, binds the email's user to the
/// pending request, then drives flows and consent.
pub async fn consume(
    state: &AppState,
    scope: &TenantScope,
    token: &str,
    info: &RequestInfo,
) -> ApiResult<LoginOutcome> {
    let magic = state
        .session_store
        .take_magic(token)
        .await?
        .ok_or_else(|| {
            ApiError::InvalidGrant(
                "this link has already been used or expired".into(),
            )
        })?;

    if let Err(error) = scope.ensure(magic.tenant_id) {
        audit::security_cross_tenant(&state.db_pool, scope.id(), info).await;
        return Err(error);
    }

    let mut pending = state
        .session_store
        .get_pending(&magic.rid)
        .await?
        .ok_or_else(|| {
            ApiError::InvalidRequest("login request expired".into())
        })?;

    let (user, created_now) = queries::users::find_or_create(
        &state.db_pool,
        scope,
        &magic.email,
        None,
    )
    .await?;
    state.session_store.set_pending_user(&magic.rid, user.id).await?;
    pending.user_id = Some(user.id);

    audit::record(
        &state.db_pool,
        scope.id(),
        Some(user.id),
        actions::LOGIN_MAGIC,
        info,
    )
    .await;

    super::login::complete_authentication(
        state, scope, &pending, &user, info, created_now,
    )
    .await
}
