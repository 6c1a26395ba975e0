use emberlink_types::audit::actions;
use uuid::Uuid;

use super::RequestInfo;
use crate::{db::DbPool, queries};

/// Append an audit row. Best-effort: a failed audit write is logged, never
/// surfaced, so it cannot abort the operation it describes.
pub async fn record(
    pool: &DbPool,
    tenant_id: Uuid,
    user_id: Option<Uuid>,
    action: &str,
    info: &RequestInfo,
) {
    if let Err(error) = queries::audit::insert(
        pool,
        tenant_id,
        user_id,
        action,
        info.ip.as_deref(),
        info.user_agent.as_deref(),
    )
    .await
    {
        log::error!("audit write failed for {action}: {error}");
    }
}

/// Record a cross-tenant access attempt against the tenant whose scope the
/// request was made under. The attempted tenant is deliberately not stored.
pub async fn security_cross_tenant(
    pool: &DbPool,
    tenant_id: Uuid,
    info: &RequestInfo,
) {
    record(pool, tenant_id, None, actions::SECURITY_CROSS_TENANT, info).await;
}
