use uuid::Uuid;

use crate::{db::DbPool, error::ApiResult};

/// Append an audit row. Takes the tenant id directly so security events can
/// be recorded even when scope resolution itself is what failed.
pub async fn insert(
    pool: &DbPool,
    tenant_id: Uuid,
    user_id: Option<Uuid>,
    action: &str,
    ip: Option<&str>,
    user_agent: Option<&str>,
) -> ApiResult<()> {
    sqlx::query(
        r#"
        INSERT INTO audit_log (tenant_id, user_id, action, ip, user_agent)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(tenant_id)
    .bind(user_id)
    .bind(action)
    .bind(ip)
    .bind(user_agent)
    .execute(pool)
    .await?;
    Ok(())
}
