use emberlink_types::Session;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::{db::DbPool, error::ApiResult, tenant::TenantScope};

pub const SESSION_LIFETIME_DAYS: i64 = 30;

pub async fn insert(
    pool: &DbPool,
    scope: &TenantScope,
    user_id: Uuid,
) -> ApiResult<Session> {
    let now = OffsetDateTime::now_utc();
    let session = sqlx::query_as::<_, Session>(
        r#"
        INSERT INTO sessions (tenant_id, user_id, created_at, expires_at)
        VALUES ($1, $2, $3, $4)
        RETURNING id, tenant_id, user_id, created_at, expires_at
        "#,
    )
    .bind(scope.id())
    .bind(user_id)
    .bind(now)
    .bind(now + Duration::days(SESSION_LIFETIME_DAYS))
    .fetch_one(pool)
    .await?;
    Ok(session)
}

pub async fn get(pool: &DbPool, id: Uuid) -> ApiResult<Option<Session>> {
    let session = sqlx::query_as::<_, Session>(
        "SELECT id, tenant_id, user_id, created_at, expires_at \
         FROM sessions WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(session)
}

/// Immediate expiry, used by reuse detection and logout.
pub async fn expire_now(
    pool: &DbPool,
    scope: &TenantScope,
    id: Uuid,
) -> ApiResult<()> {
    sqlx::query(
        "UPDATE sessions SET expires_at = now() \
         WHERE tenant_id = $1 AND id = $2",
    )
    .bind(scope.id())
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}
