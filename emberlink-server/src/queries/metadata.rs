use serde_json::Value;
use uuid::Uuid;

use crate::{db::DbPool, error::ApiResult, tenant::TenantScope};

pub async fn get(
    pool: &DbPool,
    scope: &TenantScope,
    user_id: Uuid,
    namespace: &str,
) -> ApiResult<Option<Value>> {
    let row: Option<(Value,)> = sqlx::query_as(
        "SELECT data FROM user_metadata \
         WHERE tenant_id = $1 AND user_id = $2 AND namespace = $3",
    )
    .bind(scope.id())
    .bind(user_id)
    .bind(namespace)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|(data,)| data))
}

/// Per-namespace upsert: existing keys are merged with the new document
/// winning.
pub async fn upsert(
    pool: &DbPool,
    scope: &TenantScope,
    user_id: Uuid,
    namespace: &str,
    data: &Value,
) -> ApiResult<()> {
    sqlx::query(
        r#"
        INSERT INTO user_metadata (tenant_id, user_id, namespace, data)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (tenant_id, user_id, namespace) DO UPDATE SET
            data = user_metadata.data || EXCLUDED.data,
            updated_at = now()
        "#,
    )
    .bind(scope.id())
    .bind(user_id)
    .bind(namespace)
    .bind(data)
    .execute(pool)
    .await?;
    Ok(())
}
