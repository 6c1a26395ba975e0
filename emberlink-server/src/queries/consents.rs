use emberlink_types::Consent;
use uuid::Uuid;

use crate::{db::DbPool, error::ApiResult, tenant::TenantScope};

const SELECT_COLS: &str =
    "id, tenant_id, user_id, client_db_id, scopes, created_at, updated_at";

pub async fn get(
    pool: &DbPool,
    scope: &TenantScope,
    user_id: Uuid,
    client_db_id: Uuid,
) -> ApiResult<Option<Consent>> {
    let consent = sqlx::query_as::<_, Consent>(&format!(
        "SELECT {SELECT_COLS} FROM consents \
         WHERE tenant_id = $1 AND user_id = $2 AND client_db_id = $3",
    ))
    .bind(scope.id())
    .bind(user_id)
    .bind(client_db_id)
    .fetch_optional(pool)
    .await?;
    Ok(consent)
}

/// First consent creates the row; later approvals merge in newly granted
/// scopes.
pub async fn upsert(
    pool: &DbPool,
    scope: &TenantScope,
    user_id: Uuid,
    client_db_id: Uuid,
    scopes: &[String],
) -> ApiResult<Consent> {
    let consent = sqlx::query_as::<_, Consent>(&format!(
        r#"
        INSERT INTO consents (tenant_id, user_id, client_db_id, scopes)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (tenant_id, user_id, client_db_id) DO UPDATE SET
            scopes = ARRAY(
                SELECT DISTINCT unnest(consents.scopes || EXCLUDED.scopes)
            ),
            updated_at = now()
        RETURNING {SELECT_COLS}
        "#,
    ))
    .bind(scope.id())
    .bind(user_id)
    .bind(client_db_id)
    .bind(scopes)
    .fetch_one(pool)
    .await?;
    Ok(consent)
}
