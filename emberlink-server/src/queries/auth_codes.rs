use emberlink_types::AuthCode;
use time::OffsetDateTime;

use crate::{db::DbPool, error::ApiResult, tenant::TenantScope};

pub async fn insert(
    pool: &DbPool,
    scope: &TenantScope,
    code: &AuthCode,
) -> ApiResult<()> {
    sqlx::query(
        r#"
        INSERT INTO auth_codes
            (code, tenant_id, client_db_id, user_id, redirect_uri, scope,
             created_at, expires_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(&code.code)
    .bind(scope.id())
    .bind(code.client_db_id)
    .bind(code.user_id)
    .bind(&code.redirect_uri)
    .bind(&code.scope)
    .bind(code.created_at)
    .bind(code.expires_at)
    .execute(pool)
    .await?;
    Ok(())
}

/// Single-use redemption: delete-and-return in one statement, so exactly one
/// caller ever receives the row. The lookup is global by code; the caller is
/// responsible for the tenant check on the returned row.
pub async fn take(pool: &DbPool, code: &str) -> ApiResult<Option<AuthCode>> {
    let row = sqlx::query_as::<_, AuthCode>(
        r#"
        DELETE FROM auth_codes
        WHERE code = $1
        RETURNING code, tenant_id, client_db_id, user_id, redirect_uri,
                  scope, created_at, expires_at
        "#,
    )
    .bind(code)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Drop codes past their expiry; called opportunistically.
pub async fn purge_expired(
    pool: &DbPool,
    now: OffsetDateTime,
) -> ApiResult<u64> {
    let result = sqlx::query("DELETE FROM auth_codes WHERE expires_at <= $1")
        .bind(now)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

