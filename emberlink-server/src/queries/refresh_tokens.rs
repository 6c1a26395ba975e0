use emberlink_types::RefreshToken;
use uuid::Uuid;

use crate::{db::DbPool, error::ApiResult, tenant::TenantScope};

const SELECT_COLS: &str = "id, token, tenant_id, session_id, client_id, \
     revoked, created_at, expires_at";

pub async fn insert(
    pool: &DbPool,
    scope: &TenantScope,
    token: &RefreshToken,
) -> ApiResult<()> {
    sqlx::query(
        r#"
        INSERT INTO refresh_tokens
            (id, token, tenant_id, session_id, client_id, revoked,
             created_at, expires_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(token.id)
    .bind(&token.token)
    .bind(scope.id())
    .bind(token.session_id)
    .bind(&token.client_id)
    .bind(token.revoked)
    .bind(token.created_at)
    .bind(token.expires_at)
    .execute(pool)
    .await?;
    Ok(())
}

/// Global lookup by token value; the caller performs the tenant check.
pub async fn get_by_token(
    pool: &DbPool,
    token: &str,
) -> ApiResult<Option<RefreshToken>> {
    let row = sqlx::query_as::<_, RefreshToken>(&format!(
        "SELECT {SELECT_COLS} FROM refresh_tokens WHERE token = $1",
    ))
    .bind(token)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Mark one token revoked. Returns false when it was already revoked, which
/// lets rotation detect a lost race.
pub async fn revoke(
    pool: &DbPool,
    scope: &TenantScope,
    id: Uuid,
) -> ApiResult<bool> {
    let result = sqlx::query(
        "UPDATE refresh_tokens SET revoked = TRUE \
         WHERE tenant_id = $1 AND id = $2 AND revoked = FALSE",
    )
    .bind(scope.id())
    .bind(id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Reuse cascade: revoke every sibling of a session.
pub async fn revoke_all_for_session(
    pool: &DbPool,
    scope: &TenantScope,
    session_id: Uuid,
) -> ApiResult<u64> {
    let result = sqlx::query(
        "UPDATE refresh_tokens SET revoked = TRUE \
         WHERE tenant_id = $1 AND session_id = $2 AND revoked = FALSE",
    )
    .bind(scope.id())
    .bind(session_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}
