use emberlink_types::User;
use uuid::Uuid;

use crate::{db::DbPool, error::ApiResult, tenant::TenantScope};

const SELECT_COLS: &str =
    "id, tenant_id, email, name, password_hash, is_admin, created_at, updated_at";

pub async fn get_by_id(
    pool: &DbPool,
    scope: &TenantScope,
    id: Uuid,
) -> ApiResult<Option<User>> {
    let user = sqlx::query_as::<_, User>(&format!(
        "SELECT {SELECT_COLS} FROM users WHERE tenant_id = $1 AND id = $2",
    ))
    .bind(scope.id())
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(user)
}

pub async fn get_by_email(
    pool: &DbPool,
    scope: &TenantScope,
    email: &str,
) -> ApiResult<Option<User>> {
    let user = sqlx::query_as::<_, User>(&format!(
        "SELECT {SELECT_COLS} FROM users WHERE tenant_id = $1 AND email = $2",
    ))
    .bind(scope.id())
    .bind(email)
    .fetch_optional(pool)
    .await?;
    Ok(user)
}

/// Find or create a user by lowercased email. Runs inside a serializable
/// transaction so two concurrent first logins cannot both become admin.
/// Returns the user and whether it was created now.
pub async fn find_or_create(
    pool: &DbPool,
    scope: &TenantScope,
    email: &str,
    name: Option<&str>,
) -> ApiResult<(User, bool)> {
    let email = email.trim().to_lowercase();

    let mut tx = pool.begin().await?;
    sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
        .execute(&mut *tx)
        .await?;

    let existing = sqlx::query_as::<_, User>(&format!(
        "SELECT {SELECT_COLS} FROM users WHERE tenant_id = $1 AND email = $2",
    ))
    .bind(scope.id())
    .bind(&email)
    .fetch_optional(&mut *tx)
    .await?;

    if let Some(user) = existing {
        tx.commit().await?;
        return Ok((user, false));
    }

    let (count,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM users WHERE tenant_id = $1")
            .bind(scope.id())
            .fetch_one(&mut *tx)
            .await?;
    let is_admin = count == 0;

    let user = sqlx::query_as::<_, User>(&format!(
        r#"
        INSERT INTO users (tenant_id, email, name, is_admin)
        VALUES ($1, $2, $3, $4)
        RETURNING {SELECT_COLS}
        "#,
    ))
    .bind(scope.id())
    .bind(&email)
    .bind(name)
    .bind(is_admin)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok((user, true))
}

pub async fn set_name_if_empty(
    pool: &DbPool,
    scope: &TenantScope,
    id: Uuid,
    name: &str,
) -> ApiResult<()> {
    sqlx::query(
        r#"
        UPDATE users SET name = $3, updated_at = now()
        WHERE tenant_id = $1 AND id = $2 AND name IS NULL
        "#,
    )
    .bind(scope.id())
    .bind(id)
    .bind(name)
    .execute(pool)
    .await?;
    Ok(())
}
