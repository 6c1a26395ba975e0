use emberlink_types::{JwkKey, KeyStatus};
use serde_json::Value;
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    db::DbPool,
    error::{ApiError, ApiResult},
    tenant::TenantScope,
};

/// Intermediate row because status lives in a TEXT column.
#[derive(FromRow)]
struct JwkKeyRow {
    id: Uuid,
    tenant_id: Uuid,
    kid: String,
    pub_jwk: Value,
    priv_jwk_enc: String,
    status: String,
    not_before: OffsetDateTime,
    not_after: Option<OffsetDateTime>,
    created_at: OffsetDateTime,
}

impl TryFrom<JwkKeyRow> for JwkKey {
    type Error = ApiError;

    fn try_from(row: JwkKeyRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<KeyStatus>()
            .map_err(ApiError::Internal)?;
        Ok(JwkKey {
            id: row.id,
            tenant_id: row.tenant_id,
            kid: row.kid,
            pub_jwk: row.pub_jwk,
            priv_jwk_enc: row.priv_jwk_enc,
            status,
            not_before: row.not_before,
            not_after: row.not_after,
            created_at: row.created_at,
        })
    }
}

const SELECT_COLS: &str = "id, tenant_id, kid, pub_jwk, priv_jwk_enc, \
     status, not_before, not_after, created_at";

pub async fn get_active(
    pool: &DbPool,
    scope: &TenantScope,
) -> ApiResult<Option<JwkKey>> {
    let row = sqlx::query_as::<_, JwkKeyRow>(&format!(
        "SELECT {SELECT_COLS} FROM jwk_keys \
         WHERE tenant_id = $1 AND status = 'active'",
    ))
    .bind(scope.id())
    .fetch_optional(pool)
    .await?;
    row.map(JwkKey::try_from).transpose()
}

/// Keys currently served by the JWKS endpoint: active plus retired within
/// their `not_after` grace window.
pub async fn get_published(
    pool: &DbPool,
    scope: &TenantScope,
) -> ApiResult<Vec<JwkKey>> {
    let rows = sqlx::query_as::<_, JwkKeyRow>(&format!(
        r#"
        SELECT {SELECT_COLS} FROM jwk_keys
        WHERE tenant_id = $1
          AND (status = 'active'
               OR (status = 'retired' AND not_after > now()))
        ORDER BY created_at DESC
        "#,
    ))
    .bind(scope.id())
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(JwkKey::try_from).collect()
}

pub async fn get_by_kid(
    pool: &DbPool,
    scope: &TenantScope,
    kid: &str,
) -> ApiResult<Option<JwkKey>> {
    let row = sqlx::query_as::<_, JwkKeyRow>(&format!(
        "SELECT {SELECT_COLS} FROM jwk_keys \
         WHERE tenant_id = $1 AND kid = $2",
    ))
    .bind(scope.id())
    .bind(kid)
    .fetch_optional(pool)
    .await?;
    row.map(JwkKey::try_from).transpose()
}

pub struct NewKeyRow<'a> {
    pub kid: &'a str,
    pub pub_jwk: &'a Value,
    pub priv_jwk_enc: &'a str,
    pub status: KeyStatus,
}

pub async fn insert(
    pool: &DbPool,
    scope: &TenantScope,
    row: NewKeyRow<'_>,
) -> ApiResult<JwkKey> {
    let inserted = sqlx::query_as::<_, JwkKeyRow>(&format!(
        r#"
        INSERT INTO jwk_keys (tenant_id, kid, pub_jwk, priv_jwk_enc, status)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING {SELECT_COLS}
        "#,
    ))
    .bind(scope.id())
    .bind(row.kid)
    .bind(row.pub_jwk)
    .bind(row.priv_jwk_enc)
    .bind(row.status.to_string())
    .fetch_one(pool)
    .await?;
    inserted.try_into()
}

pub async fn set_status(
    pool: &DbPool,
    scope: &TenantScope,
    id: Uuid,
    status: KeyStatus,
    not_after: Option<OffsetDateTime>,
) -> ApiResult<()> {
    sqlx::query(
        "UPDATE jwk_keys SET status = $3, not_after = $4 \
         WHERE tenant_id = $1 AND id = $2",
    )
    .bind(scope.id())
    .bind(id)
    .bind(status.to_string())
    .bind(not_after)
    .execute(pool)
    .await?;
    Ok(())
}
