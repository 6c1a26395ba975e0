use emberlink_types::{
    ExternalIdentity, IdentityProvider, IdpStatus, ProviderType,
};
use serde_json::Value;
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    db::DbPool,
    error::{ApiError, ApiResult},
    tenant::TenantScope,
};

#[derive(FromRow)]
struct IdentityProviderRow {
    id: Uuid,
    tenant_id: Uuid,
    provider_type: String,
    client_id: String,
    client_secret_enc: String,
    issuer: Option<String>,
    scopes: Vec<String>,
    status: String,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl TryFrom<IdentityProviderRow> for IdentityProvider {
    type Error = ApiError;

    fn try_from(row: IdentityProviderRow) -> Result<Self, Self::Error> {
        Ok(IdentityProvider {
            id: row.id,
            tenant_id: row.tenant_id,
            provider_type: row
                .provider_type
                .parse::<ProviderType>()
                .map_err(ApiError::Internal)?,
            client_id: row.client_id,
            client_secret_enc: row.client_secret_enc,
            issuer: row.issuer,
            scopes: row.scopes,
            status: row
                .status
                .parse::<IdpStatus>()
                .map_err(ApiError::Internal)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const SELECT_COLS: &str = "id, tenant_id, provider_type, client_id, \
     client_secret_enc, issuer, scopes, status, created_at, updated_at";

pub async fn get_by_type(
    pool: &DbPool,
    scope: &TenantScope,
    provider_type: ProviderType,
) -> ApiResult<Option<IdentityProvider>> {
    let row = sqlx::query_as::<_, IdentityProviderRow>(&format!(
        "SELECT {SELECT_COLS} FROM identity_providers \
         WHERE tenant_id = $1 AND provider_type = $2",
    ))
    .bind(scope.id())
    .bind(provider_type.to_string())
    .fetch_optional(pool)
    .await?;
    row.map(IdentityProvider::try_from).transpose()
}

pub async fn list_enabled(
    pool: &DbPool,
    scope: &TenantScope,
) -> ApiResult<Vec<IdentityProvider>> {
    let rows = sqlx::query_as::<_, IdentityProviderRow>(&format!(
        "SELECT {SELECT_COLS} FROM identity_providers \
         WHERE tenant_id = $1 AND status = 'enabled' \
         ORDER BY provider_type",
    ))
    .bind(scope.id())
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(IdentityProvider::try_from).collect()
}

const IDENTITY_COLS: &str = "id, tenant_id, user_id, provider_id, subject, \
     email, claims, last_login_at, created_at";

#[derive(FromRow)]
struct ExternalIdentityRow {
    id: Uuid,
    tenant_id: Uuid,
    user_id: Uuid,
    provider_id: Uuid,
    subject: String,
    email: String,
    claims: Value,
    last_login_at: OffsetDateTime,
    created_at: OffsetDateTime,
}

impl From<ExternalIdentityRow> for ExternalIdentity {
    fn from(row: ExternalIdentityRow) -> Self {
        ExternalIdentity {
            id: row.id,
            tenant_id: row.tenant_id,
            user_id: row.user_id,
            provider_id: row.provider_id,
            subject: row.subject,
            email: row.email,
            claims: row.claims,
            last_login_at: row.last_login_at,
            created_at: row.created_at,
        }
    }
}

/// Race-safe upsert keyed on (provider, subject). Returns the link and
/// whether it was created by this call.
pub async fn upsert_identity(
    pool: &DbPool,
    scope: &TenantScope,
    user_id: Uuid,
    provider_id: Uuid,
    subject: &str,
    email: &str,
    claims: &Value,
) -> ApiResult<(ExternalIdentity, bool)> {
    let row = sqlx::query_as::<_, ExternalIdentityRow>(&format!(
        r#"
        INSERT INTO external_identities
            (tenant_id, user_id, provider_id, subject, email, claims)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (provider_id, subject) DO UPDATE SET
            email = EXCLUDED.email,
            claims = EXCLUDED.claims,
            last_login_at = now()
        RETURNING {IDENTITY_COLS}
        "#,
    ))
    .bind(scope.id())
    .bind(user_id)
    .bind(provider_id)
    .bind(subject)
    .bind(email)
    .bind(claims)
    .fetch_one(pool)
    .await?;
    let created = row.created_at == row.last_login_at;
    Ok((row.into(), created))
}
