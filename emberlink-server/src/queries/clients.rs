use emberlink_types::Client;
use uuid::Uuid;

use crate::{db::DbPool, error::ApiResult, tenant::TenantScope};

const SELECT_COLS: &str = "id, tenant_id, client_id, client_secret, name, \
     redirect_uris, grant_types, first_party, created_at";

pub async fn get_by_client_id(
    pool: &DbPool,
    scope: &TenantScope,
    client_id: &str,
) -> ApiResult<Option<Client>> {
    let client = sqlx::query_as::<_, Client>(&format!(
        "SELECT {SELECT_COLS} FROM clients \
         WHERE tenant_id = $1 AND client_id = $2",
    ))
    .bind(scope.id())
    .bind(client_id)
    .fetch_optional(pool)
    .await?;
    Ok(client)
}

pub async fn get_by_id(
    pool: &DbPool,
    scope: &TenantScope,
    id: Uuid,
) -> ApiResult<Option<Client>> {
    let client = sqlx::query_as::<_, Client>(&format!(
        "SELECT {SELECT_COLS} FROM clients WHERE tenant_id = $1 AND id = $2",
    ))
    .bind(scope.id())
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(client)
}

pub struct NewClientRow<'a> {
    pub client_id: &'a str,
    pub client_secret: Option<&'a str>,
    pub name: &'a str,
    pub redirect_uris: &'a [String],
    pub grant_types: &'a [String],
    pub first_party: bool,
}

pub async fn insert(
    pool: &DbPool,
    scope: &TenantScope,
    row: NewClientRow<'_>,
) -> ApiResult<Client> {
    let client = sqlx::query_as::<_, Client>(&format!(
        r#"
        INSERT INTO clients
            (tenant_id, client_id, client_secret, name, redirect_uris,
             grant_types, first_party)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING {SELECT_COLS}
        "#,
    ))
    .bind(scope.id())
    .bind(row.client_id)
    .bind(row.client_secret)
    .bind(row.name)
    .bind(row.redirect_uris)
    .bind(row.grant_types)
    .bind(row.first_party)
    .fetch_one(pool)
    .await?;
    Ok(client)
}
