use emberlink_types::{NewTenant, Tenant};

use crate::{db::DbPool, error::ApiResult};

/// Unscoped by design: tenant rows are the scope boundary itself. Only the
/// resolver and the bootstrap/seed paths call in here.
pub async fn get_by_slug(
    pool: &DbPool,
    slug: &str,
) -> ApiResult<Option<Tenant>> {
    let tenant = sqlx::query_as::<_, Tenant>(
        r#"
        SELECT id, slug, name, created_at, updated_at
        FROM tenants
        WHERE slug = $1
        "#,
    )
    .bind(slug)
    .fetch_optional(pool)
    .await?;
    Ok(tenant)
}

pub async fn insert(pool: &DbPool, new_tenant: &NewTenant) -> ApiResult<Tenant> {
    let tenant = sqlx::query_as::<_, Tenant>(
        r#"
        INSERT INTO tenants (slug, name)
        VALUES ($1, $2)
        RETURNING id, slug, name, created_at, updated_at
        "#,
    )
    .bind(&new_tenant.slug)
    .bind(&new_tenant.name)
    .fetch_one(pool)
    .await?;
    Ok(tenant)
}
