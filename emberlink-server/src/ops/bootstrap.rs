use emberlink_types::NewTenant;

use crate::{
    error::ApiResult, keys, queries, state::AppState, tenant::TenantScope,
};

const DEFAULT_SLUG: &str = "default";

/// Development seed: make sure a default tenant exists and can sign. Runs
/// through the unscoped tenant repository on purpose; tenant creation is the
/// one path that cannot be tenant-scoped.
pub async fn seed_default_tenant(state: &AppState) -> ApiResult<()> {
    if state.config.environment.is_production() {
        return Ok(());
    }

    let tenant =
        match queries::tenants::get_by_slug(&state.db_pool, DEFAULT_SLUG)
            .await?
        {
            Some(tenant) => tenant,
            None => {
                let tenant = queries::tenants::insert(
                    &state.db_pool,
                    &NewTenant {
                        slug: DEFAULT_SLUG.into(),
                        name: "Default".into(),
                    },
                )
                .await?;
                log::info!("seeded default tenant {}", tenant.id);
                tenant
            }
        };

    let scope = TenantScope::for_tenant(tenant);
    keys::ensure_active(
        &state.db_pool,
        &scope,
        &state.config.encryption_key,
    )
    .await?;
    Ok(())
}
