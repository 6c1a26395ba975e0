use emberlink_types::Tenant;
use std::collections::HashMap;
use time::{Duration, OffsetDateTime};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    db::DbPool,
    error::{ApiError, ApiResult},
    queries,
};

const CACHE_TTL: Duration = Duration::minutes(5);
const CACHE_CAPACITY: usize = 1000;

/// The resolved tenant of a request. Every tenant-scoped query takes one of
/// these; constructing it is only possible through resolution (or the
/// explicit bootstrap path), so an unscoped call on scoped data cannot be
/// written by accident.
#[derive(Clone, Debug)]
pub struct TenantScope {
    tenant: Tenant,
}

impl TenantScope {
    pub fn id(&self) -> Uuid {
        self.tenant.id
    }

    pub fn slug(&self) -> &str {
        &self.tenant.slug
    }

    pub fn tenant(&self) -> &Tenant {
        &self.tenant
    }

    /// Reject data belonging to another tenant. The mismatch is logged as a
    /// security error; the caller additionally writes an audit row.
    pub fn ensure(&self, entity_tenant_id: Uuid) -> ApiResult<()> {
        if entity_tenant_id != self.tenant.id {
            log::error!(
                "Cross-tenant access rejected: scope={} entity_tenant={}",
                self.tenant.id,
                entity_tenant_id
            );
            return Err(ApiError::CrossTenant);
        }
        Ok(())
    }

    /// Bootstrap-only constructor for paths that create tenants (seed,
    /// signup); everything else goes through `TenantCache::resolve`.
    pub fn for_tenant(tenant: Tenant) -> Self {
        Self { tenant }
    }
}

struct CacheEntry {
    tenant: Tenant,
    inserted_at: OffsetDateTime,
}

/// slug → tenant cache with a 5-minute TTL and bounded capacity. Eviction
/// drops the oldest entries first.
pub struct TenantCache {
    inner: RwLock<HashMap<String, CacheEntry>>,
}

impl Default for TenantCache {
    fn default() -> Self {
        Self::new()
    }
}

impl TenantCache {
    pub fn new() -> Self {
        Self { inner: RwLock::new(HashMap::new()) }
    }

    /// Resolve a slug to a `TenantScope`, consulting the cache first.
    /// Unknown slugs are `UnknownTenant`.
    pub async fn resolve(
        &self,
        pool: &DbPool,
        slug: &str,
    ) -> ApiResult<TenantScope> {
        let now = OffsetDateTime::now_utc();

        {
            let cache = self.inner.read().await;
            if let Some(entry) = cache.get(slug) {
                if now - entry.inserted_at < CACHE_TTL {
                    return Ok(TenantScope { tenant: entry.tenant.clone() });
                }
            }
        }

        let tenant = queries::tenants::get_by_slug(pool, slug)
            .await?
            .ok_or(ApiError::UnknownTenant)?;

        let mut cache = self.inner.write().await;
        if cache.len() >= CACHE_CAPACITY {
            Self::evict_oldest(&mut cache);
        }
        cache.insert(
            slug.to_string(),
            CacheEntry { tenant: tenant.clone(), inserted_at: now },
        );

        Ok(TenantScope { tenant })
    }

    fn evict_oldest(cache: &mut HashMap<String, CacheEntry>) {
        let oldest = cache
            .iter()
            .min_by_key(|(_, entry)| entry.inserted_at)
            .map(|(slug, _)| slug.clone());
        if let Some(slug) = oldest {
            cache.remove(&slug);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tenant(slug: &str) -> Tenant {
        let now = OffsetDateTime::now_utc();
        Tenant {
            id: Uuid::new_v4(),
            slug: slug.to_string(),
            name: slug.to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn scope_rejects_foreign_tenant_rows() {
        let scope = TenantScope::for_tenant(tenant("acme"));
        assert!(scope.ensure(scope.id()).is_ok());
        let result = scope.ensure(Uuid::new_v4());
        assert!(matches!(result, Err(ApiError::CrossTenant)));
    }

    #[tokio::test]
    async fn eviction_drops_the_oldest_entry() {
        let cache = TenantCache::new();
        {
            let mut inner = cache.inner.write().await;
            let old = OffsetDateTime::now_utc() - Duration::minutes(2);
            inner.insert(
                "old".into(),
                CacheEntry { tenant: tenant("old"), inserted_at: old },
            );
            inner.insert(
                "new".into(),
                CacheEntry {
                    tenant: tenant("new"),
                    inserted_at: OffsetDateTime::now_utc(),
                },
            );
            TenantCache::evict_oldest(&mut inner);
            assert!(!inner.contains_key("old"));
            assert!(inner.contains_key("new"));
        }
    }
}
