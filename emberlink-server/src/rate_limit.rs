use std::sync::Arc;

use crate::{
    config::{RateRule, RateRules},
    error::{ApiError, ApiResult},
    store::SessionStore,
};

/// Which built-in rule a hit counts against.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateDimension {
    TokenPerIp,
    TokenPerClient,
    RegisterPerIp,
    MagicPerEmail,
}

impl RateDimension {
    fn name(self) -> &'static str {
        match self {
            RateDimension::TokenPerIp => "token_ip",
            RateDimension::TokenPerClient => "token_client",
            RateDimension::RegisterPerIp => "register_ip",
            RateDimension::MagicPerEmail => "magic_email",
        }
    }

    fn rule(self, rules: &RateRules) -> RateRule {
        match self {
            RateDimension::TokenPerIp => rules.token_per_ip,
            RateDimension::TokenPerClient => rules.token_per_client,
            RateDimension::RegisterPerIp => rules.register_per_ip,
            RateDimension::MagicPerEmail => rules.magic_per_email,
        }
    }
}

/// Sliding-window limiter over the session store's counter primitive: a
/// fast store counts with atomic increment + TTL, the in-process fallback
/// keeps per-key timestamp lists.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn SessionStore>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    /// Count one hit and fail with `rate_limited` once the window is full.
    pub async fn check(
        &self,
        rules: &RateRules,
        tenant_slug: &str,
        dimension: RateDimension,
        key: &str,
    ) -> ApiResult<()> {
        let rule = dimension.rule(rules);
        let window_key =
            format!("{tenant_slug}:{}:{key}", dimension.name());
        let count = self
            .store
            .incr_window(&window_key, rule.window_secs)
            .await?;
        if count > rule.limit as u64 {
            log::warn!(
                "Rate limit breached: {window_key} ({count}/{})",
                rule.limit
            );
            return Err(ApiError::RateLimited);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn limiter() -> (RateLimiter, RateRules) {
        let rules = RateRules {
            magic_per_email: RateRule { limit: 2, window_secs: 600 },
            ..RateRules::default()
        };
        (RateLimiter::new(Arc::new(MemoryStore::new())), rules)
    }

    #[tokio::test]
    async fn allows_up_to_the_limit_then_rejects() {
        let (limiter, rules) = limiter();
        for _ in 0..2 {
            limiter
                .check(
                    &rules,
                    "acme",
                    RateDimension::MagicPerEmail,
                    "user@example.com",
                )
                .await
                .unwrap();
        }
        let third = limiter
            .check(
                &rules,
                "acme",
                RateDimension::MagicPerEmail,
                "user@example.com",
            )
            .await;
        assert!(matches!(third, Err(ApiError::RateLimited)));
    }

    #[tokio::test]
    async fn keys_are_isolated_per_tenant_and_subject() {
        let (limiter, rules) = limiter();
        for _ in 0..2 {
            limiter
                .check(
                    &rules,
                    "acme",
                    RateDimension::MagicPerEmail,
                    "user@example.com",
                )
                .await
                .unwrap();
        }
        // a different tenant and a different email are unaffected
        limiter
            .check(
                &rules,
                "other",
                RateDimension::MagicPerEmail,
                "user@example.com",
            )
            .await
            .unwrap();
        limiter
            .check(
                &rules,
                "acme",
                RateDimension::MagicPerEmail,
                "second@example.com",
            )
            .await
            .unwrap();
    }
}
