use serde::Deserialize;
use std::collections::HashMap;

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable `{0}`")]
    MissingVar(String),

    #[error("Invalid value for `{name}`: {reason}")]
    InvalidVar { name: String, reason: String },

    #[error("`{0}` must be at least 32 characters")]
    SecretTooShort(String),

    #[error("PUBLIC_BASE_URL must be https in production, got `{0}`")]
    InsecureBaseUrl(String),

    #[error("Failed to parse RATE_LIMIT_OVERRIDES: {0}")]
    BadRateLimitOverrides(#[source] serde_json::Error),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    pub fn is_production(self) -> bool {
        self == Environment::Production
    }
}

/// One rate-limit rule: at most `limit` hits per `window_secs` per key.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
pub struct RateRule {
    pub limit: u32,
    pub window_secs: u64,
}

/// The built-in rules of the token, registration and magic-link endpoints.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct RateRules {
    pub token_per_ip: RateRule,
    pub token_per_client: RateRule,
    pub register_per_ip: RateRule,
    pub magic_per_email: RateRule,
}

impl Default for RateRules {
    fn default() -> Self {
        Self {
            token_per_ip: RateRule { limit: 60, window_secs: 60 },
            token_per_client: RateRule { limit: 120, window_secs: 60 },
            register_per_ip: RateRule { limit: 10, window_secs: 3600 },
            magic_per_email: RateRule { limit: 5, window_secs: 600 },
        }
    }
}

/// `RATE_LIMIT_OVERRIDES` JSON blob: optional replacement defaults plus
/// per-tenant-slug overrides.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct RateLimitOverrides {
    #[serde(default)]
    pub default: Option<RateRules>,
    #[serde(default)]
    pub tenants: HashMap<String, RateRules>,
    /// Per-client override of the token-endpoint rule, keyed by client id.
    #[serde(default)]
    pub clients: HashMap<String, RateRule>,
}

#[derive(Clone, Debug)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub from: String,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Public scheme+host serving the provider; tenant issuers are
    /// `{public_base_url}/a/{slug}`.
    pub public_base_url: String,
    pub database_url: String,
    /// Redis-compatible fast store; in-process fallback when absent.
    pub fast_store_url: Option<String>,
    pub encryption_key: String,
    pub session_secret: String,
    pub environment: Environment,
    pub port: u16,
    pub smtp: Option<SmtpConfig>,
    pub rate_limits: RateLimitOverrides,
}

impl ServerConfig {
    pub fn from_env() -> ConfigResult<Self> {
        let public_base_url = require("PUBLIC_BASE_URL")?;
        let database_url = require("DATABASE_URL")?;
        let encryption_key = require("ENCRYPTION_KEY")?;
        let session_secret = require("SESSION_SECRET")?;

        if encryption_key.len() < 32 {
            return Err(ConfigError::SecretTooShort("ENCRYPTION_KEY".into()));
        }
        if session_secret.len() < 32 {
            return Err(ConfigError::SecretTooShort("SESSION_SECRET".into()));
        }

        let environment = match std::env::var("ENVIRONMENT").as_deref() {
            Ok("production") => Environment::Production,
            _ => Environment::Development,
        };

        let public_base_url = public_base_url.trim_end_matches('/').to_string();
        if environment.is_production()
            && !public_base_url.starts_with("https://")
        {
            return Err(ConfigError::InsecureBaseUrl(public_base_url));
        }

        let port = match std::env::var("PORT") {
            Ok(raw) => raw.parse::<u16>().map_err(|e| {
                ConfigError::InvalidVar {
                    name: "PORT".into(),
                    reason: e.to_string(),
                }
            })?,
            Err(_) => 7100,
        };

        let fast_store_url = std::env::var("FAST_STORE_URL").ok();

        let smtp = match std::env::var("SMTP_HOST") {
            Ok(host) => {
                let port = std::env::var("SMTP_PORT")
                    .ok()
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(587);
                let from = std::env::var("SMTP_FROM")
                    .unwrap_or_else(|_| "login@localhost".into());
                Some(SmtpConfig { host, port, from })
            }
            Err(_) => None,
        };

        let rate_limits = match std::env::var("RATE_LIMIT_OVERRIDES") {
            Ok(raw) => serde_json::from_str(&raw)
                .map_err(ConfigError::BadRateLimitOverrides)?,
            Err(_) => RateLimitOverrides::default(),
        };

        Ok(Self {
            public_base_url,
            database_url,
            fast_store_url,
            encryption_key,
            session_secret,
            environment,
            port,
            smtp,
            rate_limits,
        })
    }

    /// Canonical issuer URL for a tenant.
    pub fn issuer_for(&self, slug: &str) -> String {
        format!("{}/a/{}", self.public_base_url, slug)
    }

    /// Effective rate rules for a tenant slug.
    pub fn rate_rules_for(&self, slug: &str) -> RateRules {
        if let Some(rules) = self.rate_limits.tenants.get(slug) {
            return rules.clone();
        }
        self.rate_limits
            .default
            .clone()
            .unwrap_or_default()
    }

    /// Tenant rules with the token-per-client rule swapped for a per-client
    /// override when one is configured.
    pub fn rate_rules_for_client(
        &self,
        slug: &str,
        client_id: &str,
    ) -> RateRules {
        let mut rules = self.rate_rules_for(slug);
        if let Some(rule) = self.rate_limits.clients.get(client_id) {
            rules.token_per_client = *rule;
        }
        rules
    }
}

fn require(name: &str) -> ConfigResult<String> {
    let value = std::env::var(name)
        .map_err(|_| ConfigError::MissingVar(name.to_string()))?;
    let value = value.trim().to_string();
    if value.is_empty() {
        return Err(ConfigError::MissingVar(name.to_string()));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issuer_is_tenant_rooted() {
        let config = test_config("https://id.example.com");
        assert_eq!(config.issuer_for("acme"), "https://id.example.com/a/acme");
    }

    #[test]
    fn tenant_rate_override_wins() {
        let mut config = test_config("https://id.example.com");
        config.rate_limits.tenants.insert(
            "acme".into(),
            RateRules {
                token_per_ip: RateRule { limit: 5, window_secs: 60 },
                ..RateRules::default()
            },
        );
        assert_eq!(config.rate_rules_for("acme").token_per_ip.limit, 5);
        assert_eq!(config.rate_rules_for("other").token_per_ip.limit, 60);
    }

    #[test]
    fn overrides_blob_parses() {
        let raw = r#"{
            "default": {
                "token_per_ip": {"limit": 10, "window_secs": 30},
                "token_per_client": {"limit": 20, "window_secs": 30},
                "register_per_ip": {"limit": 2, "window_secs": 3600},
                "magic_per_email": {"limit": 1, "window_secs": 600}
            },
            "tenants": {}
        }"#;
        let parsed: RateLimitOverrides = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.default.unwrap().token_per_ip.limit, 10);
    }

    fn test_config(base: &str) -> ServerConfig {
        ServerConfig {
            public_base_url: base.to_string(),
            database_url: "postgres://localhost/emberlink".into(),
            fast_store_url: None,
            encryption_key: "0123456789abcdef0123456789abcdef".into(),
            session_secret: "fedcba9876543210fedcba9876543210".into(),
            environment: Environment::Development,
            port: 7100,
            smtp: None,
            rate_limits: RateLimitOverrides::default(),
        }
    }
}
