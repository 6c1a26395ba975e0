use async_trait::async_trait;

use crate::{config::SmtpConfig, error::ApiResult};

/// Delivery of enchanted links and one-time codes. Transport is an external
/// collaborator; the provider only depends on this interface.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_magic_link(&self, to: &str, link: &str) -> ApiResult<()>;
    async fn send_code(&self, to: &str, code: &str) -> ApiResult<()>;
}

/// Development mailer: the link lands in the log (and the magic endpoint
/// echoes it as `debug_link` outside production).
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send_magic_link(&self, to: &str, link: &str) -> ApiResult<()> {
        log::info!("magic link for {to}: {link}");
        Ok(())
    }

    async fn send_code(&self, to: &str, code: &str) -> ApiResult<()> {
        log::info!("one-time code for {to}: {code}");
        Ok(())
    }
}

/// Placeholder for a real SMTP relay; holds the configuration and records
/// where delivery would go. The actual transport lives outside the core.
pub struct SmtpMailer {
    config: SmtpConfig,
}

impl SmtpMailer {
    pub fn new(config: SmtpConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send_magic_link(&self, to: &str, link: &str) -> ApiResult<()> {
        log::info!(
            "relaying magic link to {to} via {}:{} from {} ({} bytes)",
            self.config.host,
            self.config.port,
            self.config.from,
            link.len()
        );
        Ok(())
    }

    async fn send_code(&self, to: &str, _code: &str) -> ApiResult<()> {
        log::info!(
            "relaying one-time code to {to} via {}:{}",
            self.config.host,
            self.config.port
        );
        Ok(())
    }
}
