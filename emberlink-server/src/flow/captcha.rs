use emberlink_types::CaptchaProvider;
use serde::Deserialize;

use crate::{
    crypto,
    error::{ApiError, ApiResult},
    state::AppState,
};

/// How long a captcha response token is remembered for replay detection.
const REPLAY_TTL_SECS: u64 = 5 * 60;

const TURNSTILE_VERIFY_URL: &str =
    "https://challenges.cloudflare.com/turnstile/v0/siteverify";
const HCAPTCHA_VERIFY_URL: &str = "https://api.hcaptcha.com/siteverify";

#[derive(Deserialize)]
struct VerifyResponse {
    success: bool,
    #[serde(default)]
    score: Option<f64>,
}

/// Verify a captcha response token against its provider. Tokens are hashed
/// into a short-TTL seen set first, so a captured token cannot be replayed
/// within its verification window.
pub async fn verify(
    state: &AppState,
    provider: CaptchaProvider,
    secret: Option<&str>,
    min_score: Option<f64>,
    token: &str,
) -> ApiResult<bool> {
    if token.is_empty() {
        return Ok(false);
    }

    let replay_key = crypto::sha256_hex(token.as_bytes());
    let first_sighting = state
        .session_store
        .mark_seen_once(&format!("captcha:{replay_key}"), REPLAY_TTL_SECS)
        .await?;
    if !first_sighting {
        log::warn!("captcha token replay detected");
        return Ok(false);
    }

    let verify_url = match provider {
        CaptchaProvider::Mock => return Ok(true),
        CaptchaProvider::Turnstile => TURNSTILE_VERIFY_URL,
        CaptchaProvider::Hcaptcha => HCAPTCHA_VERIFY_URL,
    };

    let secret = secret.ok_or_else(|| {
        ApiError::Internal("captcha node missing provider secret".into())
    })?;

    let response: VerifyResponse = state
        .http_client
        .post(verify_url)
        .form(&[("secret", secret), ("response", token)])
        .send()
        .await?
        .json()
        .await?;

    if !response.success {
        return Ok(false);
    }
    if let (Some(min), Some(score)) = (min_score, response.score) {
        return Ok(score >= min);
    }
    Ok(true)
}
