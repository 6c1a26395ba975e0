use serde::{Deserialize, Serialize};

use crate::ops::RequestInfo;

/// Request-derived signals available to flow nodes as `context.signals`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Signals {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub device: Device,
    pub geo_country: Option<String>,
    pub risk_score: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Device {
    pub os: String,
    pub browser: String,
}

/// Coarse user-agent parse; enough for flow routing, not fingerprinting.
pub fn parse_device(user_agent: Option<&str>) -> Device {
    let Some(ua) = user_agent else {
        return Device { os: "unknown".into(), browser: "unknown".into() };
    };

    let os = if ua.contains("Android") {
        "android"
    } else if ua.contains("iPhone") || ua.contains("iPad") {
        "ios"
    } else if ua.contains("Windows") {
        "windows"
    } else if ua.contains("Mac OS X") || ua.contains("Macintosh") {
        "macos"
    } else if ua.contains("Linux") {
        "linux"
    } else {
        "unknown"
    };

    // order matters: Edge and Chrome both carry "Chrome", Safari is the
    // catch-all token everyone else includes
    let browser = if ua.contains("Edg/") {
        "edge"
    } else if ua.contains("Firefox/") {
        "firefox"
    } else if ua.contains("Chrome/") {
        "chrome"
    } else if ua.contains("Safari/") {
        "safari"
    } else {
        "unknown"
    };

    Device { os: os.into(), browser: browser.into() }
}

/// Heuristic risk score in [0, 1]: opaque clients and missing geo raise it.
pub fn risk_score(info: &RequestInfo, device: &Device) -> f64 {
    let mut score: f64 = 0.0;
    if info.user_agent.is_none() {
        score += 0.4;
    }
    if device.os == "unknown" && device.browser == "unknown" {
        score += 0.2;
    }
    if info.geo_country.is_none() {
        score += 0.2;
    }
    if info.ip.is_none() {
        score += 0.2;
    }
    score.min(1.0)
}

pub fn read(info: &RequestInfo) -> Signals {
    let device = parse_device(info.user_agent.as_deref());
    let risk_score = risk_score(info, &device);
    Signals {
        ip: info.ip.clone(),
        user_agent: info.user_agent.clone(),
        device,
        geo_country: info.geo_country.clone(),
        risk_score,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHROME_MAC: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
         AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

    #[test]
    fn parses_common_user_agents() {
        let device = parse_device(Some(CHROME_MAC));
        assert_eq!(device.os, "macos");
        assert_eq!(device.browser, "chrome");

        let edge = parse_device(Some(
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
             (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36 Edg/124.0.0.0",
        ));
        assert_eq!(edge.os, "windows");
        assert_eq!(edge.browser, "edge");
    }

    #[test]
    fn missing_everything_scores_high() {
        let info = RequestInfo { ip: None, user_agent: None, geo_country: None };
        let device = parse_device(None);
        assert!(risk_score(&info, &device) >= 0.8);
    }

    #[test]
    fn complete_request_scores_zero() {
        let info = RequestInfo {
            ip: Some("203.0.113.7".into()),
            user_agent: Some(CHROME_MAC.into()),
            geo_country: Some("DE".into()),
        };
        let device = parse_device(info.user_agent.as_deref());
        assert_eq!(risk_score(&info, &device), 0.0);
    }
}
