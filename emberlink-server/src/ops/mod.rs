use axum::http::HeaderMap;

pub mod audit;
pub mod authorize;
pub mod bootstrap;
pub mod login;
pub mod magic;
pub mod register;
pub mod sso;
pub mod tokens;

/// Per-request facts recorded into audit rows and read by flow signals.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestInfo {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub geo_country: Option<String>,
}

impl RequestInfo {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };

        let ip = header("x-forwarded-for")
            .map(|raw| {
                raw.split(',').next().unwrap_or("").trim().to_string()
            })
            .filter(|s| !s.is_empty())
            .or_else(|| header("x-real-ip"));

        let geo_country =
            header("cf-ipcountry").or_else(|| header("x-geo-country"));

        Self { ip, user_agent: header("user-agent"), geo_country }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn forwarded_for_takes_first_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        headers.insert("user-agent", HeaderValue::from_static("curl/8.0"));
        headers.insert("cf-ipcountry", HeaderValue::from_static("DE"));

        let info = RequestInfo::from_headers(&headers);
        assert_eq!(info.ip.as_deref(), Some("203.0.113.7"));
        assert_eq!(info.user_agent.as_deref(), Some("curl/8.0"));
        assert_eq!(info.geo_country.as_deref(), Some("DE"));
    }
}
