use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

/// OIDC discovery document returned from
/// `/a/{tenant}/.well-known/openid-configuration`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct OidcDiscoveryDocument {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub userinfo_endpoint: String,
    pub revocation_endpoint: String,
    pub introspection_endpoint: String,
    pub jwks_uri: String,
    pub response_types_supported: Vec<String>,
    pub subject_types_supported: Vec<String>,
    pub id_token_signing_alg_values_supported: Vec<String>,
    pub scopes_supported: Vec<String>,
    pub grant_types_supported: Vec<String>,
    pub token_endpoint_auth_methods_supported: Vec<String>,
    pub code_challenge_methods_supported: Vec<String>,
}

/// JWKS response returned from `/a/{tenant}/.well-known/jwks.json`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct JwksResponse {
    pub keys: Vec<PublicJwk>,
}

/// A single public RSA JSON Web Key.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PublicJwk {
    /// JWK key type; always "RSA" here
    pub kty: String,
    /// Intended algorithm ("RS256")
    pub alg: String,
    /// Key id: SHA-256 JWK thumbprint
    pub kid: String,
    /// Key usage: "sig"
    #[serde(rename = "use")]
    pub use_: String,
    /// Base64url modulus
    pub n: String,
    /// Base64url public exponent
    pub e: String,
}

/// Form body of `POST /a/{tenant}/oauth/token`.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenRequest {
    pub grant_type: String,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub code_verifier: Option<String>,
    pub refresh_token: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

impl std::fmt::Debug for TokenRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let secret = self.client_secret.as_ref().map(|_| "[REDACTED]");
        let refresh_token = self.refresh_token.as_ref().map(|_| "[REDACTED]");
        f.debug_struct("TokenRequest")
            .field("grant_type", &self.grant_type)
            .field("code", &self.code)
            .field("redirect_uri", &self.redirect_uri)
            .field("refresh_token", &refresh_token)
            .field("client_id", &self.client_id)
            .field("client_secret", &secret)
            .finish()
    }
}

/// Success body of the token endpoint.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenResponse {
    pub token_type: String, // always "Bearer"
    pub access_token: String,
    pub expires_in: i64,
    pub id_token: String,
    pub refresh_token: String,
    pub scope: String,
}

impl std::fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenResponse")
            .field("token_type", &self.token_type)
            .field("access_token", &"[REDACTED]")
            .field("expires_in", &self.expires_in)
            .field("id_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("scope", &self.scope)
            .finish()
    }
}

/// OIDC error body (`{error, error_description}`).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct OidcErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

/// Claims signed into access tokens (RS256, 1 hour).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessClaims {
    pub iss: String,
    pub sub: String,
    pub aud: String,
    pub exp: i64,
    pub iat: i64,
    pub scope: String,
    /// Session id backing this token
    pub sid: String,
}

impl AccessClaims {
    pub fn new(
        issuer: String,
        subject: String,
        audience: String,
        scope: String,
        session_id: String,
        lifetime: Duration,
    ) -> Self {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        Self {
            iss: issuer,
            sub: subject,
            aud: audience,
            exp: now + lifetime.whole_seconds(),
            iat: now,
            scope,
            sid: session_id,
        }
    }
}

/// Claims signed into ID tokens (RS256, 1 hour). Carries the `/authorize`
/// nonce when one was supplied and the time of the interactive login.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct IdClaims {
    pub iss: String,
    pub sub: String,
    pub aud: String,
    pub exp: i64,
    pub iat: i64,
    pub auth_time: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Claims for the short-lived SSE handoff token delivered with
/// `loginComplete` (2 minutes, binds user, client and pending request).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct HandoffClaims {
    pub iss: String,
    pub sub: String,
    pub aud: String,
    pub exp: i64,
    pub iat: i64,
    pub rid: String,
}

/// RFC 7662 introspection response.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntrospectionResponse {
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
}

impl IntrospectionResponse {
    pub fn inactive() -> Self {
        Self {
            active: false,
            scope: None,
            client_id: None,
            sub: None,
            exp: None,
            token_type: None,
        }
    }
}

/// Userinfo response; fields beyond `sub` follow the granted scope.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserinfoResponse {
    pub sub: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}
