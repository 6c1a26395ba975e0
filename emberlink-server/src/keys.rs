use emberlink_types::{JwkKey, JwksResponse, KeyStatus, PublicJwk, audit};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::Serialize;
use serde_json::Value;
use time::{Duration, OffsetDateTime};

use crate::{
    crypto::{self, PrivateJwkDoc},
    db::DbPool,
    error::{ApiError, ApiResult},
    queries,
    tenant::TenantScope,
};

/// Grace window during which a retired key stays in the published JWKS, so
/// every token signed in the last seven days keeps verifying.
pub const RETIRED_GRACE_DAYS: i64 = 7;

/// The active signing key of a tenant, unsealed and ready to sign.
pub struct TenantSigner {
    pub kid: String,
    encoding_key: EncodingKey,
}

impl TenantSigner {
    pub fn sign<T: Serialize>(&self, claims: &T) -> ApiResult<String> {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(self.kid.clone());
        jsonwebtoken::encode(&header, claims, &self.encoding_key)
            .map_err(|e| ApiError::Internal(format!("jwt encode: {e}")))
    }
}

/// Make sure the tenant can sign: rotate once if no active key exists.
pub async fn ensure_active(
    pool: &DbPool,
    scope: &TenantScope,
    master_secret: &str,
) -> ApiResult<JwkKey> {
    if let Some(key) = queries::jwk_keys::get_active(pool, scope).await? {
        return Ok(key);
    }
    rotate(pool, scope, master_secret).await
}

/// Mint a new RSA-2048 key as staged, promote it to active, and retire the
/// previous active key with a seven-day JWKS grace window.
pub async fn rotate(
    pool: &DbPool,
    scope: &TenantScope,
    master_secret: &str,
) -> ApiResult<JwkKey> {
    // keygen is CPU-bound; keep it off the async workers
    let generated = tokio::task::spawn_blocking(crypto::generate_rsa_key)
        .await
        .map_err(|e| ApiError::Internal(format!("keygen task: {e}")))??;

    let sealed = crypto::seal_json(&generated.private_doc, master_secret)?;
    let pub_jwk: Value = serde_json::to_value(&generated.public_jwk)
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let previous = queries::jwk_keys::get_active(pool, scope).await?;

    let staged = queries::jwk_keys::insert(
        pool,
        scope,
        queries::jwk_keys::NewKeyRow {
            kid: &generated.kid,
            pub_jwk: &pub_jwk,
            priv_jwk_enc: &sealed,
            status: KeyStatus::Staged,
        },
    )
    .await?;

    queries::jwk_keys::set_status(
        pool,
        scope,
        staged.id,
        KeyStatus::Active,
        None,
    )
    .await?;

    if let Some(previous) = previous {
        let not_after =
            OffsetDateTime::now_utc() + Duration::days(RETIRED_GRACE_DAYS);
        queries::jwk_keys::set_status(
            pool,
            scope,
            previous.id,
            KeyStatus::Retired,
            Some(not_after),
        )
        .await?;
    }

    queries::audit::insert(
        pool,
        scope.id(),
        None,
        audit::actions::JWKS_ROTATE,
        None,
        None,
    )
    .await?;
    log::info!("Rotated signing key for tenant {}: {}", scope.slug(), staged.kid);

    queries::jwk_keys::get_active(pool, scope)
        .await?
        .ok_or_else(|| ApiError::Internal("rotation lost the active key".into()))
}

/// Keys served at `/.well-known/jwks.json`.
pub async fn public_jwks(
    pool: &DbPool,
    scope: &TenantScope,
) -> ApiResult<JwksResponse> {
    let keys = queries::jwk_keys::get_published(pool, scope).await?;
    let keys = keys
        .iter()
        .map(|k| {
            serde_json::from_value::<PublicJwk>(k.pub_jwk.clone()).map_err(
                |e| ApiError::Internal(format!("stored jwk malformed: {e}")),
            )
        })
        .collect::<ApiResult<Vec<_>>>()?;
    Ok(JwksResponse { keys })
}

/// Unseal the active private key into a signer; rotates first when the
/// tenant has no active key yet.
pub async fn active_signer(
    pool: &DbPool,
    scope: &TenantScope,
    master_secret: &str,
) -> ApiResult<TenantSigner> {
    let key = ensure_active(pool, scope, master_secret).await?;
    let doc: PrivateJwkDoc =
        crypto::unseal_json(&key.priv_jwk_enc, master_secret)?;
    let encoding_key = EncodingKey::from_rsa_pem(doc.pem.as_bytes())
        .map_err(|e| ApiError::Internal(format!("private key parse: {e}")))?;
    Ok(TenantSigner { kid: key.kid, encoding_key })
}

/// Verify an RS256 token issued by this tenant: resolve the header `kid`
/// against the published keys, then decode with the expected issuer.
pub async fn verify_tenant_token<T: serde::de::DeserializeOwned>(
    pool: &DbPool,
    scope: &TenantScope,
    token: &str,
    issuer: &str,
) -> ApiResult<T> {
    let header = jsonwebtoken::decode_header(token)
        .map_err(|_| ApiError::InvalidGrant("malformed token".into()))?;
    let kid = header
        .kid
        .ok_or_else(|| ApiError::InvalidGrant("token missing kid".into()))?;

    let key = queries::jwk_keys::get_by_kid(pool, scope, &kid)
        .await?
        .filter(|k| k.is_published(OffsetDateTime::now_utc()))
        .ok_or_else(|| ApiError::InvalidGrant("unknown signing key".into()))?;

    let jwk: PublicJwk = serde_json::from_value(key.pub_jwk)
        .map_err(|e| ApiError::Internal(format!("stored jwk malformed: {e}")))?;
    let decoding_key = DecodingKey::from_rsa_components(&jwk.n, &jwk.e)
        .map_err(|e| ApiError::Internal(format!("jwk decode: {e}")))?;

    let mut validation = Validation::new(Algorithm::RS256);
    validation.set_issuer(&[issuer]);
    validation.validate_aud = false;

    let data = jsonwebtoken::decode::<T>(token, &decoding_key, &validation)
        .map_err(|_| ApiError::InvalidGrant("token verification failed".into()))?;
    Ok(data.claims)
}
