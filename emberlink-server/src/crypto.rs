use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit, Payload},
};
use argon2::{
    Argon2, PasswordHasher, PasswordVerifier,
    password_hash::{PasswordHash, SaltString, rand_core::OsRng as HashRng},
};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::{RngCore, rngs::OsRng};
use rsa::{
    RsaPrivateKey,
    pkcs1::EncodeRsaPrivateKey,
    pkcs8::LineEnding,
    traits::{PrivateKeyParts, PublicKeyParts},
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub type CryptoResult<T> = std::result::Result<T, CryptoError>;

#[derive(thiserror::Error, Debug)]
pub enum CryptoError {
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    #[error("Sealed payload is malformed")]
    MalformedSealed,

    #[error("Decryption failed")]
    DecryptionFailed,

    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Password hashing failed: {0}")]
    PasswordHash(String),

    #[error("Serialization failed: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Mint an opaque token: `n` random bytes, base64url without padding.
/// 16 bytes for rids, 24 for magic/refresh/resume tokens and auth codes.
pub fn mint_token(n: usize) -> String {
    let mut bytes = vec![0u8; n];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

pub fn sha256_b64u(data: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(data))
}

pub fn sha256_hex(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

// ---------------------------------------------------------------------------
// PKCE

pub const PKCE_VERIFIER_MIN: usize = 43;
pub const PKCE_VERIFIER_MAX: usize = 128;

/// Verify a PKCE verifier against the challenge recorded at `/authorize`.
pub fn verify_pkce(verifier: &str, challenge: &str, method: &str) -> bool {
    if verifier.len() < PKCE_VERIFIER_MIN || verifier.len() > PKCE_VERIFIER_MAX
    {
        return false;
    }
    match method {
        "S256" => sha256_b64u(verifier.as_bytes()) == challenge,
        "plain" => verifier == challenge,
        _ => false,
    }
}

/// Generate an S256 pair for upstream provider requests: a 43-char verifier
/// (32 random bytes, base64url) and its derived challenge.
pub fn generate_pkce_pair() -> (String, String) {
    let verifier = mint_token(32);
    let challenge = sha256_b64u(verifier.as_bytes());
    (verifier, challenge)
}

// ---------------------------------------------------------------------------
// RSA signing keys

/// Freshly generated tenant signing key material. The private document is
/// what gets sealed; it carries both the JWK parameters and a PKCS#1 PEM for
/// the JWT encoder.
#[derive(Clone, Serialize, Deserialize)]
pub struct PrivateJwkDoc {
    pub kty: String,
    pub kid: String,
    pub alg: String,
    pub n: String,
    pub e: String,
    pub d: String,
    pub pem: String,
}

impl std::fmt::Debug for PrivateJwkDoc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivateJwkDoc")
            .field("kty", &self.kty)
            .field("kid", &self.kid)
            .field("alg", &self.alg)
            .field("d", &"[REDACTED]")
            .field("pem", &"[REDACTED]")
            .finish()
    }
}

pub struct GeneratedKey {
    pub kid: String,
    pub public_jwk: emberlink_types::PublicJwk,
    pub private_doc: PrivateJwkDoc,
}

/// Generate an RSA-2048 keypair. `kid` is the RFC 7638 SHA-256 thumbprint of
/// the public JWK.
pub fn generate_rsa_key() -> CryptoResult<GeneratedKey> {
    let private_key = RsaPrivateKey::new(&mut OsRng, 2048)
        .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
    let public_key = private_key.to_public_key();

    let n = URL_SAFE_NO_PAD.encode(public_key.n().to_bytes_be());
    let e = URL_SAFE_NO_PAD.encode(public_key.e().to_bytes_be());
    let kid = jwk_thumbprint(&n, &e);

    let pem = private_key
        .to_pkcs1_pem(LineEnding::LF)
        .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?
        .to_string();
    let d = URL_SAFE_NO_PAD.encode(private_key.d().to_bytes_be());

    Ok(GeneratedKey {
        kid: kid.clone(),
        public_jwk: emberlink_types::PublicJwk {
            kty: "RSA".into(),
            alg: "RS256".into(),
            kid: kid.clone(),
            use_: "sig".into(),
            n: n.clone(),
            e: e.clone(),
        },
        private_doc: PrivateJwkDoc {
            kty: "RSA".into(),
            kid,
            alg: "RS256".into(),
            n,
            e,
            d,
            pem,
        },
    })
}

/// RFC 7638 thumbprint: SHA-256 over the canonical `{"e","kty","n"}` JSON.
pub fn jwk_thumbprint(n: &str, e: &str) -> String {
    let canonical = format!(r#"{{"e":"{e}","kty":"RSA","n":"{n}"}}"#);
    sha256_b64u(canonical.as_bytes())
}

// ---------------------------------------------------------------------------
// Secret sealing (AES-256-GCM)

/// Derive the 32-byte sealing key from the master secret.
fn sealing_key(master_secret: &str) -> [u8; 32] {
    Sha256::digest(master_secret.as_bytes()).into()
}

/// Seal a secret: `v1:gcm:<iv>:<ct>:<tag>` with base64url segments.
pub fn seal(plaintext: &[u8], master_secret: &str) -> CryptoResult<String> {
    let key = sealing_key(master_secret);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));

    let mut iv = [0u8; 12];
    OsRng.fill_bytes(&mut iv);
    let nonce = Nonce::from_slice(&iv);

    // aes-gcm appends the 16-byte tag to the ciphertext
    let sealed = cipher
        .encrypt(nonce, Payload { msg: plaintext, aad: b"" })
        .map_err(|_| CryptoError::EncryptionFailed)?;
    let (ct, tag) = sealed.split_at(sealed.len() - 16);

    Ok(format!(
        "v1:gcm:{}:{}:{}",
        URL_SAFE_NO_PAD.encode(iv),
        URL_SAFE_NO_PAD.encode(ct),
        URL_SAFE_NO_PAD.encode(tag),
    ))
}

/// Open a sealed secret. Any structural or authentication failure is a
/// `DecryptionFailed`; the caller never learns which.
pub fn unseal(sealed: &str, master_secret: &str) -> CryptoResult<Vec<u8>> {
    let parts: Vec<&str> = sealed.split(':').collect();
    let [version, mode, iv_b64, ct_b64, tag_b64] = parts.as_slice() else {
        return Err(CryptoError::MalformedSealed);
    };
    if *version != "v1" || *mode != "gcm" {
        return Err(CryptoError::MalformedSealed);
    }

    let iv = URL_SAFE_NO_PAD
        .decode(iv_b64)
        .map_err(|_| CryptoError::MalformedSealed)?;
    let ct = URL_SAFE_NO_PAD
        .decode(ct_b64)
        .map_err(|_| CryptoError::MalformedSealed)?;
    let tag = URL_SAFE_NO_PAD
        .decode(tag_b64)
        .map_err(|_| CryptoError::MalformedSealed)?;
    if iv.len() != 12 || tag.len() != 16 {
        return Err(CryptoError::MalformedSealed);
    }

    let key = sealing_key(master_secret);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
    let mut combined = ct;
    combined.extend_from_slice(&tag);

    cipher
        .decrypt(Nonce::from_slice(&iv), Payload { msg: &combined, aad: b"" })
        .map_err(|_| CryptoError::DecryptionFailed)
}

pub fn seal_json<T: Serialize>(
    value: &T,
    master_secret: &str,
) -> CryptoResult<String> {
    let plaintext = serde_json::to_vec(value)?;
    seal(&plaintext, master_secret)
}

pub fn unseal_json<T: for<'de> Deserialize<'de>>(
    sealed: &str,
    master_secret: &str,
) -> CryptoResult<T> {
    let plaintext = unseal(sealed, master_secret)?;
    Ok(serde_json::from_slice(&plaintext)?)
}

// ---------------------------------------------------------------------------
// Passwords

pub fn hash_password(password: &str) -> CryptoResult<String> {
    let salt = SaltString::generate(&mut HashRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| CryptoError::PasswordHash(e.to_string()))
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pkce_s256_round_trip() {
        let (verifier, challenge) = generate_pkce_pair();
        assert_eq!(verifier.len(), 43);
        assert!(verify_pkce(&verifier, &challenge, "S256"));
        // any other verifier fails
        let (other, _) = generate_pkce_pair();
        assert!(!verify_pkce(&other, &challenge, "S256"));
    }

    #[test]
    fn pkce_rejects_out_of_range_verifiers() {
        let challenge = sha256_b64u(b"short");
        assert!(!verify_pkce("short", &challenge, "S256"));
        let long = "a".repeat(129);
        assert!(!verify_pkce(&long, &sha256_b64u(long.as_bytes()), "S256"));
    }

    #[test]
    fn pkce_plain_compares_directly() {
        let verifier = "a".repeat(43);
        assert!(verify_pkce(&verifier, &verifier, "plain"));
        assert!(!verify_pkce(&verifier, "something-else", "plain"));
    }

    #[test]
    fn seal_unseal_round_trip() {
        let secret = "0123456789abcdef0123456789abcdef";
        let sealed = seal(b"private key material", secret).unwrap();
        assert!(sealed.starts_with("v1:gcm:"));
        assert_eq!(sealed.split(':').count(), 5);
        let opened = unseal(&sealed, secret).unwrap();
        assert_eq!(opened, b"private key material");
    }

    #[test]
    fn unseal_rejects_tampered_ciphertext() {
        let secret = "0123456789abcdef0123456789abcdef";
        let sealed = seal(b"payload", secret).unwrap();
        let mut parts: Vec<String> =
            sealed.split(':').map(String::from).collect();
        // flip the tag segment
        parts[4] = URL_SAFE_NO_PAD.encode([0u8; 16]);
        let tampered = parts.join(":");
        assert!(matches!(
            unseal(&tampered, secret),
            Err(CryptoError::DecryptionFailed)
        ));
    }

    #[test]
    fn unseal_rejects_wrong_master_secret() {
        let sealed =
            seal(b"payload", "0123456789abcdef0123456789abcdef").unwrap();
        assert!(unseal(&sealed, "fedcba9876543210fedcba9876543210").is_err());
    }

    #[test]
    fn thumbprint_is_deterministic() {
        let a = jwk_thumbprint("some-modulus", "AQAB");
        let b = jwk_thumbprint("some-modulus", "AQAB");
        let c = jwk_thumbprint("other-modulus", "AQAB");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn minted_tokens_are_url_safe() {
        let rid = mint_token(16);
        let token = mint_token(24);
        assert_eq!(rid.len(), 22);
        assert_eq!(token.len(), 32);
        assert!(!token.contains('+') && !token.contains('/'));
    }

    #[test]
    fn password_hash_verifies() {
        let hash = hash_password("hunter2").unwrap();
        assert!(verify_password("hunter2", &hash));
        assert!(!verify_password("hunter3", &hash));
    }
}
