//! Request signing for private Kraken REST endpoints.
//!
//! The signature scheme is `HMAC-SHA512(secret, path || SHA256(nonce || body))`
//! where `secret` is the base64-decoded API secret, base64-encoded into the
//! `API-Sign` header next to `API-Key`.
//!
//! The secret is held as a [`SecretString`] and never appears in `Debug`
//! output or logs.

use crate::error::{KrakenError, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256, Sha512};

type HmacSha512 = Hmac<Sha512>;

/// API key pair for private endpoints.
pub struct KrakenCredentials {
    api_key: String,
    api_secret: SecretString,
}

impl std::fmt::Debug for KrakenCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KrakenCredentials")
            .field("api_key", &self.api_key)
            .field("api_secret", &"[REDACTED]")
            .finish()
    }
}

impl KrakenCredentials {
    /// Creates credentials from an API key and base64-encoded secret.
    #[must_use]
    pub fn new(api_key: impl Into<String>, api_secret: SecretString) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret,
        }
    }

    /// Reads `KRAKEN_API_KEY` / `KRAKEN_API_SECRET` from the environment.
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming the missing variable.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("KRAKEN_API_KEY").map_err(|_| {
            KrakenError::Configuration("missing environment variable: KRAKEN_API_KEY".to_string())
        })?;
        let api_secret = std::env::var("KRAKEN_API_SECRET").map_err(|_| {
            KrakenError::Configuration(
                "missing environment variable: KRAKEN_API_SECRET".to_string(),
            )
        })?;
        Ok(Self::new(api_key, SecretString::from(api_secret)))
    }

    /// The API key sent in the `API-Key` header.
    #[must_use]
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Computes the `API-Sign` header value for a private request.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the secret is not valid base64.
    pub fn sign(&self, path: &str, nonce: &str, body: &str) -> Result<String> {
        let secret = BASE64
            .decode(self.api_secret.expose_secret())
            .map_err(|e| KrakenError::Configuration(format!("invalid API secret: {e}")))?;

        let mut sha = Sha256::new();
        sha.update(nonce.as_bytes());
        sha.update(body.as_bytes());
        let digest = sha.finalize();

        let mut mac = HmacSha512::new_from_slice(&secret)
            .map_err(|e| KrakenError::Configuration(format!("invalid secret length: {e}")))?;
        mac.update(path.as_bytes());
        mac.update(&digest);

        Ok(BASE64.encode(mac.finalize().into_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Key, nonce, body and signature from Kraken's published signing example.
    const DOC_SECRET: &str =
        "kQH5HW/8p1uGOVjbgWA7FunAmGO8lsSUXNsu3eow76sz84Q18fWxnyRzBHCd3pd5nE9qa99HAZtuZuj6F1huXg==";

    #[test]
    fn matches_documented_signature_vector() {
        let creds = KrakenCredentials::new("key", SecretString::from(DOC_SECRET.to_string()));
        let body = "nonce=1616492376594&ordertype=limit&pair=XBTUSD&price=37500&type=buy&volume=1.25";
        let signature = creds
            .sign("/0/private/AddOrder", "1616492376594", body)
            .unwrap();
        assert_eq!(
            signature,
            "4/dpxb3iT4tp/ZCVEwSnEsLxx0bqyhLpdfOpc6fn7OR8+UClSV5n9E6aSS8MPtnRfp32bAb0nmbRn6H8ndwLUQ=="
        );
    }

    #[test]
    fn signature_is_deterministic() {
        let creds = KrakenCredentials::new("key", SecretString::from(DOC_SECRET.to_string()));
        let first = creds.sign("/0/private/Balance", "1", "nonce=1").unwrap();
        let second = creds.sign("/0/private/Balance", "1", "nonce=1").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn different_paths_sign_differently() {
        let creds = KrakenCredentials::new("key", SecretString::from(DOC_SECRET.to_string()));
        let a = creds.sign("/0/private/Balance", "1", "nonce=1").unwrap();
        let b = creds.sign("/0/private/OpenOrders", "1", "nonce=1").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn invalid_base64_secret_is_a_configuration_error() {
        let creds = KrakenCredentials::new("key", SecretString::from("not-base64!".to_string()));
        let err = creds.sign("/0/private/Balance", "1", "nonce=1").unwrap_err();
        assert!(matches!(err, KrakenError::Configuration(_)));
    }

    #[test]
    fn debug_redacts_the_secret() {
        let creds = KrakenCredentials::new("key", SecretString::from(DOC_SECRET.to_string()));
        let debug = format!("{creds:?}");
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains(DOC_SECRET));
    }
}
