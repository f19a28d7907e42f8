//! CLOB L2 request authentication (HMAC-SHA256 over timestamp, method, path and body).

use anyhow::{anyhow, Context, Result};
use base64::{
    engine::general_purpose::{STANDARD as BASE64, URL_SAFE as BASE64_URL_SAFE},
    Engine,
};
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// API credentials issued by the CLOB for one wallet.
#[derive(Clone)]
pub struct ApiCredentials {
    pub api_key: String,
    pub api_secret: String,
    pub passphrase: String,
}

impl std::fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiCredentials")
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .field("passphrase", &"<redacted>")
            .finish()
    }
}

impl ApiCredentials {
    pub fn new(api_key: &str, api_secret: &str, passphrase: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            api_secret: api_secret.to_string(),
            passphrase: passphrase.to_string(),
        }
    }

    /// Sign `{timestamp}{method}{path}{body}` with the base64-decoded secret.
    pub fn sign(&self, timestamp: &str, method: &str, path: &str, body: &str) -> Result<String> {
        let secret = BASE64_URL_SAFE
            .decode(&self.api_secret)
            .or_else(|_| BASE64.decode(&self.api_secret))
            .context("API secret is not valid base64")?;

        let mut mac = HmacSha256::new_from_slice(&secret).map_err(|e| anyhow!("HMAC init failed: {}", e))?;
        mac.update(format!("{timestamp}{method}{path}{body}").as_bytes());

        Ok(BASE64_URL_SAFE.encode(mac.finalize().into_bytes()))
    }

    /// Build the `POLY_*` headers for an authenticated request.
    pub fn l2_headers(
        &self,
        address: &str,
        timestamp: i64,
        method: &str,
        path: &str,
        body: &str,
    ) -> Result<HeaderMap> {
        let timestamp = timestamp.to_string();
        let signature = self.sign(&timestamp, method, path, body)?;

        let mut headers = HeaderMap::new();
        for (name, value) in [
            ("poly_address", address),
            ("poly_signature", signature.as_str()),
            ("poly_timestamp", timestamp.as_str()),
            ("poly_api_key", self.api_key.as_str()),
            ("poly_passphrase", self.passphrase.as_str()),
        ] {
            headers.insert(
                HeaderName::from_static(name),
                HeaderValue::from_str(value).with_context(|| format!("Invalid header value for {}", name))?,
            );
        }

        Ok(headers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds() -> ApiCredentials {
        ApiCredentials::new("key", &BASE64.encode(b"test-secret-key-1234"), "pass")
    }

    #[test]
    fn test_sign_is_deterministic_base64() {
        let a = creds().sign("1700000000", "POST", "/order", "{}").unwrap();
        let b = creds().sign("1700000000", "POST", "/order", "{}").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 44);
        assert!(BASE64_URL_SAFE.decode(&a).is_ok());

        let c = creds().sign("1700000001", "POST", "/order", "{}").unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn test_bad_secret() {
        let creds = ApiCredentials::new("key", "not base64 !!", "pass");
        assert!(creds.sign("1", "GET", "/", "").is_err());
    }

    #[test]
    fn test_headers_and_redaction() {
        let headers = creds()
            .l2_headers("0xabc", 1700000000, "POST", "/order", "")
            .unwrap();
        assert_eq!(headers.len(), 5);
        assert_eq!(headers.get("poly_api_key").unwrap(), "key");
        assert_eq!(headers.get("poly_timestamp").unwrap(), "1700000000");

        let debug = format!("{:?}", creds());
        assert!(!debug.contains("pass\""));
        assert!(debug.contains("<redacted>"));
    }
}
