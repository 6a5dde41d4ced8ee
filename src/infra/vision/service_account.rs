// =============================================================================
// SERVICE ACCOUNT AUTHENTICATION
// =============================================================================
//
// OAuth2 for Google Cloud APIs using a service account key (JWT bearer grant).
//
// **Environment Variables:**
// - `GOOGLE_SERVICE_ACCOUNT_KEY` - Path to the service account JSON key file
// - `GOOGLE_SERVICE_ACCOUNT_JSON` - The JSON key content itself

use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;

/// Scope needed for the Cloud Vision API.
pub const CLOUD_VISION_SCOPE: &str = "https://www.googleapis.com/auth/cloud-vision";

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Refresh this long before the token actually expires.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

/// Service account credentials from the JSON key file.
#[derive(Debug, Clone, Deserialize)]
struct ServiceAccountCredentials {
    /// Used as issuer in the JWT.
    client_email: String,
    /// PEM encoded RSA key.
    private_key: String,
    #[serde(default = "default_token_uri")]
    token_uri: String,
}

#[derive(Debug, Serialize)]
struct JwtClaims {
    iss: String,
    scope: String,
    aud: String,
    iat: u64,
    /// Max 1 hour from iat.
    exp: u64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

struct CachedToken {
    token: String,
    expires_at: SystemTime,
}

/// Authenticator that exchanges a signed JWT for an access token and caches it.
pub struct ServiceAccountAuth {
    credentials: ServiceAccountCredentials,
    scope: String,
    client: Client,
    cached_token: Arc<RwLock<Option<CachedToken>>>,
}

impl ServiceAccountAuth {
    pub async fn from_file(path: &str, scope: &str) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let content = tokio::fs::read_to_string(path).await?;
        Self::from_json(&content, scope)
    }

    pub fn from_json(json: &str, scope: &str) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let credentials: ServiceAccountCredentials = serde_json::from_str(json)?;
        Ok(Self {
            credentials,
            scope: scope.to_string(),
            client: Client::new(),
            cached_token: Arc::new(RwLock::new(None)),
        })
    }

    /// Loads credentials from `GOOGLE_SERVICE_ACCOUNT_KEY` or
    /// `GOOGLE_SERVICE_ACCOUNT_JSON`, in that order.
    pub async fn from_env(scope: &str) -> Result<Self, Box<dyn Error + Send + Sync>> {
        if let Ok(path) = std::env::var("GOOGLE_SERVICE_ACCOUNT_KEY") {
            return Self::from_file(&path, scope).await;
        }

        if let Ok(json) = std::env::var("GOOGLE_SERVICE_ACCOUNT_JSON") {
            return Self::from_json(&json, scope);
        }

        Err("Neither GOOGLE_SERVICE_ACCOUNT_KEY nor GOOGLE_SERVICE_ACCOUNT_JSON is set.".into())
    }

    pub fn client_email(&self) -> &str {
        &self.credentials.client_email
    }

    /// Gets a valid access token, refreshing if necessary.
    pub async fn get_access_token(&self) -> Result<String, Box<dyn Error + Send + Sync>> {
        {
            let cached = self.cached_token.read().await;
            if let Some(token) = cached.as_ref() {
                if token.expires_at > SystemTime::now() + EXPIRY_MARGIN {
                    return Ok(token.token.clone());
                }
            }
        }

        let fresh = self.fetch_new_token().await?;
        let lifetime = Duration::from_secs(fresh.expires_in.unwrap_or(3600));

        let mut cached = self.cached_token.write().await;
        *cached = Some(CachedToken {
            token: fresh.access_token.clone(),
            expires_at: SystemTime::now() + lifetime,
        });

        Ok(fresh.access_token)
    }

    fn signed_assertion(&self, now: u64) -> Result<String, Box<dyn Error + Send + Sync>> {
        let claims = JwtClaims {
            iss: self.credentials.client_email.clone(),
            scope: self.scope.clone(),
            aud: self.credentials.token_uri.clone(),
            iat: now,
            exp: now + 3600,
        };

        let header = Header::new(Algorithm::RS256);
        let key = EncodingKey::from_rsa_pem(self.credentials.private_key.as_bytes())?;
        Ok(encode(&header, &claims, &key)?)
    }

    async fn fetch_new_token(&self) -> Result<TokenResponse, Box<dyn Error + Send + Sync>> {
        let now = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();
        let jwt = self.signed_assertion(now)?;

        let response = self
            .client
            .post(&self.credentials.token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", &jwt),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await?;
            return Err(format!("Token exchange failed ({}): {}", status, text).into());
        }

        Ok(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_uri_defaults() {
        let auth = ServiceAccountAuth::from_json(
            r#"{"client_email":"moderator@project.iam.gserviceaccount.com","private_key":"not-a-key"}"#,
            CLOUD_VISION_SCOPE,
        )
        .unwrap();

        assert_eq!(auth.client_email(), "moderator@project.iam.gserviceaccount.com");
        assert_eq!(auth.credentials.token_uri, DEFAULT_TOKEN_URI);
        assert_eq!(auth.scope, CLOUD_VISION_SCOPE);
    }

    #[test]
    fn test_invalid_key_is_an_error() {
        let auth = ServiceAccountAuth::from_json(
            r#"{"client_email":"a@b.c","private_key":"not-a-key","token_uri":"https://example.invalid/token"}"#,
            CLOUD_VISION_SCOPE,
        )
        .unwrap();

        assert!(auth.signed_assertion(1_700_000_000).is_err());
    }

    #[test]
    fn test_missing_fields_rejected() {
        assert!(ServiceAccountAuth::from_json(r#"{"private_key":"x"}"#, CLOUD_VISION_SCOPE).is_err());
    }
}
