//! Google service account session shared by the Drive and Sheets clients.
//!
//! A session is acquired once at process start: a signed RS256 assertion is exchanged at the
//! key's `token_uri` for a bearer token that lives for the rest of the run. Jobs finish well
//! inside the token lifetime, so there is no refresh.

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::config::ServiceAccountKey;
use crate::error::StoreError;

pub const SCOPES: [&str; 2] = [
    "https://www.googleapis.com/auth/drive",
    "https://www.googleapis.com/auth/spreadsheets",
];

const TOKEN_LIFETIME_SECS: i64 = 3600;

#[derive(Debug, Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: String,
    aud: &'a str,
    exp: i64,
    iat: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

pub struct GoogleSession {
    http: reqwest::Client,
    access_token: String,
}

impl GoogleSession {
    pub async fn connect(key: &ServiceAccountKey) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("occupancy-alerts/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;

        let assertion = sign_assertion(key, chrono::Utc::now().timestamp())?;
        let params = [
            ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
            ("assertion", assertion.as_str()),
        ];

        let response = http
            .post(&key.token_uri)
            .form(&params)
            .send()
            .await
            .context("failed to exchange service account assertion")?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("OAuth token exchange failed: {}", error_text);
        }

        let token: TokenResponse = response
            .json()
            .await
            .context("failed to parse OAuth token response")?;

        tracing::debug!(client_email = %key.client_email, "google session established");
        Ok(Self {
            http,
            access_token: token.access_token,
        })
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn get(&self, url: reqwest::Url) -> reqwest::RequestBuilder {
        self.http.get(url).bearer_auth(&self.access_token)
    }

    pub fn post(&self, url: reqwest::Url) -> reqwest::RequestBuilder {
        self.http.post(url).bearer_auth(&self.access_token)
    }

    pub fn put(&self, url: reqwest::Url) -> reqwest::RequestBuilder {
        self.http.put(url).bearer_auth(&self.access_token)
    }
}

/// `base` with `segments` appended, each percent-encoded as a single path segment.
pub fn api_url(base: &str, segments: &[&str]) -> Result<reqwest::Url, StoreError> {
    let mut url =
        reqwest::Url::parse(base).map_err(|err| StoreError::InvalidUrl(err.to_string()))?;
    url.path_segments_mut()
        .map_err(|()| StoreError::InvalidUrl(base.to_string()))?
        .extend(segments);
    Ok(url)
}

fn sign_assertion(key: &ServiceAccountKey, now: i64) -> anyhow::Result<String> {
    use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};

    let claims = Claims {
        iss: &key.client_email,
        scope: SCOPES.join(" "),
        aud: &key.token_uri,
        exp: now + TOKEN_LIFETIME_SECS,
        iat: now,
    };

    let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
        .context("failed to parse service account private key")?;

    encode(&Header::new(Algorithm::RS256), &claims, &encoding_key)
        .context("failed to sign service account assertion")
}
