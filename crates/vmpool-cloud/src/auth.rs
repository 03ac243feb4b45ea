//! Bearer-token acquisition for Azure resource scopes.
//!
//! Credential chain: an environment client secret (`AZURE_CLIENT_ID` /
//! `AZURE_CLIENT_SECRET`) wins when present, otherwise the IMDS managed
//! identity endpoint is used. Tokens are cached per scope and refreshed
//! five minutes before expiry.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use tokio::sync::Mutex;
use tracing::debug;

const IMDS_TOKEN_URL: &str = "http://169.254.169.254/metadata/identity/oauth2/token";
const REFRESH_MARGIN: Duration = Duration::from_secs(300);

struct CachedToken {
    token: String,
    expires_at: Instant,
}

/// Token source shared by every Azure provider in a process.
pub struct TokenCredential {
    http: reqwest::Client,
    tenant_id: String,
    client_id: Option<String>,
    client_secret: Option<String>,
    cache: Mutex<HashMap<String, CachedToken>>,
}

impl TokenCredential {
    /// Build the chain for a tenant, picking up the optional client secret
    /// from the environment.
    pub fn from_env(tenant_id: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            tenant_id: tenant_id.to_string(),
            client_id: std::env::var("AZURE_CLIENT_ID").ok().filter(|v| !v.is_empty()),
            client_secret: std::env::var("AZURE_CLIENT_SECRET")
                .ok()
                .filter(|v| !v.is_empty()),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// A bearer token for `scope` (e.g. `https://management.azure.com/.default`).
    pub async fn token(&self, scope: &str) -> Result<String> {
        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.get(scope) {
            if cached.expires_at > Instant::now() + REFRESH_MARGIN {
                return Ok(cached.token.clone());
            }
        }

        let (token, expires_in) = match (&self.client_id, &self.client_secret) {
            (Some(id), Some(secret)) => self.client_secret_token(scope, id, secret).await?,
            _ => self.managed_identity_token(scope).await?,
        };

        debug!(scope, expires_in, "acquired access token");
        let expires_at = Instant::now() + Duration::from_secs(expires_in);
        cache.insert(
            scope.to_string(),
            CachedToken {
                token: token.clone(),
                expires_at,
            },
        );
        Ok(token)
    }

    async fn client_secret_token(
        &self,
        scope: &str,
        client_id: &str,
        client_secret: &str,
    ) -> Result<(String, u64)> {
        let url = format!(
            "https://login.microsoftonline.com/{}/oauth2/v2.0/token",
            self.tenant_id
        );
        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", client_id),
            ("client_secret", client_secret),
            ("scope", scope),
        ];

        let response = self
            .http
            .post(&url)
            .form(&params)
            .send()
            .await
            .context("token request failed")?;
        parse_token_response(response).await
    }

    async fn managed_identity_token(&self, scope: &str) -> Result<(String, u64)> {
        let response = self
            .http
            .get(IMDS_TOKEN_URL)
            .header("Metadata", "true")
            .query(&[
                ("api-version", "2018-02-01"),
                ("resource", scope_resource(scope)),
            ])
            .send()
            .await
            .context("managed identity token request failed")?;
        parse_token_response(response).await
    }
}

/// Convert an OAuth scope into the IMDS resource form.
fn scope_resource(scope: &str) -> &str {
    scope.strip_suffix("/.default").unwrap_or(scope)
}

async fn parse_token_response(response: reqwest::Response) -> Result<(String, u64)> {
    let status = response.status();
    let body: serde_json::Value = response
        .json()
        .await
        .context("token response was not JSON")?;

    if !status.is_success() {
        bail!(
            "token endpoint returned {status}: {}",
            body["error_description"]
                .as_str()
                .or(body["error"].as_str())
                .unwrap_or("unknown error")
        );
    }

    let token = body["access_token"]
        .as_str()
        .context("token response missing access_token")?
        .to_string();
    // IMDS reports expires_in as a string, the login endpoint as a number.
    let expires_in = body["expires_in"]
        .as_u64()
        .or_else(|| body["expires_in"].as_str().and_then(|s| s.parse().ok()))
        .unwrap_or(3600);

    Ok((token, expires_in))
}
