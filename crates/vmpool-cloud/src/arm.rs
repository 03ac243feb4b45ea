//! Shared plumbing for Azure Resource Manager REST calls.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::Method;
use serde_json::Value;
use tracing::debug;

use crate::auth::TokenCredential;

pub(crate) const MANAGEMENT_BASE: &str = "https://management.azure.com";
const MANAGEMENT_SCOPE: &str = "https://management.azure.com/.default";
const OPERATION_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Authorized JSON client for the management plane.
pub(crate) struct ArmClient {
    http: reqwest::Client,
    credential: Arc<TokenCredential>,
}

impl ArmClient {
    pub fn new(credential: Arc<TokenCredential>) -> Self {
        Self {
            http: reqwest::Client::new(),
            credential,
        }
    }

    pub async fn get(&self, url: &str) -> Result<Value> {
        let response = self.send(Method::GET, url, None).await?;
        response
            .json()
            .await
            .with_context(|| format!("GET {url}: response was not JSON"))
    }

    pub async fn send(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
    ) -> Result<reqwest::Response> {
        let token = self.credential.token(MANAGEMENT_SCOPE).await?;
        let mut request = self.http.request(method.clone(), url).bearer_auth(token);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("{method} {url}"))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            bail!("{method} {url} returned {status}: {detail}");
        }
        Ok(response)
    }

    /// Poll a long-running operation to completion via its
    /// `Azure-AsyncOperation` header. Responses without the header are
    /// already complete. Cancellation arrives by dropping this future.
    pub async fn wait_for_operation(&self, response: reqwest::Response) -> Result<()> {
        let Some(status_url) = response
            .headers()
            .get("azure-asyncoperation")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
        else {
            return Ok(());
        };

        loop {
            tokio::time::sleep(OPERATION_POLL_INTERVAL).await;
            let body = self.get(&status_url).await?;
            match body["status"].as_str().unwrap_or("InProgress") {
                "InProgress" => {
                    debug!(url = %status_url, "operation still in progress");
                }
                "Succeeded" => return Ok(()),
                other => bail!("long-running operation ended as {other}"),
            }
        }
    }
}
