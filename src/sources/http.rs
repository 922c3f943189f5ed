use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::resilience::transient::{status_error, transient};

const HTTP_TIMEOUT_SECONDS: u64 = 10;

pub fn build_client() -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(HTTP_TIMEOUT_SECONDS))
        .user_agent(format!("token-cache/{}", env!("CARGO_PKG_VERSION")))
        .build()
        .context("could not build HTTP client")
}

/// Sends `request` and decodes a JSON body.
///
/// Connection failures, retryable statuses and interrupted bodies are tagged
/// transient; an undecodable body is permanent.
pub async fn send_json<T: DeserializeOwned>(request: RequestBuilder, url: &str) -> Result<T> {
    let response = request
        .send()
        .await
        .map_err(transient)
        .with_context(|| format!("could not send request to {url}"))?;

    let status = response.status();
    debug!(url, %status, "received response");
    if !status.is_success() {
        return Err(status_error(status, url));
    }

    let body = response
        .bytes()
        .await
        .map_err(transient)
        .context("could not read HTTP response body")?;

    serde_json::from_slice(&body).context("could not decode HTTP response body")
}
