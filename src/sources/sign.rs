use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::header::AUTHORIZATION;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::sources::http::send_json;
use crate::sources::token_source::TokenSource;
use crate::sources::MintToken;

/// Scope required by the IAM signBlob call.
pub const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SignBlobRequest {
    bytes_to_sign: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignBlobResponse {
    key_id: String,
    signature: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedBlob {
    pub key_name: String,
    pub signature: Vec<u8>,
}

/// Signs bytes with the service account's system-managed key through IAM.
///
/// Requires the service account to be allowed to act as itself.
#[derive(Debug, Clone)]
pub struct BlobSigner {
    client: Client,
    url: String,
}

impl BlobSigner {
    pub fn new(client: Client, iam_url: &str, service_account: &str) -> Self {
        let url = format!(
            "{}/projects/-/serviceAccounts/{}:signBlob",
            iam_url.trim_end_matches('/'),
            service_account
        );
        Self { client, url }
    }

    /// Signs `bytes` using a `cloud-platform` token from `tokens`. Failures are
    /// annotated and returned as is.
    pub async fn sign_bytes<M: MintToken>(&self, tokens: &TokenSource<M>, bytes: &[u8]) -> Result<SignedBlob> {
        let token = tokens.token().await.context("could not get IAM client")?;

        let request = self
            .client
            .post(&self.url)
            .header(AUTHORIZATION, token.authorization())
            .json(&SignBlobRequest { bytes_to_sign: STANDARD.encode(bytes) });

        let response: SignBlobResponse = send_json(request, &self.url).await.context("SignBlob RPC failed")?;
        let signature = STANDARD
            .decode(response.signature.as_bytes())
            .context("SignBlob returned a signature that is not base64")?;

        debug!(key_id = %response.key_id, "signed {} bytes", bytes.len());
        Ok(SignedBlob { key_name: response.key_id, signature })
    }
}
