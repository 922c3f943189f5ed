use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;

use crate::cache::token::Token;
use crate::helpers::time::{seconds, Clock};
use crate::sources::http::send_json;
use crate::sources::MintToken;

const METADATA_FLAVOR_HEADER: &str = "Metadata-Flavor";
const METADATA_FLAVOR: &str = "Google";

#[derive(Debug, Deserialize)]
struct MetadataTokenResponse {
    access_token: String,
    expires_in: u64,
    #[serde(default)]
    token_type: Option<String>,
}

/// Mints tokens for the default service account through the instance
/// metadata server.
#[derive(Debug, Clone)]
pub struct MetadataMinter {
    client: Client,
    url: String,
    clock: Arc<dyn Clock>,
}

impl MetadataMinter {
    pub fn new(client: Client, url: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self { client, url: url.into(), clock }
    }
}

impl MintToken for MetadataMinter {
    async fn mint(&self, scopes: &[String]) -> Result<Token> {
        let request = self
            .client
            .get(&self.url)
            .header(METADATA_FLAVOR_HEADER, METADATA_FLAVOR)
            .query(&[("scopes", scopes.join(","))]);

        let response: MetadataTokenResponse = send_json(request, &self.url).await?;
        let now = self.clock.now();
        let expires_at = now
            .checked_add_signed(seconds(response.expires_in))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        let mut token = Token::new(response.access_token, expires_at);
        if let Some(token_type) = response.token_type.filter(|t| !t.is_empty()) {
            token.token_type = token_type;
        }
        Ok(token)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::helpers::time::{Clock, ManualClock};
    use crate::resilience::transient::is_transient;
    use crate::sources::http::build_client;
    use chrono::Utc;
    use httpmock::Method::GET;
    use httpmock::MockServer;
    use serde_json::json;

    const TOKEN_PATH: &str = "/computeMetadata/v1/instance/service-accounts/default/token";

    #[tokio::test]
    async fn mints_token_from_metadata_server() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path(TOKEN_PATH)
                    .header("Metadata-Flavor", "Google")
                    .query_param("scopes", "scope-a,scope-b");
                then.status(200)
                    .header("Content-Type", "application/json")
                    .json_body(json!({
                        "access_token": "meta-abc-123",
                        "expires_in": 3599,
                        "token_type": "Bearer"
                    }));
            })
            .await;

        let clock = Arc::new(ManualClock::new(Utc::now()));
        let minter = MetadataMinter::new(build_client().unwrap(), server.url(TOKEN_PATH), clock.clone());
        let token = minter.mint(&["scope-a".to_owned(), "scope-b".to_owned()]).await.unwrap();

        mock.assert_async().await;
        assert_eq!(token.value, "meta-abc-123");
        assert_eq!(token.authorization(), "Bearer meta-abc-123");
        assert_eq!(token.remaining(clock.now()), chrono::Duration::seconds(3599));
    }

    #[tokio::test]
    async fn server_error_is_transient() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path(TOKEN_PATH);
                then.status(503).body("unavailable");
            })
            .await;

        let minter = MetadataMinter::new(build_client().unwrap(), server.url(TOKEN_PATH), Arc::new(ManualClock::new(Utc::now())));
        let err = minter.mint(&["scope".to_owned()]).await.unwrap_err();
        assert!(is_transient(&err));
    }

    #[tokio::test]
    async fn malformed_body_is_permanent() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path(TOKEN_PATH);
                then.status(200).body("{\"token\": 1}");
            })
            .await;

        let minter = MetadataMinter::new(build_client().unwrap(), server.url(TOKEN_PATH), Arc::new(ManualClock::new(Utc::now())));
        let err = minter.mint(&["scope".to_owned()]).await.unwrap_err();
        assert!(!is_transient(&err));
        assert!(err.to_string().contains("could not decode"));
    }
}
