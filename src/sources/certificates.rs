use std::collections::BTreeMap;
use std::future::Future;

use anyhow::Result;
use reqwest::Client;

use crate::sources::http::send_json;

/// Well-known cache key of the service account certificate bundle.
pub const PUBLIC_CERTIFICATES_KEY: &str = "cloud.Info Public Certificates";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    pub key_name: String,
    /// PEM-encoded certificate
    pub data: Vec<u8>,
}

/// Fetches the public certificates of a service account.
pub trait FetchCertificates: Send + Sync {
    fn fetch_certificates(&self) -> impl Future<Output = Result<Vec<Certificate>>> + Send;
}

/// Reads the x509 bundle published for a service account: a JSON object of
/// key id to PEM certificate.
#[derive(Debug, Clone)]
pub struct CertificateFetcher {
    client: Client,
    url: String,
}

impl CertificateFetcher {
    pub fn new(client: Client, base_url: &str, service_account: &str) -> Self {
        let url = format!("{}/{}", base_url.trim_end_matches('/'), service_account);
        Self { client, url }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl FetchCertificates for CertificateFetcher {
    async fn fetch_certificates(&self) -> Result<Vec<Certificate>> {
        let cert_map: BTreeMap<String, String> = send_json(self.client.get(&self.url), &self.url).await?;

        // BTreeMap iteration keeps the bundle sorted by key name.
        Ok(cert_map
            .into_iter()
            .map(|(key_name, data)| Certificate { key_name, data: data.into_bytes() })
            .collect())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::resilience::transient::is_transient;
    use crate::sources::http::build_client;
    use httpmock::Method::GET;
    use httpmock::MockServer;
    use serde_json::json;

    const ACCOUNT: &str = "robot@example.iam.gserviceaccount.com";

    fn fetcher(server: &MockServer) -> CertificateFetcher {
        CertificateFetcher::new(build_client().unwrap(), &server.url("/robot/v1/metadata/x509/"), ACCOUNT)
    }

    #[tokio::test]
    async fn certificates_are_sorted_by_key_name() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path(format!("/robot/v1/metadata/x509/{ACCOUNT}"));
                then.status(200).json_body(json!({
                    "zz-key": "-----BEGIN CERTIFICATE-----\nzz\n-----END CERTIFICATE-----\n",
                    "aa-key": "-----BEGIN CERTIFICATE-----\naa\n-----END CERTIFICATE-----\n"
                }));
            })
            .await;

        let certs = fetcher(&server).fetch_certificates().await.unwrap();
        let names: Vec<_> = certs.iter().map(|c| c.key_name.as_str()).collect();
        assert_eq!(names, vec!["aa-key", "zz-key"]);
        assert!(String::from_utf8_lossy(&certs[0].data).contains("aa"));
    }

    #[tokio::test]
    async fn non_success_status_is_transient() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET);
                then.status(502);
            })
            .await;

        let err = fetcher(&server).fetch_certificates().await.unwrap_err();
        assert!(is_transient(&err));
    }

    #[tokio::test]
    async fn missing_bundle_is_transient() {
        let server = MockServer::start_async().await;
        let fetcher = fetcher(&server);
        assert_eq!(fetcher.url(), server.url(format!("/robot/v1/metadata/x509/{ACCOUNT}")));
        server
            .mock_async(|when, then| {
                when.method(GET);
                then.status(404).body("not found");
            })
            .await;

        let err = fetcher.fetch_certificates().await.unwrap_err();
        assert!(is_transient(&err));
        assert!(err.to_string().contains("404"));
    }

    #[tokio::test]
    async fn undecodable_body_is_permanent() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET);
                then.status(200).body("not json");
            })
            .await;

        let err = fetcher(&server).fetch_certificates().await.unwrap_err();
        assert!(!is_transient(&err));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_transient() {
        let fetcher = CertificateFetcher::new(build_client().unwrap(), "http://127.0.0.1:1/x509", ACCOUNT);
        let err = fetcher.fetch_certificates().await.unwrap_err();
        assert!(is_transient(&err));
        assert!(err.to_string().contains("could not send request"));
    }
}
