//! Service provider wiring the caches to their remote collaborators.
//!
//! Every dependency is handed in at construction; nothing is looked up from
//! ambient state.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::cache::remote::RemoteResourceCache;
use crate::cache::refresh::RefreshPolicy;
use crate::config::loader::validate_settings;
use crate::config::settings::CacheSettings;
use crate::helpers::jitter::{JitterSource, RandomJitter};
use crate::helpers::time::{Clock, SystemClock};
use crate::resilience::retry::RetrySettings;
use crate::sources::certificates::{Certificate, CertificateFetcher, FetchCertificates, PUBLIC_CERTIFICATES_KEY};
use crate::sources::http::build_client;
use crate::sources::metadata::MetadataMinter;
use crate::sources::sign::{BlobSigner, SignedBlob, CLOUD_PLATFORM_SCOPE};
use crate::sources::token_source::{TokenCache, TokenSource};
use crate::sources::MintToken;

pub struct ServiceProvider<M, C> {
    service_account: String,
    tokens: TokenCache,
    certificates: RemoteResourceCache<Arc<Vec<Certificate>>>,
    minter: Arc<M>,
    fetcher: Arc<C>,
    signer: BlobSigner,
    policy: RefreshPolicy,
    jitter: Arc<dyn JitterSource>,
    retry: RetrySettings,
}

impl ServiceProvider<MetadataMinter, CertificateFetcher> {
    /// Provider talking to the metadata server, the x509 endpoint and IAM.
    pub fn from_settings(settings: &CacheSettings) -> Result<Self> {
        let client = build_client()?;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let endpoints = &settings.endpoints;

        let minter = MetadataMinter::new(client.clone(), endpoints.metadata_token_url.as_str(), clock.clone());
        let fetcher = CertificateFetcher::new(client.clone(), &endpoints.certificates_url, &settings.service_account);
        let signer = BlobSigner::new(client, &endpoints.iam_url, &settings.service_account);

        Self::new(settings, minter, fetcher, signer, clock, Arc::new(RandomJitter))
    }
}

impl<M: MintToken, C: FetchCertificates> ServiceProvider<M, C> {
    pub fn new(
        settings: &CacheSettings,
        minter: M,
        fetcher: C,
        signer: BlobSigner,
        clock: Arc<dyn Clock>,
        jitter: Arc<dyn JitterSource>,
    ) -> Result<Self> {
        validate_settings(settings)?;
        info!(
            service_account = %settings.service_account,
            max_entries = settings.max_entries,
            "initializing service provider"
        );
        Ok(Self {
            service_account: settings.service_account.clone(),
            tokens: TokenCache::with_clock("access_tokens", settings.max_entries, clock.clone()),
            certificates: RemoteResourceCache::new(PUBLIC_CERTIFICATES_KEY, settings.certificates_ttl(), clock),
            minter: Arc::new(minter),
            fetcher: Arc::new(fetcher),
            signer,
            policy: settings.refresh_policy(),
            jitter,
            retry: settings.retry_settings(),
        })
    }

    pub fn service_account(&self) -> &str {
        &self.service_account
    }

    pub fn retry(&self) -> &RetrySettings {
        &self.retry
    }

    /// Token source for `scopes`, sharing this provider's token cache.
    pub fn token_source<I, S>(&self, scopes: I) -> Result<TokenSource<M>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        TokenSource::new(self.tokens.clone(), scopes, self.minter.clone(), self.policy, self.jitter.clone())
    }

    /// Public certificates of the service account, cached for the fixed TTL.
    pub async fn public_certificates(&self) -> Result<Arc<Vec<Certificate>>> {
        let fetcher = self.fetcher.clone();
        self.certificates
            .get_or_fetch(|| async move { fetcher.fetch_certificates().await.map(Arc::new) })
            .await
    }

    /// Like [`Self::public_certificates`], retrying transient outages with the
    /// configured back-off. Each attempt goes through the cache, so a
    /// concurrent success is picked up without another fetch.
    pub async fn public_certificates_with_retry(&self) -> Result<Arc<Vec<Certificate>>> {
        self.retry.run_with_retry(|| self.public_certificates()).await
    }

    pub async fn sign_bytes(&self, bytes: &[u8]) -> Result<SignedBlob> {
        let tokens = self.token_source([CLOUD_PLATFORM_SCOPE]).context("could not get IAM client")?;
        self.signer.sign_bytes(&tokens, bytes).await
    }
}
