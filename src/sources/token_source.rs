use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::cache::refresh::RefreshPolicy;
use crate::cache::token::Token;
use crate::cache::ttl_cache::TtlCache;
use crate::helpers::jitter::JitterSource;
use crate::helpers::time::Clock;
use crate::sources::scopes::{normalize_scopes, ScopeKey};
use crate::sources::MintToken;

/// Token cache shared by every [`TokenSource`] of the process.
pub type TokenCache = TtlCache<ScopeKey, Token>;

/// Access tokens for one scope set, backed by the shared token cache.
///
/// Cheap to build per request: all durable state lives in the cache. A cached
/// token is served until it gets close to expiry; from then on callers are
/// picked at random to refresh it, and the cache makes sure only one mint per
/// scope set runs at a time.
pub struct TokenSource<M> {
    cache: TokenCache,
    key: ScopeKey,
    scopes: Arc<[String]>,
    minter: Arc<M>,
    policy: RefreshPolicy,
    jitter: Arc<dyn JitterSource>,
}

impl<M> Clone for TokenSource<M> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
            key: self.key.clone(),
            scopes: self.scopes.clone(),
            minter: self.minter.clone(),
            policy: self.policy,
            jitter: self.jitter.clone(),
        }
    }
}

impl<M: MintToken> TokenSource<M> {
    pub fn new<I, S>(
        cache: TokenCache,
        scopes: I,
        minter: Arc<M>,
        policy: RefreshPolicy,
        jitter: Arc<dyn JitterSource>,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let scopes = normalize_scopes(scopes)?;
        let key = ScopeKey::from_scopes(&scopes)?;
        Ok(Self { cache, key, scopes: scopes.into(), minter, policy, jitter })
    }

    pub fn key(&self) -> &ScopeKey {
        &self.key
    }

    fn clock(&self) -> &Arc<dyn Clock> {
        self.cache.clock()
    }

    /// Current token for the bound scopes, minting one if needed.
    pub async fn token(&self) -> Result<Token> {
        let cached = self.cache.get(&self.key);
        if let Some(token) = &cached {
            let now = self.clock().now();
            if !self.policy.should_refresh(now, token.expires_at, self.jitter.as_ref()) {
                return Ok(token.clone());
            }
            debug!(scopes = %self.key, expires_at = %token.expires_at, "selected to refresh access token");
        }

        // Whoever refreshed since our read already replaced the token we saw.
        let seen = cached.map(|token| token.expires_at);
        let minter = self.minter.clone();
        let scopes = self.scopes.clone();
        let clock = self.clock().clone();
        let policy = self.policy;
        let key = self.key.clone();

        self.cache
            .get_or_create_if(
                self.key.clone(),
                |current| seen.map_or(true, |seen| current.expires_at > seen),
                || async move {
                    let token = minter.mint(&scopes).await?;
                    let (token, ttl) = policy.admit(token, clock.now())?;
                    info!(scopes = %key, expires_at = %token.expires_at, "minted access token");
                    Ok((token, ttl))
                },
            )
            .await
            .context("failed to mint new access token")
    }
}
