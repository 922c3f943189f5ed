use anyhow::{bail, Result};
use chrono::{DateTime, Duration, Utc};

use crate::cache::token::Token;
use crate::helpers::jitter::JitterSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Further from expiry than the jitter window.
    Fresh,
    /// Inside the jitter window; refreshed by callers selected at random.
    NearExpiry,
    Expired,
}

/// When a cached token must be refreshed and how a minted one is admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshPolicy {
    /// Tokens are never served within this margin of their real expiry.
    pub min_lifetime: Duration,
    pub jitter_window: Duration,
}

impl RefreshPolicy {
    pub fn new(min_lifetime: Duration, jitter_window: Duration) -> Self {
        Self { min_lifetime, jitter_window }
    }

    pub fn freshness(&self, now: DateTime<Utc>, expires_at: DateTime<Utc>) -> Freshness {
        let remaining = expires_at - now;
        if remaining <= Duration::zero() {
            Freshness::Expired
        } else if remaining > self.jitter_window {
            Freshness::Fresh
        } else {
            Freshness::NearExpiry
        }
    }

    /// Decides whether this caller refreshes a token expiring at `expires_at`.
    ///
    /// Near expiry each caller draws its own offset inside the window, so
    /// refreshes spread out instead of every holder firing at once.
    pub fn should_refresh(
        &self,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        jitter: &dyn JitterSource,
    ) -> bool {
        match self.freshness(now, expires_at) {
            Freshness::Fresh => false,
            Freshness::Expired => true,
            // a draw past chrono's range lands after any expiry
            Freshness::NearExpiry => now
                .checked_add_signed(jitter.draw(self.jitter_window))
                .map_or(true, |at| at > expires_at),
        }
    }

    /// Admits a freshly minted token into the cache.
    ///
    /// The returned token expires `min_lifetime` earlier than the minted one and
    /// the returned duration is its cache TTL. Tokens that do not outlive the
    /// floor are rejected.
    pub fn admit(&self, mut token: Token, now: DateTime<Utc>) -> Result<(Token, Duration)> {
        let remaining = token.remaining(now);
        if remaining <= Duration::zero() {
            bail!("retrieved expired access token ({} < {})", token.expires_at, now);
        }
        if remaining <= self.min_lifetime {
            bail!(
                "retrieved access token expiring too soon ({}s left, minimum is {}s)",
                remaining.num_seconds(),
                self.min_lifetime.num_seconds()
            );
        }
        token.expires_at -= self.min_lifetime;
        Ok((token, remaining - self.min_lifetime))
    }
}
