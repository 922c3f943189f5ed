use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use chrono::{Duration, Utc};

use crate::cache::refresh::RefreshPolicy;
use crate::cache::token::Token;
use crate::helpers::jitter::FixedJitter;
use crate::helpers::time::{Clock, ManualClock};
use crate::sources::token_source::{TokenCache, TokenSource};
use crate::sources::MintToken;

/// Floor of 2 minutes, jitter window of 3 minutes.
pub fn policy() -> RefreshPolicy {
    RefreshPolicy::new(Duration::minutes(2), Duration::minutes(3))
}

/// Minter handing out `token-<n>` tokens that live for a fixed duration.
#[derive(Debug)]
pub struct CountingMinter {
    clock: Arc<ManualClock>,
    lifetime: Duration,
    delay: Option<std::time::Duration>,
    mints: AtomicUsize,
    failure: Mutex<Option<String>>,
    last_scopes: Mutex<Vec<String>>,
}

impl CountingMinter {
    pub fn new(clock: Arc<ManualClock>, lifetime: Duration) -> Self {
        Self {
            clock,
            lifetime,
            delay: None,
            mints: AtomicUsize::new(0),
            failure: Mutex::new(None),
            last_scopes: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: std::time::Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn mints(&self) -> usize {
        self.mints.load(Ordering::SeqCst)
    }

    pub fn fail_next(&self, message: &str) {
        *self.failure.lock().unwrap() = Some(message.to_owned());
    }

    pub fn last_scopes(&self) -> Vec<String> {
        self.last_scopes.lock().unwrap().clone()
    }
}

impl MintToken for CountingMinter {
    async fn mint(&self, scopes: &[String]) -> Result<Token> {
        let n = self.mints.fetch_add(1, Ordering::SeqCst) + 1;
        *self.last_scopes.lock().unwrap() = scopes.to_vec();
        let failure = self.failure.lock().unwrap().take();

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = failure {
            bail!(message);
        }
        Ok(Token::new(format!("token-{n}"), self.clock.now() + self.lifetime))
    }
}

pub struct Fixture {
    pub clock: Arc<ManualClock>,
    pub minter: Arc<CountingMinter>,
    pub cache: TokenCache,
}

impl Fixture {
    pub fn new(lifetime: Duration) -> Self {
        Self::with_minter(|clock| CountingMinter::new(clock, lifetime))
    }

    pub fn with_minter(build: impl FnOnce(Arc<ManualClock>) -> CountingMinter) -> Self {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let minter = Arc::new(build(clock.clone()));
        let cache = TokenCache::with_clock("tokens", 64, clock.clone());
        Self { clock, minter, cache }
    }

    /// Source for `scopes` whose jitter draw is always `draw`.
    pub fn source(&self, scopes: &[&str], draw: Duration) -> TokenSource<CountingMinter> {
        TokenSource::new(
            self.cache.clone(),
            scopes.iter().copied(),
            self.minter.clone(),
            policy(),
            Arc::new(FixedJitter(draw)),
        )
        .unwrap()
    }
}
