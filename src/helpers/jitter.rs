use std::fmt;

use chrono::Duration;
use rand::Rng;

/// Draws the random offset used to spread refreshes over the jitter window.
pub trait JitterSource: Send + Sync + fmt::Debug {
    /// Returns a duration in `[0, window)`; zero for an empty window.
    fn draw(&self, window: Duration) -> Duration;
}

/// Uniform draw backed by the thread-local RNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomJitter;

impl JitterSource for RandomJitter {
    fn draw(&self, window: Duration) -> Duration {
        let bound = window.num_milliseconds();
        if bound <= 0 {
            return Duration::zero();
        }
        let mut rng = rand::rng();
        Duration::milliseconds(rng.random_range(0..bound))
    }
}

/// Always returns the same offset, clamped into the window.
#[derive(Debug, Clone, Copy)]
pub struct FixedJitter(pub Duration);

impl JitterSource for FixedJitter {
    fn draw(&self, window: Duration) -> Duration {
        if window <= Duration::zero() {
            return Duration::zero();
        }
        self.0.clamp(Duration::zero(), window - Duration::milliseconds(1))
    }
}
