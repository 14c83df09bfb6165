// Copyright (c) 2019 Emmanuel Gil Peyrot <linkmauve@linkmauve.fr>
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Delays between reconnection attempts.
//!
//! A [`ReconnectionStrategy`] is a stateless function of the attempt
//! counter and the error which ended the previous connection (or the
//! previous attempt). The session owns the counter and resets it once a
//! connection is established again.
//!
//! ```
//! use std::time::Duration;
//! use xmpp_session::reconnect::{always_after, truncated_exponential, when, is_system_shutdown};
//!
//! let strategy = when(
//!     is_system_shutdown,
//!     always_after(Duration::from_secs(90)),
//!     truncated_exponential(Duration::from_secs(5), 6),
//! );
//! # let _ = strategy;
//! ```

use core::fmt;
use std::sync::Arc;
use std::time::Duration;

use rand::{thread_rng, Rng};

use crate::Error;

/// Computes the delay before the next reconnection attempt.
pub trait ReconnectionStrategy: Send + Sync + fmt::Debug {
    /// `attempt` starts at 0 for the first attempt after a connection loss.
    fn next_delay(&self, attempt: u32, cause: Option<&Error>) -> Duration;
}

impl<S: ReconnectionStrategy + ?Sized> ReconnectionStrategy for Arc<S> {
    fn next_delay(&self, attempt: u32, cause: Option<&Error>) -> Duration {
        (**self).next_delay(attempt, cause)
    }
}

impl<S: ReconnectionStrategy + ?Sized> ReconnectionStrategy for Box<S> {
    fn next_delay(&self, attempt: u32, cause: Option<&Error>) -> Duration {
        (**self).next_delay(attempt, cause)
    }
}

fn uniform(min: Duration, max: Duration) -> Duration {
    if min >= max {
        return min;
    }
    thread_rng().gen_range(min..max)
}

/// Random delay below `base * (2^(n+1) - 1)`, where `n` is the attempt
/// number capped at `max_attempts`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TruncatedBinaryExponentialBackoff {
    base: Duration,
    max_attempts: u32,
}

impl TruncatedBinaryExponentialBackoff {
    /// Creates a backoff growing from `base` for `max_attempts` steps.
    pub fn new(base: Duration, max_attempts: u32) -> Self {
        TruncatedBinaryExponentialBackoff { base, max_attempts }
    }

    /// The exclusive upper bound of the delay for `attempt`.
    pub fn upper_bound(&self, attempt: u32) -> Duration {
        // Saturate instead of overflowing on silly step counts.
        let exponent = attempt.min(self.max_attempts).min(30) + 1;
        let factor = (1u32 << exponent) - 1;
        self.base.saturating_mul(factor)
    }
}

impl ReconnectionStrategy for TruncatedBinaryExponentialBackoff {
    fn next_delay(&self, attempt: u32, _cause: Option<&Error>) -> Duration {
        uniform(Duration::ZERO, self.upper_bound(attempt))
    }
}

/// Always waits for the same duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedDelay(pub Duration);

impl ReconnectionStrategy for FixedDelay {
    fn next_delay(&self, _attempt: u32, _cause: Option<&Error>) -> Duration {
        self.0
    }
}

/// Waits for a random duration in `[min, max)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RandomDelay {
    min: Duration,
    max: Duration,
}

impl ReconnectionStrategy for RandomDelay {
    fn next_delay(&self, _attempt: u32, _cause: Option<&Error>) -> Duration {
        uniform(self.min, self.max)
    }
}

/// Picks one of two strategies depending on the cause of the disconnection.
pub struct Conditional {
    predicate: Box<dyn Fn(&Error) -> bool + Send + Sync>,
    matched: Box<dyn ReconnectionStrategy>,
    otherwise: Box<dyn ReconnectionStrategy>,
}

impl fmt::Debug for Conditional {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conditional")
            .field("matched", &self.matched)
            .field("otherwise", &self.otherwise)
            .finish_non_exhaustive()
    }
}

impl ReconnectionStrategy for Conditional {
    fn next_delay(&self, attempt: u32, cause: Option<&Error>) -> Duration {
        match cause {
            Some(cause) if (self.predicate)(cause) => self.matched.next_delay(attempt, Some(cause)),
            _ => self.otherwise.next_delay(attempt, cause),
        }
    }
}

/// Truncated binary exponential backoff from `base`, growing for
/// `max_attempts` steps.
pub fn truncated_exponential(base: Duration, max_attempts: u32) -> TruncatedBinaryExponentialBackoff {
    TruncatedBinaryExponentialBackoff::new(base, max_attempts)
}

/// Always wait for `delay`.
pub fn always_after(delay: Duration) -> FixedDelay {
    FixedDelay(delay)
}

/// Always wait for a random duration in `[min, max)`.
pub fn always_randomly_after(min: Duration, max: Duration) -> RandomDelay {
    RandomDelay { min, max }
}

/// Use `matched` when `predicate` holds for the cause, `otherwise` else.
pub fn when<P, A, B>(predicate: P, matched: A, otherwise: B) -> Conditional
where
    P: Fn(&Error) -> bool + Send + Sync + 'static,
    A: ReconnectionStrategy + 'static,
    B: ReconnectionStrategy + 'static,
{
    Conditional {
        predicate: Box::new(predicate),
        matched: Box::new(matched),
        otherwise: Box::new(otherwise),
    }
}

/// Matches a `<system-shutdown/>` stream error.
pub fn is_system_shutdown(error: &Error) -> bool {
    matches!(error, Error::Stream(e) if e.is_system_shutdown())
}

/// Exponential backoff from 60 seconds over 4 steps, except after a server
/// shutdown where everybody reconnects at once: then a random delay
/// between one and two minutes spreads the load.
pub fn default_strategy() -> Conditional {
    when(
        is_system_shutdown,
        always_randomly_after(Duration::from_secs(60), Duration::from_secs(120)),
        truncated_exponential(Duration::from_secs(60), 4),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream_error::{DefinedCondition, StreamError};

    const TRIALS: usize = 200;

    #[test]
    fn exponential_bounds_grow_then_cap() {
        let strategy = truncated_exponential(Duration::from_secs(60), 4);
        let bounds = [60, 180, 420, 900, 1860];
        for (attempt, bound) in bounds.iter().enumerate() {
            assert_eq!(
                strategy.upper_bound(attempt as u32),
                Duration::from_secs(*bound)
            );
            for _ in 0..TRIALS {
                assert!(strategy.next_delay(attempt as u32, None) < Duration::from_secs(*bound));
            }
        }
        for attempt in [5, 10, 1000, u32::MAX] {
            assert_eq!(strategy.upper_bound(attempt), Duration::from_secs(1860));
            for _ in 0..TRIALS {
                assert!(strategy.next_delay(attempt, None) < Duration::from_secs(1860));
            }
        }
    }

    #[test]
    fn fixed_delay_ignores_attempt() {
        let strategy = always_after(Duration::from_millis(1500));
        for attempt in 0..100 {
            assert_eq!(
                strategy.next_delay(attempt, None),
                Duration::from_millis(1500)
            );
        }
    }

    #[test]
    fn random_delay_stays_in_range() {
        let min = Duration::from_secs(10);
        let max = Duration::from_secs(20);
        let strategy = always_randomly_after(min, max);
        for attempt in 0..TRIALS as u32 {
            let delay = strategy.next_delay(attempt, None);
            assert!(delay >= min && delay < max, "{:?}", delay);
        }
        let degenerate = always_randomly_after(max, max);
        assert_eq!(degenerate.next_delay(0, None), max);
    }

    #[test]
    fn conditional_selects_fallback_on_shutdown() {
        let strategy = when(
            is_system_shutdown,
            always_after(Duration::from_secs(7)),
            always_after(Duration::from_secs(1)),
        );
        let shutdown = Error::Stream(StreamError::new(DefinedCondition::SystemShutdown));
        let other = Error::Stream(StreamError::new(DefinedCondition::Conflict));
        for attempt in 0..=6 {
            assert_eq!(
                strategy.next_delay(attempt, Some(&shutdown)),
                Duration::from_secs(7)
            );
            assert_eq!(
                strategy.next_delay(attempt, Some(&other)),
                Duration::from_secs(1)
            );
            assert_eq!(strategy.next_delay(attempt, None), Duration::from_secs(1));
        }
    }

    #[test]
    fn default_strategy_spreads_shutdown_reconnects() {
        let strategy = default_strategy();
        let shutdown = Error::Stream(StreamError::new(DefinedCondition::SystemShutdown));
        for attempt in 0..=6 {
            let delay = strategy.next_delay(attempt, Some(&shutdown));
            assert!(delay >= Duration::from_secs(60) && delay < Duration::from_secs(120));
        }
        assert!(strategy.next_delay(0, Some(&Error::Disconnected)) < Duration::from_secs(60));
    }
}
