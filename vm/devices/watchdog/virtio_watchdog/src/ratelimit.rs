// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Rate limiting for guest-triggerable log events.
//!
//! The guest controls how often malformed requests and rejected config
//! writes happen, so events about them are limited per window of virtual
//! time. Suppressed events are counted and reported with the next event
//! that gets through.

use crate::vmtime::VmTime;
use std::time::Duration;

const PERIOD: Duration = Duration::from_secs(5);
const EVENTS_PER_PERIOD: u32 = 10;

/// The event should not be logged.
#[derive(Debug)]
pub(crate) struct RateLimited;

#[derive(Debug)]
pub(crate) struct GuestEventLimiter {
    period: Duration,
    events_per_period: u32,
    start: Option<VmTime>,
    events: u32,
    missed: u64,
}

impl GuestEventLimiter {
    pub fn new() -> Self {
        Self::with_limits(PERIOD, EVENTS_PER_PERIOD)
    }

    pub fn with_limits(period: Duration, events_per_period: u32) -> Self {
        Self {
            period,
            events_per_period,
            start: None,
            events: 0,
            missed: 0,
        }
    }

    /// Returns `Ok(missed_events)` if an event at `now` should be logged.
    ///
    /// `missed_events` is `Some(n)` if earlier events were dropped, or if
    /// this is the last event before limiting kicks in.
    pub fn event(&mut self, now: VmTime) -> Result<Option<u64>, RateLimited> {
        let start = self.start.get_or_insert(now);
        if now.saturating_duration_since(*start) > self.period {
            *start = now;
            self.events = 0;
        }
        if self.events >= self.events_per_period {
            self.missed += 1;
            return Err(RateLimited);
        }
        self.events += 1;
        let missed = std::mem::take(&mut self.missed);
        Ok((missed != 0 || self.events == self.events_per_period).then_some(missed))
    }
}

/// As [`tracing::warn!`], but limited by a [`GuestEventLimiter`] on virtual
/// time.
macro_rules! warn_guest_ratelimited {
    ($limiter:expr, $now:expr, $($rest:tt)*) => {
        if let Ok(missed_events) = $limiter.event($now) {
            tracing::warn!(dropped_ratelimited = missed_events, $($rest)*);
        }
    };
}

pub(crate) use warn_guest_ratelimited;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits_within_period() {
        let mut limiter = GuestEventLimiter::with_limits(Duration::from_secs(1), 2);
        let t0 = VmTime::from_nanos(0);
        assert_eq!(limiter.event(t0).unwrap(), None);
        assert_eq!(limiter.event(t0).unwrap(), Some(0));
        assert!(limiter.event(t0).is_err());
        assert!(limiter.event(t0).is_err());

        let t1 = t0.saturating_add(Duration::from_millis(1500));
        assert_eq!(limiter.event(t1).unwrap(), Some(2));
        assert_eq!(limiter.event(t1).unwrap(), Some(0));
    }
}
