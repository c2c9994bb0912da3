// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Virtual time and one-shot timers.
//!
//! Virtual time only moves when the host advances it, and stops entirely
//! while the VM is paused. Deadlines are therefore stable across a pause,
//! which is what lets a saved timer resume with the same remaining countdown.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

/// A point in virtual time, in nanoseconds since the time base started.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct VmTime(u64);

impl VmTime {
    /// Builds a time from a nanosecond count.
    pub const fn from_nanos(ns: u64) -> Self {
        Self(ns)
    }

    /// The nanosecond count of this time.
    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    /// Returns the time `duration` after `self`, saturating at the end of
    /// representable time.
    pub fn saturating_add(self, duration: Duration) -> Self {
        let ns = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        Self(self.0.saturating_add(ns))
    }

    /// Returns how long after `earlier` this time is, or zero if it is not
    /// after `earlier`.
    pub fn saturating_duration_since(self, earlier: Self) -> Duration {
        Duration::from_nanos(self.0.saturating_sub(earlier.0))
    }
}

impl fmt::Debug for VmTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}s", self.0 / 1_000_000_000, self.0 % 1_000_000_000)
    }
}

/// A one-shot alarm on the virtual clock.
///
/// Implementations do not call back into the device. Instead the host event
/// loop calls [`WatchdogTimer::poll_expired`] between turns, which keeps the
/// device single-threaded: an expiry can never interleave with request
/// processing, and a cancelled deadline can never be reported afterwards.
pub trait WatchdogTimer: Send {
    /// The current virtual time.
    fn now(&self) -> VmTime;

    /// Arms the alarm for `deadline`, replacing any pending deadline.
    fn set_timeout(&mut self, deadline: VmTime);

    /// Disarms the alarm.
    fn cancel_timeout(&mut self);

    /// The pending deadline, if armed.
    fn deadline(&self) -> Option<VmTime>;

    /// Reports whether the pending deadline has been reached. A reached
    /// deadline is consumed, so each arm is reported at most once.
    fn poll_expired(&mut self) -> bool;
}

#[derive(Debug)]
struct ClockState {
    now: AtomicU64,
    running: AtomicBool,
}

/// A manually advanced virtual clock.
///
/// Clones share the same time base.
#[derive(Debug, Clone)]
pub struct VmTimeSource {
    state: Arc<ClockState>,
}

impl VmTimeSource {
    /// Creates a running clock starting at time zero.
    pub fn new() -> Self {
        Self::starting_at(VmTime::default())
    }

    /// Creates a running clock whose time base starts at `now`.
    ///
    /// A migration destination uses an unrelated time base; saved timers are
    /// restored relative to it, never by absolute timestamp.
    pub fn starting_at(now: VmTime) -> Self {
        Self {
            state: Arc::new(ClockState {
                now: AtomicU64::new(now.as_nanos()),
                running: AtomicBool::new(true),
            }),
        }
    }

    /// The current virtual time.
    pub fn now(&self) -> VmTime {
        VmTime(self.state.now.load(Ordering::Acquire))
    }

    /// Moves time forward by `duration`. Has no effect while paused.
    pub fn advance(&self, duration: Duration) {
        if !self.is_running() {
            tracing::trace!(?duration, "ignoring advance of paused clock");
            return;
        }
        let now = self.now().saturating_add(duration);
        self.state.now.store(now.as_nanos(), Ordering::Release);
    }

    /// Stops time.
    pub fn pause(&self) {
        self.state.running.store(false, Ordering::Release);
    }

    /// Restarts time after [`Self::pause`].
    pub fn resume(&self) {
        self.state.running.store(true, Ordering::Release);
    }

    /// Whether time is currently moving.
    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::Acquire)
    }

    /// Creates a disarmed timer on this clock.
    pub fn new_timer(&self) -> VmTimer {
        VmTimer {
            clock: self.clone(),
            deadline: None,
        }
    }
}

/// A one-shot timer on a [`VmTimeSource`].
#[derive(Debug)]
pub struct VmTimer {
    clock: VmTimeSource,
    deadline: Option<VmTime>,
}

impl WatchdogTimer for VmTimer {
    fn now(&self) -> VmTime {
        self.clock.now()
    }

    fn set_timeout(&mut self, deadline: VmTime) {
        self.deadline = Some(deadline);
    }

    fn cancel_timeout(&mut self) {
        self.deadline = None;
    }

    fn deadline(&self) -> Option<VmTime> {
        self.deadline
    }

    fn poll_expired(&mut self) -> bool {
        match self.deadline {
            Some(deadline) if deadline <= self.clock.now() => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}
