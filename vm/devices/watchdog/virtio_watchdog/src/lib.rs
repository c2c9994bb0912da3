// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Virtio watchdog device.
//!
//! The guest arms the watchdog with an ENABLE command on the device's
//! command queue and must then send HEARTBEAT commands more often than the
//! configured timeout. If it stops, the device invokes the host's
//! [`WatchdogPlatform`] recovery hook and, by default, re-arms for another
//! full interval.
//!
//! The device is driven entirely by its host event loop:
//! [`VirtioWatchdogDevice::handle_queue_notify`] when the guest kicks the
//! queue, and [`VirtioWatchdogDevice::poll_timer`] between turns to observe
//! timer expiry. Nothing here blocks or spawns, so the device state needs no
//! locking.
//!
//! [`pci::VirtioWatchdogPci`] binds the device to a PCI function.

#![forbid(unsafe_code)]

pub mod action;
pub mod pci;
pub mod platform;
pub mod queue;
mod ratelimit;
pub mod save_restore;
#[cfg(test)]
mod test_helpers;
pub mod vmtime;

use crate::platform::WatchdogPlatform;
use crate::queue::CommandQueue;
use crate::ratelimit::GuestEventLimiter;
use crate::ratelimit::warn_guest_ratelimited;
use crate::vmtime::VmTime;
use crate::vmtime::WatchdogTimer;
use std::time::Duration;
use thiserror::Error;
use virtio_watchdog_protocol::CONFIG_SPACE_SIZE;
use virtio_watchdog_protocol::TIMEOUT_DEFAULT_SECS;
use virtio_watchdog_protocol::TIMEOUT_MAX_SECS;
use virtio_watchdog_protocol::TIMEOUT_MIN_SECS;
use virtio_watchdog_protocol::VIRTIO_ID_WATCHDOG;
use virtio_watchdog_protocol::WatchdogConfigSpace;
use virtio_watchdog_protocol::WatchdogEvent;
use virtio_watchdog_protocol::WatchdogEventKind;
use zerocopy::FromBytes;
use zerocopy::IntoBytes;

/// Host-supplied construction parameters. Not visible to the guest.
#[derive(Debug, Clone)]
pub struct WatchdogDeviceConfig {
    /// Expiry interval in seconds, within
    /// [`TIMEOUT_MIN_SECS`]`..=`[`TIMEOUT_MAX_SECS`].
    pub timeout_secs: u32,
    /// Width of the device configuration region in bytes. Bytes past the
    /// defined fields read as zero.
    pub config_size: usize,
    /// Whether the guest may change the timeout through the configuration
    /// region. Off by default, so a misbehaving guest cannot stretch its own
    /// deadline.
    pub guest_writable_timeout: bool,
}

impl Default for WatchdogDeviceConfig {
    fn default() -> Self {
        Self {
            timeout_secs: TIMEOUT_DEFAULT_SECS,
            config_size: CONFIG_SPACE_SIZE,
            guest_writable_timeout: false,
        }
    }
}

/// An invalid device configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// The timeout is outside the supported range.
    #[error(
        "'timeout' parameter must be between {min} and {max} seconds, got {timeout}",
        min = TIMEOUT_MIN_SECS,
        max = TIMEOUT_MAX_SECS
    )]
    TimeoutOutOfRange {
        /// The rejected timeout.
        timeout: u32,
    },
    /// The configuration region cannot hold the defined fields.
    #[error(
        "config size {size} is smaller than the {min} bytes of defined fields",
        min = CONFIG_SPACE_SIZE
    )]
    ConfigSizeTooSmall {
        /// The rejected size.
        size: usize,
    },
    /// More interrupt vectors were requested than MSI-X supports.
    #[error("{vectors} interrupt vectors requested, at most {max} supported")]
    TooManyVectors {
        /// The rejected vector count.
        vectors: u32,
        /// The supported maximum.
        max: u32,
    },
}

/// Checks that `timeout_secs` is an acceptable expiry interval.
pub fn validate_timeout(timeout_secs: u32) -> Result<(), ConfigError> {
    if !(TIMEOUT_MIN_SECS..=TIMEOUT_MAX_SECS).contains(&timeout_secs) {
        return Err(ConfigError::TimeoutOutOfRange {
            timeout: timeout_secs,
        });
    }
    Ok(())
}

/// Monitoring state of the watchdog.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum WatchdogState {
    /// No countdown is running.
    Disabled,
    /// A countdown is running and will trigger recovery at its deadline.
    Armed,
}

/// Counters describing the device's activity since realize.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct WatchdogStats {
    /// Queue notifications handled.
    pub notifications: u64,
    /// Requests popped from the queue.
    pub requests: u64,
    /// Heartbeats received while armed.
    pub heartbeats: u64,
    /// Requests that were short or carried an unknown command.
    pub ignored_requests: u64,
    /// Times the timer expired.
    pub expirations: u64,
}

/// The virtio watchdog device.
pub struct VirtioWatchdogDevice {
    // Host configuration.
    config_size: usize,
    guest_writable_timeout: bool,

    // Device state.
    timeout_secs: u32,
    enabled: bool,
    reboot_enabled: bool,

    // Collaborators.
    queue: Box<dyn CommandQueue>,
    timer: Box<dyn WatchdogTimer>,
    platform: Box<dyn WatchdogPlatform>,

    guest_events: GuestEventLimiter,
    stats: WatchdogStats,
}

impl std::fmt::Debug for VirtioWatchdogDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtioWatchdogDevice")
            .field("timeout_secs", &self.timeout_secs)
            .field("enabled", &self.enabled)
            .field("reboot_enabled", &self.reboot_enabled)
            .field("deadline", &self.timer.deadline())
            .finish()
    }
}

impl VirtioWatchdogDevice {
    /// Validates `config` and creates a disabled device that owns `queue`,
    /// `timer` and `platform`.
    ///
    /// On error nothing is created and the collaborators are dropped.
    pub fn realize(
        config: WatchdogDeviceConfig,
        queue: Box<dyn CommandQueue>,
        mut timer: Box<dyn WatchdogTimer>,
        platform: Box<dyn WatchdogPlatform>,
    ) -> Result<Self, ConfigError> {
        let WatchdogDeviceConfig {
            timeout_secs,
            config_size,
            guest_writable_timeout,
        } = config;

        validate_timeout(timeout_secs)?;
        if config_size < CONFIG_SPACE_SIZE {
            return Err(ConfigError::ConfigSizeTooSmall { size: config_size });
        }

        timer.cancel_timeout();
        tracing::debug!(timeout_secs, config_size, "realized virtio watchdog");
        Ok(Self {
            config_size,
            guest_writable_timeout,
            timeout_secs,
            enabled: false,
            reboot_enabled: true,
            queue,
            timer,
            platform,
            guest_events: GuestEventLimiter::new(),
            stats: WatchdogStats::default(),
        })
    }

    /// Tears the device down: the timer is cancelled and every outstanding
    /// queue buffer is released. The platform hook is dropped without being
    /// invoked.
    pub fn unrealize(mut self) {
        self.timer.cancel_timeout();
        self.queue.reset();
        tracing::debug!("unrealized virtio watchdog");
    }

    /// The virtio device type.
    pub fn device_id(&self) -> u16 {
        VIRTIO_ID_WATCHDOG
    }

    /// Feature negotiation: the device takes whatever the transport offers.
    pub fn get_features(&self, offered: u64) -> u64 {
        offered
    }

    /// The configured timeout in seconds.
    pub fn timeout_secs(&self) -> u32 {
        self.timeout_secs
    }

    /// The configured timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.into())
    }

    /// Whether the watchdog is monitoring the guest.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// The monitoring state.
    pub fn state(&self) -> WatchdogState {
        if self.enabled {
            WatchdogState::Armed
        } else {
            WatchdogState::Disabled
        }
    }

    /// Whether expiry re-arms the timer for another interval.
    pub fn auto_rearm(&self) -> bool {
        self.reboot_enabled
    }

    /// Selects whether expiry re-arms the timer (continuous monitoring) or
    /// disables the watchdog (one-shot). Reset restores re-arming.
    pub fn set_auto_rearm(&mut self, auto_rearm: bool) {
        self.reboot_enabled = auto_rearm;
    }

    /// The pending expiry deadline, if the timer is armed.
    pub fn deadline(&self) -> Option<VmTime> {
        self.timer.deadline()
    }

    /// Width of the configuration region.
    pub fn config_size(&self) -> usize {
        self.config_size
    }

    /// Activity counters.
    pub fn stats(&self) -> WatchdogStats {
        self.stats
    }

    /// The recovery hook.
    pub fn platform_mut(&mut self) -> &mut dyn WatchdogPlatform {
        self.platform.as_mut()
    }

    /// Drains the command queue.
    ///
    /// Every request available when the call starts is decoded, applied and
    /// completed in order. Requests the guest adds while draining wait for
    /// the next notification. The guest is signaled once at the end.
    pub fn handle_queue_notify(&mut self) {
        self.stats.notifications += 1;
        let pending = self.queue.available();
        for _ in 0..pending {
            let Some(request) = self.queue.pop() else {
                break;
            };
            self.stats.requests += 1;
            match WatchdogEvent::decode(request.payload()) {
                Some(event) => self.handle_event(event.kind()),
                None => {
                    self.stats.ignored_requests += 1;
                    let now = self.timer.now();
                    warn_guest_ratelimited!(
                        self.guest_events,
                        now,
                        len = request.payload().len(),
                        "ignoring short watchdog request"
                    );
                }
            }
            // No response payload is defined.
            self.queue.complete(request, 0);
        }
        self.queue.notify_guest();
    }

    /// Applies one guest command to the state machine.
    fn handle_event(&mut self, kind: WatchdogEventKind) {
        match kind {
            WatchdogEventKind::HEARTBEAT => {
                if self.enabled {
                    self.stats.heartbeats += 1;
                    self.restart_timer();
                    tracing::debug!(deadline = ?self.timer.deadline(), "watchdog heartbeat");
                }
            }
            WatchdogEventKind::ENABLE => {
                if !self.enabled {
                    self.enabled = true;
                    self.restart_timer();
                    tracing::info!(timeout_secs = self.timeout_secs, "watchdog enabled");
                }
            }
            WatchdogEventKind::DISABLE => {
                if self.enabled {
                    self.disable_timer();
                    tracing::info!("watchdog disabled");
                }
            }
            kind => {
                self.stats.ignored_requests += 1;
                let now = self.timer.now();
                warn_guest_ratelimited!(
                    self.guest_events,
                    now,
                    ?kind,
                    "ignoring unknown watchdog command"
                );
            }
        }
    }

    /// Starts a new countdown of the full timeout from now.
    fn restart_timer(&mut self) {
        if !self.enabled {
            return;
        }
        let deadline = self.timer.now().saturating_add(self.timeout());
        self.timer.set_timeout(deadline);
    }

    fn disable_timer(&mut self) {
        self.timer.cancel_timeout();
        self.enabled = false;
    }

    /// Handles timer expiry, if the deadline has passed.
    ///
    /// The recovery hook runs exactly once per expiry. Returns whether the
    /// timer had expired.
    pub fn poll_timer(&mut self) -> bool {
        if !self.timer.poll_expired() {
            return false;
        }
        self.stats.expirations += 1;
        tracing::warn!(
            timeout_secs = self.timeout_secs,
            auto_rearm = self.reboot_enabled,
            "watchdog expired, performing recovery action"
        );
        self.platform.on_timeout();
        if self.reboot_enabled {
            self.restart_timer();
        } else {
            self.disable_timer();
        }
        true
    }

    /// Returns the device to its power-on state: disabled, with expiry
    /// re-arming. Safe to call in any state.
    pub fn reset(&mut self) {
        self.timer.cancel_timeout();
        self.enabled = false;
        self.reboot_enabled = true;
        tracing::debug!("virtio watchdog reset");
    }

    /// Reads the configuration region: the live timeout, little-endian,
    /// zero-padded to the configured width.
    pub fn get_config(&self) -> Vec<u8> {
        let mut data = vec![0; self.config_size];
        let config = WatchdogConfigSpace {
            timeout: self.timeout_secs.into(),
        };
        data[..CONFIG_SPACE_SIZE].copy_from_slice(config.as_bytes());
        data
    }

    /// Writes the full configuration region.
    ///
    /// The timeout is host-owned unless the device was configured with
    /// `guest_writable_timeout`, in which case a value within the supported
    /// range replaces it for the next arm.
    pub fn set_config(&mut self, data: &[u8]) {
        let now = self.timer.now();
        if data.len() != self.config_size {
            warn_guest_ratelimited!(
                self.guest_events,
                now,
                len = data.len(),
                expected = self.config_size,
                "ignoring config write of wrong size"
            );
            return;
        }
        let Ok((config, _)) = WatchdogConfigSpace::read_from_prefix(data) else {
            return;
        };
        let timeout = config.timeout.get();
        if timeout == self.timeout_secs {
            return;
        }
        if !self.guest_writable_timeout {
            tracing::debug!(timeout, "guest timeout write ignored");
            return;
        }
        if let Err(err) = validate_timeout(timeout) {
            warn_guest_ratelimited!(
                self.guest_events,
                now,
                error = &err as &dyn std::error::Error,
                "rejecting guest timeout"
            );
            return;
        }
        tracing::info!(old = self.timeout_secs, new = timeout, "guest changed watchdog timeout");
        self.timeout_secs = timeout;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::SimpleWatchdogPlatform;
    use crate::queue::DeviceRing;
    use crate::queue::GuestRing;
    use crate::queue::GuestRingHandle;
    use crate::queue::QueueRequest;
    use crate::test_helpers::init_tracing;
    use crate::vmtime::VmTimeSource;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;
    use virtio_watchdog_protocol::QUEUE_SIZE;

    struct TestDevice {
        device: VirtioWatchdogDevice,
        guest: GuestRingHandle,
        clock: VmTimeSource,
        expirations: Arc<AtomicUsize>,
    }

    impl TestDevice {
        fn new(config: WatchdogDeviceConfig) -> Self {
            init_tracing();
            let clock = VmTimeSource::new();
            let (guest, ring) = GuestRing::new(QUEUE_SIZE);
            let expirations = Arc::new(AtomicUsize::new(0));
            let platform = SimpleWatchdogPlatform::new(Box::new({
                let expirations = expirations.clone();
                move || {
                    expirations.fetch_add(1, Ordering::SeqCst);
                }
            }));
            let device = VirtioWatchdogDevice::realize(
                config,
                Box::new(ring),
                Box::new(clock.new_timer()),
                Box::new(platform),
            )
            .unwrap();
            Self {
                device,
                guest,
                clock,
                expirations,
            }
        }

        fn send(&mut self, kinds: &[WatchdogEventKind]) {
            for &kind in kinds {
                self.guest.submit_event(kind).unwrap();
            }
            self.device.handle_queue_notify();
            self.guest.take_used();
        }

        fn advance(&mut self, secs: u64) -> bool {
            self.clock.advance(Duration::from_secs(secs));
            self.device.poll_timer()
        }

        fn expirations(&self) -> usize {
            self.expirations.load(Ordering::SeqCst)
        }
    }

    fn config(timeout_secs: u32) -> WatchdogDeviceConfig {
        WatchdogDeviceConfig {
            timeout_secs,
            ..Default::default()
        }
    }

    #[test]
    fn timeout_bounds() {
        assert!(validate_timeout(TIMEOUT_MIN_SECS).is_ok());
        assert!(validate_timeout(TIMEOUT_MAX_SECS).is_ok());
        assert_eq!(
            validate_timeout(9),
            Err(ConfigError::TimeoutOutOfRange { timeout: 9 })
        );
        assert_eq!(
            validate_timeout(2049),
            Err(ConfigError::TimeoutOutOfRange { timeout: 2049 })
        );
    }

    #[test]
    fn config_size_must_hold_fields() {
        let clock = VmTimeSource::new();
        let (_guest, ring) = GuestRing::new(QUEUE_SIZE);
        let err = VirtioWatchdogDevice::realize(
            WatchdogDeviceConfig {
                config_size: 2,
                ..Default::default()
            },
            Box::new(ring),
            Box::new(clock.new_timer()),
            Box::new(SimpleWatchdogPlatform::new(Box::new(|| {}))),
        )
        .unwrap_err();
        assert_eq!(err, ConfigError::ConfigSizeTooSmall { size: 2 });
    }

    #[test]
    fn initial_state() {
        let t = TestDevice::new(config(10));
        assert_eq!(t.device.state(), WatchdogState::Disabled);
        assert!(t.device.auto_rearm());
        assert_eq!(t.device.deadline(), None);
    }

    #[test]
    fn enable_arms_for_configured_timeout() {
        let mut t = TestDevice::new(config(45));
        t.clock.advance(Duration::from_secs(5));
        t.send(&[WatchdogEventKind::ENABLE]);
        assert_eq!(t.device.state(), WatchdogState::Armed);
        assert_eq!(
            t.device.deadline(),
            Some(VmTime::from_nanos(50_000_000_000))
        );
    }

    #[test]
    fn heartbeat_while_disabled_is_ignored() {
        let mut t = TestDevice::new(config(10));
        t.send(&[WatchdogEventKind::HEARTBEAT, WatchdogEventKind::HEARTBEAT]);
        assert_eq!(t.device.state(), WatchdogState::Disabled);
        assert_eq!(t.device.deadline(), None);
        assert!(!t.advance(100));
        assert_eq!(t.expirations(), 0);
    }

    #[test]
    fn heartbeat_moves_deadline() {
        let mut t = TestDevice::new(config(10));
        t.send(&[WatchdogEventKind::ENABLE]);
        t.advance(4);
        t.send(&[WatchdogEventKind::HEARTBEAT]);
        assert_eq!(t.device.state(), WatchdogState::Armed);
        assert_eq!(
            t.device.deadline(),
            Some(VmTime::from_nanos(14_000_000_000))
        );
        assert_eq!(t.device.stats().heartbeats, 1);
    }

    #[test]
    fn redundant_enable_keeps_deadline() {
        let mut t = TestDevice::new(config(10));
        t.send(&[WatchdogEventKind::ENABLE]);
        let deadline = t.device.deadline();
        t.advance(6);
        t.send(&[WatchdogEventKind::ENABLE]);
        assert_eq!(t.device.deadline(), deadline);
        assert!(t.advance(4));
        assert_eq!(t.expirations(), 1);
    }

    #[test]
    fn disable_cancels_pending_expiry() {
        let mut t = TestDevice::new(config(10));
        t.send(&[WatchdogEventKind::ENABLE]);
        t.advance(9);
        t.send(&[WatchdogEventKind::DISABLE]);
        assert_eq!(t.device.state(), WatchdogState::Disabled);
        assert!(!t.advance(100));
        assert_eq!(t.expirations(), 0);

        // Redundant disable is harmless.
        t.send(&[WatchdogEventKind::DISABLE]);
        assert_eq!(t.device.state(), WatchdogState::Disabled);
    }

    #[test]
    fn armed_iff_last_enable_not_disabled() {
        use WatchdogEventKind as K;
        let sequences = [
            (vec![K::ENABLE], true),
            (vec![K::ENABLE, K::DISABLE], false),
            (vec![K::ENABLE, K::DISABLE, K::HEARTBEAT], false),
            (vec![K::DISABLE, K::ENABLE, K::HEARTBEAT], true),
            (vec![K::ENABLE, K::ENABLE, K::DISABLE, K::ENABLE], true),
            (vec![K::HEARTBEAT, K::DISABLE, K::HEARTBEAT], false),
        ];
        for (sequence, armed) in sequences {
            let mut t = TestDevice::new(config(10));
            t.send(&sequence);
            assert_eq!(t.device.is_enabled(), armed, "{sequence:?}");
            assert_eq!(t.device.deadline().is_some(), armed, "{sequence:?}");
        }
    }

    #[test]
    fn expiry_rearms_by_default() {
        let mut t = TestDevice::new(config(10));
        t.send(&[WatchdogEventKind::ENABLE]);
        assert!(t.advance(10));
        assert_eq!(t.expirations(), 1);
        assert_eq!(t.device.state(), WatchdogState::Armed);
        assert_eq!(
            t.device.deadline(),
            Some(VmTime::from_nanos(20_000_000_000))
        );
        assert!(!t.advance(9));
        assert!(t.advance(1));
        assert_eq!(t.expirations(), 2);
    }

    #[test]
    fn one_shot_expiry_disables() {
        let mut t = TestDevice::new(config(10));
        t.device.set_auto_rearm(false);
        t.send(&[WatchdogEventKind::ENABLE]);
        assert!(t.advance(10));
        assert_eq!(t.expirations(), 1);
        assert_eq!(t.device.state(), WatchdogState::Disabled);
        assert_eq!(t.device.deadline(), None);
        assert!(!t.advance(100));
        assert_eq!(t.expirations(), 1);
    }

    #[test]
    fn reset_from_any_state() {
        let mut t = TestDevice::new(config(10));
        t.device.set_auto_rearm(false);
        t.send(&[WatchdogEventKind::ENABLE]);
        t.device.reset();
        assert_eq!(t.device.state(), WatchdogState::Disabled);
        assert!(t.device.auto_rearm());
        assert_eq!(t.device.deadline(), None);
        assert!(!t.advance(100));

        // Idempotent.
        t.device.reset();
        assert_eq!(t.device.state(), WatchdogState::Disabled);
        assert!(t.device.auto_rearm());
    }

    /// Has the guest submit another command while the device is popping
    /// the first one.
    struct LateArrivalQueue {
        ring: DeviceRing,
        guest: GuestRingHandle,
        late: Option<WatchdogEventKind>,
    }

    impl CommandQueue for LateArrivalQueue {
        fn available(&self) -> usize {
            self.ring.available()
        }

        fn pop(&mut self) -> Option<QueueRequest> {
            let request = self.ring.pop();
            if let Some(kind) = self.late.take() {
                self.guest.submit_event(kind).unwrap();
            }
            request
        }

        fn complete(&mut self, request: QueueRequest, written: u32) {
            self.ring.complete(request, written)
        }

        fn notify_guest(&mut self) {
            self.ring.notify_guest()
        }

        fn reset(&mut self) {
            self.ring.reset()
        }
    }

    #[test]
    fn requests_arriving_mid_drain_wait_for_next_notify() {
        init_tracing();
        let clock = VmTimeSource::new();
        let (guest, ring) = GuestRing::new(QUEUE_SIZE);
        let queue = LateArrivalQueue {
            ring,
            guest: guest.clone(),
            late: Some(WatchdogEventKind::DISABLE),
        };
        let mut device = VirtioWatchdogDevice::realize(
            config(10),
            Box::new(queue),
            Box::new(clock.new_timer()),
            Box::new(SimpleWatchdogPlatform::new(Box::new(|| {}))),
        )
        .unwrap();

        guest.submit_event(WatchdogEventKind::ENABLE).unwrap();
        device.handle_queue_notify();
        assert_eq!(device.state(), WatchdogState::Armed);
        assert_eq!(device.stats().requests, 1);
        assert_eq!(guest.take_used().len(), 1);
        assert_eq!(guest.outstanding(), 1);

        device.handle_queue_notify();
        assert_eq!(device.state(), WatchdogState::Disabled);
        assert_eq!(device.stats().requests, 2);
        assert_eq!(guest.take_used().len(), 1);
        assert_eq!(guest.notifications(), 2);
    }

    #[test]
    fn malformed_requests_are_acknowledged() {
        let mut t = TestDevice::new(config(10));
        t.guest.submit(&[2]).unwrap();
        t.guest.submit(&[]).unwrap();
        t.guest.submit(&[0x77, 0, 0, 0]).unwrap();
        t.device.handle_queue_notify();

        let used = t.guest.take_used();
        assert_eq!(used.len(), 3);
        assert!(used.iter().all(|u| u.len == 0));
        assert_eq!(t.guest.notifications(), 1);
        assert_eq!(t.device.state(), WatchdogState::Disabled);
        assert_eq!(t.device.stats().ignored_requests, 3);
    }

    #[test]
    fn drain_processes_in_order_and_notifies_once() {
        let mut t = TestDevice::new(config(10));
        t.guest.submit_event(WatchdogEventKind::ENABLE).unwrap();
        t.guest.submit_event(WatchdogEventKind::DISABLE).unwrap();
        t.guest.submit_event(WatchdogEventKind::ENABLE).unwrap();
        t.device.handle_queue_notify();

        assert_eq!(t.device.state(), WatchdogState::Armed);
        assert_eq!(t.guest.take_used().len(), 3);
        assert_eq!(t.guest.notifications(), 1);
        assert_eq!(t.device.stats().requests, 3);

        // An empty queue still completes the notification.
        t.device.handle_queue_notify();
        assert_eq!(t.guest.notifications(), 2);
    }

    #[test]
    fn config_reads_live_timeout() {
        let mut t = TestDevice::new(WatchdogDeviceConfig {
            timeout_secs: 300,
            config_size: 8,
            guest_writable_timeout: false,
        });
        assert_eq!(t.device.get_config(), [0x2c, 0x01, 0, 0, 0, 0, 0, 0]);

        t.device.set_config(&[20, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(t.device.timeout_secs(), 300);
        assert_eq!(t.device.get_config(), [0x2c, 0x01, 0, 0, 0, 0, 0, 0]);

        // Wrong-sized writes are dropped.
        t.device.set_config(&[20, 0, 0, 0]);
        assert_eq!(t.device.timeout_secs(), 300);
    }

    #[test]
    fn guest_writable_timeout_is_bounded() {
        let mut t = TestDevice::new(WatchdogDeviceConfig {
            timeout_secs: 30,
            config_size: CONFIG_SPACE_SIZE,
            guest_writable_timeout: true,
        });
        t.device.set_config(&60u32.to_le_bytes());
        assert_eq!(t.device.timeout_secs(), 60);
        t.device.set_config(&5u32.to_le_bytes());
        assert_eq!(t.device.timeout_secs(), 60);
        t.device.set_config(&5000u32.to_le_bytes());
        assert_eq!(t.device.timeout_secs(), 60);

        t.send(&[WatchdogEventKind::ENABLE]);
        assert_eq!(
            t.device.deadline(),
            Some(VmTime::from_nanos(60_000_000_000))
        );
    }

    #[test]
    fn unrealize_releases_buffers() {
        let t = TestDevice::new(config(10));
        t.guest.submit_event(WatchdogEventKind::ENABLE).unwrap();
        assert_eq!(t.guest.outstanding(), 1);
        t.device.unrealize();
        assert_eq!(t.guest.outstanding(), 0);
    }
}
