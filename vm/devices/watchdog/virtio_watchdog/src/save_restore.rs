// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Snapshot and live-migration support.
//!
//! The saved timer is its remaining countdown, not an absolute deadline, so
//! a restored device observes the same time-to-expiry it had when saved no
//! matter what time base the destination clock uses.

use crate::ConfigError;
use crate::VirtioWatchdogDevice;
use crate::validate_timeout;
use std::time::Duration;
use thiserror::Error;
use virtio_watchdog_protocol::TIMEOUT_MAX_SECS;
use virtio_watchdog_protocol::saved_state::SAVED_STATE_VERSION;
use virtio_watchdog_protocol::saved_state::SavedStateDecodeError;
use virtio_watchdog_protocol::saved_state::SavedStateV1;
use virtio_watchdog_protocol::saved_state::TIMER_NOT_ARMED;

/// Saved state of [`VirtioWatchdogDevice`].
pub type SavedState = SavedStateV1;

/// An error restoring saved state. The device must not resume after one.
#[derive(Debug, Error)]
pub enum RestoreError {
    /// The blob could not be decoded.
    #[error("failed to decode watchdog saved state")]
    Decode(#[from] SavedStateDecodeError),
    /// The saved timeout is not one this device could have been configured
    /// with.
    #[error("invalid saved timeout")]
    InvalidTimeout(#[source] ConfigError),
    /// A boolean field holds something other than 0 or 1.
    #[error("invalid value {value} for saved field '{field}'")]
    InvalidFlag {
        /// The field name.
        field: &'static str,
        /// The saved value.
        value: i32,
    },
    /// The saved countdown is negative or longer than any configurable
    /// timeout.
    #[error("invalid saved timer value {0}")]
    InvalidTimer(i64),
    /// The enabled flag disagrees with whether a timer was pending.
    #[error("saved state has enabled={enabled} but timer armed={armed}")]
    Inconsistent {
        /// The saved enabled flag.
        enabled: bool,
        /// Whether a countdown was saved.
        armed: bool,
    },
}

fn decode_flag(field: &'static str, value: i32) -> Result<bool, RestoreError> {
    match value {
        0 => Ok(false),
        1 => Ok(true),
        value => Err(RestoreError::InvalidFlag { field, value }),
    }
}

impl VirtioWatchdogDevice {
    /// Captures the device state.
    ///
    /// An armed timer is saved as its remaining countdown. A deadline that
    /// has passed but not yet been polled is saved as zero remaining, so the
    /// expiry is delivered after restore rather than lost.
    pub fn save(&self) -> SavedState {
        let now = self.timer.now();
        let timer_remaining_ns = match self.timer.deadline() {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(now);
                i64::try_from(remaining.as_nanos()).unwrap_or(i64::MAX)
            }
            None => TIMER_NOT_ARMED,
        };
        SavedStateV1 {
            version: SAVED_STATE_VERSION.into(),
            timeout: self.timeout_secs.into(),
            enabled: i32::from(self.enabled).into(),
            reboot_enabled: i32::from(self.reboot_enabled).into(),
            timer_remaining_ns: timer_remaining_ns.into(),
        }
    }

    /// Replaces the device state with `state`, re-arming the timer for the
    /// saved remaining countdown measured from the current virtual time.
    ///
    /// The state is fully validated before anything is changed.
    pub fn restore(&mut self, state: SavedState) -> Result<(), RestoreError> {
        let SavedStateV1 {
            version,
            timeout,
            enabled,
            reboot_enabled,
            timer_remaining_ns,
        } = state;

        if version.get() != SAVED_STATE_VERSION {
            return Err(SavedStateDecodeError::UnsupportedVersion {
                found: version.get(),
            }
            .into());
        }
        let timeout = timeout.get();
        validate_timeout(timeout).map_err(RestoreError::InvalidTimeout)?;
        let enabled = decode_flag("enabled", enabled.get())?;
        let reboot_enabled = decode_flag("reboot_enabled", reboot_enabled.get())?;
        // No countdown can outlast the largest configurable timeout.
        let max_remaining = Duration::from_secs(TIMEOUT_MAX_SECS.into());
        let remaining = match timer_remaining_ns.get() {
            TIMER_NOT_ARMED => None,
            ns => Some(
                u64::try_from(ns)
                    .map(Duration::from_nanos)
                    .ok()
                    .filter(|remaining| *remaining <= max_remaining)
                    .ok_or(RestoreError::InvalidTimer(ns))?,
            ),
        };
        if enabled != remaining.is_some() {
            return Err(RestoreError::Inconsistent {
                enabled,
                armed: remaining.is_some(),
            });
        }

        self.timeout_secs = timeout;
        self.enabled = enabled;
        self.reboot_enabled = reboot_enabled;
        match remaining {
            Some(remaining) => {
                let deadline = self.timer.now().saturating_add(remaining);
                self.timer.set_timeout(deadline);
            }
            None => self.timer.cancel_timeout(),
        }
        tracing::info!(
            timeout_secs = timeout,
            enabled,
            reboot_enabled,
            ?remaining,
            "restored virtio watchdog"
        );
        Ok(())
    }

    /// Captures the device state as a versioned byte blob.
    pub fn save_to_bytes(&self) -> Vec<u8> {
        self.save().encode()
    }

    /// Restores from a blob produced by [`Self::save_to_bytes`].
    pub fn restore_from_bytes(&mut self, data: &[u8]) -> Result<(), RestoreError> {
        self.restore(SavedStateV1::decode(data)?)
    }
}
