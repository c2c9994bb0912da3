// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Byte layout of the watchdog's saved state.
//!
//! The layout is versioned. A blob carrying any version other than
//! [`SAVED_STATE_VERSION`] is rejected outright rather than being
//! interpreted with defaults.

use thiserror::Error;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;
use zerocopy::Unaligned;
use zerocopy::little_endian::I32 as I32Le;
use zerocopy::little_endian::I64 as I64Le;
use zerocopy::little_endian::U32 as U32Le;

/// The only saved-state version this revision understands.
pub const SAVED_STATE_VERSION: u32 = 1;

/// Value of [`SavedStateV1::timer_remaining_ns`] when no timer is pending.
pub const TIMER_NOT_ARMED: i64 = -1;

/// Saved device state, in field order.
#[repr(C)]
#[derive(Debug, Copy, Clone, IntoBytes, FromBytes, Immutable, KnownLayout, Unaligned)]
pub struct SavedStateV1 {
    /// Layout version, always [`SAVED_STATE_VERSION`].
    pub version: U32Le,
    /// Configured timeout in seconds.
    pub timeout: U32Le,
    /// Non-zero if the watchdog is enabled.
    pub enabled: I32Le,
    /// Non-zero if expiry re-arms the timer.
    pub reboot_enabled: I32Le,
    /// Virtual nanoseconds left before expiry, or [`TIMER_NOT_ARMED`].
    pub timer_remaining_ns: I64Le,
}

static_assertions::const_assert_eq!(24, size_of::<SavedStateV1>());

/// An error decoding a saved-state blob.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SavedStateDecodeError {
    /// The blob is too short to hold a version field.
    #[error("saved state truncated: {len} bytes")]
    Truncated {
        /// Length of the blob.
        len: usize,
    },
    /// The blob was written by an incompatible revision.
    #[error(
        "unsupported saved state version {found}, expected {expected}",
        expected = SAVED_STATE_VERSION
    )]
    UnsupportedVersion {
        /// The version found in the blob.
        found: u32,
    },
    /// The blob has the right version but the wrong size.
    #[error(
        "saved state is {len} bytes, expected {expected}",
        expected = size_of::<SavedStateV1>()
    )]
    BadLength {
        /// Length of the blob.
        len: usize,
    },
}

impl SavedStateV1 {
    /// Serializes the state into a new buffer.
    pub fn encode(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }

    /// Parses a blob produced by [`Self::encode`].
    pub fn decode(data: &[u8]) -> Result<Self, SavedStateDecodeError> {
        let (version, _) = U32Le::read_from_prefix(data)
            .map_err(|_| SavedStateDecodeError::Truncated { len: data.len() })?;
        if version.get() != SAVED_STATE_VERSION {
            return Err(SavedStateDecodeError::UnsupportedVersion {
                found: version.get(),
            });
        }
        Self::read_from_bytes(data)
            .map_err(|_| SavedStateDecodeError::BadLength { len: data.len() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SavedStateV1 {
        SavedStateV1 {
            version: SAVED_STATE_VERSION.into(),
            timeout: 10u32.into(),
            enabled: 1i32.into(),
            reboot_enabled: 1i32.into(),
            timer_remaining_ns: 7_000_000_000i64.into(),
        }
    }

    #[test]
    fn field_order() {
        let bytes = sample().encode();
        assert_eq!(&bytes[0..4], &[1, 0, 0, 0]);
        assert_eq!(&bytes[4..8], &[10, 0, 0, 0]);
        assert_eq!(&bytes[8..12], &[1, 0, 0, 0]);
        assert_eq!(&bytes[12..16], &[1, 0, 0, 0]);
        assert_eq!(&bytes[16..24], &7_000_000_000i64.to_le_bytes());
    }

    #[test]
    fn version_mismatch_is_rejected() {
        let mut bytes = sample().encode();
        bytes[0] = 2;
        assert_eq!(
            SavedStateV1::decode(&bytes).unwrap_err(),
            SavedStateDecodeError::UnsupportedVersion { found: 2 }
        );
    }

    #[test]
    fn truncated_blobs_are_rejected() {
        assert_eq!(
            SavedStateV1::decode(&[1, 0]).unwrap_err(),
            SavedStateDecodeError::Truncated { len: 2 }
        );
        let bytes = sample().encode();
        assert_eq!(
            SavedStateV1::decode(&bytes[..20]).unwrap_err(),
            SavedStateDecodeError::BadLength { len: 20 }
        );
    }
}
