// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Wire definitions for the virtio watchdog device.
//!
//! The guest drives the watchdog by placing fixed-size [`WatchdogEvent`]
//! records on the device's single command queue, and reads the configured
//! timeout back from the device-specific configuration region
//! ([`WatchdogConfigSpace`]). All multi-byte fields are little-endian, as
//! required for VIRTIO 1.0 devices.

#![forbid(unsafe_code)]

pub mod saved_state;

use std::fmt;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;
use zerocopy::Unaligned;
use zerocopy::little_endian::U32 as U32Le;

/// Virtio device type for the watchdog.
pub const VIRTIO_ID_WATCHDOG: u16 = 35;

/// PCI vendor ID used by all virtio devices (Red Hat / Qumranet).
pub const VIRTIO_PCI_VENDOR_ID: u16 = 0x1af4;

/// Base of the modern (non-transitional) virtio PCI device ID range.
pub const VIRTIO_PCI_MODERN_DEVICE_ID_BASE: u16 = 0x1040;

/// PCI device ID of a modern virtio watchdog function.
pub const VIRTIO_PCI_DEVICE_ID_WATCHDOG: u16 =
    VIRTIO_PCI_MODERN_DEVICE_ID_BASE + VIRTIO_ID_WATCHDOG;

/// PCI revision reported by modern-only virtio functions.
pub const VIRTIO_PCI_MODERN_REVISION: u8 = 1;

/// PCI base class "device does not fit any defined class".
pub const PCI_CLASS_OTHERS: u8 = 0xff;

/// Default number of MSI-X vectors exposed by the PCI function.
pub const DEFAULT_MSIX_VECTORS: u32 = 2;

/// Feature bit advertising VIRTIO 1.0 compliance.
pub const VIRTIO_F_VERSION_1: u64 = 1 << 32;

/// Smallest timeout, in seconds, the device may be configured with.
pub const TIMEOUT_MIN_SECS: u32 = 10;

/// Largest timeout, in seconds, the device may be configured with.
pub const TIMEOUT_MAX_SECS: u32 = 2048;

/// Timeout used when the host does not configure one.
pub const TIMEOUT_DEFAULT_SECS: u32 = 30;

/// Number of descriptors in the command queue.
pub const QUEUE_SIZE: u16 = 8;

/// Index of the command queue.
pub const COMMAND_QUEUE_INDEX: u16 = 0;

/// The kind of a guest command.
///
/// This is an open enum: any `u32` is representable so that commands from a
/// newer guest driver survive decoding and can be ignored by name.
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, Hash, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct WatchdogEventKind(pub u32);

impl WatchdogEventKind {
    /// Restart the countdown of an enabled watchdog.
    pub const HEARTBEAT: Self = Self(1);
    /// Start the watchdog.
    pub const ENABLE: Self = Self(2);
    /// Stop the watchdog.
    pub const DISABLE: Self = Self(3);

    fn name(self) -> Option<&'static str> {
        let name = match self {
            Self::HEARTBEAT => "HEARTBEAT",
            Self::ENABLE => "ENABLE",
            Self::DISABLE => "DISABLE",
            _ => return None,
        };
        Some(name)
    }
}

impl fmt::Debug for WatchdogEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.pad(name),
            None => write!(f, "{:#x}", self.0),
        }
    }
}

/// A command record submitted by the guest on the command queue.
///
/// Bytes following the record in the guest buffer are reserved and ignored.
#[repr(C)]
#[derive(Debug, Copy, Clone, IntoBytes, FromBytes, Immutable, KnownLayout, Unaligned)]
pub struct WatchdogEvent {
    /// The command, a little-endian [`WatchdogEventKind`].
    pub kind: U32Le,
}

static_assertions::const_assert_eq!(4, size_of::<WatchdogEvent>());

impl WatchdogEvent {
    /// Builds a command record for `kind`.
    pub fn new(kind: WatchdogEventKind) -> Self {
        Self {
            kind: kind.0.into(),
        }
    }

    /// Decodes a command from the start of a guest buffer.
    ///
    /// Returns `None` when the buffer is shorter than a full record.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        Self::read_from_prefix(buf).ok().map(|(event, _)| event)
    }

    /// The command kind carried by this record.
    pub fn kind(&self) -> WatchdogEventKind {
        WatchdogEventKind(self.kind.get())
    }
}

/// The device-specific configuration region.
#[repr(C)]
#[derive(Debug, Copy, Clone, IntoBytes, FromBytes, Immutable, KnownLayout, Unaligned)]
pub struct WatchdogConfigSpace {
    /// Current timeout in seconds.
    pub timeout: U32Le,
}

static_assertions::const_assert_eq!(4, size_of::<WatchdogConfigSpace>());

/// Size of the configuration region defined by this protocol revision.
pub const CONFIG_SPACE_SIZE: usize = size_of::<WatchdogConfigSpace>();
