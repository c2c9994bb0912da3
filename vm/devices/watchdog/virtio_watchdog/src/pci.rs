// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! PCI binding for the virtio watchdog.
//!
//! [`VirtioWatchdogPci`] presents the device as a modern-only virtio PCI
//! function. The transport itself (BARs, common config, MSI-X tables) belongs
//! to the VMM's PCI stack; this type carries the identity and proxy options
//! that stack needs, and translates its byte-granular accesses into calls on
//! the core device.

use crate::ConfigError;
use crate::VirtioWatchdogDevice;
use crate::WatchdogDeviceConfig;
use crate::platform::WatchdogPlatform;
use crate::queue::CommandQueue;
use crate::save_restore::RestoreError;
use crate::save_restore::SavedState;
use crate::vmtime::WatchdogTimer;
use bitfield_struct::bitfield;
use virtio_watchdog_protocol::COMMAND_QUEUE_INDEX;
use virtio_watchdog_protocol::DEFAULT_MSIX_VECTORS;
use virtio_watchdog_protocol::PCI_CLASS_OTHERS;
use virtio_watchdog_protocol::VIRTIO_F_VERSION_1;
use virtio_watchdog_protocol::VIRTIO_PCI_MODERN_DEVICE_ID_BASE;
use virtio_watchdog_protocol::VIRTIO_PCI_MODERN_REVISION;
use virtio_watchdog_protocol::VIRTIO_PCI_VENDOR_ID;

/// Largest MSI-X table a PCI function can expose.
pub const MAX_MSIX_VECTORS: u32 = 2048;

/// Transport options of the PCI function, as packed for the VMM's PCI
/// stack.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct PciProxyFlags {
    /// Queue notifications are delivered through an event fd rather than
    /// a trapped MMIO write.
    pub use_ioeventfd: bool,
    /// The function does not offer the legacy virtio interface.
    pub force_modern: bool,
    #[bits(30)]
    _reserved: u32,
}

/// Host-supplied options for the PCI function.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PciProxyConfig {
    /// Deliver queue notifications via event fd.
    pub ioeventfd: bool,
    /// Number of MSI-X vectors. Zero selects INTx.
    pub vectors: u32,
}

impl Default for PciProxyConfig {
    fn default() -> Self {
        Self {
            ioeventfd: true,
            vectors: DEFAULT_MSIX_VECTORS,
        }
    }
}

/// PCI configuration space identity.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct HardwareIds {
    /// Vendor ID.
    pub vendor_id: u16,
    /// Device ID.
    pub device_id: u16,
    /// Revision ID.
    pub revision_id: u8,
    /// Programming interface.
    pub prog_if: u8,
    /// Subclass code.
    pub sub_class: u8,
    /// Base class code.
    pub base_class: u8,
    /// Subsystem vendor ID.
    pub type0_sub_vendor_id: u16,
    /// Subsystem ID.
    pub type0_sub_system_id: u16,
}

/// The virtio watchdog bound to a PCI function.
#[derive(Debug)]
pub struct VirtioWatchdogPci {
    flags: PciProxyFlags,
    vectors: u32,
    hardware_ids: HardwareIds,
    driver_features: u64,
    device: VirtioWatchdogDevice,
}

impl VirtioWatchdogPci {
    /// Validates the proxy options and realizes the inner device.
    ///
    /// The function is always modern-only, whatever the caller asks for.
    pub fn realize(
        proxy: PciProxyConfig,
        config: WatchdogDeviceConfig,
        queue: Box<dyn CommandQueue>,
        timer: Box<dyn WatchdogTimer>,
        platform: Box<dyn WatchdogPlatform>,
    ) -> Result<Self, ConfigError> {
        if proxy.vectors > MAX_MSIX_VECTORS {
            return Err(ConfigError::TooManyVectors {
                vectors: proxy.vectors,
                max: MAX_MSIX_VECTORS,
            });
        }
        let device = VirtioWatchdogDevice::realize(config, queue, timer, platform)?;
        let flags = PciProxyFlags::new()
            .with_use_ioeventfd(proxy.ioeventfd)
            .with_force_modern(true);

        tracing::debug!(
            vectors = proxy.vectors,
            ioeventfd = proxy.ioeventfd,
            "realized virtio watchdog pci function"
        );
        Ok(Self {
            flags,
            vectors: proxy.vectors,
            hardware_ids: HardwareIds {
                vendor_id: VIRTIO_PCI_VENDOR_ID,
                device_id: VIRTIO_PCI_MODERN_DEVICE_ID_BASE + device.device_id(),
                revision_id: VIRTIO_PCI_MODERN_REVISION,
                prog_if: 0,
                sub_class: 0,
                base_class: PCI_CLASS_OTHERS,
                type0_sub_vendor_id: VIRTIO_PCI_VENDOR_ID,
                type0_sub_system_id: 0x1100,
            },
            driver_features: 0,
            device,
        })
    }

    /// The function's PCI identity.
    pub fn hardware_ids(&self) -> HardwareIds {
        self.hardware_ids
    }

    /// The packed transport options.
    pub fn flags(&self) -> PciProxyFlags {
        self.flags
    }

    /// MSI-X table size.
    pub fn msix_vectors(&self) -> u32 {
        self.vectors
    }

    /// The inner device.
    pub fn device(&self) -> &VirtioWatchdogDevice {
        &self.device
    }

    /// The inner device, mutably.
    pub fn device_mut(&mut self) -> &mut VirtioWatchdogDevice {
        &mut self.device
    }

    /// Feature bits offered to the driver.
    pub fn device_features(&self) -> u64 {
        self.device.get_features(VIRTIO_F_VERSION_1)
    }

    /// Records the driver's feature selection, dropping bits the device did
    /// not offer. Returns the accepted set.
    pub fn set_driver_features(&mut self, features: u64) -> u64 {
        let accepted = features & self.device_features();
        if accepted != features {
            tracing::debug!(
                requested = features,
                accepted,
                "driver requested unoffered features"
            );
        }
        self.driver_features = accepted;
        accepted
    }

    /// The accepted driver features.
    pub fn driver_features(&self) -> u64 {
        self.driver_features
    }

    /// Reads `data.len()` bytes of the device configuration region starting
    /// at `offset`. Bytes past the end of the region read as zero.
    pub fn read_device_config(&self, offset: u64, data: &mut [u8]) {
        let config = self.device.get_config();
        for (i, b) in data.iter_mut().enumerate() {
            *b = usize::try_from(offset)
                .ok()
                .and_then(|offset| offset.checked_add(i))
                .and_then(|i| config.get(i).copied())
                .unwrap_or(0);
        }
    }

    /// Writes bytes of the device configuration region starting at `offset`.
    ///
    /// The write is merged into the current contents and the whole region is
    /// handed to the device, so a field written a byte at a time takes
    /// effect once the final byte lands. Bytes past the end are dropped.
    pub fn write_device_config(&mut self, offset: u64, data: &[u8]) {
        let mut config = self.device.get_config();
        let start = usize::try_from(offset).unwrap_or(usize::MAX);
        if start >= config.len() {
            tracing::debug!(offset, len = data.len(), "config write out of range");
            return;
        }
        let len = data.len().min(config.len() - start);
        config[start..start + len].copy_from_slice(&data[..len]);
        self.device.set_config(&config);
    }

    /// Handles a guest kick of queue `index`.
    pub fn queue_notify(&mut self, index: u16) {
        if index != COMMAND_QUEUE_INDEX {
            tracing::debug!(index, "notify for nonexistent queue");
            return;
        }
        self.device.handle_queue_notify();
    }

    /// See [`VirtioWatchdogDevice::poll_timer`].
    pub fn poll_timer(&mut self) -> bool {
        self.device.poll_timer()
    }

    /// Function-level reset: clears negotiated features and resets the
    /// device.
    pub fn reset(&mut self) {
        self.driver_features = 0;
        self.device.reset();
    }

    /// Saves the device state. The transport holds nothing that survives
    /// a reset, so there is nothing of its own to save.
    pub fn save(&self) -> SavedState {
        self.device.save()
    }

    /// Restores the device state.
    pub fn restore(&mut self, state: SavedState) -> Result<(), RestoreError> {
        self.device.restore(state)
    }

    /// Tears down the function and its device.
    pub fn unrealize(self) {
        self.device.unrealize();
    }
}
