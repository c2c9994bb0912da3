// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Drives a PCI-bound watchdog through a guest script on a virtual clock.

use crate::script::Step;
use anyhow::Context as _;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use virtio_watchdog::WatchdogDeviceConfig;
use virtio_watchdog::WatchdogState;
use virtio_watchdog::WatchdogStats;
use virtio_watchdog::action::ActionWatchdogPlatform;
use virtio_watchdog::action::WatchdogAction;
use virtio_watchdog::pci::PciProxyConfig;
use virtio_watchdog::pci::VirtioWatchdogPci;
use virtio_watchdog::platform::WatchdogPlatform;
use virtio_watchdog::queue::GuestRing;
use virtio_watchdog::queue::GuestRingHandle;
use virtio_watchdog::save_restore::SavedState;
use virtio_watchdog::vmtime::VmTimeSource;
use virtio_watchdog_protocol::COMMAND_QUEUE_INDEX;
use virtio_watchdog_protocol::QUEUE_SIZE;
use virtio_watchdog_protocol::saved_state::SavedStateV1;

#[derive(Debug, Clone)]
pub struct SimConfig {
    pub device: WatchdogDeviceConfig,
    pub proxy: PciProxyConfig,
    pub action: WatchdogAction,
    /// Disable the watchdog after the first expiry instead of re-arming.
    pub one_shot: bool,
    /// Granularity at which `advance` runs the event loop.
    pub tick: Duration,
    /// Where `save` writes and `restore` reads the state blob. Kept in
    /// memory when unset.
    pub state_file: Option<PathBuf>,
}

/// Final device status after a script has run.
#[derive(Debug)]
pub struct Summary {
    pub recoveries: Vec<WatchdogAction>,
    pub state: WatchdogState,
    pub timeout_secs: u32,
    pub stats: WatchdogStats,
    /// The platform's boot status: whether the watchdog fired since the last
    /// summary.
    pub timed_out: bool,
}

pub struct Simulation {
    config: SimConfig,
    clock: VmTimeSource,
    pci: VirtioWatchdogPci,
    guest: GuestRingHandle,
    recoveries: Arc<Mutex<Vec<WatchdogAction>>>,
    saved: Option<SavedState>,
}

impl Simulation {
    pub fn new(config: SimConfig) -> anyhow::Result<Self> {
        let clock = VmTimeSource::new();
        let recoveries = Arc::new(Mutex::new(Vec::new()));
        let (pci, guest) = build(&config, &clock, &recoveries)?;
        Ok(Self {
            config,
            clock,
            pci,
            guest,
            recoveries,
            saved: None,
        })
    }

    pub fn run(&mut self, steps: &[Step]) -> anyhow::Result<()> {
        for (i, step) in steps.iter().enumerate() {
            self.step(step)
                .with_context(|| format!("step {} ({step:?}) failed", i + 1))?;
        }
        Ok(())
    }

    fn step(&mut self, step: &Step) -> anyhow::Result<()> {
        tracing::debug!(now = ?self.clock.now(), ?step, "running step");
        match step {
            Step::Send(kind) => {
                self.guest.submit_event(*kind)?;
                self.kick();
            }
            Step::Raw(data) => {
                self.guest.submit(data)?;
                self.kick();
            }
            Step::Advance(duration) => {
                self.advance(*duration);
                return Ok(());
            }
            Step::Save => self.save()?,
            Step::Restore => self.restore()?,
            Step::Reset => {
                self.pci.reset();
                // Reset restores re-arming; the host policy applies again.
                self.pci
                    .device_mut()
                    .set_auto_rearm(!self.config.one_shot);
            }
            Step::ReadConfig => {
                let mut data = vec![0; self.pci.device().config_size()];
                self.pci.read_device_config(0, &mut data);
                tracing::info!(?data, "config region");
            }
            Step::WriteConfig { offset, data } => self.pci.write_device_config(*offset, data),
            Step::ExpectRecoveries(expected) => {
                let observed = self.recoveries.lock().len();
                anyhow::ensure!(
                    observed == *expected,
                    "expected {expected} recovery actions, observed {observed}"
                );
            }
        }
        self.turn();
        Ok(())
    }

    fn kick(&mut self) {
        self.pci.queue_notify(COMMAND_QUEUE_INDEX);
        let used = self.guest.take_used();
        tracing::trace!(completed = used.len(), "guest collected used buffers");
    }

    fn advance(&mut self, duration: Duration) {
        let mut remaining = duration;
        while !remaining.is_zero() {
            let tick = remaining.min(self.config.tick);
            self.clock.advance(tick);
            remaining -= tick;
            self.turn();
        }
    }

    /// One event-loop turn.
    fn turn(&mut self) {
        if self.pci.poll_timer() {
            tracing::info!(
                now = ?self.clock.now(),
                recoveries = self.recoveries.lock().len(),
                "watchdog fired"
            );
        }
    }

    fn save(&mut self) -> anyhow::Result<()> {
        let state = self.pci.save();
        if let Some(path) = &self.config.state_file {
            std::fs::write(path, state.encode())
                .with_context(|| format!("failed to write {}", path.display()))?;
        }
        tracing::info!(now = ?self.clock.now(), "saved watchdog state");
        self.saved = Some(state);
        Ok(())
    }

    /// Restores onto a newly realized device whose clock starts again at
    /// zero, as a migration destination would.
    fn restore(&mut self) -> anyhow::Result<()> {
        let state = match &self.config.state_file {
            Some(path) => {
                let data = std::fs::read(path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                SavedStateV1::decode(&data)?
            }
            None => self.saved.context("no saved state to restore")?,
        };

        let clock = VmTimeSource::new();
        let (mut pci, guest) = build(&self.config, &clock, &self.recoveries)?;
        pci.restore(state)?;
        std::mem::replace(&mut self.pci, pci).unrealize();
        self.clock = clock;
        self.guest = guest;
        Ok(())
    }

    pub fn summary(&mut self) -> Summary {
        let device = self.pci.device_mut();
        Summary {
            recoveries: self.recoveries.lock().clone(),
            state: device.state(),
            timeout_secs: device.timeout_secs(),
            stats: device.stats(),
            timed_out: device.platform_mut().read_and_clear_boot_status(),
        }
    }
}

fn build(
    config: &SimConfig,
    clock: &VmTimeSource,
    recoveries: &Arc<Mutex<Vec<WatchdogAction>>>,
) -> anyhow::Result<(VirtioWatchdogPci, GuestRingHandle)> {
    let (guest, ring) = GuestRing::new(QUEUE_SIZE);
    let mut platform = ActionWatchdogPlatform::new(
        config.action,
        Box::new(|action: WatchdogAction| {
            tracing::warn!(%action, "host power request");
        }),
    );
    let platform_action = platform.action();
    platform.add_callback(Box::new({
        let recoveries = recoveries.clone();
        let action = config.action;
        move || recoveries.lock().push(action)
    }));
    let mut pci = VirtioWatchdogPci::realize(
        config.proxy,
        config.device.clone(),
        Box::new(ring),
        Box::new(clock.new_timer()),
        Box::new(platform),
    )
    .context("failed to realize virtio watchdog")?;
    pci.device_mut().set_auto_rearm(!config.one_shot);
    tracing::debug!(
        device_id = pci.device().device_id(),
        action = %platform_action,
        "realized simulated watchdog"
    );
    Ok((pci, guest))
}
