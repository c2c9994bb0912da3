// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Platform hooks invoked on watchdog expiry.

/// Host hook run when a watchdog expires.
///
/// Any function that can be called repeatedly works as a callback.
pub trait WatchdogCallback: Send + Sync {
    /// Called once per expiry.
    fn on_timeout(&self);
}

impl<F: Fn() + Send + Sync> WatchdogCallback for F {
    fn on_timeout(&self) {
        (self)()
    }
}

/// Platform hooks required by the watchdog device.
///
/// The device calls [`WatchdogPlatform::on_timeout`] exactly once per expiry
/// and does not inspect the outcome. The recovery action may affect the whole
/// VM, not just the device.
pub trait WatchdogPlatform: Send {
    /// Callback fired when the timer expires.
    fn on_timeout(&mut self);

    /// Check if the watchdog previously timed-out, clearing the bit in the
    /// process.
    fn read_and_clear_boot_status(&mut self) -> bool;

    /// Add a callback, which executes when the watchdog times out
    fn add_callback(&mut self, cb: Box<dyn WatchdogCallback>);
}

/// A simple implementation of [`WatchdogPlatform`], suitable for ephemeral VMs.
pub struct SimpleWatchdogPlatform {
    /// Whether the watchdog has timed out or not.
    watchdog_status: bool,
    /// Callbacks to execute when the watchdog times out.
    callbacks: Vec<Box<dyn WatchdogCallback>>,
}

impl SimpleWatchdogPlatform {
    /// Creates a platform that runs `on_timeout` on every expiry.
    pub fn new(on_timeout: Box<dyn WatchdogCallback>) -> Self {
        SimpleWatchdogPlatform {
            watchdog_status: false,
            callbacks: vec![on_timeout],
        }
    }
}

impl WatchdogPlatform for SimpleWatchdogPlatform {
    fn on_timeout(&mut self) {
        self.watchdog_status = true;
        for cb in &self.callbacks {
            cb.on_timeout();
        }
    }

    fn read_and_clear_boot_status(&mut self) -> bool {
        std::mem::take(&mut self.watchdog_status)
    }

    fn add_callback(&mut self, cb: Box<dyn WatchdogCallback>) {
        self.callbacks.push(cb);
    }
}
