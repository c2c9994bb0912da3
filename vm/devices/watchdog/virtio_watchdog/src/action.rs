// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Host-selected recovery actions.

use crate::platform::WatchdogCallback;
use crate::platform::WatchdogPlatform;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// What the host does to the VM when the watchdog expires.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum WatchdogAction {
    /// Hard-reset the VM.
    #[default]
    Reset,
    /// Request an orderly guest shutdown.
    Shutdown,
    /// Power the VM off immediately.
    Poweroff,
    /// Pause the VM for inspection.
    Pause,
    /// Log the expiry and continue.
    Debug,
    /// Do nothing.
    None,
    /// Deliver an NMI to the guest.
    InjectNmi,
}

impl WatchdogAction {
    /// All actions, in the order they are listed to users.
    pub const ALL: [Self; 7] = [
        Self::Reset,
        Self::Shutdown,
        Self::Poweroff,
        Self::Pause,
        Self::Debug,
        Self::None,
        Self::InjectNmi,
    ];

    /// The user-facing name of the action.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reset => "reset",
            Self::Shutdown => "shutdown",
            Self::Poweroff => "poweroff",
            Self::Pause => "pause",
            Self::Debug => "debug",
            Self::None => "none",
            Self::InjectNmi => "inject-nmi",
        }
    }

    /// Whether the action needs the VM's power state to change.
    pub fn needs_power_request(&self) -> bool {
        !matches!(self, Self::Debug | Self::None)
    }
}

impl fmt::Display for WatchdogAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// An unrecognized action name.
#[derive(Debug, Error)]
#[error("unknown watchdog action '{0}'")]
pub struct UnknownWatchdogAction(String);

impl FromStr for WatchdogAction {
    type Err = UnknownWatchdogAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|action| action.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownWatchdogAction(s.to_owned()))
    }
}

/// Receives the recovery action chosen by the host.
pub trait PowerRequestHandler: Send {
    /// Carries out `action` against the VM.
    fn power_request(&mut self, action: WatchdogAction);
}

impl<F: FnMut(WatchdogAction) + Send> PowerRequestHandler for F {
    fn power_request(&mut self, action: WatchdogAction) {
        (self)(action)
    }
}

/// A [`WatchdogPlatform`] that carries out a fixed, host-configured
/// [`WatchdogAction`] on expiry.
pub struct ActionWatchdogPlatform {
    action: WatchdogAction,
    handler: Box<dyn PowerRequestHandler>,
    timed_out: bool,
    callbacks: Vec<Box<dyn WatchdogCallback>>,
}

impl ActionWatchdogPlatform {
    /// Creates a platform performing `action` through `handler`.
    pub fn new(action: WatchdogAction, handler: Box<dyn PowerRequestHandler>) -> Self {
        Self {
            action,
            handler,
            timed_out: false,
            callbacks: Vec::new(),
        }
    }

    /// The configured action.
    pub fn action(&self) -> WatchdogAction {
        self.action
    }

    /// Changes the action taken on subsequent expiries.
    pub fn set_action(&mut self, action: WatchdogAction) {
        self.action = action;
    }
}

impl WatchdogPlatform for ActionWatchdogPlatform {
    fn on_timeout(&mut self) {
        self.timed_out = true;
        tracing::warn!(action = %self.action, "watchdog timer expired");
        if self.action.needs_power_request() {
            self.handler.power_request(self.action);
        }
        for callback in &self.callbacks {
            callback.on_timeout();
        }
    }

    fn read_and_clear_boot_status(&mut self) -> bool {
        std::mem::take(&mut self.timed_out)
    }

    fn add_callback(&mut self, cb: Box<dyn WatchdogCallback>) {
        self.callbacks.push(cb);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::init_tracing;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn parse_names() {
        for action in WatchdogAction::ALL {
            assert_eq!(action.as_str().parse::<WatchdogAction>().unwrap(), action);
        }
        assert_eq!(
            "Inject-NMI".parse::<WatchdogAction>().unwrap(),
            WatchdogAction::InjectNmi
        );
        assert!("reboot".parse::<WatchdogAction>().is_err());
    }

    #[test]
    fn forwards_power_requests() {
        init_tracing();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let mut platform = ActionWatchdogPlatform::new(
            WatchdogAction::Poweroff,
            Box::new({
                let requests = requests.clone();
                move |action: WatchdogAction| requests.lock().push(action)
            }),
        );
        platform.on_timeout();
        platform.set_action(WatchdogAction::Debug);
        assert_eq!(platform.action(), WatchdogAction::Debug);
        platform.on_timeout();

        assert_eq!(*requests.lock(), [WatchdogAction::Poweroff]);
        assert!(platform.read_and_clear_boot_status());
    }
}
