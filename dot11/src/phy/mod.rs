//! Interface mode and channel control
//!
//! Capturing every over-the-air frame requires the wireless interface to be in
//! monitor mode. The controller here toggles between monitor and managed mode
//! and pins the radio to a channel. All operations are best-effort: failures
//! are logged and the caller decides whether capture can still proceed.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub mod monitor_mode;

pub use monitor_mode::MonitorModeGuard;

/// Default pause after bringing the interface back up
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(200);

/// Errors that can occur in PHY operations
#[derive(Error, Debug)]
pub enum PhyError {
    #[error("Command `{command}` failed with status {status:?}")]
    CommandFailed { command: String, status: Option<i32> },

    #[error("Failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid channel: {channel}")]
    InvalidChannel { channel: u16 },
}

/// Operating mode of a wireless interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceMode {
    Managed,
    Monitor,
}

impl InterfaceMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            InterfaceMode::Managed => "managed",
            InterfaceMode::Monitor => "monitor",
        }
    }
}

impl fmt::Display for InterfaceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Check that `channel` is a 2.4 GHz (1-14) or 5 GHz (32-177) channel number
pub fn validate_channel(channel: u16) -> Result<u16, PhyError> {
    match channel {
        1..=14 | 32..=177 => Ok(channel),
        _ => Err(PhyError::InvalidChannel { channel }),
    }
}

/// Low-level link operations, one OS call each
pub trait LinkControl: Send + Sync {
    /// Bring the link administratively up or down
    fn set_link_up(&self, interface: &str, up: bool) -> Result<(), PhyError>;

    /// Change the interface type
    fn set_mode(&self, interface: &str, mode: InterfaceMode) -> Result<(), PhyError>;

    /// Tune the radio to a channel
    fn set_channel(&self, interface: &str, channel: u16) -> Result<(), PhyError>;
}

/// [`LinkControl`] backed by the `ip` and `iw` utilities
#[derive(Debug, Clone)]
pub struct IwLinkControl {
    ip_program: String,
    iw_program: String,
}

impl Default for IwLinkControl {
    fn default() -> Self {
        Self {
            ip_program: "ip".to_string(),
            iw_program: "iw".to_string(),
        }
    }
}

impl IwLinkControl {
    pub fn new() -> Self {
        Self::default()
    }

    fn run(&self, program: &str, args: &[&str]) -> Result<(), PhyError> {
        let command = format!("{} {}", program, args.join(" "));
        log::debug!("Running {}", command);

        let status = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|source| PhyError::Spawn { command: command.clone(), source })?;

        if status.success() {
            Ok(())
        } else {
            Err(PhyError::CommandFailed { command, status: status.code() })
        }
    }
}

impl LinkControl for IwLinkControl {
    fn set_link_up(&self, interface: &str, up: bool) -> Result<(), PhyError> {
        let state = if up { "up" } else { "down" };
        self.run(&self.ip_program, &["link", "set", interface, state])
    }

    fn set_mode(&self, interface: &str, mode: InterfaceMode) -> Result<(), PhyError> {
        self.run(&self.iw_program, &["dev", interface, "set", "type", mode.as_str()])
    }

    fn set_channel(&self, interface: &str, channel: u16) -> Result<(), PhyError> {
        let channel = validate_channel(channel)?.to_string();
        self.run(&self.iw_program, &["dev", interface, "set", "channel", &channel])
    }
}

/// Best-effort interface mode switching over a [`LinkControl`]
#[derive(Clone)]
pub struct InterfaceController {
    link: Arc<dyn LinkControl>,
    settle_delay: Duration,
}

impl fmt::Debug for InterfaceController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterfaceController")
            .field("settle_delay", &self.settle_delay)
            .finish_non_exhaustive()
    }
}

impl InterfaceController {
    pub fn new(link: Arc<dyn LinkControl>) -> Self {
        Self {
            link,
            settle_delay: DEFAULT_SETTLE_DELAY,
        }
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Put the interface in monitor mode. Returns whether every step succeeded.
    pub fn enter_monitor_mode(&self, interface: &str) -> bool {
        self.switch_mode(interface, InterfaceMode::Monitor)
    }

    /// Put the interface back in managed mode. Returns whether every step succeeded.
    pub fn enter_managed_mode(&self, interface: &str) -> bool {
        self.switch_mode(interface, InterfaceMode::Managed)
    }

    /// Down, change type, up, settle. Every step is attempted even if an
    /// earlier one failed so the interface is never left down.
    fn switch_mode(&self, interface: &str, mode: InterfaceMode) -> bool {
        log::info!("Switching {} to {} mode", interface, mode);

        let steps = [
            self.link.set_link_up(interface, false),
            self.link.set_mode(interface, mode),
            self.link.set_link_up(interface, true),
        ];

        let mut ok = true;
        for result in steps {
            if let Err(e) = result {
                log::warn!("{} mode switch on {}: {}", mode, interface, e);
                ok = false;
            }
        }

        self.settle();
        ok
    }

    fn settle(&self) {
        if !self.settle_delay.is_zero() {
            std::thread::sleep(self.settle_delay);
        }
    }

    /// Pin the radio to `channel`. On failure the driver keeps whatever
    /// channel it was on. Waits the settle delay either way.
    pub fn set_channel(&self, interface: &str, channel: u16) -> bool {
        let ok = match self.link.set_channel(interface, channel) {
            Ok(()) => {
                log::info!("{} fixed to channel {}", interface, channel);
                true
            }
            Err(e) => {
                log::warn!("Could not set {} to channel {}: {}", interface, channel, e);
                false
            }
        };
        self.settle();
        ok
    }
}
