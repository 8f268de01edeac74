//! Scoped monitor mode

use super::InterfaceController;

/// Holds an interface in monitor mode until released or dropped.
///
/// Dropping the guard restores managed mode, so early returns and panics on
/// the capture path still hand the interface back.
#[derive(Debug)]
pub struct MonitorModeGuard {
    controller: InterfaceController,
    interface: String,
    active: bool,
}

impl MonitorModeGuard {
    /// Switch `interface` to monitor mode.
    ///
    /// The guard is returned even when a step failed; the interface may still
    /// capture and must be restored either way.
    pub fn acquire(controller: InterfaceController, interface: impl Into<String>) -> Self {
        let interface = interface.into();
        if !controller.enter_monitor_mode(&interface) {
            log::warn!("{} may not be in monitor mode", interface);
        }
        Self {
            controller,
            interface,
            active: true,
        }
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn controller(&self) -> &InterfaceController {
        &self.controller
    }

    /// Restore managed mode now
    pub fn release(mut self) -> bool {
        self.restore()
    }

    fn restore(&mut self) -> bool {
        if !self.active {
            return true;
        }
        self.active = false;
        self.controller.enter_managed_mode(&self.interface)
    }
}

impl Drop for MonitorModeGuard {
    fn drop(&mut self) {
        if self.active {
            log::debug!("Restoring {} on drop", self.interface);
            self.restore();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phy::tests::RecordingLink;
    use std::sync::Arc;
    use std::time::Duration;

    fn controller(link: &Arc<RecordingLink>) -> InterfaceController {
        InterfaceController::new(link.clone()).with_settle_delay(Duration::ZERO)
    }

    #[test]
    fn test_release_restores_managed_once() {
        let link = Arc::new(RecordingLink::default());
        let guard = MonitorModeGuard::acquire(controller(&link), "wlan1");
        assert_eq!(guard.interface(), "wlan1");
        assert!(guard.release());

        let calls = link.calls.lock().unwrap();
        assert_eq!(calls.iter().filter(|c| c.contains("managed")).count(), 1);
        assert_eq!(calls.last().map(String::as_str), Some("up wlan1"));
    }

    #[test]
    fn test_drop_restores_managed() {
        let link = Arc::new(RecordingLink::default());
        {
            let _guard = MonitorModeGuard::acquire(controller(&link), "wlan1");
        }
        let calls = link.calls.lock().unwrap();
        assert_eq!(calls[1], "type wlan1 monitor");
        assert_eq!(calls[4], "type wlan1 managed");
    }

    #[test]
    fn test_restore_runs_after_failed_acquire() {
        let link = Arc::new(RecordingLink {
            fail: vec!["type wlan1 monitor"],
            ..Default::default()
        });
        drop(MonitorModeGuard::acquire(controller(&link), "wlan1"));
        assert!(link.calls.lock().unwrap().iter().any(|c| c == "type wlan1 managed"));
    }
}
