//! Simulated USB mass-storage exclusivity
//!
//! On hardware the volume belongs either to the USB host or to the device.
//! Here the "host" is toggled from the console (`usb mount` / `usb eject`)
//! or the `--usb-mounted` flag.

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::info;
use webflow_core::MassStorageLock;

#[derive(Debug, Default)]
struct State {
    host_mounted: bool,
    web_held: bool,
}

/// Shared handle; clones see the same lock
#[derive(Debug, Clone, Default)]
pub struct UsbLock {
    state: Arc<Mutex<State>>,
}

impl UsbLock {
    pub fn new(host_mounted: bool) -> Self {
        let lock = Self::default();
        lock.state.lock().host_mounted = host_mounted;
        lock
    }

    /// Mount or eject the volume on the simulated host. Mounting fails
    /// while a web write holds the volume.
    pub fn set_host_mounted(&self, mounted: bool) -> bool {
        let mut state = self.state.lock();
        if mounted && state.web_held {
            return false;
        }
        if state.host_mounted != mounted {
            info!(mounted, "USB host");
        }
        state.host_mounted = mounted;
        true
    }

    pub fn host_mounted(&self) -> bool {
        self.state.lock().host_mounted
    }

    pub fn web_held(&self) -> bool {
        self.state.lock().web_held
    }
}

impl MassStorageLock for UsbLock {
    fn try_acquire(&self) -> bool {
        let mut state = self.state.lock();
        if state.host_mounted || state.web_held {
            return false;
        }
        state.web_held = true;
        true
    }

    fn release(&self) {
        self.state.lock().web_held = false;
    }
}
