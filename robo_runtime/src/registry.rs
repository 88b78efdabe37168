//! Device registry.
//!
//! Owns the set of live devices and applies robot-wide enable state to them.
//! Holds no scheduling logic; lock ownership lives in the action engine's
//! lock table, keyed by [`DeviceId`].
//!
//! Constructed by the robot and shared through `Arc`. No global state.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use parking_lot::RwLock;
use robo_common::device::{Device, DeviceFlags, DeviceId};
use tracing::{debug, warn};

/// Anything an action can lock.
pub trait Lockable {
    fn device_id(&self) -> DeviceId;
    fn device_name(&self) -> &str;
}

/// Typed handle to a registered device.
pub struct DeviceHandle<D: ?Sized> {
    id: DeviceId,
    device: Arc<D>,
}

impl<D: ?Sized> DeviceHandle<D> {
    #[inline]
    pub fn id(&self) -> DeviceId {
        self.id
    }

    /// Shared pointer to the device, e.g. for coercion to a capability object.
    pub fn arc(&self) -> Arc<D> {
        Arc::clone(&self.device)
    }
}

impl<D: ?Sized> Clone for DeviceHandle<D> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            device: Arc::clone(&self.device),
        }
    }
}

impl<D: ?Sized> Deref for DeviceHandle<D> {
    type Target = D;

    fn deref(&self) -> &D {
        &self.device
    }
}

impl<D: Device + ?Sized> Lockable for DeviceHandle<D> {
    fn device_id(&self) -> DeviceId {
        self.id
    }

    fn device_name(&self) -> &str {
        self.device.name()
    }
}

impl<D: Device + ?Sized> fmt::Debug for DeviceHandle<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("id", &self.id)
            .field("name", &self.device.name())
            .finish()
    }
}

/// Registry of live devices.
#[derive(Default)]
pub struct DeviceRegistry {
    devices: RwLock<BTreeMap<DeviceId, Arc<dyn Device>>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a device and return its typed handle.
    pub fn register<D: Device + 'static>(&self, device: D) -> DeviceHandle<D> {
        self.register_arc(Arc::new(device))
    }

    pub fn register_arc<D: Device + 'static>(&self, device: Arc<D>) -> DeviceHandle<D> {
        let id = DeviceId::next();
        debug!(device = device.name(), %id, "device registered");
        self.devices
            .write()
            .insert(id, Arc::clone(&device) as Arc<dyn Device>);
        DeviceHandle { id, device }
    }

    /// Remove a device. Returns it if it was registered.
    pub fn unregister(&self, id: DeviceId) -> Option<Arc<dyn Device>> {
        self.devices.write().remove(&id)
    }

    pub fn contains(&self, id: DeviceId) -> bool {
        self.devices.read().contains_key(&id)
    }

    pub fn get(&self, id: DeviceId) -> Option<Arc<dyn Device>> {
        self.devices.read().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.devices.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.read().is_empty()
    }

    /// Snapshot so device callbacks run without the registry lock held.
    fn snapshot(&self) -> Vec<Arc<dyn Device>> {
        self.devices.read().values().cloned().collect()
    }

    /// Robot enabled: enable every device that follows robot state.
    pub fn enable_matching(&self) {
        for device in self.snapshot() {
            if device.flags().contains(DeviceFlags::MATCHES_ROBOT_STATE) {
                device.enable();
            }
        }
    }

    /// Robot disabled: disable every device that follows robot state.
    pub fn disable_matching(&self) {
        for device in self.snapshot() {
            if device.flags().contains(DeviceFlags::MATCHES_ROBOT_STATE) {
                device.disable();
            }
        }
    }

    pub fn disable_all(&self) {
        for device in self.snapshot() {
            device.disable();
        }
    }

    /// Watchdog trip: disable watchdog-governed devices. Returns how many
    /// devices changed state.
    pub fn watchdog_disable(&self) -> usize {
        let mut count = 0;
        for device in self.snapshot() {
            if device.flags().contains(DeviceFlags::DISABLES_WITH_WATCHDOG) && device.is_enabled() {
                warn!(device = device.name(), "device disabled by watchdog");
                device.disable();
                count += 1;
            }
        }
        count
    }

    /// Watchdog fed after a trip: re-enable watchdog-governed devices that
    /// do not follow robot state, or all of them while the robot is enabled.
    pub fn watchdog_recover(&self, robot_enabled: bool) {
        for device in self.snapshot() {
            let flags = device.flags();
            if !device.is_enabled()
                && flags.contains(DeviceFlags::DISABLES_WITH_WATCHDOG)
                && (robot_enabled || !flags.contains(DeviceFlags::MATCHES_ROBOT_STATE))
            {
                device.enable();
            }
        }
    }
}
