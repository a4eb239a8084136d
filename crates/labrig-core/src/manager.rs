//! Composition root: device factories, open-device bookkeeping, and the
//! config-persistence seam.
//!
//! The manager owns the capability registry and the open-device table.
//! Device factories are registered once at startup; `create_device` builds
//! an instance, registers it, then drives `make_device_ready` with the
//! setting from the device's configuration. Devices receive only a weak
//! handle to the manager and detach themselves from the table when closed,
//! so the manager's lifetime is never extended by its devices.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use serde_json::Value;

use crate::device::{DeviceConfig, ManagedDevice};
use crate::error::{Result, RigError};
use crate::registry::CapabilityRegistry;

/// External collaborator persisting optional property writes (e.g. to a
/// device-options file).
pub trait OptionsPersister: Send + Sync {
    /// Records one optional property value for a device.
    fn save_property(&self, device_name: &str, prop: &str, value: &Value) -> Result<()>;
}

/// Creates device instances of one device type.
pub trait DeviceFactory: Send + Sync {
    /// Device type identifier matched against creation requests.
    fn device_type(&self) -> &'static str;

    /// Device-type-specific connection classifier: whether a device with
    /// this configuration is currently visible from the host.
    fn is_connected(&self, config: &DeviceConfig) -> Result<bool>;

    /// Builds a device instance. The factory opens whatever collaborators
    /// the device needs (transports, etc.) and hands the instance a weak
    /// reference to the manager.
    fn build(
        &self,
        manager: &Arc<DeviceManager>,
        config: DeviceConfig,
    ) -> Result<Arc<dyn ManagedDevice>>;
}

/// Process-level device registry and factory table.
pub struct DeviceManager {
    self_handle: Weak<DeviceManager>,
    registry: Arc<CapabilityRegistry>,
    factories: RwLock<BTreeMap<&'static str, Arc<dyn DeviceFactory>>>,
    open_devices: RwLock<BTreeMap<String, Arc<dyn ManagedDevice>>>,
    persister: RwLock<Option<Arc<dyn OptionsPersister>>>,
}

impl DeviceManager {
    /// Creates a manager around a built capability registry.
    pub fn new(registry: Arc<CapabilityRegistry>) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            self_handle: weak.clone(),
            registry,
            factories: RwLock::new(BTreeMap::new()),
            open_devices: RwLock::new(BTreeMap::new()),
            persister: RwLock::new(None),
        })
    }

    /// Capability registry shared with devices.
    pub fn registry(&self) -> Arc<CapabilityRegistry> {
        self.registry.clone()
    }

    /// Attaches the config-persistence collaborator.
    pub fn set_persister(&self, persister: Arc<dyn OptionsPersister>) {
        *self.persister.write() = Some(persister);
    }

    /// Registers a device factory.
    pub fn register_factory(&self, factory: Arc<dyn DeviceFactory>) {
        self.factories.write().insert(factory.device_type(), factory);
    }

    /// Whether a device with this configuration is currently visible from
    /// the host, per the device type's classifier.
    pub fn is_device_connected(&self, device_type: &str, config: &DeviceConfig) -> Result<bool> {
        self.factory(device_type)?.is_connected(config)
    }

    /// Builds, registers, and readies a device instance.
    ///
    /// The readiness setting comes from the device's configuration. If
    /// readiness fails, the device is closed (and deregistered) before the
    /// error propagates.
    pub fn create_device(
        &self,
        device_type: &str,
        config: DeviceConfig,
    ) -> Result<Arc<dyn ManagedDevice>> {
        let this = self
            .self_handle
            .upgrade()
            .ok_or_else(|| RigError::Device("device manager is shutting down".into()))?;
        let factory = self.factory(device_type)?;
        let setting = config.make_device_ready;
        let device = factory.build(&this, config)?;
        let name = device.core().name().to_string();
        self.open_devices.write().insert(name, device.clone());
        if let Err(err) = device.make_device_ready(setting) {
            device.close();
            return Err(err);
        }
        Ok(device)
    }

    /// Live device by name, if open.
    pub fn device(&self, name: &str) -> Option<Arc<dyn ManagedDevice>> {
        self.open_devices.read().get(name).cloned()
    }

    /// Whether a device with this name is currently open.
    pub fn is_open(&self, name: &str) -> bool {
        self.open_devices.read().contains_key(name)
    }

    /// Names of every open device.
    pub fn open_device_names(&self) -> Vec<String> {
        self.open_devices.read().keys().cloned().collect()
    }

    /// Closes every open device.
    pub fn close_all(&self) {
        let devices: Vec<Arc<dyn ManagedDevice>> =
            self.open_devices.read().values().cloned().collect();
        for device in devices {
            device.close();
        }
    }

    pub(crate) fn detach(&self, name: &str) {
        self.open_devices.write().remove(name);
    }

    pub(crate) fn persist_option(&self, device: &str, prop: &str, value: &Value) -> Result<()> {
        if let Some(persister) = self.persister.read().clone() {
            persister.save_property(device, prop, value)?;
        }
        Ok(())
    }

    fn factory(&self, device_type: &str) -> Result<Arc<dyn DeviceFactory>> {
        let factories = self.factories.read();
        if let Some(factory) = factories.get(device_type) {
            return Ok(factory.clone());
        }
        let known = factories.keys().copied().collect::<Vec<_>>().join(", ");
        Err(RigError::Config(format!(
            "unknown device type '{}'. Registered device types: {}",
            device_type, known
        )))
    }
}
