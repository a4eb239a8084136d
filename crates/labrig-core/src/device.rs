//! Device instances and their lifecycle.
//!
//! A device instance is created by an external factory from a two-part
//! configuration (persistent facts established at detection time plus
//! user-settable options). Its behavior surface is declared once, at
//! construction, as a [`DeviceSpec`]: explicit tables of property accessors,
//! methods, capability slots, deprecation aliases, and the ordered list of
//! health checks. Capabilities materialize lazily on first access and are
//! released again by `close()`, which then detaches the instance from its
//! managing registry; a closed instance refuses further use.
//!
//! The device holds only a weak, non-owning handle to its manager. The
//! handle is used for lookup and option-persistence signaling and never
//! extends the manager's lifetime.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::capability::Capability;
use crate::container::{CapabilityContainer, CapabilitySlot};
use crate::deprecation::Alias;
use crate::error::{CheckReadyError, Result, RigError};
use crate::health::HealthCheck;
use crate::properties::{Getter, MethodFn, PropertyEntry, PropertyKind, Setter};
use crate::readiness::{ReadinessPolicy, ReadinessSetting};
use crate::registry::CapabilityRegistry;

/// JSON object used for persistent and optional fact stores.
pub type PropertyMap = serde_json::Map<String, Value>;

// =============================================================================
// Configuration
// =============================================================================

/// Two-part device configuration supplied by the detection collaborator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Immutable facts fixed at detection time (model, serial number, ...).
    #[serde(default)]
    pub persistent: PropertyMap,
    /// User-settable options (alias, hub assignment, ...).
    #[serde(default)]
    pub options: PropertyMap,
    /// Readiness mode driven after creation.
    #[serde(default)]
    pub make_device_ready: ReadinessSetting,
}

impl DeviceConfig {
    /// Required persistent string fact, failing with a config error when
    /// missing or not a string.
    pub fn persistent_str(&self, key: &str) -> Result<&str> {
        self.persistent
            .get(key)
            .and_then(Value::as_str)
            .ok_or_else(|| {
                RigError::Config(format!("missing persistent identifier '{}'", key))
            })
    }
}

// =============================================================================
// Optional-value store
// =============================================================================

/// Mutable store backing the device's optional properties.
pub struct OptionsStore {
    values: Mutex<PropertyMap>,
}

impl OptionsStore {
    /// Creates a store seeded from the configuration's options.
    pub fn new(values: PropertyMap) -> Self {
        Self {
            values: Mutex::new(values),
        }
    }

    /// Current value for `name`, if any.
    pub fn get(&self, name: &str) -> Option<Value> {
        self.values.lock().get(name).cloned()
    }

    /// Writes a value.
    pub fn set(&self, name: &str, value: Value) {
        self.values.lock().insert(name.to_string(), value);
    }

    /// Names of every stored value.
    pub fn keys(&self) -> Vec<String> {
        self.values.lock().keys().cloned().collect()
    }

    /// Copy of the full store.
    pub fn snapshot(&self) -> PropertyMap {
        self.values.lock().clone()
    }
}

// =============================================================================
// Device spec
// =============================================================================

/// Declared behavior surface of one device type.
///
/// Built once per instance by the device type's constructor; every instance
/// of a type carries an identical table.
pub struct DeviceSpec {
    pub(crate) device_type: &'static str,
    pub(crate) properties: BTreeMap<String, PropertyEntry>,
    pub(crate) methods: BTreeMap<String, MethodFn>,
    pub(crate) slots: BTreeMap<String, CapabilitySlot>,
    pub(crate) aliases: BTreeMap<String, Alias>,
    pub(crate) health_checks: Vec<HealthCheck>,
}

impl DeviceSpec {
    /// Starts declaring a device type's surface.
    pub fn builder(device_type: &'static str) -> DeviceSpecBuilder {
        DeviceSpecBuilder {
            spec: DeviceSpec {
                device_type,
                properties: BTreeMap::new(),
                methods: BTreeMap::new(),
                slots: BTreeMap::new(),
                aliases: BTreeMap::new(),
                health_checks: Vec::new(),
            },
        }
    }
}

/// Builder for [`DeviceSpec`].
pub struct DeviceSpecBuilder {
    spec: DeviceSpec,
}

impl DeviceSpecBuilder {
    /// Registers a persistent property computed by `get`.
    pub fn persistent(
        mut self,
        name: &str,
        get: impl Fn() -> Result<Value> + Send + Sync + 'static,
    ) -> Self {
        self.spec.properties.insert(
            name.to_string(),
            PropertyEntry {
                kind: PropertyKind::Persistent,
                get: Arc::new(get),
                set: None,
            },
        );
        self
    }

    /// Registers a persistent property with a fixed value.
    pub fn persistent_value(self, name: &str, value: Value) -> Self {
        self.persistent(name, move || Ok(value.clone()))
    }

    /// Registers a dynamic property computed on each access.
    pub fn dynamic(
        mut self,
        name: &str,
        get: impl Fn() -> Result<Value> + Send + Sync + 'static,
    ) -> Self {
        self.spec.properties.insert(
            name.to_string(),
            PropertyEntry {
                kind: PropertyKind::Dynamic,
                get: Arc::new(get),
                set: None,
            },
        );
        self
    }

    /// Registers a dynamic property with a setter.
    pub fn dynamic_settable(
        mut self,
        name: &str,
        get: impl Fn() -> Result<Value> + Send + Sync + 'static,
        set: impl Fn(Value) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.spec.properties.insert(
            name.to_string(),
            PropertyEntry {
                kind: PropertyKind::Dynamic,
                get: Arc::new(get),
                set: Some(Arc::new(set) as Setter),
            },
        );
        self
    }

    /// Registers an optional (user-settable) property backed by the store.
    pub fn optional(mut self, name: &str, store: &Arc<OptionsStore>) -> Self {
        let store = store.clone();
        let key = name.to_string();
        let get: Getter = Arc::new(move || Ok(store.get(&key).unwrap_or(Value::Null)));
        self.spec.properties.insert(
            name.to_string(),
            PropertyEntry {
                kind: PropertyKind::Optional,
                get,
                set: None,
            },
        );
        self
    }

    /// Registers a device-level method.
    pub fn method(
        mut self,
        name: &str,
        invoke: impl Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
    ) -> Self {
        self.spec.methods.insert(name.to_string(), Arc::new(invoke));
        self
    }

    /// Declares a capability slot.
    pub fn capability(mut self, slot: CapabilitySlot) -> Self {
        self.spec.slots.insert(slot.capability().to_string(), slot);
        self
    }

    /// Registers a forwarding alias for a renamed property.
    pub fn alias_property(mut self, old_name: &str, target: &str) -> Self {
        self.spec
            .aliases
            .insert(old_name.to_string(), Alias::property(target));
        self
    }

    /// Registers a forwarding alias for a renamed method.
    pub fn alias_method(mut self, old_name: &str, target: &str) -> Self {
        self.spec
            .aliases
            .insert(old_name.to_string(), Alias::method(target));
        self
    }

    /// Appends a health check. Order of registration is execution order.
    pub fn health_check(
        mut self,
        name: &'static str,
        run: impl Fn() -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.spec.health_checks.push(HealthCheck::new(name, run));
        self
    }

    /// Finalizes the spec.
    pub fn build(self) -> DeviceSpec {
        self.spec
    }
}

// =============================================================================
// Device core
// =============================================================================

/// State shared by every device type: identity, fact stores, the declared
/// spec, the capability container, and the weak manager handle.
pub struct DeviceCore {
    name: String,
    spec: DeviceSpec,
    persistent: Arc<PropertyMap>,
    options: Arc<OptionsStore>,
    container: CapabilityContainer,
    registry: Arc<CapabilityRegistry>,
    manager: Mutex<Weak<crate::manager::DeviceManager>>,
    closed: AtomicBool,
}

impl DeviceCore {
    /// Creates the core for a new device instance.
    pub fn new(
        name: impl Into<String>,
        spec: DeviceSpec,
        persistent: Arc<PropertyMap>,
        options: Arc<OptionsStore>,
        registry: Arc<CapabilityRegistry>,
        manager: Weak<crate::manager::DeviceManager>,
    ) -> Self {
        let name = name.into();
        tracing::debug!("__init__ called on {}", name);
        Self {
            container: CapabilityContainer::new(name.clone()),
            name,
            spec,
            persistent,
            options,
            registry,
            manager: Mutex::new(manager),
            closed: AtomicBool::new(false),
        }
    }

    /// Unique device name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Device type identifier.
    pub fn device_type(&self) -> &'static str {
        self.spec.device_type
    }

    /// Persistent fact store.
    pub fn persistent(&self) -> &PropertyMap {
        &self.persistent
    }

    /// Optional-value store.
    pub fn options(&self) -> &OptionsStore {
        &self.options
    }

    /// Capability registry used for name resolution.
    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    pub(crate) fn spec(&self) -> &DeviceSpec {
        &self.spec
    }

    /// Whether `close()` has run.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(RigError::Device(format!("{} is closed", self.name)));
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Capability surface
    // -------------------------------------------------------------------------

    /// Canonical names of every capability this device declares.
    pub fn supported_capabilities(&self) -> Vec<String> {
        self.spec.slots.keys().cloned().collect()
    }

    /// Flavor names of every declared capability slot.
    pub fn declared_flavors(&self) -> Vec<String> {
        self.spec
            .slots
            .values()
            .map(|slot| slot.flavor().to_string())
            .collect()
    }

    /// Whether this device supports all of the given capabilities.
    ///
    /// Names may be capability names, interface names, or flavor names, in
    /// any mix; resolution is case-insensitive. An unrecognized name fails
    /// before any matching occurs.
    pub fn has_capabilities<N: AsRef<str>>(&self, names: &[N]) -> Result<bool> {
        self.registry
            .has_capabilities(&self.declared_flavors(), names)
    }

    /// Declared flavors of this device satisfying the given capability name.
    pub fn capability_flavors(&self, name: &str) -> Result<Vec<String>> {
        let target = self.registry.resolve(name)?;
        Ok(self
            .declared_flavors()
            .into_iter()
            .filter(|flavor| self.registry.flavor_satisfies(flavor, &target))
            .collect())
    }

    /// Whether the named capability has been materialized.
    pub fn is_capability_initialized(&self, capability: &str) -> bool {
        self.container.is_initialized(capability)
    }

    /// Returns the live instance for the named capability slot, creating it
    /// on first access.
    pub fn get_capability(&self, capability: &str) -> Result<Arc<dyn Capability>> {
        self.ensure_open()?;
        let slot = self.spec.slots.get(capability).ok_or_else(|| {
            RigError::Device(format!(
                "{} does not support capability '{}'. Supported capabilities: {}",
                self.name,
                capability,
                self.supported_capabilities().join(", ")
            ))
        })?;
        self.container
            .get_or_init(capability, || (slot.construct)())
    }

    /// Resets the named capability if it has been materialized; it will be
    /// re-created on next use.
    pub fn reset_capability(&self, capability: &str) {
        self.container.reset(capability);
    }

    /// Resets every materialized capability of this device.
    pub fn reset_all_capabilities(&self) {
        self.container
            .reset_all(self.spec.slots.keys().map(String::as_str));
    }

    // -------------------------------------------------------------------------
    // Methods
    // -------------------------------------------------------------------------

    /// Invokes a device or capability method by name.
    ///
    /// Resolves deprecation aliases first; dotted names address capability
    /// methods and materialize the owning capability.
    pub fn invoke_method(&self, name: &str, args: &[Value]) -> Result<Value> {
        self.ensure_open()?;
        if let Some(alias) = self.spec.aliases.get(name) {
            crate::deprecation::warn_deprecated(&self.name, name, &alias.target);
            if !alias.is_method {
                return Err(RigError::Device(format!(
                    "{}'s {} is a property, not a method",
                    self.name, name
                )));
            }
            return self.invoke_resolved(&alias.target, args);
        }
        self.invoke_resolved(name, args)
    }

    fn invoke_resolved(&self, name: &str, args: &[Value]) -> Result<Value> {
        if let Some((capability, method)) = name.split_once('.') {
            let slot = self.spec.slots.get(capability).ok_or_else(|| {
                RigError::Device(format!(
                    "{} does not support capability '{}'",
                    self.name, capability
                ))
            })?;
            let invoke = slot.methods.get(method).cloned().ok_or_else(|| {
                RigError::Device(format!("{} has no method '{}'", self.name, name))
            })?;
            let instance = self.get_capability(capability)?;
            return invoke(instance.as_ref(), args);
        }
        let invoke = self
            .spec
            .methods
            .get(name)
            .cloned()
            .ok_or_else(|| RigError::Device(format!("{} has no method '{}'", self.name, name)))?;
        invoke(args)
    }

    // -------------------------------------------------------------------------
    // Readiness & lifecycle
    // -------------------------------------------------------------------------

    /// Runs the device's declared health checks in order, failing fast.
    pub fn check_device_ready(&self) -> Result<()> {
        self.ensure_open()?;
        crate::health::run_health_checks(&self.name, self.spec.device_type, &self.spec.health_checks)
    }

    /// Releases every materialized capability and detaches from the manager.
    ///
    /// Idempotent; the instance is unusable afterwards.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!("close called on {}", self.name);
        self.reset_all_capabilities();
        let manager = {
            let mut guard = self.manager.lock();
            std::mem::replace(&mut *guard, Weak::new())
        };
        if let Some(manager) = manager.upgrade() {
            manager.detach(&self.name);
        }
    }

    /// Writes an optional value and signals the config-persistence
    /// collaborator through the managing registry, if one is attached.
    pub(crate) fn set_option(&self, name: &str, value: Value) -> Result<()> {
        self.options.set(name, value.clone());
        if let Some(manager) = self.manager.lock().upgrade() {
            manager.persist_option(&self.name, name, &value)?;
        }
        Ok(())
    }
}

// =============================================================================
// Managed device trait
// =============================================================================

/// Behavior every device type provides on top of [`DeviceCore`].
///
/// `recover` is the device-supplied remediation hook: given a readiness
/// failure it either fixes the underlying condition (typically through a
/// [`RecoveryDispatcher`](crate::recovery::RecoveryDispatcher)) or re-raises
/// the error unchanged. `supports_reflash`/`reflash` back the
/// `OnWithReflash` readiness setting for device types that can rewrite their
/// firmware.
pub trait ManagedDevice: Send + Sync + 'static {
    /// Shared device state.
    fn core(&self) -> &DeviceCore;

    /// Attempts to remediate a readiness failure.
    ///
    /// The default re-raises the error unchanged (no recovery defined).
    fn recover(&self, error: CheckReadyError) -> Result<()> {
        Err(error.into())
    }

    /// Whether this device can reflash its firmware.
    fn supports_reflash(&self) -> bool {
        false
    }

    /// Reflashes the device firmware.
    fn reflash(&self) -> Result<()> {
        Err(RigError::Device(format!(
            "{} does not support reflashing",
            self.core().name()
        )))
    }

    /// Runs the device's health checks in order, failing fast.
    fn check_device_ready(&self) -> Result<()> {
        self.core().check_device_ready()
    }

    /// Checks device readiness and recovers if the setting allows it, with
    /// the default recovery bound.
    fn make_device_ready(&self, setting: ReadinessSetting) -> Result<()> {
        crate::readiness::make_device_ready(self, setting, &ReadinessPolicy::default())
    }

    /// Like [`ManagedDevice::make_device_ready`] with an explicit policy.
    fn make_device_ready_with_policy(
        &self,
        setting: ReadinessSetting,
        policy: &ReadinessPolicy,
    ) -> Result<()> {
        crate::readiness::make_device_ready(self, setting, policy)
    }

    /// Closes the device.
    fn close(&self) {
        self.core().close();
    }
}

impl std::fmt::Debug for dyn ManagedDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedDevice")
            .field("name", &self.core().name())
            .finish()
    }
}
