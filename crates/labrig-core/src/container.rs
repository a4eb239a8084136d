//! Lazy, per-device capability instantiation.
//!
//! Each device instance owns one [`CapabilityContainer`]. The container
//! constructs at most one instance of each declared capability flavor,
//! caches it until reset, and calls each instance's `close()` exactly once
//! when it is evicted.
//!
//! # Caller Contract
//!
//! Lifecycle operations are not internally synchronized beyond what `&self`
//! access requires: callers must not invoke `get_or_init` and `reset` for
//! the same capability name concurrently from multiple threads. Constructors
//! run outside the cache lock, so a racing pair of `get_or_init` calls for
//! one name could construct twice (only one instance is kept). This is a
//! documented caller obligation, matching the single-logical-thread model of
//! the framework.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::capability::Capability;
use crate::error::Result;
use crate::properties::{CapMethodFn, CapSetter, PropertyKind, SlotPropertyEntry};

// =============================================================================
// Slot declarations
// =============================================================================

/// Constructor for a capability slot's flavor instance.
pub type SlotConstructor = Arc<dyn Fn() -> Result<Arc<dyn Capability>> + Send + Sync>;

/// Declaration of one capability slot of a device type: the canonical
/// capability name it is reachable under, the concrete flavor filling it,
/// the constructor invoked on first access, and the flavor's property and
/// method tables.
pub struct CapabilitySlot {
    pub(crate) capability: String,
    pub(crate) flavor: String,
    pub(crate) construct: SlotConstructor,
    pub(crate) properties: BTreeMap<String, SlotPropertyEntry>,
    pub(crate) methods: BTreeMap<String, CapMethodFn>,
}

impl CapabilitySlot {
    /// Starts building a slot declaration.
    pub fn builder(
        capability: impl Into<String>,
        flavor: impl Into<String>,
        construct: impl Fn() -> Result<Arc<dyn Capability>> + Send + Sync + 'static,
    ) -> CapabilitySlotBuilder {
        CapabilitySlotBuilder {
            slot: CapabilitySlot {
                capability: capability.into(),
                flavor: flavor.into(),
                construct: Arc::new(construct),
                properties: BTreeMap::new(),
                methods: BTreeMap::new(),
            },
        }
    }

    /// Canonical capability name this slot is reachable under.
    pub fn capability(&self) -> &str {
        &self.capability
    }

    /// Name of the concrete flavor filling this slot.
    pub fn flavor(&self) -> &str {
        &self.flavor
    }
}

/// Builder for [`CapabilitySlot`].
pub struct CapabilitySlotBuilder {
    slot: CapabilitySlot,
}

impl CapabilitySlotBuilder {
    /// Registers a persistent property of the flavor.
    pub fn persistent(
        mut self,
        name: &str,
        get: impl Fn(&dyn Capability) -> Result<serde_json::Value> + Send + Sync + 'static,
    ) -> Self {
        self.slot.properties.insert(
            name.to_string(),
            SlotPropertyEntry {
                kind: PropertyKind::Persistent,
                get: Arc::new(get),
                set: None,
            },
        );
        self
    }

    /// Registers a dynamic property of the flavor.
    pub fn dynamic(
        mut self,
        name: &str,
        get: impl Fn(&dyn Capability) -> Result<serde_json::Value> + Send + Sync + 'static,
    ) -> Self {
        self.slot.properties.insert(
            name.to_string(),
            SlotPropertyEntry {
                kind: PropertyKind::Dynamic,
                get: Arc::new(get),
                set: None,
            },
        );
        self
    }

    /// Registers a dynamic property of the flavor with a setter.
    pub fn dynamic_settable(
        mut self,
        name: &str,
        get: impl Fn(&dyn Capability) -> Result<serde_json::Value> + Send + Sync + 'static,
        set: impl Fn(&dyn Capability, serde_json::Value) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.slot.properties.insert(
            name.to_string(),
            SlotPropertyEntry {
                kind: PropertyKind::Dynamic,
                get: Arc::new(get),
                set: Some(Arc::new(set) as CapSetter),
            },
        );
        self
    }

    /// Registers a method of the flavor, reachable through
    /// `invoke_method("capability.method", ...)` and deprecation aliases.
    pub fn method(
        mut self,
        name: &str,
        invoke: impl Fn(&dyn Capability, &[serde_json::Value]) -> Result<serde_json::Value>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.slot.methods.insert(name.to_string(), Arc::new(invoke));
        self
    }

    /// Finalizes the slot declaration.
    pub fn build(self) -> CapabilitySlot {
        self.slot
    }
}

// =============================================================================
// Container
// =============================================================================

/// Per-device cache of live capability instances.
pub struct CapabilityContainer {
    device_name: String,
    instances: Mutex<BTreeMap<String, Arc<dyn Capability>>>,
}

impl CapabilityContainer {
    /// Creates an empty container for the named device.
    pub fn new(device_name: impl Into<String>) -> Self {
        Self {
            device_name: device_name.into(),
            instances: Mutex::new(BTreeMap::new()),
        }
    }

    /// Returns the cached instance for `name`, constructing it on first
    /// access. Subsequent calls return the identical instance until reset.
    pub fn get_or_init(
        &self,
        name: &str,
        init: impl FnOnce() -> Result<Arc<dyn Capability>>,
    ) -> Result<Arc<dyn Capability>> {
        if let Some(existing) = self.instances.lock().get(name) {
            return Ok(existing.clone());
        }
        let created = init()?;
        tracing::debug!("{} initialized capability {}", self.device_name, name);
        let mut instances = self.instances.lock();
        Ok(instances
            .entry(name.to_string())
            .or_insert(created)
            .clone())
    }

    /// Whether a capability instance has been materialized for `name`.
    pub fn is_initialized(&self, name: &str) -> bool {
        self.instances.lock().contains_key(name)
    }

    /// Names of every materialized capability.
    pub fn initialized_names(&self) -> Vec<String> {
        self.instances.lock().keys().cloned().collect()
    }

    /// Resets the capability if it has been materialized.
    ///
    /// Calls the instance's `close()` exactly once, then evicts it from the
    /// cache; the next `get_or_init` constructs a fresh instance.
    pub fn reset(&self, name: &str) {
        let removed = self.instances.lock().remove(name);
        if let Some(instance) = removed {
            tracing::debug!("{} resetting capability {}", self.device_name, name);
            instance.close();
        }
    }

    /// Applies [`CapabilityContainer::reset`] to each given capability name.
    ///
    /// The order is unspecified; capabilities must not depend on the reset
    /// ordering of siblings.
    pub fn reset_all<'a>(&self, names: impl IntoIterator<Item = &'a str>) {
        for name in names {
            self.reset(name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::any::Any;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingCapability {
        device_name: String,
        closes: Arc<AtomicUsize>,
    }

    impl Capability for CountingCapability {
        fn device_name(&self) -> &str {
            &self.device_name
        }

        fn close(&self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
            self
        }
    }

    fn make(closes: &Arc<AtomicUsize>) -> Arc<dyn Capability> {
        Arc::new(CountingCapability {
            device_name: "hub-1234".into(),
            closes: closes.clone(),
        })
    }

    #[test]
    fn test_get_or_init_is_idempotent() {
        let container = CapabilityContainer::new("hub-1234");
        let closes = Arc::new(AtomicUsize::new(0));
        let builds = Arc::new(AtomicUsize::new(0));

        let first = container
            .get_or_init("switch_power", || {
                builds.fetch_add(1, Ordering::SeqCst);
                Ok(make(&closes))
            })
            .unwrap();
        let second = container
            .get_or_init("switch_power", || {
                builds.fetch_add(1, Ordering::SeqCst);
                Ok(make(&closes))
            })
            .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert!(container.is_initialized("switch_power"));
        assert!(!container.is_initialized("file_transfer"));
    }

    #[test]
    fn test_constructor_failure_is_not_cached() {
        let container = CapabilityContainer::new("hub-1234");
        let err = container
            .get_or_init("switch_power", || {
                Err(crate::error::RigError::Device("port in use".into()))
            })
            .unwrap_err();
        assert!(err.to_string().contains("port in use"));
        assert!(!container.is_initialized("switch_power"));
    }

    #[test]
    fn test_reset_closes_exactly_once_and_recreates() {
        let container = CapabilityContainer::new("hub-1234");
        let closes = Arc::new(AtomicUsize::new(0));

        let before = container
            .get_or_init("switch_power", || Ok(make(&closes)))
            .unwrap();
        container.reset("switch_power");
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert!(!container.is_initialized("switch_power"));

        // Resetting an uninitialized capability is a no-op.
        container.reset("switch_power");
        assert_eq!(closes.load(Ordering::SeqCst), 1);

        let after = container
            .get_or_init("switch_power", || Ok(make(&closes)))
            .unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
    }

    #[test]
    fn test_reset_all() {
        let container = CapabilityContainer::new("hub-1234");
        let closes = Arc::new(AtomicUsize::new(0));
        container
            .get_or_init("switch_power", || Ok(make(&closes)))
            .unwrap();
        container
            .get_or_init("file_transfer", || Ok(make(&closes)))
            .unwrap();

        container.reset_all(["switch_power", "file_transfer", "device_power"]);
        assert_eq!(closes.load(Ordering::SeqCst), 2);
        assert!(container.initialized_names().is_empty());
    }
}
