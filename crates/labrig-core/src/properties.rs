//! Uniform property reflection across a device and its capabilities.
//!
//! Every device type registers explicit tables of property descriptors at
//! construction time: persistent facts fixed at detection, dynamic values
//! computed on each access (possibly via device I/O), and user-settable
//! optional values. Capability flavors contribute their own tables, surfaced
//! under dotted `capability.property` names. The tables are explicitly
//! populated name -> accessor maps; nothing is discovered by scanning type
//! members at runtime.
//!
//! Reading splits into two operations:
//!
//! - [`DeviceCore::try_get_property`] is the typed path: unknown names,
//!   method names, and read failures surface as distinct errors.
//! - [`DeviceCore::get_property`] with `raise_on_error = false` is the bulk
//!   dump path: unknown names become a human-readable placeholder naming the
//!   closest known properties, and read failures become an
//!   `Exception_<Kind>` placeholder with the original error logged, so that
//!   diagnostic dumps never abort partway through. A name that resolves to a
//!   method always fails, regardless of the flag.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::Value;
use similar::TextDiff;

use crate::capability::Capability;
use crate::device::DeviceCore;
use crate::error::{Result, RigError};

/// Prefix of the placeholder string returned when a property read raises and
/// the caller asked for placeholders instead of errors.
pub const ERROR_PREFIX: &str = "Exception_";

/// Maximum number of close-match suggestions in unknown-property messages.
const MAX_CLOSE_MATCHES: usize = 3;

/// Minimum similarity ratio for a close-match suggestion.
const CLOSE_MATCH_CUTOFF: f32 = 0.6;

// =============================================================================
// Descriptors
// =============================================================================

/// Category of a reflected property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyKind {
    /// Immutable fact fixed at detection time (model, serial number).
    Persistent,
    /// Computed on each access; may perform device I/O.
    Dynamic,
    /// User-settable configuration value.
    Optional,
}

impl PropertyKind {
    /// Lowercase label used in error messages.
    pub fn label(&self) -> &'static str {
        match self {
            PropertyKind::Persistent => "persistent",
            PropertyKind::Dynamic => "dynamic",
            PropertyKind::Optional => "optional",
        }
    }
}

/// Entity a property belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyOwner {
    /// The device itself.
    Device,
    /// A capability slot, identified by its capability name.
    Capability(String),
}

/// Introspection record for one reflected property.
#[derive(Debug, Clone)]
pub struct PropertyDescriptor {
    /// Full property name (dotted for capability-owned properties).
    pub name: String,
    /// Property category.
    pub kind: PropertyKind,
    /// Owning entity.
    pub owner: PropertyOwner,
    /// Whether `set_property` accepts this name.
    pub settable: bool,
}

// =============================================================================
// Accessor closures
// =============================================================================

/// Reads a device-level property value.
pub type Getter = Arc<dyn Fn() -> Result<Value> + Send + Sync>;

/// Writes a device-level dynamic property value.
pub type Setter = Arc<dyn Fn(Value) -> Result<()> + Send + Sync>;

/// Invokes a device-level method.
pub type MethodFn = Arc<dyn Fn(&[Value]) -> Result<Value> + Send + Sync>;

/// Reads a property off a live capability instance.
pub type CapGetter = Arc<dyn Fn(&dyn Capability) -> Result<Value> + Send + Sync>;

/// Writes a dynamic property on a live capability instance.
pub type CapSetter = Arc<dyn Fn(&dyn Capability, Value) -> Result<()> + Send + Sync>;

/// Invokes a method on a live capability instance.
pub type CapMethodFn = Arc<dyn Fn(&dyn Capability, &[Value]) -> Result<Value> + Send + Sync>;

/// One device-level property table entry.
#[derive(Clone)]
pub(crate) struct PropertyEntry {
    pub(crate) kind: PropertyKind,
    pub(crate) get: Getter,
    pub(crate) set: Option<Setter>,
}

/// One capability-level property table entry.
#[derive(Clone)]
pub(crate) struct SlotPropertyEntry {
    pub(crate) kind: PropertyKind,
    pub(crate) get: CapGetter,
    pub(crate) set: Option<CapSetter>,
}

// =============================================================================
// Reflection operations
// =============================================================================

impl DeviceCore {
    /// Names of every reflected property of the given category, covering
    /// device-level names and `capability.property` names for every declared
    /// capability slot. Does not materialize capabilities.
    pub fn property_names(&self, kind: PropertyKind) -> BTreeSet<String> {
        let mut names: BTreeSet<String> = self
            .spec()
            .properties
            .iter()
            .filter(|(_, entry)| entry.kind == kind)
            .map(|(name, _)| name.clone())
            .collect();
        for (capability, slot) in &self.spec().slots {
            for (name, entry) in &slot.properties {
                if entry.kind == kind {
                    names.insert(format!("{}.{}", capability, name));
                }
            }
        }
        names
    }

    /// Names of every reflected property, plus raw optional-store keys.
    pub fn all_property_names(&self) -> BTreeSet<String> {
        let mut names = self.property_names(PropertyKind::Persistent);
        names.extend(self.property_names(PropertyKind::Dynamic));
        names.extend(self.property_names(PropertyKind::Optional));
        names.extend(self.options().keys());
        names
    }

    /// Introspection records for every reflected property.
    pub fn property_descriptors(&self) -> Vec<PropertyDescriptor> {
        let mut descriptors = Vec::new();
        for (name, entry) in &self.spec().properties {
            descriptors.push(PropertyDescriptor {
                name: name.clone(),
                kind: entry.kind,
                owner: PropertyOwner::Device,
                settable: entry.kind == PropertyKind::Optional || entry.set.is_some(),
            });
        }
        for (capability, slot) in &self.spec().slots {
            for (name, entry) in &slot.properties {
                descriptors.push(PropertyDescriptor {
                    name: format!("{}.{}", capability, name),
                    kind: entry.kind,
                    owner: PropertyOwner::Capability(capability.clone()),
                    settable: entry.set.is_some(),
                });
            }
        }
        descriptors
    }

    /// Retrieves a property value, failing with a typed error.
    ///
    /// Resolves deprecation aliases, then dotted capability names (lazily
    /// materializing the owning capability), then device-level names, and
    /// finally falls back to the raw optional store. A name that resolves to
    /// a method fails with [`RigError::PropertyIsMethod`].
    pub fn try_get_property(&self, name: &str) -> Result<Value> {
        if let Some(alias) = self.spec().aliases.get(name) {
            crate::deprecation::warn_deprecated(self.name(), name, &alias.target);
            if alias.is_method {
                return Err(RigError::PropertyIsMethod {
                    device: self.name().to_string(),
                    name: name.to_string(),
                });
            }
            return self.read_property(&alias.target);
        }
        self.read_property(name)
    }

    /// Retrieves a property value with the caller-selected error policy.
    ///
    /// With `raise_on_error` the behavior is identical to
    /// [`DeviceCore::try_get_property`]. Without it, unknown names and read
    /// failures are folded into placeholder strings so bulk dumps never abort
    /// partway; only a method name still fails.
    pub fn get_property(&self, name: &str, raise_on_error: bool) -> Result<Value> {
        match self.try_get_property(name) {
            Ok(value) => Ok(value),
            Err(err @ RigError::PropertyIsMethod { .. }) => Err(err),
            Err(err) if raise_on_error => Err(err),
            Err(RigError::UnknownProperty {
                device,
                name,
                close_matches,
            }) => Ok(Value::String(format!(
                "{} does not have a known property '{}'. Close matches: {}",
                device,
                name,
                close_matches.join(" or ")
            ))),
            Err(err) => {
                tracing::info!("{} for {}, error: {}", err.label(), name, err);
                Ok(Value::String(format!("{}{}", ERROR_PREFIX, err.label())))
            }
        }
    }

    /// Values of every persistent property, keyed by name.
    pub fn get_persistent_properties(&self) -> serde_json::Map<String, Value> {
        self.collect_properties(PropertyKind::Persistent)
    }

    /// Values of every dynamic property, keyed by name.
    ///
    /// Read failures appear as `Exception_<Kind>` placeholder strings rather
    /// than aborting the dump.
    pub fn get_dynamic_properties(&self) -> serde_json::Map<String, Value> {
        self.collect_properties(PropertyKind::Dynamic)
    }

    /// Values of every optional property, keyed by name.
    pub fn get_optional_properties(&self) -> serde_json::Map<String, Value> {
        self.collect_properties(PropertyKind::Optional)
    }

    /// Sets a property.
    ///
    /// Persistent properties and dynamic properties without a setter are
    /// rejected. Dynamic properties with a setter delegate to it (lazily
    /// materializing the owning capability for dotted names). Anything else
    /// is written to the optional store, and the config-persistence
    /// collaborator is signaled through the managing registry.
    pub fn set_property(&self, name: &str, value: Value) -> Result<()> {
        self.ensure_open()?;
        if let Some(entry) = self.device_entry_for(name) {
            match entry.kind {
                PropertyKind::Persistent => return Err(self.not_settable(name, "persistent")),
                PropertyKind::Dynamic => {
                    return match &entry.set {
                        Some(set) => set(value),
                        None => Err(self.not_settable(name, "dynamic")),
                    };
                }
                PropertyKind::Optional => {}
            }
        } else if let Some((capability, prop)) = name.split_once('.') {
            if let Some(slot) = self.spec().slots.get(capability) {
                if let Some(entry) = slot.properties.get(prop) {
                    match entry.kind {
                        PropertyKind::Persistent => {
                            return Err(self.not_settable(name, "persistent"))
                        }
                        PropertyKind::Dynamic | PropertyKind::Optional => {
                            let set = entry.set.clone().ok_or_else(|| {
                                self.not_settable(name, entry.kind.label())
                            })?;
                            let instance = self.get_capability(capability)?;
                            return set(instance.as_ref(), value);
                        }
                    }
                }
            }
        }
        self.set_option(name, value)
    }

    /// Resolves a property name to its value, without alias handling.
    pub(crate) fn read_property(&self, name: &str) -> Result<Value> {
        if let Some((capability, prop)) = name.split_once('.') {
            let Some(slot) = self.spec().slots.get(capability) else {
                return Err(self.unknown_property(name));
            };
            let Some(entry) = slot.properties.get(prop) else {
                if slot.methods.contains_key(prop) {
                    return Err(RigError::PropertyIsMethod {
                        device: self.name().to_string(),
                        name: name.to_string(),
                    });
                }
                return Err(self.unknown_property(name));
            };
            let instance = self.get_capability(capability)?;
            return (entry.get)(instance.as_ref());
        }

        match self.spec().properties.get(name) {
            Some(entry) => (entry.get)(),
            None => {
                if self.spec().methods.contains_key(name) {
                    return Err(RigError::PropertyIsMethod {
                        device: self.name().to_string(),
                        name: name.to_string(),
                    });
                }
                // Optional values can exist in the store without a declared
                // descriptor (set by the user ahead of redetection).
                if let Some(value) = self.options().get(name) {
                    return Ok(value);
                }
                Err(self.unknown_property(name))
            }
        }
    }

    fn device_entry_for(&self, name: &str) -> Option<PropertyEntry> {
        self.spec().properties.get(name).cloned()
    }

    fn collect_properties(&self, kind: PropertyKind) -> serde_json::Map<String, Value> {
        let mut values = serde_json::Map::new();
        for name in self.property_names(kind) {
            match self.get_property(&name, false) {
                Ok(Value::String(s)) if s.contains("does not have a known property") => {
                    // Property not supported in the current flavor.
                }
                Ok(value) => {
                    values.insert(name, value);
                }
                Err(_) => {}
            }
        }
        values
    }

    fn unknown_property(&self, name: &str) -> RigError {
        RigError::UnknownProperty {
            device: self.name().to_string(),
            name: name.to_string(),
            close_matches: close_matches(name, self.all_property_names()),
        }
    }

    fn not_settable(&self, name: &str, kind: &'static str) -> RigError {
        let hint = if kind == "persistent" {
            " Redetect the device if it is wrong."
        } else {
            ""
        };
        RigError::PropertyNotSettable {
            device: self.name().to_string(),
            name: name.to_string(),
            kind,
            hint: hint.to_string(),
        }
    }
}

/// Ranks `candidates` by similarity to `name`, best first, keeping at most
/// [`MAX_CLOSE_MATCHES`] entries above [`CLOSE_MATCH_CUTOFF`].
pub(crate) fn close_matches(
    name: &str,
    candidates: impl IntoIterator<Item = String>,
) -> Vec<String> {
    let mut scored: Vec<(f32, String)> = candidates
        .into_iter()
        .filter_map(|candidate| {
            let ratio = TextDiff::from_chars(name, candidate.as_str()).ratio();
            (ratio >= CLOSE_MATCH_CUTOFF).then_some((ratio, candidate))
        })
        .collect();
    scored.sort_by(|a, b| b.0.total_cmp(&a.0));
    scored.truncate(MAX_CLOSE_MATCHES);
    scored.into_iter().map(|(_, candidate)| candidate).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_matches_ranked_and_bounded() {
        let candidates = [
            "firmware_version",
            "firmware_type",
            "serial_number",
            "firmware_versions",
            "model",
        ];
        let matches = close_matches(
            "firmware_version",
            candidates.iter().map(|s| s.to_string()),
        );
        assert!(matches.len() <= 3);
        assert_eq!(matches[0], "firmware_version");
        assert!(matches.contains(&"firmware_versions".to_string()));
        assert!(!matches.contains(&"model".to_string()));
    }

    #[test]
    fn test_close_matches_empty_when_nothing_close() {
        let matches = close_matches("zzzz", ["model".to_string()]);
        assert!(matches.is_empty());
    }

    #[test]
    fn test_kind_labels() {
        assert_eq!(PropertyKind::Persistent.label(), "persistent");
        assert_eq!(PropertyKind::Dynamic.label(), "dynamic");
        assert_eq!(PropertyKind::Optional.label(), "optional");
    }
}
