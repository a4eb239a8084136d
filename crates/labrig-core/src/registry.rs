//! Process-wide capability name registry.
//!
//! Maps canonical capability names to their abstract interfaces and
//! interfaces to the concrete flavor types implementing them. The registry is
//! populated once at composition time by explicit registration calls (there
//! is no runtime class scanning) and is a pure lookup table afterwards.
//!
//! # Naming Convention
//!
//! - Interface names end in `_base` (e.g. `switch_power_base`).
//! - The capability name is the interface name with the `_base` suffix
//!   stripped (`switch_power`).
//! - Flavor names describe the implementation (`switch_power_usb`).
//!
//! All lookups are case-insensitive. Resolution accepts a flavor name, an
//! interface name, or a capability name, checked in that order; a flavor
//! satisfies a request when the resolved target appears anywhere in its
//! ancestry (its interface chain, or its parent-flavor chain when a flavor
//! name was requested).

use std::collections::BTreeMap;

use crate::error::{Result, RigError};

/// Suffix that distinguishes interface names from capability names.
const INTERFACE_SUFFIX: &str = "_base";

#[derive(Debug, Clone)]
struct InterfaceEntry {
    /// Parent interface this one specializes, if any.
    extends: Option<String>,
}

#[derive(Debug, Clone)]
struct FlavorEntry {
    /// Interface this flavor implements directly. Absent for flavors that
    /// specialize a parent flavor and inherit its interface.
    interface: Option<String>,
    /// Parent flavor this one specializes, if any.
    extends: Option<String>,
}

/// Result of resolving a capability-ish name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    /// The name resolved to a capability interface.
    Interface(String),
    /// The name resolved to a specific capability flavor.
    Flavor(String),
}

/// Lookup table mapping capability names to interfaces and interfaces to
/// flavors. Immutable after [`CapabilityRegistryBuilder::build`].
#[derive(Debug, Default, Clone)]
pub struct CapabilityRegistry {
    /// Capability name -> interface name.
    capabilities: BTreeMap<String, String>,
    /// Interface name -> entry.
    interfaces: BTreeMap<String, InterfaceEntry>,
    /// Flavor name -> entry.
    flavors: BTreeMap<String, FlavorEntry>,
}

impl CapabilityRegistry {
    /// Starts building a registry.
    pub fn builder() -> CapabilityRegistryBuilder {
        CapabilityRegistryBuilder {
            inner: CapabilityRegistry::default(),
        }
    }

    /// Resolves a capability, interface, or flavor name (case-insensitive).
    ///
    /// Fails with [`RigError::UnrecognizedCapability`] listing every known
    /// name when the name is not found.
    pub fn resolve(&self, name: &str) -> Result<Resolved> {
        let key = name.to_ascii_lowercase();
        if self.flavors.contains_key(&key) {
            return Ok(Resolved::Flavor(key));
        }
        if self.interfaces.contains_key(&key) {
            return Ok(Resolved::Interface(key));
        }
        if let Some(interface) = self.capabilities.get(&key) {
            return Ok(Resolved::Interface(interface.clone()));
        }
        Err(self.unrecognized(name))
    }

    /// Whether the given flavor satisfies a resolved request.
    ///
    /// An interface target matches when the flavor's interface, or any
    /// ancestor of it, is the target. A flavor target matches only that
    /// flavor or flavors specializing it.
    pub fn flavor_satisfies(&self, flavor: &str, target: &Resolved) -> bool {
        match target {
            Resolved::Flavor(wanted) => {
                let mut current = Some(flavor);
                while let Some(name) = current {
                    if name == wanted {
                        return true;
                    }
                    current = self.flavors.get(name).and_then(|e| e.extends.as_deref());
                }
                false
            }
            Resolved::Interface(wanted) => match self.flavor_interface(flavor) {
                Some(interface) => self.interface_satisfies(interface, wanted),
                None => false,
            },
        }
    }

    /// Returns true only if, for every requested name, at least one of the
    /// declared flavors satisfies the resolved target.
    ///
    /// Requested names may mix capability, interface, and flavor names; an
    /// unrecognized name fails before any matching occurs.
    pub fn has_capabilities<D, N>(&self, declared_flavors: &[D], names: &[N]) -> Result<bool>
    where
        D: AsRef<str>,
        N: AsRef<str>,
    {
        for name in names {
            let target = self.resolve(name.as_ref())?;
            let satisfied = declared_flavors
                .iter()
                .any(|flavor| self.flavor_satisfies(flavor.as_ref(), &target));
            if !satisfied {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// All registered flavors satisfying the given name.
    pub fn flavors_implementing(&self, name: &str) -> Result<Vec<String>> {
        let target = self.resolve(name)?;
        Ok(self
            .flavors
            .keys()
            .filter(|flavor| self.flavor_satisfies(flavor, &target))
            .cloned()
            .collect())
    }

    /// The canonical capability name a flavor is reachable under.
    pub fn capability_name_of(&self, flavor: &str) -> Option<String> {
        let interface = self.flavor_interface(flavor)?;
        Some(
            interface
                .strip_suffix(INTERFACE_SUFFIX)
                .unwrap_or(interface)
                .to_string(),
        )
    }

    /// Known capability names.
    pub fn capability_names(&self) -> Vec<&str> {
        self.capabilities.keys().map(String::as_str).collect()
    }

    /// Known interface names.
    pub fn interface_names(&self) -> Vec<&str> {
        self.interfaces.keys().map(String::as_str).collect()
    }

    /// Known flavor names.
    pub fn flavor_names(&self) -> Vec<&str> {
        self.flavors.keys().map(String::as_str).collect()
    }

    /// Interface implemented by a flavor, walking parent flavors if needed.
    fn flavor_interface<'a>(&'a self, flavor: &str) -> Option<&'a str> {
        let mut current = self.flavors.get(flavor)?;
        loop {
            if let Some(interface) = &current.interface {
                return Some(interface);
            }
            current = self.flavors.get(current.extends.as_deref()?)?;
        }
    }

    /// Whether `interface` is `wanted` or specializes it.
    fn interface_satisfies(&self, interface: &str, wanted: &str) -> bool {
        let mut current = Some(interface);
        while let Some(name) = current {
            if name == wanted {
                return true;
            }
            current = self.interfaces.get(name).and_then(|e| e.extends.as_deref());
        }
        false
    }

    fn unrecognized(&self, name: &str) -> RigError {
        RigError::UnrecognizedCapability {
            name: name.to_string(),
            capabilities: self.capability_names().join(", "),
            interfaces: self.interface_names().join(", "),
            flavors: self.flavor_names().join(", "),
        }
    }
}

/// Builder for [`CapabilityRegistry`], used at the composition root.
#[derive(Debug)]
pub struct CapabilityRegistryBuilder {
    inner: CapabilityRegistry,
}

impl CapabilityRegistryBuilder {
    /// Registers a capability interface.
    ///
    /// The capability name is derived by stripping the `_base` suffix.
    pub fn interface(self, name: &str) -> Self {
        self.register_interface(name, None)
    }

    /// Registers an interface that specializes a parent interface.
    pub fn interface_extends(self, name: &str, parent: &str) -> Self {
        self.register_interface(name, Some(parent.to_ascii_lowercase()))
    }

    /// Registers a flavor implementing the given interface.
    pub fn flavor(mut self, name: &str, interface: &str) -> Self {
        self.inner.flavors.insert(
            name.to_ascii_lowercase(),
            FlavorEntry {
                interface: Some(interface.to_ascii_lowercase()),
                extends: None,
            },
        );
        self
    }

    /// Registers a flavor that specializes a parent flavor, inheriting its
    /// interface.
    pub fn flavor_extends(mut self, name: &str, parent: &str) -> Self {
        self.inner.flavors.insert(
            name.to_ascii_lowercase(),
            FlavorEntry {
                interface: None,
                extends: Some(parent.to_ascii_lowercase()),
            },
        );
        self
    }

    /// Finalizes the registry.
    pub fn build(self) -> CapabilityRegistry {
        self.inner
    }

    fn register_interface(mut self, name: &str, extends: Option<String>) -> Self {
        let key = name.to_ascii_lowercase();
        let capability = key.strip_suffix(INTERFACE_SUFFIX).unwrap_or(&key).to_string();
        self.inner.capabilities.insert(capability, key.clone());
        self.inner.interfaces.insert(key, InterfaceEntry { extends });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> CapabilityRegistry {
        CapabilityRegistry::builder()
            .interface("switch_power_base")
            .interface("file_transfer_base")
            .flavor("switch_power_usb", "switch_power_base")
            .flavor_extends("switch_power_usb_with_charge", "switch_power_usb")
            .flavor("file_transfer_echo", "file_transfer_base")
            .build()
    }

    #[test]
    fn test_resolve_capability_interface_and_flavor() {
        let reg = registry();
        assert_eq!(
            reg.resolve("switch_power").unwrap(),
            Resolved::Interface("switch_power_base".into())
        );
        assert_eq!(
            reg.resolve("switch_power_base").unwrap(),
            Resolved::Interface("switch_power_base".into())
        );
        assert_eq!(
            reg.resolve("switch_power_usb").unwrap(),
            Resolved::Flavor("switch_power_usb".into())
        );
    }

    #[test]
    fn test_resolve_is_case_insensitive() {
        let reg = registry();
        assert_eq!(
            reg.resolve("Switch_Power_USB").unwrap(),
            Resolved::Flavor("switch_power_usb".into())
        );
    }

    #[test]
    fn test_resolve_unknown_lists_known_names() {
        let reg = registry();
        let err = reg.resolve("keypad").unwrap_err();
        match err {
            RigError::UnrecognizedCapability {
                name,
                capabilities,
                flavors,
                ..
            } => {
                assert_eq!(name, "keypad");
                assert!(capabilities.contains("switch_power"));
                assert!(flavors.contains("file_transfer_echo"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_child_flavor_satisfies_parent_flavor_and_interface() {
        let reg = registry();
        let parent = Resolved::Flavor("switch_power_usb".into());
        let interface = Resolved::Interface("switch_power_base".into());
        assert!(reg.flavor_satisfies("switch_power_usb_with_charge", &parent));
        assert!(reg.flavor_satisfies("switch_power_usb_with_charge", &interface));
        // Siblings do not satisfy a specific flavor request.
        let charge = Resolved::Flavor("switch_power_usb_with_charge".into());
        assert!(!reg.flavor_satisfies("switch_power_usb", &charge));
    }

    #[test]
    fn test_has_capabilities_mixed_names() {
        let reg = registry();
        let declared = ["switch_power_usb_with_charge", "file_transfer_echo"];
        assert!(reg
            .has_capabilities(&declared, &["switch_power", "file_transfer_echo"])
            .unwrap());
        assert!(reg
            .has_capabilities(&declared, &["switch_power_usb"])
            .unwrap());
        // Declared set lacks a flavor matching this specific flavor name.
        let declared = ["switch_power_usb"];
        assert!(!reg
            .has_capabilities(&declared, &["switch_power_usb_with_charge"])
            .unwrap());
        // Unrecognized names fail before matching.
        assert!(reg.has_capabilities(&declared, &["keypad"]).is_err());
    }

    #[test]
    fn test_flavors_implementing() {
        let reg = registry();
        let flavors = reg.flavors_implementing("switch_power").unwrap();
        assert_eq!(
            flavors,
            vec![
                "switch_power_usb".to_string(),
                "switch_power_usb_with_charge".to_string()
            ]
        );
    }

    #[test]
    fn test_capability_name_of_inherited_flavor() {
        let reg = registry();
        assert_eq!(
            reg.capability_name_of("switch_power_usb_with_charge").as_deref(),
            Some("switch_power")
        );
    }
}
