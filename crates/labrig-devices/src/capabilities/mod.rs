//! Capability interfaces and flavors for the device catalog.

pub mod device_power;
pub mod file_transfer;
pub mod flash_build;
pub mod switch_power;

use labrig_core::CapabilityRegistry;

/// Builds the capability registry covering every interface and flavor in
/// this crate. Called once at the composition root.
pub fn capability_registry() -> CapabilityRegistry {
    CapabilityRegistry::builder()
        .interface(switch_power::INTERFACE)
        .interface(device_power::INTERFACE)
        .interface(file_transfer::INTERFACE)
        .interface(flash_build::INTERFACE)
        .flavor(switch_power::FLAVOR_USB, switch_power::INTERFACE)
        .flavor_extends(
            switch_power::FLAVOR_USB_WITH_CHARGE,
            switch_power::FLAVOR_USB,
        )
        .flavor(device_power::FLAVOR_HUB, device_power::INTERFACE)
        .flavor(file_transfer::FLAVOR_ECHO, file_transfer::INTERFACE)
        .flavor(flash_build::FLAVOR_SHELL, flash_build::INTERFACE)
        .build()
}
