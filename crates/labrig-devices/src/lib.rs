//! `labrig-devices`
//!
//! Concrete capability interfaces/flavors and reference device types for the
//! labrig framework, plus scripted transport doubles for tests.
//!
//! The catalog:
//!
//! - Capabilities: `switch_power` (USB and charging-USB flavors),
//!   `device_power` (hub-port-backed flavor), `file_transfer` (shell echo
//!   flavor), `flash_build` (bootloader-console flavor).
//! - Devices: [`PowerHub`] (managed USB power hub) and [`DevBoard`] (serial
//!   dev board), with [`DeviceFactory`](labrig_core::DeviceFactory)
//!   implementations wiring them to a [`TransportOpener`] collaborator.
//!
//! Call [`capability_registry`] once at the composition root and hand the
//! result to the [`DeviceManager`](labrig_core::DeviceManager).

pub mod capabilities;
pub mod devices;
pub mod mock;
pub mod transport;

pub use capabilities::capability_registry;
pub use capabilities::device_power::{as_device_power, DevicePower, DevicePowerHub};
pub use capabilities::file_transfer::{as_file_transfer, FileTransfer, FileTransferEcho};
pub use capabilities::flash_build::{as_flash_build, FlashBuild, FlashBuildShell};
pub use capabilities::switch_power::{
    as_switch_power, SwitchPower, SwitchPowerUsb, SwitchPowerUsbWithCharge,
};
pub use devices::dev_board::{DevBoard, DevBoardFactory};
pub use devices::power_hub::{PowerHub, PowerHubFactory};
pub use mock::{MockOpener, MockTransport};
pub use transport::{CommandTransport, TransportOpener};
