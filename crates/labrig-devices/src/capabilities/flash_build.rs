//! Firmware flashing.
//!
//! The shell flavor drives the device's own bootloader console over the
//! command transport; vendor tool flavors (esptool, JLink, nrfjprog) are
//! external collaborators that plug in behind the same interface. The
//! `flash_build` capability backs the `OnWithReflash` readiness setting.

use std::any::Any;
use std::sync::Arc;

use serde_json::Value;

use labrig_core::{downcast_arc, Capability, CapabilitySlot, Result, RigError};

use crate::capabilities::switch_power::str_arg;
use crate::transport::CommandTransport;

/// Canonical capability name.
pub const CAPABILITY: &str = "flash_build";
/// Interface name in the capability registry.
pub const INTERFACE: &str = "flash_build_base";
/// Shell flavor name.
pub const FLAVOR_SHELL: &str = "flash_build_shell";

/// API every `flash_build` flavor satisfies.
pub trait FlashBuild: Capability {
    /// Writes the given firmware image to the device and verifies it.
    fn flash_device(&self, image: &str) -> Result<()>;
}

/// Bootloader-console flavor.
pub struct FlashBuildShell {
    device_name: String,
    transport: Arc<dyn CommandTransport>,
}

impl FlashBuildShell {
    /// Creates the flavor for one device.
    pub fn new(device_name: impl Into<String>, transport: Arc<dyn CommandTransport>) -> Self {
        Self {
            device_name: device_name.into(),
            transport,
        }
    }
}

impl Capability for FlashBuildShell {
    fn device_name(&self) -> &str {
        &self.device_name
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

impl FlashBuild for FlashBuildShell {
    fn flash_device(&self, image: &str) -> Result<()> {
        tracing::info!("{} flashing build {}", self.device_name, image);
        let response = self.transport.send_command(&format!("flash {}", image))?;
        if !response.trim().eq_ignore_ascii_case("ok") {
            return Err(RigError::Device(format!(
                "{} flash of {} failed: {}",
                self.device_name, image, response
            )));
        }
        Ok(())
    }
}

/// Views a cached capability instance as `flash_build`.
pub fn as_flash_build(cap: Arc<dyn Capability>) -> Result<Arc<dyn FlashBuild>> {
    downcast_arc::<FlashBuildShell>(cap)
        .map(|c| c as Arc<dyn FlashBuild>)
        .ok_or_else(|| {
            RigError::Device("capability instance does not implement flash_build".into())
        })
}

/// Slot declaration for the shell flavor.
pub fn shell_slot(device_name: &str, transport: Arc<dyn CommandTransport>) -> CapabilitySlot {
    let name = device_name.to_string();
    CapabilitySlot::builder(CAPABILITY, FLAVOR_SHELL, move || {
        Ok(Arc::new(FlashBuildShell::new(name.clone(), transport.clone()))
            as Arc<dyn Capability>)
    })
    .method("flash_device", |cap, args| {
        let image = str_arg(args, 0)?;
        shell(cap)?.flash_device(&image)?;
        Ok(Value::Null)
    })
    .build()
}

fn shell(cap: &dyn Capability) -> Result<&FlashBuildShell> {
    cap.as_any()
        .downcast_ref::<FlashBuildShell>()
        .ok_or_else(|| RigError::Device("capability instance has an unexpected flavor".into()))
}
