//! Device power control through a managed hub port.
//!
//! The `device_power` capability powers a device on and off by driving the
//! `switch_power` capability of the hub it is plugged into. The hub
//! assignment lives in the device's optional properties (`usb_hub_name` and
//! `usb_port`); until both are set the capability exists but is not ready,
//! and its health check fails with the capability-not-ready readiness kind.

use std::any::Any;
use std::sync::{Arc, Weak};
use std::time::Duration;

use serde_json::{json, Value};

use labrig_core::{
    downcast_arc, Capability, CapabilitySlot, CheckReadyError, DeviceManager, OptionsStore,
    Result, RigError,
};

use crate::capabilities::switch_power::{as_switch_power, SwitchPower};

/// Canonical capability name.
pub const CAPABILITY: &str = "device_power";
/// Interface name in the capability registry.
pub const INTERFACE: &str = "device_power_base";
/// Hub-backed flavor name.
pub const FLAVOR_HUB: &str = "device_power_hub";

/// API every `device_power` flavor satisfies.
pub trait DevicePower: Capability {
    /// Powers the device on.
    fn on(&self) -> Result<()>;

    /// Powers the device off.
    fn off(&self) -> Result<()>;

    /// Power-cycles the device (off, settle, on).
    fn cycle(&self) -> Result<()>;
}

/// Hub-backed flavor: drives one port of another device's `switch_power`.
pub struct DevicePowerHub {
    device_name: String,
    hub: Option<(Arc<dyn SwitchPower>, u32)>,
    cycle_delay: Duration,
}

impl DevicePowerHub {
    /// Creates the flavor. `hub` is absent when the hub assignment options
    /// are unset; the instance then fails its health check until the device
    /// is re-created with the options set.
    pub fn new(
        device_name: impl Into<String>,
        hub: Option<(Arc<dyn SwitchPower>, u32)>,
        cycle_delay: Duration,
    ) -> Self {
        Self {
            device_name: device_name.into(),
            hub,
            cycle_delay,
        }
    }

    fn hub(&self) -> Result<&(Arc<dyn SwitchPower>, u32)> {
        self.hub.as_ref().ok_or_else(|| {
            CheckReadyError::capability_not_ready(
                &self.device_name,
                "device_power capability is not ready",
            )
            .with_reason("optional properties usb_hub_name and usb_port are not set")
            .into()
        })
    }
}

impl Capability for DevicePowerHub {
    fn device_name(&self) -> &str {
        &self.device_name
    }

    fn health_check(&self) -> Result<()> {
        self.hub().map(|_| ())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

impl DevicePower for DevicePowerHub {
    fn on(&self) -> Result<()> {
        let (hub, port) = self.hub()?;
        hub.power_on(*port)
    }

    fn off(&self) -> Result<()> {
        let (hub, port) = self.hub()?;
        hub.power_off(*port)
    }

    fn cycle(&self) -> Result<()> {
        self.off()?;
        std::thread::sleep(self.cycle_delay);
        self.on()
    }
}

/// Views a cached capability instance as `device_power`.
pub fn as_device_power(cap: Arc<dyn Capability>) -> Result<Arc<dyn DevicePower>> {
    downcast_arc::<DevicePowerHub>(cap).map(|c| c as Arc<dyn DevicePower>).ok_or_else(|| {
        RigError::Device("capability instance does not implement device_power".into())
    })
}

/// Slot declaration for the hub-backed flavor.
///
/// The hub's `switch_power` capability is resolved lazily, at
/// materialization time, by looking the hub device up in the managing
/// registry under the `usb_hub_name` optional property.
pub fn hub_slot(
    device_name: &str,
    manager: Weak<DeviceManager>,
    options: Arc<OptionsStore>,
    cycle_delay: Duration,
) -> CapabilitySlot {
    let name = device_name.to_string();
    CapabilitySlot::builder(CAPABILITY, FLAVOR_HUB, move || {
        let hub = resolve_hub(&name, &manager, &options)?;
        Ok(Arc::new(DevicePowerHub::new(name.clone(), hub, cycle_delay)) as Arc<dyn Capability>)
    })
    .dynamic("port_mode", |cap| {
        let power = hub_flavor(cap)?;
        let (hub, port) = power.hub()?;
        Ok(json!(hub.get_mode(*port)?))
    })
    .method("on", |cap, _args| {
        hub_flavor(cap)?.on()?;
        Ok(Value::Null)
    })
    .method("off", |cap, _args| {
        hub_flavor(cap)?.off()?;
        Ok(Value::Null)
    })
    .method("cycle", |cap, _args| {
        hub_flavor(cap)?.cycle()?;
        Ok(Value::Null)
    })
    .build()
}

fn hub_flavor(cap: &dyn Capability) -> Result<&DevicePowerHub> {
    cap.as_any()
        .downcast_ref::<DevicePowerHub>()
        .ok_or_else(|| RigError::Device("capability instance has an unexpected flavor".into()))
}

fn resolve_hub(
    device_name: &str,
    manager: &Weak<DeviceManager>,
    options: &Arc<OptionsStore>,
) -> Result<Option<(Arc<dyn SwitchPower>, u32)>> {
    let hub_name = options.get("usb_hub_name").and_then(|v| {
        v.as_str().map(str::to_string)
    });
    let port = options.get("usb_port").and_then(|v| v.as_u64());
    let (Some(hub_name), Some(port)) = (hub_name, port) else {
        return Ok(None);
    };
    let manager = manager.upgrade().ok_or_else(|| {
        RigError::Device(format!(
            "{} cannot resolve hub '{}': managing registry is gone",
            device_name, hub_name
        ))
    })?;
    let hub_device = manager.device(&hub_name).ok_or_else(|| {
        RigError::Device(format!(
            "{} hub '{}' is not an open device",
            device_name, hub_name
        ))
    })?;
    let cap = hub_device.core().get_capability("switch_power")?;
    let port = u32::try_from(port)
        .map_err(|_| RigError::Device(format!("{} usb_port {} out of range", device_name, port)))?;
    Ok(Some((as_switch_power(cap)?, port)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::switch_power::SwitchPowerUsb;
    use crate::mock::MockTransport;
    use labrig_core::ReadyErrorKind;

    fn hub_pair(transport: &Arc<MockTransport>) -> (Arc<dyn SwitchPower>, u32) {
        (
            Arc::new(SwitchPowerUsb::new("hub-1234", transport.clone(), 15)),
            3,
        )
    }

    #[test]
    fn test_unconfigured_capability_is_not_ready() {
        let power = DevicePowerHub::new("board-3f2a", None, Duration::ZERO);
        let err = power.health_check().unwrap_err();
        match err {
            RigError::CheckReady(err) => {
                assert_eq!(err.kind, ReadyErrorKind::CapabilityNotReady);
                assert!(err.to_string().contains("usb_hub_name"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(power.on().is_err());
    }

    #[test]
    fn test_cycle_drives_hub_port() {
        let transport = MockTransport::new();
        transport.respond("mode off 3", "ok");
        transport.respond("mode sync 3", "ok");
        let power = DevicePowerHub::new("board-3f2a", Some(hub_pair(&transport)), Duration::ZERO);

        power.health_check().unwrap();
        power.cycle().unwrap();
        assert_eq!(transport.sent(), vec!["mode off 3", "mode sync 3"]);
    }
}
