//! Port power switching for managed hubs.
//!
//! The `switch_power` capability drives per-port power modes on a USB power
//! hub. The base USB flavor supports `off` and `sync` (data + power); the
//! charging flavor specializes it with a high-current `charge` mode.

use std::any::Any;
use std::sync::Arc;

use serde_json::{json, Value};

use labrig_core::{downcast_arc, Capability, CapabilitySlot, Result, RigError};

use crate::transport::CommandTransport;

/// Canonical capability name.
pub const CAPABILITY: &str = "switch_power";
/// Interface name in the capability registry.
pub const INTERFACE: &str = "switch_power_base";
/// USB flavor name.
pub const FLAVOR_USB: &str = "switch_power_usb";
/// Charging USB flavor name.
pub const FLAVOR_USB_WITH_CHARGE: &str = "switch_power_usb_with_charge";

/// API every `switch_power` flavor satisfies.
pub trait SwitchPower: Capability {
    /// Power modes this flavor accepts.
    fn supported_modes(&self) -> Vec<String>;

    /// Powers on the given port.
    fn power_on(&self, port: u32) -> Result<()>;

    /// Powers off the given port.
    fn power_off(&self, port: u32) -> Result<()>;

    /// Sets the given port to a mode.
    fn set_mode(&self, mode: &str, port: u32) -> Result<()>;

    /// Current mode of the given port.
    fn get_mode(&self, port: u32) -> Result<String>;
}

// =============================================================================
// USB flavor
// =============================================================================

/// Port power control over the hub's command console.
pub struct SwitchPowerUsb {
    device_name: String,
    transport: Arc<dyn CommandTransport>,
    total_ports: u32,
}

impl SwitchPowerUsb {
    const MODES: &'static [&'static str] = &["off", "sync"];

    /// Creates the flavor for one hub.
    pub fn new(
        device_name: impl Into<String>,
        transport: Arc<dyn CommandTransport>,
        total_ports: u32,
    ) -> Self {
        Self {
            device_name: device_name.into(),
            transport,
            total_ports,
        }
    }

    /// Number of switchable ports.
    pub fn total_ports(&self) -> u32 {
        self.total_ports
    }

    fn check_port(&self, port: u32) -> Result<()> {
        if port == 0 || port > self.total_ports {
            return Err(RigError::Device(format!(
                "{} invalid port {}. Valid ports: 1-{}",
                self.device_name, port, self.total_ports
            )));
        }
        Ok(())
    }

    /// Issues a mode change without flavor-level mode validation.
    fn send_mode(&self, mode: &str, port: u32) -> Result<()> {
        self.check_port(port)?;
        self.transport
            .send_command(&format!("mode {} {}", mode, port))?;
        Ok(())
    }

    fn read_mode(&self, port: u32) -> Result<String> {
        self.check_port(port)?;
        let response = self.transport.send_command(&format!("state {}", port))?;
        let mode = response.split_whitespace().next().unwrap_or("").to_lowercase();
        if mode.is_empty() {
            return Err(RigError::Device(format!(
                "{} unable to parse port {} mode from '{}'",
                self.device_name, port, response
            )));
        }
        Ok(mode)
    }
}

impl Capability for SwitchPowerUsb {
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

impl SwitchPower for SwitchPowerUsb {
    fn supported_modes(&self) -> Vec<String> {
        Self::MODES.iter().map(|m| m.to_string()).collect()
    }

    fn power_on(&self, port: u32) -> Result<()> {
        self.set_mode("sync", port)
    }

    fn power_off(&self, port: u32) -> Result<()> {
        self.set_mode("off", port)
    }

    fn set_mode(&self, mode: &str, port: u32) -> Result<()> {
        validate_mode(&self.device_name, mode, &self.supported_modes())?;
        self.send_mode(mode, port)
    }

    fn get_mode(&self, port: u32) -> Result<String> {
        self.read_mode(port)
    }
}

// =============================================================================
// Charging USB flavor
// =============================================================================

/// USB port power control with an additional high-current `charge` mode.
pub struct SwitchPowerUsbWithCharge {
    inner: SwitchPowerUsb,
}

impl SwitchPowerUsbWithCharge {
    /// Creates the charging flavor for one hub.
    pub fn new(
        device_name: impl Into<String>,
        transport: Arc<dyn CommandTransport>,
        total_ports: u32,
    ) -> Self {
        Self {
            inner: SwitchPowerUsb::new(device_name, transport, total_ports),
        }
    }
}

impl Capability for SwitchPowerUsbWithCharge {
    fn device_name(&self) -> &str {
        self.inner.device_name()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

impl SwitchPower for SwitchPowerUsbWithCharge {
    fn supported_modes(&self) -> Vec<String> {
        let mut modes = self.inner.supported_modes();
        modes.push("charge".to_string());
        modes
    }

    fn power_on(&self, port: u32) -> Result<()> {
        self.set_mode("sync", port)
    }

    fn power_off(&self, port: u32) -> Result<()> {
        self.set_mode("off", port)
    }

    fn set_mode(&self, mode: &str, port: u32) -> Result<()> {
        validate_mode(self.device_name(), mode, &self.supported_modes())?;
        self.inner.send_mode(mode, port)
    }

    fn get_mode(&self, port: u32) -> Result<String> {
        self.inner.read_mode(port)
    }
}

fn validate_mode(device: &str, mode: &str, supported: &[String]) -> Result<()> {
    if !supported.iter().any(|m| m == mode) {
        return Err(RigError::Device(format!(
            "{} mode '{}' is not supported. Supported modes: {}",
            device,
            mode,
            supported.join(", ")
        )));
    }
    Ok(())
}

/// Views a cached capability instance as `switch_power`, whatever its flavor.
pub fn as_switch_power(cap: Arc<dyn Capability>) -> Result<Arc<dyn SwitchPower>> {
    if let Some(usb) = downcast_arc::<SwitchPowerUsb>(cap.clone()) {
        return Ok(usb);
    }
    if let Some(charge) = downcast_arc::<SwitchPowerUsbWithCharge>(cap) {
        return Ok(charge);
    }
    Err(RigError::Device(
        "capability instance does not implement switch_power".into(),
    ))
}

// =============================================================================
// Slot declarations
// =============================================================================

/// Slot declaration for the USB flavor.
pub fn usb_slot(
    device_name: &str,
    transport: Arc<dyn CommandTransport>,
    total_ports: u32,
) -> CapabilitySlot {
    let name = device_name.to_string();
    CapabilitySlot::builder(CAPABILITY, FLAVOR_USB, move || {
        Ok(Arc::new(SwitchPowerUsb::new(
            name.clone(),
            transport.clone(),
            total_ports,
        )) as Arc<dyn Capability>)
    })
    .persistent("supported_modes", |cap| {
        Ok(json!(usb(cap)?.supported_modes()))
    })
    .persistent("total_ports", move |_cap| Ok(json!(total_ports)))
    .dynamic("port_modes", |cap| {
        let switch = usb(cap)?;
        let mut modes = Vec::new();
        for port in 1..=switch.total_ports() {
            modes.push(switch.get_mode(port)?);
        }
        Ok(json!(modes))
    })
    .method("power_on", |cap, args| {
        usb(cap)?.power_on(port_arg(args)?)?;
        Ok(Value::Null)
    })
    .method("power_off", |cap, args| {
        usb(cap)?.power_off(port_arg(args)?)?;
        Ok(Value::Null)
    })
    .method("set_mode", |cap, args| {
        let mode = str_arg(args, 0)?;
        let port = args
            .get(1)
            .and_then(Value::as_u64)
            .ok_or_else(|| RigError::Device("expected a port number argument".into()))?;
        usb(cap)?.set_mode(&mode, u32::try_from(port).map_err(out_of_range)?)?;
        Ok(Value::Null)
    })
    .build()
}

/// Slot declaration for the charging flavor.
pub fn usb_with_charge_slot(
    device_name: &str,
    transport: Arc<dyn CommandTransport>,
    total_ports: u32,
) -> CapabilitySlot {
    let name = device_name.to_string();
    CapabilitySlot::builder(CAPABILITY, FLAVOR_USB_WITH_CHARGE, move || {
        Ok(Arc::new(SwitchPowerUsbWithCharge::new(
            name.clone(),
            transport.clone(),
            total_ports,
        )) as Arc<dyn Capability>)
    })
    .persistent("supported_modes", |cap| {
        Ok(json!(charge(cap)?.supported_modes()))
    })
    .persistent("total_ports", move |_cap| Ok(json!(total_ports)))
    .method("power_on", |cap, args| {
        charge(cap)?.power_on(port_arg(args)?)?;
        Ok(Value::Null)
    })
    .method("power_off", |cap, args| {
        charge(cap)?.power_off(port_arg(args)?)?;
        Ok(Value::Null)
    })
    .build()
}

fn usb(cap: &dyn Capability) -> Result<&SwitchPowerUsb> {
    cap.as_any()
        .downcast_ref::<SwitchPowerUsb>()
        .ok_or_else(flavor_mismatch)
}

fn charge(cap: &dyn Capability) -> Result<&SwitchPowerUsbWithCharge> {
    cap.as_any()
        .downcast_ref::<SwitchPowerUsbWithCharge>()
        .ok_or_else(flavor_mismatch)
}

fn flavor_mismatch() -> RigError {
    RigError::Device("capability instance has an unexpected flavor".into())
}

fn out_of_range(_: std::num::TryFromIntError) -> RigError {
    RigError::Device("port number out of range".into())
}

pub(crate) fn port_arg(args: &[Value]) -> Result<u32> {
    let port = args
        .first()
        .and_then(Value::as_u64)
        .ok_or_else(|| RigError::Device("expected a port number argument".into()))?;
    u32::try_from(port).map_err(out_of_range)
}

pub(crate) fn str_arg(args: &[Value], index: usize) -> Result<String> {
    args.get(index)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| RigError::Device(format!("expected a string argument at position {}", index)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockTransport;

    #[test]
    fn test_power_on_off_send_mode_commands() {
        let transport = MockTransport::new();
        transport.respond("mode sync 3", "ok");
        transport.respond("mode off 3", "ok");
        let switch = SwitchPowerUsb::new("hub-1234", transport.clone(), 15);

        switch.power_on(3).unwrap();
        switch.power_off(3).unwrap();
        assert_eq!(transport.sent(), vec!["mode sync 3", "mode off 3"]);
    }

    #[test]
    fn test_invalid_port_and_mode_rejected() {
        let transport = MockTransport::new();
        let switch = SwitchPowerUsb::new("hub-1234", transport.clone(), 4);

        assert!(switch.power_on(0).is_err());
        assert!(switch.power_on(5).is_err());
        let err = switch.set_mode("charge", 1).unwrap_err();
        assert!(err.to_string().contains("not supported"));
        // Nothing reached the transport.
        assert!(transport.sent().is_empty());
    }

    #[test]
    fn test_get_mode_parses_first_word() {
        let transport = MockTransport::new();
        transport.respond("state 2", "SYNC profile=default");
        let switch = SwitchPowerUsb::new("hub-1234", transport, 15);
        assert_eq!(switch.get_mode(2).unwrap(), "sync");
    }

    #[test]
    fn test_charge_flavor_extends_modes() {
        let transport = MockTransport::new();
        transport.respond("mode charge 1", "ok");
        let switch = SwitchPowerUsbWithCharge::new("hub-1234", transport.clone(), 15);

        assert!(switch.supported_modes().contains(&"charge".to_string()));
        switch.set_mode("charge", 1).unwrap();
        assert_eq!(transport.sent(), vec!["mode charge 1"]);
    }

    #[test]
    fn test_slot_declarations() {
        let transport = MockTransport::new();
        let slot = usb_slot("hub-1234", transport.clone(), 15);
        assert_eq!(slot.capability(), CAPABILITY);
        assert_eq!(slot.flavor(), FLAVOR_USB);
        let charge = usb_with_charge_slot("hub-1234", transport, 15);
        assert_eq!(charge.flavor(), FLAVOR_USB_WITH_CHARGE);
    }

    #[test]
    fn test_as_switch_power_accepts_both_flavors() {
        let transport = MockTransport::new();
        let usb: Arc<dyn Capability> =
            Arc::new(SwitchPowerUsb::new("hub-1234", transport.clone(), 15));
        let charge: Arc<dyn Capability> =
            Arc::new(SwitchPowerUsbWithCharge::new("hub-1234", transport, 15));
        assert!(as_switch_power(usb).is_ok());
        assert!(as_switch_power(charge).is_ok());
    }
}
