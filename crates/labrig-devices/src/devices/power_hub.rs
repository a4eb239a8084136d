//! Managed USB power hub.
//!
//! A rack hub whose ports supply power and data to the devices under test.
//! The hub's own console answers `ping`/`health`/`version`/`state`/`mode`
//! commands; port switching is exposed through the `switch_power`
//! capability. The pre-capability method names (`power_on`, `power_off`,
//! `supported_modes`) survive as deprecation aliases.

use std::sync::{Arc, Weak};

use regex::Regex;
use serde_json::{json, Value};

use labrig_core::{
    CapabilityRegistry, CheckReadyError, DeviceConfig, DeviceCore, DeviceFactory, DeviceManager,
    DeviceSpec, ManagedDevice, OptionsStore, ReadyErrorKind, RecoveryDispatcher, Result, RigError,
};

use crate::capabilities::switch_power::{self, as_switch_power, SwitchPower};
use crate::devices::persistent_getter;
use crate::transport::{CommandTransport, TransportOpener};

/// Device type identifier.
pub const DEVICE_TYPE: &str = "powerhub";

/// Ports on the hub when the detection record does not say.
const DEFAULT_TOTAL_PORTS: u32 = 15;

/// USB power hub device.
pub struct PowerHub {
    core: DeviceCore,
    recovery: RecoveryDispatcher,
}

impl PowerHub {
    /// Creates a hub instance from its detection-time configuration.
    pub fn new(
        manager: Weak<DeviceManager>,
        registry: Arc<CapabilityRegistry>,
        transport: Arc<dyn CommandTransport>,
        config: DeviceConfig,
    ) -> Result<Arc<Self>> {
        let name = config.persistent_str("name")?.to_string();
        let total_ports = config
            .persistent
            .get("total_ports")
            .and_then(Value::as_u64)
            .and_then(|p| u32::try_from(p).ok())
            .unwrap_or(DEFAULT_TOTAL_PORTS);
        let persistent = Arc::new(config.persistent);
        let options = Arc::new(OptionsStore::new(config.options));

        let spec = DeviceSpec::builder(DEVICE_TYPE)
            .persistent("name", persistent_getter(&persistent, "name"))
            .persistent("model", persistent_getter(&persistent, "model"))
            .persistent("serial_number", persistent_getter(&persistent, "serial_number"))
            .persistent(
                "communication_address",
                persistent_getter(&persistent, "communication_address"),
            )
            .persistent_value("total_ports", json!(total_ports))
            .dynamic("firmware_version", {
                let transport = transport.clone();
                let name = name.clone();
                move || firmware_version(transport.as_ref(), &name)
            })
            .dynamic("connected", {
                let transport = transport.clone();
                move || Ok(json!(is_pingable(transport.as_ref())))
            })
            .optional("alias", &options)
            .method("reboot", {
                let transport = transport.clone();
                move |_args| {
                    transport.send_command("reboot")?;
                    Ok(Value::Null)
                }
            })
            .capability(switch_power::usb_slot(&name, transport.clone(), total_ports))
            .alias_method("power_on", "switch_power.power_on")
            .alias_method("power_off", "switch_power.power_off")
            .alias_property("supported_modes", "switch_power.supported_modes")
            .health_check("check_device_connected", {
                let transport = transport.clone();
                let name = name.clone();
                move || {
                    if is_pingable(transport.as_ref()) {
                        Ok(())
                    } else {
                        Err(CheckReadyError::not_connected(
                            name.clone(),
                            "device not reachable from host machine",
                        )
                        .into())
                    }
                }
            })
            .health_check("check_device_responsive", {
                let transport = transport.clone();
                let name = name.clone();
                move || check_responsive(transport.as_ref(), &name)
            })
            .build();

        let recovery = RecoveryDispatcher::new(&name).on(ReadyErrorKind::NotResponsive, {
            let transport = transport.clone();
            move || {
                transport.send_command("reboot")?;
                Ok(())
            }
        });

        Ok(Arc::new(Self {
            core: DeviceCore::new(name, spec, persistent, options, registry, manager),
            recovery,
        }))
    }

    /// Typed accessor for the hub's `switch_power` capability.
    pub fn switch_power(&self) -> Result<Arc<dyn SwitchPower>> {
        as_switch_power(self.core.get_capability("switch_power")?)
    }
}

impl ManagedDevice for PowerHub {
    fn core(&self) -> &DeviceCore {
        &self.core
    }

    fn recover(&self, error: CheckReadyError) -> Result<()> {
        self.recovery.dispatch(error)
    }
}

fn is_pingable(transport: &dyn CommandTransport) -> bool {
    transport
        .send_command("ping")
        .map(|r| r.trim() == "pong")
        .unwrap_or(false)
}

fn check_responsive(transport: &dyn CommandTransport, name: &str) -> Result<()> {
    match transport.send_command("health") {
        Ok(response) if response.trim() == "ok" => Ok(()),
        Ok(response) => Err(CheckReadyError::not_responsive(
            name,
            format!("unexpected response to 'health': '{}'", response.trim()),
        )
        .into()),
        Err(_) => {
            Err(CheckReadyError::not_responsive(name, "no response to 'health'").into())
        }
    }
}

fn firmware_version(transport: &dyn CommandTransport, name: &str) -> Result<Value> {
    let response = transport.send_command("version")?;
    let pattern = Regex::new(r"\d+\.\d+(?:\.\d+)?")
        .map_err(|err| RigError::Device(err.to_string()))?;
    pattern
        .find(&response)
        .map(|m| json!(m.as_str()))
        .ok_or_else(|| {
            RigError::Device(format!(
                "{} unable to parse firmware version from '{}'",
                name,
                response.trim()
            ))
        })
}

/// Factory for [`PowerHub`] devices.
pub struct PowerHubFactory {
    opener: Arc<dyn TransportOpener>,
}

impl PowerHubFactory {
    /// Creates the factory around a transport opener collaborator.
    pub fn new(opener: Arc<dyn TransportOpener>) -> Self {
        Self { opener }
    }
}

impl DeviceFactory for PowerHubFactory {
    fn device_type(&self) -> &'static str {
        DEVICE_TYPE
    }

    fn is_connected(&self, config: &DeviceConfig) -> Result<bool> {
        let Ok(address) = config.persistent_str("communication_address") else {
            return Ok(false);
        };
        match self.opener.open(address) {
            Ok(transport) => Ok(is_pingable(transport.as_ref())),
            Err(_) => Ok(false),
        }
    }

    fn build(
        &self,
        manager: &Arc<DeviceManager>,
        config: DeviceConfig,
    ) -> Result<Arc<dyn ManagedDevice>> {
        let address = config.persistent_str("communication_address")?.to_string();
        let transport = self.opener.open(&address)?;
        Ok(PowerHub::new(
            Arc::downgrade(manager),
            manager.registry(),
            transport,
            config,
        )?)
    }
}
