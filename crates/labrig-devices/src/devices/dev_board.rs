//! Serial dev board under test.
//!
//! A microcontroller board reached through its serial console. The board's
//! power comes from a managed hub port (`device_power`), small artifacts
//! move over the console (`file_transfer`), and firmware is rewritten
//! through the bootloader (`flash_build`), which also backs the
//! `flash_build` readiness setting. Readiness is three checks deep:
//! connected, responsive, bootup complete.

use std::sync::{Arc, Weak};
use std::time::Duration;

use regex::Regex;
use serde_json::{json, Value};

use labrig_core::{
    CapabilityRegistry, CheckReadyError, DeviceConfig, DeviceCore, DeviceFactory, DeviceManager,
    DeviceSpec, ManagedDevice, OptionsStore, ReadyErrorKind, RecoveryDispatcher, Result, RigError,
};

use crate::capabilities::flash_build::{self, as_flash_build};
use crate::capabilities::{device_power, file_transfer};
use crate::devices::persistent_getter;
use crate::transport::{CommandTransport, TransportOpener};

/// Device type identifier.
pub const DEVICE_TYPE: &str = "devboard";

/// Settle time between power-off and power-on during a power cycle.
const CYCLE_DELAY: Duration = Duration::from_millis(500);

/// Poll interval while waiting for bootup to finish.
const BOOT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Polls before giving up on bootup.
const BOOT_POLL_TRIES: u32 = 10;

/// Serial dev board device.
pub struct DevBoard {
    core: DeviceCore,
    recovery: RecoveryDispatcher,
}

impl DevBoard {
    /// Creates a board instance from its detection-time configuration.
    pub fn new(
        manager: Weak<DeviceManager>,
        registry: Arc<CapabilityRegistry>,
        transport: Arc<dyn CommandTransport>,
        config: DeviceConfig,
    ) -> Result<Arc<Self>> {
        let name = config.persistent_str("name")?.to_string();
        let persistent = Arc::new(config.persistent);
        let options = Arc::new(OptionsStore::new(config.options));

        let spec = DeviceSpec::builder(DEVICE_TYPE)
            .persistent("name", persistent_getter(&persistent, "name"))
            .persistent("model", persistent_getter(&persistent, "model"))
            .persistent("serial_number", persistent_getter(&persistent, "serial_number"))
            .persistent("platform", persistent_getter(&persistent, "platform"))
            .persistent(
                "communication_address",
                persistent_getter(&persistent, "communication_address"),
            )
            .dynamic("firmware_version", {
                let transport = transport.clone();
                let name = name.clone();
                move || firmware_version(transport.as_ref(), &name)
            })
            .dynamic("connected", {
                let transport = transport.clone();
                move || Ok(json!(is_pingable(transport.as_ref())))
            })
            .dynamic("boot_status", {
                let transport = transport.clone();
                move || Ok(json!(transport.send_command("boot_status")?.trim()))
            })
            .optional("alias", &options)
            .optional("usb_hub_name", &options)
            .optional("usb_port", &options)
            .optional("build_file", &options)
            .method("reboot", {
                let transport = transport.clone();
                move |_args| {
                    transport.send_command("reboot")?;
                    Ok(Value::Null)
                }
            })
            .method("wait_for_bootup_complete", {
                let transport = transport.clone();
                let name = name.clone();
                move |_args| {
                    wait_for_bootup_complete(transport.as_ref(), &name)?;
                    Ok(Value::Null)
                }
            })
            .capability(device_power::hub_slot(
                &name,
                manager.clone(),
                options.clone(),
                CYCLE_DELAY,
            ))
            .capability(file_transfer::echo_slot(&name, transport.clone()))
            .capability(flash_build::shell_slot(&name, transport.clone()))
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
                move || match transport.send_command("health") {
                    Ok(response) if response.trim() == "ok" => Ok(()),
                    Ok(response) => Err(CheckReadyError::not_responsive(
                        name.clone(),
                        format!("unexpected response to 'health': '{}'", response.trim()),
                    )
                    .into()),
                    Err(_) => Err(CheckReadyError::not_responsive(
                        name.clone(),
                        "no response to 'health'",
                    )
                    .into()),
                }
            })
            .health_check("check_bootup_complete", {
                let transport = transport.clone();
                let name = name.clone();
                move || {
                    let status = transport
                        .send_command("boot_status")
                        .map(|r| r.trim().to_string())
                        .unwrap_or_default();
                    if status == "complete" {
                        Ok(())
                    } else {
                        Err(CheckReadyError::bootup_incomplete(
                            name.clone(),
                            format!("boot status is '{}'", status),
                        )
                        .into())
                    }
                }
            })
            .build();

        let recovery = RecoveryDispatcher::new(&name)
            .on(ReadyErrorKind::NotResponsive, {
                let transport = transport.clone();
                let name = name.clone();
                move || {
                    tracing::info!("{} device not responding. Rebooting device", name);
                    transport.send_command("reboot")?;
                    Ok(())
                }
            })
            .on(ReadyErrorKind::BootupIncomplete, {
                let transport = transport.clone();
                let name = name.clone();
                move || {
                    tracing::info!("{} not fully booted up. Waiting for complete bootup", name);
                    wait_for_bootup_complete(transport.as_ref(), &name)
                }
            });

        Ok(Arc::new(Self {
            core: DeviceCore::new(name, spec, persistent, options, registry, manager),
            recovery,
        }))
    }
}

impl ManagedDevice for DevBoard {
    fn core(&self) -> &DeviceCore {
        &self.core
    }

    fn recover(&self, error: CheckReadyError) -> Result<()> {
        self.recovery.dispatch(error)
    }

    fn supports_reflash(&self) -> bool {
        self.core.options().get("build_file").is_some()
    }

    fn reflash(&self) -> Result<()> {
        let build_file = self
            .core
            .options()
            .get("build_file")
            .and_then(|v| v.as_str().map(str::to_string))
            .ok_or_else(|| {
                RigError::Device(format!(
                    "{} has no build_file option set",
                    self.core.name()
                ))
            })?;
        let flash = as_flash_build(self.core.get_capability("flash_build")?)?;
        flash.flash_device(&build_file)
    }
}

fn is_pingable(transport: &dyn CommandTransport) -> bool {
    transport
        .send_command("ping")
        .map(|r| r.trim() == "pong")
        .unwrap_or(false)
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

fn wait_for_bootup_complete(transport: &dyn CommandTransport, name: &str) -> Result<()> {
    for _ in 0..BOOT_POLL_TRIES {
        if let Ok(status) = transport.send_command("boot_status") {
            if status.trim() == "complete" {
                return Ok(());
            }
        }
        std::thread::sleep(BOOT_POLL_INTERVAL);
    }
    Err(CheckReadyError::bootup_incomplete(name, "device did not finish booting")
        .with_recovery("reflash the device with a valid build")
        .into())
}

/// Factory for [`DevBoard`] devices.
pub struct DevBoardFactory {
    opener: Arc<dyn TransportOpener>,
}

impl DevBoardFactory {
    /// Creates the factory around a transport opener collaborator.
    pub fn new(opener: Arc<dyn TransportOpener>) -> Self {
        Self { opener }
    }
}

impl DeviceFactory for DevBoardFactory {
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
        Ok(DevBoard::new(
            Arc::downgrade(manager),
            manager.registry(),
            transport,
            config,
        )?)
    }
}
