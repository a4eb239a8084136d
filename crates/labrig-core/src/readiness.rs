//! Device readiness establishment with bounded, error-driven recovery.
//!
//! [`make_device_ready`] ties the health-check pipeline and the device's
//! `recover` hook together under a caller-supplied setting. There is no
//! persisted state between calls; the setting selects the behavior per call.
//!
//! - `Off`: no-op.
//! - `CheckOnly`: runs the pipeline once, never recovers, re-raises the
//!   original error unchanged.
//! - `On`: runs the pipeline; on a readiness failure invokes the device's
//!   `recover` and re-runs the pipeline, up to the policy's recovery-attempt
//!   bound. A failed recovery propagates immediately; an exhausted bound
//!   propagates the last pipeline error (not the recovery error).
//! - `OnWithReflash`: like `On`, but first reflashes the device's firmware
//!   when the device supports it; otherwise identical to `On`.
//!
//! Only readiness-kind errors are recovered from; any other error kind is
//! fatal and propagates unchanged.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::device::ManagedDevice;
use crate::error::{Result, RigError};

/// Caller-selected readiness mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadinessSetting {
    /// Skip readiness checks and recovery entirely.
    Off,
    /// Run checks once; never recover; surface the original error.
    CheckOnly,
    /// Run checks and recover from readiness failures, bounded by the
    /// policy's recovery-attempt count.
    #[default]
    On,
    /// Reflash the device's firmware before the first check attempt, when
    /// the device supports it, then behave like `On`.
    #[serde(rename = "flash_build")]
    OnWithReflash,
}

impl FromStr for ReadinessSetting {
    type Err = RigError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "off" => Ok(ReadinessSetting::Off),
            "check_only" => Ok(ReadinessSetting::CheckOnly),
            "on" => Ok(ReadinessSetting::On),
            "flash_build" => Ok(ReadinessSetting::OnWithReflash),
            other => Err(RigError::Config(format!(
                "make_device_ready should be 'on', 'off', 'check_only' or 'flash_build', \
                 not '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for ReadinessSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ReadinessSetting::Off => "off",
            ReadinessSetting::CheckOnly => "check_only",
            ReadinessSetting::On => "on",
            ReadinessSetting::OnWithReflash => "flash_build",
        };
        write!(f, "{}", label)
    }
}

/// Bounds for automatic recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessPolicy {
    /// Total recovery attempts permitted per `make_device_ready` call.
    pub recovery_attempts: u32,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self {
            recovery_attempts: 1,
        }
    }
}

/// Checks device readiness and attempts recovery if the setting allows it.
///
/// See the module docs for the per-setting behavior. The pipeline and any
/// recovery action block the calling thread for their full duration; there
/// is no cancellation.
pub fn make_device_ready<D>(
    device: &D,
    setting: ReadinessSetting,
    policy: &ReadinessPolicy,
) -> Result<()>
where
    D: ManagedDevice + ?Sized,
{
    if setting == ReadinessSetting::Off {
        return Ok(());
    }
    let name = device.core().name().to_string();

    if setting == ReadinessSetting::OnWithReflash && device.supports_reflash() {
        tracing::info!("{} reflashing device before readiness checks", name);
        device.reflash()?;
    }

    let mut last = match device.check_device_ready() {
        Ok(()) => return Ok(()),
        Err(RigError::CheckReady(err)) => err,
        Err(fatal) => return Err(fatal),
    };

    if setting == ReadinessSetting::CheckOnly {
        tracing::info!("{} skipping device recovery", name);
        return Err(last.into());
    }

    for _ in 0..policy.recovery_attempts {
        tracing::info!("{} failed check_device_ready with {}", name, last);
        device.recover(last.clone())?;
        tracing::info!("{} re-checking device readiness after recovery attempt", name);
        match device.check_device_ready() {
            Ok(()) => {
                tracing::info!("{} successfully recovered to ready state", name);
                return Ok(());
            }
            Err(RigError::CheckReady(err)) => last = err,
            Err(fatal) => return Err(fatal),
        }
    }
    Err(last.into())
}
