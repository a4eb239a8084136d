//! Error types for the device framework.
//!
//! This module defines the primary error type, [`RigError`], for the entire
//! framework. Using the `thiserror` crate, it provides a centralized and
//! consistent way to handle the different kinds of failures that can occur,
//! from generic device faults to readiness-check failures and misuse of the
//! reflection surface.
//!
//! ## Error Taxonomy
//!
//! - **`Device`**: generic operational failure raised by devices and
//!   capabilities.
//! - **`CheckReady`**: a readiness (health) check found the device not ready.
//!   This is the only kind the recovery machinery acts on; its
//!   [`ReadyErrorKind`] subkind selects the recovery action.
//! - **`DependencyUnavailable`**: a required external binary or SDK is
//!   missing on the host.
//! - **`UnrecognizedCapability`** / **`UnknownProperty`** /
//!   **`PropertyIsMethod`** / **`PropertyNotSettable`**: programmer and usage
//!   errors at the reflection boundary.
//! - **`Config`**: semantic errors in a device configuration, caught before
//!   any hardware is touched.
//!
//! Readiness-check failures are recovered from automatically (with bounded
//! retries) inside `make_device_ready`; every other kind is fatal and
//! propagates unchanged.

use std::fmt;

use thiserror::Error;

/// Convenience alias for results using the framework error type.
pub type Result<T> = std::result::Result<T, RigError>;

// =============================================================================
// Readiness Errors
// =============================================================================

/// Subkind of a readiness-check failure.
///
/// The recovery dispatcher selects a remediation action based on this kind;
/// kinds without a registered action are re-raised unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadyErrorKind {
    /// Device does not appear as a connection on the host machine.
    NotConnected,
    /// A command sent to the device timed out without a response.
    NotResponsive,
    /// Device is still booting up.
    BootupIncomplete,
    /// A capability's preconditions (e.g. required configuration) are unmet.
    CapabilityNotReady,
}

impl ReadyErrorKind {
    /// Stable CamelCase label used by the `Exception_<Kind>` placeholder path.
    pub fn label(&self) -> &'static str {
        match self {
            ReadyErrorKind::NotConnected => "DeviceNotConnectedError",
            ReadyErrorKind::NotResponsive => "DeviceNotResponsiveError",
            ReadyErrorKind::BootupIncomplete => "DeviceNotBootupCompleteError",
            ReadyErrorKind::CapabilityNotReady => "CapabilityNotReadyError",
        }
    }
}

impl fmt::Display for ReadyErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ReadyErrorKind::NotConnected => "not connected",
            ReadyErrorKind::NotResponsive => "not responsive",
            ReadyErrorKind::BootupIncomplete => "bootup incomplete",
            ReadyErrorKind::CapabilityNotReady => "capability not ready",
        };
        write!(f, "{}", label)
    }
}

/// Error raised by device readiness checks.
///
/// Carries the failing device's name, the failure subkind, and optional
/// reason/recovery hints. The health-check pipeline records the names of the
/// checks that passed before the failure in `checks_passed`.
#[derive(Debug, Clone)]
pub struct CheckReadyError {
    /// Name of the device that failed the check.
    pub device: String,
    /// Failure subkind used for recovery dispatch.
    pub kind: ReadyErrorKind,
    /// Error message of the form `<error message> <details>`.
    pub msg: String,
    /// Optional message describing the reason for the error.
    pub reason: Option<String>,
    /// Optional message describing further recovery options if automated
    /// recovery does not work.
    pub recovery: Option<String>,
    /// Names of the health checks that passed prior to this failure.
    pub checks_passed: Vec<String>,
}

impl CheckReadyError {
    /// Creates a readiness error of the given kind.
    pub fn new(device: impl Into<String>, kind: ReadyErrorKind, msg: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            kind,
            msg: msg.into(),
            reason: None,
            recovery: None,
            checks_passed: Vec::new(),
        }
    }

    /// Device does not appear to be connected to the host.
    pub fn not_connected(device: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::new(device, ReadyErrorKind::NotConnected, msg)
    }

    /// A command to the device timed out without a response.
    pub fn not_responsive(device: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::new(device, ReadyErrorKind::NotResponsive, msg)
            .with_reason("timed out when talking to the device")
    }

    /// Device has not finished booting.
    pub fn bootup_incomplete(device: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::new(device, ReadyErrorKind::BootupIncomplete, msg)
    }

    /// A capability's preconditions are unmet.
    pub fn capability_not_ready(device: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::new(device, ReadyErrorKind::CapabilityNotReady, msg)
    }

    /// Attaches a reason message.
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches a manual-recovery hint.
    pub fn with_recovery(mut self, recovery: impl Into<String>) -> Self {
        self.recovery = Some(recovery.into());
        self
    }
}

impl fmt::Display for CheckReadyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}.", self.device, self.msg)?;
        if let Some(reason) = &self.reason {
            write!(f, " Reason: {}.", reason)?;
        }
        if let Some(recovery) = &self.recovery {
            write!(f, " Recovery: {}.", recovery)?;
        }
        Ok(())
    }
}

impl std::error::Error for CheckReadyError {}

// =============================================================================
// Framework Error
// =============================================================================

/// Primary error type for the device framework.
#[derive(Error, Debug, Clone)]
pub enum RigError {
    /// Generic operational failure raised by devices and capabilities.
    #[error("{0}")]
    Device(String),

    /// A readiness check found the device not ready.
    ///
    /// Only this kind is caught and acted on by the readiness/recovery
    /// machinery; all others are fatal.
    #[error(transparent)]
    CheckReady(#[from] CheckReadyError),

    /// A required external binary or SDK is missing on the host.
    #[error("required dependency '{binary}' is unavailable. {reason}")]
    DependencyUnavailable {
        /// Name of the missing binary or SDK.
        binary: String,
        /// How to make it available.
        reason: String,
    },

    /// A capability name was not found in the capability registry.
    #[error(
        "capability '{name}' is not recognized. \
         Supported capabilities: [{capabilities}]. \
         Supported capability interfaces: [{interfaces}]. \
         Supported capability flavors: [{flavors}]"
    )]
    UnrecognizedCapability {
        /// The name that failed to resolve.
        name: String,
        /// Comma-separated known capability names.
        capabilities: String,
        /// Comma-separated known interface names.
        interfaces: String,
        /// Comma-separated known flavor names.
        flavors: String,
    },

    /// A property name does not exist on the device or its capabilities.
    #[error("{device} does not have a known property '{name}'")]
    UnknownProperty {
        /// Device the lookup ran against.
        device: String,
        /// The unknown property name.
        name: String,
        /// Closest-matching known property names, best first.
        close_matches: Vec<String>,
    },

    /// The resolved attribute is a method, not a property.
    #[error("{device}'s {name} is a method")]
    PropertyIsMethod {
        /// Device the lookup ran against.
        device: String,
        /// The name that resolved to a method.
        name: String,
    },

    /// The property exists but cannot be written.
    #[error("{device}'s {name} is a {kind} property and not settable.{hint}")]
    PropertyNotSettable {
        /// Device the write ran against.
        device: String,
        /// The property name.
        name: String,
        /// Category of the property ("persistent" or "dynamic").
        kind: &'static str,
        /// Additional guidance, prefixed with a space when present.
        hint: String,
    },

    /// Semantic error in a device configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl RigError {
    /// Stable CamelCase label for this error kind.
    ///
    /// Used by the bulk property dump path, which renders read failures as
    /// `Exception_<label>` placeholder strings instead of aborting.
    pub fn label(&self) -> &'static str {
        match self {
            RigError::Device(_) => "DeviceError",
            RigError::CheckReady(err) => err.kind.label(),
            RigError::DependencyUnavailable { .. } => "DependencyUnavailableError",
            RigError::UnrecognizedCapability { .. } => "UnrecognizedCapabilityError",
            RigError::UnknownProperty { .. } => "UnknownPropertyError",
            RigError::PropertyIsMethod { .. } => "PropertyIsMethodError",
            RigError::PropertyNotSettable { .. } => "PropertyNotSettableError",
            RigError::Config(_) => "ConfigurationError",
        }
    }

    /// Whether this is a readiness-check failure (the recoverable kind).
    pub fn is_check_ready(&self) -> bool {
        matches!(self, RigError::CheckReady(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_ready_display() {
        let err = CheckReadyError::not_connected("hub-1234", "device not found on host")
            .with_recovery("reconnect the USB cable");
        assert_eq!(
            err.to_string(),
            "hub-1234 device not found on host. Recovery: reconnect the USB cable."
        );
    }

    #[test]
    fn test_not_responsive_reason() {
        let err = CheckReadyError::not_responsive("board-3f2a", "no response to 'health'");
        assert!(err.to_string().contains("Reason: timed out"));
        assert_eq!(err.kind, ReadyErrorKind::NotResponsive);
    }

    #[test]
    fn test_error_labels() {
        let err = RigError::from(CheckReadyError::bootup_incomplete("d", "still booting"));
        assert_eq!(err.label(), "DeviceNotBootupCompleteError");
        assert!(err.is_check_ready());

        let err = RigError::Device("laser failed".into());
        assert_eq!(err.label(), "DeviceError");
        assert!(!err.is_check_ready());
    }

    #[test]
    fn test_not_settable_display() {
        let err = RigError::PropertyNotSettable {
            device: "hub-1234".into(),
            name: "serial_number".into(),
            kind: "persistent",
            hint: " Redetect the device if it is wrong.".into(),
        };
        assert_eq!(
            err.to_string(),
            "hub-1234's serial_number is a persistent property and not settable. \
             Redetect the device if it is wrong."
        );
    }
}
