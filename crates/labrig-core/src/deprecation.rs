//! Forwarding aliases for renamed attributes.
//!
//! When a property or method moves (typically into a capability), the old
//! name is kept as an explicit forwarding alias registered on the device
//! spec at construction time. Each access through the old name logs a
//! deprecation warning and resolves the new, possibly dotted, target against
//! the live instance. Aliases are independent of one another and of every
//! other name.

/// One forwarding alias from an old attribute name to its replacement.
#[derive(Debug, Clone)]
pub struct Alias {
    /// New attribute path; may be capability-qualified (`"cap.member"`).
    pub target: String,
    /// Whether the target is a method (invoked) or a property (read).
    pub is_method: bool,
}

impl Alias {
    /// Alias forwarding to a property.
    pub fn property(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            is_method: false,
        }
    }

    /// Alias forwarding to a method.
    pub fn method(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            is_method: true,
        }
    }
}

/// Logs one use of a deprecated name.
pub(crate) fn warn_deprecated(device: &str, old_name: &str, target: &str) {
    tracing::warn!(
        "{} '{}' is deprecated; use '{}' instead",
        device,
        old_name,
        target
    );
}
