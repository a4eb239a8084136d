//! The capability trait all behavioral facets implement.
//!
//! A capability is a named, independently pluggable facet of device behavior
//! (power switching, file transfer, firmware flashing, ...). Devices declare
//! one concrete flavor per capability slot; instances are created lazily by
//! the [`CapabilityContainer`](crate::container::CapabilityContainer) and
//! released on reset or device close.
//!
//! # Contract
//!
//! - Methods take `&self`; flavors use interior mutability
//!   (`parking_lot::Mutex`) for state changes so instances can be shared as
//!   `Arc<dyn Capability>`.
//! - Every flavor carries the owning device's name for log and error
//!   messages in multi-device testing.
//! - `health_check` verifies the capability's own preconditions (required
//!   configuration, reachable collaborator) and fails with the
//!   `CapabilityNotReady` readiness kind, distinct from device-level health
//!   checks.

use std::any::Any;
use std::sync::Arc;

use crate::error::Result;

/// A live behavioral facet of one device instance.
pub trait Capability: Any + Send + Sync {
    /// Name of the device instance this capability is attached to.
    fn device_name(&self) -> &str;

    /// Checks capability readiness.
    ///
    /// Fails with a `CapabilityNotReady` readiness error when the
    /// capability's preconditions (e.g. required configuration) are unmet.
    fn health_check(&self) -> Result<()> {
        Ok(())
    }

    /// Releases resources held by the capability.
    ///
    /// Called exactly once per container lifetime segment, when the
    /// capability is reset or the owning device closes.
    fn close(&self) {}

    /// Borrow as `Any` for flavor-typed access.
    fn as_any(&self) -> &dyn Any;

    /// Convert an owning handle into `Any` for flavor-typed access.
    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl std::fmt::Debug for dyn Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capability")
            .field("device_name", &self.device_name())
            .finish()
    }
}

/// Downcasts a shared capability handle to a concrete flavor type.
pub fn downcast_arc<T: Capability>(cap: Arc<dyn Capability>) -> Option<Arc<T>> {
    cap.as_any_arc().downcast::<T>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullCapability {
        device_name: String,
    }

    impl Capability for NullCapability {
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

    #[test]
    fn test_default_health_check_passes() {
        let cap = NullCapability {
            device_name: "hub-1234".into(),
        };
        assert!(cap.health_check().is_ok());
        assert_eq!(cap.device_name(), "hub-1234");
    }

    #[test]
    fn test_downcast_arc() {
        let cap: Arc<dyn Capability> = Arc::new(NullCapability {
            device_name: "hub-1234".into(),
        });
        let concrete = downcast_arc::<NullCapability>(cap).unwrap();
        assert_eq!(concrete.device_name(), "hub-1234");
    }
}
