//! `labrig-core`
//!
//! Capability resolution and device lifecycle core for the labrig lab
//! hardware framework.
//!
//! The framework controls heterogeneous lab hardware (USB hubs, dev boards,
//! network switches, power relays) through a uniform device abstraction.
//! This crate is the part with the invariants: how a device instance
//! advertises pluggable behavioral facets ("capabilities"), how those facets
//! are lazily instantiated and torn down, how a uniform property-reflection
//! surface is built across the device and its capabilities, and how device
//! readiness is established through an ordered health-check pipeline with
//! bounded, error-driven recovery.
//!
//! ## Key Types
//!
//! - [`CapabilityRegistry`]: capability name -> interface -> flavor lookup,
//!   populated once at composition time.
//! - [`CapabilityContainer`]: per-device lazy capability instantiation and
//!   teardown.
//! - [`DeviceCore`] / [`ManagedDevice`]: device state, the property
//!   reflection surface, and the readiness/recovery hooks device types
//!   override.
//! - [`make_device_ready`]: the readiness state machine
//!   (`Off`/`CheckOnly`/`On`/`OnWithReflash`).
//! - [`RigError`]: the typed error taxonomy; only readiness-kind errors are
//!   recovered from automatically.
//!
//! ## Execution Model
//!
//! The core assumes a single logical thread of control per device instance.
//! Health checks and recovery may perform blocking I/O through external
//! collaborators and block the calling thread for their full duration; there
//! is no cancellation. The capability container's cache is the only shared
//! mutable state, and lifecycle operations for one capability must be
//! serialized by the caller.
//!
//! Transports, command tables, flashing tools, and configuration persistence
//! are external collaborators reached through narrow traits
//! ([`DeviceFactory`], [`OptionsPersister`], and the closures captured in
//! device specs); this crate implements no wire protocol and performs no
//! device discovery.

pub mod capability;
pub mod container;
pub mod deprecation;
pub mod device;
pub mod error;
pub mod health;
pub mod manager;
pub mod properties;
pub mod readiness;
pub mod recovery;
pub mod registry;

pub use capability::{downcast_arc, Capability};
pub use container::{CapabilityContainer, CapabilitySlot, CapabilitySlotBuilder};
pub use deprecation::Alias;
pub use device::{
    DeviceConfig, DeviceCore, DeviceSpec, DeviceSpecBuilder, ManagedDevice, OptionsStore,
    PropertyMap,
};
pub use error::{CheckReadyError, ReadyErrorKind, Result, RigError};
pub use health::{run_health_checks, HealthCheck};
pub use manager::{DeviceFactory, DeviceManager, OptionsPersister};
pub use properties::{PropertyDescriptor, PropertyKind, PropertyOwner, ERROR_PREFIX};
pub use readiness::{make_device_ready, ReadinessPolicy, ReadinessSetting};
pub use recovery::RecoveryDispatcher;
pub use registry::{CapabilityRegistry, CapabilityRegistryBuilder, Resolved};
