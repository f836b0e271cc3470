//! headsetd Library
//!
//! Normalizes raw headset and base notifications into application events.
//! Public API for testing and integration.

pub mod calls;
pub mod capabilities;
pub mod config;
pub mod controller;
pub mod device;
pub mod docking;
pub mod events;
pub mod headset;
pub mod raw;
pub mod simulator;
pub mod watcher;

/// Re-export commonly used types
pub use calls::{CallDirectionState, CallTracker};
pub use capabilities::{
    Capability, CapabilityError, CapabilityTable, DeviceCapabilities, FamilyQuirks,
    CAPABILITIES_FILE,
};
pub use config::{Config, ConfigError};
pub use controller::{DeviceController, LifecycleState};
pub use device::{
    BatteryLevel, ChargeStatus, DeviceChannel, DeviceError, DeviceInfo, DeviceResult,
    HeadsetDevice, LineType, Session, WearState,
};
pub use docking::{DockingSoftState, DockingSupport, DockingTracker, MAX_BATTERY_INFERENCES};
pub use events::{CallState, Contact, EventSink, MultiLineState, NormalizedEvent, SerialKind};
pub use raw::RawEvent;
pub use simulator::{DeviceProfile, ReplayStep, Simulator};
pub use watcher::{CapabilityWatcher, WatchError};
