//! Device and session seams
//!
//! The vendor runtime is reached through two traits. A [`Session`] is the
//! host-owned connection that knows which device is currently active. A
//! [`HeadsetDevice`] is the command interface of that device: every query the
//! engine makes goes through it and may fail with a [`DeviceError`].
//!
//! SPDX-License-Identifier: GPL-3.0

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::events::SerialKind;
use crate::raw::AudioType;

/// Name reported when neither the product name nor the internal name is set
pub const UNKNOWN_DEVICE_NAME: &str = "Could not determine device name";

/// Charging status reported by the headset battery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeStatus {
    #[default]
    Unknown,
    NotConnected,
    NotBatteryPowered,
    ConnectedNotCharging,
    ConnectedTrickleCharging,
    ConnectedFastCharging,
    ConnectedChargeError,
}

impl ChargeStatus {
    /// True for every "charger connected" sub-state
    pub fn is_connected(self) -> bool {
        matches!(
            self,
            ChargeStatus::ConnectedNotCharging
                | ChargeStatus::ConnectedTrickleCharging
                | ChargeStatus::ConnectedFastCharging
                | ChargeStatus::ConnectedChargeError
        )
    }
}

/// Coarse battery level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatteryLevel {
    #[default]
    Empty,
    Low,
    Medium,
    High,
    Full,
}

/// Last known wearing-sensor state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WearState {
    #[default]
    Unknown,
    Don,
    Doff,
}

/// Audio path of a multiline base
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineType {
    Pc,
    Mobile,
    Deskphone,
}

/// Notification channels a device can be subscribed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceChannel {
    /// Button presses, audio state and mute changes
    DeviceEvents,
    /// Headset, base and mobile state changes
    Listener,
    /// Asynchronous headset serial number delivery
    ExtendedHeadset,
    /// Asynchronous base serial number delivery
    ExtendedBase,
}

impl DeviceChannel {
    pub const ALL: [DeviceChannel; 4] = [
        DeviceChannel::DeviceEvents,
        DeviceChannel::Listener,
        DeviceChannel::ExtendedHeadset,
        DeviceChannel::ExtendedBase,
    ];

    /// Extended channels are optional; failing to subscribe is tolerated
    pub fn is_required(self) -> bool {
        matches!(self, DeviceChannel::DeviceEvents | DeviceChannel::Listener)
    }
}

/// Identity of an attached device
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// USB product id
    pub product_id: u16,
    /// Marketing name, may be empty
    #[serde(default)]
    pub product_name: String,
    /// Firmware internal name, used when the product name is empty
    #[serde(default)]
    pub internal_name: String,
    /// Session-level device path, used to match removal notifications
    #[serde(default)]
    pub path: String,
}

impl DeviceInfo {
    /// Product name, else internal name, else a fixed placeholder
    pub fn display_name(&self) -> &str {
        if !self.product_name.is_empty() {
            &self.product_name
        } else if !self.internal_name.is_empty() {
            &self.internal_name
        } else {
            UNKNOWN_DEVICE_NAME
        }
    }

    /// Product id formatted the way the capability table stores it
    pub fn product_id_hex(&self) -> String {
        format!("0x{:04X}", self.product_id)
    }
}

/// Command interface of the active device
///
/// Queries take `&self`; commands that change device-side registration take
/// `&mut self`. Implementations may raise follow-up raw events as a side
/// effect of a query (some firmware answers a charge-status read with a new
/// battery notification); those arrive through the normal event source.
pub trait HeadsetDevice: Send {
    fn info(&self) -> DeviceInfo;

    fn subscribe(&mut self, channel: DeviceChannel) -> DeviceResult<()>;
    fn unsubscribe(&mut self, channel: DeviceChannel) -> DeviceResult<()>;

    /// Whether the device has a display that needs one-time initialization
    fn supports_display(&self) -> bool;
    fn init_display(&mut self) -> DeviceResult<()>;

    fn enable_proximity(&mut self, enable: bool) -> DeviceResult<()>;
    /// Ask for one asynchronous Near/Far report
    fn request_proximity(&mut self) -> DeviceResult<()>;

    fn is_headset_docked(&self) -> DeviceResult<bool>;
    fn charge_status(&self) -> DeviceResult<ChargeStatus>;
    fn battery_level(&self) -> DeviceResult<BatteryLevel>;
    fn wear_state(&self) -> DeviceResult<WearState>;
    fn mute(&self) -> DeviceResult<bool>;
    fn audio_state(&self) -> DeviceResult<AudioType>;

    fn hold_state(&self, line: LineType) -> DeviceResult<bool>;
    fn is_line_active(&self, line: LineType) -> DeviceResult<bool>;

    /// Synchronous 16-byte serial read
    fn read_serial(&self, kind: SerialKind) -> DeviceResult<[u8; 16]>;
    /// Asynchronous serial request, answered on an extended channel
    fn request_serial(&mut self, kind: SerialKind) -> DeviceResult<()>;

    /// Ask the paired mobile for its call status (answered as mobile state events)
    fn request_mobile_call_status(&mut self) -> DeviceResult<()>;
    fn mobile_caller_id(&self) -> DeviceResult<String>;
}

/// Host-owned connection to the vendor runtime
pub trait Session: Send {
    /// The device the runtime currently considers active, if any
    fn active_device(&mut self) -> DeviceResult<Option<Box<dyn HeadsetDevice>>>;

    /// Whether the runtime's call manager has an active softphone call
    fn has_active_call(&self) -> DeviceResult<bool>;
}

/// Device query error type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// Session or device cannot be reached
    Unavailable,
    /// Feature is absent on this device
    NotSupported(&'static str),
    /// Any other failure reported by the runtime
    Failed(String),
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceError::Unavailable => write!(f, "Device unavailable"),
            DeviceError::NotSupported(feature) => {
                write!(f, "Feature not supported on this device: {}", feature)
            }
            DeviceError::Failed(msg) => write!(f, "Device command failed: {}", msg),
        }
    }
}

impl std::error::Error for DeviceError {}

/// Result of a device query
pub type DeviceResult<T> = Result<T, DeviceError>;
