//! Raw notifications as delivered by the vendor runtime
//!
//! These mirror the runtime's own enumerations: duplicated, sometimes
//! self-triggered, and with no notion of "changed". Interpretation happens in
//! [`crate::headset`], [`crate::docking`] and [`crate::calls`].

use serde::{Deserialize, Serialize};

use crate::events::Contact;

/// Headset state change sub-types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeadsetStateChange {
    Unknown,
    MonoOn,
    MonoOff,
    StereoOn,
    StereoOff,
    MuteOn,
    MuteOff,
    BatteryLevel,
    InRange,
    OutOfRange,
    Docked,
    UnDocked,
    DockedCharging,
    InConference,
    Don,
    Doff,
    SerialNumber,
    Near,
    Far,
    ProximityUnknown,
    ProximityEnabled,
    ProximityDisabled,
}

/// Base (dongle / multiline base) state change sub-types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaseStateChange {
    Unknown,
    PstnLinkEstablished,
    PstnLinkDown,
    VoipLinkEstablished,
    VoipLinkDown,
    MobileLinkEstablished,
    MobileLinkDown,
    AudioMixer,
    RfLinkWideBand,
    RfLinkNarrowBand,
    InterfaceStateChanged,
    AudioLocationChanged,
    SerialNumber,
}

impl BaseStateChange {
    /// Changes that alter which multiline paths are active or held
    pub fn affects_lines(self) -> bool {
        matches!(
            self,
            BaseStateChange::PstnLinkEstablished
                | BaseStateChange::PstnLinkDown
                | BaseStateChange::VoipLinkEstablished
                | BaseStateChange::VoipLinkDown
                | BaseStateChange::MobileLinkEstablished
                | BaseStateChange::MobileLinkDown
                | BaseStateChange::InterfaceStateChanged
        )
    }
}

/// Call manager actions for softphone and mobile calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallAction {
    Unknown,
    AcceptCall,
    TerminateCall,
    HoldCall,
    ResumeCall,
    Flash,
    CallInProgress,
    CallRinging,
    CallEnded,
    TransferToHeadset,
    TransferToSpeaker,
    MuteOn,
    MuteOff,
    MobileCallRinging,
    MobileCallInProgress,
    MobileCallEnded,
    DoNotDisturb,
    CallIdle,
    RejectCall,
}

/// Mobile (paired phone) state changes reported by the device listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MobileStateChange {
    MobileIncoming,
    MobileOnCall,
    MobileCallEnded,
    MobileCallerId,
    MobileOutgoing,
    PstnIncomingRingOn,
    PstnIncomingRingOff,
}

/// Headset buttons
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeadsetButton {
    Unknown,
    VolumeUp,
    VolumeDown,
    VolumeUpHeld,
    VolumeDownHeld,
    Mute,
    MuteHeld,
    Talk,
    Audio,
    Play,
    Pause,
    Next,
    Previous,
    FastForward,
    Rewind,
    Redial,
    Flash,
    Smart,
    OffHook,
    OnHook,
}

/// Base buttons
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaseButton {
    Unknown,
    PstnTalk,
    VoipTalk,
    MobileTalk,
    Subscribe,
    Hold,
    Conference,
}

/// Audio link state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioType {
    #[default]
    Unknown,
    MonoOn,
    MonoOff,
    StereoOn,
    StereoOff,
    MonoOnWait,
    StereoOnWait,
}

/// Device arrival and removal as seen by the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceArrival {
    Added,
    Removed,
}

/// Routing category of a raw notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventCategory {
    HeadsetStateChange,
    BaseStateChange,
    CallStateChange,
    ButtonPress,
    Session,
}

/// One raw notification from the event source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RawEvent {
    HeadsetState {
        change: HeadsetStateChange,
    },
    BaseState {
        change: BaseStateChange,
    },
    CallState {
        action: CallAction,
        #[serde(default)]
        call_id: i32,
        #[serde(default)]
        source: String,
    },
    MobileState {
        change: MobileStateChange,
    },
    Button {
        button: HeadsetButton,
        #[serde(default)]
        audio: AudioType,
        #[serde(default)]
        mute: bool,
    },
    BaseButton {
        button: BaseButton,
    },
    CallRequested {
        contact: Contact,
    },
    DeviceState {
        state: DeviceArrival,
        #[serde(default)]
        path: String,
    },
    /// Serial delivered on the extended headset channel
    HeadsetSerial {
        #[serde(default)]
        serial: Vec<u8>,
    },
    /// Serial delivered on the extended base channel
    BaseSerial {
        #[serde(default)]
        serial: Vec<u8>,
    },
}

impl RawEvent {
    pub fn headset(change: HeadsetStateChange) -> Self {
        RawEvent::HeadsetState { change }
    }

    pub fn base(change: BaseStateChange) -> Self {
        RawEvent::BaseState { change }
    }

    pub fn call(action: CallAction, call_id: i32, source: impl Into<String>) -> Self {
        RawEvent::CallState {
            action,
            call_id,
            source: source.into(),
        }
    }

    pub fn mobile(change: MobileStateChange) -> Self {
        RawEvent::MobileState { change }
    }

    pub fn category(&self) -> EventCategory {
        match self {
            RawEvent::HeadsetState { .. } | RawEvent::HeadsetSerial { .. } => {
                EventCategory::HeadsetStateChange
            }
            RawEvent::BaseState { .. } | RawEvent::BaseSerial { .. } => {
                EventCategory::BaseStateChange
            }
            RawEvent::CallState { .. }
            | RawEvent::MobileState { .. }
            | RawEvent::CallRequested { .. } => EventCategory::CallStateChange,
            RawEvent::Button { .. } | RawEvent::BaseButton { .. } => EventCategory::ButtonPress,
            RawEvent::DeviceState { .. } => EventCategory::Session,
        }
    }

    /// Whether this notification only makes sense with an attached device
    pub fn needs_device(&self) -> bool {
        !matches!(
            self,
            RawEvent::CallState { .. }
                | RawEvent::CallRequested { .. }
                | RawEvent::DeviceState { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_event_json_parsing() {
        let json = r#"{"kind":"headset_state","change":"docked_charging"}"#;
        let event: RawEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event, RawEvent::headset(HeadsetStateChange::DockedCharging));

        let json = r#"{"kind":"call_state","action":"call_ringing","call_id":7,"source":"softphone"}"#;
        let event: RawEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event, RawEvent::call(CallAction::CallRinging, 7, "softphone"));
    }

    #[test]
    fn test_button_defaults() {
        let json = r#"{"kind":"button","button":"flash"}"#;
        let event: RawEvent = serde_json::from_str(json).unwrap();
        assert_eq!(
            event,
            RawEvent::Button {
                button: HeadsetButton::Flash,
                audio: AudioType::Unknown,
                mute: false,
            }
        );
    }

    #[test]
    fn test_categories() {
        assert_eq!(
            RawEvent::headset(HeadsetStateChange::Don).category(),
            EventCategory::HeadsetStateChange
        );
        assert_eq!(
            RawEvent::BaseSerial { serial: vec![1] }.category(),
            EventCategory::BaseStateChange
        );
        assert_eq!(
            RawEvent::mobile(MobileStateChange::MobileOnCall).category(),
            EventCategory::CallStateChange
        );
        assert_eq!(
            RawEvent::BaseButton { button: BaseButton::Hold }.category(),
            EventCategory::ButtonPress
        );
    }

    #[test]
    fn test_needs_device() {
        assert!(RawEvent::headset(HeadsetStateChange::BatteryLevel).needs_device());
        assert!(RawEvent::mobile(MobileStateChange::MobileIncoming).needs_device());
        assert!(!RawEvent::call(CallAction::CallEnded, 1, "").needs_device());
        let added = RawEvent::DeviceState {
            state: DeviceArrival::Added,
            path: String::new(),
        };
        assert!(!added.needs_device());
    }

    #[test]
    fn test_line_affecting_base_changes() {
        assert!(BaseStateChange::InterfaceStateChanged.affects_lines());
        assert!(BaseStateChange::MobileLinkDown.affects_lines());
        assert!(!BaseStateChange::AudioMixer.affects_lines());
        assert!(!BaseStateChange::SerialNumber.affects_lines());
    }
}
