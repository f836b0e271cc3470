//! Normalized application events
//!
//! Everything the engine tells the consumer is a [`NormalizedEvent`], handed
//! to an [`EventSink`] in the order it was produced.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::device::DeviceInfo;
use crate::raw::{AudioType, BaseButton, HeadsetButton};

/// Call progress reported with OnCall / OnMobileCall
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    Ringing,
    OnCall,
    Idle,
}

/// Which part of the device a serial number belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SerialKind {
    Headset,
    Base,
}

/// Contact attached to a call request
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Contact {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub email: String,
}

/// Active/held snapshot of the three multiline paths
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MultiLineState {
    pub pc_active: bool,
    pub mobile_active: bool,
    pub deskphone_active: bool,
    pub pc_held: bool,
    pub mobile_held: bool,
    pub deskphone_held: bool,
}

/// Outward notification
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum NormalizedEvent {
    Docked { initial: bool },
    Undocked { initial: bool },
    TakenOff { initial: bool },
    PutOn { initial: bool },
    Near,
    Far,
    ProximityEnabled,
    ProximityDisabled,
    ProximityUnknown,
    InRange,
    OutOfRange,
    OnCall {
        call_id: i32,
        source: String,
        incoming: bool,
        state: CallState,
    },
    NotOnCall { call_id: i32, source: String },
    CallAnswered { call_id: i32, source: String },
    CallEnded { call_id: i32, source: String },
    CallSwitched,
    OnMobileCall { incoming: bool, state: CallState },
    NotOnMobileCall,
    MobileCallerId { caller_id: String },
    MuteChanged { muted: bool },
    LineActiveChanged { active: bool },
    SerialNumber { value: String, kind: SerialKind },
    CapabilitiesChanged,
    MultiLineStateChanged(MultiLineState),
    ButtonPress {
        button: HeadsetButton,
        audio: AudioType,
        mute: bool,
    },
    BaseButtonPress { button: BaseButton },
    CallRequested { contact: Contact },
    Attached { device: DeviceInfo },
    Detached,
    BatteryLevelChanged,
}

impl NormalizedEvent {
    /// Empty serial number, used to clear a stale display
    pub fn cleared_serial(kind: SerialKind) -> Self {
        NormalizedEvent::SerialNumber {
            value: String::new(),
            kind,
        }
    }

    /// True for events produced by a startup poll rather than a live transition
    pub fn is_initial_state(&self) -> bool {
        match self {
            NormalizedEvent::Docked { initial }
            | NormalizedEvent::Undocked { initial }
            | NormalizedEvent::TakenOff { initial }
            | NormalizedEvent::PutOn { initial } => *initial,
            _ => false,
        }
    }

    /// Short name for log lines
    pub fn name(&self) -> &'static str {
        match self {
            NormalizedEvent::Docked { .. } => "Docked",
            NormalizedEvent::Undocked { .. } => "Undocked",
            NormalizedEvent::TakenOff { .. } => "TakenOff",
            NormalizedEvent::PutOn { .. } => "PutOn",
            NormalizedEvent::Near => "Near",
            NormalizedEvent::Far => "Far",
            NormalizedEvent::ProximityEnabled => "ProximityEnabled",
            NormalizedEvent::ProximityDisabled => "ProximityDisabled",
            NormalizedEvent::ProximityUnknown => "ProximityUnknown",
            NormalizedEvent::InRange => "InRange",
            NormalizedEvent::OutOfRange => "OutOfRange",
            NormalizedEvent::OnCall { .. } => "OnCall",
            NormalizedEvent::NotOnCall { .. } => "NotOnCall",
            NormalizedEvent::CallAnswered { .. } => "CallAnswered",
            NormalizedEvent::CallEnded { .. } => "CallEnded",
            NormalizedEvent::CallSwitched => "CallSwitched",
            NormalizedEvent::OnMobileCall { .. } => "OnMobileCall",
            NormalizedEvent::NotOnMobileCall => "NotOnMobileCall",
            NormalizedEvent::MobileCallerId { .. } => "MobileCallerId",
            NormalizedEvent::MuteChanged { .. } => "MuteChanged",
            NormalizedEvent::LineActiveChanged { .. } => "LineActiveChanged",
            NormalizedEvent::SerialNumber { .. } => "SerialNumber",
            NormalizedEvent::CapabilitiesChanged => "CapabilitiesChanged",
            NormalizedEvent::MultiLineStateChanged(_) => "MultiLineStateChanged",
            NormalizedEvent::ButtonPress { .. } => "ButtonPress",
            NormalizedEvent::BaseButtonPress { .. } => "BaseButtonPress",
            NormalizedEvent::CallRequested { .. } => "CallRequested",
            NormalizedEvent::Attached { .. } => "Attached",
            NormalizedEvent::Detached => "Detached",
            NormalizedEvent::BatteryLevelChanged => "BatteryLevelChanged",
        }
    }
}

/// Consumer of normalized events
///
/// Events are delivered one at a time, in order, from the single context that
/// processes raw notifications.
pub trait EventSink {
    fn emit(&mut self, event: NormalizedEvent);
}

impl EventSink for Vec<NormalizedEvent> {
    fn emit(&mut self, event: NormalizedEvent) {
        self.push(event);
    }
}

/// Forwards into a channel; a closed receiver just drops the event
impl EventSink for mpsc::UnboundedSender<NormalizedEvent> {
    fn emit(&mut self, event: NormalizedEvent) {
        if self.send(event).is_err() {
            tracing::trace!("Event receiver closed, dropping normalized event");
        }
    }
}

/// Uppercase two-digit hex of every byte
pub fn format_serial(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02X}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state_flag() {
        assert!(NormalizedEvent::Docked { initial: true }.is_initial_state());
        assert!(NormalizedEvent::TakenOff { initial: true }.is_initial_state());
        assert!(!NormalizedEvent::Undocked { initial: false }.is_initial_state());
        assert!(!NormalizedEvent::InRange.is_initial_state());
    }

    #[test]
    fn test_event_json_shape() {
        let json = serde_json::to_string(&NormalizedEvent::SerialNumber {
            value: "AB01".into(),
            kind: SerialKind::Base,
        })
        .unwrap();
        assert_eq!(json, r#"{"event":"serial_number","value":"AB01","kind":"base"}"#);

        let json = serde_json::to_string(&NormalizedEvent::Detached).unwrap();
        assert_eq!(json, r#"{"event":"detached"}"#);
    }

    #[test]
    fn test_multiline_event_flattens_snapshot() {
        let state = MultiLineState { pc_active: true, ..Default::default() };
        let json = serde_json::to_string(&NormalizedEvent::MultiLineStateChanged(state)).unwrap();
        assert!(json.contains(r#""event":"multi_line_state_changed""#));
        assert!(json.contains(r#""pc_active":true"#));
    }

    #[test]
    fn test_format_serial() {
        assert_eq!(format_serial(&[0x0A, 0xFF, 0x00]), "0AFF00");
        assert_eq!(format_serial(&[]), "");
    }

    #[test]
    fn test_channel_sink_survives_closed_receiver() {
        let (mut tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        tx.emit(NormalizedEvent::Detached);
    }

    #[test]
    fn test_vec_sink_preserves_order() {
        let mut sink: Vec<NormalizedEvent> = Vec::new();
        sink.emit(NormalizedEvent::InRange);
        sink.emit(NormalizedEvent::BatteryLevelChanged);
        assert_eq!(sink, vec![NormalizedEvent::InRange, NormalizedEvent::BatteryLevelChanged]);
    }
}
