//! Call and line reconciliation
//!
//! Two independent call domains are tracked: the softphone (VOIP) calls the
//! session's call manager reports, and mobile calls on the paired phone. Each
//! remembers only whether its current call is incoming. Nothing arbitrates
//! between them; both may be on a call at once.
//!
//! Multiline bases additionally report active/held state for the PC, Mobile
//! and Deskphone lines, recomputed in full on every line change.

use crate::capabilities::Capability;
use crate::controller::DeviceContext;
use crate::device::{DeviceResult, HeadsetDevice, LineType};
use crate::events::{CallState, EventSink, MultiLineState, NormalizedEvent};
use crate::raw::{CallAction, MobileStateChange};

/// Direction of the current call in each domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CallDirectionState {
    pub softphone_incoming: bool,
    pub mobile_incoming: bool,
}

/// Call state machine for both domains
#[derive(Debug, Default)]
pub struct CallTracker {
    state: CallDirectionState,
}

impl CallTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> CallDirectionState {
        self.state
    }

    pub fn reset(&mut self) {
        self.state = CallDirectionState::default();
    }

    /// Call manager notification, softphone or mobile
    pub fn on_call_action(
        &mut self,
        action: CallAction,
        call_id: i32,
        source: &str,
        sink: &mut dyn EventSink,
    ) {
        tracing::debug!(?action, call_id, source, "Call state changed");

        let on_call = |incoming: bool, state: CallState| NormalizedEvent::OnCall {
            call_id,
            source: source.to_string(),
            incoming,
            state,
        };

        match action {
            CallAction::CallRinging => {
                self.state.softphone_incoming = true;
                sink.emit(on_call(true, CallState::Ringing));
            }
            CallAction::AcceptCall | CallAction::CallInProgress => {
                sink.emit(on_call(self.state.softphone_incoming, CallState::OnCall));
                sink.emit(NormalizedEvent::CallAnswered {
                    call_id,
                    source: source.to_string(),
                });
            }
            CallAction::HoldCall
            | CallAction::ResumeCall
            | CallAction::TransferToHeadset
            | CallAction::TransferToSpeaker => {
                sink.emit(on_call(self.state.softphone_incoming, CallState::OnCall));
            }
            CallAction::CallEnded
            | CallAction::CallIdle
            | CallAction::RejectCall
            | CallAction::TerminateCall => {
                self.state.softphone_incoming = false;
                sink.emit(NormalizedEvent::NotOnCall {
                    call_id,
                    source: source.to_string(),
                });
                sink.emit(NormalizedEvent::CallEnded {
                    call_id,
                    source: source.to_string(),
                });
            }
            CallAction::MobileCallRinging => self.mobile_ringing(sink),
            CallAction::MobileCallInProgress => self.mobile_on_call(sink),
            CallAction::MobileCallEnded => self.mobile_ended(sink),
            CallAction::Unknown
            | CallAction::Flash
            | CallAction::MuteOn
            | CallAction::MuteOff
            | CallAction::DoNotDisturb => {
                tracing::trace!(?action, "Ignoring call action");
            }
        }
    }

    /// Mobile state change from the device listener
    pub fn on_mobile_change(
        &mut self,
        change: MobileStateChange,
        device: &dyn HeadsetDevice,
        sink: &mut dyn EventSink,
    ) {
        tracing::debug!(?change, "Mobile state changed");

        match change {
            MobileStateChange::MobileIncoming => self.mobile_ringing(sink),
            MobileStateChange::MobileOnCall => self.mobile_on_call(sink),
            MobileStateChange::MobileCallEnded => self.mobile_ended(sink),
            MobileStateChange::MobileCallerId => {
                let caller_id = device.mobile_caller_id().unwrap_or_else(|e| {
                    tracing::info!(error = %e, "Mobile caller id unavailable");
                    String::new()
                });
                sink.emit(NormalizedEvent::MobileCallerId { caller_id });
            }
            MobileStateChange::MobileOutgoing
            | MobileStateChange::PstnIncomingRingOn
            | MobileStateChange::PstnIncomingRingOff => {
                tracing::trace!(?change, "Ignoring mobile state change");
            }
        }
    }

    fn mobile_ringing(&mut self, sink: &mut dyn EventSink) {
        self.state.mobile_incoming = true;
        sink.emit(NormalizedEvent::OnMobileCall {
            incoming: true,
            state: CallState::Ringing,
        });
    }

    fn mobile_on_call(&mut self, sink: &mut dyn EventSink) {
        sink.emit(NormalizedEvent::OnMobileCall {
            incoming: self.state.mobile_incoming,
            state: CallState::OnCall,
        });
    }

    fn mobile_ended(&mut self, sink: &mut dyn EventSink) {
        self.state.mobile_incoming = false;
        sink.emit(NormalizedEvent::NotOnMobileCall);
    }
}

impl MultiLineState {
    /// Query held then active state of all three lines
    pub fn query(device: &dyn HeadsetDevice) -> DeviceResult<Self> {
        let mut state = MultiLineState::default();

        state.deskphone_held = device.hold_state(LineType::Deskphone)?;
        state.mobile_held = device.hold_state(LineType::Mobile)?;
        state.pc_held = device.hold_state(LineType::Pc)?;

        state.deskphone_active = device.is_line_active(LineType::Deskphone)?;
        state.mobile_active = device.is_line_active(LineType::Mobile)?;
        state.pc_active = device.is_line_active(LineType::Pc)?;

        Ok(state)
    }
}

/// Recompute all line states and emit the full snapshot
///
/// A failed query means the device has no multiline support; the capability
/// is cleared and reported instead of a snapshot.
pub(crate) fn refresh_multiline(ctx: &mut DeviceContext<'_>, multiline: &mut MultiLineState) {
    match MultiLineState::query(&*ctx.device) {
        Ok(state) => {
            tracing::debug!(?state, "Multiline state recomputed");
            *multiline = state;
            ctx.emit(NormalizedEvent::MultiLineStateChanged(state));
        }
        Err(e) => {
            tracing::info!(error = %e, "Multiline query failed, device likely lacks multiline");
            ctx.clear_capability(Capability::Multiline);
        }
    }
}

/// Initial softphone status from the session's call manager
pub(crate) fn initial_softphone_event(has_active_call: bool) -> NormalizedEvent {
    if has_active_call {
        NormalizedEvent::OnCall {
            call_id: 0,
            source: String::new(),
            incoming: false,
            state: CallState::OnCall,
        }
    } else {
        NormalizedEvent::NotOnCall {
            call_id: -1,
            source: String::new(),
        }
    }
}
