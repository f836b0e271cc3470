//! Headset and base state interpretation
//!
//! Maps raw headset/base notifications onto normalized events. Docking and
//! battery notifications are handed to the [`DockingTracker`]; line changes on
//! a multiline base trigger a full recompute in [`crate::calls`].

use crate::calls;
use crate::capabilities::{Capability, FamilyQuirks};
use crate::controller::DeviceContext;
use crate::device::WearState;
use crate::docking::DockingTracker;
use crate::events::{format_serial, MultiLineState, NormalizedEvent, SerialKind};
use crate::raw::{BaseStateChange, HeadsetStateChange};

/// Work the controller must do after a headset notification was handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FollowUp {
    Done,
    /// Re-run the full initial-state poll, then report a battery change
    Repoll,
}

/// Interpret one headset state change
pub(crate) fn on_headset_change(
    ctx: &mut DeviceContext<'_>,
    docking: &mut DockingTracker,
    quirks: FamilyQuirks,
    change: HeadsetStateChange,
) -> FollowUp {
    tracing::debug!(?change, "Headset state changed");

    match change {
        HeadsetStateChange::Don => ctx.emit(NormalizedEvent::PutOn { initial: false }),
        HeadsetStateChange::Doff => ctx.emit(NormalizedEvent::TakenOff { initial: false }),
        HeadsetStateChange::Near => ctx.emit(NormalizedEvent::Near),
        HeadsetStateChange::Far => ctx.emit(NormalizedEvent::Far),
        HeadsetStateChange::ProximityEnabled => ctx.emit(NormalizedEvent::ProximityEnabled),
        HeadsetStateChange::ProximityUnknown => ctx.emit(NormalizedEvent::ProximityUnknown),
        HeadsetStateChange::ProximityDisabled => {
            // Firmware drops proximity when the phone goes out of range; re-arm it
            ctx.emit(NormalizedEvent::ProximityDisabled);
            register_for_proximity(ctx, quirks, true);
        }
        HeadsetStateChange::InRange => {
            ctx.emit(NormalizedEvent::InRange);
            return FollowUp::Repoll;
        }
        HeadsetStateChange::OutOfRange => {
            ctx.emit(NormalizedEvent::OutOfRange);
            ctx.emit(NormalizedEvent::cleared_serial(SerialKind::Headset));
            ctx.emit(NormalizedEvent::BatteryLevelChanged);
        }
        HeadsetStateChange::BatteryLevel => {
            docking.on_battery_level(&*ctx.device, &mut *ctx.sink);
        }
        HeadsetStateChange::Docked | HeadsetStateChange::DockedCharging => {
            docking.on_docked(&mut *ctx.sink);
        }
        HeadsetStateChange::UnDocked => docking.on_undocked(&mut *ctx.sink),
        HeadsetStateChange::MuteOn => ctx.emit(NormalizedEvent::MuteChanged { muted: true }),
        HeadsetStateChange::MuteOff => ctx.emit(NormalizedEvent::MuteChanged { muted: false }),
        HeadsetStateChange::MonoOn => ctx.emit(NormalizedEvent::LineActiveChanged { active: true }),
        HeadsetStateChange::MonoOff => {
            ctx.emit(NormalizedEvent::LineActiveChanged { active: false })
        }
        HeadsetStateChange::SerialNumber => read_serial(ctx, SerialKind::Headset),
        HeadsetStateChange::Unknown
        | HeadsetStateChange::StereoOn
        | HeadsetStateChange::StereoOff
        | HeadsetStateChange::InConference => {
            tracing::trace!(?change, "Ignoring headset state change");
        }
    }

    FollowUp::Done
}

/// Interpret one base state change
pub(crate) fn on_base_change(
    ctx: &mut DeviceContext<'_>,
    multiline: &mut MultiLineState,
    change: BaseStateChange,
) {
    tracing::debug!(?change, "Base state changed");

    if change.affects_lines() {
        calls::refresh_multiline(ctx, multiline);
    } else if change == BaseStateChange::SerialNumber {
        read_serial(ctx, SerialKind::Base);
    } else {
        tracing::trace!(?change, "Ignoring base state change");
    }
}

/// Serial delivered asynchronously on an extended channel
pub(crate) fn on_extended_serial(ctx: &mut DeviceContext<'_>, kind: SerialKind, serial: &[u8]) {
    match serial.first() {
        Some(&first) if first != 0 => {
            let value = format_serial(serial);
            tracing::debug!(?kind, serial = %value, "Serial number received");
            ctx.emit(NormalizedEvent::SerialNumber { value, kind });
        }
        _ => tracing::debug!(?kind, "Empty serial number on extended channel"),
    }
}

/// Synchronous serial read; emits nothing on failure or an unset serial
pub(crate) fn read_serial(ctx: &mut DeviceContext<'_>, kind: SerialKind) {
    match ctx.device.read_serial(kind) {
        Ok(buf) if buf[0] != 0 => {
            let value = format_serial(&buf);
            tracing::debug!(?kind, serial = %value, "Serial number read");
            ctx.emit(NormalizedEvent::SerialNumber { value, kind });
        }
        Ok(_) => tracing::debug!(?kind, "Device returned an unset serial number"),
        Err(e) => tracing::info!(?kind, error = %e, "Serial number may not be supported"),
    }
}

/// Ask for base then headset serials; answers arrive on the extended channels
pub(crate) fn request_serial_numbers(ctx: &mut DeviceContext<'_>) {
    for kind in [SerialKind::Base, SerialKind::Headset] {
        if let Err(e) = ctx.device.request_serial(kind) {
            tracing::info!(?kind, error = %e, "Serial number request failed");
        }
    }
}

/// Enable or disable proximity reporting
///
/// Registration success turns proximity on (unless the family never reports
/// it); failure turns it off and always reports the capability change.
pub(crate) fn register_for_proximity(
    ctx: &mut DeviceContext<'_>,
    quirks: FamilyQuirks,
    enable: bool,
) {
    let result = ctx.device.enable_proximity(enable).and_then(|()| {
        if enable {
            ctx.device.request_proximity()
        } else {
            Ok(())
        }
    });

    match result {
        Ok(()) => {
            tracing::debug!(enable, "Proximity registration completed");
            ctx.set_capability(Capability::Proximity, !quirks.no_proximity);
        }
        Err(e) => {
            tracing::info!(error = %e, "Proximity may not be supported on this device");
            ctx.clear_capability(Capability::Proximity);
        }
    }
}

/// Initial wearing-sensor state; Unknown reports nothing
pub(crate) fn poll_wear_state(ctx: &mut DeviceContext<'_>) {
    match ctx.device.wear_state() {
        Ok(WearState::Don) => ctx.emit(NormalizedEvent::PutOn { initial: true }),
        Ok(WearState::Doff) => ctx.emit(NormalizedEvent::TakenOff { initial: true }),
        Ok(WearState::Unknown) => tracing::debug!("Wear state unknown"),
        Err(e) => tracing::debug!(error = %e, "Wear state query failed"),
    }
}

pub(crate) fn poll_mute(ctx: &mut DeviceContext<'_>) {
    match ctx.device.mute() {
        Ok(muted) => ctx.emit(NormalizedEvent::MuteChanged { muted }),
        Err(e) => tracing::debug!(error = %e, "Mute query failed"),
    }
}
