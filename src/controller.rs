//! Device lifecycle controller
//!
//! Owns the session, the single active device and all per-device soft state.
//! Raw notifications enter through [`DeviceController::handle`] one at a time
//! and leave as normalized events on the controller's [`EventSink`].
//!
//! Lifecycle: Detached -> Attaching -> Attached -> Detaching -> Detached.
//! Attach captures the device handle; detach drops it together with every
//! piece of soft state, so nothing stale survives into the next attach.
//!
//! SPDX-License-Identifier: GPL-3.0

use crate::calls::{self, CallDirectionState, CallTracker};
use crate::capabilities::{Capability, CapabilityTable, DeviceCapabilities, FamilyQuirks};
use crate::device::{BatteryLevel, DeviceChannel, DeviceInfo, HeadsetDevice, Session};
use crate::docking::{DockingSoftState, DockingSupport, DockingTracker};
use crate::events::{EventSink, MultiLineState, NormalizedEvent, SerialKind};
use crate::headset::{self, FollowUp};
use crate::raw::{AudioType, DeviceArrival, HeadsetButton, RawEvent};

/// Controller lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Detached,
    Attaching,
    Attached,
    Detaching,
}

impl Default for LifecycleState {
    fn default() -> Self {
        LifecycleState::Detached
    }
}

/// Borrowed view of the active device used by the interpreters
pub(crate) struct DeviceContext<'a> {
    pub(crate) device: &'a mut dyn HeadsetDevice,
    pub(crate) capabilities: &'a mut DeviceCapabilities,
    pub(crate) sink: &'a mut dyn EventSink,
}

impl DeviceContext<'_> {
    pub(crate) fn emit(&mut self, event: NormalizedEvent) {
        self.sink.emit(event);
    }

    /// Change one capability flag, notifying only on an actual change
    pub(crate) fn set_capability(&mut self, capability: Capability, value: bool) {
        if self.capabilities.set(capability, value) {
            tracing::info!(%capability, value, "Device capability changed");
            self.sink.emit(NormalizedEvent::CapabilitiesChanged);
        }
    }

    /// Clear a capability after its query interface failed
    ///
    /// Always notifies, even when the flag was already off.
    pub(crate) fn clear_capability(&mut self, capability: Capability) {
        self.capabilities.set(capability, false);
        tracing::info!(%capability, "Device capability cleared");
        self.sink.emit(NormalizedEvent::CapabilitiesChanged);
    }
}

/// The attached device and its soft state
struct ActiveDevice {
    /// Command interface, dropped on detach
    device: Box<dyn HeadsetDevice>,
    info: DeviceInfo,
    /// Resolved display name
    name: String,
    quirks: FamilyQuirks,
    docking: DockingTracker,
    /// Last multiline snapshot
    multiline: MultiLineState,
}

/// Device lifecycle controller
pub struct DeviceController<E: EventSink> {
    /// Host-owned session
    session: Box<dyn Session>,
    /// Capability rows used at the next attach
    table: CapabilityTable,
    /// Profile of the active device, all false when detached
    capabilities: DeviceCapabilities,
    active: Option<ActiveDevice>,
    /// Call direction survives device swaps only until detach
    calls: CallTracker,
    state: LifecycleState,
    sink: E,
}

impl<E: EventSink> DeviceController<E> {
    /// Create a detached controller
    pub fn new(session: Box<dyn Session>, table: CapabilityTable, sink: E) -> Self {
        Self {
            session,
            table,
            capabilities: DeviceCapabilities::default(),
            active: None,
            calls: CallTracker::new(),
            state: LifecycleState::Detached,
            sink,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    pub fn device_info(&self) -> Option<&DeviceInfo> {
        self.active.as_ref().map(|a| &a.info)
    }

    pub fn device_name(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.name.as_str())
    }

    pub fn docking_state(&self) -> Option<&DockingSoftState> {
        self.active.as_ref().map(|a| a.docking.state())
    }

    pub fn call_direction(&self) -> CallDirectionState {
        self.calls.state()
    }

    pub fn multiline_state(&self) -> Option<MultiLineState> {
        self.active.as_ref().map(|a| a.multiline)
    }

    pub fn sink(&self) -> &E {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut E {
        &mut self.sink
    }

    pub fn into_sink(self) -> E {
        self.sink
    }

    /// Replace the capability table; takes effect at the next attach
    pub fn set_capability_table(&mut self, table: CapabilityTable) {
        tracing::info!(devices = table.len(), "Capability table replaced");
        self.table = table;
    }

    /// Current battery level, `Empty` when unknown
    pub fn battery_level(&self) -> BatteryLevel {
        let Some(active) = self.active.as_ref() else {
            return BatteryLevel::default();
        };
        active.device.battery_level().unwrap_or_else(|e| {
            tracing::debug!(error = %e, "Battery level query failed");
            BatteryLevel::default()
        })
    }

    /// Ask the device for base and headset serial numbers
    pub fn request_serial_numbers(&mut self) {
        let Self { active, capabilities, sink, .. } = self;
        let Some(active) = active.as_mut() else {
            tracing::debug!("No device attached, cannot request serial numbers");
            return;
        };
        let mut ctx = DeviceContext {
            device: active.device.as_mut(),
            capabilities,
            sink,
        };
        headset::request_serial_numbers(&mut ctx);
    }

    /// Attach to the session's active device
    ///
    /// Returns false, staying detached, when the session has no device or a
    /// required event channel cannot be subscribed.
    pub fn attach(&mut self) -> bool {
        if let Some(active) = &self.active {
            tracing::debug!(name = %active.name, "Device already attached");
            return true;
        }

        self.state = LifecycleState::Attaching;

        let mut device = match self.session.active_device() {
            Ok(Some(device)) => device,
            Ok(None) => {
                tracing::info!("No active device to attach to");
                self.state = LifecycleState::Detached;
                return false;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Session unavailable, cannot attach");
                self.state = LifecycleState::Detached;
                return false;
            }
        };

        // Detach leaves the minimal profile behind, so resolution below is
        // the only capability notification before Attached
        debug_assert!(self.capabilities.is_minimal());

        self.sink.emit(NormalizedEvent::cleared_serial(SerialKind::Base));
        self.sink.emit(NormalizedEvent::cleared_serial(SerialKind::Headset));

        let info = device.info();
        let name = info.display_name().to_string();
        let quirks = FamilyQuirks::from_name(&name);

        tracing::info!(
            product_id = %info.product_id_hex(),
            name = %name,
            "Attaching to device"
        );

        let mut subscribed = Vec::new();
        for channel in DeviceChannel::ALL {
            match device.subscribe(channel) {
                Ok(()) => subscribed.push(channel),
                Err(e) if channel.is_required() => {
                    tracing::warn!(
                        ?channel,
                        error = %e,
                        "Unable to subscribe to device channel, aborting attach"
                    );
                    for channel in subscribed {
                        if let Err(e) = device.unsubscribe(channel) {
                            tracing::debug!(?channel, error = %e, "Unsubscribe failed");
                        }
                    }
                    self.state = LifecycleState::Detached;
                    return false;
                }
                Err(e) => {
                    tracing::debug!(?channel, error = %e, "Extended channel unavailable");
                }
            }
        }

        self.capabilities = self.table.resolve(info.product_id, &name);
        tracing::info!(capabilities = %self.capabilities, "Device capabilities resolved");
        self.sink.emit(NormalizedEvent::CapabilitiesChanged);

        if device.supports_display() {
            match device.init_display() {
                Ok(()) => tracing::debug!("Display device initialized"),
                Err(e) => tracing::warn!(error = %e, "Display device initialization failed"),
            }
        }

        self.active = Some(ActiveDevice {
            device,
            info: info.clone(),
            name,
            quirks,
            docking: DockingTracker::new(quirks.docking_from_charge),
            multiline: MultiLineState::default(),
        });

        self.sink.emit(NormalizedEvent::Attached { device: info });

        self.poll_device_state();

        self.state = LifecycleState::Attached;
        true
    }

    /// Release the active device and reset all per-device state
    pub fn detach(&mut self) {
        let Some(mut active) = self.active.take() else {
            tracing::debug!("No device attached, nothing to detach");
            return;
        };

        self.state = LifecycleState::Detaching;
        tracing::info!(name = %active.name, "Detaching from device");

        for channel in DeviceChannel::ALL {
            if let Err(e) = active.device.unsubscribe(channel) {
                tracing::debug!(?channel, error = %e, "Unsubscribe failed");
            }
        }
        if let Err(e) = active.device.enable_proximity(false) {
            tracing::debug!(error = %e, "Proximity unregistration failed");
        }
        drop(active);

        self.calls.reset();
        self.sink.emit(NormalizedEvent::NotOnCall {
            call_id: 0,
            source: String::new(),
        });
        self.sink.emit(NormalizedEvent::NotOnMobileCall);

        self.sink.emit(NormalizedEvent::cleared_serial(SerialKind::Base));
        self.sink.emit(NormalizedEvent::cleared_serial(SerialKind::Headset));

        // No device, no capabilities
        self.capabilities = DeviceCapabilities::default();
        self.sink.emit(NormalizedEvent::CapabilitiesChanged);

        self.sink.emit(NormalizedEvent::Detached);
        self.state = LifecycleState::Detached;
    }

    /// Process one raw notification to completion
    pub fn handle(&mut self, event: RawEvent) {
        tracing::trace!(?event, "Raw event");

        match event {
            RawEvent::DeviceState { state, path } => self.on_device_state(state, &path),
            RawEvent::CallState { action, call_id, source } => {
                self.calls.on_call_action(action, call_id, &source, &mut self.sink);
            }
            RawEvent::CallRequested { contact } => {
                tracing::debug!(name = %contact.name, "Call requested");
                self.sink.emit(NormalizedEvent::CallRequested { contact });
            }
            event => self.on_device_event(event),
        }
    }

    fn on_device_state(&mut self, state: DeviceArrival, path: &str) {
        tracing::debug!(?state, path, "Device state changed");

        match state {
            DeviceArrival::Removed => {
                let is_active = self
                    .active
                    .as_ref()
                    .map(|a| a.info.path.eq_ignore_ascii_case(path))
                    .unwrap_or(false);
                if is_active {
                    self.detach();
                    self.attach();
                }
            }
            DeviceArrival::Added => {
                if self.active.is_none() {
                    self.attach();
                }
            }
        }
    }

    fn on_device_event(&mut self, event: RawEvent) {
        let Self { active, capabilities, sink, calls, .. } = self;
        let Some(active) = active.as_mut() else {
            tracing::debug!(category = ?event.category(), "No active device, dropping event");
            return;
        };

        let mut ctx = DeviceContext {
            device: active.device.as_mut(),
            capabilities,
            sink,
        };

        let follow_up = match event {
            RawEvent::HeadsetState { change } => {
                headset::on_headset_change(&mut ctx, &mut active.docking, active.quirks, change)
            }
            RawEvent::BaseState { change } => {
                headset::on_base_change(&mut ctx, &mut active.multiline, change);
                FollowUp::Done
            }
            RawEvent::HeadsetSerial { serial } => {
                headset::on_extended_serial(&mut ctx, SerialKind::Headset, &serial);
                FollowUp::Done
            }
            RawEvent::BaseSerial { serial } => {
                headset::on_extended_serial(&mut ctx, SerialKind::Base, &serial);
                FollowUp::Done
            }
            RawEvent::MobileState { change } => {
                calls.on_mobile_change(change, &*ctx.device, &mut *ctx.sink);
                FollowUp::Done
            }
            RawEvent::Button { button, audio, mute } => {
                tracing::debug!(?button, ?audio, mute, "Device button event");
                if button == HeadsetButton::Flash {
                    ctx.emit(NormalizedEvent::CallSwitched);
                }
                ctx.emit(NormalizedEvent::ButtonPress { button, audio, mute });
                FollowUp::Done
            }
            RawEvent::BaseButton { button } => {
                ctx.emit(NormalizedEvent::BaseButtonPress { button });
                FollowUp::Done
            }
            RawEvent::CallState { .. }
            | RawEvent::CallRequested { .. }
            | RawEvent::DeviceState { .. } => {
                tracing::trace!("Session event reached device dispatch, ignoring");
                FollowUp::Done
            }
        };

        if follow_up == FollowUp::Repoll {
            self.poll_device_state();
            self.sink.emit(NormalizedEvent::BatteryLevelChanged);
        }
    }

    /// Full initial-state poll of the active device
    fn poll_device_state(&mut self) {
        let has_active_call = self.session.has_active_call().unwrap_or_else(|e| {
            tracing::debug!(error = %e, "Call manager state unavailable");
            false
        });

        let Self { active, capabilities, sink, .. } = self;
        let Some(active) = active.as_mut() else {
            tracing::debug!("No device attached, cannot get initial device state");
            return;
        };
        let quirks = active.quirks;

        let mut ctx = DeviceContext {
            device: active.device.as_mut(),
            capabilities,
            sink,
        };

        headset::register_for_proximity(&mut ctx, quirks, true);

        ctx.emit(calls::initial_softphone_event(has_active_call));

        match ctx.device.request_mobile_call_status() {
            Ok(()) => ctx.set_capability(Capability::MobileCallerId, !quirks.no_caller_id),
            Err(e) => {
                tracing::info!(error = %e, "Mobile call status unavailable");
                ctx.set_capability(Capability::MobileCallerId, false);
            }
        }

        headset::poll_wear_state(&mut ctx);
        headset::poll_mute(&mut ctx);
        headset::request_serial_numbers(&mut ctx);

        match active.docking.poll_initial(&*ctx.device, &mut *ctx.sink) {
            DockingSupport::Direct => {}
            DockingSupport::Inferred => ctx.set_capability(Capability::Docking, true),
            DockingSupport::Unsupported => ctx.set_capability(Capability::Docking, false),
        }

        calls::refresh_multiline(&mut ctx, &mut active.multiline);

        let line_active = match ctx.device.audio_state() {
            Ok(audio) => audio == AudioType::MonoOn,
            Err(e) => {
                tracing::debug!(error = %e, "Audio state query failed");
                false
            }
        };
        ctx.emit(NormalizedEvent::LineActiveChanged { active: line_active });
    }
}
