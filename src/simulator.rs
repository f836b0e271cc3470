//! Scripted in-memory headset runtime
//!
//! Stands in for the vendor runtime: a [`Simulator`] holds at most one
//! plugged [`DeviceProfile`] and hands out a [`Session`] and
//! [`HeadsetDevice`] handles backed by it. Device queries can echo follow-up
//! raw events into a feedback channel, the same way real firmware answers a
//! charge-status read with a fresh battery notification.
//!
//! The replay binary drives it from a JSON-lines script of [`ReplayStep`]s.

use serde::{Deserialize, Deserializer, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

use crate::capabilities::parse_product_id;
use crate::device::{
    BatteryLevel, ChargeStatus, DeviceChannel, DeviceError, DeviceInfo, DeviceResult,
    HeadsetDevice, LineType, Session, WearState,
};
use crate::events::{MultiLineState, SerialKind};
use crate::raw::{AudioType, DeviceArrival, HeadsetStateChange, MobileStateChange, RawEvent};

/// Length of a serial number buffer
const SERIAL_LEN: usize = 16;

/// Device features a profile can mark as unsupported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    Proximity,
    DockedQuery,
    ChargeStatus,
    BatteryLevel,
    WearState,
    Mute,
    AudioState,
    Multiline,
    Serial,
    MobileCallStatus,
    MobileCallerId,
    Display,
}

impl Feature {
    pub fn name(self) -> &'static str {
        match self {
            Feature::Proximity => "proximity",
            Feature::DockedQuery => "docked query",
            Feature::ChargeStatus => "charge status",
            Feature::BatteryLevel => "battery level",
            Feature::WearState => "wear state",
            Feature::Mute => "mute",
            Feature::AudioState => "audio state",
            Feature::Multiline => "multiline",
            Feature::Serial => "serial number",
            Feature::MobileCallStatus => "mobile call status",
            Feature::MobileCallerId => "mobile caller id",
            Feature::Display => "display device",
        }
    }
}

/// Live state of the simulated device
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatedState {
    pub docked: bool,
    pub charge: ChargeStatus,
    pub battery: BatteryLevel,
    pub wear: WearState,
    pub muted: bool,
    pub audio: AudioType,
    /// Paired phone is near
    pub near: bool,
    pub lines: MultiLineState,
    pub headset_serial: Vec<u8>,
    pub base_serial: Vec<u8>,
    pub mobile_call_active: bool,
    pub caller_id: String,
}

/// Partial state change applied by a replay step
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StateUpdate {
    pub docked: Option<bool>,
    pub charge: Option<ChargeStatus>,
    pub battery: Option<BatteryLevel>,
    pub wear: Option<WearState>,
    pub muted: Option<bool>,
    pub audio: Option<AudioType>,
    pub near: Option<bool>,
    pub lines: Option<MultiLineState>,
    pub headset_serial: Option<Vec<u8>>,
    pub base_serial: Option<Vec<u8>>,
    pub mobile_call_active: Option<bool>,
    pub caller_id: Option<String>,
}

impl StateUpdate {
    pub fn apply(self, state: &mut SimulatedState) {
        macro_rules! merge {
            ($($field:ident),*) => {
                $(if let Some(value) = self.$field {
                    state.$field = value;
                })*
            };
        }
        merge!(
            docked,
            charge,
            battery,
            wear,
            muted,
            audio,
            near,
            lines,
            headset_serial,
            base_serial,
            mobile_call_active,
            caller_id
        );
    }
}

/// Static description of a simulated device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceProfile {
    /// Product id, as a number or a hex string
    #[serde(deserialize_with = "product_id_from_json")]
    pub product_id: u16,
    #[serde(default)]
    pub product_name: String,
    #[serde(default)]
    pub internal_name: String,
    #[serde(default)]
    pub path: String,
    /// Device has a display needing initialization
    #[serde(default)]
    pub display: bool,
    #[serde(default)]
    pub state: SimulatedState,
    #[serde(default)]
    pub unsupported: Vec<Feature>,
    /// Channels whose subscription is refused
    #[serde(default)]
    pub failing_channels: Vec<DeviceChannel>,
    /// Charge-status reads raise BatteryLevel (and UnDocked when not charging)
    #[serde(default)]
    pub battery_echo: bool,
}

impl DeviceProfile {
    pub fn new(product_id: u16, product_name: &str) -> Self {
        Self {
            product_id,
            product_name: product_name.to_string(),
            internal_name: String::new(),
            path: format!("sim/{:04x}", product_id),
            display: false,
            state: SimulatedState::default(),
            unsupported: Vec::new(),
            failing_channels: Vec::new(),
            battery_echo: false,
        }
    }

    pub fn info(&self) -> DeviceInfo {
        DeviceInfo {
            product_id: self.product_id,
            product_name: self.product_name.clone(),
            internal_name: self.internal_name.clone(),
            path: self.path.clone(),
        }
    }

    fn supports(&self, feature: Feature) -> bool {
        !self.unsupported.contains(&feature)
    }
}

fn product_id_from_json<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum ProductId {
        Number(u16),
        Text(String),
    }

    match ProductId::deserialize(deserializer)? {
        ProductId::Number(id) => Ok(id),
        ProductId::Text(text) => parse_product_id(&text)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid product id: {}", text))),
    }
}

/// One step of a replay script
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum ReplayStep {
    /// Deliver a raw notification
    Event { event: RawEvent },
    /// Plug a device in; raises a device-added notification
    Plug { profile: DeviceProfile },
    /// Unplug the device; raises a device-removed notification
    Unplug,
    /// Change live device state without notifying
    Update { update: StateUpdate },
    /// Set whether the call manager reports an active softphone call
    SetActiveCall { active: bool },
}

/// Query counters and registration state, for assertions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimulationStats {
    pub charge_reads: usize,
    pub docked_queries: usize,
    pub proximity_registrations: usize,
    pub proximity_enabled: bool,
    pub serial_requests: usize,
    pub mobile_status_requests: usize,
    pub display_inits: usize,
    /// Currently subscribed channels, in subscription order
    pub subscribed: Vec<DeviceChannel>,
}

/// Simulated runtime state
#[derive(Debug, Default)]
pub struct Simulation {
    profile: Option<DeviceProfile>,
    /// Bumped on every plug/unplug; stale device handles stop working
    generation: u64,
    active_call: bool,
    unavailable: bool,
    stats: SimulationStats,
}

/// Shared simulation type
pub type SharedSimulation = Arc<Mutex<Simulation>>;

/// Handle to a simulated runtime
#[derive(Debug, Clone, Default)]
pub struct Simulator {
    shared: SharedSimulation,
    feedback: Option<mpsc::UnboundedSender<RawEvent>>,
}

impl Simulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulator whose devices echo follow-up raw events into `feedback`
    pub fn with_feedback(feedback: mpsc::UnboundedSender<RawEvent>) -> Self {
        Self {
            shared: SharedSimulation::default(),
            feedback: Some(feedback),
        }
    }

    pub fn session(&self) -> SimulatedSession {
        SimulatedSession { sim: self.clone() }
    }

    /// Handle to the plugged device, bypassing the session
    pub fn device(&self) -> Option<Box<dyn HeadsetDevice>> {
        let sim = self.lock();
        sim.profile.as_ref().map(|profile| {
            Box::new(SimulatedDevice {
                sim: self.clone(),
                generation: sim.generation,
                info: profile.info(),
                display: profile.display,
            }) as Box<dyn HeadsetDevice>
        })
    }

    /// Plug a device in, replacing any plugged one
    pub fn plug(&self, profile: DeviceProfile) {
        let mut sim = self.lock();
        tracing::debug!(
            product_id = %format!("0x{:04X}", profile.product_id),
            name = %profile.product_name,
            "Simulated device plugged"
        );
        sim.profile = Some(profile);
        sim.generation += 1;
        sim.stats.subscribed.clear();
        sim.stats.proximity_enabled = false;
    }

    /// Unplug the device, returning its path
    pub fn unplug(&self) -> Option<String> {
        let mut sim = self.lock();
        let profile = sim.profile.take()?;
        tracing::debug!(path = %profile.path, "Simulated device unplugged");
        sim.generation += 1;
        sim.stats.subscribed.clear();
        sim.stats.proximity_enabled = false;
        Some(profile.path)
    }

    /// Mutate the live state of the plugged device
    pub fn update<F: FnOnce(&mut SimulatedState)>(&self, f: F) {
        if let Some(profile) = self.lock().profile.as_mut() {
            f(&mut profile.state);
        }
    }

    pub fn set_active_call(&self, active: bool) {
        self.lock().active_call = active;
    }

    /// Make the session unreachable
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    pub fn stats(&self) -> SimulationStats {
        self.lock().stats.clone()
    }

    /// Apply one replay step, returning the raw notification it raises
    pub fn apply(&self, step: ReplayStep) -> Option<RawEvent> {
        match step {
            ReplayStep::Event { event } => Some(event),
            ReplayStep::Plug { profile } => {
                let path = profile.path.clone();
                self.plug(profile);
                Some(RawEvent::DeviceState {
                    state: DeviceArrival::Added,
                    path,
                })
            }
            ReplayStep::Unplug => self.unplug().map(|path| RawEvent::DeviceState {
                state: DeviceArrival::Removed,
                path,
            }),
            ReplayStep::Update { update } => {
                self.update(|state| update.apply(state));
                None
            }
            ReplayStep::SetActiveCall { active } => {
                self.set_active_call(active);
                None
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Simulation> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn send(&self, event: RawEvent) {
        if let Some(feedback) = &self.feedback {
            if feedback.send(event).is_err() {
                tracing::trace!("Feedback receiver closed");
            }
        }
    }
}

/// Session view of a [`Simulator`]
#[derive(Debug, Clone)]
pub struct SimulatedSession {
    sim: Simulator,
}

impl Session for SimulatedSession {
    fn active_device(&mut self) -> DeviceResult<Option<Box<dyn HeadsetDevice>>> {
        if self.sim.lock().unavailable {
            return Err(DeviceError::Unavailable);
        }
        Ok(self.sim.device())
    }

    fn has_active_call(&self) -> DeviceResult<bool> {
        let sim = self.sim.lock();
        if sim.unavailable {
            return Err(DeviceError::Unavailable);
        }
        Ok(sim.active_call)
    }
}

/// Command interface of a simulated device
#[derive(Debug)]
pub struct SimulatedDevice {
    sim: Simulator,
    generation: u64,
    info: DeviceInfo,
    display: bool,
}

impl SimulatedDevice {
    /// Run `f` against the plugged profile if this handle is current and
    /// `feature` is supported
    fn query<T, F>(&self, feature: Feature, f: F) -> DeviceResult<T>
    where
        F: FnOnce(&mut SimulationStats, &mut DeviceProfile) -> T,
    {
        let mut sim = self.sim.lock();
        let Simulation {
            profile,
            generation,
            stats,
            ..
        } = &mut *sim;

        match profile {
            Some(profile) if *generation == self.generation => {
                if profile.supports(feature) {
                    Ok(f(stats, profile))
                } else {
                    Err(DeviceError::NotSupported(feature.name()))
                }
            }
            _ => Err(DeviceError::Unavailable),
        }
    }

    fn line<F>(&self, line: LineType, select: F) -> DeviceResult<bool>
    where
        F: FnOnce(&MultiLineState, LineType) -> bool,
    {
        self.query(Feature::Multiline, |_, profile| select(&profile.state.lines, line))
    }
}

fn padded_serial(serial: &[u8]) -> [u8; SERIAL_LEN] {
    let mut buf = [0u8; SERIAL_LEN];
    let len = serial.len().min(SERIAL_LEN);
    buf[..len].copy_from_slice(&serial[..len]);
    buf
}

impl HeadsetDevice for SimulatedDevice {
    fn info(&self) -> DeviceInfo {
        self.info.clone()
    }

    fn subscribe(&mut self, channel: DeviceChannel) -> DeviceResult<()> {
        let mut sim = self.sim.lock();
        if sim.generation != self.generation || sim.profile.is_none() {
            return Err(DeviceError::Unavailable);
        }
        let refused = sim
            .profile
            .as_ref()
            .map(|p| p.failing_channels.contains(&channel))
            .unwrap_or(false);
        if refused {
            return Err(DeviceError::Failed(format!("{:?} subscription refused", channel)));
        }
        if !sim.stats.subscribed.contains(&channel) {
            sim.stats.subscribed.push(channel);
        }
        Ok(())
    }

    fn unsubscribe(&mut self, channel: DeviceChannel) -> DeviceResult<()> {
        let mut sim = self.sim.lock();
        if sim.generation != self.generation || sim.profile.is_none() {
            return Err(DeviceError::Unavailable);
        }
        sim.stats.subscribed.retain(|c| *c != channel);
        Ok(())
    }

    fn supports_display(&self) -> bool {
        self.display
    }

    fn init_display(&mut self) -> DeviceResult<()> {
        self.query(Feature::Display, |stats, _| stats.display_inits += 1)
    }

    fn enable_proximity(&mut self, enable: bool) -> DeviceResult<()> {
        self.query(Feature::Proximity, |stats, _| {
            if enable {
                stats.proximity_registrations += 1;
            }
            stats.proximity_enabled = enable;
        })
    }

    fn request_proximity(&mut self) -> DeviceResult<()> {
        let near = self.query(Feature::Proximity, |_, profile| profile.state.near)?;
        self.sim.send(RawEvent::headset(if near {
            HeadsetStateChange::Near
        } else {
            HeadsetStateChange::Far
        }));
        Ok(())
    }

    fn is_headset_docked(&self) -> DeviceResult<bool> {
        self.query(Feature::DockedQuery, |stats, profile| {
            stats.docked_queries += 1;
            profile.state.docked
        })
    }

    fn charge_status(&self) -> DeviceResult<ChargeStatus> {
        let (charge, echo) = self.query(Feature::ChargeStatus, |stats, profile| {
            stats.charge_reads += 1;
            (profile.state.charge, profile.battery_echo)
        })?;

        if echo {
            self.sim.send(RawEvent::headset(HeadsetStateChange::BatteryLevel));
            if !charge.is_connected() {
                self.sim.send(RawEvent::headset(HeadsetStateChange::UnDocked));
            }
        }
        Ok(charge)
    }

    fn battery_level(&self) -> DeviceResult<BatteryLevel> {
        self.query(Feature::BatteryLevel, |_, profile| profile.state.battery)
    }

    fn wear_state(&self) -> DeviceResult<WearState> {
        self.query(Feature::WearState, |_, profile| profile.state.wear)
    }

    fn mute(&self) -> DeviceResult<bool> {
        self.query(Feature::Mute, |_, profile| profile.state.muted)
    }

    fn audio_state(&self) -> DeviceResult<AudioType> {
        self.query(Feature::AudioState, |_, profile| profile.state.audio)
    }

    fn hold_state(&self, line: LineType) -> DeviceResult<bool> {
        self.line(line, |lines, line| match line {
            LineType::Pc => lines.pc_held,
            LineType::Mobile => lines.mobile_held,
            LineType::Deskphone => lines.deskphone_held,
        })
    }

    fn is_line_active(&self, line: LineType) -> DeviceResult<bool> {
        self.line(line, |lines, line| match line {
            LineType::Pc => lines.pc_active,
            LineType::Mobile => lines.mobile_active,
            LineType::Deskphone => lines.deskphone_active,
        })
    }

    fn read_serial(&self, kind: SerialKind) -> DeviceResult<[u8; 16]> {
        self.query(Feature::Serial, |_, profile| match kind {
            SerialKind::Headset => padded_serial(&profile.state.headset_serial),
            SerialKind::Base => padded_serial(&profile.state.base_serial),
        })
    }

    fn request_serial(&mut self, kind: SerialKind) -> DeviceResult<()> {
        let serial = self.query(Feature::Serial, |stats, profile| {
            stats.serial_requests += 1;
            match kind {
                SerialKind::Headset => profile.state.headset_serial.clone(),
                SerialKind::Base => profile.state.base_serial.clone(),
            }
        })?;

        self.sim.send(match kind {
            SerialKind::Headset => RawEvent::HeadsetSerial { serial },
            SerialKind::Base => RawEvent::BaseSerial { serial },
        });
        Ok(())
    }

    fn request_mobile_call_status(&mut self) -> DeviceResult<()> {
        let on_call = self.query(Feature::MobileCallStatus, |stats, profile| {
            stats.mobile_status_requests += 1;
            profile.state.mobile_call_active
        })?;

        if on_call {
            self.sim.send(RawEvent::mobile(MobileStateChange::MobileOnCall));
        }
        Ok(())
    }

    fn mobile_caller_id(&self) -> DeviceResult<String> {
        self.query(Feature::MobileCallerId, |_, profile| profile.state.caller_id.clone())
    }
}
