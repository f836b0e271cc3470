//! Docking and battery quirk state machine
//!
//! Turns raw Docked/UnDocked/BatteryLevel notifications into one clean
//! transition per real change.
//!
//! Some families (BT300) cannot be asked whether the headset is docked, so
//! docking is inferred from the charge status instead. Reading the charge
//! status makes the firmware raise another BatteryLevel notification, and an
//! UnDocked one when it is not charging. Left alone that would loop forever:
//! battery event, charge read, battery event, charge read...
//!
//! The loop is broken by two single-use guards set together before every
//! inference (`ignore_next_battery_event`, `ignore_next_undocked_event`) and a
//! cap of [`MAX_BATTERY_INFERENCES`] inferences between confirmed dock
//! transitions. The guards are cleared on different paths; that asymmetry
//! matches how the firmware actually echoes and must not be tidied up.

use crate::device::{ChargeStatus, HeadsetDevice};
use crate::events::{EventSink, NormalizedEvent};

/// Battery events allowed to trigger an inference between dock transitions
pub const MAX_BATTERY_INFERENCES: u32 = 10;

/// Per-device docking soft state, wiped on every attach
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DockingSoftState {
    pub last_docked: bool,
    pub battery_event_count: u32,
    /// One-shot: the first charge-based check reports even without a change
    pub first_dock_check_pending: bool,
    pub ignore_next_undocked_event: bool,
    pub ignore_next_battery_event: bool,
}

impl Default for DockingSoftState {
    fn default() -> Self {
        Self {
            last_docked: false,
            battery_event_count: 0,
            first_dock_check_pending: true,
            ignore_next_undocked_event: false,
            ignore_next_battery_event: false,
        }
    }
}

/// How docking is known for the attached device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DockingSupport {
    /// Direct docked query works
    Direct,
    /// No direct query; docking is inferred from charge status
    Inferred,
    /// Docking cannot be determined
    Unsupported,
}

/// Docking tracker for the active device
#[derive(Debug, Clone)]
pub struct DockingTracker {
    state: DockingSoftState,
    docking_from_charge: bool,
}

impl DockingTracker {
    /// Fresh tracker; `docking_from_charge` enables the charge-status proxy
    pub fn new(docking_from_charge: bool) -> Self {
        Self {
            state: DockingSoftState::default(),
            docking_from_charge,
        }
    }

    pub fn state(&self) -> &DockingSoftState {
        &self.state
    }

    #[cfg(test)]
    pub(crate) fn state_mut(&mut self) -> &mut DockingSoftState {
        &mut self.state
    }

    pub fn reset(&mut self) {
        self.state = DockingSoftState::default();
    }

    /// Raw Docked or DockedCharging
    pub fn on_docked(&mut self, sink: &mut dyn EventSink) {
        if !self.state.last_docked {
            sink.emit(NormalizedEvent::Docked { initial: false });
        } else {
            tracing::debug!("Suppressing duplicate docked notification");
        }
        self.state.last_docked = true;
        self.state.battery_event_count = 0;
    }

    /// Raw UnDocked
    pub fn on_undocked(&mut self, sink: &mut dyn EventSink) {
        if self.state.ignore_next_undocked_event {
            tracing::debug!("Ignoring undocked notification raised by charge status read");
        } else {
            if self.state.last_docked {
                sink.emit(NormalizedEvent::Undocked { initial: false });
                self.state.battery_event_count = 0;
            } else {
                tracing::debug!("Suppressing duplicate undocked notification");
            }
            self.state.last_docked = false;
        }
        self.state.ignore_next_undocked_event = false;
    }

    /// Raw BatteryLevel
    ///
    /// Always ends with `BatteryLevelChanged`. May run one charge-based
    /// docking inference first.
    pub fn on_battery_level(&mut self, device: &dyn HeadsetDevice, sink: &mut dyn EventSink) {
        let state = &self.state;
        if !state.ignore_next_battery_event
            && !state.last_docked
            && state.battery_event_count < MAX_BATTERY_INFERENCES
        {
            self.state.ignore_next_undocked_event = true;
            self.state.ignore_next_battery_event = true;
            self.state.last_docked = self.infer_from_charge(device, false, sink);
            self.state.battery_event_count += 1;

            tracing::debug!(
                count = self.state.battery_event_count,
                docked = self.state.last_docked,
                "Battery event ran docking inference"
            );
        } else {
            if self.state.ignore_next_battery_event {
                self.state.ignore_next_battery_event = false;
            }
            if self.state.last_docked {
                self.state.ignore_next_undocked_event = false;
            }
        }

        sink.emit(NormalizedEvent::BatteryLevelChanged);
    }

    /// Initial docked poll run during attach
    pub fn poll_initial(
        &mut self,
        device: &dyn HeadsetDevice,
        sink: &mut dyn EventSink,
    ) -> DockingSupport {
        match device.is_headset_docked() {
            Ok(docked) => {
                self.state.last_docked = docked;
                if docked {
                    sink.emit(NormalizedEvent::Docked { initial: true });
                } else {
                    sink.emit(NormalizedEvent::Undocked { initial: true });
                    self.state.battery_event_count = 0;
                }
                DockingSupport::Direct
            }
            Err(e) if self.docking_from_charge => {
                tracing::debug!(
                    error = %e,
                    "Docked query unavailable, inferring from charge status"
                );
                self.state.ignore_next_undocked_event = true;
                self.state.ignore_next_battery_event = true;
                self.state.last_docked = self.infer_from_charge(device, true, sink);
                DockingSupport::Inferred
            }
            Err(e) => {
                tracing::debug!(error = %e, "Docked query unavailable");
                DockingSupport::Unsupported
            }
        }
    }

    /// Map charge status to a docked flag, emitting on change or on the first check
    fn infer_from_charge(
        &mut self,
        device: &dyn HeadsetDevice,
        initial: bool,
        sink: &mut dyn EventSink,
    ) -> bool {
        if !self.docking_from_charge {
            return false;
        }

        let charge = match device.charge_status() {
            Ok(charge) => charge,
            Err(e) => {
                tracing::debug!(error = %e, "Charge status read failed");
                ChargeStatus::Unknown
            }
        };

        let first = self.take_first_check();
        if charge.is_connected() {
            tracing::debug!(?charge, "Charger connected, assuming headset is docked");
            if first || !self.state.last_docked {
                sink.emit(NormalizedEvent::Docked { initial });
            }
            true
        } else {
            if first || self.state.last_docked {
                sink.emit(NormalizedEvent::Undocked { initial });
            }
            false
        }
    }

    fn take_first_check(&mut self) -> bool {
        std::mem::replace(&mut self.state.first_dock_check_pending, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulator::{DeviceProfile, Feature, Simulator};

    fn bt300(charge: ChargeStatus) -> (Simulator, Box<dyn HeadsetDevice>) {
        let sim = Simulator::new();
        let mut profile = DeviceProfile::new(0xAA10, "BT300");
        profile.state.charge = charge;
        profile.unsupported.push(Feature::DockedQuery);
        sim.plug(profile);
        let device = sim.device().unwrap();
        (sim, device)
    }

    #[test]
    fn test_docked_twice_emits_once() {
        let mut tracker = DockingTracker::new(false);
        let mut events = Vec::new();

        tracker.on_docked(&mut events);
        tracker.on_docked(&mut events);

        assert_eq!(events, vec![NormalizedEvent::Docked { initial: false }]);
        assert!(tracker.state().last_docked);
    }

    #[test]
    fn test_undock_after_dock() {
        let mut tracker = DockingTracker::new(false);
        let mut events = Vec::new();

        tracker.on_docked(&mut events);
        tracker.on_undocked(&mut events);
        tracker.on_undocked(&mut events);

        assert_eq!(
            events,
            vec![
                NormalizedEvent::Docked { initial: false },
                NormalizedEvent::Undocked { initial: false },
            ]
        );
        assert!(!tracker.state().last_docked);
    }

    #[test]
    fn test_ignored_undocked_leaves_state() {
        let mut tracker = DockingTracker::new(false);
        let mut events = Vec::new();
        tracker.on_docked(&mut events);
        events.clear();

        tracker.state.ignore_next_undocked_event = true;
        tracker.on_undocked(&mut events);

        assert!(events.is_empty());
        assert!(!tracker.state().ignore_next_undocked_event);
        assert!(tracker.state().last_docked);
    }

    #[test]
    fn test_undock_resets_counter_only_when_docked() {
        let mut tracker = DockingTracker::new(false);
        let mut events = Vec::new();

        tracker.state.battery_event_count = 4;
        tracker.on_undocked(&mut events);
        assert_eq!(tracker.state().battery_event_count, 4);

        tracker.state.last_docked = true;
        tracker.on_undocked(&mut events);
        assert_eq!(tracker.state().battery_event_count, 0);
    }

    #[test]
    fn test_battery_always_reports_change() {
        let (_sim, device) = bt300(ChargeStatus::NotConnected);
        let mut tracker = DockingTracker::new(true);
        let mut events = Vec::new();

        tracker.state.ignore_next_battery_event = true;
        tracker.on_battery_level(device.as_ref(), &mut events);

        assert_eq!(events, vec![NormalizedEvent::BatteryLevelChanged]);
        assert!(!tracker.state().ignore_next_battery_event);
    }

    #[test]
    fn test_battery_inference_capped() {
        let (sim, device) = bt300(ChargeStatus::NotConnected);
        let mut tracker = DockingTracker::new(true);
        let mut events = Vec::new();

        for _ in 0..20 {
            tracker.on_battery_level(device.as_ref(), &mut events);
        }

        assert!(sim.stats().charge_reads <= MAX_BATTERY_INFERENCES as usize);
        let battery_events = events
            .iter()
            .filter(|e| **e == NormalizedEvent::BatteryLevelChanged)
            .count();
        assert_eq!(battery_events, 20);
    }

    #[test]
    fn test_inference_stops_at_limit_until_dock() {
        let (sim, device) = bt300(ChargeStatus::NotConnected);
        let mut tracker = DockingTracker::new(true);
        let mut events = Vec::new();

        // Clear the single-use guard after each inference, like the echoed event would
        for _ in 0..40 {
            tracker.on_battery_level(device.as_ref(), &mut events);
            tracker.state.ignore_next_battery_event = false;
        }
        assert_eq!(sim.stats().charge_reads, 10);
        assert_eq!(tracker.state().battery_event_count, MAX_BATTERY_INFERENCES);

        tracker.on_docked(&mut events);
        assert_eq!(tracker.state().battery_event_count, 0);
    }

    #[test]
    fn test_first_inference_reports_undocked() {
        let (_sim, device) = bt300(ChargeStatus::NotConnected);
        let mut tracker = DockingTracker::new(true);
        let mut events = Vec::new();

        let support = tracker.poll_initial(device.as_ref(), &mut events);

        assert_eq!(support, DockingSupport::Inferred);
        assert_eq!(events, vec![NormalizedEvent::Undocked { initial: true }]);
        assert!(!tracker.state().first_dock_check_pending);
        assert!(tracker.state().ignore_next_battery_event);
        assert!(tracker.state().ignore_next_undocked_event);
    }

    #[test]
    fn test_inference_reports_dock_on_charge() {
        let (sim, device) = bt300(ChargeStatus::NotConnected);
        let mut tracker = DockingTracker::new(true);
        let mut events = Vec::new();
        tracker.poll_initial(device.as_ref(), &mut events);
        tracker.state.ignore_next_battery_event = false;
        events.clear();

        sim.update(|state| state.charge = ChargeStatus::ConnectedFastCharging);
        tracker.on_battery_level(device.as_ref(), &mut events);

        assert_eq!(
            events,
            vec![
                NormalizedEvent::Docked { initial: false },
                NormalizedEvent::BatteryLevelChanged,
            ]
        );
        assert!(tracker.state().last_docked);
    }

    #[test]
    fn test_charge_read_failure_counts_as_undocked() {
        let sim = Simulator::new();
        let mut profile = DeviceProfile::new(0xAA10, "BT300");
        profile.unsupported = vec![Feature::DockedQuery, Feature::ChargeStatus];
        sim.plug(profile);
        let device = sim.device().unwrap();

        let mut tracker = DockingTracker::new(true);
        let mut events = Vec::new();
        tracker.poll_initial(device.as_ref(), &mut events);

        assert_eq!(events, vec![NormalizedEvent::Undocked { initial: true }]);
    }

    #[test]
    fn test_non_proxy_family_skips_charge_read() {
        let sim = Simulator::new();
        sim.plug(DeviceProfile::new(0x0415, "Savi 7xx"));
        let device = sim.device().unwrap();

        let mut tracker = DockingTracker::new(false);
        let mut events = Vec::new();
        tracker.on_battery_level(device.as_ref(), &mut events);

        assert_eq!(sim.stats().charge_reads, 0);
        assert_eq!(events, vec![NormalizedEvent::BatteryLevelChanged]);
    }

    #[test]
    fn test_direct_poll() {
        let sim = Simulator::new();
        let mut profile = DeviceProfile::new(0x0415, "Savi 7xx");
        profile.state.docked = true;
        sim.plug(profile);
        let device = sim.device().unwrap();

        let mut tracker = DockingTracker::new(false);
        let mut events = Vec::new();
        let support = tracker.poll_initial(device.as_ref(), &mut events);

        assert_eq!(support, DockingSupport::Direct);
        assert_eq!(events, vec![NormalizedEvent::Docked { initial: true }]);
        assert!(tracker.state().last_docked);
    }

    #[test]
    fn test_unsupported_poll() {
        let sim = Simulator::new();
        let mut profile = DeviceProfile::new(0xC710, "Blackwire C710");
        profile.unsupported.push(Feature::DockedQuery);
        sim.plug(profile);
        let device = sim.device().unwrap();

        let mut tracker = DockingTracker::new(false);
        let mut events = Vec::new();

        assert_eq!(
            tracker.poll_initial(device.as_ref(), &mut events),
            DockingSupport::Unsupported
        );
        assert!(events.is_empty());
    }

    #[test]
    fn test_reset_restores_defaults() {
        let mut tracker = DockingTracker::new(true);
        tracker.state.last_docked = true;
        tracker.state.battery_event_count = 7;
        tracker.state.first_dock_check_pending = false;

        tracker.reset();

        assert_eq!(tracker.state(), &DockingSoftState::default());
    }
}
