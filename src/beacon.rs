//! Beacon region monitoring and ranging.
//!
//! The cushion base carries an iBeacon that works as a coarse geofence gate:
//! entering its region is what triggers a BLE scan attempt, nothing else. On
//! this platform there is no geofence API, so the region is reconstructed from
//! the beacon's manufacturer-data advertisements: the first matching frame is
//! a region enter, every frame is a ranging sample, and a configurable period
//! of silence is a region exit.

use uuid::Uuid;

use crate::alerts::Trigger;
use crate::messages::{BeaconRegionStatus, ProximityState};

/// Apple's Bluetooth SIG company identifier, used by iBeacon frames.
pub const APPLE_COMPANY_ID: u16 = 0x004C;

const IBEACON_TYPE: u8 = 0x02;
const IBEACON_LENGTH: u8 = 0x15;

/// One decoded iBeacon advertisement frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BeaconFrame {
    pub uuid: Uuid,
    pub major: u16,
    pub minor: u16,
    /// Calibrated RSSI at one meter.
    pub tx_power: i8,
}

/// Decode an iBeacon frame from a manufacturer-data payload (the bytes after
/// the company identifier). Returns `None` for anything else.
pub fn parse_frame(company_id: u16, payload: &[u8]) -> Option<BeaconFrame> {
    if company_id != APPLE_COMPANY_ID || payload.len() < 23 {
        return None;
    }
    if payload[0] != IBEACON_TYPE || payload[1] != IBEACON_LENGTH {
        return None;
    }
    let uuid = Uuid::from_slice(&payload[2..18]).ok()?;
    let major = u16::from_be_bytes([payload[18], payload[19]]);
    let minor = u16::from_be_bytes([payload[20], payload[21]]);
    let tx_power = payload[22] as i8;
    Some(BeaconFrame {
        uuid,
        major,
        minor,
        tx_power,
    })
}

/// Log-distance path loss estimate in meters. `path_loss_exponent` is ~2.0 in
/// free space, higher indoors.
pub fn estimate_distance(tx_power: i8, rssi: i16, path_loss_exponent: f64) -> f64 {
    10f64.powf((f64::from(tx_power) - f64::from(rssi)) / (10.0 * path_loss_exponent))
}

/// Classify a ranged distance into the advisory proximity bands. A negative
/// estimate means the sample is invalid and the previous state should stand.
pub fn classify(distance: f64) -> Option<ProximityState> {
    if distance < 0.0 {
        None
    } else if distance <= 10.0 {
        Some(ProximityState::VeryClose)
    } else if distance <= 20.0 {
        Some(ProximityState::Near)
    } else {
        Some(ProximityState::Far)
    }
}

#[derive(Clone, Debug)]
pub enum BeaconEvent {
    /// Begin region monitoring. Idempotent.
    StartMonitoring,
    /// A matching iBeacon frame was observed; distance in meters if the
    /// advertisement carried an RSSI.
    Sighted { distance: Option<f64> },
    /// The advertisement-silence timer fired.
    ExitTimedOut,
    /// Session teardown.
    StopMonitoring,
}

#[derive(Clone, Debug, PartialEq)]
pub enum BeaconAction {
    /// Region entered: the supervisor may now start a cushion scan.
    Entered,
    /// Region exited: the supervisor stops any active scan.
    Exited,
    ArmExitTimeout,
    CancelExitTimeout,
    PublishRegion(BeaconRegionStatus),
    PublishProximity(ProximityState),
    Policy(Trigger),
}

pub struct BeaconMachine {
    status: BeaconRegionStatus,
    proximity: ProximityState,
}

impl BeaconMachine {
    pub fn new() -> Self {
        BeaconMachine {
            status: BeaconRegionStatus::NotMonitoring,
            proximity: ProximityState::Unknown,
        }
    }

    pub fn status(&self) -> BeaconRegionStatus {
        self.status
    }

    pub fn proximity(&self) -> ProximityState {
        self.proximity
    }

    pub fn handle(&mut self, event: BeaconEvent) -> Vec<BeaconAction> {
        match event {
            BeaconEvent::StartMonitoring => {
                if self.status != BeaconRegionStatus::NotMonitoring {
                    return vec![];
                }
                self.status = BeaconRegionStatus::Monitoring;
                vec![BeaconAction::PublishRegion(self.status)]
            }
            BeaconEvent::Sighted { distance } => {
                if self.status == BeaconRegionStatus::NotMonitoring {
                    return vec![];
                }
                let mut actions = vec![];
                if self.status != BeaconRegionStatus::InRegion {
                    self.status = BeaconRegionStatus::InRegion;
                    actions.push(BeaconAction::Entered);
                    actions.push(BeaconAction::PublishRegion(self.status));
                    actions.push(BeaconAction::Policy(Trigger::RegionEntered));
                }
                // every sighting pushes the exit deadline out
                actions.push(BeaconAction::ArmExitTimeout);
                if let Some(proximity) = distance.and_then(classify) {
                    if proximity != self.proximity {
                        self.proximity = proximity;
                        actions.push(BeaconAction::PublishProximity(proximity));
                    }
                }
                actions
            }
            BeaconEvent::ExitTimedOut => {
                if self.status != BeaconRegionStatus::InRegion {
                    return vec![];
                }
                self.status = BeaconRegionStatus::Monitoring;
                self.proximity = ProximityState::OutOfRange;
                vec![
                    BeaconAction::Exited,
                    BeaconAction::PublishRegion(self.status),
                    BeaconAction::PublishProximity(self.proximity),
                    BeaconAction::Policy(Trigger::RegionExited),
                ]
            }
            BeaconEvent::StopMonitoring => {
                if self.status == BeaconRegionStatus::NotMonitoring {
                    return vec![];
                }
                self.status = BeaconRegionStatus::NotMonitoring;
                self.proximity = ProximityState::Unknown;
                vec![
                    BeaconAction::CancelExitTimeout,
                    BeaconAction::PublishRegion(self.status),
                    BeaconAction::PublishProximity(self.proximity),
                ]
            }
        }
    }
}
