//! Connection state machine for the cushion's UART-over-BLE link.
//!
//! The machine is pure: BLE callbacks arrive as [`UartEvent`]s and the
//! resulting radio work comes back as [`UartAction`]s for the supervisor to
//! execute against btleplug. Events are handled strictly in delivery order by
//! the single supervisor loop.

use crate::alerts::Trigger;
use crate::codec::SensorReading;
use crate::messages::ConnectionState;

pub const PROBLEM_CONNECTING: &str = "There was a problem connecting to the cushion";
pub const BLUETOOTH_DISABLED: &str =
    "Bluetooth is not enabled. Make sure that your Bluetooth is turned on";

#[derive(Clone, Debug)]
pub enum UartEvent {
    /// Scan attempt requested (region enter, manual request, or retry).
    ScanRequested,
    /// The 30s scan timer fired.
    ScanTimedOut,
    /// Stop scanning without touching an established connection (region exit).
    StopScanRequested,
    /// A peripheral matching the cushion was discovered.
    CushionDiscovered,
    Connected,
    ConnectFailed,
    /// Service discovery failed or came back empty. Non-fatal.
    DiscoveryFailed,
    /// The RX characteristic was found after discovery.
    RxLocated,
    /// Discovery succeeded but the RX characteristic is absent.
    RxMissing,
    /// A notification arrived on the subscribed RX characteristic.
    ValueUpdated(SensorReading),
    Disconnected,
    /// Explicit user/session teardown.
    DisconnectRequested,
    AdapterPoweredOff,
    AdapterPoweredOn,
    /// Mirror of the proximity monitor's region status; gates retries.
    RegionStatus(bool),
}

#[derive(Clone, Debug, PartialEq)]
pub enum UartAction {
    StartScan,
    StopScan,
    ArmScanTimeout,
    CancelScanTimeout,
    Connect,
    Disconnect,
    DiscoverServices,
    SubscribeRx,
    ReadRx,
    PublishConnection(ConnectionState),
    PublishReading(SensorReading),
    /// Run the alert policy for this trigger.
    Policy(Trigger),
    /// Persistent, user-visible error condition.
    Advisory(&'static str),
}

pub struct UartMachine {
    state: ConnectionState,
    scanning: bool,
    weight_detected: bool,
    in_region: bool,
}

impl UartMachine {
    pub fn new() -> Self {
        UartMachine {
            state: ConnectionState::Disconnected,
            scanning: false,
            weight_detected: false,
            in_region: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning
    }

    /// Last known weight detection, carried across disconnects so the policy
    /// can still reason about "a baby was on the cushion".
    pub fn weight_detected(&self) -> bool {
        self.weight_detected
    }

    pub fn handle(&mut self, event: UartEvent) -> Vec<UartAction> {
        match event {
            UartEvent::ScanRequested => {
                if self.state != ConnectionState::Disconnected || self.scanning {
                    return vec![];
                }
                self.scanning = true;
                vec![UartAction::StartScan, UartAction::ArmScanTimeout]
            }
            UartEvent::ScanTimedOut => {
                if !self.scanning {
                    return vec![];
                }
                self.scanning = false;
                vec![UartAction::StopScan]
            }
            UartEvent::StopScanRequested => {
                if !self.scanning {
                    return vec![];
                }
                self.scanning = false;
                vec![UartAction::StopScan, UartAction::CancelScanTimeout]
            }
            UartEvent::CushionDiscovered => {
                if self.state != ConnectionState::Disconnected {
                    return vec![];
                }
                self.state = ConnectionState::Connecting;
                vec![
                    UartAction::Connect,
                    UartAction::PublishConnection(self.state),
                ]
            }
            UartEvent::Connected => {
                // the driver can observe a connection twice (connect() return
                // plus the central event); only the first one counts
                if self.state == ConnectionState::Connected {
                    return vec![];
                }
                self.scanning = false;
                self.state = ConnectionState::Connected;
                vec![
                    UartAction::StopScan,
                    UartAction::CancelScanTimeout,
                    UartAction::DiscoverServices,
                    UartAction::PublishConnection(self.state),
                    UartAction::Policy(Trigger::ConnectionEstablished),
                ]
            }
            UartEvent::ConnectFailed => {
                // the failed attempt closes the scan window; retry_scan opens
                // a fresh one when the region still warrants it
                self.state = ConnectionState::Disconnected;
                self.scanning = false;
                let mut actions = vec![
                    UartAction::StopScan,
                    UartAction::CancelScanTimeout,
                    UartAction::PublishConnection(self.state),
                    UartAction::Advisory(PROBLEM_CONNECTING),
                ];
                actions.extend(self.retry_scan());
                actions
            }
            UartEvent::DiscoveryFailed | UartEvent::RxMissing => {
                // Reported, not fatal: the link stays up.
                vec![UartAction::Advisory(PROBLEM_CONNECTING)]
            }
            UartEvent::RxLocated => vec![UartAction::SubscribeRx, UartAction::ReadRx],
            UartEvent::ValueUpdated(reading) => {
                if self.state != ConnectionState::Connected {
                    return vec![];
                }
                self.weight_detected = reading.weight_detected;
                vec![
                    UartAction::PublishReading(reading.clone()),
                    UartAction::Policy(Trigger::Reading(reading)),
                ]
            }
            UartEvent::Disconnected => {
                if self.state == ConnectionState::Disconnected {
                    return vec![];
                }
                self.state = ConnectionState::Disconnected;
                let mut actions = vec![
                    UartAction::PublishConnection(self.state),
                    UartAction::Policy(Trigger::ConnectionLost),
                ];
                actions.extend(self.retry_scan());
                actions
            }
            UartEvent::DisconnectRequested => {
                self.state = ConnectionState::Disconnected;
                self.scanning = false;
                self.weight_detected = false;
                vec![
                    UartAction::StopScan,
                    UartAction::CancelScanTimeout,
                    UartAction::Disconnect,
                    UartAction::PublishConnection(self.state),
                ]
            }
            UartEvent::AdapterPoweredOff => {
                self.state = ConnectionState::Disconnected;
                self.scanning = false;
                vec![
                    UartAction::CancelScanTimeout,
                    UartAction::PublishConnection(self.state),
                    UartAction::Advisory(BLUETOOTH_DISABLED),
                ]
            }
            UartEvent::AdapterPoweredOn => self.retry_scan(),
            UartEvent::RegionStatus(in_region) => {
                self.in_region = in_region;
                vec![]
            }
        }
    }

    /// Start a scan after a failure, but only while the beacon says the
    /// caregiver is still in range of the cushion.
    fn retry_scan(&mut self) -> Vec<UartAction> {
        if !self.in_region || self.state != ConnectionState::Disconnected || self.scanning {
            return vec![];
        }
        self.scanning = true;
        vec![UartAction::StartScan, UartAction::ArmScanTimeout]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::parse;

    fn policy_triggers(actions: &[UartAction]) -> Vec<&Trigger> {
        actions
            .iter()
            .filter_map(|a| match a {
                UartAction::Policy(t) => Some(t),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_scan_is_idempotent() {
        let mut machine = UartMachine::new();
        let first = machine.handle(UartEvent::ScanRequested);
        assert!(first.contains(&UartAction::StartScan));
        assert!(first.contains(&UartAction::ArmScanTimeout));
        assert!(machine.handle(UartEvent::ScanRequested).is_empty());
    }

    #[test]
    fn test_scan_noop_when_connected() {
        let mut machine = UartMachine::new();
        machine.handle(UartEvent::Connected);
        assert!(machine.handle(UartEvent::ScanRequested).is_empty());
    }

    #[test]
    fn test_scan_timeout_stops_scan() {
        let mut machine = UartMachine::new();
        machine.handle(UartEvent::ScanRequested);
        assert_eq!(
            machine.handle(UartEvent::ScanTimedOut),
            vec![UartAction::StopScan]
        );
        assert!(!machine.is_scanning());
        // late timer after scan already resolved
        assert!(machine.handle(UartEvent::ScanTimedOut).is_empty());
    }

    #[test]
    fn test_connect_disconnect_cycle() {
        let mut machine = UartMachine::new();
        machine.handle(UartEvent::ScanRequested);

        let actions = machine.handle(UartEvent::CushionDiscovered);
        assert!(actions.contains(&UartAction::Connect));
        assert_eq!(machine.state(), ConnectionState::Connecting);
        // a second discovery of the same device while connecting is ignored
        assert!(machine.handle(UartEvent::CushionDiscovered).is_empty());

        let actions = machine.handle(UartEvent::Connected);
        assert_eq!(machine.state(), ConnectionState::Connected);
        // duplicate connected observation is ignored
        assert!(machine.handle(UartEvent::Connected).is_empty());
        assert!(actions.contains(&UartAction::StopScan));
        assert!(actions.contains(&UartAction::CancelScanTimeout));
        assert!(actions.contains(&UartAction::DiscoverServices));
        assert_eq!(
            policy_triggers(&actions),
            vec![&Trigger::ConnectionEstablished]
        );

        let actions = machine.handle(UartEvent::Disconnected);
        assert_eq!(machine.state(), ConnectionState::Disconnected);
        assert_eq!(policy_triggers(&actions), vec![&Trigger::ConnectionLost]);
        // duplicate disconnect is ignored
        assert!(machine.handle(UartEvent::Disconnected).is_empty());
    }

    #[test]
    fn test_value_updates_only_while_connected() {
        let mut machine = UartMachine::new();
        let reading = parse(b"T=25 W=100");
        assert!(machine.handle(UartEvent::ValueUpdated(reading.clone())).is_empty());

        machine.handle(UartEvent::Connected);
        let actions = machine.handle(UartEvent::ValueUpdated(reading.clone()));
        assert!(actions.contains(&UartAction::PublishReading(reading)));
        assert!(machine.weight_detected());

        // weight memory survives the disconnect for the TooFar decision
        machine.handle(UartEvent::Disconnected);
        assert!(machine.weight_detected());
    }

    #[test]
    fn test_disconnect_retries_only_in_region() {
        let mut machine = UartMachine::new();
        machine.handle(UartEvent::Connected);
        let actions = machine.handle(UartEvent::Disconnected);
        assert!(!actions.contains(&UartAction::StartScan));

        let mut machine = UartMachine::new();
        machine.handle(UartEvent::RegionStatus(true));
        machine.handle(UartEvent::Connected);
        let actions = machine.handle(UartEvent::Disconnected);
        assert!(actions.contains(&UartAction::StartScan));
        assert!(machine.is_scanning());
    }

    #[test]
    fn test_connect_failure_reports_and_retries_in_region() {
        let mut machine = UartMachine::new();
        machine.handle(UartEvent::RegionStatus(true));
        machine.handle(UartEvent::ScanRequested);
        machine.handle(UartEvent::CushionDiscovered);
        let actions = machine.handle(UartEvent::ConnectFailed);
        assert!(actions.contains(&UartAction::Advisory(PROBLEM_CONNECTING)));
        // the old window is closed and a fresh one opened, with a fresh timer
        assert!(actions.contains(&UartAction::CancelScanTimeout));
        assert!(actions.contains(&UartAction::StartScan));
        assert!(actions.contains(&UartAction::ArmScanTimeout));
        assert_eq!(machine.state(), ConnectionState::Disconnected);
        assert!(machine.is_scanning());
    }

    #[test]
    fn test_connect_failure_out_of_region_closes_scan_window() {
        let mut machine = UartMachine::new();
        machine.handle(UartEvent::ScanRequested);
        machine.handle(UartEvent::CushionDiscovered);
        let actions = machine.handle(UartEvent::ConnectFailed);
        assert!(actions.contains(&UartAction::StopScan));
        assert!(actions.contains(&UartAction::CancelScanTimeout));
        assert!(!actions.contains(&UartAction::StartScan));
        assert!(!machine.is_scanning());
        // with the window closed, a later manual request starts over cleanly
        let actions = machine.handle(UartEvent::ScanRequested);
        assert!(actions.contains(&UartAction::StartScan));
    }

    #[test]
    fn test_discovery_failure_is_not_fatal() {
        let mut machine = UartMachine::new();
        machine.handle(UartEvent::Connected);
        let actions = machine.handle(UartEvent::DiscoveryFailed);
        assert_eq!(actions, vec![UartAction::Advisory(PROBLEM_CONNECTING)]);
        assert_eq!(machine.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_explicit_disconnect_resets_everything() {
        let mut machine = UartMachine::new();
        machine.handle(UartEvent::RegionStatus(true));
        machine.handle(UartEvent::Connected);
        machine.handle(UartEvent::ValueUpdated(parse(b"T=25 W=100")));

        let actions = machine.handle(UartEvent::DisconnectRequested);
        assert!(actions.contains(&UartAction::Disconnect));
        assert!(actions.contains(&UartAction::CancelScanTimeout));
        // teardown never auto-retries, even in region
        assert!(!actions.contains(&UartAction::StartScan));
        assert_eq!(machine.state(), ConnectionState::Disconnected);
        assert!(!machine.weight_detected());
    }

    #[test]
    fn test_powered_off_degrades_to_advisory() {
        let mut machine = UartMachine::new();
        machine.handle(UartEvent::ScanRequested);
        let actions = machine.handle(UartEvent::AdapterPoweredOff);
        assert!(actions.contains(&UartAction::Advisory(BLUETOOTH_DISABLED)));
        assert!(actions.contains(&UartAction::CancelScanTimeout));
        assert_eq!(machine.state(), ConnectionState::Disconnected);
        assert!(!machine.is_scanning());
    }

    #[test]
    fn test_powered_on_rescans_in_region() {
        let mut machine = UartMachine::new();
        machine.handle(UartEvent::RegionStatus(true));
        machine.handle(UartEvent::AdapterPoweredOff);
        let actions = machine.handle(UartEvent::AdapterPoweredOn);
        assert!(actions.contains(&UartAction::StartScan));
    }
}
