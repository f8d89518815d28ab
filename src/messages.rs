use crate::settings::SettingsPatch;

/// Cushion (UART) link state. Owned by the connection machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "Not Connected",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected",
        }
    }
}

/// Classified beacon distance. Advisory only; never gates alerting by itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProximityState {
    Unknown,
    VeryClose,
    Near,
    Far,
    OutOfRange,
}

impl ProximityState {
    pub fn label(&self) -> &'static str {
        match self {
            ProximityState::Unknown => "Not Connected",
            ProximityState::VeryClose => "Very Close",
            ProximityState::Near => "Near",
            ProximityState::Far => "Far",
            ProximityState::OutOfRange => "Out of Range",
        }
    }
}

/// Whether the beacon geofence subscription is active, and whether we are
/// currently believed to be inside it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BeaconRegionStatus {
    NotMonitoring,
    Monitoring,
    InRegion,
}

/// Inbound control-plane messages (MQTT control/settings topics).
#[derive(Clone, Debug)]
pub enum ControlMessage {
    ScanRequest,
    Disconnect,
    SettingsUpdate(SettingsPatch),
}

/// One-shot timer expirations delivered back into the supervisor loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tick {
    ScanTimeout,
    RegionExitTimeout,
}
