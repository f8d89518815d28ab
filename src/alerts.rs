//! Alert decision logic.
//!
//! A single pure function maps (trigger, state snapshot, settings) to the set
//! of alerts to deliver. The supervisor calls it once per triggering event and
//! hands the result straight to the notification sink; nothing is queued or
//! retried.

use crate::codec::SensorReading;
use crate::messages::{BeaconRegionStatus, ConnectionState};
use crate::settings::DeviceSettings;

/// A user-facing notification. Ephemeral; delivered immediately or dropped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AlertEvent {
    TooFar,
    TemperatureExceeded,
    Connected,
    Disconnected,
    EnteredRegion,
    LeftRegion,
}

impl AlertEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            AlertEvent::TooFar => "too_far",
            AlertEvent::TemperatureExceeded => "temperature_exceeded",
            AlertEvent::Connected => "connected",
            AlertEvent::Disconnected => "disconnected",
            AlertEvent::EnteredRegion => "entered_region",
            AlertEvent::LeftRegion => "left_region",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            AlertEvent::TooFar => "You are far from the cushion",
            AlertEvent::TemperatureExceeded => "It's too hot!",
            AlertEvent::Connected => "Cushion connected",
            AlertEvent::Disconnected => "Cushion disconnected",
            AlertEvent::EnteredRegion => "Entered region",
            AlertEvent::LeftRegion => "Left region",
        }
    }

    pub fn body(&self) -> &'static str {
        match self {
            AlertEvent::TooFar | AlertEvent::TemperatureExceeded => "Just a friendly reminder",
            _ => "Ensure your baby is safe",
        }
    }
}

/// The event that caused a policy evaluation.
#[derive(Clone, Debug, PartialEq)]
pub enum Trigger {
    ConnectionEstablished,
    ConnectionLost,
    Reading(SensorReading),
    RegionEntered,
    RegionExited,
}

/// Snapshot of the two state machines at evaluation time.
#[derive(Clone, Copy, Debug)]
pub struct PolicyContext {
    pub connection: ConnectionState,
    pub region: BeaconRegionStatus,
    /// Last known weight detection; carried across disconnects.
    pub weight_detected: bool,
    /// Verbose mode: status notifications for connectivity diagnosis.
    pub debug: bool,
}

/// Decide which alerts a trigger produces.
pub fn evaluate(
    trigger: &Trigger,
    ctx: &PolicyContext,
    settings: &DeviceSettings,
) -> Vec<AlertEvent> {
    match trigger {
        Trigger::Reading(reading) => {
            let exceeded = settings.alerts_enabled
                && reading.weight_detected
                && reading
                    .temperature_fahrenheit()
                    .is_some_and(|f| f > settings.max_temperature);
            if exceeded {
                vec![AlertEvent::TemperatureExceeded]
            } else {
                vec![]
            }
        }
        Trigger::ConnectionEstablished => {
            if ctx.debug {
                vec![AlertEvent::Connected]
            } else {
                vec![]
            }
        }
        Trigger::ConnectionLost => {
            if ctx.debug {
                vec![AlertEvent::Disconnected]
            } else if ctx.region == BeaconRegionStatus::InRegion && ctx.weight_detected {
                // Caregiver is still near a cushion with a baby on it, but the
                // link dropped: the one production-path connectivity alert.
                vec![AlertEvent::TooFar]
            } else {
                vec![]
            }
        }
        Trigger::RegionEntered => {
            if ctx.debug {
                vec![AlertEvent::EnteredRegion]
            } else {
                vec![]
            }
        }
        Trigger::RegionExited => {
            if ctx.debug {
                vec![AlertEvent::LeftRegion]
            } else if ctx.connection != ConnectionState::Connected && ctx.weight_detected {
                // Both signals indicate separation while a baby is believed
                // present.
                vec![AlertEvent::LeftRegion]
            } else {
                vec![]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::parse;

    fn ctx() -> PolicyContext {
        PolicyContext {
            connection: ConnectionState::Connected,
            region: BeaconRegionStatus::InRegion,
            weight_detected: true,
            debug: false,
        }
    }

    #[test]
    fn test_heat_alert_requires_weight() {
        let settings = DeviceSettings::default(); // max 85F
        // 35C ~ 95F, no weight
        let reading = parse(b"T=35 W=3500");
        assert!(evaluate(&Trigger::Reading(reading), &ctx(), &settings).is_empty());
        // same temperature with weight
        let reading = parse(b"T=35 W=1000");
        assert_eq!(
            evaluate(&Trigger::Reading(reading), &ctx(), &settings),
            vec![AlertEvent::TemperatureExceeded]
        );
    }

    #[test]
    fn test_heat_alert_suppressed_when_disabled() {
        let settings = DeviceSettings {
            alerts_enabled: false,
            ..DeviceSettings::default()
        };
        let reading = parse(b"T=45 W=100");
        assert!(evaluate(&Trigger::Reading(reading), &ctx(), &settings).is_empty());
    }

    #[test]
    fn test_heat_alert_threshold_is_exclusive() {
        let settings = DeviceSettings::default();
        // 29.5C rounds to exactly 85F, which does not exceed 85
        let reading = parse(b"T=29.5 W=100");
        assert!(evaluate(&Trigger::Reading(reading), &ctx(), &settings).is_empty());
    }

    #[test]
    fn test_no_heat_alert_without_temperature() {
        let settings = DeviceSettings::default();
        let reading = parse(b"T=bad W=100");
        assert!(evaluate(&Trigger::Reading(reading), &ctx(), &settings).is_empty());
    }

    #[test]
    fn test_connection_status_alerts_debug_gated() {
        let settings = DeviceSettings::default();
        let mut context = ctx();
        assert!(evaluate(&Trigger::ConnectionEstablished, &context, &settings).is_empty());
        context.debug = true;
        assert_eq!(
            evaluate(&Trigger::ConnectionEstablished, &context, &settings),
            vec![AlertEvent::Connected]
        );
        assert_eq!(
            evaluate(&Trigger::ConnectionLost, &context, &settings),
            vec![AlertEvent::Disconnected]
        );
    }

    #[test]
    fn test_too_far_on_in_region_disconnect_with_weight() {
        let settings = DeviceSettings::default();
        let context = ctx();
        assert_eq!(
            evaluate(&Trigger::ConnectionLost, &context, &settings),
            vec![AlertEvent::TooFar]
        );

        let no_weight = PolicyContext {
            weight_detected: false,
            ..context
        };
        assert!(evaluate(&Trigger::ConnectionLost, &no_weight, &settings).is_empty());

        let out_of_region = PolicyContext {
            region: BeaconRegionStatus::Monitoring,
            ..context
        };
        assert!(evaluate(&Trigger::ConnectionLost, &out_of_region, &settings).is_empty());
    }

    #[test]
    fn test_left_region_when_disconnected_with_weight() {
        let settings = DeviceSettings::default();
        let context = PolicyContext {
            connection: ConnectionState::Disconnected,
            region: BeaconRegionStatus::Monitoring,
            weight_detected: true,
            debug: false,
        };
        assert_eq!(
            evaluate(&Trigger::RegionExited, &context, &settings),
            vec![AlertEvent::LeftRegion]
        );

        let connected = PolicyContext {
            connection: ConnectionState::Connected,
            ..context
        };
        assert!(evaluate(&Trigger::RegionExited, &connected, &settings).is_empty());
    }

    #[test]
    fn test_region_alerts_silent_in_production_otherwise() {
        let settings = DeviceSettings::default();
        let context = PolicyContext {
            weight_detected: false,
            ..ctx()
        };
        assert!(evaluate(&Trigger::RegionEntered, &context, &settings).is_empty());
        assert!(evaluate(&Trigger::RegionExited, &context, &settings).is_empty());
    }
}
