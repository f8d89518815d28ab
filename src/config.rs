use mac_address::MacAddress;
use serde_derive::Deserialize;
use uuid::{Uuid, uuid};

use crate::settings::DeviceSettings;

/// Nordic-UART-style service carrying the cushion telemetry.
const DEFAULT_SERVICE_UUID: Uuid = uuid!("6e400001-b5a3-f393-e0a9-e50e24dcca9e");
/// Device-to-host characteristic (notify + read).
const DEFAULT_RX_UUID: Uuid = uuid!("6e400003-b5a3-f393-e0a9-e50e24dcca9e");
/// Host-to-device characteristic. Tracked but unused for telemetry.
const DEFAULT_TX_UUID: Uuid = uuid!("6e400002-b5a3-f393-e0a9-e50e24dcca9e");
/// Proximity UUID of the cushion base's iBeacon.
const DEFAULT_BEACON_UUID: Uuid = uuid!("e2c56db5-dffb-48d2-b060-d0f5a71096e0");

#[derive(Deserialize, Debug, Clone)]
pub struct AppConfig {
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub cushion: CushionConfig,
    #[serde(default)]
    pub beacon: BeaconConfig,
    pub scan: Option<ScanConfig>,
    /// Initial user settings; updated at runtime via the settings topic.
    #[serde(default)]
    pub settings: DeviceSettings,
}

impl AppConfig {
    pub fn scan_timeout_seconds(&self) -> u64 {
        self.scan
            .as_ref()
            .and_then(|s| s.timeout_seconds)
            .unwrap_or(30)
    }

    pub fn region_exit_timeout_seconds(&self) -> u64 {
        self.scan
            .as_ref()
            .and_then(|s| s.region_exit_timeout_seconds)
            .unwrap_or(30)
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub publisher_id: Option<String>,
    pub topic_path: Option<String>,
    pub keep_alive_seconds: Option<u64>,
}

/// Identity of the sensor cushion peripheral. A peripheral matches when it
/// advertises the service UUID, or when its name/address equals a configured
/// value.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct CushionConfig {
    pub name: Option<String>,
    pub address: Option<MacAddress>,
    pub service_uuid: Option<Uuid>,
    pub rx_uuid: Option<Uuid>,
    pub tx_uuid: Option<Uuid>,
}

impl CushionConfig {
    pub fn service_uuid(&self) -> Uuid {
        self.service_uuid.unwrap_or(DEFAULT_SERVICE_UUID)
    }

    pub fn rx_uuid(&self) -> Uuid {
        self.rx_uuid.unwrap_or(DEFAULT_RX_UUID)
    }

    pub fn tx_uuid(&self) -> Uuid {
        self.tx_uuid.unwrap_or(DEFAULT_TX_UUID)
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct BeaconConfig {
    pub uuid: Option<Uuid>,
    pub path_loss_exponent: Option<f64>,
}

impl BeaconConfig {
    pub fn uuid(&self) -> Uuid {
        self.uuid.unwrap_or(DEFAULT_BEACON_UUID)
    }

    pub fn path_loss_exponent(&self) -> f64 {
        self.path_loss_exponent.unwrap_or(2.0)
    }
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct ScanConfig {
    /// How long a scan may run before it is stopped to save the radio.
    pub timeout_seconds: Option<u64>,
    /// Advertisement silence after which the beacon region is exited.
    pub region_exit_timeout_seconds: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config() {
        let config_str = r#"
            [mqtt]
            host = "localhost"
            port = 1883
            username = "user"
            password = "pass"

            [cushion]
            name = "Guardian Angel"
            address = "DE:AD:BE:EF:00:01"

            [scan]
            timeout_seconds = 20

            [settings]
            max_temperature = 90
        "#;
        let config: AppConfig = toml::de::from_str(config_str).unwrap();
        assert!(config.mqtt.host == "localhost");
        assert_eq!(config.cushion.name.as_deref(), Some("Guardian Angel"));
        assert_eq!(config.scan_timeout_seconds(), 20);
        // unset values fall back
        assert_eq!(config.region_exit_timeout_seconds(), 30);
        assert_eq!(config.settings.max_temperature, 90);
        assert!(config.settings.alerts_enabled);
    }

    #[test]
    fn test_minimal_config_defaults() {
        let config: AppConfig = toml::de::from_str("[mqtt]\nhost = \"localhost\"").unwrap();
        assert_eq!(config.cushion.service_uuid(), DEFAULT_SERVICE_UUID);
        assert_eq!(config.cushion.rx_uuid(), DEFAULT_RX_UUID);
        assert_eq!(config.cushion.tx_uuid(), DEFAULT_TX_UUID);
        assert_eq!(config.beacon.uuid(), DEFAULT_BEACON_UUID);
        assert_eq!(config.scan_timeout_seconds(), 30);
        assert_eq!(config.settings, DeviceSettings::default());
    }
}
