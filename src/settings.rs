use serde_derive::Deserialize;

/// User-controlled monitoring settings.
///
/// `max_temperature` is stored in degrees Fahrenheit regardless of the display
/// unit; `use_fahrenheit` and `display_feet` only affect how values are
/// rendered. The alert policy reads a snapshot of these per decision and never
/// writes them back.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct DeviceSettings {
    #[serde(default = "default_true")]
    pub use_fahrenheit: bool,
    #[serde(default = "default_true")]
    pub display_feet: bool,
    #[serde(default = "default_true")]
    pub alerts_enabled: bool,
    #[serde(default = "default_max_temperature")]
    pub max_temperature: i32,
}

fn default_true() -> bool {
    true
}

fn default_max_temperature() -> i32 {
    85
}

impl Default for DeviceSettings {
    fn default() -> Self {
        DeviceSettings {
            use_fahrenheit: true,
            display_feet: true,
            alerts_enabled: true,
            max_temperature: 85,
        }
    }
}

/// Partial settings update, as received on the settings topic. Absent fields
/// leave the current value untouched.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct SettingsPatch {
    pub use_fahrenheit: Option<bool>,
    pub display_feet: Option<bool>,
    pub alerts_enabled: Option<bool>,
    pub max_temperature: Option<i32>,
}

impl DeviceSettings {
    pub fn apply(&mut self, patch: &SettingsPatch) {
        if let Some(v) = patch.use_fahrenheit {
            self.use_fahrenheit = v;
        }
        if let Some(v) = patch.display_feet {
            self.display_feet = v;
        }
        if let Some(v) = patch.alerts_enabled {
            self.alerts_enabled = v;
        }
        if let Some(v) = patch.max_temperature {
            self.max_temperature = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = DeviceSettings::default();
        assert!(settings.use_fahrenheit);
        assert!(settings.display_feet);
        assert!(settings.alerts_enabled);
        assert_eq!(settings.max_temperature, 85);
    }

    #[test]
    fn test_apply_partial_patch() {
        let mut settings = DeviceSettings::default();
        let patch: SettingsPatch =
            serde_json::from_str(r#"{"alerts_enabled": false, "max_temperature": 90}"#).unwrap();
        settings.apply(&patch);
        assert!(!settings.alerts_enabled);
        assert_eq!(settings.max_temperature, 90);
        // untouched fields keep their values
        assert!(settings.use_fahrenheit);
        assert!(settings.display_feet);
    }

    #[test]
    fn test_empty_patch_is_identity() {
        let mut settings = DeviceSettings::default();
        settings.apply(&SettingsPatch::default());
        assert_eq!(settings, DeviceSettings::default());
    }
}
