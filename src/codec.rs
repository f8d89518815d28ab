//! Parser for the cushion's UART telemetry line: `T=<celsius>[,<frac>] W=<int>`.
//!
//! Parsing is total: malformed input degrades to an invalid reading, it never
//! errors. The line is a single ASCII record with no framing, so truncated or
//! garbled payloads are expected during reconnects.

use crate::settings::DeviceSettings;

/// Raw weight readings below this count as "someone is on the cushion".
/// Device calibration constant, not user-configurable.
const WEIGHT_PRESENT_MAX: i32 = 3000;

/// One parsed telemetry record. Transient; produced per characteristic update.
#[derive(Clone, Debug, PartialEq)]
pub struct SensorReading {
    /// Temperature in degrees Celsius as reported by the cushion.
    pub temperature: Option<f64>,
    /// Raw weight sensor value.
    pub weight: Option<i32>,
    /// Whether the weight sensor indicates a body on the cushion.
    pub weight_detected: bool,
    /// False when nothing in the payload could be parsed.
    pub raw_valid: bool,
}

impl SensorReading {
    pub fn invalid() -> Self {
        SensorReading {
            temperature: None,
            weight: None,
            weight_detected: false,
            raw_valid: false,
        }
    }

    /// Temperature converted to whole degrees Fahrenheit. This is the value
    /// the alert threshold is compared against.
    pub fn temperature_fahrenheit(&self) -> Option<i32> {
        self.temperature.map(celsius_to_fahrenheit)
    }

    /// Temperature rendered in the user's configured unit, or "Not Connected"
    /// when there is nothing valid to show.
    pub fn display_temperature(&self, settings: &DeviceSettings) -> String {
        match self.temperature {
            Some(celsius) if settings.use_fahrenheit => {
                format!("{}\u{00b0}F", celsius_to_fahrenheit(celsius))
            }
            Some(celsius) => format!("{}\u{00b0}C", celsius.round() as i32),
            None => "Not Connected".to_string(),
        }
    }
}

/// Convert Celsius to whole degrees Fahrenheit, rounding after the multiply.
pub fn celsius_to_fahrenheit(celsius: f64) -> i32 {
    (celsius * 9.0 / 5.0).round() as i32 + 32
}

/// Inverse of [`celsius_to_fahrenheit`], for display of the threshold.
pub fn fahrenheit_to_celsius(fahrenheit: i32) -> i32 {
    ((f64::from(fahrenheit) - 32.0) * 5.0 / 9.0).round() as i32
}

/// The alert threshold rendered in the user's configured unit. The stored
/// value is always Fahrenheit.
pub fn display_threshold(settings: &DeviceSettings) -> String {
    if settings.use_fahrenheit {
        format!("{}\u{00b0}F", settings.max_temperature)
    } else {
        format!("{}\u{00b0}C", fahrenheit_to_celsius(settings.max_temperature))
    }
}

/// Parse one UART payload. Never fails; see [`SensorReading::raw_valid`].
pub fn parse(raw: &[u8]) -> SensorReading {
    let Ok(text) = std::str::from_utf8(raw) else {
        return SensorReading::invalid();
    };
    let text = text.trim();
    if text.is_empty() {
        return SensorReading::invalid();
    }

    let mut temperature = None;
    let mut weight = None;
    let mut tokens = text.splitn(2, ' ');
    if let Some(token) = tokens.next() {
        temperature = parse_temperature(token);
    }
    if let Some(token) = tokens.next() {
        weight = parse_weight(token);
    }

    let weight_detected = weight.is_some_and(|w| w < WEIGHT_PRESENT_MAX);
    let raw_valid = temperature.is_some() || weight.is_some();
    SensorReading {
        temperature,
        weight,
        weight_detected,
        raw_valid,
    }
}

fn parse_temperature(token: &str) -> Option<f64> {
    // The sensor firmware emits a comma as the decimal separator.
    strip_prefix_ci(token, "T=")?.replace(',', ".").parse().ok()
}

fn parse_weight(token: &str) -> Option<i32> {
    strip_prefix_ci(token, "W=")?.parse().ok()
}

fn strip_prefix_ci<'a>(token: &'a str, prefix: &str) -> Option<&'a str> {
    // `get` rather than slicing: the payload is untrusted and the prefix
    // boundary may fall inside a multi-byte character.
    match (token.get(..prefix.len()), token.get(prefix.len()..)) {
        (Some(head), Some(rest)) if head.eq_ignore_ascii_case(prefix) => Some(rest),
        _ => None,
    }
}
