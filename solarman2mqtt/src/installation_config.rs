use std::{fmt, fs, path::Path};

use log::info;
use serde::{de::Error as _, Deserialize, Deserializer};
use serde_json::Value;

use crate::{mqtt_config::MqttConfig, Error, Result};

const STATION_ID_RANGE: std::ops::RangeInclusive<u64> = 100_000..=9_999_999;
const MQTT_PORT_RANGE: std::ops::RangeInclusive<u16> = 1024..=65535;

/// One monitored PV site: API credentials, device identifiers and the broker
/// the readings are republished to.
#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallationConfig {
    pub name: String,
    pub url: String,
    pub appid: String,
    pub secret: String,
    pub username: String,
    pub passhash: String,
    #[serde(deserialize_with = "whole_station_id")]
    pub station_id: u64,
    pub inverter_id: String,
    pub logger_id: String,
    pub meter_id: Option<String>,
    #[serde(default)]
    pub debug: bool,
    pub mqtt: MqttConfig,
}

/// Accepts the station id as any JSON number without a fractional part.
fn whole_station_id<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<u64, D::Error> {
    let number = serde_json::Number::deserialize(deserializer)?;
    number
        .as_u64()
        .or_else(|| {
            number
                .as_f64()
                .filter(|f| f.fract() == 0.0 && *f >= 0.0 && *f <= u64::MAX as f64)
                .map(|f| f as u64)
        })
        .ok_or_else(|| D::Error::custom(format!("stationId must be a whole number, got {number}")))
}

impl InstallationConfig {
    /// Checks lengths and ranges the type system cannot express.
    ///
    /// Stops at the first violation.
    pub fn validate(&self) -> Result<()> {
        exact_len("appid", &self.appid, 15)?;
        exact_len("secret", &self.secret, 32)?;
        exact_len("passhash", &self.passhash, 64)?;
        if !self.passhash.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(invalid("passhash", "must be a hex encoded SHA-256 digest"));
        }
        if !STATION_ID_RANGE.contains(&self.station_id) {
            return Err(invalid(
                "stationId",
                format!(
                    "{} is outside {}..={}",
                    self.station_id,
                    STATION_ID_RANGE.start(),
                    STATION_ID_RANGE.end()
                ),
            ));
        }
        if self.inverter_id.chars().count() < 10 {
            return Err(invalid("inverterId", "must be at least 10 characters"));
        }
        exact_len("loggerId", &self.logger_id, 10)?;
        if !MQTT_PORT_RANGE.contains(&self.mqtt.port) {
            return Err(invalid(
                "mqtt.port",
                format!(
                    "{} is outside {}..={}",
                    self.mqtt.port,
                    MQTT_PORT_RANGE.start(),
                    MQTT_PORT_RANGE.end()
                ),
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for InstallationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstallationConfig")
            .field("name", &self.name)
            .field("url", &self.url)
            .field("appid", &self.appid)
            .field("secret", &"<redacted>")
            .field("username", &self.username)
            .field("passhash", &"<redacted>")
            .field("station_id", &self.station_id)
            .field("inverter_id", &self.inverter_id)
            .field("logger_id", &self.logger_id)
            .field("meter_id", &self.meter_id)
            .field("debug", &self.debug)
            .field("mqtt", &self.mqtt)
            .finish()
    }
}

fn invalid(field: &str, reason: impl fmt::Display) -> Error {
    Error::Config(format!("{field}: {reason}"))
}

fn exact_len(field: &str, value: &str, len: usize) -> Result<()> {
    let actual = value.chars().count();
    if actual != len {
        return Err(invalid(
            field,
            format!("must be exactly {len} characters, got {actual}"),
        ));
    }
    Ok(())
}

/// Reads the config document as a list of raw JSON objects.
///
/// A single top-level object is treated as a list of one.
fn read_document(path: &Path) -> Result<Vec<Value>> {
    let contents = fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("could not read {}: {e}", path.display())))?;
    let document: Value = serde_json::from_str(&contents)
        .map_err(|e| Error::Config(format!("{} is not valid JSON: {e}", path.display())))?;
    match document {
        Value::Array(entries) => Ok(entries),
        object @ Value::Object(_) => Ok(vec![object]),
        _ => Err(Error::Config(format!(
            "{} must hold an object or an array of objects",
            path.display()
        ))),
    }
}

fn parse_entry(index: usize, total: usize, entry: Value) -> Result<InstallationConfig> {
    let label = entry
        .get("name")
        .and_then(Value::as_str)
        .map(|name| format!("'{name}'"))
        .unwrap_or_else(|| "<unnamed>".to_string());
    let config: InstallationConfig = serde_json::from_value(entry).map_err(|e| {
        Error::Config(format!(
            "installation {label} [{}/{total}]: {e}",
            index + 1
        ))
    })?;
    config.validate().map_err(|e| match e {
        Error::Config(reason) => Error::Config(format!(
            "installation {label} [{}/{total}]: {reason}",
            index + 1
        )),
        other => other,
    })?;
    Ok(config)
}

/// Loads and validates every installation of a config file, in file order.
pub fn load(path: &Path) -> Result<Vec<InstallationConfig>> {
    let entries = read_document(path)?;
    let total = entries.len();
    entries
        .into_iter()
        .enumerate()
        .map(|(index, entry)| parse_entry(index, total, entry))
        .collect()
}

/// Validates a config file instance by instance and reports progress.
///
/// Returns the number of valid installations, or the first violation.
pub fn validate(path: &Path) -> Result<usize> {
    let entries = read_document(path)?;
    let total = entries.len();
    for (index, entry) in entries.into_iter().enumerate() {
        let name = entry
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("<unnamed>")
            .to_string();
        println!("## CONFIG INSTANCE NAME: {name} [{}/{total}]", index + 1);
        parse_entry(index, total, entry)?;
    }
    info!("{total} installation(s) in {} are valid", path.display());
    Ok(total)
}
