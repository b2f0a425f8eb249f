use std::fmt;

use log::{debug, info};
use serde_json::Value;

use crate::device::{normalize, DeviceReading, NormalizedDevice};
use crate::installation_config::InstallationConfig;
use crate::Result;

/// Bearer token of one poll; never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(<redacted>)")
    }
}

// This trait decouples the polling logic from the vendor HTTP API so the
// pipeline can be driven by canned readings.
pub trait TelemetrySource {
    fn authenticate(&self, config: &InstallationConfig) -> Result<AccessToken>;

    fn station_realtime(
        &self,
        config: &InstallationConfig,
        token: &AccessToken,
    ) -> Result<DeviceReading>;

    fn device_current_data(
        &self,
        config: &InstallationConfig,
        token: &AccessToken,
        device_sn: &str,
    ) -> Result<DeviceReading>;
}

impl<T: TelemetrySource + ?Sized> TelemetrySource for &T {
    fn authenticate(&self, config: &InstallationConfig) -> Result<AccessToken> {
        (**self).authenticate(config)
    }

    fn station_realtime(
        &self,
        config: &InstallationConfig,
        token: &AccessToken,
    ) -> Result<DeviceReading> {
        (**self).station_realtime(config, token)
    }

    fn device_current_data(
        &self,
        config: &InstallationConfig,
        token: &AccessToken,
        device_sn: &str,
    ) -> Result<DeviceReading> {
        (**self).device_current_data(config, token, device_sn)
    }
}

/// Everything fetched for one installation in one poll.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct InstallationSnapshot {
    pub station: DeviceReading,
    pub inverter: NormalizedDevice,
    pub logger: NormalizedDevice,
    pub meter: Option<NormalizedDevice>,
}

/// Authenticates once and pulls station, inverter, logger and, if configured,
/// meter readings. The first failing request aborts the poll.
pub fn fetch_snapshot<S: TelemetrySource + ?Sized>(
    source: &S,
    config: &InstallationConfig,
) -> Result<InstallationSnapshot> {
    let token = source.authenticate(config)?;
    debug!("Received token for {}", config.name);

    let station = source.station_realtime(config, &token)?;
    let inverter = normalize(source.device_current_data(config, &token, &config.inverter_id)?);
    let logger = normalize(source.device_current_data(config, &token, &config.logger_id)?);
    let meter = match &config.meter_id {
        Some(meter_id) => Some(normalize(
            source.device_current_data(config, &token, meter_id)?,
        )),
        None => None,
    };

    let snapshot = InstallationSnapshot {
        station,
        inverter,
        logger,
        meter,
    };
    if config.debug {
        snapshot.dump();
    }
    Ok(snapshot)
}

impl InstallationSnapshot {
    fn dump(&self) {
        let pretty = |label: &str, map: &serde_json::Map<String, Value>| {
            let json = serde_json::to_string_pretty(map).unwrap_or_default();
            info!("{label}\n{json}");
        };
        pretty("STATION DATA", &self.station);
        pretty("INVERTER DATA", &self.inverter.fields);
        pretty("INVERTER DATA LIST", &self.inverter.attributes);
        pretty("LOGGER DATA", &self.logger.fields);
        pretty("LOGGER DATA LIST", &self.logger.attributes);
        if let Some(meter) = &self.meter {
            pretty("METER DATA", &meter.fields);
            pretty("METER DATA LIST", &meter.attributes);
        }
    }
}
