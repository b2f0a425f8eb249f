use log::{debug, info};
use serde_json::Value;

use crate::device::{
    is_truthy, payload, AttributeMap, DeviceReading, DeviceState, NormalizedDevice,
    DEVICE_STATE_FIELD,
};
use crate::telemetry::InstallationSnapshot;

/// API envelope fields; never telemetry.
pub const ENVELOPE_FIELDS: [&str; 4] = ["code", "msg", "requestId", "success"];

/// One message for the bus.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Publication {
    pub topic: String,
    pub payload: String,
}

impl Publication {
    pub fn new(topic: String, payload: String) -> Self {
        Self { topic, payload }
    }
}

struct Topics<'a> {
    prefix: &'a str,
    publications: Vec<Publication>,
}

impl<'a> Topics<'a> {
    fn new(prefix: &'a str) -> Self {
        Self {
            prefix: prefix.trim_end_matches('/'),
            publications: Vec::new(),
        }
    }

    fn push(&mut self, device: &str, field: &str, payload: String) {
        let topic = format!("{}/{device}/{field}", self.prefix);
        self.publications.push(Publication::new(topic, payload));
    }

    /// Every truthy, non-envelope field on its own topic.
    fn sweep(&mut self, device: &str, reading: &DeviceReading) {
        for (field, value) in reading {
            if ENVELOPE_FIELDS.contains(&field.as_str()) || !is_truthy(value) {
                continue;
            }
            self.push(device, field, payload(value));
        }
    }

    /// The whole attribute map as one JSON message, unless it is empty.
    fn attributes(&mut self, device: &str, attributes: &AttributeMap) {
        if attributes.is_empty() {
            return;
        }
        let json = Value::Object(attributes.clone()).to_string();
        self.push(device, "attributes", json);
    }

    fn device(&mut self, device: &str, normalized: &NormalizedDevice) {
        self.sweep(device, &normalized.fields);
        self.attributes(device, &normalized.attributes);
    }

    fn device_state(&mut self, device: &str, normalized: &NormalizedDevice) {
        let state = normalized
            .fields
            .get(DEVICE_STATE_FIELD)
            .filter(|value| !value.is_null())
            .map(payload)
            .unwrap_or_else(|| normalized.state().code().to_string());
        self.push(device, DEVICE_STATE_FIELD, state);
    }
}

/// Decides which readings of one installation go onto the bus this cycle.
///
/// The meter is handled on its own and only published while online. The
/// inverter state governs station, inverter and logger together: online
/// publishes everything, unknown publishes nothing, any fault code publishes
/// only the inverter and logger state codes.
pub fn decide(prefix: &str, snapshot: &InstallationSnapshot) -> Vec<Publication> {
    let mut topics = Topics::new(prefix);

    if let Some(meter) = &snapshot.meter {
        match meter.state() {
            DeviceState::Online => {
                info!("Meter DeviceState: 1 -> publishing meter readings");
                topics.device("meter", meter);
            }
            state => debug!("Meter DeviceState: {} -> skipping meter", state.code()),
        }
    }

    match snapshot.inverter.state() {
        DeviceState::Online => {
            info!("Inverter DeviceState: 1 -> publishing station, inverter and logger readings");
            topics.sweep("station", &snapshot.station);
            topics.device("inverter", &snapshot.inverter);
            topics.device("logger", &snapshot.logger);
        }
        DeviceState::Unknown => {
            info!("Inverter DeviceState: 128 -> no valid inverter status data available");
        }
        DeviceState::Fault(code) => {
            info!(
                "Inverter DeviceState: {code} -> only publishing device states \
                 (probably offline due to nighttime shutdown)"
            );
            topics.device_state("inverter", &snapshot.inverter);
            topics.device_state("logger", &snapshot.logger);
        }
    }

    topics.publications
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::normalize;
    use serde_json::json;

    fn reading(value: Value) -> DeviceReading {
        match value {
            Value::Object(map) => map,
            _ => panic!("reading must be an object"),
        }
    }

    fn device(value: Value) -> NormalizedDevice {
        normalize(reading(value))
    }

    fn snapshot(inverter: Value, logger: Value, meter: Option<Value>) -> InstallationSnapshot {
        InstallationSnapshot {
            station: reading(json!({
                "code": "0",
                "msg": null,
                "success": true,
                "requestId": "abc",
                "generationPower": 1520.0,
                "batterySoc": 0,
                "lastUpdateTime": 1700000000
            })),
            inverter: device(inverter),
            logger: device(logger),
            meter: meter.map(device),
        }
    }

    fn topics(publications: &[Publication]) -> Vec<&str> {
        publications.iter().map(|p| p.topic.as_str()).collect()
    }

    #[test]
    fn online_inverter_publishes_full_sweep() {
        let snapshot = snapshot(
            json!({
                "generationPower": 123.4,
                "deviceState": 1,
                "code": 0,
                "dataList": [{"key": "DV1", "name": "DC Voltage PV1", "value": "301.2"}]
            }),
            json!({"deviceState": 1, "deviceSn": "4123456789"}),
            None,
        );

        let publications = decide("home/solar", &snapshot);

        assert_eq!(
            topics(&publications),
            [
                "home/solar/station/generationPower",
                "home/solar/station/lastUpdateTime",
                "home/solar/inverter/generationPower",
                "home/solar/inverter/deviceState",
                "home/solar/inverter/attributes",
                "home/solar/logger/deviceState",
                "home/solar/logger/deviceSn",
            ]
        );
        assert!(publications.contains(&Publication::new(
            "home/solar/inverter/generationPower".into(),
            "123.4".into()
        )));
        let inverter_states = publications
            .iter()
            .filter(|p| p.topic == "home/solar/inverter/deviceState")
            .count();
        assert_eq!(inverter_states, 1);
    }

    #[test]
    fn attributes_are_published_as_json() {
        let snapshot = snapshot(
            json!({
                "deviceState": 1,
                "dataList": [
                    {"key": "DV1", "name": "DC Voltage PV1", "value": "0"},
                    {"key": "ST", "name": "Inverter status", "value": ""}
                ]
            }),
            json!({"deviceState": 1}),
            None,
        );

        let publications = decide("solar", &snapshot);
        let attributes = publications
            .iter()
            .find(|p| p.topic == "solar/inverter/attributes")
            .unwrap();
        let parsed: Value = serde_json::from_str(&attributes.payload).unwrap();
        // falsy values survive inside the attribute blob
        assert_eq!(parsed, json!({"DC_Voltage_PV1": "0", "Inverter_status": ""}));
        assert!(!topics(&publications).contains(&"solar/logger/attributes"));
    }

    #[test]
    fn envelope_and_falsy_fields_are_never_swept() {
        let snapshot = snapshot(
            json!({"deviceState": 1, "code": "0", "msg": "ok", "requestId": "r", "success": true}),
            json!({"deviceState": 1, "signal": 0, "firmware": ""}),
            None,
        );

        let publications = decide("p", &snapshot);
        for p in &publications {
            let field = p.topic.rsplit('/').next().unwrap();
            assert!(!ENVELOPE_FIELDS.contains(&field), "{}", p.topic);
        }
        assert!(!topics(&publications).contains(&"p/station/batterySoc"));
        assert!(!topics(&publications).contains(&"p/logger/signal"));
        assert!(!topics(&publications).contains(&"p/logger/firmware"));
    }

    #[test]
    fn one_truthy_and_one_falsy_field_yield_one_message() {
        let mut topics = Topics::new("t");
        topics.sweep("inverter", &reading(json!({"acPower": 5, "dcPower": 0})));
        assert_eq!(
            topics.publications,
            [Publication::new("t/inverter/acPower".into(), "5".into())]
        );
    }

    #[test]
    fn unknown_inverter_publishes_nothing() {
        let snapshot = snapshot(
            json!({"generationPower": 1.0}),
            json!({"deviceState": 1}),
            None,
        );
        assert!(decide("solar", &snapshot).is_empty());
    }

    #[test]
    fn explicit_unknown_code_publishes_nothing() {
        let snapshot = snapshot(
            json!({"deviceState": 128, "generationPower": 1.0}),
            json!({"deviceState": 128}),
            None,
        );
        assert!(decide("solar", &snapshot).is_empty());
    }

    #[test]
    fn faulted_inverter_publishes_only_both_states() {
        let snapshot = snapshot(
            json!({"deviceState": 3, "generationPower": 12.0, "dataList": [
                {"key": "A", "name": "AC Voltage", "value": "0"}
            ]}),
            json!({"deviceState": 2, "deviceSn": "4123456789"}),
            None,
        );

        assert_eq!(
            decide("home/solar", &snapshot),
            [
                Publication::new("home/solar/inverter/deviceState".into(), "3".into()),
                Publication::new("home/solar/logger/deviceState".into(), "2".into()),
            ]
        );
    }

    #[test]
    fn faulted_inverter_with_silent_logger_reports_unknown_code() {
        let snapshot = snapshot(json!({"deviceState": 2}), json!({}), None);
        let publications = decide("s", &snapshot);
        assert_eq!(publications.len(), 2);
        assert_eq!(publications[1].payload, "128");
    }

    #[test]
    fn faulted_inverter_with_null_logger_state_reports_unknown_code() {
        let snapshot = snapshot(
            json!({"deviceState": 2}),
            json!({"deviceState": null}),
            None,
        );
        assert_eq!(
            decide("s", &snapshot)[1],
            Publication::new("s/logger/deviceState".into(), "128".into())
        );
    }

    #[test]
    fn online_meter_is_published_independently() {
        let snapshot = snapshot(
            json!({"deviceState": 128}),
            json!({"deviceState": 1}),
            Some(json!({
                "deviceState": 1,
                "code": 0,
                "totalPower": -310.5,
                "dataList": [{"key": "E", "name": "Total Energy", "value": "4211"}]
            })),
        );

        let publications = decide("s", &snapshot);
        assert_eq!(
            topics(&publications),
            ["s/meter/deviceState", "s/meter/totalPower", "s/meter/attributes"]
        );
    }

    #[test]
    fn offline_meter_publishes_nothing() {
        let snapshot = snapshot(
            json!({"deviceState": 1}),
            json!({"deviceState": 1}),
            Some(json!({"deviceState": 2, "totalPower": 1.0})),
        );
        let publications = decide("s", &snapshot);
        assert!(publications.iter().all(|p| !p.topic.starts_with("s/meter/")));
        assert!(!publications.is_empty());
    }

    #[test]
    fn trailing_slash_in_prefix_is_ignored() {
        let snapshot = snapshot(json!({"deviceState": 4}), json!({"deviceState": 4}), None);
        assert_eq!(decide("s/", &snapshot)[0].topic, "s/inverter/deviceState");
    }
}
