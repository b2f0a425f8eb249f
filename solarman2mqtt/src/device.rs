use serde_json::{Map, Value};

/// Field holding the list of `{key, name, value}` attribute records.
pub const ATTRIBUTE_LIST_FIELD: &str = "dataList";

/// Field carrying the device health code.
pub const DEVICE_STATE_FIELD: &str = "deviceState";

/// State code reported when a device has no status at all.
pub const UNKNOWN_STATE_CODE: i64 = 128;

/// Flat field/value mapping as returned by the API for a station or device.
pub type DeviceReading = Map<String, Value>;

/// Attribute records flattened to sanitized name -> value.
pub type AttributeMap = Map<String, Value>;

/// Health of a device, derived fresh from every reading.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceState {
    /// Producing valid generation data.
    Online,
    /// No status reported.
    Unknown,
    /// Fault or offline reason, e.g. nighttime shutdown.
    Fault(i64),
}

impl DeviceState {
    /// Classifies a reading by its `deviceState` field.
    ///
    /// A missing, null or non-integer field counts as unknown.
    pub fn classify(reading: &DeviceReading) -> Self {
        match reading.get(DEVICE_STATE_FIELD).and_then(state_code) {
            Some(code) => Self::from_code(code),
            None => DeviceState::Unknown,
        }
    }

    pub fn from_code(code: i64) -> Self {
        match code {
            1 => DeviceState::Online,
            UNKNOWN_STATE_CODE => DeviceState::Unknown,
            other => DeviceState::Fault(other),
        }
    }

    pub fn code(&self) -> i64 {
        match self {
            DeviceState::Online => 1,
            DeviceState::Unknown => UNKNOWN_STATE_CODE,
            DeviceState::Fault(code) => *code,
        }
    }
}

fn state_code(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Device reading split into its plain fields and its flattened attributes.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NormalizedDevice {
    pub fields: DeviceReading,
    pub attributes: AttributeMap,
}

impl NormalizedDevice {
    pub fn state(&self) -> DeviceState {
        DeviceState::classify(&self.fields)
    }
}

/// Splits the attribute record list off a raw reading.
///
/// Every record maps its name, spaces replaced by underscores, to its value;
/// the internal `key` is dropped. A missing or malformed list yields an empty
/// attribute map, records without a name are skipped. The list field never
/// survives into `fields`.
pub fn normalize(mut reading: DeviceReading) -> NormalizedDevice {
    let attributes = match reading.remove(ATTRIBUTE_LIST_FIELD) {
        Some(Value::Array(records)) => records.into_iter().filter_map(flatten_record).collect(),
        _ => AttributeMap::new(),
    };
    NormalizedDevice {
        fields: reading,
        attributes,
    }
}

fn flatten_record(record: Value) -> Option<(String, Value)> {
    let Value::Object(mut record) = record else {
        return None;
    };
    let name = match record.remove("name") {
        Some(Value::String(name)) => name,
        _ => return None,
    };
    let value = record.remove("value").unwrap_or(Value::Null);
    Some((sanitize_name(&name), value))
}

pub fn sanitize_name(name: &str) -> String {
    name.replace(' ', "_")
}

/// Whether a value carries information worth publishing on its own topic.
///
/// Null, false, zero, the empty string and empty containers do not.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Renders a scalar as a bus payload; strings are sent without quotes.
pub fn payload(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
