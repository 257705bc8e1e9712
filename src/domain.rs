use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// name of the real-time event carrying a new reading
pub const SENSOR_DATA_EVENT: &str = "sensorData";

/// payload posted by a sensor node
///
/// every field is optional and passed through untouched, whatever json
/// value the device sends is what gets stored (an explicit `null` included).
/// unknown keys, a client supplied `timestamp` among them, are ignored.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SensorSubmission {
    #[serde(default, deserialize_with = "present")]
    pub temperature: Option<Value>,
    #[serde(default, deserialize_with = "present")]
    pub humidity: Option<Value>,
    #[serde(default, deserialize_with = "present")]
    pub air_quality: Option<Value>,
    #[serde(default, deserialize_with = "present")]
    pub gps: Option<Value>,
    #[serde(default, deserialize_with = "present")]
    pub led: Option<Value>,
}

impl SensorSubmission {
    /// stamp the submission with the server clock
    ///
    /// the stamp is rounded up to the stored millisecond precision, so the
    /// stored value never precedes `now` and compares equal after a reload.
    pub fn into_reading(self, now: DateTime<Utc>) -> Reading {
        Reading {
            temperature: self.temperature,
            humidity: self.humidity,
            air_quality: self.air_quality,
            gps: self.gps,
            led: self.led,
            timestamp: ceil_to_millis(now),
        }
    }
}

fn ceil_to_millis(ts: DateTime<Utc>) -> DateTime<Utc> {
    let truncated = ts.trunc_subsecs(3);
    if truncated < ts {
        truncated + Duration::milliseconds(1)
    } else {
        truncated
    }
}

/// a key that is present maps to `Some`, even when its value is `null`
fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

/// one timestamped environmental record, immutable once stored
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Reading {
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub temperature: Option<Value>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub humidity: Option<Value>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub air_quality: Option<Value>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub gps: Option<Value>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub led: Option<Value>,

    /// server-assigned ingestion time, the ordering key for windowed queries
    #[serde(with = "iso_millis")]
    pub timestamp: DateTime<Utc>,
}

/// event pushed to every live subscriber
#[derive(Clone, Debug, Serialize)]
pub struct HubEvent {
    pub event: &'static str,
    pub data: Reading,
}

impl HubEvent {
    pub fn sensor_data(reading: Reading) -> Self {
        Self {
            event: SENSOR_DATA_EVENT,
            data: reading,
        }
    }
}

/// timestamps as `2024-05-01T12:00:00.000Z`, the shape browsers produce
/// with `Date.toISOString()`. any rfc3339 instant is accepted on the way in.
mod iso_millis {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}
