use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serializer};
use serde_json::Value;
use thiserror::Error;

/// Discord epoch: 2015-01-01T00:00:00Z
const DISCORD_EPOCH: u64 = 1_420_070_400_000;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    #[error("missing snowflake field `{0}`")]
    Missing(String),
    #[error("invalid snowflake: {0}")]
    Invalid(String),
}

/// Parse a snowflake that the gateway may send either as a decimal string or
/// as a plain JSON number.
pub fn parse(value: &Value) -> Result<i64, IdError> {
    match value {
        Value::String(s) => s
            .trim()
            .parse::<u64>()
            .map(|id| id as i64)
            .map_err(|_| IdError::Invalid(s.clone())),
        Value::Number(n) => n
            .as_u64()
            .map(|id| id as i64)
            .ok_or_else(|| IdError::Invalid(n.to_string())),
        other => Err(IdError::Invalid(other.to_string())),
    }
}

/// Read a required snowflake field from a JSON object.
pub fn field(obj: &Value, key: &str) -> Result<i64, IdError> {
    match obj.get(key) {
        None | Some(Value::Null) => Err(IdError::Missing(key.to_string())),
        Some(v) => parse(v),
    }
}

/// Read an optional snowflake field; absent, null and malformed all map to `None`.
pub fn opt_field(obj: &Value, key: &str) -> Option<i64> {
    obj.get(key).and_then(|v| parse(v).ok())
}

/// Extract the Unix timestamp (ms) from a snowflake.
pub fn timestamp_millis(id: i64) -> u64 {
    ((id as u64) >> 22) + DISCORD_EPOCH
}

/// Creation time encoded in a snowflake.
pub fn created_at(id: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(timestamp_millis(id) as i64).single()
}

/// Serde adapter: snowflakes are written as strings and accepted as strings or numbers.
pub mod serde_id {
    use super::*;

    pub fn serialize<S: Serializer>(id: &i64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&(*id as u64))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
        let value = Value::deserialize(deserializer)?;
        parse(&value).map_err(serde::de::Error::custom)
    }
}

pub mod serde_opt_id {
    use super::*;

    pub fn serialize<S: Serializer>(id: &Option<i64>, serializer: S) -> Result<S::Ok, S::Error> {
        match id {
            Some(id) => serializer.collect_str(&(*id as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<i64>, D::Error> {
        match Option::<Value>::deserialize(deserializer)? {
            None | Some(Value::Null) => Ok(None),
            Some(value) => parse(&value).map(Some).map_err(serde::de::Error::custom),
        }
    }
}

pub mod serde_id_vec {
    use super::*;
    use serde::ser::SerializeSeq;

    pub fn serialize<S: Serializer>(ids: &[i64], serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(ids.len()))?;
        for id in ids {
            seq.serialize_element(&(*id as u64).to_string())?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<i64>, D::Error> {
        let values = Vec::<Value>::deserialize(deserializer)?;
        values
            .iter()
            .map(|v| parse(v).map_err(serde::de::Error::custom))
            .collect()
    }
}
