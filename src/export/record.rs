// src/export/record.rs
//! Telemetry records and the OTLP `AnyValue` interchange type
//!
//! `AnyValue` serializes in OTLP/JSON form: a single-key object naming the
//! variant, 64-bit integers as decimal strings, bytes as base64. Non-finite
//! doubles have no JSON form and fail serialization.

use serde::{Deserialize, Serialize};

/// Recursive tagged value carried by log bodies and attributes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AnyValue {
    StringValue(String),
    BoolValue(bool),
    IntValue(#[serde(with = "int_as_string")] i64),
    DoubleValue(#[serde(with = "finite_double")] f64),
    BytesValue(#[serde(with = "bytes_as_base64")] Vec<u8>),
    ArrayValue(ArrayValue),
    KvlistValue(KeyValueList),
}

/// Ordered list of values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArrayValue {
    pub values: Vec<AnyValue>,
}

/// Ordered key/value map
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyValueList {
    pub values: Vec<KeyValue>,
}

/// Single attribute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    pub value: AnyValue,
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: impl Into<AnyValue>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl From<&str> for AnyValue {
    fn from(value: &str) -> Self {
        AnyValue::StringValue(value.to_string())
    }
}

impl From<String> for AnyValue {
    fn from(value: String) -> Self {
        AnyValue::StringValue(value)
    }
}

impl From<bool> for AnyValue {
    fn from(value: bool) -> Self {
        AnyValue::BoolValue(value)
    }
}

impl From<i64> for AnyValue {
    fn from(value: i64) -> Self {
        AnyValue::IntValue(value)
    }
}

impl From<u32> for AnyValue {
    fn from(value: u32) -> Self {
        AnyValue::IntValue(i64::from(value))
    }
}

impl From<usize> for AnyValue {
    fn from(value: usize) -> Self {
        AnyValue::IntValue(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<f64> for AnyValue {
    fn from(value: f64) -> Self {
        AnyValue::DoubleValue(value)
    }
}

impl From<Vec<u8>> for AnyValue {
    fn from(value: Vec<u8>) -> Self {
        AnyValue::BytesValue(value)
    }
}

impl From<Vec<AnyValue>> for AnyValue {
    fn from(values: Vec<AnyValue>) -> Self {
        AnyValue::ArrayValue(ArrayValue { values })
    }
}

impl From<Vec<KeyValue>> for AnyValue {
    fn from(values: Vec<KeyValue>) -> Self {
        AnyValue::KvlistValue(KeyValueList { values })
    }
}

/// Producers mostly speak JSON; objects become kvlists, `null` becomes an
/// empty string.
impl From<serde_json::Value> for AnyValue {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;

        match value {
            Value::Null => AnyValue::StringValue(String::new()),
            Value::Bool(b) => AnyValue::BoolValue(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => AnyValue::IntValue(i),
                None => AnyValue::DoubleValue(n.as_f64().unwrap_or_default()),
            },
            Value::String(s) => AnyValue::StringValue(s),
            Value::Array(items) => items
                .into_iter()
                .map(AnyValue::from)
                .collect::<Vec<_>>()
                .into(),
            Value::Object(map) => map
                .into_iter()
                .map(|(k, v)| KeyValue::new(k, AnyValue::from(v)))
                .collect::<Vec<_>>()
                .into(),
        }
    }
}

/// One telemetry item submitted to the pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Opaque payload
    pub body: AnyValue,

    /// Event time (nanoseconds since epoch)
    pub timestamp_nanos: u64,

    /// Ordered attributes
    pub attributes: Vec<KeyValue>,
}

impl Record {
    pub fn new(body: impl Into<AnyValue>, timestamp_nanos: u64) -> Self {
        Self {
            body: body.into(),
            timestamp_nanos,
            attributes: Vec::new(),
        }
    }

    /// Record stamped with the current wall-clock time
    pub fn now(body: impl Into<AnyValue>) -> Self {
        let nanos = chrono::Utc::now()
            .timestamp_nanos_opt()
            .and_then(|n| u64::try_from(n).ok())
            .unwrap_or_default();
        Self::new(body, nanos)
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<AnyValue>) -> Self {
        self.attributes.push(KeyValue::new(key, value));
        self
    }
}

mod int_as_string {
    use serde::de::{self, Deserializer, Visitor};
    use serde::Serializer;
    use std::fmt;

    pub fn serialize<S: Serializer>(value: &i64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    /// Accepts both the string form and a bare JSON number
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
        struct IntVisitor;

        impl<'de> Visitor<'de> for IntVisitor {
            type Value = i64;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an integer or a decimal string")
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<i64, E> {
                Ok(v)
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<i64, E> {
                i64::try_from(v).map_err(E::custom)
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<i64, E> {
                v.parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_any(IntVisitor)
    }
}

mod finite_double {
    use serde::{ser::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if !value.is_finite() {
            return Err(S::Error::custom(format!("non-finite double {}", value)));
        }
        serializer.serialize_f64(*value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        f64::deserialize(deserializer)
    }
}

pub(crate) mod bytes_as_base64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
