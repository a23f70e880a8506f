//! Stream Payloads
//!
//! Producers hand back results in one of three shapes: the raw body of an
//! HTTP response, JSON text, or an already parsed mapping. [`Payload`] is the
//! closed set of those shapes, and every variant maps to the same canonical
//! form on the broker: a flat JSON object whose top-level keys become stream
//! fields.
//!
//! # Field Encoding
//!
//! | JSON value | Stream field value |
//! |------------|--------------------|
//! | string     | the string, unquoted |
//! | number     | JSON number text (`100.0`, `-5`) |
//! | boolean    | `true` / `false` |
//! | null, array, object | rejected with [`SerializationError::NotFlat`] |
//!
//! Field values read back from the broker are UTF-8 text; numeric text is
//! decoded as `f64`, anything else stays a string.

use std::collections::{BTreeMap, HashMap};
use std::hash::BuildHasher;

use serde::Serialize;
use serde_json::{Map, Value};

// =============================================================================
// Errors
// =============================================================================

/// A result could not be represented as a flat JSON mapping.
///
/// This is a configuration error of the producing operation, never a broker
/// fault, and it never reaches the stream.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SerializationError {
    /// Raw bytes are not UTF-8.
    #[error("payload bytes are not valid UTF-8")]
    InvalidUtf8,

    /// Text is not JSON.
    #[error("payload is not valid JSON: {0}")]
    InvalidJson(String),

    /// The top-level JSON value is not an object.
    #[error("payload must be a JSON object, found {0}")]
    NotAMapping(&'static str),

    /// A field holds a nested or null value.
    #[error("payload field {field:?} holds {kind}; only scalar values can be published")]
    NotFlat {
        /// Offending field.
        field: String,
        /// JSON kind of the value.
        kind: &'static str,
    },

    /// The mapping has no fields; stream entries need at least one.
    #[error("payload mapping is empty")]
    EmptyMapping,
}

const fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// =============================================================================
// Payload
// =============================================================================

/// A producer result awaiting publication.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Raw response body, expected to hold UTF-8 JSON.
    RawBytes(Vec<u8>),
    /// JSON text.
    Text(String),
    /// Parsed JSON object.
    Mapping(Map<String, Value>),
}

impl Payload {
    /// Serialize a typed model into a mapping payload.
    ///
    /// # Errors
    ///
    /// Returns [`SerializationError`] if the model does not serialize to a
    /// JSON object.
    pub fn from_serialize<T: Serialize + ?Sized>(model: &T) -> Result<Self, SerializationError> {
        let value =
            serde_json::to_value(model).map_err(|e| SerializationError::InvalidJson(e.to_string()))?;
        match value {
            Value::Object(map) => Ok(Self::Mapping(map)),
            other => Err(SerializationError::NotAMapping(json_kind(&other))),
        }
    }

    /// Resolve the payload to its JSON object.
    ///
    /// # Errors
    ///
    /// Returns [`SerializationError`] if the payload is not UTF-8 JSON or its
    /// top level is not an object.
    pub fn to_mapping(&self) -> Result<Map<String, Value>, SerializationError> {
        let text = match self {
            Self::Mapping(map) => return Ok(map.clone()),
            Self::RawBytes(bytes) => {
                std::str::from_utf8(bytes).map_err(|_| SerializationError::InvalidUtf8)?
            }
            Self::Text(text) => text.as_str(),
        };

        match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(other) => Err(SerializationError::NotAMapping(json_kind(&other))),
            Err(e) => Err(SerializationError::InvalidJson(e.to_string())),
        }
    }

    /// Canonical JSON text of the payload.
    ///
    /// # Errors
    ///
    /// Returns [`SerializationError`] under the same conditions as
    /// [`Payload::to_mapping`].
    pub fn to_json(&self) -> Result<String, SerializationError> {
        let map = self.to_mapping()?;
        serde_json::to_string(&map).map_err(|e| SerializationError::InvalidJson(e.to_string()))
    }

    /// Flatten the payload into stream fields.
    ///
    /// # Errors
    ///
    /// Returns [`SerializationError`] if the payload is not a non-empty JSON
    /// object of scalar values.
    pub fn to_fields(&self) -> Result<EntryFields, SerializationError> {
        let map = self.to_mapping()?;
        let mut pairs = Vec::with_capacity(map.len());

        for (field, value) in map {
            let encoded = match value {
                Value::String(s) => s,
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                other @ (Value::Null | Value::Array(_) | Value::Object(_)) => {
                    return Err(SerializationError::NotFlat {
                        kind: json_kind(&other),
                        field,
                    });
                }
            };
            pairs.push((field, encoded));
        }

        EntryFields::try_from_pairs(pairs)
    }
}

// =============================================================================
// Conversion into Payload
// =============================================================================

/// Values that a published operation can return.
pub trait ToPayload {
    /// Convert to a payload without consuming the value.
    ///
    /// # Errors
    ///
    /// Returns [`SerializationError`] if the value has no JSON form.
    fn to_payload(&self) -> Result<Payload, SerializationError>;
}

impl ToPayload for Payload {
    fn to_payload(&self) -> Result<Payload, SerializationError> {
        Ok(self.clone())
    }
}

impl ToPayload for Map<String, Value> {
    fn to_payload(&self) -> Result<Payload, SerializationError> {
        Ok(Payload::Mapping(self.clone()))
    }
}

impl ToPayload for Value {
    fn to_payload(&self) -> Result<Payload, SerializationError> {
        match self {
            Self::Object(map) => Ok(Payload::Mapping(map.clone())),
            other => Err(SerializationError::NotAMapping(json_kind(other))),
        }
    }
}

impl ToPayload for String {
    fn to_payload(&self) -> Result<Payload, SerializationError> {
        Ok(Payload::Text(self.clone()))
    }
}

impl<V: Serialize> ToPayload for BTreeMap<String, V> {
    fn to_payload(&self) -> Result<Payload, SerializationError> {
        Payload::from_serialize(self)
    }
}

impl<V: Serialize, S: BuildHasher> ToPayload for HashMap<String, V, S> {
    fn to_payload(&self) -> Result<Payload, SerializationError> {
        Payload::from_serialize(self)
    }
}

// =============================================================================
// Entry Fields
// =============================================================================

/// Non-empty, ordered field/value pairs of one stream entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryFields(Vec<(String, String)>);

impl EntryFields {
    /// Wrap field/value pairs.
    ///
    /// # Errors
    ///
    /// Returns [`SerializationError::EmptyMapping`] for an empty list.
    pub fn try_from_pairs(pairs: Vec<(String, String)>) -> Result<Self, SerializationError> {
        if pairs.is_empty() {
            return Err(SerializationError::EmptyMapping);
        }
        Ok(Self(pairs))
    }

    /// Field/value pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(f, v)| (f.as_str(), v.as_str()))
    }

    /// Value of a field.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&str> {
        self.iter().find(|(f, _)| *f == field).map(|(_, v)| v)
    }

    /// Number of fields.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.0.len()
    }

    /// Always `false`; entries carry at least one field.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Underlying pairs.
    #[must_use]
    pub fn as_pairs(&self) -> &[(String, String)] {
        &self.0
    }

    /// Decode into a JSON object, numeric values as floats.
    #[must_use]
    pub fn decode(&self) -> Map<String, Value> {
        self.iter()
            .map(|(field, value)| (field.to_string(), decode_field_value(value)))
            .collect()
    }

    /// Numeric fields only.
    #[must_use]
    pub fn numeric(&self) -> BTreeMap<String, f64> {
        self.iter()
            .filter_map(|(field, value)| parse_finite(value).map(|n| (field.to_string(), n)))
            .collect()
    }
}

/// Decode one field value read back from the broker.
#[must_use]
pub fn decode_field_value(raw: &str) -> Value {
    parse_finite(raw)
        .and_then(serde_json::Number::from_f64)
        .map_or_else(|| Value::String(raw.to_string()), Value::Number)
}

fn parse_finite(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|n| n.is_finite())
}

// =============================================================================
// Stream Entry
// =============================================================================

/// An entry delivered by a grouped read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    /// Broker-assigned entry id (`<millis>-<seq>`).
    pub id: String,
    /// Entry fields.
    pub fields: EntryFields,
}

impl StreamEntry {
    /// Create an entry.
    #[must_use]
    pub const fn new(id: String, fields: EntryFields) -> Self {
        Self { id, fields }
    }

    /// Decoded JSON object.
    #[must_use]
    pub fn decode(&self) -> Map<String, Value> {
        self.fields.decode()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use serde_json::json;
    use test_case::test_case;

    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(f, v)| ((*f).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn every_variant_flattens_to_the_same_fields() {
        let text = r#"{"BTC/USD":100.0,"venue":"hyperliquid","live":true}"#;
        let expected = fields(&[
            ("BTC/USD", "100.0"),
            ("live", "true"),
            ("venue", "hyperliquid"),
        ]);

        let raw = Payload::RawBytes(text.as_bytes().to_vec());
        let parsed = Payload::Text(text.to_string());
        let mapping = json!({"BTC/USD": 100.0, "venue": "hyperliquid", "live": true}).to_payload();

        for payload in [raw, parsed, mapping.unwrap()] {
            let mut pairs = payload.to_fields().unwrap().as_pairs().to_vec();
            pairs.sort();
            assert_eq!(pairs, expected);
        }
    }

    #[test_case(r#"{"a":{"b":1}}"#, "an object")]
    #[test_case(r#"{"a":[1,2]}"#, "an array")]
    #[test_case(r#"{"a":null}"#, "null")]
    fn nested_values_are_rejected(text: &str, kind: &'static str) {
        let err = Payload::Text(text.to_string()).to_fields().unwrap_err();
        assert_eq!(
            err,
            SerializationError::NotFlat {
                field: "a".to_string(),
                kind,
            }
        );
    }

    #[test_case(Payload::Text("[1,2,3]".to_string()), SerializationError::NotAMapping("an array"))]
    #[test_case(Payload::Text("42".to_string()), SerializationError::NotAMapping("a number"))]
    #[test_case(Payload::RawBytes(vec![0xff, 0xfe]), SerializationError::InvalidUtf8)]
    #[test_case(Payload::Text("{}".to_string()), SerializationError::EmptyMapping)]
    fn non_mappings_are_rejected(payload: Payload, expected: SerializationError) {
        assert_eq!(payload.to_fields().unwrap_err(), expected);
    }

    #[test]
    fn invalid_json_is_reported() {
        let err = Payload::Text("{not json".to_string()).to_fields().unwrap_err();
        assert!(matches!(err, SerializationError::InvalidJson(_)));
    }

    #[test]
    fn typed_models_serialize_to_mappings() {
        #[derive(Serialize)]
        struct Mid {
            coin: String,
            px: f64,
        }

        let payload = Payload::from_serialize(&Mid {
            coin: "ETH".to_string(),
            px: 2645.55,
        })
        .unwrap();
        let fields = payload.to_fields().unwrap();

        assert_eq!(fields.get("coin"), Some("ETH"));
        assert_eq!(fields.get("px"), Some("2645.55"));
    }

    #[test]
    fn sequences_are_not_models() {
        assert_eq!(
            Payload::from_serialize(&vec![1, 2]),
            Err(SerializationError::NotAMapping("an array"))
        );
    }

    #[test]
    fn decode_parses_numbers_as_floats() {
        let fields = EntryFields::try_from_pairs(fields(&[
            ("BTC/USD", "100.0"),
            ("ETH/USD", "2645"),
            ("venue", "hyperliquid"),
            ("weird", "NaN"),
        ]))
        .unwrap();

        let decoded = fields.decode();
        assert_eq!(decoded["BTC/USD"], json!(100.0));
        assert_eq!(decoded["ETH/USD"], json!(2645.0));
        assert_eq!(decoded["venue"], json!("hyperliquid"));
        assert_eq!(decoded["weird"], json!("NaN"));
    }

    #[test]
    fn numeric_skips_text_fields() {
        let fields =
            EntryFields::try_from_pairs(fields(&[("BTC/USD", "39874.58"), ("venue", "vertex")]))
                .unwrap();

        let numeric = fields.numeric();
        assert_eq!(numeric.len(), 1);
        assert!((numeric["BTC/USD"] - 39_874.58).abs() < f64::EPSILON);
    }

    #[test]
    fn empty_field_lists_are_rejected() {
        assert_eq!(
            EntryFields::try_from_pairs(Vec::new()),
            Err(SerializationError::EmptyMapping)
        );
    }

    #[test]
    fn float_mapping_round_trips_through_fields() {
        let mut prices = BTreeMap::new();
        prices.insert("BTC/USD".to_string(), 100.0_f64);

        let fields = prices.to_payload().unwrap().to_fields().unwrap();
        assert_eq!(fields.as_pairs(), self::fields(&[("BTC/USD", "100.0")]));
        assert_eq!(Value::Object(fields.decode()), json!({"BTC/USD": 100.0}));
    }
}
