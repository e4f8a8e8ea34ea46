//! Structured metadata values.
//!
//! Every entry in an event's metadata bag is a [`MetadataValue`]: a recursive
//! tree of nulls, booleans, numbers, strings, sequences and string-keyed
//! mappings. Nested caller objects are stored structurally, so a mapping
//! written on append comes back as a mapping on fetch rather than as an opaque
//! string.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Number;

/// The metadata bag carried by every event.
pub type Metadata = BTreeMap<String, MetadataValue>;

/// A structured metadata value.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    #[default]
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Sequence(Vec<MetadataValue>),
    Mapping(BTreeMap<String, MetadataValue>),
}

impl MetadataValue {
    /// Convert any serializable value into its structured form.
    ///
    /// This is how callers attach typed objects to metadata: the object is
    /// broken down into mappings and sequences, and can be recovered later
    /// with [`deserialize_into`](Self::deserialize_into).
    ///
    /// # Errors
    ///
    /// Returns an error if `value` cannot be represented as a structured tree
    /// (for example a map with non-string keys).
    pub fn from_serializable<T>(value: &T) -> Result<Self, serde_json::Error>
    where
        T: Serialize + ?Sized,
    {
        serde_json::to_value(value).map(Self::from)
    }

    /// Rebuild a typed value from this tree.
    ///
    /// # Errors
    ///
    /// Returns an error if the tree does not match the shape of `T`.
    pub fn deserialize_into<T>(&self) -> Result<T, serde_json::Error>
    where
        T: DeserializeOwned,
    {
        serde_json::from_value(serde_json::Value::from(self.clone()))
    }

    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Number(number) => number.as_i64(),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Number(number) => number.as_u64(),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(number) => number.as_f64(),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_sequence(&self) -> Option<&[Self]> {
        match self {
            Self::Sequence(items) => Some(items),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_mapping(&self) -> Option<&BTreeMap<String, Self>> {
        match self {
            Self::Mapping(entries) => Some(entries),
            _ => None,
        }
    }

    /// Look up a key when this value is a mapping.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Self> {
        self.as_mapping().and_then(|entries| entries.get(key))
    }
}

impl From<serde_json::Value> for MetadataValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(value) => Self::Bool(value),
            serde_json::Value::Number(number) => Self::Number(number),
            serde_json::Value::String(value) => Self::String(value),
            serde_json::Value::Array(items) => {
                Self::Sequence(items.into_iter().map(Self::from).collect())
            }
            serde_json::Value::Object(entries) => Self::Mapping(
                entries
                    .into_iter()
                    .map(|(key, value)| (key, Self::from(value)))
                    .collect(),
            ),
        }
    }
}

impl From<MetadataValue> for serde_json::Value {
    fn from(value: MetadataValue) -> Self {
        match value {
            MetadataValue::Null => Self::Null,
            MetadataValue::Bool(value) => Self::Bool(value),
            MetadataValue::Number(number) => Self::Number(number),
            MetadataValue::String(value) => Self::String(value),
            MetadataValue::Sequence(items) => {
                Self::Array(items.into_iter().map(Self::from).collect())
            }
            MetadataValue::Mapping(entries) => Self::Object(
                entries
                    .into_iter()
                    .map(|(key, value)| (key, Self::from(value)))
                    .collect(),
            ),
        }
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i32> for MetadataValue {
    fn from(value: i32) -> Self {
        Self::Number(value.into())
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        Self::Number(value.into())
    }
}

impl From<u64> for MetadataValue {
    fn from(value: u64) -> Self {
        Self::Number(value.into())
    }
}

/// Non-finite floats have no structured representation and become `Null`.
impl From<f64> for MetadataValue {
    fn from(value: f64) -> Self {
        Number::from_f64(value).map_or(Self::Null, Self::Number)
    }
}

impl From<Vec<Self>> for MetadataValue {
    fn from(items: Vec<Self>) -> Self {
        Self::Sequence(items)
    }
}

impl From<BTreeMap<String, Self>> for MetadataValue {
    fn from(entries: BTreeMap<String, Self>) -> Self {
        Self::Mapping(entries)
    }
}

impl<T> From<Option<T>> for MetadataValue
where
    T: Into<Self>,
{
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
    struct BuildInfo {
        name: String,
        tags: Vec<String>,
    }

    fn nested() -> MetadataValue {
        MetadataValue::Mapping(BTreeMap::from([
            ("name".to_owned(), "42".into()),
            (
                "history".to_owned(),
                vec![1.into(), MetadataValue::Null, true.into(), 2.5.into()].into(),
            ),
            (
                "inner".to_owned(),
                BTreeMap::from([("depth".to_owned(), MetadataValue::from(2))]).into(),
            ),
        ]))
    }

    #[test]
    fn nested_value_survives_json_text() {
        let value = nested();
        let text = serde_json::to_string(&value).unwrap();
        let decoded: MetadataValue = serde_json::from_str(&text).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn mapping_serializes_as_object_not_string() {
        let json = serde_json::to_value(nested()).unwrap();
        assert!(json.is_object());
        assert_eq!(json["inner"]["depth"], serde_json::json!(2));
    }

    #[test]
    fn integers_keep_their_integer_representation() {
        let decoded: MetadataValue = serde_json::from_str("7").unwrap();
        assert_eq!(decoded.as_i64(), Some(7));
        assert_eq!(decoded.as_u64(), Some(7));
    }

    #[test]
    fn typed_object_roundtrips_through_structured_form() {
        let info = BuildInfo {
            name: "42".to_owned(),
            tags: vec!["a".to_owned(), "b".to_owned()],
        };

        let value = MetadataValue::from_serializable(&info).unwrap();
        assert_eq!(value.get("name").and_then(MetadataValue::as_str), Some("42"));

        let back: BuildInfo = value.deserialize_into().unwrap();
        assert_eq!(back, info);
    }

    #[test]
    fn deserialize_into_rejects_wrong_shape() {
        let value = MetadataValue::from("not an object");
        assert!(value.deserialize_into::<BuildInfo>().is_err());
    }

    #[test]
    fn non_finite_float_becomes_null() {
        assert!(MetadataValue::from(f64::NAN).is_null());
    }

    #[test]
    fn option_maps_none_to_null() {
        assert!(MetadataValue::from(None::<String>).is_null());
        assert_eq!(MetadataValue::from(Some("x")).as_str(), Some("x"));
    }
}
