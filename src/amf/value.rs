//! AMF0 value model
//!
//! Only the AMF0 types that show up in RTMP command and metadata messages
//! are represented.

use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Default)]
pub enum AmfValue {
    Number(f64),
    Boolean(bool),
    String(String),
    Object(HashMap<String, AmfValue>),
    #[default]
    Null,
    Undefined,
    /// Associative array (marker 0x08); `onMetaData` usually arrives as one
    EcmaArray(HashMap<String, AmfValue>),
    /// Dense array (marker 0x0A)
    Array(Vec<AmfValue>),
    /// Milliseconds since the Unix epoch
    Date(f64),
}

impl AmfValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AmfValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            AmfValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AmfValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Property map of an object or ECMA array
    pub fn as_object(&self) -> Option<&HashMap<String, AmfValue>> {
        match self {
            AmfValue::Object(map) | AmfValue::EcmaArray(map) => Some(map),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&AmfValue> {
        self.as_object()?.get(key)
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.get(key)?.as_str()
    }

    pub fn get_number(&self, key: &str) -> Option<f64> {
        self.get(key)?.as_number()
    }

    /// Build an object from `(key, value)` pairs
    pub fn object<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<AmfValue>,
        I: IntoIterator<Item = (K, V)>,
    {
        AmfValue::Object(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl From<bool> for AmfValue {
    fn from(v: bool) -> Self {
        AmfValue::Boolean(v)
    }
}

impl From<f64> for AmfValue {
    fn from(v: f64) -> Self {
        AmfValue::Number(v)
    }
}

impl From<u32> for AmfValue {
    fn from(v: u32) -> Self {
        AmfValue::Number(v as f64)
    }
}

impl From<String> for AmfValue {
    fn from(v: String) -> Self {
        AmfValue::String(v)
    }
}

impl From<&str> for AmfValue {
    fn from(v: &str) -> Self {
        AmfValue::String(v.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_builder_and_lookup() {
        let obj = AmfValue::object([
            ("code", AmfValue::from("NetStream.Play.Start")),
            ("width", AmfValue::from(1280u32)),
        ]);
        assert_eq!(obj.get_string("code"), Some("NetStream.Play.Start"));
        assert_eq!(obj.get_number("width"), Some(1280.0));
        assert!(obj.get("missing").is_none());
    }

    #[test]
    fn test_ecma_array_is_object_like() {
        let mut map = HashMap::new();
        map.insert("framerate".to_string(), AmfValue::Number(30.0));
        let arr = AmfValue::EcmaArray(map);
        assert_eq!(arr.get_number("framerate"), Some(30.0));
        assert!(AmfValue::Null.as_object().is_none());
    }
}
