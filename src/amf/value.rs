//! AMF value types
//!
//! Values carried by remote calls and data messages. Objects keep their
//! properties in insertion order because the order is visible on the wire
//! and to scripts that enumerate them.

/// Minutes in half a day; date offsets are kept in `[-720, 720)`
const HALF_DAY_MINUTES: i32 = 720;

/// Dynamic value representation
#[derive(Debug, Clone, PartialEq)]
pub enum AmfValue {
    /// Null value (0x05)
    Null,

    /// Undefined value (0x06)
    Undefined,

    /// Boolean value (0x01)
    Boolean(bool),

    /// IEEE 754 double-precision floating point (0x00)
    Number(f64),

    /// UTF-8 string (0x02 short, 0x0C long)
    String(String),

    /// Anonymous object (0x03)
    Object(AmfObject),

    /// Associative "mixed" array (0x08)
    EcmaArray(AmfObject),

    /// Dense array (0x0A)
    Array(Vec<AmfValue>),

    /// Date (0x0B)
    Date {
        /// Milliseconds since the Unix epoch
        millis: f64,
        /// Timezone offset in minutes
        tz_offset: i16,
    },
}

impl AmfValue {
    /// Build a date value, normalizing the timezone offset into half a day
    /// either side of UTC
    pub fn date(millis: f64, tz_offset: i32) -> Self {
        AmfValue::Date {
            millis,
            tz_offset: normalize_tz_offset(tz_offset),
        }
    }

    /// Try to get this value as a string reference
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AmfValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get this value as a number
    pub fn as_number(&self) -> Option<f64> {
        match self {
            AmfValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Try to get this value as a boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AmfValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Try to get this value as an object reference
    pub fn as_object(&self) -> Option<&AmfObject> {
        match self {
            AmfValue::Object(o) | AmfValue::EcmaArray(o) => Some(o),
            _ => None,
        }
    }

    /// Try to get this value as an array reference
    pub fn as_array(&self) -> Option<&[AmfValue]> {
        match self {
            AmfValue::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Check if this value is null or undefined
    pub fn is_null_or_undefined(&self) -> bool {
        matches!(self, AmfValue::Null | AmfValue::Undefined)
    }

    /// Get a property from an object value
    pub fn get(&self, key: &str) -> Option<&AmfValue> {
        self.as_object()?.get(key)
    }

    /// Get a string property from an object value
    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.get(key)?.as_str()
    }

    /// Get a number property from an object value
    pub fn get_number(&self, key: &str) -> Option<f64> {
        self.get(key)?.as_number()
    }

    /// Short type name, used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            AmfValue::Null => "null",
            AmfValue::Undefined => "undefined",
            AmfValue::Boolean(_) => "boolean",
            AmfValue::Number(_) => "number",
            AmfValue::String(_) => "string",
            AmfValue::Object(_) => "object",
            AmfValue::EcmaArray(_) => "mixed array",
            AmfValue::Array(_) => "array",
            AmfValue::Date { .. } => "date",
        }
    }
}

impl Default for AmfValue {
    fn default() -> Self {
        AmfValue::Null
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

impl From<i32> for AmfValue {
    fn from(v: i32) -> Self {
        AmfValue::Number(v as f64)
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

impl From<AmfObject> for AmfValue {
    fn from(v: AmfObject) -> Self {
        AmfValue::Object(v)
    }
}

impl<V: Into<AmfValue>> From<Vec<V>> for AmfValue {
    fn from(v: Vec<V>) -> Self {
        AmfValue::Array(v.into_iter().map(|x| x.into()).collect())
    }
}

/// Object properties in insertion order
///
/// Setting an existing name replaces its value in place, keeping the
/// original position.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AmfObject {
    properties: Vec<(String, AmfValue)>,
}

impl AmfObject {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            properties: Vec::with_capacity(capacity),
        }
    }

    /// Set a property, returning the previous value if the name existed
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<AmfValue>) -> Option<AmfValue> {
        let key = key.into();
        let value = value.into();
        match self.properties.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.properties.push((key, value));
                None
            }
        }
    }

    /// Builder form of [`insert`](Self::insert)
    pub fn with(mut self, key: impl Into<String>, value: impl Into<AmfValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&AmfValue> {
        self.properties
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    pub fn remove(&mut self, key: &str) -> Option<AmfValue> {
        let pos = self.properties.iter().position(|(k, _)| k == key)?;
        Some(self.properties.remove(pos).1)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    /// Properties in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &AmfValue)> {
        self.properties.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.properties.iter().map(|(k, _)| k.as_str())
    }
}

impl<K: Into<String>, V: Into<AmfValue>> FromIterator<(K, V)> for AmfObject {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut obj = AmfObject::new();
        for (k, v) in iter {
            obj.insert(k, v);
        }
        obj
    }
}

/// Fold a timezone offset in minutes into `[-720, 720)`
pub(crate) fn normalize_tz_offset(minutes: i32) -> i16 {
    let folded = (minutes + HALF_DAY_MINUTES).rem_euclid(2 * HALF_DAY_MINUTES) - HALF_DAY_MINUTES;
    folded as i16
}
