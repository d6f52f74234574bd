//! AMF0 encoder and decoder
//!
//! AMF0 is the legacy tagged value format carried by RTMP commands and
//! data messages.
//!
//! Type Markers:
//! ```text
//! 0x00 - Number (IEEE 754 double)
//! 0x01 - Boolean
//! 0x02 - String (UTF-8, 16-bit length prefix)
//! 0x03 - Object (key-value pairs until 0x000009)
//! 0x05 - Null
//! 0x06 - Undefined
//! 0x07 - Reference (16-bit index)
//! 0x08 - ECMA Array (advisory count + key-value pairs)
//! 0x09 - Object End (0x000009 sequence)
//! 0x0A - Strict Array (dense array)
//! 0x0B - Date (double + timezone)
//! 0x0C - Long String (UTF-8, 32-bit length prefix)
//! 0x0D - Unsupported
//! 0x0F - XML Document (decoded as a string)
//! 0x10 - Typed Object (decoded as an anonymous object)
//! ```
//!
//! Decoding is strict: a truncated or malformed field anywhere inside a
//! value fails the whole top-level value and nothing partial is returned.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::value::{normalize_tz_offset, AmfObject, AmfValue};
use crate::error::AmfError;

// AMF0 type markers
const MARKER_NUMBER: u8 = 0x00;
const MARKER_BOOLEAN: u8 = 0x01;
const MARKER_STRING: u8 = 0x02;
const MARKER_OBJECT: u8 = 0x03;
const MARKER_NULL: u8 = 0x05;
const MARKER_UNDEFINED: u8 = 0x06;
const MARKER_REFERENCE: u8 = 0x07;
const MARKER_ECMA_ARRAY: u8 = 0x08;
const MARKER_OBJECT_END: u8 = 0x09;
const MARKER_STRICT_ARRAY: u8 = 0x0A;
const MARKER_DATE: u8 = 0x0B;
const MARKER_LONG_STRING: u8 = 0x0C;
const MARKER_UNSUPPORTED: u8 = 0x0D;
const MARKER_XML_DOCUMENT: u8 = 0x0F;
const MARKER_TYPED_OBJECT: u8 = 0x10;

/// Maximum nesting depth for objects/arrays (prevent stack overflow)
const MAX_NESTING_DEPTH: usize = 64;

/// Longest string that still fits the short string form
const SHORT_STRING_MAX: usize = 0xFFFF;

/// AMF0 decoder
pub struct Amf0Decoder {
    /// Reference table for object references
    references: Vec<AmfValue>,
    /// Current nesting depth
    depth: usize,
}

impl Amf0Decoder {
    pub fn new() -> Self {
        Self {
            references: Vec::new(),
            depth: 0,
        }
    }

    /// Reset decoder state (call between messages)
    pub fn reset(&mut self) {
        self.references.clear();
        self.depth = 0;
    }

    /// Decode a single AMF0 value from the buffer
    pub fn decode(&mut self, buf: &mut Bytes) -> Result<AmfValue, AmfError> {
        if buf.is_empty() {
            return Err(AmfError::UnexpectedEof);
        }

        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            self.depth -= 1;
            return Err(AmfError::NestingTooDeep);
        }

        let marker = buf.get_u8();
        let result = self.decode_value(marker, buf);
        self.depth -= 1;
        result
    }

    /// Decode all values from buffer until exhausted
    pub fn decode_all(&mut self, buf: &mut Bytes) -> Result<Vec<AmfValue>, AmfError> {
        let mut values = Vec::new();
        while buf.has_remaining() {
            values.push(self.decode(buf)?);
        }
        Ok(values)
    }

    /// Decode a value that must be a string
    pub fn decode_string_value(&mut self, buf: &mut Bytes) -> Result<String, AmfError> {
        match self.decode(buf)? {
            AmfValue::String(s) => Ok(s),
            other => Err(AmfError::UnexpectedType {
                expected: "string",
                found: other.type_name(),
            }),
        }
    }

    /// Decode a value that must be a number
    pub fn decode_number_value(&mut self, buf: &mut Bytes) -> Result<f64, AmfError> {
        match self.decode(buf)? {
            AmfValue::Number(n) => Ok(n),
            other => Err(AmfError::UnexpectedType {
                expected: "number",
                found: other.type_name(),
            }),
        }
    }

    fn decode_value(&mut self, marker: u8, buf: &mut Bytes) -> Result<AmfValue, AmfError> {
        match marker {
            MARKER_NUMBER => self.decode_number(buf),
            MARKER_BOOLEAN => self.decode_boolean(buf),
            MARKER_STRING => Ok(AmfValue::String(self.read_utf8(buf)?)),
            MARKER_OBJECT => self.decode_object(buf),
            MARKER_NULL => Ok(AmfValue::Null),
            MARKER_UNDEFINED | MARKER_UNSUPPORTED => Ok(AmfValue::Undefined),
            MARKER_REFERENCE => self.decode_reference(buf),
            MARKER_ECMA_ARRAY => self.decode_ecma_array(buf),
            MARKER_STRICT_ARRAY => self.decode_strict_array(buf),
            MARKER_DATE => self.decode_date(buf),
            MARKER_LONG_STRING | MARKER_XML_DOCUMENT => {
                Ok(AmfValue::String(self.read_utf8_long(buf)?))
            }
            MARKER_TYPED_OBJECT => {
                let class_name = self.read_utf8(buf)?;
                tracing::trace!(class = %class_name, "Decoding typed object as anonymous object");
                self.decode_object(buf)
            }
            _ => Err(AmfError::UnknownMarker(marker)),
        }
    }

    fn decode_number(&mut self, buf: &mut Bytes) -> Result<AmfValue, AmfError> {
        if buf.remaining() < 8 {
            return Err(AmfError::UnexpectedEof);
        }
        Ok(AmfValue::Number(buf.get_f64()))
    }

    fn decode_boolean(&mut self, buf: &mut Bytes) -> Result<AmfValue, AmfError> {
        if buf.is_empty() {
            return Err(AmfError::UnexpectedEof);
        }
        Ok(AmfValue::Boolean(buf.get_u8() != 0))
    }

    fn decode_object(&mut self, buf: &mut Bytes) -> Result<AmfValue, AmfError> {
        let obj_index = self.references.len();
        self.references.push(AmfValue::Null); // Placeholder

        let properties = self.decode_properties(buf)?;
        let obj = AmfValue::Object(properties);
        self.references[obj_index] = obj.clone();
        Ok(obj)
    }

    fn decode_ecma_array(&mut self, buf: &mut Bytes) -> Result<AmfValue, AmfError> {
        if buf.remaining() < 4 {
            return Err(AmfError::UnexpectedEof);
        }

        // Count is only a hint; the end marker terminates the array
        let _count = buf.get_u32();

        let arr_index = self.references.len();
        self.references.push(AmfValue::Null);

        let properties = self.decode_properties(buf)?;
        let arr = AmfValue::EcmaArray(properties);
        self.references[arr_index] = arr.clone();
        Ok(arr)
    }

    /// Read (name, value) pairs up to the empty-name + end-marker terminator
    fn decode_properties(&mut self, buf: &mut Bytes) -> Result<AmfObject, AmfError> {
        let mut properties = AmfObject::new();

        loop {
            let key = self.read_utf8(buf)?;

            if key.is_empty() {
                if buf.is_empty() {
                    return Err(AmfError::UnexpectedEof);
                }
                if buf.get_u8() != MARKER_OBJECT_END {
                    return Err(AmfError::InvalidObjectEnd);
                }
                break;
            }

            let value = self.decode(buf)?;
            properties.insert(key, value);
        }

        Ok(properties)
    }

    fn decode_strict_array(&mut self, buf: &mut Bytes) -> Result<AmfValue, AmfError> {
        if buf.remaining() < 4 {
            return Err(AmfError::UnexpectedEof);
        }

        let count = buf.get_u32() as usize;

        let arr_index = self.references.len();
        self.references.push(AmfValue::Null);

        // Every element takes at least its marker byte
        if count > buf.remaining() {
            return Err(AmfError::UnexpectedEof);
        }

        let mut elements = Vec::with_capacity(count);
        for _ in 0..count {
            elements.push(self.decode(buf)?);
        }

        let arr = AmfValue::Array(elements);
        self.references[arr_index] = arr.clone();
        Ok(arr)
    }

    fn decode_date(&mut self, buf: &mut Bytes) -> Result<AmfValue, AmfError> {
        if buf.remaining() < 10 {
            return Err(AmfError::UnexpectedEof);
        }

        let millis = buf.get_f64();
        let tz_offset = buf.get_i16();

        Ok(AmfValue::Date {
            millis,
            tz_offset: normalize_tz_offset(tz_offset as i32),
        })
    }

    fn decode_reference(&mut self, buf: &mut Bytes) -> Result<AmfValue, AmfError> {
        if buf.remaining() < 2 {
            return Err(AmfError::UnexpectedEof);
        }

        let index = buf.get_u16();
        // A placeholder means the reference points into an unfinished container
        match self.references.get(index as usize) {
            Some(value) if !matches!(value, AmfValue::Null) => Ok(value.clone()),
            _ => Err(AmfError::InvalidReference(index)),
        }
    }

    /// Read UTF-8 string with 16-bit length prefix
    fn read_utf8(&mut self, buf: &mut Bytes) -> Result<String, AmfError> {
        if buf.remaining() < 2 {
            return Err(AmfError::UnexpectedEof);
        }

        let len = buf.get_u16() as usize;
        read_utf8_bytes(buf, len)
    }

    /// Read UTF-8 string with 32-bit length prefix
    fn read_utf8_long(&mut self, buf: &mut Bytes) -> Result<String, AmfError> {
        if buf.remaining() < 4 {
            return Err(AmfError::UnexpectedEof);
        }

        let len = buf.get_u32() as usize;
        read_utf8_bytes(buf, len)
    }
}

impl Default for Amf0Decoder {
    fn default() -> Self {
        Self::new()
    }
}

fn read_utf8_bytes(buf: &mut Bytes, len: usize) -> Result<String, AmfError> {
    if buf.remaining() < len {
        return Err(AmfError::UnexpectedEof);
    }

    let bytes = buf.split_to(len);
    String::from_utf8(bytes.to_vec()).map_err(|_| AmfError::InvalidUtf8)
}

/// AMF0 encoder
pub struct Amf0Encoder {
    buf: BytesMut,
}

impl Amf0Encoder {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(256),
        }
    }

    /// Create encoder with specific capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    /// Get the encoded bytes and reset encoder
    pub fn finish(&mut self) -> Bytes {
        self.buf.split().freeze()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Encode a single AMF0 value
    pub fn encode(&mut self, value: &AmfValue) {
        match value {
            AmfValue::Null => {
                self.buf.put_u8(MARKER_NULL);
            }
            AmfValue::Undefined => {
                self.buf.put_u8(MARKER_UNDEFINED);
            }
            AmfValue::Boolean(b) => {
                self.buf.put_u8(MARKER_BOOLEAN);
                self.buf.put_u8(u8::from(*b));
            }
            AmfValue::Number(n) => {
                self.buf.put_u8(MARKER_NUMBER);
                self.buf.put_f64(*n);
            }
            AmfValue::String(s) => {
                if s.len() > SHORT_STRING_MAX {
                    self.buf.put_u8(MARKER_LONG_STRING);
                    self.buf.put_u32(s.len() as u32);
                } else {
                    self.buf.put_u8(MARKER_STRING);
                    self.buf.put_u16(s.len() as u16);
                }
                self.buf.put_slice(s.as_bytes());
            }
            AmfValue::Object(props) => {
                self.buf.put_u8(MARKER_OBJECT);
                self.encode_properties(props);
            }
            AmfValue::EcmaArray(props) => {
                self.buf.put_u8(MARKER_ECMA_ARRAY);
                self.buf.put_u32(props.len() as u32);
                self.encode_properties(props);
            }
            AmfValue::Array(elements) => {
                self.buf.put_u8(MARKER_STRICT_ARRAY);
                self.buf.put_u32(elements.len() as u32);
                for elem in elements {
                    self.encode(elem);
                }
            }
            AmfValue::Date { millis, tz_offset } => {
                self.buf.put_u8(MARKER_DATE);
                self.buf.put_f64(*millis);
                self.buf.put_i16(normalize_tz_offset(*tz_offset as i32));
            }
        }
    }

    /// Encode multiple values
    pub fn encode_all(&mut self, values: &[AmfValue]) {
        for value in values {
            self.encode(value);
        }
    }

    /// Own properties in insertion order, then the terminator
    fn encode_properties(&mut self, props: &AmfObject) {
        for (key, val) in props.iter() {
            if key.is_empty() {
                // An empty name would read back as the terminator
                tracing::debug!("Skipping property with empty name");
                continue;
            }
            if key.len() > SHORT_STRING_MAX {
                // Names only have a 16-bit length on the wire
                tracing::warn!(len = key.len(), "Skipping property with oversized name");
                continue;
            }
            self.write_utf8(key);
            self.encode(val);
        }
        self.buf.put_u16(0);
        self.buf.put_u8(MARKER_OBJECT_END);
    }

    /// Write UTF-8 string with 16-bit length prefix (no type marker)
    ///
    /// Callers keep `s` within `SHORT_STRING_MAX` bytes.
    fn write_utf8(&mut self, s: &str) {
        self.buf.put_u16(s.len() as u16);
        self.buf.put_slice(s.as_bytes());
    }
}

impl Default for Amf0Encoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Convenience function to encode a single value
pub fn encode(value: &AmfValue) -> Bytes {
    let mut encoder = Amf0Encoder::new();
    encoder.encode(value);
    encoder.finish()
}

/// Convenience function to encode multiple values
pub fn encode_all(values: &[AmfValue]) -> Bytes {
    let mut encoder = Amf0Encoder::new();
    encoder.encode_all(values);
    encoder.finish()
}

/// Convenience function to decode a single value
pub fn decode(data: &[u8]) -> Result<AmfValue, AmfError> {
    let mut decoder = Amf0Decoder::new();
    let mut buf = Bytes::copy_from_slice(data);
    decoder.decode(&mut buf)
}

/// Convenience function to decode all values
pub fn decode_all(data: &[u8]) -> Result<Vec<AmfValue>, AmfError> {
    let mut decoder = Amf0Decoder::new();
    let mut buf = Bytes::copy_from_slice(data);
    decoder.decode_all(&mut buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(value: AmfValue) {
        let encoded = encode(&value);
        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn test_scalar_roundtrips() {
        roundtrip(AmfValue::Number(42.5));
        roundtrip(AmfValue::Number(-0.0));
        roundtrip(AmfValue::Number(f64::MAX));
        roundtrip(AmfValue::String("hello world".into()));
        roundtrip(AmfValue::String("ünïcödé ✓".into()));
        roundtrip(AmfValue::Boolean(true));
        roundtrip(AmfValue::Boolean(false));
        roundtrip(AmfValue::Null);
        roundtrip(AmfValue::Undefined);
        roundtrip(AmfValue::date(1_234_567_890_123.0, -300));
    }

    #[test]
    fn test_number_wire_format() {
        let encoded = encode(&AmfValue::Number(1.0));
        assert_eq!(&encoded[..], &[0x00, 0x3F, 0xF0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_nested_object_roundtrip_preserves_order() {
        let inner = AmfObject::new().with("b", 2.0).with("a", 1.0);
        let value = AmfValue::Object(
            AmfObject::new()
                .with("name", "test")
                .with("inner", inner)
                .with("list", vec![AmfValue::Null, AmfValue::Boolean(false)]),
        );

        let encoded = encode(&value);
        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded, value);

        let keys: Vec<_> = decoded.as_object().unwrap().keys().collect();
        assert_eq!(keys, ["name", "inner", "list"]);
    }

    #[test]
    fn test_object_wire_terminator() {
        let encoded = encode(&AmfValue::Object(AmfObject::new().with("a", true)));
        assert_eq!(
            &encoded[..],
            &[0x03, 0x00, 0x01, b'a', 0x01, 0x01, 0x00, 0x00, 0x09]
        );
    }

    #[test]
    fn test_ecma_array_count_is_advisory() {
        // Count says 7 but only one pair precedes the terminator
        let data = [
            0x08, 0x00, 0x00, 0x00, 0x07, 0x00, 0x01, b'x', 0x05, 0x00, 0x00, 0x09,
        ];
        let decoded = decode(&data).unwrap();
        assert_eq!(
            decoded,
            AmfValue::EcmaArray(AmfObject::new().with("x", AmfValue::Null))
        );
    }

    #[test]
    fn test_array_roundtrip() {
        roundtrip(AmfValue::Array(vec![
            AmfValue::Number(1.0),
            AmfValue::String("two".into()),
            AmfValue::Boolean(true),
        ]));
    }

    #[test]
    fn test_multiple_values() {
        let values = vec![
            AmfValue::String("connect".into()),
            AmfValue::Number(1.0),
            AmfValue::Null,
        ];

        let encoded = encode_all(&values);
        let decoded = decode_all(&encoded).unwrap();
        assert_eq!(decoded, values);
    }

    #[test]
    fn test_long_string() {
        let long_str = "x".repeat(70000);
        let encoded = encode(&AmfValue::String(long_str.clone()));
        assert_eq!(encoded[0], MARKER_LONG_STRING);
        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded, AmfValue::String(long_str));
    }

    #[test]
    fn test_oversized_property_name_is_skipped() {
        let long_key = "k".repeat(SHORT_STRING_MAX + 1);
        let value = AmfValue::Object(
            AmfObject::new()
                .with("before", 1.0)
                .with(long_key.as_str(), 2.0)
                .with("after", 3.0),
        );
        let decoded = decode(&encode(&value)).unwrap();
        assert_eq!(
            decoded,
            AmfValue::Object(AmfObject::new().with("before", 1.0).with("after", 3.0))
        );

        // The longest name that fits still goes out whole
        let max_key = "m".repeat(SHORT_STRING_MAX);
        roundtrip(AmfValue::Object(AmfObject::new().with(max_key.as_str(), true)));
    }

    #[test]
    fn test_truncated_input_fails_whole_value() {
        let value = AmfValue::Object(
            AmfObject::new()
                .with("first", 1.0)
                .with("second", "complete"),
        );
        let encoded = encode(&value);

        for cut in 1..encoded.len() {
            assert!(decode(&encoded[..cut]).is_err(), "cut at {} decoded", cut);
        }
    }

    #[test]
    fn test_malformed_inputs() {
        assert_eq!(decode(&[]), Err(AmfError::UnexpectedEof));
        assert_eq!(decode(&[0x04]), Err(AmfError::UnknownMarker(0x04)));
        assert_eq!(decode(&[0x02, 0x00, 0x02, 0xFF, 0xFE]), Err(AmfError::InvalidUtf8));
        // Object whose terminator is not 0x09
        assert_eq!(
            decode(&[0x03, 0x00, 0x00, 0x05]),
            Err(AmfError::InvalidObjectEnd)
        );
        // Reference with nothing to point at
        assert_eq!(
            decode(&[0x07, 0x00, 0x00]),
            Err(AmfError::InvalidReference(0))
        );
    }

    #[test]
    fn test_nesting_limit() {
        let mut data = vec![0x0A, 0x00, 0x00, 0x00, 0x01].repeat(MAX_NESTING_DEPTH + 1);
        data.push(0x05);
        assert_eq!(decode(&data), Err(AmfError::NestingTooDeep));
    }

    #[test]
    fn test_typed_string_helpers() {
        let mut buf = encode_all(&[AmfValue::from("_result"), AmfValue::from(3.0)]);
        let mut decoder = Amf0Decoder::new();
        assert_eq!(decoder.decode_string_value(&mut buf).unwrap(), "_result");
        assert_eq!(decoder.decode_number_value(&mut buf).unwrap(), 3.0);

        let mut buf = encode(&AmfValue::Null);
        assert!(matches!(
            decoder.decode_string_value(&mut buf),
            Err(AmfError::UnexpectedType { expected: "string", .. })
        ));
    }
}
