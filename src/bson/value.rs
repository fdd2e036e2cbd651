//! The `Bson` value enum and the ordered `Document` type built on top of it.

use std::collections::HashMap;
use std::fmt;

use serde::de::{MapAccess, SeqAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::datetime::DateTime;
use super::oid::ObjectId;

/// BSON element type tags, as they appear on the wire.
pub mod tag {
    pub const DOUBLE: u8 = 0x01;
    pub const STRING: u8 = 0x02;
    pub const DOCUMENT: u8 = 0x03;
    pub const ARRAY: u8 = 0x04;
    pub const BINARY: u8 = 0x05;
    pub const UNDEFINED: u8 = 0x06;
    pub const OBJECT_ID: u8 = 0x07;
    pub const BOOLEAN: u8 = 0x08;
    pub const DATE_TIME: u8 = 0x09;
    pub const NULL: u8 = 0x0A;
    pub const REGEX: u8 = 0x0B;
    pub const DB_POINTER: u8 = 0x0C;
    pub const JAVASCRIPT_CODE: u8 = 0x0D;
    pub const SYMBOL: u8 = 0x0E;
    pub const JAVASCRIPT_CODE_WITH_SCOPE: u8 = 0x0F;
    pub const INT32: u8 = 0x10;
    pub const TIMESTAMP: u8 = 0x11;
    pub const INT64: u8 = 0x12;
    pub const DECIMAL128: u8 = 0x13;
    pub const MIN_KEY: u8 = 0xFF;
    pub const MAX_KEY: u8 = 0x7F;
}

/// Binary subtype, per the BSON spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinarySubtype {
    Generic,
    Function,
    BinaryOld,
    UuidOld,
    Uuid,
    Md5,
    Encrypted,
    Column,
    Sensitive,
    Reserved(u8),
    UserDefined(u8),
}

impl BinarySubtype {
    pub fn from_byte(b: u8) -> Self {
        match b {
            0x00 => Self::Generic,
            0x01 => Self::Function,
            0x02 => Self::BinaryOld,
            0x03 => Self::UuidOld,
            0x04 => Self::Uuid,
            0x05 => Self::Md5,
            0x06 => Self::Encrypted,
            0x07 => Self::Column,
            0x08 => Self::Sensitive,
            0x09..=0x7F => Self::Reserved(b),
            _ => Self::UserDefined(b),
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            Self::Generic => 0x00,
            Self::Function => 0x01,
            Self::BinaryOld => 0x02,
            Self::UuidOld => 0x03,
            Self::Uuid => 0x04,
            Self::Md5 => 0x05,
            Self::Encrypted => 0x06,
            Self::Column => 0x07,
            Self::Sensitive => 0x08,
            Self::Reserved(b) | Self::UserDefined(b) => b,
        }
    }
}

/// Binary data together with its subtype.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Binary {
    pub subtype: BinarySubtype,
    pub bytes: Vec<u8>,
}

/// A BSON regular expression: pattern plus options, where options must be kept in canonical
/// (lexicographically sorted) order when encoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Regex {
    pub pattern: String,
    pub options: String,
}

impl Regex {
    /// Returns the options string with its characters sorted, matching the canonical on-wire
    /// ordering required by the BSON spec.
    pub fn canonical_options(&self) -> String {
        let mut chars: Vec<char> = self.options.chars().collect();
        chars.sort_unstable();
        chars.into_iter().collect()
    }
}

/// JavaScript code paired with a scope document.
#[derive(Debug, Clone, PartialEq)]
pub struct JavaScriptCodeWithScope {
    pub code: String,
    pub scope: Document,
}

/// A replication timestamp: a 4-byte increment and a 4-byte seconds-since-epoch, both unsigned,
/// packed into a single `u64` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp {
    pub time: u32,
    pub increment: u32,
}

impl Timestamp {
    pub fn to_bits(self) -> u64 {
        ((self.time as u64) << 32) | self.increment as u64
    }

    pub fn from_bits(bits: u64) -> Self {
        Self {
            time: (bits >> 32) as u32,
            increment: bits as u32,
        }
    }
}

impl serde::Serialize for Timestamp {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.to_bits())
    }
}

struct TimestampVisitor;

impl serde::de::Visitor<'_> for TimestampVisitor {
    type Value = Timestamp;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a replication timestamp packed into a u64")
    }

    fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<Timestamp, E> {
        Ok(Timestamp::from_bits(v))
    }

    fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<Timestamp, E> {
        Ok(Timestamp::from_bits(v as u64))
    }
}

impl<'de> serde::Deserialize<'de> for Timestamp {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(TimestampVisitor)
    }
}

/// A BSON DBPointer (deprecated type 0x0C), kept only so round-tripping unknown documents does
/// not lose data.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DbPointer {
    pub namespace: String,
    pub id: ObjectId,
}

/// Errors that can occur while decoding a raw BSON byte buffer into a [`Document`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum DecodeError {
    #[error("unexpected end of buffer")]
    UnexpectedEof,
    #[error("declared document length does not match buffer contents")]
    InvalidLength,
    #[error("string payload missing NUL terminator")]
    MissingNulTerminator,
    #[error("string payload was not valid UTF-8")]
    InvalidUtf8,
    #[error("unrecognized BSON element type tag: {0:#x}")]
    UnknownElementType(u8),
    #[error("document is not terminated with a trailing NUL byte")]
    MissingTrailingNul,
    #[error("document exceeds the maximum allowed BSON document size")]
    TooLarge,
    #[error("key contains an interior NUL byte")]
    InvalidKey,
}

/// A BSON value. Mirrors the full set of types the wire format supports, including the legacy
/// ones (`Undefined`, `Symbol`, `DbPointer`) that must still round-trip.
#[derive(Debug, Clone, PartialEq)]
pub enum Bson {
    Double(f64),
    String(String),
    Array(Vec<Bson>),
    Document(Document),
    Boolean(bool),
    Null,
    RegularExpression(Regex),
    JavaScriptCode(String),
    JavaScriptCodeWithScope(JavaScriptCodeWithScope),
    Int32(i32),
    Int64(i64),
    Timestamp(Timestamp),
    Binary(Binary),
    ObjectId(ObjectId),
    DateTime(DateTime),
    Symbol(String),
    Decimal128([u8; 16]),
    Undefined,
    MinKey,
    MaxKey,
    DbPointer(DbPointer),
}

impl Bson {
    /// Returns the wire type tag for this value.
    pub fn element_type(&self) -> u8 {
        match self {
            Bson::Double(_) => tag::DOUBLE,
            Bson::String(_) => tag::STRING,
            Bson::Array(_) => tag::ARRAY,
            Bson::Document(_) => tag::DOCUMENT,
            Bson::Boolean(_) => tag::BOOLEAN,
            Bson::Null => tag::NULL,
            Bson::RegularExpression(_) => tag::REGEX,
            Bson::JavaScriptCode(_) => tag::JAVASCRIPT_CODE,
            Bson::JavaScriptCodeWithScope(_) => tag::JAVASCRIPT_CODE_WITH_SCOPE,
            Bson::Int32(_) => tag::INT32,
            Bson::Int64(_) => tag::INT64,
            Bson::Timestamp(_) => tag::TIMESTAMP,
            Bson::Binary(_) => tag::BINARY,
            Bson::ObjectId(_) => tag::OBJECT_ID,
            Bson::DateTime(_) => tag::DATE_TIME,
            Bson::Symbol(_) => tag::SYMBOL,
            Bson::Decimal128(_) => tag::DECIMAL128,
            Bson::Undefined => tag::UNDEFINED,
            Bson::MinKey => tag::MIN_KEY,
            Bson::MaxKey => tag::MAX_KEY,
            Bson::DbPointer(_) => tag::DB_POINTER,
        }
    }

    /// Coerces any numeric BSON value into an `i64`, returning `None` for non-numeric or
    /// lossy float values. Used when reading fields like `maxTimeMS` that the server may send
    /// back as any numeric type.
    pub fn as_i64_lossless(&self) -> Option<i64> {
        match self {
            Bson::Int32(i) => Some(*i as i64),
            Bson::Int64(i) => Some(*i),
            Bson::Double(d) if d.fract() == 0.0 && *d >= i64::MIN as f64 && *d <= i64::MAX as f64 => {
                Some(*d as i64)
            }
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Bson::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_document(&self) -> Option<&Document> {
        match self {
            Bson::Document(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Bson]> {
        match self {
            Bson::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Bson::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_object_id(&self) -> Option<ObjectId> {
        match self {
            Bson::ObjectId(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<DateTime> {
        match self {
            Bson::DateTime(dt) => Some(*dt),
            _ => None,
        }
    }

    /// The "truthiness" of a value as MongoDB's query language defines it: everything except
    /// `false`, `null`, and numeric zero is truthy.
    pub fn as_bool_truthy(&self) -> bool {
        match self {
            Bson::Boolean(b) => *b,
            Bson::Null | Bson::Undefined => false,
            Bson::Int32(0) => false,
            Bson::Int64(0) => false,
            Bson::Double(d) if *d == 0.0 => false,
            _ => true,
        }
    }
}

impl From<i32> for Bson {
    fn from(v: i32) -> Self {
        Bson::Int32(v)
    }
}

impl From<i64> for Bson {
    fn from(v: i64) -> Self {
        Bson::Int64(v)
    }
}

impl From<f64> for Bson {
    fn from(v: f64) -> Self {
        Bson::Double(v)
    }
}

impl From<bool> for Bson {
    fn from(v: bool) -> Self {
        Bson::Boolean(v)
    }
}

impl From<String> for Bson {
    fn from(v: String) -> Self {
        Bson::String(v)
    }
}

impl From<&str> for Bson {
    fn from(v: &str) -> Self {
        Bson::String(v.to_owned())
    }
}

impl From<ObjectId> for Bson {
    fn from(v: ObjectId) -> Self {
        Bson::ObjectId(v)
    }
}

impl From<DateTime> for Bson {
    fn from(v: DateTime) -> Self {
        Bson::DateTime(v)
    }
}

impl From<Document> for Bson {
    fn from(v: Document) -> Self {
        Bson::Document(v)
    }
}

impl<T: Into<Bson>> From<Vec<T>> for Bson {
    fn from(v: Vec<T>) -> Self {
        Bson::Array(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Bson>> From<Option<T>> for Bson {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Bson::Null,
        }
    }
}

/// An ordered BSON document: field insertion order is preserved both in memory and on the wire,
/// matching server semantics where field order is significant for commands.
#[derive(Clone, Default, PartialEq)]
pub struct Document {
    pairs: Vec<(String, Bson)>,
}

impl Document {
    pub fn new() -> Self {
        Self { pairs: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Inserts a key-value pair, overwriting any existing value for that key while preserving
    /// the key's original position.
    ///
    /// # Panics
    ///
    /// Panics if `key` contains an interior NUL byte, which cannot be represented as a BSON
    /// element name. Every call site in this crate uses a literal key, so this can never
    /// actually trigger; callers building a key from untrusted input should use
    /// [`Document::try_insert`] instead.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Bson>) -> Option<Bson> {
        self.try_insert(key, value)
            .expect("document key must not contain an interior NUL byte")
    }

    /// Inserts a key-value pair, returning [`DecodeError::InvalidKey`] instead of panicking if
    /// `key` contains an interior NUL byte. The document is left unchanged on failure.
    pub fn try_insert(
        &mut self,
        key: impl Into<String>,
        value: impl Into<Bson>,
    ) -> Result<Option<Bson>, DecodeError> {
        let key = key.into();
        if key.as_bytes().contains(&0) {
            return Err(DecodeError::InvalidKey);
        }
        let value = value.into();
        if let Some(existing) = self.pairs.iter_mut().find(|(k, _)| *k == key) {
            Ok(Some(std::mem::replace(&mut existing.1, value)))
        } else {
            self.pairs.push((key, value));
            Ok(None)
        }
    }

    pub fn get(&self, key: &str) -> Option<&Bson> {
        self.pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Bson> {
        self.pairs.iter_mut().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn remove(&mut self, key: &str) -> Option<Bson> {
        let idx = self.pairs.iter().position(|(k, _)| k == key)?;
        Some(self.pairs.remove(idx).1)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.pairs.iter().any(|(k, _)| k == key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.pairs.iter().map(|(k, _)| k)
    }

    pub fn values(&self) -> impl Iterator<Item = &Bson> {
        self.pairs.iter().map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Bson)> {
        self.pairs.iter().map(|(k, v)| (k, v))
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Bson::as_str)
    }

    pub fn get_document(&self, key: &str) -> Option<&Document> {
        self.get(key).and_then(Bson::as_document)
    }

    pub fn get_array(&self, key: &str) -> Option<&[Bson]> {
        self.get(key).and_then(Bson::as_array)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(Bson::as_bool)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(Bson::as_i64_lossless)
    }

    pub fn get_object_id(&self, key: &str) -> Option<ObjectId> {
        self.get(key).and_then(Bson::as_object_id)
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut m = f.debug_map();
        for (k, v) in &self.pairs {
            m.entry(k, v);
        }
        m.finish()
    }
}

impl IntoIterator for Document {
    type Item = (String, Bson);
    type IntoIter = std::vec::IntoIter<(String, Bson)>;

    fn into_iter(self) -> Self::IntoIter {
        self.pairs.into_iter()
    }
}

impl FromIterator<(String, Bson)> for Document {
    fn from_iter<I: IntoIterator<Item = (String, Bson)>>(iter: I) -> Self {
        let mut doc = Document::new();
        for (k, v) in iter {
            doc.insert(k, v);
        }
        doc
    }
}

impl From<HashMap<String, Bson>> for Document {
    fn from(map: HashMap<String, Bson>) -> Self {
        map.into_iter().collect()
    }
}

/// Serializes like an untyped map, so option/response structs can hold a raw `Document`/`Bson`
/// field (a query filter, an index-spec hint) without this crate needing a second value type for
/// "BSON that isn't going to be strongly typed."
impl Serialize for Bson {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Bson::Double(v) => serializer.serialize_f64(*v),
            Bson::String(v) => serializer.serialize_str(v),
            Bson::Array(v) => v.serialize(serializer),
            Bson::Document(v) => v.serialize(serializer),
            Bson::Boolean(v) => serializer.serialize_bool(*v),
            Bson::Null | Bson::Undefined => serializer.serialize_unit(),
            Bson::Int32(v) => serializer.serialize_i32(*v),
            Bson::Int64(v) => serializer.serialize_i64(*v),
            Bson::Timestamp(v) => v.serialize(serializer),
            Bson::ObjectId(v) => v.serialize(serializer),
            Bson::DateTime(v) => v.serialize(serializer),
            Bson::Symbol(v) | Bson::JavaScriptCode(v) => serializer.serialize_str(v),
            Bson::Binary(v) => serializer.serialize_bytes(&v.bytes),
            Bson::Decimal128(bytes) => serializer.serialize_bytes(bytes),
            Bson::RegularExpression(_)
            | Bson::JavaScriptCodeWithScope(_)
            | Bson::MinKey
            | Bson::MaxKey
            | Bson::DbPointer(_) => Err(serde::ser::Error::custom(format!(
                "cannot serialize a {} through the generic BSON value",
                type_name(self)
            ))),
        }
    }
}

fn type_name(value: &Bson) -> &'static str {
    match value {
        Bson::Double(_) => "double",
        Bson::String(_) => "string",
        Bson::Array(_) => "array",
        Bson::Document(_) => "document",
        Bson::Boolean(_) => "bool",
        Bson::Null => "null",
        Bson::RegularExpression(_) => "regex",
        Bson::JavaScriptCode(_) => "javascript",
        Bson::JavaScriptCodeWithScope(_) => "javascriptWithScope",
        Bson::Int32(_) => "int32",
        Bson::Int64(_) => "int64",
        Bson::Timestamp(_) => "timestamp",
        Bson::Binary(_) => "binary",
        Bson::ObjectId(_) => "objectId",
        Bson::DateTime(_) => "datetime",
        Bson::Symbol(_) => "symbol",
        Bson::Decimal128(_) => "decimal128",
        Bson::Undefined => "undefined",
        Bson::MinKey => "minKey",
        Bson::MaxKey => "maxKey",
        Bson::DbPointer(_) => "dbPointer",
    }
}

struct BsonVisitor;

impl<'de> Visitor<'de> for BsonVisitor {
    type Value = Bson;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("any BSON value")
    }

    fn visit_bool<E>(self, v: bool) -> std::result::Result<Bson, E> {
        Ok(Bson::Boolean(v))
    }

    fn visit_i32<E>(self, v: i32) -> std::result::Result<Bson, E> {
        Ok(Bson::Int32(v))
    }

    fn visit_i64<E>(self, v: i64) -> std::result::Result<Bson, E> {
        Ok(Bson::Int64(v))
    }

    fn visit_u32<E>(self, v: u32) -> std::result::Result<Bson, E> {
        Ok(Bson::Int64(v as i64))
    }

    fn visit_u64<E: serde::de::Error>(self, v: u64) -> std::result::Result<Bson, E> {
        i64::try_from(v)
            .map(Bson::Int64)
            .map_err(|_| E::custom("u64 value does not fit in a BSON int64"))
    }

    fn visit_f64<E>(self, v: f64) -> std::result::Result<Bson, E> {
        Ok(Bson::Double(v))
    }

    fn visit_str<E>(self, v: &str) -> std::result::Result<Bson, E> {
        Ok(Bson::String(v.to_string()))
    }

    fn visit_string<E>(self, v: String) -> std::result::Result<Bson, E> {
        Ok(Bson::String(v))
    }

    fn visit_none<E>(self) -> std::result::Result<Bson, E> {
        Ok(Bson::Null)
    }

    fn visit_unit<E>(self) -> std::result::Result<Bson, E> {
        Ok(Bson::Null)
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> std::result::Result<Bson, D::Error> {
        Bson::deserialize(deserializer)
    }

    fn visit_bytes<E>(self, v: &[u8]) -> std::result::Result<Bson, E> {
        Ok(Bson::Binary(Binary {
            subtype: BinarySubtype::Generic,
            bytes: v.to_vec(),
        }))
    }

    fn visit_byte_buf<E>(self, v: Vec<u8>) -> std::result::Result<Bson, E> {
        Ok(Bson::Binary(Binary {
            subtype: BinarySubtype::Generic,
            bytes: v,
        }))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<Bson, A::Error> {
        let mut values = Vec::new();
        while let Some(value) = seq.next_element::<Bson>()? {
            values.push(value);
        }
        Ok(Bson::Array(values))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<Bson, A::Error> {
        let mut doc = Document::new();
        while let Some((key, value)) = map.next_entry::<String, Bson>()? {
            doc.insert(key, value);
        }
        Ok(Bson::Document(doc))
    }
}

impl<'de> Deserialize<'de> for Bson {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_any(BsonVisitor)
    }
}

impl Serialize for Document {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.pairs.len()))?;
        for (k, v) in &self.pairs {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

struct DocumentVisitor;

impl<'de> Visitor<'de> for DocumentVisitor {
    type Value = Document;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a BSON document")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<Document, A::Error> {
        let mut doc = Document::new();
        while let Some((key, value)) = map.next_entry::<String, Bson>()? {
            doc.insert(key, value);
        }
        Ok(doc)
    }
}

impl<'de> Deserialize<'de> for Document {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_map(DocumentVisitor)
    }
}

/// Builds a [`Document`] from a JSON-like literal, mirroring the teacher's `doc!` macro.
#[macro_export]
macro_rules! doc {
    () => {
        $crate::bson::Document::new()
    };
    ( $($key:expr => $val:expr),* $(,)? ) => {{
        let mut doc = $crate::bson::Document::new();
        $(
            doc.insert($key, $val);
        )*
        doc
    }};
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn insert_preserves_order_and_overwrites_in_place() {
        let mut doc = Document::new();
        doc.insert("a", 1i32);
        doc.insert("b", 2i32);
        doc.insert("a", 3i32);
        let keys: Vec<_> = doc.keys().cloned().collect();
        assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(doc.get_i64("a"), Some(3));
    }

    #[test]
    fn regex_options_are_sorted_canonically() {
        let re = Regex {
            pattern: "a".into(),
            options: "xim".into(),
        };
        assert_eq!(re.canonical_options(), "imx");
    }

    #[test]
    fn truthiness_matches_query_language_rules() {
        assert!(!Bson::Null.as_bool_truthy());
        assert!(!Bson::Int32(0).as_bool_truthy());
        assert!(Bson::Int32(1).as_bool_truthy());
        assert!(Bson::String(String::new()).as_bool_truthy());
    }
}
