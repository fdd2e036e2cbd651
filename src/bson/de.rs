//! A `serde::Deserializer` that reads a Rust value out of a [`Bson`] value, the inverse of
//! [`super::ser`]. Together they let option/response structs use `#[derive(Deserialize)]` against
//! our own document type instead of an external BSON crate's.

use serde::de::{
    self, DeserializeSeed, EnumAccess, IntoDeserializer, MapAccess, SeqAccess, VariantAccess,
    Visitor,
};
use serde::Deserialize;

use super::value::{Bson, Document};

/// Error produced while deserializing a [`Bson`] value into a Rust type.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    Custom(String),
    #[error("expected {expected}, found {found}")]
    WrongType { expected: &'static str, found: &'static str },
    #[error("end of document reached while expecting an enum variant")]
    EmptyEnumDocument,
}

impl de::Error for Error {
    fn custom<T: std::fmt::Display>(msg: T) -> Self {
        Error::Custom(msg.to_string())
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

/// Deserializes any `Deserialize` type directly from a [`Document`].
pub fn from_document<T: for<'de> Deserialize<'de>>(doc: Document) -> Result<T, Error> {
    T::deserialize(Deserializer::new(Bson::Document(doc)))
}

/// Deserializes any `Deserialize` type from an arbitrary [`Bson`] value.
pub fn from_bson<T: for<'de> Deserialize<'de>>(value: Bson) -> Result<T, Error> {
    T::deserialize(Deserializer::new(value))
}

pub struct Deserializer {
    value: Bson,
}

impl Deserializer {
    pub fn new(value: Bson) -> Self {
        Self { value }
    }
}

macro_rules! deserialize_forward_to_any {
    ($($method:ident),* $(,)?) => {
        $(
            fn $method<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
                self.deserialize_any(visitor)
            }
        )*
    };
}

impl<'de> de::Deserializer<'de> for Deserializer {
    type Error = Error;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        match self.value {
            Bson::Double(v) => visitor.visit_f64(v),
            Bson::String(v) => visitor.visit_string(v),
            Bson::Boolean(v) => visitor.visit_bool(v),
            Bson::Null | Bson::Undefined => visitor.visit_unit(),
            Bson::Int32(v) => visitor.visit_i32(v),
            Bson::Int64(v) => visitor.visit_i64(v),
            Bson::Array(v) => visitor.visit_seq(SeqDeserializer { iter: v.into_iter() }),
            Bson::Document(v) => visitor.visit_map(MapDeserializer {
                iter: v.into_iter(),
                value: None,
            }),
            Bson::ObjectId(v) => visitor.visit_string(v.to_string()),
            Bson::DateTime(v) => visitor.visit_i64(v.timestamp_millis()),
            Bson::Binary(v) => visitor.visit_byte_buf(v.bytes),
            Bson::Symbol(v) | Bson::JavaScriptCode(v) => visitor.visit_string(v),
            Bson::Timestamp(v) => visitor.visit_u64(v.to_bits()),
            Bson::Decimal128(bytes) => visitor.visit_byte_buf(bytes.to_vec()),
            other @ (Bson::RegularExpression(_)
            | Bson::JavaScriptCodeWithScope(_)
            | Bson::MinKey
            | Bson::MaxKey
            | Bson::DbPointer(_)) => Err(Error::Custom(format!(
                "cannot deserialize {} into a native Rust type",
                type_name(&other)
            ))),
        }
    }

    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        match self.value {
            Bson::Null | Bson::Undefined => visitor.visit_none(),
            _ => visitor.visit_some(self),
        }
    }

    fn deserialize_newtype_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, Error> {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, Error> {
        match self.value {
            Bson::String(variant) => visitor.visit_enum(variant.into_deserializer()),
            Bson::Document(doc) => visitor.visit_enum(EnumDeserializer { doc }),
            other => Err(Error::WrongType {
                expected: "string or document",
                found: type_name(&other),
            }),
        }
    }

    fn deserialize_bool<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        match self.value {
            Bson::Boolean(v) => visitor.visit_bool(v),
            other => Err(Error::WrongType {
                expected: "bool",
                found: type_name(&other),
            }),
        }
    }

    fn deserialize_str<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        match self.value {
            Bson::String(v) => visitor.visit_string(v),
            other => Err(Error::WrongType {
                expected: "string",
                found: type_name(&other),
            }),
        }
    }

    fn deserialize_bytes<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        match self.value {
            Bson::Binary(v) => visitor.visit_byte_buf(v.bytes),
            other => Err(Error::WrongType {
                expected: "binary",
                found: type_name(&other),
            }),
        }
    }

    fn deserialize_unit<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        match self.value {
            Bson::Null | Bson::Undefined => visitor.visit_unit(),
            other => Err(Error::WrongType {
                expected: "null",
                found: type_name(&other),
            }),
        }
    }

    deserialize_forward_to_any! {
        deserialize_i8, deserialize_i16, deserialize_i32, deserialize_i64,
        deserialize_u8, deserialize_u16, deserialize_u32, deserialize_u64,
        deserialize_f32, deserialize_f64,
        deserialize_char, deserialize_string,
        deserialize_byte_buf,
        deserialize_seq, deserialize_map,
        deserialize_identifier, deserialize_ignored_any,
    }

    fn deserialize_unit_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, Error> {
        self.deserialize_unit(visitor)
    }

    fn deserialize_tuple<V: Visitor<'de>>(
        self,
        _len: usize,
        visitor: V,
    ) -> Result<V::Value, Error> {
        self.deserialize_seq(visitor)
    }

    fn deserialize_tuple_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _len: usize,
        visitor: V,
    ) -> Result<V::Value, Error> {
        self.deserialize_seq(visitor)
    }

    fn deserialize_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, Error> {
        self.deserialize_map(visitor)
    }
}

struct SeqDeserializer {
    iter: std::vec::IntoIter<Bson>,
}

impl<'de> SeqAccess<'de> for SeqDeserializer {
    type Error = Error;

    fn next_element_seed<T: DeserializeSeed<'de>>(
        &mut self,
        seed: T,
    ) -> Result<Option<T::Value>, Error> {
        match self.iter.next() {
            Some(value) => seed.deserialize(Deserializer::new(value)).map(Some),
            None => Ok(None),
        }
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.iter.len())
    }
}

struct MapDeserializer {
    iter: std::vec::IntoIter<(String, Bson)>,
    value: Option<Bson>,
}

impl<'de> MapAccess<'de> for MapDeserializer {
    type Error = Error;

    fn next_key_seed<K: DeserializeSeed<'de>>(
        &mut self,
        seed: K,
    ) -> Result<Option<K::Value>, Error> {
        match self.iter.next() {
            Some((key, value)) => {
                self.value = Some(value);
                seed.deserialize(key.into_deserializer()).map(Some)
            }
            None => Ok(None),
        }
    }

    fn next_value_seed<V: DeserializeSeed<'de>>(&mut self, seed: V) -> Result<V::Value, Error> {
        let value = self
            .value
            .take()
            .ok_or_else(|| Error::Custom("next_value_seed called before next_key_seed".into()))?;
        seed.deserialize(Deserializer::new(value))
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.iter.len())
    }
}

impl<'de> IntoDeserializer<'de, Error> for Bson {
    type Deserializer = Deserializer;

    fn into_deserializer(self) -> Deserializer {
        Deserializer::new(self)
    }
}

/// Supports internally-tagged-style enum documents of the shape `{ "<variant>": <payload> }`,
/// the convention the driver uses for things like write errors keyed by operation type.
struct EnumDeserializer {
    doc: Document,
}

impl<'de> EnumAccess<'de> for EnumDeserializer {
    type Error = Error;
    type Variant = VariantDeserializer;

    fn variant_seed<V: DeserializeSeed<'de>>(
        self,
        seed: V,
    ) -> Result<(V::Value, VariantDeserializer), Error> {
        let mut iter = self.doc.into_iter();
        let (key, value) = iter.next().ok_or(Error::EmptyEnumDocument)?;
        let variant = seed.deserialize(key.into_deserializer())?;
        Ok((variant, VariantDeserializer { value }))
    }
}

struct VariantDeserializer {
    value: Bson,
}

impl<'de> VariantAccess<'de> for VariantDeserializer {
    type Error = Error;

    fn unit_variant(self) -> Result<(), Error> {
        Ok(())
    }

    fn newtype_variant_seed<T: DeserializeSeed<'de>>(self, seed: T) -> Result<T::Value, Error> {
        seed.deserialize(Deserializer::new(self.value))
    }

    fn tuple_variant<V: Visitor<'de>>(self, _len: usize, visitor: V) -> Result<V::Value, Error> {
        de::Deserializer::deserialize_seq(Deserializer::new(self.value), visitor)
    }

    fn struct_variant<V: Visitor<'de>>(
        self,
        _fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, Error> {
        de::Deserializer::deserialize_map(Deserializer::new(self.value), visitor)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Reply {
        ok: f64,
        n: Option<i32>,
    }

    #[test]
    fn deserializes_struct_from_document() {
        let mut doc = Document::new();
        doc.insert("ok", 1.0);
        doc.insert("n", 3i32);
        let reply: Reply = from_document(doc).unwrap();
        assert_eq!(
            reply,
            Reply {
                ok: 1.0,
                n: Some(3)
            }
        );
    }

    #[test]
    fn missing_optional_field_deserializes_to_none() {
        let mut doc = Document::new();
        doc.insert("ok", 1.0);
        let reply: Reply = from_document(doc).unwrap();
        assert_eq!(
            reply,
            Reply {
                ok: 1.0,
                n: None
            }
        );
    }
}
