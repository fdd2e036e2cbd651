//! A `serde::Serializer` that produces [`Bson`]/[`Document`] values, so option structs such as
//! `FindOptions` can derive `Serialize` the same way they would against an external BSON crate.

use serde::ser::{self, Serialize};

use super::value::{Binary, BinarySubtype, Bson, Document};

/// Error produced while serializing a Rust value into [`Bson`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    Custom(String),
    #[error("top-level value did not serialize to a document")]
    NotADocument,
}

impl ser::Error for Error {
    fn custom<T: std::fmt::Display>(msg: T) -> Self {
        Error::Custom(msg.to_string())
    }
}

/// Serializes any `Serialize` value into a [`Document`]. Returns [`Error::NotADocument`] if the
/// value does not serialize to a map or struct at the top level.
pub fn to_document<T: Serialize>(value: &T) -> Result<Document, Error> {
    match value.serialize(Serializer)? {
        Bson::Document(doc) => Ok(doc),
        _ => Err(Error::NotADocument),
    }
}

/// Serializes any `Serialize` value into a [`Bson`].
pub fn to_bson<T: Serialize>(value: &T) -> Result<Bson, Error> {
    value.serialize(Serializer)
}

#[derive(Clone, Copy)]
pub struct Serializer;

impl ser::Serializer for Serializer {
    type Ok = Bson;
    type Error = Error;
    type SerializeSeq = SerializeArray;
    type SerializeTuple = SerializeArray;
    type SerializeTupleStruct = SerializeArray;
    type SerializeTupleVariant = SerializeTupleVariant;
    type SerializeMap = SerializeMapImpl;
    type SerializeStruct = SerializeMapImpl;
    type SerializeStructVariant = SerializeStructVariantImpl;

    fn serialize_bool(self, v: bool) -> Result<Bson, Error> {
        Ok(Bson::Boolean(v))
    }

    fn serialize_i8(self, v: i8) -> Result<Bson, Error> {
        self.serialize_i32(v as i32)
    }

    fn serialize_i16(self, v: i16) -> Result<Bson, Error> {
        self.serialize_i32(v as i32)
    }

    fn serialize_i32(self, v: i32) -> Result<Bson, Error> {
        Ok(Bson::Int32(v))
    }

    fn serialize_i64(self, v: i64) -> Result<Bson, Error> {
        Ok(Bson::Int64(v))
    }

    fn serialize_u8(self, v: u8) -> Result<Bson, Error> {
        self.serialize_i32(v as i32)
    }

    fn serialize_u16(self, v: u16) -> Result<Bson, Error> {
        self.serialize_i32(v as i32)
    }

    fn serialize_u32(self, v: u32) -> Result<Bson, Error> {
        self.serialize_i64(v as i64)
    }

    fn serialize_u64(self, v: u64) -> Result<Bson, Error> {
        if v > i64::MAX as u64 {
            return Err(Error::Custom(format!("u64 value {v} does not fit in i64")));
        }
        self.serialize_i64(v as i64)
    }

    fn serialize_f32(self, v: f32) -> Result<Bson, Error> {
        self.serialize_f64(v as f64)
    }

    fn serialize_f64(self, v: f64) -> Result<Bson, Error> {
        Ok(Bson::Double(v))
    }

    fn serialize_char(self, v: char) -> Result<Bson, Error> {
        Ok(Bson::String(v.to_string()))
    }

    fn serialize_str(self, v: &str) -> Result<Bson, Error> {
        Ok(Bson::String(v.to_owned()))
    }

    fn serialize_bytes(self, v: &[u8]) -> Result<Bson, Error> {
        Ok(Bson::Binary(Binary {
            subtype: BinarySubtype::Generic,
            bytes: v.to_vec(),
        }))
    }

    fn serialize_none(self) -> Result<Bson, Error> {
        Ok(Bson::Null)
    }

    fn serialize_some<T: ?Sized + Serialize>(self, value: &T) -> Result<Bson, Error> {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Result<Bson, Error> {
        Ok(Bson::Null)
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Result<Bson, Error> {
        Ok(Bson::Null)
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
    ) -> Result<Bson, Error> {
        Ok(Bson::String(variant.to_owned()))
    }

    fn serialize_newtype_struct<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        value: &T,
    ) -> Result<Bson, Error> {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        value: &T,
    ) -> Result<Bson, Error> {
        let mut doc = Document::new();
        doc.insert(variant, value.serialize(self)?);
        Ok(Bson::Document(doc))
    }

    fn serialize_seq(self, len: Option<usize>) -> Result<SerializeArray, Error> {
        Ok(SerializeArray {
            items: Vec::with_capacity(len.unwrap_or(0)),
        })
    }

    fn serialize_tuple(self, len: usize) -> Result<SerializeArray, Error> {
        self.serialize_seq(Some(len))
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        len: usize,
    ) -> Result<SerializeArray, Error> {
        self.serialize_seq(Some(len))
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        len: usize,
    ) -> Result<SerializeTupleVariant, Error> {
        Ok(SerializeTupleVariant {
            variant: variant.to_owned(),
            items: Vec::with_capacity(len),
        })
    }

    fn serialize_map(self, _len: Option<usize>) -> Result<SerializeMapImpl, Error> {
        Ok(SerializeMapImpl {
            doc: Document::new(),
            next_key: None,
        })
    }

    fn serialize_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> Result<SerializeMapImpl, Error> {
        Ok(SerializeMapImpl {
            doc: Document::new(),
            next_key: None,
        })
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        _len: usize,
    ) -> Result<SerializeStructVariantImpl, Error> {
        Ok(SerializeStructVariantImpl {
            variant: variant.to_owned(),
            doc: Document::new(),
        })
    }
}

pub struct SerializeArray {
    items: Vec<Bson>,
}

impl ser::SerializeSeq for SerializeArray {
    type Ok = Bson;
    type Error = Error;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), Error> {
        self.items.push(value.serialize(Serializer)?);
        Ok(())
    }

    fn end(self) -> Result<Bson, Error> {
        Ok(Bson::Array(self.items))
    }
}

impl ser::SerializeTuple for SerializeArray {
    type Ok = Bson;
    type Error = Error;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), Error> {
        ser::SerializeSeq::serialize_element(self, value)
    }

    fn end(self) -> Result<Bson, Error> {
        ser::SerializeSeq::end(self)
    }
}

impl ser::SerializeTupleStruct for SerializeArray {
    type Ok = Bson;
    type Error = Error;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), Error> {
        ser::SerializeSeq::serialize_element(self, value)
    }

    fn end(self) -> Result<Bson, Error> {
        ser::SerializeSeq::end(self)
    }
}

pub struct SerializeTupleVariant {
    variant: String,
    items: Vec<Bson>,
}

impl ser::SerializeTupleVariant for SerializeTupleVariant {
    type Ok = Bson;
    type Error = Error;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), Error> {
        self.items.push(value.serialize(Serializer)?);
        Ok(())
    }

    fn end(self) -> Result<Bson, Error> {
        let mut doc = Document::new();
        doc.insert(self.variant, Bson::Array(self.items));
        Ok(Bson::Document(doc))
    }
}

pub struct SerializeMapImpl {
    doc: Document,
    next_key: Option<String>,
}

impl ser::SerializeMap for SerializeMapImpl {
    type Ok = Bson;
    type Error = Error;

    fn serialize_key<T: ?Sized + Serialize>(&mut self, key: &T) -> Result<(), Error> {
        let key_bson = key.serialize(Serializer)?;
        let key_str = match key_bson {
            Bson::String(s) => s,
            other => return Err(Error::Custom(format!("map key must serialize to a string, got {other:?}"))),
        };
        self.next_key = Some(key_str);
        Ok(())
    }

    fn serialize_value<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), Error> {
        let key = self
            .next_key
            .take()
            .ok_or_else(|| Error::Custom("serialize_value called before serialize_key".into()))?;
        self.doc.insert(key, value.serialize(Serializer)?);
        Ok(())
    }

    fn end(self) -> Result<Bson, Error> {
        Ok(Bson::Document(self.doc))
    }
}

impl ser::SerializeStruct for SerializeMapImpl {
    type Ok = Bson;
    type Error = Error;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<(), Error> {
        let bson = value.serialize(Serializer)?;
        // Matches the teacher convention of omitting `None` option fields entirely rather than
        // writing explicit BSON nulls into command documents.
        if !matches!(bson, Bson::Null) {
            self.doc.insert(key, bson);
        }
        Ok(())
    }

    fn end(self) -> Result<Bson, Error> {
        Ok(Bson::Document(self.doc))
    }
}

pub struct SerializeStructVariantImpl {
    variant: String,
    doc: Document,
}

impl ser::SerializeStructVariant for SerializeStructVariantImpl {
    type Ok = Bson;
    type Error = Error;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<(), Error> {
        let bson = value.serialize(Serializer)?;
        if !matches!(bson, Bson::Null) {
            self.doc.insert(key, bson);
        }
        Ok(())
    }

    fn end(self) -> Result<Bson, Error> {
        let mut outer = Document::new();
        outer.insert(self.variant, self.doc);
        Ok(Bson::Document(outer))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde::Serialize;

    #[derive(Serialize)]
    struct Opts {
        limit: Option<i64>,
        batch_size: Option<u32>,
        name: String,
    }

    #[test]
    fn struct_omits_none_fields() {
        let opts = Opts {
            limit: Some(5),
            batch_size: None,
            name: "coll".into(),
        };
        let doc = to_document(&opts).unwrap();
        assert_eq!(doc.get_i64("limit"), Some(5));
        assert!(!doc.contains_key("batch_size"));
        assert_eq!(doc.get_str("name"), Some("coll"));
    }
}
