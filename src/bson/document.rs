//! Encoding a [`Document`] to raw BSON bytes and decoding it back.

use super::builder::{ChildBuilder, DocumentBuilder, BSON_MAX_SIZE};
use super::reader::Reader;
use super::value::{
    tag, Binary, BinarySubtype, Bson, DbPointer, DecodeError, Document, JavaScriptCodeWithScope,
    Regex, Timestamp,
};
use super::datetime::DateTime;
use super::oid::ObjectId;

/// The subset of builder operations needed to encode an arbitrary [`Bson`] value, implemented by
/// both [`DocumentBuilder`] and [`ChildBuilder`] so the same recursive encoder works at any
/// nesting depth. Every method can fail the same way `append_*` can: the key contains an
/// interior NUL, or writing the value would push the document past [`BSON_MAX_SIZE`].
trait BsonSink {
    fn put_double(&mut self, key: &str, v: f64) -> Result<(), DecodeError>;
    fn put_string(&mut self, key: &str, v: &str) -> Result<(), DecodeError>;
    fn put_bool(&mut self, key: &str, v: bool) -> Result<(), DecodeError>;
    fn put_null(&mut self, key: &str) -> Result<(), DecodeError>;
    fn put_int32(&mut self, key: &str, v: i32) -> Result<(), DecodeError>;
    fn put_int64(&mut self, key: &str, v: i64) -> Result<(), DecodeError>;
    fn put_object_id(&mut self, key: &str, v: ObjectId) -> Result<(), DecodeError>;
    fn put_datetime(&mut self, key: &str, v: DateTime) -> Result<(), DecodeError>;
    fn put_binary(&mut self, key: &str, v: &Binary) -> Result<(), DecodeError>;
    fn put_regex(&mut self, key: &str, v: &Regex) -> Result<(), DecodeError>;
    fn put_timestamp(&mut self, key: &str, v: Timestamp) -> Result<(), DecodeError>;
    fn put_min_key(&mut self, key: &str) -> Result<(), DecodeError>;
    fn put_max_key(&mut self, key: &str) -> Result<(), DecodeError>;
    fn put_raw(&mut self, key: &str, element_tag: u8, bytes: &[u8]) -> Result<(), DecodeError>;
    fn put_document(&mut self, key: &str, value: &Document) -> Result<(), DecodeError>;
    fn put_array(&mut self, key: &str, value: &[Bson]) -> Result<(), DecodeError>;
}

macro_rules! impl_bson_sink {
    ($t:ty) => {
        impl BsonSink for $t {
            fn put_double(&mut self, key: &str, v: f64) -> Result<(), DecodeError> {
                self.append_double(key, v)
            }
            fn put_string(&mut self, key: &str, v: &str) -> Result<(), DecodeError> {
                self.append_string(key, v)
            }
            fn put_bool(&mut self, key: &str, v: bool) -> Result<(), DecodeError> {
                self.append_bool(key, v)
            }
            fn put_null(&mut self, key: &str) -> Result<(), DecodeError> {
                self.append_null(key)
            }
            fn put_int32(&mut self, key: &str, v: i32) -> Result<(), DecodeError> {
                self.append_int32(key, v)
            }
            fn put_int64(&mut self, key: &str, v: i64) -> Result<(), DecodeError> {
                self.append_int64(key, v)
            }
            fn put_object_id(&mut self, key: &str, v: ObjectId) -> Result<(), DecodeError> {
                self.append_object_id(key, v)
            }
            fn put_datetime(&mut self, key: &str, v: DateTime) -> Result<(), DecodeError> {
                self.append_datetime(key, v)
            }
            fn put_binary(&mut self, key: &str, v: &Binary) -> Result<(), DecodeError> {
                self.append_binary(key, v)
            }
            fn put_regex(&mut self, key: &str, v: &Regex) -> Result<(), DecodeError> {
                self.append_regex(key, v)
            }
            fn put_timestamp(&mut self, key: &str, v: Timestamp) -> Result<(), DecodeError> {
                self.append_timestamp(key, v)
            }
            fn put_min_key(&mut self, key: &str) -> Result<(), DecodeError> {
                self.append_min_key(key)
            }
            fn put_max_key(&mut self, key: &str) -> Result<(), DecodeError> {
                self.append_max_key(key)
            }
            fn put_raw(
                &mut self,
                key: &str,
                element_tag: u8,
                bytes: &[u8],
            ) -> Result<(), DecodeError> {
                self.append_raw_document(key, element_tag, bytes)
            }
            fn put_document(&mut self, key: &str, value: &Document) -> Result<(), DecodeError> {
                let mut child = self.start_document(key)?;
                for (k, v) in value.iter() {
                    write_bson(&mut child, k, v)?;
                }
                child.finish()
            }
            fn put_array(&mut self, key: &str, value: &[Bson]) -> Result<(), DecodeError> {
                let mut child = self.start_array(key)?;
                for (i, v) in value.iter().enumerate() {
                    write_bson(&mut child, &i.to_string(), v)?;
                }
                child.finish()
            }
        }
    };
}

impl_bson_sink!(DocumentBuilder);
impl_bson_sink!(ChildBuilder<'_>);

/// Returns the length-prefixed, NUL-terminated wire payload for a BSON `string`-shaped value
/// (also used for `symbol` and `code` elements, which share the same payload format).
fn string_payload(s: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(s.len() + 5);
    let len = s.len() as i32 + 1;
    out.extend(len.to_le_bytes());
    out.extend(s.as_bytes());
    out.push(0);
    out
}

fn write_bson<B: BsonSink>(sink: &mut B, key: &str, value: &Bson) -> Result<(), DecodeError> {
    match value {
        Bson::Double(v) => sink.put_double(key, *v),
        Bson::String(v) => sink.put_string(key, v),
        Bson::Boolean(v) => sink.put_bool(key, *v),
        Bson::Null => sink.put_null(key),
        Bson::Int32(v) => sink.put_int32(key, *v),
        Bson::Int64(v) => sink.put_int64(key, *v),
        Bson::ObjectId(v) => sink.put_object_id(key, *v),
        Bson::DateTime(v) => sink.put_datetime(key, *v),
        Bson::Binary(v) => sink.put_binary(key, v),
        Bson::RegularExpression(v) => sink.put_regex(key, v),
        Bson::Timestamp(v) => sink.put_timestamp(key, *v),
        Bson::MinKey => sink.put_min_key(key),
        Bson::MaxKey => sink.put_max_key(key),
        Bson::Undefined => sink.put_raw(key, tag::UNDEFINED, &[]),
        Bson::Decimal128(bytes) => sink.put_raw(key, tag::DECIMAL128, bytes),
        Bson::Symbol(s) => sink.put_raw(key, tag::SYMBOL, &string_payload(s)),
        Bson::JavaScriptCode(s) => sink.put_raw(key, tag::JAVASCRIPT_CODE, &string_payload(s)),
        Bson::JavaScriptCodeWithScope(v) => {
            let scope_bytes = Document::to_bytes(&v.scope)?;
            let code_payload = string_payload(&v.code);
            let total_len = (4 + code_payload.len() + scope_bytes.len()) as i32;
            let mut payload = Vec::with_capacity(total_len as usize);
            payload.extend(total_len.to_le_bytes());
            payload.extend(code_payload);
            payload.extend(scope_bytes);
            sink.put_raw(key, tag::JAVASCRIPT_CODE_WITH_SCOPE, &payload)
        }
        Bson::DbPointer(v) => {
            let mut payload = string_payload(&v.namespace);
            payload.extend(v.id.bytes());
            sink.put_raw(key, tag::DB_POINTER, &payload)
        }
        Bson::Document(v) => sink.put_document(key, v),
        Bson::Array(v) => sink.put_array(key, v),
    }
}

impl Document {
    /// Encodes this document to its raw BSON byte representation.
    ///
    /// Fails with [`DecodeError::TooLarge`] if the encoded document would exceed
    /// [`BSON_MAX_SIZE`], or [`DecodeError::InvalidKey`] if any key (including one nested inside
    /// a sub-document or array) contains an interior NUL byte.
    pub fn to_bytes(&self) -> Result<Vec<u8>, DecodeError> {
        let mut builder = DocumentBuilder::new();
        for (k, v) in self.iter() {
            write_bson(&mut builder, k, v)?;
        }
        builder.finish()
    }

    /// Decodes a raw BSON byte buffer into a `Document`. The buffer must contain exactly one
    /// top-level document; trailing bytes are treated as an error.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut reader = Reader::new(bytes);
        let declared_len = reader.read_i32()?;
        if declared_len < 5 || declared_len as usize > BSON_MAX_SIZE {
            return Err(DecodeError::InvalidLength);
        }
        if declared_len as usize != bytes.len() {
            return Err(DecodeError::InvalidLength);
        }
        let doc = decode_elements(&mut reader)?;
        Ok(doc)
    }
}

/// Decodes the element sequence of a document whose length prefix has already been consumed,
/// through its trailing NUL terminator.
fn decode_elements(reader: &mut Reader<'_>) -> Result<Document, DecodeError> {
    let mut doc = Document::new();
    loop {
        let element_tag = reader.read_u8()?;
        if element_tag == 0 {
            return Ok(doc);
        }
        let key = reader.read_cstring()?;
        let value = decode_value(reader, element_tag)?;
        // A decoded cstring key can never contain an interior NUL (the reader stops at the
        // first one), so this can never actually fail.
        doc.try_insert(key, value)?;
    }
}

fn decode_value(reader: &mut Reader<'_>, element_tag: u8) -> Result<Bson, DecodeError> {
    Ok(match element_tag {
        tag::DOUBLE => Bson::Double(reader.read_f64()?),
        tag::STRING => Bson::String(reader.read_string()?),
        tag::DOCUMENT => Bson::Document(decode_nested_document(reader)?),
        tag::ARRAY => Bson::Array(decode_nested_array(reader)?),
        tag::BINARY => Bson::Binary(decode_binary(reader)?),
        tag::UNDEFINED => Bson::Undefined,
        tag::OBJECT_ID => {
            let bytes: [u8; 12] = reader.read_bytes(12)?.try_into().unwrap();
            Bson::ObjectId(ObjectId::from_bytes(bytes))
        }
        tag::BOOLEAN => Bson::Boolean(reader.read_u8()? != 0),
        tag::DATE_TIME => Bson::DateTime(DateTime::from_millis(reader.read_i64()?)),
        tag::NULL => Bson::Null,
        tag::REGEX => {
            let pattern = reader.read_cstring()?;
            let options = reader.read_cstring()?;
            Bson::RegularExpression(Regex { pattern, options })
        }
        tag::DB_POINTER => {
            let namespace = reader.read_string()?;
            let bytes: [u8; 12] = reader.read_bytes(12)?.try_into().unwrap();
            Bson::DbPointer(DbPointer {
                namespace,
                id: ObjectId::from_bytes(bytes),
            })
        }
        tag::JAVASCRIPT_CODE => Bson::JavaScriptCode(reader.read_string()?),
        tag::SYMBOL => Bson::Symbol(reader.read_string()?),
        tag::JAVASCRIPT_CODE_WITH_SCOPE => {
            let _total_len = reader.read_i32()?;
            let code = reader.read_string()?;
            let scope = decode_nested_document(reader)?;
            Bson::JavaScriptCodeWithScope(JavaScriptCodeWithScope { code, scope })
        }
        tag::INT32 => Bson::Int32(reader.read_i32()?),
        tag::TIMESTAMP => Bson::Timestamp(Timestamp::from_bits(reader.read_u64()?)),
        tag::INT64 => Bson::Int64(reader.read_i64()?),
        tag::DECIMAL128 => {
            let bytes: [u8; 16] = reader.read_bytes(16)?.try_into().unwrap();
            Bson::Decimal128(bytes)
        }
        tag::MIN_KEY => Bson::MinKey,
        tag::MAX_KEY => Bson::MaxKey,
        other => return Err(DecodeError::UnknownElementType(other)),
    })
}

fn decode_binary(reader: &mut Reader<'_>) -> Result<Binary, DecodeError> {
    let len = reader.read_i32()?;
    if len < 0 {
        return Err(DecodeError::InvalidLength);
    }
    let subtype = BinarySubtype::from_byte(reader.read_u8()?);
    let bytes = if subtype == BinarySubtype::BinaryOld {
        let inner_len = reader.read_i32()?;
        if inner_len + 4 != len {
            return Err(DecodeError::InvalidLength);
        }
        reader.read_bytes(inner_len as usize)?.to_vec()
    } else {
        reader.read_bytes(len as usize)?.to_vec()
    };
    Ok(Binary { subtype, bytes })
}

/// Decodes a nested document: unlike [`Document::from_bytes`], the length prefix here is read
/// relative to the reader's current position rather than validated against the whole buffer.
fn decode_nested_document(reader: &mut Reader<'_>) -> Result<Document, DecodeError> {
    let declared_len = reader.read_i32()?;
    if declared_len < 5 {
        return Err(DecodeError::InvalidLength);
    }
    let start = reader.position();
    let doc = decode_elements(reader)?;
    let consumed = reader.position() - start + 4;
    if consumed != declared_len as usize {
        return Err(DecodeError::InvalidLength);
    }
    Ok(doc)
}

fn decode_nested_array(reader: &mut Reader<'_>) -> Result<Vec<Bson>, DecodeError> {
    let doc = decode_nested_document(reader)?;
    Ok(doc.into_iter().map(|(_, v)| v).collect())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::bson::value::{BinarySubtype, Timestamp};

    #[test]
    fn round_trips_a_mixed_document() {
        let mut doc = Document::new();
        doc.insert("a", 1i32);
        doc.insert("b", "hello");
        doc.insert("c", true);
        doc.insert("d", Bson::Null);
        let mut nested = Document::new();
        nested.insert("x", 2i64);
        doc.insert("e", nested);
        doc.insert("f", vec![Bson::Int32(1), Bson::Int32(2), Bson::Int32(3)]);
        doc.insert(
            "g",
            Bson::Binary(Binary {
                subtype: BinarySubtype::Generic,
                bytes: vec![1, 2, 3],
            }),
        );
        doc.insert(
            "h",
            Bson::Timestamp(Timestamp {
                time: 100,
                increment: 1,
            }),
        );

        let bytes = doc.to_bytes().unwrap();
        let decoded = Document::from_bytes(&bytes).unwrap();
        assert_eq!(doc, decoded);
    }

    #[test]
    fn rejects_truncated_buffer() {
        let bytes = [5, 0, 0];
        assert!(matches!(
            Document::from_bytes(&bytes),
            Err(DecodeError::UnexpectedEof)
        ));
    }

    #[test]
    fn rejects_length_mismatch() {
        let mut doc = Document::new();
        doc.insert("a", 1i32);
        let mut bytes = doc.to_bytes().unwrap();
        let len = bytes.len() as i32 + 10;
        bytes[0..4].copy_from_slice(&len.to_le_bytes());
        assert!(matches!(
            Document::from_bytes(&bytes),
            Err(DecodeError::InvalidLength)
        ));
    }

    #[test]
    fn to_bytes_fails_with_too_large_instead_of_panicking() {
        let mut doc = Document::new();
        doc.insert("big", "x".repeat(BSON_MAX_SIZE));
        assert!(matches!(doc.to_bytes(), Err(DecodeError::TooLarge)));
    }
}
