//! The core BSON document model: an append-only builder for encoding, a length-prefixed byte
//! reader for decoding, and the [`Bson`]/[`Document`] value types that sit between them.
//!
//! This module has no dependency on an external BSON crate; the wire format is implemented
//! directly against the specification so the rest of the crate can stay in lockstep with exactly
//! the subset of types the driver needs.

mod builder;
mod datetime;
pub(crate) mod de;
mod document;
mod oid;
mod reader;
pub(crate) mod ser;
mod value;

pub use builder::{ChildBuilder, DocumentBuilder, BSON_MAX_SIZE};
pub use datetime::DateTime;
pub use oid::{InvalidObjectId, ObjectId};
pub use value::{
    tag, Binary, BinarySubtype, Bson, DbPointer, DecodeError, Document, JavaScriptCodeWithScope,
    Regex, Timestamp,
};

pub use de::{from_bson, from_document, Deserializer};
pub use ser::{to_bson, to_document, Serializer};
