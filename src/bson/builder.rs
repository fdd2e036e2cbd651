//! An append-only BSON document builder.
//!
//! Small documents are built entirely on the stack; once a document outgrows its inline buffer,
//! storage is promoted to a heap-allocated, power-of-two-growing `Vec<u8>` capped at
//! [`BSON_MAX_SIZE`]. A child document or array started with [`DocumentBuilder::start_document`]
//! or [`DocumentBuilder::start_array`] borrows the parent mutably for its lifetime, so the
//! compiler (rather than a runtime flag) rejects any attempt to write to the parent while a child
//! is open.

use super::value::{Binary, BinarySubtype, DecodeError};

/// Maximum encoded size of a single BSON document, matching the server's hard limit.
pub const BSON_MAX_SIZE: usize = 16 * 1024 * 1024;

/// Documents at or below this size are built without any heap allocation.
const INLINE_CAPACITY: usize = 120;

enum Storage {
    Inline { buf: [u8; INLINE_CAPACITY], len: usize },
    Heap(Vec<u8>),
}

impl Storage {
    fn len(&self) -> usize {
        match self {
            Storage::Inline { len, .. } => *len,
            Storage::Heap(v) => v.len(),
        }
    }

    fn as_slice(&self) -> &[u8] {
        match self {
            Storage::Inline { buf, len } => &buf[..*len],
            Storage::Heap(v) => v,
        }
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        match self {
            Storage::Inline { buf, len } => &mut buf[..*len],
            Storage::Heap(v) => v,
        }
    }

    /// Appends `bytes`, promoting to heap storage (or growing the heap buffer by doubling) as
    /// needed. Returns `false` without modifying `self` if the result would exceed
    /// [`BSON_MAX_SIZE`]; callers budget for this the same way the server does, by rejecting
    /// oversized documents before encoding.
    fn extend(&mut self, bytes: &[u8]) -> bool {
        let needed = self.len() + bytes.len();
        if needed > BSON_MAX_SIZE {
            return false;
        }

        match self {
            Storage::Inline { buf, len } if needed <= INLINE_CAPACITY => {
                buf[*len..needed].copy_from_slice(bytes);
                *len = needed;
            }
            Storage::Inline { buf, len } => {
                let mut heap = Vec::with_capacity(next_capacity(needed));
                heap.extend_from_slice(&buf[..*len]);
                heap.extend_from_slice(bytes);
                *self = Storage::Heap(heap);
            }
            Storage::Heap(v) => {
                if v.capacity() < needed {
                    v.reserve(next_capacity(needed) - v.len());
                }
                v.extend_from_slice(bytes);
            }
        }
        true
    }

    /// Rolls back to a length previously observed via [`Storage::len`], discarding a partially
    /// written element after a failed append.
    fn truncate(&mut self, len: usize) {
        match self {
            Storage::Inline { len: cur, .. } => *cur = len,
            Storage::Heap(v) => v.truncate(len),
        }
    }
}

/// Rounds `needed` up to the next power of two, capped at [`BSON_MAX_SIZE`].
fn next_capacity(needed: usize) -> usize {
    needed.next_power_of_two().min(BSON_MAX_SIZE).max(needed)
}

/// Builds a top-level BSON document.
pub struct DocumentBuilder {
    storage: Storage,
}

impl Default for DocumentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentBuilder {
    pub fn new() -> Self {
        let mut builder = Self {
            storage: Storage::Inline {
                buf: [0u8; INLINE_CAPACITY],
                len: 0,
            },
        };
        // Reserve space for the length prefix, patched in by `finish`. A fresh inline buffer can
        // always hold 4 bytes, so this can never fail.
        builder.storage.extend(&[0u8; 4]);
        builder
    }

    /// Writes `tag`, `key`, and whatever `payload_fn` appends, rolling back to the
    /// pre-append length on any failure so the document is left unchanged.
    fn append_element(
        &mut self,
        tag: u8,
        key: &str,
        payload_fn: impl FnOnce(&mut Storage) -> bool,
    ) -> Result<(), DecodeError> {
        if key.as_bytes().contains(&0) {
            return Err(DecodeError::InvalidKey);
        }
        let checkpoint = self.storage.len();
        let ok = self.storage.extend(&[tag])
            && self.storage.extend(key.as_bytes())
            && self.storage.extend(&[0u8])
            && payload_fn(&mut self.storage);
        if ok {
            Ok(())
        } else {
            self.storage.truncate(checkpoint);
            Err(DecodeError::TooLarge)
        }
    }

    pub fn append_double(&mut self, key: &str, value: f64) -> Result<(), DecodeError> {
        self.append_element(super::value::tag::DOUBLE, key, |s| {
            s.extend(&value.to_le_bytes())
        })
    }

    pub fn append_string(&mut self, key: &str, value: &str) -> Result<(), DecodeError> {
        self.append_element(super::value::tag::STRING, key, |s| {
            let len = value.len() as i32 + 1;
            s.extend(&len.to_le_bytes()) && s.extend(value.as_bytes()) && s.extend(&[0u8])
        })
    }

    pub fn append_bool(&mut self, key: &str, value: bool) -> Result<(), DecodeError> {
        self.append_element(super::value::tag::BOOLEAN, key, |s| s.extend(&[value as u8]))
    }

    pub fn append_null(&mut self, key: &str) -> Result<(), DecodeError> {
        self.append_element(super::value::tag::NULL, key, |_| true)
    }

    pub fn append_int32(&mut self, key: &str, value: i32) -> Result<(), DecodeError> {
        self.append_element(super::value::tag::INT32, key, |s| {
            s.extend(&value.to_le_bytes())
        })
    }

    pub fn append_int64(&mut self, key: &str, value: i64) -> Result<(), DecodeError> {
        self.append_element(super::value::tag::INT64, key, |s| {
            s.extend(&value.to_le_bytes())
        })
    }

    pub fn append_object_id(
        &mut self,
        key: &str,
        value: super::oid::ObjectId,
    ) -> Result<(), DecodeError> {
        self.append_element(super::value::tag::OBJECT_ID, key, |s| s.extend(&value.bytes()))
    }

    pub fn append_datetime(
        &mut self,
        key: &str,
        value: super::datetime::DateTime,
    ) -> Result<(), DecodeError> {
        self.append_element(super::value::tag::DATE_TIME, key, |s| {
            s.extend(&value.timestamp_millis().to_le_bytes())
        })
    }

    pub fn append_binary(&mut self, key: &str, value: &Binary) -> Result<(), DecodeError> {
        self.append_element(super::value::tag::BINARY, key, |s| {
            if value.subtype == BinarySubtype::BinaryOld {
                // Subtype 0x02 nests a second length prefix for historical compatibility.
                let inner_len = value.bytes.len() as i32;
                let outer_len = inner_len + 4;
                s.extend(&outer_len.to_le_bytes())
                    && s.extend(&[value.subtype.to_byte()])
                    && s.extend(&inner_len.to_le_bytes())
                    && s.extend(&value.bytes)
            } else {
                let len = value.bytes.len() as i32;
                s.extend(&len.to_le_bytes())
                    && s.extend(&[value.subtype.to_byte()])
                    && s.extend(&value.bytes)
            }
        })
    }

    pub fn append_regex(&mut self, key: &str, value: &super::value::Regex) -> Result<(), DecodeError> {
        self.append_element(super::value::tag::REGEX, key, |s| {
            s.extend(value.pattern.as_bytes())
                && s.extend(&[0u8])
                && s.extend(value.canonical_options().as_bytes())
                && s.extend(&[0u8])
        })
    }

    pub fn append_timestamp(
        &mut self,
        key: &str,
        value: super::value::Timestamp,
    ) -> Result<(), DecodeError> {
        self.append_element(super::value::tag::TIMESTAMP, key, |s| {
            s.extend(&value.to_bits().to_le_bytes())
        })
    }

    pub fn append_min_key(&mut self, key: &str) -> Result<(), DecodeError> {
        self.append_element(super::value::tag::MIN_KEY, key, |_| true)
    }

    pub fn append_max_key(&mut self, key: &str) -> Result<(), DecodeError> {
        self.append_element(super::value::tag::MAX_KEY, key, |_| true)
    }

    /// Appends an already-encoded document or array value under `key`. Used by [`Document::to_bytes`]
    /// to splice a previously-built sub-document in directly.
    pub fn append_raw_document(
        &mut self,
        key: &str,
        tag: u8,
        bytes: &[u8],
    ) -> Result<(), DecodeError> {
        self.append_element(tag, key, |s| s.extend(bytes))
    }

    /// Starts a nested document under `key`. The returned [`ChildBuilder`] holds a mutable borrow
    /// of `self`, so the parent cannot be written to (or have another child started) until the
    /// child is dropped or finished.
    pub fn start_document<'p>(&'p mut self, key: &str) -> Result<ChildBuilder<'p>, DecodeError> {
        self.start_child(key, super::value::tag::DOCUMENT)
    }

    /// Starts a nested array under `key`. Array element keys are the caller's responsibility to
    /// supply as their string index ("0", "1", ...), matching the wire format.
    pub fn start_array<'p>(&'p mut self, key: &str) -> Result<ChildBuilder<'p>, DecodeError> {
        self.start_child(key, super::value::tag::ARRAY)
    }

    fn start_child(&mut self, key: &str, tag: u8) -> Result<ChildBuilder<'_>, DecodeError> {
        if key.as_bytes().contains(&0) {
            return Err(DecodeError::InvalidKey);
        }
        let checkpoint = self.storage.len();
        let header_ok = self.storage.extend(&[tag])
            && self.storage.extend(key.as_bytes())
            && self.storage.extend(&[0u8]);
        if !header_ok {
            self.storage.truncate(checkpoint);
            return Err(DecodeError::TooLarge);
        }
        let start = self.storage.len();
        if !self.storage.extend(&[0u8; 4]) {
            self.storage.truncate(checkpoint);
            return Err(DecodeError::TooLarge);
        }
        Ok(ChildBuilder {
            sink: &mut self.storage,
            start,
            finished: false,
        })
    }

    /// Finalizes the document: patches in the total length prefix and trailing NUL terminator,
    /// returning the encoded bytes.
    pub fn finish(mut self) -> Result<Vec<u8>, DecodeError> {
        if !self.storage.extend(&[0u8]) {
            return Err(DecodeError::TooLarge);
        }
        let total_len = self.storage.len() as i32;
        self.storage.sink_patch_i32(0, total_len);
        Ok(self.storage.as_slice().to_vec())
    }
}

/// Anything that can receive appended bytes and report its current length: implemented by
/// [`Storage`] directly and by [`ChildBuilder`] (which forwards to its own parent sink), so a
/// child can itself act as the sink for a grandchild.
trait Sink {
    fn sink_extend(&mut self, bytes: &[u8]) -> bool;
    fn sink_len(&mut self) -> usize;
    fn sink_patch_i32(&mut self, at: usize, value: i32);
    fn sink_truncate(&mut self, len: usize);
}

impl Sink for Storage {
    fn sink_extend(&mut self, bytes: &[u8]) -> bool {
        self.extend(bytes)
    }

    fn sink_len(&mut self) -> usize {
        self.len()
    }

    fn sink_patch_i32(&mut self, at: usize, value: i32) {
        self.as_mut_slice()[at..at + 4].copy_from_slice(&value.to_le_bytes());
    }

    fn sink_truncate(&mut self, len: usize) {
        self.truncate(len);
    }
}

/// A nested document or array currently being built. Exclusive access to the parent buffer for
/// the duration of this borrow is what the BSON spec's "IN_CHILD" builder state enforces at
/// runtime in C implementations; here it falls out of normal Rust borrowing: the parent (or
/// grandparent) sink is inaccessible until this value is dropped or finished.
pub struct ChildBuilder<'p> {
    sink: &'p mut dyn Sink,
    start: usize,
    finished: bool,
}

impl Sink for ChildBuilder<'_> {
    fn sink_extend(&mut self, bytes: &[u8]) -> bool {
        self.sink.sink_extend(bytes)
    }

    fn sink_len(&mut self) -> usize {
        self.sink.sink_len()
    }

    fn sink_patch_i32(&mut self, at: usize, value: i32) {
        self.sink.sink_patch_i32(at, value);
    }

    fn sink_truncate(&mut self, len: usize) {
        self.sink.sink_truncate(len);
    }
}

impl<'p> ChildBuilder<'p> {
    fn append_element(
        &mut self,
        tag: u8,
        key: &str,
        payload_fn: impl FnOnce(&mut dyn Sink) -> bool,
    ) -> Result<(), DecodeError> {
        if key.as_bytes().contains(&0) {
            return Err(DecodeError::InvalidKey);
        }
        let checkpoint = self.sink.sink_len();
        let ok = self.sink.sink_extend(&[tag])
            && self.sink.sink_extend(key.as_bytes())
            && self.sink.sink_extend(&[0u8])
            && payload_fn(self.sink);
        if ok {
            Ok(())
        } else {
            self.sink.sink_truncate(checkpoint);
            Err(DecodeError::TooLarge)
        }
    }

    /// Starts a doubly-nested document under `key`, borrowing this child mutably in turn.
    pub fn start_document(&mut self, key: &str) -> Result<ChildBuilder<'_>, DecodeError> {
        self.start_child(key, super::value::tag::DOCUMENT)
    }

    /// Starts a doubly-nested array under `key`.
    pub fn start_array(&mut self, key: &str) -> Result<ChildBuilder<'_>, DecodeError> {
        self.start_child(key, super::value::tag::ARRAY)
    }

    fn start_child(&mut self, key: &str, tag: u8) -> Result<ChildBuilder<'_>, DecodeError> {
        if key.as_bytes().contains(&0) {
            return Err(DecodeError::InvalidKey);
        }
        let checkpoint = self.sink.sink_len();
        let header_ok = self.sink.sink_extend(&[tag])
            && self.sink.sink_extend(key.as_bytes())
            && self.sink.sink_extend(&[0u8]);
        if !header_ok {
            self.sink.sink_truncate(checkpoint);
            return Err(DecodeError::TooLarge);
        }
        let start = self.sink.sink_len();
        if !self.sink.sink_extend(&[0u8; 4]) {
            self.sink.sink_truncate(checkpoint);
            return Err(DecodeError::TooLarge);
        }
        Ok(ChildBuilder {
            sink: self.sink,
            start,
            finished: false,
        })
    }

    pub fn append_double(&mut self, key: &str, value: f64) -> Result<(), DecodeError> {
        self.append_element(super::value::tag::DOUBLE, key, |s| {
            s.sink_extend(&value.to_le_bytes())
        })
    }

    pub fn append_string(&mut self, key: &str, value: &str) -> Result<(), DecodeError> {
        self.append_element(super::value::tag::STRING, key, |s| {
            let len = value.len() as i32 + 1;
            s.sink_extend(&len.to_le_bytes())
                && s.sink_extend(value.as_bytes())
                && s.sink_extend(&[0u8])
        })
    }

    pub fn append_bool(&mut self, key: &str, value: bool) -> Result<(), DecodeError> {
        self.append_element(super::value::tag::BOOLEAN, key, |s| {
            s.sink_extend(&[value as u8])
        })
    }

    pub fn append_null(&mut self, key: &str) -> Result<(), DecodeError> {
        self.append_element(super::value::tag::NULL, key, |_| true)
    }

    pub fn append_int32(&mut self, key: &str, value: i32) -> Result<(), DecodeError> {
        self.append_element(super::value::tag::INT32, key, |s| {
            s.sink_extend(&value.to_le_bytes())
        })
    }

    pub fn append_int64(&mut self, key: &str, value: i64) -> Result<(), DecodeError> {
        self.append_element(super::value::tag::INT64, key, |s| {
            s.sink_extend(&value.to_le_bytes())
        })
    }

    pub fn append_object_id(
        &mut self,
        key: &str,
        value: super::oid::ObjectId,
    ) -> Result<(), DecodeError> {
        self.append_element(super::value::tag::OBJECT_ID, key, |s| s.sink_extend(&value.bytes()))
    }

    pub fn append_datetime(
        &mut self,
        key: &str,
        value: super::datetime::DateTime,
    ) -> Result<(), DecodeError> {
        self.append_element(super::value::tag::DATE_TIME, key, |s| {
            s.sink_extend(&value.timestamp_millis().to_le_bytes())
        })
    }

    pub fn append_binary(&mut self, key: &str, value: &Binary) -> Result<(), DecodeError> {
        self.append_element(super::value::tag::BINARY, key, |s| {
            if value.subtype == BinarySubtype::BinaryOld {
                let inner_len = value.bytes.len() as i32;
                let outer_len = inner_len + 4;
                s.sink_extend(&outer_len.to_le_bytes())
                    && s.sink_extend(&[value.subtype.to_byte()])
                    && s.sink_extend(&inner_len.to_le_bytes())
                    && s.sink_extend(&value.bytes)
            } else {
                let len = value.bytes.len() as i32;
                s.sink_extend(&len.to_le_bytes())
                    && s.sink_extend(&[value.subtype.to_byte()])
                    && s.sink_extend(&value.bytes)
            }
        })
    }

    pub fn append_regex(&mut self, key: &str, value: &super::value::Regex) -> Result<(), DecodeError> {
        self.append_element(super::value::tag::REGEX, key, |s| {
            s.sink_extend(value.pattern.as_bytes())
                && s.sink_extend(&[0u8])
                && s.sink_extend(value.canonical_options().as_bytes())
                && s.sink_extend(&[0u8])
        })
    }

    pub fn append_timestamp(
        &mut self,
        key: &str,
        value: super::value::Timestamp,
    ) -> Result<(), DecodeError> {
        self.append_element(super::value::tag::TIMESTAMP, key, |s| {
            s.sink_extend(&value.to_bits().to_le_bytes())
        })
    }

    pub fn append_min_key(&mut self, key: &str) -> Result<(), DecodeError> {
        self.append_element(super::value::tag::MIN_KEY, key, |_| true)
    }

    pub fn append_max_key(&mut self, key: &str) -> Result<(), DecodeError> {
        self.append_element(super::value::tag::MAX_KEY, key, |_| true)
    }

    pub fn append_raw_document(
        &mut self,
        key: &str,
        tag: u8,
        bytes: &[u8],
    ) -> Result<(), DecodeError> {
        self.append_element(tag, key, |s| s.sink_extend(bytes))
    }

    /// Finishes this child, patching its length prefix and NUL terminator into the parent
    /// buffer. Consuming `self` here (rather than relying on `Drop`) lets callers surface a
    /// late oversize failure instead of having it silently swallowed by an unwind.
    pub fn finish(mut self) -> Result<(), DecodeError> {
        self.finish_inner()
    }

    fn finish_inner(&mut self) -> Result<(), DecodeError> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        if !self.sink.sink_extend(&[0u8]) {
            return Err(DecodeError::TooLarge);
        }
        let total_len = self.sink.sink_len() - self.start;
        self.sink.sink_patch_i32(self.start, total_len as i32);
        Ok(())
    }
}

impl Drop for ChildBuilder<'_> {
    fn drop(&mut self) {
        // Best effort: a child dropped without calling `finish` (e.g. during an unwind) can't
        // surface a late oversize failure, but `append_element`/`start_child` already reject
        // anything that would grow past `BSON_MAX_SIZE`, so the only work left here is patching
        // an already-reserved length prefix, which cannot itself fail.
        let _ = self.finish_inner();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::bson::document::Document;

    #[test]
    fn inline_document_round_trips() {
        let mut b = DocumentBuilder::new();
        b.append_string("hello", "world").unwrap();
        let bytes = b.finish().unwrap();
        let doc = Document::from_bytes(&bytes).unwrap();
        assert_eq!(doc.get_str("hello"), Some("world"));
    }

    #[test]
    fn nested_child_document_round_trips() {
        let mut b = DocumentBuilder::new();
        {
            let mut child = b.start_document("nested").unwrap();
            child.append_int32("x", 1).unwrap();
            child.finish().unwrap();
        }
        b.append_bool("top", true).unwrap();
        let bytes = b.finish().unwrap();
        let doc = Document::from_bytes(&bytes).unwrap();
        let nested = doc.get_document("nested").unwrap();
        assert_eq!(nested.get_i64("x"), Some(1));
        assert_eq!(doc.get_bool("top"), Some(true));
    }

    #[test]
    fn growth_promotes_past_inline_capacity() {
        let mut b = DocumentBuilder::new();
        let long_value = "x".repeat(500);
        b.append_string("big", &long_value).unwrap();
        let bytes = b.finish().unwrap();
        let doc = Document::from_bytes(&bytes).unwrap();
        assert_eq!(doc.get_str("big"), Some(long_value.as_str()));
    }

    #[test]
    fn oversize_append_fails_without_panicking_and_leaves_document_unchanged() {
        let mut b = DocumentBuilder::new();
        b.append_bool("present", true).unwrap();
        let before = b.storage.len();
        let huge = vec![b'x'; BSON_MAX_SIZE];
        let err = b.append_string("huge", std::str::from_utf8(&huge).unwrap());
        assert!(matches!(err, Err(DecodeError::TooLarge)));
        assert_eq!(b.storage.len(), before);
    }

    #[test]
    fn interior_nul_key_is_rejected() {
        let mut b = DocumentBuilder::new();
        let err = b.append_bool("bad\0key", true);
        assert!(matches!(err, Err(DecodeError::InvalidKey)));
    }
}
