//! The crate's error type and the error-classification logic that retryable reads/writes and
//! change stream resumption depend on.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use crate::bson::Document;

/// A specialized `Result` type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// The label attached to a retryable write error, telling the caller it is safe to retry the
/// entire write once more.
pub const RETRYABLE_WRITE_ERROR: &str = "RetryableWriteError";

/// The label attached to an error that makes a change stream eligible for automatic resumption.
pub const RESUMABLE_CHANGE_STREAM_ERROR: &str = "ResumableChangeStreamError";

/// Server error codes that indicate the node is no longer the primary (stepping down, shutting
/// down, or an arbiter/secondary incorrectly targeted for a write).
const NOTWRITABLEPRIMARY_CODES: &[i32] = &[10107, 13435, 10058];
const RECOVERING_CODES: &[i32] = &[11600, 11602, 13436, 189, 91];
const SHUTTING_DOWN_CODES: &[i32] = &[91, 11600];

/// Error codes, beyond network errors, that make a read retryable per the retryable-reads spec.
const RETRYABLE_READ_CODES: &[i32] = &[
    11600, 11602, 10107, 13435, 13436, 189, 91, 7, 6, 89, 9001, 262,
];

/// Error codes, beyond network errors, that make a write retryable per the retryable-writes spec.
const RETRYABLE_WRITE_CODES: &[i32] = &[
    11600, 11602, 10107, 13435, 13436, 189, 91, 7, 6, 89, 9001, 262,
];

/// Error codes that make a change stream resumable regardless of wire version, per the
/// change-streams spec's allow-list for servers that predate the `ResumableChangeStreamError`
/// label.
const RESUMABLE_CHANGE_STREAM_CODES: &[i32] = &[
    6, 7, 89, 91, 189, 262, 9001, 10107, 11600, 11602, 13029, 13030, 13435, 13436, 63, 150, 13388,
    234, 133,
];

/// Error codes that always make a change stream non-resumable, even if they would otherwise be
/// allow-listed.
const NON_RESUMABLE_CHANGE_STREAM_CODES: &[i32] = &[136, 237, 280];

/// The minimum wire version at which a server reports the `ResumableChangeStreamError` label
/// directly instead of relying on the allow-list above.
const RESUMABLE_LABEL_WIRE_VERSION: i32 = 9;

/// The crate's error type: a boxed [`ErrorKind`] plus the cross-cutting metadata (labels, the wire
/// version of the server that produced it, and an optional wrapped cause) that retry and resume
/// logic need regardless of which kind produced the error.
#[derive(Debug, Clone)]
pub struct Error {
    kind: Box<ErrorKind>,
    labels: HashSet<String>,
    wire_version: Option<i32>,
    source: Option<Box<Error>>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind: Box::new(kind),
            labels: HashSet::new(),
            wire_version: None,
            source: None,
        }
    }

    pub fn with_labels(mut self, labels: impl IntoIterator<Item = String>) -> Self {
        self.labels.extend(labels);
        self
    }

    pub fn with_wire_version(mut self, wire_version: i32) -> Self {
        self.wire_version = Some(wire_version);
        self
    }

    pub fn with_source(mut self, source: Error) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn labels(&self) -> &HashSet<String> {
        &self.labels
    }

    pub fn add_label(&mut self, label: impl Into<String>) {
        self.labels.insert(label.into());
    }

    pub fn remove_label(&mut self, label: &str) {
        self.labels.remove(label);
    }

    pub fn contains_label(&self, label: &str) -> bool {
        self.labels.contains(label)
    }

    /// The `topologyVersion` a command error carries, if any, so SDAM can tell a stale error
    /// (from a server that has since moved on) from a fresh one.
    pub fn topology_version(&self) -> Option<crate::sdam::TopologyVersion> {
        match &*self.kind {
            ErrorKind::Command(e) => e
                .topology_version
                .as_ref()
                .and_then(|doc| crate::bson::from_document(doc.clone()).ok()),
            _ => None,
        }
    }

    /// The server code this error carries, if it originated as a command or write-concern error.
    pub fn sdam_code(&self) -> Option<i32> {
        match &*self.kind {
            ErrorKind::Command(e) => Some(e.code),
            ErrorKind::Write(WriteFailure::WriteConcernError(e)) => Some(e.code),
            _ => None,
        }
    }

    pub fn is_network_error(&self) -> bool {
        matches!(&*self.kind, ErrorKind::Io(_))
    }

    pub fn is_server_error(&self) -> bool {
        matches!(&*self.kind, ErrorKind::Command(_) | ErrorKind::Write(_))
    }

    pub fn is_notwritableprimary(&self) -> bool {
        self.sdam_code()
            .is_some_and(|c| NOTWRITABLEPRIMARY_CODES.contains(&c))
    }

    pub fn is_recovering(&self) -> bool {
        self.sdam_code().is_some_and(|c| RECOVERING_CODES.contains(&c))
    }

    pub fn is_shutting_down(&self) -> bool {
        self.sdam_code()
            .is_some_and(|c| SHUTTING_DOWN_CODES.contains(&c))
    }

    pub fn is_state_change_error(&self) -> bool {
        self.is_notwritableprimary() || self.is_recovering()
    }

    /// Whether this error makes the operation that produced it eligible for one retryable-read
    /// replay: a network error, or a server error whose code is in the retryable-read allow-list.
    pub fn is_read_retryable(&self) -> bool {
        if self.is_network_error() {
            return true;
        }
        self.sdam_code().is_some_and(|c| RETRYABLE_READ_CODES.contains(&c))
    }

    /// As [`Self::is_read_retryable`], for writes.
    pub fn is_write_retryable(&self) -> bool {
        if self.is_network_error() {
            return true;
        }
        self.sdam_code().is_some_and(|c| RETRYABLE_WRITE_CODES.contains(&c))
    }

    /// Whether a [`RETRYABLE_WRITE_ERROR`] label should be attached before surfacing this error,
    /// per the retryable-writes spec's pre-4.4 compatibility rule: servers at wire version 9+
    /// (4.4+) attach the label themselves, so older servers' errors need it added here instead.
    pub fn should_add_retryable_write_label(&self, max_wire_version: i32) -> bool {
        if max_wire_version >= 9 {
            return false;
        }
        self.is_write_retryable()
    }

    /// Whether this error makes an in-progress change stream eligible for a single automatic
    /// resume attempt.
    pub fn is_resumable(&self) -> bool {
        if self.is_network_error() {
            return true;
        }
        let Some(code) = self.sdam_code() else {
            return false;
        };
        if NON_RESUMABLE_CHANGE_STREAM_CODES.contains(&code) {
            return false;
        }
        if self.contains_label(RESUMABLE_CHANGE_STREAM_ERROR) {
            return true;
        }
        match self.wire_version {
            Some(wv) if wv >= RESUMABLE_LABEL_WIRE_VERSION => false,
            _ => RESUMABLE_CHANGE_STREAM_CODES.contains(&code),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e as &(dyn std::error::Error + 'static))
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error::new(kind)
    }
}

impl From<crate::bson::DecodeError> for Error {
    fn from(e: crate::bson::DecodeError) -> Self {
        Error::new(ErrorKind::BsonDecode(e.to_string()))
    }
}

impl From<crate::bson::de::Error> for Error {
    fn from(e: crate::bson::de::Error) -> Self {
        Error::new(ErrorKind::BsonDecode(e.to_string()))
    }
}

impl From<crate::bson::ser::Error> for Error {
    fn from(e: crate::bson::ser::Error) -> Self {
        Error::new(ErrorKind::BsonSerialize(e.to_string()))
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::new(ErrorKind::Io(Arc::new(e)))
    }
}

/// The category of failure a particular [`Error`] represents. Non-exhaustive: this crate only
/// implements the core read/write/cursor/topology path, not the out-of-scope subsystems
/// (auth, TLS, encryption, GridFS) the original driver also has variants for.
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum ErrorKind {
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("error decoding BSON: {0}")]
    BsonDecode(String),

    #[error("error serializing BSON: {0}")]
    BsonSerialize(String),

    #[error("command failed: {0}")]
    Command(CommandError),

    #[error("write error: {0}")]
    Write(WriteFailure),

    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("invalid server response: {message}")]
    InvalidResponse { message: String },

    #[error("server selection timed out: {message}")]
    ServerSelection { message: String },

    #[error("incompatible server: {message}")]
    IncompatibleServer { message: String },

    #[error("no resume token is available to resume this change stream")]
    MissingResumeToken,

    #[error("cursor returned an invalid response after being exhausted")]
    InvalidCursorState,

    #[error("the connection pool for {address} was cleared and is not accepting checkouts")]
    ConnectionPoolCleared { address: String },

    #[error("{message}")]
    Internal { message: String },
}

/// A command-level error reported by the server in a command reply's `ok: 0` body.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandError {
    pub code: i32,
    pub code_name: String,
    #[serde(rename = "errmsg")]
    pub message: String,
    pub topology_version: Option<Document>,
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(code {}, {}): {}", self.code, self.code_name, self.message)
    }
}

/// A write-concern error, or a bulk write failure containing one or more per-document write
/// errors and/or a write-concern error.
#[derive(Debug, Clone)]
pub enum WriteFailure {
    WriteConcernError(WriteConcernError),
    WriteError(WriteError),
}

impl fmt::Display for WriteFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteFailure::WriteConcernError(e) => write!(f, "{e}"),
            WriteFailure::WriteError(e) => write!(f, "{e}"),
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteConcernError {
    pub code: i32,
    pub code_name: String,
    #[serde(rename = "errmsg")]
    pub message: String,
    #[serde(rename = "errInfo")]
    pub details: Option<Document>,
}

impl fmt::Display for WriteConcernError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "write concern error (code {}): {}", self.code, self.message)
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteError {
    pub index: i64,
    pub code: i32,
    pub code_name: Option<String>,
    #[serde(rename = "errmsg")]
    pub message: String,
}

impl fmt::Display for WriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "write error (code {}): {}", self.code, self.message)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn network_error() -> Error {
        Error::new(ErrorKind::Io(Arc::new(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset",
        ))))
    }

    fn command_error(code: i32) -> Error {
        Error::new(ErrorKind::Command(CommandError {
            code,
            code_name: "Test".into(),
            message: "boom".into(),
            topology_version: None,
        }))
    }

    #[test]
    fn network_errors_are_always_retryable_and_resumable() {
        let e = network_error();
        assert!(e.is_read_retryable());
        assert!(e.is_write_retryable());
        assert!(e.is_resumable());
    }

    #[test]
    fn notwritableprimary_code_is_write_retryable() {
        let e = command_error(10107);
        assert!(e.is_write_retryable());
        assert!(e.is_notwritableprimary());
    }

    #[test]
    fn retryable_write_label_only_added_for_old_wire_versions() {
        let e = command_error(11600);
        assert!(e.should_add_retryable_write_label(6));
        assert!(!e.should_add_retryable_write_label(9));
    }

    #[test]
    fn resumable_label_wins_over_wire_version_gate_when_present() {
        let mut e = command_error(999).with_wire_version(20);
        assert!(!e.is_resumable());
        e.add_label(RESUMABLE_CHANGE_STREAM_ERROR);
        assert!(e.is_resumable());
    }

    #[test]
    fn non_resumable_codes_never_resume_even_on_old_wire_versions() {
        let e = command_error(136).with_wire_version(4);
        assert!(!e.is_resumable());
    }
}
