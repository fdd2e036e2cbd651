//! The documents a change stream hands back: the event envelope and the resume token embedded
//! in every one of its `_id` fields.

use serde::{Deserialize, Serialize};

use crate::bson::{Document, Timestamp};

/// An opaque token marking a change stream's position, taken verbatim from an event's `_id` field
/// or a reply's `postBatchResumeToken`. Round-trips through `resumeAfter`/`startAfter` without this
/// crate ever needing to interpret its internal shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumeToken(pub(crate) Document);

impl ResumeToken {
    /// Wraps an already-known resume token document, e.g. one persisted from a previous session.
    pub fn parse(token: Document) -> Self {
        Self(token)
    }
}

/// A single change event, as spec.md §4.7 describes: operation type, namespace, and whichever of
/// `document_key`/`update_description`/`full_document` apply to that operation type.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct ChangeStreamEvent<T = Document> {
    /// The resume token for this event; becomes the new current token once the event is iterated.
    #[serde(rename = "_id")]
    pub id: ResumeToken,

    pub operation_type: OperationType,

    /// The collection or database the event occurred in. Absent for cluster-wide `drop`-adjacent
    /// events that have no single namespace (e.g. `dropDatabase`).
    pub ns: Option<ChangeStreamEventSource>,

    /// The new namespace, present only on `OperationType::Rename`.
    pub to: Option<EventNamespace>,

    /// The matched document's shard key plus `_id` (or just `_id` for an unsharded collection).
    /// Present for insert/update/replace/delete.
    pub document_key: Option<Document>,

    /// Which fields changed or were removed, present only for `OperationType::Update`.
    pub update_description: Option<UpdateDescription>,

    /// The matched document itself (insert/replace always; update only under `fullDocument:
    /// updateLookup` or when a post-image is requested and available).
    pub full_document: Option<T>,

    /// The server's operation time for this event, present on 4.0+.
    pub cluster_time: Option<Timestamp>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct UpdateDescription {
    pub updated_fields: Document,
    pub removed_fields: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub enum OperationType {
    Insert,
    Update,
    Replace,
    Delete,
    Drop,
    Rename,
    DropDatabase,
    Invalidate,
}

/// A `{db, coll}` pair as it appears inside a change event's own `ns`/`to` fields — a document,
/// unlike [`crate::coll::Namespace`]'s dotted-string wire form used in command bodies.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EventNamespace {
    pub db: String,
    pub coll: Option<String>,
}

/// Identifies which database or collection an event occurred in.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ChangeStreamEventSource {
    Namespace(EventNamespace),
    Database(String),
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn deserializes_an_insert_event() {
        let mut doc = Document::new();
        doc.insert("_id", {
            let mut token = Document::new();
            token.insert("_data", "820102");
            token
        });
        doc.insert("operationType", "insert");
        doc.insert("ns", {
            let mut ns = Document::new();
            ns.insert("db", "test");
            ns.insert("coll", "people");
            ns
        });
        doc.insert("documentKey", {
            let mut key = Document::new();
            key.insert("_id", 1i64);
            key
        });
        doc.insert("fullDocument", {
            let mut full = Document::new();
            full.insert("_id", 1i64);
            full.insert("name", "ada");
            full
        });

        let event: ChangeStreamEvent = crate::bson::from_document(doc).unwrap();
        assert_eq!(event.operation_type, OperationType::Insert);
        assert!(event.update_description.is_none());
        assert_eq!(
            event.full_document.unwrap().get_str("name"),
            Some("ada")
        );
    }

    #[test]
    fn deserializes_an_update_event_without_full_document() {
        let mut doc = Document::new();
        doc.insert("_id", {
            let mut token = Document::new();
            token.insert("_data", "820103");
            token
        });
        doc.insert("operationType", "update");
        doc.insert("documentKey", {
            let mut key = Document::new();
            key.insert("_id", 1i64);
            key
        });
        doc.insert("updateDescription", {
            let mut ud = Document::new();
            ud.insert("updatedFields", {
                let mut f = Document::new();
                f.insert("name", "grace");
                f
            });
            ud.insert("removedFields", Vec::<String>::new());
            ud
        });

        let event: ChangeStreamEvent = crate::bson::from_document(doc).unwrap();
        assert_eq!(event.operation_type, OperationType::Update);
        assert!(event.full_document.is_none());
        assert_eq!(
            event
                .update_description
                .unwrap()
                .updated_fields
                .get_str("name"),
            Some("grace")
        );
    }
}
