use serde::Deserialize;
use typed_builder::TypedBuilder;

use crate::bson::{Bson, Document};
use crate::cmap::{Command, RawCommandResponse, StreamDescription};
use crate::coll::Namespace;
use crate::concern::WriteConcern;
use crate::error::{ErrorKind, Result};

use super::{append_options, deserialize_command_response, Operation, OperationType, Retryability};

/// What a `findAndModify` does to the document it matches.
#[derive(Debug, Clone)]
pub enum Modification {
    Delete,
    Replace(Document),
    Update(Document),
}

#[derive(Debug, Default, Clone, TypedBuilder, serde::Serialize)]
#[builder(field_defaults(default, setter(into, strip_option)))]
#[serde(rename_all = "camelCase")]
pub struct FindAndModifyOptions {
    pub sort: Option<Document>,
    pub new: Option<bool>,
    pub upsert: Option<bool>,
    pub projection: Option<Document>,
    pub bypass_document_validation: Option<bool>,

    #[serde(skip)]
    pub write_concern: Option<WriteConcern>,
}

/// A `findAndModify` command: atomically finds a document and deletes, replaces, or updates it,
/// returning either the matched document or (with `new: true`) the document after modification.
#[derive(Debug)]
pub struct FindAndModify {
    ns: Namespace,
    query: Document,
    modification: Modification,
    options: Option<FindAndModifyOptions>,
}

impl FindAndModify {
    pub fn new(ns: Namespace, query: Document, modification: Modification, options: Option<FindAndModifyOptions>) -> Self {
        Self { ns, query, modification, options }
    }
}

impl Operation for FindAndModify {
    type O = Option<Document>;
    const NAME: &'static str = "findAndModify";

    fn build(&mut self, _description: &StreamDescription) -> Result<Command> {
        let mut body = Document::new();
        body.insert(Self::NAME, self.ns.coll.clone());
        body.insert("query", self.query.clone());

        match &self.modification {
            Modification::Delete => {
                body.insert("remove", true);
            }
            Modification::Replace(replacement) => {
                body.insert("update", replacement.clone());
            }
            Modification::Update(update) => {
                body.insert("update", update.clone());
            }
        }

        append_options(&mut body, self.options.as_ref())?;

        Ok(Command::new(Self::NAME, self.ns.db.clone(), body))
    }

    fn handle_response(&self, raw: RawCommandResponse, _description: &StreamDescription) -> Result<Self::O> {
        let response = deserialize_command_response::<ResponseBody>(&raw)?;
        match response.body.value {
            Bson::Document(doc) => Ok(Some(doc)),
            Bson::Null => Ok(None),
            other => Err(ErrorKind::InvalidResponse {
                message: format!(
                    "expected a document for findAndModify's \"value\" field, got {:?}",
                    other
                ),
            }
            .into()),
        }
    }

    fn write_concern(&self) -> Option<&WriteConcern> {
        self.options.as_ref().and_then(|opts| opts.write_concern.as_ref())
    }

    fn retryability(&self) -> Retryability {
        Retryability::Write
    }

    fn operation_type(&self) -> OperationType {
        OperationType::Write
    }
}

#[derive(Debug, Deserialize)]
struct ResponseBody {
    value: Bson,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn delete_sets_remove_flag() {
        let ns = Namespace::new("db", "coll");
        let mut op = FindAndModify::new(ns, Document::new(), Modification::Delete, None);
        let description = StreamDescription::default();
        let command = op.build(&description).unwrap();
        assert_eq!(command.body.get_bool("remove"), Some(true));
    }

    #[test]
    fn update_sets_update_document() {
        let ns = Namespace::new("db", "coll");
        let mut update = Document::new();
        update.insert("$set", {
            let mut inner = Document::new();
            inner.insert("x", 1);
            inner
        });
        let mut op = FindAndModify::new(ns, Document::new(), Modification::Update(update), None);
        let description = StreamDescription::default();
        let command = op.build(&description).unwrap();
        assert!(command.body.contains_key("update"));
    }
}
