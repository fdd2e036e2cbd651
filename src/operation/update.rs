use serde::Deserialize;
use typed_builder::TypedBuilder;

use crate::bson::Document;
use crate::cmap::{Command, RawCommandResponse, StreamDescription};
use crate::coll::Namespace;
use crate::concern::WriteConcern;
use crate::error::Result;
use crate::results::UpdateResult;

use super::{deserialize_command_response, Operation, OperationType, Retryability, WriteResponseBody};

#[derive(Debug, Default, Clone, TypedBuilder)]
#[builder(field_defaults(default, setter(into, strip_option)))]
pub struct UpdateOptions {
    pub upsert: Option<bool>,
    pub array_filters: Option<Vec<Document>>,
    pub hint: Option<Document>,
    pub bypass_document_validation: Option<bool>,
    pub write_concern: Option<WriteConcern>,
}

/// An `update`/`updateMany` command. Always sends a single update statement in its `updates`
/// array — this crate doesn't batch several distinct update filters into one command.
#[derive(Debug)]
pub struct Update {
    ns: Namespace,
    filter: Document,
    update: Document,
    multi: bool,
    options: Option<UpdateOptions>,
}

impl Update {
    pub fn new(ns: Namespace, filter: Document, update: Document, multi: bool, options: Option<UpdateOptions>) -> Self {
        Self { ns, filter, update, multi, options }
    }
}

impl Operation for Update {
    type O = UpdateResult;
    const NAME: &'static str = "update";

    fn build(&mut self, _description: &StreamDescription) -> Result<Command> {
        let mut body = Document::new();
        body.insert(Self::NAME, self.ns.coll.clone());

        let mut update_statement = Document::new();
        update_statement.insert("q", self.filter.clone());
        update_statement.insert("u", self.update.clone());

        if self.multi {
            update_statement.insert("multi", true);
        }

        if let Some(ref options) = self.options {
            if let Some(upsert) = options.upsert {
                update_statement.insert("upsert", upsert);
            }
            if let Some(ref array_filters) = options.array_filters {
                update_statement.insert(
                    "arrayFilters",
                    array_filters
                        .iter()
                        .cloned()
                        .map(crate::bson::Bson::Document)
                        .collect::<Vec<_>>(),
                );
            }
            if let Some(ref hint) = options.hint {
                update_statement.insert("hint", hint.clone());
            }
            if let Some(bypass) = options.bypass_document_validation {
                body.insert("bypassDocumentValidation", bypass);
            }
        }

        body.insert(
            "updates",
            vec![crate::bson::Bson::Document(update_statement)],
        );

        Ok(Command::new(Self::NAME, self.ns.db.clone(), body))
    }

    fn handle_response(&self, raw: RawCommandResponse, _description: &StreamDescription) -> Result<Self::O> {
        let response = deserialize_command_response::<WriteResponseBody<UpdateBody>>(&raw)?;
        response.body.validate()?;

        let upserted_id = response
            .body
            .upserted
            .as_ref()
            .and_then(|v| v.first())
            .and_then(|doc| doc.get("_id"))
            .cloned();

        Ok(UpdateResult {
            matched_count: response.body.n(),
            modified_count: response.body.n_modified,
            upserted_id,
        })
    }

    fn write_concern(&self) -> Option<&WriteConcern> {
        self.options.as_ref().and_then(|opts| opts.write_concern.as_ref())
    }

    fn retryability(&self) -> Retryability {
        if self.multi {
            Retryability::None
        } else {
            Retryability::Write
        }
    }

    fn operation_type(&self) -> OperationType {
        OperationType::Write
    }
}

#[derive(Debug, Deserialize)]
struct UpdateBody {
    #[serde(rename = "nModified")]
    n_modified: u64,
    upserted: Option<Vec<Document>>,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn multi_update_is_not_retryable() {
        let ns = Namespace::new("db", "coll");
        let op = Update::new(ns, Document::new(), Document::new(), true, None);
        assert_eq!(op.retryability(), Retryability::None);
    }

    #[test]
    fn build_sets_multi_flag() {
        let ns = Namespace::new("db", "coll");
        let mut op = Update::new(ns, Document::new(), Document::new(), true, None);
        let description = StreamDescription::default();
        let command = op.build(&description).unwrap();
        let updates = command.body.get_array("updates").unwrap();
        let first = updates[0].as_document().unwrap();
        assert_eq!(first.get_bool("multi"), Some(true));
    }
}
