use typed_builder::TypedBuilder;

use crate::bson::Document;
use crate::cmap::{Command, RawCommandResponse, StreamDescription};
use crate::coll::Namespace;
use crate::concern::WriteConcern;
use crate::error::Result;
use crate::results::DeleteResult;

use super::{append_options, deserialize_command_response, Operation, OperationType, Retryability, WriteResponseBody};

#[derive(Debug, Default, Clone, TypedBuilder, serde::Serialize)]
#[builder(field_defaults(default, setter(into, strip_option)))]
#[serde(rename_all = "camelCase")]
pub struct DeleteOptions {
    pub collation: Option<Document>,
    pub hint: Option<Document>,

    #[serde(skip)]
    pub write_concern: Option<WriteConcern>,
}

/// A `delete` command. `limit` of `0` removes every matching document; `1` removes at most one.
#[derive(Debug)]
pub struct Delete {
    ns: Namespace,
    filter: Document,
    limit: u32,
    options: Option<DeleteOptions>,
}

impl Delete {
    pub fn new(ns: Namespace, filter: Document, limit: u32, options: Option<DeleteOptions>) -> Self {
        Self { ns, filter, limit, options }
    }
}

impl Operation for Delete {
    type O = DeleteResult;
    const NAME: &'static str = "delete";

    fn build(&mut self, _description: &StreamDescription) -> Result<Command> {
        let mut body = Document::new();
        body.insert(Self::NAME, self.ns.coll.clone());

        let mut delete_statement = Document::new();
        delete_statement.insert("q", self.filter.clone());
        delete_statement.insert("limit", self.limit as i32);

        body.insert(
            "deletes",
            vec![crate::bson::Bson::Document(delete_statement)],
        );

        append_options(&mut body, self.options.as_ref())?;

        Ok(Command::new(Self::NAME, self.ns.db.clone(), body))
    }

    fn handle_response(&self, raw: RawCommandResponse, _description: &StreamDescription) -> Result<Self::O> {
        let response = deserialize_command_response::<WriteResponseBody>(&raw)?;
        response.body.validate()?;

        Ok(DeleteResult {
            deleted_count: response.body.n(),
        })
    }

    fn write_concern(&self) -> Option<&WriteConcern> {
        self.options.as_ref().and_then(|opts| opts.write_concern.as_ref())
    }

    fn retryability(&self) -> Retryability {
        if self.limit == 0 {
            Retryability::None
        } else {
            Retryability::Write
        }
    }

    fn operation_type(&self) -> OperationType {
        OperationType::Write
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn unbounded_delete_is_not_retryable() {
        let ns = Namespace::new("db", "coll");
        let op = Delete::new(ns, Document::new(), 0, None);
        assert_eq!(op.retryability(), Retryability::None);
    }

    #[test]
    fn single_delete_is_retryable() {
        let ns = Namespace::new("db", "coll");
        let op = Delete::new(ns, Document::new(), 1, None);
        assert_eq!(op.retryability(), Retryability::Write);
    }

    #[test]
    fn build_sets_limit() {
        let ns = Namespace::new("db", "coll");
        let mut op = Delete::new(ns, Document::new(), 1, None);
        let description = StreamDescription::default();
        let command = op.build(&description).unwrap();
        let deletes = command.body.get_array("deletes").unwrap();
        let first = deletes[0].as_document().unwrap();
        assert_eq!(first.get_i64("limit"), Some(1));
    }
}
