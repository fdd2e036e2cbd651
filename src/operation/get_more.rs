use crate::cmap::{Command, RawCommandResponse, StreamDescription};
use crate::bson::Document;
use crate::cursor::CursorInformation;
use crate::error::{ErrorKind, Result};
use crate::results::GetMoreResult;
use crate::selection_criteria::SelectionCriteria;

use super::{deserialize_command_response, CursorBody, Operation, Retryability};

/// Fetches the next batch from an already-open cursor. Pinned to the server that opened the
/// cursor — `getMore` is meaningless anywhere else — and, unlike `find`/`aggregate`, not itself
/// retryable (the retryable-reads spec only covers the command that establishes a cursor).
#[derive(Debug)]
pub struct GetMore {
    info: CursorInformation,
    selection_criteria: SelectionCriteria,
}

impl GetMore {
    pub fn new(info: CursorInformation) -> Self {
        let selection_criteria = SelectionCriteria::from_address(info.address.clone());
        Self { info, selection_criteria }
    }
}

impl Operation for GetMore {
    type O = GetMoreResult;
    const NAME: &'static str = "getMore";

    fn build(&mut self, _description: &StreamDescription) -> Result<Command> {
        let mut body = Document::new();
        body.insert(Self::NAME, self.info.id);
        body.insert("collection", self.info.ns.coll.clone());

        if let Some(batch_size) = self.info.batch_size {
            if batch_size > i32::MAX as u32 {
                return Err(ErrorKind::InvalidArgument {
                    message: "the batch size must fit into a signed 32-bit integer".to_string(),
                }
                .into());
            } else if batch_size != 0 {
                body.insert("batchSize", batch_size as i32);
            }
        }

        if let Some(max_time) = self.info.max_time {
            let millis = max_time.as_millis().min(i32::MAX as u128) as i32;
            body.insert("maxTimeMS", millis);
        }

        if let Some(ref comment) = self.info.comment {
            body.insert("comment", comment.clone());
        }

        Ok(Command::new(Self::NAME, self.info.ns.db.clone(), body))
    }

    fn handle_response(&self, raw: RawCommandResponse, _description: &StreamDescription) -> Result<Self::O> {
        let response = deserialize_command_response::<CursorBody>(&raw)?;
        response.body.validate()?;
        let cursor = response.body.cursor;

        Ok(GetMoreResult {
            batch: cursor.batch,
            id: cursor.id,
            ns: cursor.ns,
            at_cluster_time: cursor.at_cluster_time,
            post_batch_resume_token: cursor.post_batch_resume_token,
        })
    }

    fn selection_criteria(&self) -> Option<&SelectionCriteria> {
        Some(&self.selection_criteria)
    }

    fn retryability(&self) -> Retryability {
        Retryability::None
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::coll::Namespace;
    use crate::options::ServerAddress;

    fn info(batch_size: Option<u32>) -> CursorInformation {
        CursorInformation {
            ns: Namespace::new("db", "coll"),
            address: ServerAddress::new("localhost", None),
            id: 123,
            batch_size,
            max_time: None,
            comment: None,
        }
    }

    #[test]
    fn build_includes_cursor_id_and_collection() {
        let mut op = GetMore::new(info(None));
        let description = StreamDescription::default();
        let command = op.build(&description).unwrap();
        assert_eq!(command.body.get_i64("getMore"), Some(123));
        assert_eq!(command.body.get_str("collection"), Some("coll"));
    }

    #[test]
    fn oversized_batch_size_is_rejected() {
        let mut op = GetMore::new(info(Some(u32::MAX)));
        let description = StreamDescription::default();
        assert!(op.build(&description).is_err());
    }

    #[test]
    fn is_not_retryable() {
        let op = GetMore::new(info(None));
        assert_eq!(op.retryability(), Retryability::None);
    }
}
