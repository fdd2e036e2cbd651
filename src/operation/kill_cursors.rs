use crate::bson::Document;
use crate::cmap::{Command, RawCommandResponse, StreamDescription};
use crate::coll::Namespace;
use crate::error::{Error, Result};
use crate::options::ServerAddress;
use crate::selection_criteria::SelectionCriteria;

use super::Operation;

/// Closes one or more open cursors on the server that holds them. Issued fire-and-forget from
/// [`crate::cursor::Cursor`]'s `Drop` impl, so every failure this operation could report is
/// swallowed rather than surfaced (see the "ns not found" Open Question resolution in DESIGN.md).
#[derive(Debug)]
pub struct KillCursors {
    ns: Namespace,
    cursor_ids: Vec<i64>,
    selection_criteria: SelectionCriteria,
}

impl KillCursors {
    pub fn new(ns: Namespace, address: ServerAddress, cursor_ids: Vec<i64>) -> Self {
        Self {
            ns,
            cursor_ids,
            selection_criteria: SelectionCriteria::from_address(address),
        }
    }
}

impl Operation for KillCursors {
    type O = ();
    const NAME: &'static str = "killCursors";

    fn build(&mut self, _description: &StreamDescription) -> Result<Command> {
        let mut body = Document::new();
        body.insert(Self::NAME, self.ns.coll.clone());
        body.insert("cursors", self.cursor_ids.clone());
        Ok(Command::new(Self::NAME, self.ns.db.clone(), body))
    }

    fn handle_response(&self, _raw: RawCommandResponse, _description: &StreamDescription) -> Result<Self::O> {
        Ok(())
    }

    fn handle_error(&self, _error: Error) -> Result<Self::O> {
        Ok(())
    }

    fn selection_criteria(&self) -> Option<&SelectionCriteria> {
        Some(&self.selection_criteria)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn build_lists_the_given_cursor_ids() {
        let mut op = KillCursors::new(
            Namespace::new("db", "coll"),
            ServerAddress::new("localhost", None),
            vec![1, 2, 3],
        );
        let description = StreamDescription::default();
        let command = op.build(&description).unwrap();
        assert_eq!(command.body.get_str("killCursors"), Some("coll"));
        assert!(command.body.contains_key("cursors"));
    }

    #[test]
    fn a_server_error_is_swallowed() {
        let op = KillCursors::new(
            Namespace::new("db", "coll"),
            ServerAddress::new("localhost", None),
            vec![1],
        );
        let err = Error::new(crate::error::ErrorKind::Internal {
            message: "ns not found".to_string(),
        });
        assert!(op.handle_error(err).is_ok());
    }
}
