use crate::bson::Document;
use crate::cmap::{Command, RawCommandResponse, StreamDescription};
use crate::error::{ErrorKind, Result};
use crate::selection_criteria::SelectionCriteria;

use super::{deserialize_command_response, Operation};

/// Runs an arbitrary command document against a database, passing the reply back untouched.
/// The command's name is taken as the first key in the document, per the wire protocol's own
/// convention of reading the command name off the first field.
#[derive(Debug)]
pub struct RunCommand {
    db: String,
    command: Document,
    selection_criteria: Option<SelectionCriteria>,
}

impl RunCommand {
    pub fn new(db: String, command: Document, selection_criteria: Option<SelectionCriteria>) -> Result<Self> {
        if command.keys().next().is_none() {
            return Err(ErrorKind::InvalidArgument {
                message: "an empty document cannot be passed to run_command".to_string(),
            }
            .into());
        }
        Ok(Self { db, command, selection_criteria })
    }
}

impl Operation for RunCommand {
    type O = Document;

    // Can't name a specific command statically here; this should fail loudly if it's ever
    // mistakenly sent as a literal command name.
    const NAME: &'static str = "$genericRunCommand";

    fn build(&mut self, _description: &StreamDescription) -> Result<Command> {
        let command_name = self
            .command
            .keys()
            .next()
            .cloned()
            .ok_or_else(|| ErrorKind::InvalidArgument {
                message: "an empty document cannot be passed to run_command".to_string(),
            })?;

        Ok(Command::new(command_name, self.db.clone(), self.command.clone()))
    }

    fn handle_response(&self, raw: RawCommandResponse, _description: &StreamDescription) -> Result<Self::O> {
        let response = deserialize_command_response::<Document>(&raw)?;
        Ok(response.body)
    }

    fn selection_criteria(&self) -> Option<&SelectionCriteria> {
        self.selection_criteria.as_ref()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn empty_command_is_rejected() {
        let result = RunCommand::new("db".to_string(), Document::new(), None);
        assert!(result.is_err());
    }

    #[test]
    fn command_name_is_read_from_first_key() {
        let mut command = Document::new();
        command.insert("ping", 1);
        let mut op = RunCommand::new("admin".to_string(), command, None).unwrap();
        let description = StreamDescription::default();
        let built = op.build(&description).unwrap();
        assert_eq!(built.name, "ping");
    }
}
