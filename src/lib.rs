//! Core driver subsystem for building, routing, and executing MongoDB wire-protocol operations:
//! the BSON document model, server discovery and monitoring (SDAM), server selection, cursor
//! iteration, retryable command execution, and change streams. No connection-pool-facing
//! collection/database convenience layer: callers build an [`operation`] directly and run it
//! through [`Client::execute_operation`](Client::execute_operation).
#![warn(missing_docs)]
#![warn(clippy::cast_possible_truncation)]
#![warn(clippy::cast_possible_wrap)]

pub mod bson;
pub mod change_stream;
mod client;
mod cmap;
mod coll;
mod concern;
mod cursor;
pub mod error;
mod hello;
pub mod operation;
pub mod options;
pub mod results;
mod sdam;
mod selection_criteria;
mod serde_util;

pub use crate::change_stream::{event::ChangeStreamEvent, ChangeStream, ChangeStreamTarget};
pub use crate::client::{session::ClientSession, Client};
pub use crate::coll::Namespace;
pub use crate::concern::{Acknowledgment, ReadConcern, ReadConcernLevel, WriteConcern};
pub use crate::cursor::Cursor;
pub use crate::sdam::{Server, ServerDescription, ServerInfo, ServerType, TopologyDescription};
pub use crate::selection_criteria::{Predicate, ReadPreference, SelectionCriteria};
