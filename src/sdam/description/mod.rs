//! Server and topology descriptions: the data SDAM builds up from `hello` replies and that server
//! selection reads back down from.

pub mod server;
pub mod topology;

pub use server::{ServerDescription, ServerType, TopologyVersion};
pub use topology::{
    verify_max_staleness, TopologyDescription, TopologyDescriptionDiff, TopologyType,
    TransactionSupportStatus, IDLE_WRITE_PERIOD,
};
