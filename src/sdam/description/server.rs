//! A description of a single server, built from its most recent `hello` reply or from the error
//! encountered while trying to get one.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::bson::{DateTime, ObjectId};
use crate::client::ClusterTime;
use crate::error::{Error, ErrorKind, Result};
use crate::hello::{HelloCommandResponse, HelloReply};
use crate::options::ServerAddress;
use crate::selection_criteria::TagSet;

const DRIVER_MIN_WIRE_VERSION: i32 = 7;
const DRIVER_MAX_WIRE_VERSION: i32 = 21;

/// The possible types of server the driver can connect to.
#[derive(Debug, Deserialize, Clone, Copy, Eq, PartialEq, Serialize, Default)]
#[non_exhaustive]
pub enum ServerType {
    Standalone,
    Mongos,
    #[serde(rename = "RSPrimary")]
    RsPrimary,
    #[serde(rename = "RSSecondary")]
    RsSecondary,
    /// A non-data-bearing replica set member that can still vote in elections.
    #[serde(rename = "RSArbiter")]
    RsArbiter,
    /// A hidden, starting-up, or recovering replica set member.
    #[serde(rename = "RSOther")]
    RsOther,
    /// A member of an uninitialized replica set, or one removed from the set's config.
    #[serde(rename = "RSGhost")]
    RsGhost,
    LoadBalancer,
    #[serde(alias = "PossiblePrimary")]
    #[default]
    Unknown,
}

impl ServerType {
    pub fn can_auth(self) -> bool {
        !matches!(self, ServerType::RsArbiter)
    }

    pub fn is_data_bearing(self) -> bool {
        matches!(
            self,
            ServerType::Standalone
                | ServerType::RsPrimary
                | ServerType::RsSecondary
                | ServerType::Mongos
                | ServerType::LoadBalancer
        )
    }

    pub fn is_available(self) -> bool {
        !matches!(self, ServerType::Unknown)
    }
}

/// The `topologyVersion` field carried in `hello` replies, used to discard stale monitoring
/// responses that arrive out of order.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq)]
pub struct TopologyVersion {
    #[serde(rename = "processId")]
    pub process_id: ObjectId,
    pub counter: i64,
}

impl TopologyVersion {
    pub fn is_more_recent_than(&self, existing: TopologyVersion) -> bool {
        self.process_id != existing.process_id || self.counter > existing.counter
    }
}

/// The most up-to-date information known about a single server.
#[derive(Debug, Clone)]
pub struct ServerDescription {
    pub address: ServerAddress,
    pub server_type: ServerType,
    pub last_update_time: Option<DateTime>,
    pub average_round_trip_time: Option<Duration>,
    /// Either the most recent `hello` reply, or the error produced instead of one. `Ok(None)`
    /// means this server has not completed its first handshake yet. Storing a `Result` here (as
    /// opposed to separate reply/error fields) makes "reply and error both present" unrepresentable.
    pub reply: Result<Option<HelloReply>>,
}

/// Server-description equality per the SDAM spec: only the fields that affect topology updates or
/// server selection are compared, not the full reply.
fn hello_command_eq(a: &HelloCommandResponse, b: &HelloCommandResponse) -> bool {
    a.server_type() == b.server_type()
        && a.min_wire_version == b.min_wire_version
        && a.max_wire_version == b.max_wire_version
        && a.me == b.me
        && a.hosts == b.hosts
        && a.passives == b.passives
        && a.arbiters == b.arbiters
        && a.tags == b.tags
        && a.set_name == b.set_name
        && a.set_version == b.set_version
        && a.election_id == b.election_id
        && a.primary == b.primary
        && a.logical_session_timeout_minutes == b.logical_session_timeout_minutes
        && a.topology_version == b.topology_version
}

impl PartialEq for ServerDescription {
    fn eq(&self, other: &Self) -> bool {
        if self.address != other.address || self.server_type != other.server_type {
            return false;
        }
        match (self.reply.as_ref(), other.reply.as_ref()) {
            (Ok(a), Ok(b)) => {
                let a = a.as_ref().map(|r| &r.command_response);
                let b = b.as_ref().map(|r| &r.command_response);
                match (a, b) {
                    (Some(a), Some(b)) => hello_command_eq(a, b),
                    (None, None) => true,
                    _ => false,
                }
            }
            (Err(a), Err(b)) => match (a.kind(), b.kind()) {
                (ErrorKind::Command(a), ErrorKind::Command(b)) => a.code == b.code,
                _ => a.to_string() == b.to_string(),
            },
            _ => false,
        }
    }
}

impl ServerDescription {
    pub fn new(address: ServerAddress) -> Self {
        Self {
            address: ServerAddress {
                host: address.host.to_lowercase(),
                port: address.port,
            },
            server_type: ServerType::default(),
            last_update_time: None,
            reply: Ok(None),
            average_round_trip_time: None,
        }
    }

    pub fn new_from_hello_reply(
        address: ServerAddress,
        mut reply: HelloReply,
        average_rtt: Duration,
    ) -> Self {
        let mut description = Self::new(address);
        description.average_round_trip_time = Some(average_rtt);
        description.last_update_time = Some(DateTime::now());
        description.server_type = reply.command_response.server_type();

        if let Some(ref mut hosts) = reply.command_response.hosts {
            for h in hosts.iter_mut() {
                *h = h.to_lowercase();
            }
        }
        if let Some(ref mut passives) = reply.command_response.passives {
            for h in passives.iter_mut() {
                *h = h.to_lowercase();
            }
        }
        if let Some(ref mut arbiters) = reply.command_response.arbiters {
            for h in arbiters.iter_mut() {
                *h = h.to_lowercase();
            }
        }
        if let Some(ref mut me) = reply.command_response.me {
            *me = me.to_lowercase();
        }

        description.reply = Ok(Some(reply));
        description
    }

    pub fn new_from_error(address: ServerAddress, error: Error) -> Self {
        let mut description = Self::new(address);
        description.last_update_time = Some(DateTime::now());
        description.reply = Err(error);
        description
    }

    pub fn is_available(&self) -> bool {
        self.server_type.is_available()
    }

    pub fn compatibility_error_message(&self) -> Option<String> {
        let Ok(Some(ref reply)) = self.reply else {
            return None;
        };
        let min_wv = reply.command_response.min_wire_version.unwrap_or(0);
        if min_wv > DRIVER_MAX_WIRE_VERSION {
            return Some(format!(
                "server at {} requires wire version {}, but this driver only supports up to {}",
                self.address, min_wv, DRIVER_MAX_WIRE_VERSION
            ));
        }
        let max_wv = reply.command_response.max_wire_version.unwrap_or(0);
        if max_wv < DRIVER_MIN_WIRE_VERSION {
            return Some(format!(
                "server at {} reports wire version {}, but this driver requires at least {}",
                self.address, max_wv, DRIVER_MIN_WIRE_VERSION
            ));
        }
        None
    }

    pub fn set_name(&self) -> Result<Option<String>> {
        Ok(self
            .reply
            .as_ref()
            .map_err(Clone::clone)?
            .as_ref()
            .and_then(|r| r.command_response.set_name.clone()))
    }

    pub fn known_hosts(&self) -> Result<Vec<ServerAddress>> {
        let reply = self.reply.as_ref().map_err(Clone::clone)?;
        let Some(reply) = reply.as_ref() else {
            return Ok(Vec::new());
        };
        let hosts = reply.command_response.hosts.iter().flatten();
        let passives = reply.command_response.passives.iter().flatten();
        let arbiters = reply.command_response.arbiters.iter().flatten();
        hosts
            .chain(passives)
            .chain(arbiters)
            .map(|h| h.parse::<ServerAddress>())
            .collect()
    }

    pub fn invalid_me(&self) -> Result<bool> {
        if let Some(ref reply) = self.reply.as_ref().map_err(Clone::clone)? {
            if let Some(ref me) = reply.command_response.me {
                return Ok(&self.address.to_string() != me);
            }
        }
        Ok(false)
    }

    pub fn set_version(&self) -> Result<Option<i32>> {
        Ok(self
            .reply
            .as_ref()
            .map_err(Clone::clone)?
            .as_ref()
            .and_then(|r| r.command_response.set_version))
    }

    pub fn election_id(&self) -> Result<Option<ObjectId>> {
        Ok(self
            .reply
            .as_ref()
            .map_err(Clone::clone)?
            .as_ref()
            .and_then(|r| r.command_response.election_id))
    }

    pub fn max_wire_version(&self) -> Result<Option<i32>> {
        Ok(self
            .reply
            .as_ref()
            .map_err(Clone::clone)?
            .as_ref()
            .and_then(|r| r.command_response.max_wire_version))
    }

    pub fn last_write_date(&self) -> Result<Option<DateTime>> {
        match self.reply {
            Ok(None) => Ok(None),
            Ok(Some(ref reply)) => Ok(reply
                .command_response
                .last_write
                .as_ref()
                .map(|w| w.last_write_date)),
            Err(ref e) => Err(e.clone()),
        }
    }

    pub fn logical_session_timeout(&self) -> Result<Option<Duration>> {
        match self.reply {
            Ok(None) => Ok(None),
            Ok(Some(ref reply)) => Ok(reply
                .command_response
                .logical_session_timeout_minutes
                .map(|m| Duration::from_secs(m as u64 * 60))),
            Err(ref e) => Err(e.clone()),
        }
    }

    pub fn cluster_time(&self) -> Result<Option<ClusterTime>> {
        match self.reply {
            Ok(None) => Ok(None),
            Ok(Some(ref reply)) => Ok(reply.cluster_time.clone()),
            Err(ref e) => Err(e.clone()),
        }
    }

    pub fn topology_version(&self) -> Option<TopologyVersion> {
        match self.reply {
            Ok(None) => None,
            Ok(Some(ref reply)) => reply.command_response.topology_version,
            Err(ref e) => e.topology_version(),
        }
    }

    pub fn matches_tag_set(&self, tag_set: &TagSet) -> bool {
        let Ok(Some(ref reply)) = self.reply else {
            return false;
        };
        let Some(ref server_tags) = reply.command_response.tags else {
            return false;
        };
        tag_set.iter().all(|(k, v)| server_tags.get(k) == Some(v))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn new_server_description_lowercases_address() {
        let sd = ServerDescription::new(ServerAddress::new("HOST", Some(27017)));
        assert_eq!(sd.address.host, "host");
    }

    #[test]
    fn topology_version_orders_by_counter_within_same_process() {
        let pid = ObjectId::new();
        let a = TopologyVersion {
            process_id: pid,
            counter: 1,
        };
        let b = TopologyVersion {
            process_id: pid,
            counter: 2,
        };
        assert!(b.is_more_recent_than(a));
        assert!(!a.is_more_recent_than(b));
    }

    #[test]
    fn topology_version_from_different_process_is_always_more_recent() {
        let a = TopologyVersion {
            process_id: ObjectId::new(),
            counter: 5,
        };
        let b = TopologyVersion {
            process_id: ObjectId::new(),
            counter: 1,
        };
        assert!(b.is_more_recent_than(a));
    }
}
