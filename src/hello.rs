//! The `hello` (and legacy `isMaster`) handshake command: request construction and the response
//! shape SDAM parses into a [`ServerDescription`](crate::sdam::ServerDescription).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::bson::{DateTime, Document, ObjectId, Timestamp};
use crate::client::ClusterTime;
use crate::options::{ServerAddress, ServerApi};
use crate::sdam::{ServerType, TopologyVersion};
use crate::selection_criteria::TagSet;

/// The legacy name for `hello`, still used when talking to servers predating 5.0.
pub const LEGACY_HELLO_COMMAND_NAME: &str = "isMaster";
pub const LEGACY_HELLO_COMMAND_NAME_LOWERCASE: &str = "ismaster";

#[derive(Debug, Clone, Copy)]
pub struct AwaitableHelloOptions {
    pub topology_version: TopologyVersion,
    pub max_await_time: Duration,
}

/// The command body and name for a hello handshake: `hello` is used whenever an API version is
/// negotiated, the deployment is load-balanced, or the server has already told us it understands
/// `hello`; otherwise the legacy name is used, with `helloOk: true` appended so a server that does
/// understand `hello` can tell us so in its reply.
pub fn hello_command_document(
    server_api: Option<&ServerApi>,
    load_balanced: Option<bool>,
    hello_ok: Option<bool>,
    awaitable_options: Option<AwaitableHelloOptions>,
) -> (Document, &'static str) {
    let (mut body, command_name) = if server_api.is_some()
        || matches!(load_balanced, Some(true))
        || matches!(hello_ok, Some(true))
    {
        let mut doc = Document::new();
        doc.insert("hello", 1);
        (doc, "hello")
    } else {
        let mut doc = Document::new();
        doc.insert(LEGACY_HELLO_COMMAND_NAME, 1);
        if hello_ok.is_none() {
            doc.insert("helloOk", true);
        }
        (doc, LEGACY_HELLO_COMMAND_NAME)
    };

    if let Some(opts) = awaitable_options {
        body.insert(
            "topologyVersion",
            crate::bson::to_document(&opts.topology_version).unwrap_or_default(),
        );
        body.insert(
            "maxAwaitTimeMS",
            opts.max_await_time.as_millis().min(i64::MAX as u128) as i64,
        );
    }

    if let Some(api) = server_api {
        let mut api_doc = Document::new();
        api_doc.insert("version", api.version.as_str());
        if let Some(strict) = api.strict {
            api_doc.insert("strict", strict);
        }
        if let Some(de) = api.deprecation_errors {
            api_doc.insert("deprecationErrors", de);
        }
        body.insert("apiVersion", api_doc.get_str("version").unwrap_or("1"));
        body.insert("apiStrict", api.strict.unwrap_or(false));
        if let Some(de) = api.deprecation_errors {
            body.insert("apiDeprecationErrors", de);
        }
    }

    (body, command_name)
}

/// A parsed `hello` reply, bundled with the address of the server that returned it and the
/// `$clusterTime` gossiped alongside it.
#[derive(Debug, Clone)]
pub struct HelloReply {
    pub server_address: ServerAddress,
    pub command_response: HelloCommandResponse,
    pub cluster_time: Option<ClusterTime>,
}

/// The response to a `hello` (or legacy `isMaster`) command.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct HelloCommandResponse {
    #[serde(rename = "isWritablePrimary")]
    pub is_writable_primary: Option<bool>,

    #[serde(rename = "ismaster")]
    pub is_master: Option<bool>,

    #[serde(rename = "helloOk")]
    pub hello_ok: Option<bool>,

    pub hosts: Option<Vec<String>>,
    pub passives: Option<Vec<String>>,
    pub arbiters: Option<Vec<String>>,
    pub msg: Option<String>,
    pub me: Option<String>,

    #[serde(rename = "setVersion")]
    pub set_version: Option<i32>,
    #[serde(rename = "setName")]
    pub set_name: Option<String>,

    pub hidden: Option<bool>,
    pub secondary: Option<bool>,

    #[serde(rename = "arbiterOnly")]
    pub arbiter_only: Option<bool>,

    #[serde(rename = "isreplicaset")]
    pub is_replica_set: Option<bool>,

    #[serde(rename = "logicalSessionTimeoutMinutes")]
    pub logical_session_timeout_minutes: Option<i64>,

    #[serde(rename = "lastWrite")]
    pub last_write: Option<LastWrite>,

    #[serde(rename = "minWireVersion")]
    pub min_wire_version: Option<i32>,
    #[serde(rename = "maxWireVersion")]
    pub max_wire_version: Option<i32>,

    pub tags: Option<TagSet>,

    #[serde(rename = "electionId")]
    pub election_id: Option<ObjectId>,

    pub primary: Option<String>,

    #[serde(rename = "maxBsonObjectSize")]
    pub max_bson_object_size: i64,

    #[serde(rename = "maxWriteBatchSize")]
    pub max_write_batch_size: Option<i64>,

    #[serde(rename = "serviceId")]
    pub service_id: Option<ObjectId>,

    #[serde(rename = "topologyVersion")]
    pub topology_version: Option<TopologyVersion>,

    #[serde(rename = "maxMessageSizeBytes")]
    pub max_message_size_bytes: i32,

    #[serde(rename = "connectionId")]
    pub connection_id: Option<i64>,
}

impl HelloCommandResponse {
    /// Classifies the server that produced this reply, per the SDAM spec's field-based
    /// disambiguation (mongos `msg`, replica set `setName`, standalone fallback).
    pub fn server_type(&self) -> ServerType {
        if self.msg.as_deref() == Some("isdbgrid") {
            ServerType::Mongos
        } else if self.set_name.is_some() {
            if self.hidden == Some(true) {
                ServerType::RsOther
            } else if self.is_writable_primary == Some(true) || self.is_master == Some(true) {
                ServerType::RsPrimary
            } else if self.secondary == Some(true) {
                ServerType::RsSecondary
            } else if self.arbiter_only == Some(true) {
                ServerType::RsArbiter
            } else {
                ServerType::RsOther
            }
        } else if self.is_replica_set == Some(true) {
            ServerType::RsGhost
        } else {
            ServerType::Standalone
        }
    }

    /// Lowercased host/port strings from `hosts`/`passives`/`arbiters`/`me`, per the original
    /// driver's case-insensitive DNS name comparison when deduplicating a topology's host set.
    pub fn lowercased_hosts(&self) -> Vec<String> {
        self.hosts
            .iter()
            .flatten()
            .chain(self.passives.iter().flatten())
            .chain(self.arbiters.iter().flatten())
            .map(|h| h.to_lowercase())
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct LastWrite {
    #[serde(rename = "lastWriteDate")]
    pub last_write_date: DateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct OpTime {
    pub ts: Timestamp,
    pub t: i32,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn mongos_reply_is_classified_as_mongos() {
        let reply = HelloCommandResponse {
            msg: Some("isdbgrid".into()),
            ..Default::default()
        };
        assert_eq!(reply.server_type(), ServerType::Mongos);
    }

    #[test]
    fn primary_reply_is_classified_as_rs_primary() {
        let reply = HelloCommandResponse {
            set_name: Some("rs0".into()),
            is_writable_primary: Some(true),
            ..Default::default()
        };
        assert_eq!(reply.server_type(), ServerType::RsPrimary);
    }

    #[test]
    fn hosts_are_lowercased() {
        let reply = HelloCommandResponse {
            hosts: Some(vec!["Host-A:27017".into()]),
            ..Default::default()
        };
        assert_eq!(reply.lowercased_hosts(), vec!["host-a:27017".to_string()]);
    }
}
