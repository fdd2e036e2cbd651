//! Client-level configuration: the seed list, topology-shaping knobs, and the default concerns
//! and selection criteria new operations inherit when they don't specify their own.

use std::time::Duration;

use typed_builder::TypedBuilder;

use crate::concern::{ReadConcern, WriteConcern};
use crate::error::{Error, ErrorKind, Result};
use crate::selection_criteria::SelectionCriteria;

/// The default port a bare hostname is assumed to listen on.
pub const DEFAULT_PORT: u16 = 27017;

/// A single seed address. URI string parsing is out of scope for this crate (an external
/// collaborator's responsibility per the spec); callers construct addresses programmatically.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerAddress {
    pub host: String,
    pub port: Option<u16>,
}

impl ServerAddress {
    pub fn new(host: impl Into<String>, port: Option<u16>) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_PORT)
    }
}

impl std::fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port())
    }
}

impl std::str::FromStr for ServerAddress {
    type Err = Error;

    /// Parses a bare `host` or `host:port` pair. This is not URI parsing (no scheme, no options,
    /// no credentials) — just the shorthand used to build a seed list by hand or from a test
    /// fixture.
    fn from_str(s: &str) -> Result<Self> {
        match s.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|_| {
                    Error::new(ErrorKind::InvalidArgument {
                        message: format!("invalid port in server address {s:?}"),
                    })
                })?;
                Ok(ServerAddress::new(host, Some(port)))
            }
            None => Ok(ServerAddress::new(s, None)),
        }
    }
}

/// Version of the server API a client opts into, per the versioned-API spec's `apiVersion`/
/// `strict`/`deprecationErrors` triple.
#[derive(Debug, Clone, PartialEq, Eq, TypedBuilder)]
pub struct ServerApi {
    pub version: ServerApiVersion,
    #[builder(default, setter(strip_option))]
    pub strict: Option<bool>,
    #[builder(default, setter(strip_option))]
    pub deprecation_errors: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerApiVersion {
    V1,
}

impl ServerApiVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerApiVersion::V1 => "1",
        }
    }
}

/// Client-level configuration needed to construct a topology and dispatch operations against it.
/// Narrower than a full driver's `ClientOptions`: no auth, no TLS, no compressors, no SRV/URI
/// options, no event handler registration — those subsystems are out of scope for this crate.
#[derive(Debug, Clone, TypedBuilder)]
pub struct ClientOptions {
    /// The initial seed list; SDAM discovers the rest of the topology from these.
    pub hosts: Vec<ServerAddress>,

    #[builder(default, setter(strip_option))]
    pub replica_set_name: Option<String>,

    #[builder(default = Duration::from_secs(30))]
    pub server_selection_timeout: Duration,

    #[builder(default = Duration::from_millis(15))]
    pub local_threshold: Duration,

    #[builder(default = Duration::from_secs(10))]
    pub heartbeat_freq: Duration,

    #[builder(default = false)]
    pub direct_connection: bool,

    #[builder(default = false)]
    pub load_balanced: bool,

    #[builder(default, setter(strip_option))]
    pub srv_max_hosts: Option<u32>,

    #[builder(default = true)]
    pub retry_reads: bool,

    #[builder(default = true)]
    pub retry_writes: bool,

    #[builder(default, setter(strip_option))]
    pub read_concern: Option<ReadConcern>,

    #[builder(default, setter(strip_option))]
    pub write_concern: Option<WriteConcern>,

    #[builder(default, setter(strip_option))]
    pub selection_criteria: Option<SelectionCriteria>,

    #[builder(default, setter(strip_option))]
    pub server_api: Option<ServerApi>,
}

impl ClientOptions {
    /// `direct_connection` and more than one seed host are mutually exclusive: a direct connection
    /// names exactly one server and never runs topology discovery against the rest.
    pub fn validate(&self) -> Result<()> {
        if self.direct_connection && self.hosts.len() > 1 {
            return Err(Error::new(ErrorKind::InvalidArgument {
                message: "direct_connection requires exactly one host".into(),
            }));
        }
        if self.load_balanced && self.replica_set_name.is_some() {
            return Err(Error::new(ErrorKind::InvalidArgument {
                message: "load_balanced is incompatible with replica_set_name".into(),
            }));
        }
        if self.hosts.is_empty() {
            return Err(Error::new(ErrorKind::InvalidArgument {
                message: "at least one host is required".into(),
            }));
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_host_and_port() {
        let addr: ServerAddress = "localhost:27018".parse().unwrap();
        assert_eq!(addr.host, "localhost");
        assert_eq!(addr.port(), 27018);
    }

    #[test]
    fn bare_host_defaults_to_standard_port() {
        let addr: ServerAddress = "localhost".parse().unwrap();
        assert_eq!(addr.port(), DEFAULT_PORT);
    }

    #[test]
    fn direct_connection_rejects_multiple_hosts() {
        let opts = ClientOptions::builder()
            .hosts(vec![
                ServerAddress::new("a", None),
                ServerAddress::new("b", None),
            ])
            .direct_connection(true)
            .build();
        assert!(opts.validate().is_err());
    }
}
