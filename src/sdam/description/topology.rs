//! A description of an entire topology: its type, the replica set state tracked for acceptance
//! ordering, and the per-address [`ServerDescription`]s it's built from. Also implements server
//! selection (the suitable-servers filter pipeline and latency-window pick) directly on
//! [`TopologyDescription`], since selection is purely a function of the current description.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::server::{ServerDescription, ServerType};
use crate::bson::ObjectId;
use crate::client::ClusterTime;
use crate::cmap::Command;
use crate::error::{Error, ErrorKind, Result};
use crate::operation::OperationType;
use crate::options::{ClientOptions, ServerAddress};
use crate::sdam::{choose_n, Server, ServerInfo, DEFAULT_HEARTBEAT_FREQUENCY};
use crate::selection_criteria::{ReadPreference, SelectionCriteria, TagSet};

const DEFAULT_LOCAL_THRESHOLD: Duration = Duration::from_millis(15);
pub const IDLE_WRITE_PERIOD: Duration = Duration::from_secs(10);

/// Wire version introduced in MongoDB 6.0 at which primary-acceptance tie-breaking in
/// [`TopologyDescription::update_rs_from_primary_server`] switches from setVersion-first to
/// electionId-first lexicographic ordering.
const ELECTION_ID_FIRST_WIRE_VERSION: i32 = 17;

/// Wire version (MongoDB 5.0) at or above which a secondary can serve the read half of an
/// aggregate pipeline ending in `$out`/`$merge`. Below it, [`TopologyDescription::suitable_servers_in_latency_window`]'s
/// override rule forces such an operation to the primary, since an older secondary can't be
/// trusted to hand off the write half correctly.
const SECONDARY_AGGREGATE_WRITE_WIRE_VERSION: i32 = 13;

/// The possible types for a topology.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Deserialize, Serialize, Default)]
#[non_exhaustive]
pub enum TopologyType {
    Single,
    ReplicaSetNoPrimary,
    ReplicaSetWithPrimary,
    Sharded,
    LoadBalanced,
    #[default]
    Unknown,
}

impl fmt::Display for TopologyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TopologyType::Single => "Single",
            TopologyType::ReplicaSetNoPrimary => "ReplicaSetNoPrimary",
            TopologyType::ReplicaSetWithPrimary => "ReplicaSetWithPrimary",
            TopologyType::Sharded => "Sharded",
            TopologyType::LoadBalanced => "LoadBalanced",
            TopologyType::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

/// Whether a topology supports transactions, per its session-timeout and wire-version state.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum TransactionSupportStatus {
    #[default]
    Undetermined,
    Unsupported,
    Supported,
}

/// The most up-to-date information known about an entire topology.
#[derive(Debug, Clone)]
pub struct TopologyDescription {
    pub(crate) single_seed: bool,
    pub topology_type: TopologyType,
    pub set_name: Option<String>,
    pub max_set_version: Option<i32>,
    pub max_election_id: Option<ObjectId>,
    pub compatibility_error: Option<String>,
    pub logical_session_timeout: Option<Duration>,
    pub transaction_support_status: TransactionSupportStatus,
    pub cluster_time: Option<ClusterTime>,
    pub local_threshold: Option<Duration>,
    pub heartbeat_freq: Option<Duration>,
    pub servers: HashMap<ServerAddress, ServerDescription>,
    pub srv_max_hosts: Option<u32>,
}

impl PartialEq for TopologyDescription {
    fn eq(&self, other: &Self) -> bool {
        // Only the fields the selection algorithm consults matter for "did anything change that
        // would wake up a pending selection".
        self.compatibility_error == other.compatibility_error
            && self.servers == other.servers
            && self.topology_type == other.topology_type
    }
}

impl Default for TopologyDescription {
    fn default() -> Self {
        Self {
            single_seed: false,
            topology_type: TopologyType::Unknown,
            set_name: None,
            max_set_version: None,
            max_election_id: None,
            compatibility_error: None,
            logical_session_timeout: None,
            transaction_support_status: TransactionSupportStatus::Undetermined,
            cluster_time: None,
            local_threshold: None,
            heartbeat_freq: None,
            servers: HashMap::new(),
            srv_max_hosts: None,
        }
    }
}

impl TopologyDescription {
    pub fn initialize(&mut self, options: &ClientOptions) {
        debug_assert!(
            self.servers.is_empty() && self.topology_type == TopologyType::Unknown,
            "new TopologyDescriptions should start empty"
        );

        self.topology_type = if options.direct_connection {
            TopologyType::Single
        } else if options.replica_set_name.is_some() {
            TopologyType::ReplicaSetNoPrimary
        } else if options.load_balanced {
            TopologyType::LoadBalanced
        } else {
            TopologyType::Unknown
        };

        self.transaction_support_status = if self.topology_type == TopologyType::LoadBalanced {
            TransactionSupportStatus::Supported
        } else {
            TransactionSupportStatus::Undetermined
        };

        for address in options.hosts.iter() {
            self.servers
                .insert(address.clone(), ServerDescription::new(address.clone()));
        }

        self.single_seed = self.servers.len() == 1;
        self.set_name = options.replica_set_name.clone();
        self.local_threshold = Some(options.local_threshold);
        self.heartbeat_freq = Some(options.heartbeat_freq);
        self.srv_max_hosts = options.srv_max_hosts;
    }

    pub fn topology_type(&self) -> TopologyType {
        self.topology_type
    }

    pub fn server_addresses(&self) -> impl Iterator<Item = &ServerAddress> {
        self.servers.keys()
    }

    pub fn cluster_time(&self) -> Option<&ClusterTime> {
        self.cluster_time.as_ref()
    }

    pub fn get_server_description(&self, address: &ServerAddress) -> Option<&ServerDescription> {
        self.servers.get(address)
    }

    pub fn has_available_servers(&self) -> bool {
        self.servers.values().any(|s| s.is_available())
    }

    pub fn compatibility_error(&self) -> Option<&String> {
        self.compatibility_error.as_ref()
    }

    pub fn transaction_support_status(&self) -> TransactionSupportStatus {
        self.transaction_support_status
    }

    /// Attaches `$readPreference` to a command when the topology/server combination requires it:
    /// mongos and load-balanced deployments always need an explicit hint (the server doesn't know
    /// the topology shape on its own), while replica sets only need one when it isn't the implicit
    /// default (primary with no criteria).
    pub fn update_command_with_read_pref(
        &self,
        address: &ServerAddress,
        command: &mut Command,
        criteria: Option<&SelectionCriteria>,
    ) {
        let server_type = self
            .get_server_description(address)
            .map(|sd| sd.server_type)
            .unwrap_or(ServerType::Unknown);

        match (self.topology_type, server_type) {
            (TopologyType::Sharded, ServerType::Mongos)
            | (TopologyType::Single, ServerType::Mongos)
            | (TopologyType::LoadBalanced, _) => {
                self.update_command_read_pref_for_mongos(command, criteria)
            }
            (TopologyType::Single, ServerType::Standalone) => {}
            (TopologyType::Single, _) => {
                let specified = criteria.and_then(SelectionCriteria::as_read_pref).cloned();
                let resolved = match specified {
                    Some(ReadPreference::Primary) | None => ReadPreference::PrimaryPreferred {
                        tag_sets: None,
                        max_staleness: None,
                    },
                    Some(other) => other,
                };
                if resolved != ReadPreference::Primary {
                    command.set_read_preference(resolved);
                }
            }
            _ => {
                let read_pref = match criteria {
                    Some(SelectionCriteria::ReadPreference(rp)) => rp.clone(),
                    Some(SelectionCriteria::Predicate(_)) => ReadPreference::PrimaryPreferred {
                        tag_sets: None,
                        max_staleness: None,
                    },
                    None => ReadPreference::Primary,
                };
                if read_pref != ReadPreference::Primary {
                    command.set_read_preference(read_pref);
                }
            }
        }
    }

    fn update_command_read_pref_for_mongos(
        &self,
        command: &mut Command,
        criteria: Option<&SelectionCriteria>,
    ) {
        let Some(SelectionCriteria::ReadPreference(read_pref)) = criteria else {
            return;
        };
        match read_pref {
            ReadPreference::Secondary { .. }
            | ReadPreference::PrimaryPreferred { .. }
            | ReadPreference::Nearest { .. }
            | ReadPreference::SecondaryPreferred { .. } => {
                command.set_read_preference(read_pref.clone())
            }
            ReadPreference::Primary => {}
        }
    }

    fn heartbeat_frequency(&self) -> Duration {
        self.heartbeat_freq.unwrap_or(DEFAULT_HEARTBEAT_FREQUENCY)
    }

    fn check_compatibility(&mut self) {
        self.compatibility_error = None;
        for server in self.servers.values() {
            if let Some(msg) = server.compatibility_error_message() {
                self.compatibility_error = Some(msg);
                return;
            }
        }
    }

    fn update_logical_session_timeout(&mut self, sd: &ServerDescription) {
        if !sd.server_type.is_data_bearing() {
            return;
        }
        match sd.logical_session_timeout().ok().flatten() {
            Some(new_timeout) => match self.logical_session_timeout {
                Some(current) => {
                    self.logical_session_timeout = Some(std::cmp::min(current, new_timeout));
                }
                None => {
                    self.logical_session_timeout = self
                        .servers
                        .values()
                        .filter(|s| s.server_type.is_data_bearing())
                        .filter_map(|s| s.logical_session_timeout().ok().flatten())
                        .min();
                }
            },
            None => self.logical_session_timeout = None,
        }
    }

    fn update_transaction_support_status(&mut self, sd: &ServerDescription) {
        if self.logical_session_timeout.is_none() {
            self.transaction_support_status = TransactionSupportStatus::Unsupported;
        }
        if let Ok(Some(max_wire_version)) = sd.max_wire_version() {
            self.transaction_support_status = if max_wire_version < 7
                || (max_wire_version < 8 && self.topology_type == TopologyType::Sharded)
            {
                TransactionSupportStatus::Unsupported
            } else {
                TransactionSupportStatus::Supported
            };
        }
    }

    pub fn advance_cluster_time(&mut self, cluster_time: &ClusterTime) {
        if self.cluster_time.as_ref() >= Some(cluster_time) {
            return;
        }
        self.cluster_time = Some(cluster_time.clone());
    }

    pub fn sync_hosts(&mut self, hosts: HashSet<ServerAddress>) {
        self.servers.retain(|host, _| hosts.contains(host));
        let mut new = vec![];
        for host in hosts {
            if !self.servers.contains_key(&host) {
                new.push((host.clone(), ServerDescription::new(host)));
            }
        }
        if let Some(max) = self.srv_max_hosts {
            let max = max as usize;
            if max > 0 && max < self.servers.len() + new.len() {
                new = choose_n(&new, max.saturating_sub(self.servers.len()))
                    .cloned()
                    .collect();
            }
        }
        self.servers.extend(new);
    }

    /// Updates the topology given a fresh [`ServerDescription`], per the SDAM spec's
    /// per-topology-type transition tables.
    pub fn update(&mut self, mut server_description: ServerDescription) -> Result<()> {
        match self.servers.get(&server_description.address) {
            None => return Ok(()),
            Some(existing) => {
                if let Some(existing_tv) = existing.topology_version() {
                    if let Some(new_tv) = server_description.topology_version() {
                        if existing_tv.process_id == new_tv.process_id
                            && new_tv.counter < existing_tv.counter
                        {
                            return Ok(());
                        }
                    }
                }
            }
        }

        if let Some(expected_name) = &self.set_name {
            if server_description.is_available() {
                let got_name = server_description.set_name();
                if self.topology_type() == TopologyType::Single
                    && !matches!(got_name.as_ref().map(|n| n.as_deref()), Ok(Some(n)) if n == expected_name)
                {
                    server_description = ServerDescription::new_from_error(
                        server_description.address,
                        Error::new(ErrorKind::InvalidArgument {
                            message: format!(
                                "replica set name {expected_name:?} does not match server's actual name"
                            ),
                        }),
                    );
                }
            }
        }

        self.servers.insert(
            server_description.address.clone(),
            server_description.clone(),
        );

        if self.topology_type == TopologyType::LoadBalanced {
            return Ok(());
        }

        self.update_logical_session_timeout(&server_description);
        self.update_transaction_support_status(&server_description);

        if let Some(ref ct) = server_description.cluster_time().ok().flatten() {
            self.advance_cluster_time(ct);
        }

        match self.topology_type {
            TopologyType::Single | TopologyType::LoadBalanced => {}
            TopologyType::Unknown => self.update_unknown_topology(server_description)?,
            TopologyType::Sharded => self.update_sharded_topology(server_description),
            TopologyType::ReplicaSetNoPrimary => {
                self.update_replica_set_no_primary_topology(server_description)?
            }
            TopologyType::ReplicaSetWithPrimary => {
                self.update_replica_set_with_primary_topology(server_description)?
            }
        }

        self.check_compatibility();
        Ok(())
    }

    fn update_unknown_topology(&mut self, sd: ServerDescription) -> Result<()> {
        match sd.server_type {
            ServerType::Unknown | ServerType::RsGhost => {}
            ServerType::Standalone => self.update_unknown_with_standalone_server(sd),
            ServerType::Mongos => self.topology_type = TopologyType::Sharded,
            ServerType::RsPrimary => {
                self.topology_type = TopologyType::ReplicaSetWithPrimary;
                self.update_rs_from_primary_server(sd)?;
            }
            ServerType::RsSecondary | ServerType::RsArbiter | ServerType::RsOther => {
                self.topology_type = TopologyType::ReplicaSetNoPrimary;
                self.update_rs_without_primary_server(sd)?;
            }
            ServerType::LoadBalancer => {
                return Err(Error::new(ErrorKind::Internal {
                    message: "cannot transition to a load balancer".into(),
                }))
            }
        }
        Ok(())
    }

    fn update_sharded_topology(&mut self, sd: ServerDescription) {
        match sd.server_type {
            ServerType::Unknown | ServerType::Mongos => {}
            _ => {
                self.servers.remove(&sd.address);
            }
        }
    }

    fn update_replica_set_no_primary_topology(&mut self, sd: ServerDescription) -> Result<()> {
        match sd.server_type {
            ServerType::Unknown | ServerType::RsGhost => {}
            ServerType::Standalone | ServerType::Mongos => {
                self.servers.remove(&sd.address);
            }
            ServerType::RsPrimary => {
                self.topology_type = TopologyType::ReplicaSetWithPrimary;
                self.update_rs_from_primary_server(sd)?;
            }
            ServerType::RsSecondary | ServerType::RsArbiter | ServerType::RsOther => {
                self.update_rs_without_primary_server(sd)?;
            }
            ServerType::LoadBalancer => {
                return Err(Error::new(ErrorKind::Internal {
                    message: "cannot transition to a load balancer".into(),
                }))
            }
        }
        Ok(())
    }

    fn update_replica_set_with_primary_topology(&mut self, sd: ServerDescription) -> Result<()> {
        match sd.server_type {
            ServerType::Unknown | ServerType::RsGhost => self.record_primary_state(),
            ServerType::Standalone | ServerType::Mongos => {
                self.servers.remove(&sd.address);
                self.record_primary_state();
            }
            ServerType::RsPrimary => self.update_rs_from_primary_server(sd)?,
            ServerType::RsSecondary | ServerType::RsArbiter | ServerType::RsOther => {
                self.update_rs_with_primary_from_member(sd)?;
            }
            ServerType::LoadBalancer => {
                return Err(Error::new(ErrorKind::Internal {
                    message: "cannot transition to a load balancer".into(),
                }))
            }
        }
        Ok(())
    }

    fn update_unknown_with_standalone_server(&mut self, sd: ServerDescription) {
        if self.single_seed {
            self.topology_type = TopologyType::Single;
        } else {
            self.servers.remove(&sd.address);
        }
    }

    fn update_rs_without_primary_server(&mut self, sd: ServerDescription) -> Result<()> {
        if self.set_name.is_none() {
            self.set_name = sd.set_name()?;
        } else if self.set_name != sd.set_name()? {
            self.servers.remove(&sd.address);
            return Ok(());
        }

        self.add_new_servers(sd.known_hosts()?);

        if sd.invalid_me()? {
            self.servers.remove(&sd.address);
        }
        Ok(())
    }

    fn update_rs_with_primary_from_member(&mut self, sd: ServerDescription) -> Result<()> {
        if self.set_name != sd.set_name()? {
            self.servers.remove(&sd.address);
            self.record_primary_state();
            return Ok(());
        }
        if sd.invalid_me()? {
            self.servers.remove(&sd.address);
            self.record_primary_state();
        }
        Ok(())
    }

    /// Accepts a new primary's view of the set, applying the electionId/setVersion tie-break
    /// before replacing the servers map: a server whose reported `(setVersion, electionId)` pair
    /// is older than what the topology has already seen is demoted back to Unknown instead of
    /// being trusted.
    ///
    /// Servers at or above [`ELECTION_ID_FIRST_WIRE_VERSION`] compare `(electionId, setVersion)`
    /// lexicographically, electionId first; older servers fall back to the historical
    /// setVersion-first comparison.
    fn update_rs_from_primary_server(&mut self, sd: ServerDescription) -> Result<()> {
        if self.set_name.is_none() {
            self.set_name = sd.set_name()?;
        } else if self.set_name != sd.set_name()? {
            self.servers.remove(&sd.address);
            self.record_primary_state();
            return Ok(());
        }

        let election_id_first = sd
            .max_wire_version()?
            .map(|wire_version| wire_version >= ELECTION_ID_FIRST_WIRE_VERSION)
            .unwrap_or(false);

        if let Some(server_set_version) = sd.set_version()? {
            if let Some(server_election_id) = sd.election_id()? {
                if let Some(topology_max_set_version) = self.max_set_version {
                    if let Some(ref topology_max_election_id) = self.max_election_id {
                        let is_stale = if election_id_first {
                            (server_election_id, server_set_version)
                                < (*topology_max_election_id, topology_max_set_version)
                        } else {
                            topology_max_set_version > server_set_version
                                || (topology_max_set_version == server_set_version
                                    && *topology_max_election_id > server_election_id)
                        };
                        if is_stale {
                            self.servers
                                .insert(sd.address.clone(), ServerDescription::new(sd.address));
                            self.record_primary_state();
                            return Ok(());
                        }
                    }
                }
                self.max_election_id = Some(server_election_id);
            }
        }

        if let Some(server_set_version) = sd.set_version()? {
            if self
                .max_set_version
                .map(|max| server_set_version > max)
                .unwrap_or(true)
            {
                self.max_set_version = Some(server_set_version);
            }
        }

        let addresses: Vec<_> = self.servers.keys().cloned().collect();
        for address in addresses.clone() {
            if address == sd.address {
                continue;
            }
            if self.servers.get(&address).unwrap().server_type == ServerType::RsPrimary {
                self.servers
                    .insert(address.clone(), ServerDescription::new(address));
            }
        }

        let known_hosts = sd.known_hosts()?;
        self.add_new_servers(known_hosts.clone());
        for address in addresses {
            if !known_hosts.contains(&address) {
                self.servers.remove(&address);
            }
        }

        self.record_primary_state();
        Ok(())
    }

    fn record_primary_state(&mut self) {
        self.topology_type = if self
            .servers
            .values()
            .any(|s| s.server_type == ServerType::RsPrimary)
        {
            TopologyType::ReplicaSetWithPrimary
        } else {
            TopologyType::ReplicaSetNoPrimary
        };
    }

    fn add_new_servers(&mut self, addresses: impl IntoIterator<Item = ServerAddress>) {
        for address in addresses {
            self.servers
                .entry(address.clone())
                .or_insert_with(|| ServerDescription::new(address));
        }
    }

    pub fn server_selection_timeout_error_message(&self, criteria: &SelectionCriteria) -> String {
        if self.has_available_servers() {
            format!(
                "server selection timed out: no server matched criteria {criteria:?}. topology: {self}"
            )
        } else {
            format!("server selection timed out: no available servers. topology: {self}")
        }
    }

    /// Computes the candidate servers for `criteria`, applying (in order) the
    /// aggregate-with-write override rule, the suitability/staleness/tag-set filters, the latency
    /// window, and (Sharded topologies only) the deprioritization filter. Returns the surviving
    /// candidates alongside whether the override rule fired, so the caller can report it
    /// (spec.md §4.4 step 1).
    pub fn suitable_servers_in_latency_window<'a>(
        &'a self,
        criteria: &'a SelectionCriteria,
        operation_type: OperationType,
        deprioritized: Option<&ServerAddress>,
    ) -> Result<(Vec<&'a ServerDescription>, bool)> {
        if let Some(message) = self.compatibility_error() {
            return Err(Error::new(ErrorKind::IncompatibleServer {
                message: message.clone(),
            }));
        }

        let overridden = operation_type == OperationType::AggregateWithWrite
            && self.any_server_below_secondary_aggregate_write_wire_version();
        let primary_override = SelectionCriteria::ReadPreference(ReadPreference::Primary);
        let effective_criteria = if overridden { &primary_override } else { criteria };

        let mut suitable = match effective_criteria {
            SelectionCriteria::ReadPreference(rp) => self.suitable_servers(rp)?,
            SelectionCriteria::Predicate(filter) => self
                .servers
                .values()
                .filter(|s: &&ServerDescription| {
                    (self.topology_type == TopologyType::Single || s.server_type.is_data_bearing())
                        && filter(&ServerInfo::new_borrowed(*s))
                })
                .collect(),
        };

        self.retain_servers_within_latency_window(&mut suitable);
        self.apply_deprioritization(&mut suitable, deprioritized);
        Ok((suitable, overridden))
    }

    /// Whether any known server reports a `maxWireVersion` below the threshold at which a
    /// secondary can take part in an aggregate pipeline ending in `$out`/`$merge`. A server whose
    /// wire version isn't known yet (still `Unknown`) doesn't count — the override only needs to
    /// fire once the topology has actually confirmed an old server is present.
    fn any_server_below_secondary_aggregate_write_wire_version(&self) -> bool {
        self.servers.values().any(|s| {
            matches!(
                s.max_wire_version(),
                Ok(Some(wire_version)) if wire_version < SECONDARY_AGGREGATE_WRITE_WIRE_VERSION
            )
        })
    }

    /// Removes `deprioritized` from the candidate list (Sharded topologies only, per spec.md §4.4
    /// step 4); restores the full list if doing so would empty it, since deprioritization is
    /// best-effort and never allowed to turn a selectable topology into an unselectable one.
    fn apply_deprioritization<'a>(
        &self,
        suitable: &mut Vec<&'a ServerDescription>,
        deprioritized: Option<&ServerAddress>,
    ) {
        if self.topology_type != TopologyType::Sharded {
            return;
        }
        let Some(address) = deprioritized else {
            return;
        };
        let filtered: Vec<&ServerDescription> =
            suitable.iter().copied().filter(|s| &s.address != address).collect();
        if !filtered.is_empty() {
            *suitable = filtered;
        }
    }

    fn suitable_servers(&self, read_preference: &ReadPreference) -> Result<Vec<&ServerDescription>> {
        Ok(match self.topology_type {
            TopologyType::Unknown => Vec::new(),
            TopologyType::Single | TopologyType::LoadBalanced => self.servers.values().collect(),
            TopologyType::Sharded => self.servers_with_type(&[ServerType::Mongos]).collect(),
            TopologyType::ReplicaSetWithPrimary | TopologyType::ReplicaSetNoPrimary => {
                self.suitable_servers_in_replica_set(read_preference)?
            }
        })
    }

    fn retain_servers_within_latency_window(&self, suitable: &mut Vec<&ServerDescription>) {
        let shortest_rtt = suitable
            .iter()
            .filter_map(|s| s.average_round_trip_time)
            .min();

        let local_threshold = self.local_threshold.unwrap_or(DEFAULT_LOCAL_THRESHOLD);
        let max_rtt = shortest_rtt.map(|rtt| rtt.checked_add(local_threshold).unwrap_or(Duration::MAX));

        suitable.retain(|s| {
            if let Some(rtt) = s.average_round_trip_time {
                rtt <= max_rtt.unwrap()
            } else {
                matches!(s.server_type, ServerType::LoadBalancer)
            }
        });
    }

    pub fn servers_with_type<'a>(
        &'a self,
        types: &'a [ServerType],
    ) -> impl Iterator<Item = &'a ServerDescription> {
        self.servers.values().filter(move |s| types.contains(&s.server_type))
    }

    fn suitable_servers_in_replica_set(
        &self,
        read_preference: &ReadPreference,
    ) -> Result<Vec<&ServerDescription>> {
        let tag_sets = read_preference.tag_sets();
        let max_staleness = read_preference.max_staleness();

        Ok(match read_preference {
            ReadPreference::Primary => self.servers_with_type(&[ServerType::RsPrimary]).collect(),
            ReadPreference::Secondary { .. } => self.suitable_servers_for_read_preference(
                &[ServerType::RsSecondary],
                tag_sets,
                max_staleness,
            )?,
            ReadPreference::PrimaryPreferred { .. } => {
                match self.servers_with_type(&[ServerType::RsPrimary]).next() {
                    Some(primary) => vec![primary],
                    None => self.suitable_servers_for_read_preference(
                        &[ServerType::RsSecondary],
                        tag_sets,
                        max_staleness,
                    )?,
                }
            }
            ReadPreference::SecondaryPreferred { .. } => {
                let secondaries = self.suitable_servers_for_read_preference(
                    &[ServerType::RsSecondary],
                    tag_sets,
                    max_staleness,
                )?;
                if secondaries.is_empty() {
                    self.servers_with_type(&[ServerType::RsPrimary]).collect()
                } else {
                    secondaries
                }
            }
            ReadPreference::Nearest { .. } => self.suitable_servers_for_read_preference(
                &[ServerType::RsPrimary, ServerType::RsSecondary],
                tag_sets,
                max_staleness,
            )?,
        })
    }

    fn suitable_servers_for_read_preference(
        &self,
        types: &'static [ServerType],
        tag_sets: Option<&[TagSet]>,
        max_staleness: Option<Duration>,
    ) -> Result<Vec<&ServerDescription>> {
        if let Some(max_staleness) = max_staleness {
            verify_max_staleness(max_staleness, self.heartbeat_frequency())?;
        }

        let mut servers: Vec<_> = self.servers_with_type(types).collect();

        if let Some(max_staleness) = max_staleness {
            if max_staleness > Duration::ZERO {
                self.filter_servers_by_max_staleness(&mut servers, max_staleness);
            }
        }

        if let Some(tag_sets) = tag_sets {
            filter_servers_by_tag_sets(&mut servers, tag_sets);
        }

        Ok(servers)
    }

    fn filter_servers_by_max_staleness(&self, servers: &mut Vec<&ServerDescription>, max_staleness: Duration) {
        let primary = self.servers.values().find(|s| s.server_type == ServerType::RsPrimary);
        match primary {
            Some(primary) => self.filter_by_staleness_with_primary(servers, primary, max_staleness),
            None => self.filter_by_staleness_without_primary(servers, max_staleness),
        }
    }

    fn filter_by_staleness_with_primary(
        &self,
        servers: &mut Vec<&ServerDescription>,
        primary: &ServerDescription,
        max_staleness: Duration,
    ) {
        let max_staleness_ms: i64 = max_staleness.as_millis().try_into().unwrap_or(i64::MAX);
        servers.retain(|s| {
            self.secondary_staleness_with_primary(s, primary)
                .map(|staleness| staleness <= max_staleness_ms)
                .unwrap_or(false)
        });
    }

    fn filter_by_staleness_without_primary(&self, servers: &mut Vec<&ServerDescription>, max_staleness: Duration) {
        let max_staleness_ms: i64 = max_staleness.as_millis().try_into().unwrap_or(i64::MAX);
        let max_write_date = self
            .servers
            .values()
            .filter(|s| s.server_type == ServerType::RsSecondary)
            .filter_map(|s| s.last_write_date().ok().flatten())
            .map(|dt| dt.timestamp_millis())
            .max();
        let Some(max_write_date) = max_write_date else {
            return;
        };
        servers.retain(|s| {
            self.secondary_staleness_without_primary(s, max_write_date)
                .map(|staleness| staleness <= max_staleness_ms)
                .unwrap_or(false)
        });
    }

    fn secondary_staleness_with_primary(&self, secondary: &ServerDescription, primary: &ServerDescription) -> Option<i64> {
        let primary_last_update = primary.last_update_time?.timestamp_millis();
        let primary_last_write = primary.last_write_date().ok()??.timestamp_millis();
        let secondary_last_update = secondary.last_update_time?.timestamp_millis();
        let secondary_last_write = secondary.last_write_date().ok()??.timestamp_millis();
        let heartbeat_ms: i64 = self.heartbeat_frequency().as_millis().try_into().unwrap_or(i64::MAX);
        Some((secondary_last_update - secondary_last_write) - (primary_last_update - primary_last_write) + heartbeat_ms)
    }

    fn secondary_staleness_without_primary(&self, secondary: &ServerDescription, max_last_write_date: i64) -> Option<i64> {
        let secondary_last_write = secondary.last_write_date().ok()??.timestamp_millis();
        let heartbeat_ms: i64 = self.heartbeat_frequency().as_millis().try_into().unwrap_or(i64::MAX);
        Some(max_last_write_date - secondary_last_write + heartbeat_ms)
    }

    /// Selects a single server among those within the latency window, weighting toward whichever
    /// of two random candidates has fewer in-flight operations (the "power of two choices" pick
    /// the server-selection spec calls for).
    pub fn select_server_in_latency_window(&self, in_window: Vec<&Arc<Server>>) -> Option<Arc<Server>> {
        if in_window.is_empty() {
            return None;
        }
        if in_window.len() == 1 {
            return Some(in_window[0].clone());
        }
        choose_n(&in_window, 2)
            .min_by_key(|s| s.operation_count())
            .map(|s| (*s).clone())
    }
}

impl fmt::Display for TopologyDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{ type: {}", self.topology_type)?;
        if let Some(ref set_name) = self.set_name {
            write!(f, ", set: {set_name}")?;
        }
        if let Some(ref err) = self.compatibility_error {
            write!(f, ", incompatible: {err}")?;
        }
        if !self.servers.is_empty() {
            write!(f, ", servers: [")?;
            let mut iter = self.servers.values();
            if let Some(s) = iter.next() {
                write!(f, "{}", ServerInfo::new_borrowed(s))?;
            }
            for s in iter {
                write!(f, ", {}", ServerInfo::new_borrowed(s))?;
            }
            write!(f, "]")?;
        }
        write!(f, " }}")
    }
}

fn filter_servers_by_tag_sets(servers: &mut Vec<&ServerDescription>, tag_sets: &[TagSet]) {
    if tag_sets.is_empty() {
        return;
    }
    for tag_set in tag_sets {
        let matches = |s: &&ServerDescription| s.matches_tag_set(tag_set);
        if servers.iter().any(matches) {
            servers.retain(matches);
            return;
        }
    }
    servers.clear();
}

/// The difference between two topology descriptions, used to decide which SDAM events to emit.
#[derive(Debug)]
pub struct TopologyDescriptionDiff<'a> {
    pub removed_addresses: HashSet<&'a ServerAddress>,
    pub added_addresses: HashSet<&'a ServerAddress>,
    pub changed_servers: HashMap<&'a ServerAddress, (&'a ServerDescription, &'a ServerDescription)>,
}

impl TopologyDescription {
    pub fn diff<'a>(&'a self, other: &'a TopologyDescription) -> Option<TopologyDescriptionDiff<'a>> {
        if self == other {
            return None;
        }
        let addresses: HashSet<&ServerAddress> = self.server_addresses().collect();
        let other_addresses: HashSet<&ServerAddress> = other.server_addresses().collect();
        let changed_servers = self.servers.iter().filter_map(|(addr, desc)| match other.servers.get(addr) {
            Some(other_desc) if desc != other_desc => Some((addr, (desc, other_desc))),
            _ => None,
        });
        Some(TopologyDescriptionDiff {
            removed_addresses: addresses.difference(&other_addresses).cloned().collect(),
            added_addresses: other_addresses.difference(&addresses).cloned().collect(),
            changed_servers: changed_servers.collect(),
        })
    }
}

/// The server-selection spec's floor on `max_staleness`: at least 90 seconds, and at least the
/// heartbeat frequency plus the idle-write period a primary may go without writing.
pub fn verify_max_staleness(max_staleness: Duration, heartbeat_frequency: Duration) -> Result<()> {
    let floor = std::cmp::max(
        Duration::from_secs(90),
        heartbeat_frequency.checked_add(IDLE_WRITE_PERIOD).unwrap_or(Duration::MAX),
    );
    if max_staleness < floor {
        return Err(Error::new(ErrorKind::InvalidArgument {
            message: format!("max_staleness must be at least {} seconds", floor.as_secs()),
        }));
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    fn primary(address: ServerAddress) -> ServerDescription {
        let mut sd = ServerDescription::new(address.clone());
        sd.server_type = ServerType::RsPrimary;
        sd.reply = Ok(Some(crate::hello::HelloReply {
            server_address: address,
            command_response: crate::hello::HelloCommandResponse {
                set_name: Some("rs0".into()),
                is_writable_primary: Some(true),
                set_version: Some(1),
                election_id: Some(ObjectId::new()),
                max_wire_version: Some(21),
                ..Default::default()
            },
            cluster_time: None,
        }));
        sd
    }

    #[test]
    fn unknown_topology_becomes_replica_set_with_primary_on_primary_reply() {
        let mut td = TopologyDescription::default();
        let addr = ServerAddress::new("a", None);
        td.servers.insert(addr.clone(), ServerDescription::new(addr.clone()));
        td.update(primary(addr)).unwrap();
        assert_eq!(td.topology_type, TopologyType::ReplicaSetWithPrimary);
    }

    #[test]
    fn stale_set_version_demotes_server_to_unknown_below_election_id_first_wire_version() {
        let mut td = TopologyDescription::default();
        let addr = ServerAddress::new("a", None);
        td.servers.insert(addr.clone(), ServerDescription::new(addr.clone()));
        td.max_set_version = Some(5);
        td.max_election_id = Some(ObjectId::from_bytes([9; 12]));
        td.set_name = Some("rs0".into());

        let mut stale = primary(addr.clone());
        stale.server_type = ServerType::RsPrimary;
        if let Ok(Some(ref mut reply)) = stale.reply {
            reply.command_response.set_version = Some(1);
            reply.command_response.max_wire_version = Some(13);
            // A higher electionId than the topology's maximum would make this server look
            // fresher under the electionId-first rule; below the gate, setVersion still decides.
            reply.command_response.election_id = Some(ObjectId::from_bytes([255; 12]));
        }
        td.update(stale).unwrap();
        assert_eq!(td.servers.get(&addr).unwrap().server_type, ServerType::Unknown);
    }

    #[test]
    fn stale_election_id_demotes_server_to_unknown_at_election_id_first_wire_version() {
        let mut td = TopologyDescription::default();
        let addr = ServerAddress::new("a", None);
        td.servers.insert(addr.clone(), ServerDescription::new(addr.clone()));
        td.max_set_version = Some(1);
        td.max_election_id = Some(ObjectId::from_bytes([255; 12]));
        td.set_name = Some("rs0".into());

        // max_wire_version defaults to 21 via `primary`, at or above the gate.
        let mut stale = primary(addr.clone());
        stale.server_type = ServerType::RsPrimary;
        if let Ok(Some(ref mut reply)) = stale.reply {
            // Higher setVersion than the topology's maximum would win under the legacy rule, but
            // a lower electionId loses under the electionId-first rule that applies at this wire
            // version.
            reply.command_response.set_version = Some(5);
            reply.command_response.election_id = Some(ObjectId::from_bytes([1; 12]));
        }
        td.update(stale).unwrap();
        assert_eq!(td.servers.get(&addr).unwrap().server_type, ServerType::Unknown);
    }

    #[test]
    fn accepts_primary_with_higher_election_id_at_election_id_first_wire_version() {
        let mut td = TopologyDescription::default();
        let addr = ServerAddress::new("a", None);
        td.servers.insert(addr.clone(), ServerDescription::new(addr.clone()));
        td.max_set_version = Some(5);
        td.max_election_id = Some(ObjectId::from_bytes([1; 12]));
        td.set_name = Some("rs0".into());

        let mut incoming = primary(addr.clone());
        incoming.server_type = ServerType::RsPrimary;
        if let Ok(Some(ref mut reply)) = incoming.reply {
            // Lower setVersion than the topology's maximum would lose under the legacy rule, but
            // a higher electionId wins under the electionId-first rule.
            reply.command_response.set_version = Some(1);
            reply.command_response.election_id = Some(ObjectId::from_bytes([2; 12]));
        }
        td.update(incoming).unwrap();
        assert_eq!(td.servers.get(&addr).unwrap().server_type, ServerType::RsPrimary);
        assert_eq!(td.max_election_id, Some(ObjectId::from_bytes([2; 12])));
    }

    fn primary_rtt(address: ServerAddress) -> ServerDescription {
        let reply = crate::hello::HelloReply {
            server_address: address.clone(),
            command_response: crate::hello::HelloCommandResponse {
                set_name: Some("rs0".into()),
                is_writable_primary: Some(true),
                set_version: Some(1),
                election_id: Some(ObjectId::new()),
                max_wire_version: Some(21),
                ..Default::default()
            },
            cluster_time: None,
        };
        ServerDescription::new_from_hello_reply(address, reply, Duration::from_millis(1))
    }

    fn mongos(address: ServerAddress, max_wire_version: i32) -> ServerDescription {
        let reply = crate::hello::HelloReply {
            server_address: address.clone(),
            command_response: crate::hello::HelloCommandResponse {
                msg: Some("isdbgrid".into()),
                max_wire_version: Some(max_wire_version),
                ..Default::default()
            },
            cluster_time: None,
        };
        ServerDescription::new_from_hello_reply(address, reply, Duration::from_millis(1))
    }

    fn secondary(address: ServerAddress, max_wire_version: i32) -> ServerDescription {
        let reply = crate::hello::HelloReply {
            server_address: address.clone(),
            command_response: crate::hello::HelloCommandResponse {
                set_name: Some("rs0".into()),
                secondary: Some(true),
                max_wire_version: Some(max_wire_version),
                ..Default::default()
            },
            cluster_time: None,
        };
        ServerDescription::new_from_hello_reply(address, reply, Duration::from_millis(1))
    }

    #[test]
    fn aggregate_with_write_override_rewrites_to_primary_below_secondary_write_wire_version() {
        let mut td = TopologyDescription::default();
        let p = ServerAddress::new("p", None);
        let s = ServerAddress::new("s", None);
        td.update(primary_rtt(p.clone())).unwrap();
        td.update(secondary(s, SECONDARY_AGGREGATE_WRITE_WIRE_VERSION - 1)).unwrap();

        let criteria = SelectionCriteria::ReadPreference(ReadPreference::Nearest {
            tag_sets: None,
            max_staleness: None,
        });
        let (candidates, overridden) = td
            .suitable_servers_in_latency_window(&criteria, OperationType::AggregateWithWrite, None)
            .unwrap();
        assert!(overridden);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].address, p);
    }

    #[test]
    fn aggregate_with_write_does_not_override_when_all_servers_meet_wire_version() {
        let mut td = TopologyDescription::default();
        let p = ServerAddress::new("p", None);
        let s = ServerAddress::new("s", None);
        td.update(primary_rtt(p)).unwrap();
        td.update(secondary(s, SECONDARY_AGGREGATE_WRITE_WIRE_VERSION)).unwrap();

        let criteria = SelectionCriteria::ReadPreference(ReadPreference::Nearest {
            tag_sets: None,
            max_staleness: None,
        });
        let (candidates, overridden) = td
            .suitable_servers_in_latency_window(&criteria, OperationType::AggregateWithWrite, None)
            .unwrap();
        assert!(!overridden);
        assert_eq!(candidates.len(), 2);
    }

    #[test]
    fn plain_read_never_triggers_the_aggregate_with_write_override() {
        let mut td = TopologyDescription::default();
        let p = ServerAddress::new("p", None);
        let s = ServerAddress::new("s", None);
        td.update(primary_rtt(p)).unwrap();
        td.update(secondary(s, SECONDARY_AGGREGATE_WRITE_WIRE_VERSION - 1)).unwrap();

        let criteria = SelectionCriteria::ReadPreference(ReadPreference::Nearest {
            tag_sets: None,
            max_staleness: None,
        });
        let (candidates, overridden) = td
            .suitable_servers_in_latency_window(&criteria, OperationType::Read, None)
            .unwrap();
        assert!(!overridden);
        assert_eq!(candidates.len(), 2);
    }

    #[test]
    fn deprioritized_server_is_removed_from_sharded_candidates() {
        let mut td = TopologyDescription::default();
        let a = ServerAddress::new("a", None);
        let b = ServerAddress::new("b", None);
        td.update(mongos(a.clone(), 21)).unwrap();
        td.update(mongos(b.clone(), 21)).unwrap();

        let criteria = SelectionCriteria::ReadPreference(ReadPreference::Nearest {
            tag_sets: None,
            max_staleness: None,
        });
        let (candidates, _) = td
            .suitable_servers_in_latency_window(&criteria, OperationType::Read, Some(&a))
            .unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].address, b);
    }

    #[test]
    fn deprioritization_is_restored_when_it_would_empty_the_candidate_list() {
        let mut td = TopologyDescription::default();
        let a = ServerAddress::new("a", None);
        td.update(mongos(a.clone(), 21)).unwrap();

        let criteria = SelectionCriteria::ReadPreference(ReadPreference::Nearest {
            tag_sets: None,
            max_staleness: None,
        });
        let (candidates, _) = td
            .suitable_servers_in_latency_window(&criteria, OperationType::Read, Some(&a))
            .unwrap();
        assert_eq!(candidates.len(), 1, "deprioritizing the only candidate must restore it");
    }
}
