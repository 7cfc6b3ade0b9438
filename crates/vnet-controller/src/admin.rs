//! Administrative record mutation
//!
//! Create, update, list and delete networks and members. Updates are
//! partial: a patch only touches the fields it carries. Each write bumps the
//! record's revision and happens under the network's lock.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::address::{Address, NetworkId};
use crate::controller::{now_ms, NetworkController, NetworkLock};
use crate::error::{ControllerError, Result};
use crate::identity::Identity;
use crate::model::{
    lenient_u32, parse_ip_lenient, parse_tag_pairs, CapabilityDefinition, DnsConfig,
    IpAssignmentPool, MemberRecord, NetworkRecord, Route, TagDefinition, V4AssignMode,
    V6AssignMode,
};
use crate::resolver::CREDENTIAL_API;
use crate::rules::{self, json::normalize, Rule};

/// Version reported by [`NetworkController::status`]
pub const API_VERSION: u32 = 4;

/// Partial update of a network
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkPatch {
    pub name: Option<String>,
    pub private: Option<bool>,
    pub enable_broadcast: Option<bool>,
    pub allow_passive_bridging: Option<bool>,
    pub multicast_limit: Option<u32>,
    pub mtu: Option<u32>,
    /// Rule descriptions; undecodable entries are dropped
    pub rules: Option<Vec<Value>>,
    /// Routes; malformed entries are dropped
    pub routes: Option<Vec<Value>>,
    /// Pools; malformed or mixed-family entries are dropped
    pub ip_assignment_pools: Option<Vec<Value>>,
    pub v4_assign_mode: Option<V4AssignMode>,
    pub v6_assign_mode: Option<V6AssignModePatch>,
    pub auth_tokens: Option<BTreeMap<String, i64>>,
    pub certificate_timeout_window_size: Option<i64>,
    /// `{ id, default, rules }` objects; later entries win on duplicate ids
    pub capabilities: Option<Vec<Value>>,
    /// `{ id, default }` objects; a missing or null default means none
    pub tags: Option<Vec<Value>>,
    pub dns: Option<DnsConfig>,
}

/// IPv6 assign mode in either the structured or the legacy string form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum V6AssignModePatch {
    Modes(V6AssignMode),
    Legacy(String),
}

impl V6AssignModePatch {
    fn into_mode(self) -> V6AssignMode {
        match self {
            V6AssignModePatch::Modes(mode) => mode,
            V6AssignModePatch::Legacy(s) => V6AssignMode::from_legacy(&s),
        }
    }
}

/// Partial update of a member
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberPatch {
    pub authorized: Option<bool>,
    pub active_bridge: Option<bool>,
    pub no_auto_assign_ips: Option<bool>,
    pub name: Option<String>,
    /// Addresses, optionally with a mask which is discarded; invalid
    /// entries are dropped
    pub ip_assignments: Option<Vec<String>>,
    /// Bound only if the member has no identity yet
    pub identity: Option<Identity>,
    /// Granted capability ids
    pub capabilities: Option<Vec<Value>>,
    /// `[id, value]` pairs
    pub tags: Option<Vec<Value>>,
}

/// A network with its member counts
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSummary {
    pub network: NetworkRecord,
    pub total_member_count: usize,
    pub authorized_member_count: usize,
}

/// Controller health
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerStatus {
    pub controller: Address,
    pub api_version: u32,
    /// Controller clock, ms since epoch
    pub clock: i64,
    pub ready: bool,
}

impl NetworkController {
    /// Create or update a network
    ///
    /// With no `id` a fresh one is drawn under this controller's address.
    pub async fn create_or_update_network(
        &self,
        id: Option<NetworkId>,
        patch: NetworkPatch,
    ) -> Result<NetworkRecord> {
        let (id, _guard, existing) = match id {
            Some(id) => {
                if id.controller() != self.address() {
                    return Err(ControllerError::ForeignNetwork {
                        network: id,
                        controller: self.address(),
                    });
                }
                let guard = self.lock_network(id).await;
                let existing = self.store.read_network(id).await?;
                (id, guard, existing)
            }
            None => {
                let (id, guard) = self.claim_network_id().await?;
                (id, guard, None)
            }
        };

        let now = now_ms();
        let (mut record, created) = match existing {
            Some(record) => (record, false),
            None => (NetworkRecord::new(id, now), true),
        };

        self.apply_network_patch(&mut record, patch);
        if record.rules.is_empty() {
            record.rules.push(rules::encode(&Rule::accept_all()));
        }
        record.revision += 1;
        self.store.write_network(&record).await?;

        if created {
            info!(network_id = %id, "Created network");
        } else {
            debug!(network_id = %id, revision = record.revision, "Updated network");
        }
        Ok(record)
    }

    /// Draw random suffixes until one has no record, returning it locked
    async fn claim_network_id(&self) -> Result<(NetworkId, NetworkLock<'_>)> {
        let trials = self.config.network_id_trials;
        for _ in 0..trials {
            let suffix = (self.signer.random_u64() & 0xff_ffff) as u32;
            let id = NetworkId::from_parts(self.address(), suffix.max(1));
            if self.store.read_network(id).await?.is_some() {
                continue;
            }
            let guard = self.lock_network(id).await;
            // a concurrent create may have drawn the same id while we waited
            if self.store.read_network(id).await?.is_none() {
                return Ok((id, guard));
            }
        }
        warn!(controller = %self.address(), trials, "Network ID space exhausted");
        Err(ControllerError::NetworkIdExhausted(trials))
    }

    fn apply_network_patch(&self, record: &mut NetworkRecord, patch: NetworkPatch) {
        let cap = self.config.limits.max_admin_entries;
        let network_id = record.id;

        if let Some(name) = patch.name {
            record.name = name;
        }
        if let Some(private) = patch.private {
            record.private = private;
        }
        if let Some(v) = patch.enable_broadcast {
            record.enable_broadcast = v;
        }
        if let Some(v) = patch.allow_passive_bridging {
            record.allow_passive_bridging = v;
        }
        if let Some(v) = patch.multicast_limit {
            record.multicast_limit = v;
        }
        if let Some(v) = patch.mtu {
            record.mtu = Some(v);
        }
        if let Some(descriptions) = patch.rules {
            record.rules = normalize_rules(network_id, &descriptions, cap);
        }
        if let Some(routes) = patch.routes {
            record.routes = routes
                .into_iter()
                .filter_map(|v| serde_json::from_value::<Route>(v).ok())
                .filter(Route::is_consistent)
                .take(cap)
                .collect();
        }
        if let Some(pools) = patch.ip_assignment_pools {
            record.ip_assignment_pools = pools
                .into_iter()
                .filter_map(|v| serde_json::from_value::<IpAssignmentPool>(v).ok())
                .filter(IpAssignmentPool::is_consistent)
                .take(cap)
                .collect();
        }
        if let Some(mode) = patch.v4_assign_mode {
            record.v4_assign_mode = mode;
        }
        if let Some(mode) = patch.v6_assign_mode {
            record.v6_assign_mode = mode.into_mode();
        }
        if let Some(tokens) = patch.auth_tokens {
            record.auth_tokens = tokens;
        }
        if let Some(window) = patch.certificate_timeout_window_size {
            record.certificate_timeout_window_size = Some(window);
        }
        if let Some(capabilities) = patch.capabilities {
            let mut by_id = BTreeMap::new();
            for cap_object in capabilities.iter().filter_map(Value::as_object) {
                let id = cap_object.get("id").and_then(lenient_u32).unwrap_or(0);
                let rules = cap_object
                    .get("rules")
                    .and_then(Value::as_array)
                    .map(|rules| normalize_rules(network_id, rules, cap))
                    .unwrap_or_default();
                by_id.insert(
                    id,
                    CapabilityDefinition {
                        id,
                        default: cap_object
                            .get("default")
                            .and_then(Value::as_bool)
                            .unwrap_or(false),
                        rules,
                    },
                );
            }
            record.capabilities = by_id.into_values().take(cap).collect();
        }
        if let Some(tags) = patch.tags {
            let by_id: BTreeMap<u32, TagDefinition> = tags
                .iter()
                .filter_map(Value::as_object)
                .map(|tag| TagDefinition {
                    id: tag.get("id").and_then(lenient_u32).unwrap_or(0),
                    default: tag.get("default").and_then(lenient_u32),
                })
                .map(|tag| (tag.id, tag))
                .collect();
            record.tags = by_id.into_values().take(cap).collect();
        }
        if let Some(dns) = patch.dns {
            record.dns = Some(dns);
        }
    }

    /// Create or update a member of an existing network
    pub async fn create_or_update_member(
        &self,
        network_id: NetworkId,
        address: Address,
        patch: MemberPatch,
    ) -> Result<MemberRecord> {
        let _guard = self.lock_network(network_id).await;
        let now = now_ms();
        let mut network = self
            .store
            .read_network(network_id)
            .await?
            .ok_or(ControllerError::NetworkNotFound(network_id))?;

        let mut member = match self.store.read_member(network_id, address).await? {
            Some(member) => member,
            None => {
                let mut member = MemberRecord::new(network_id, address, network.private, now);
                member.grant_default_capabilities(&network);
                member
            }
        };

        if let Some(identity) = patch.identity {
            if identity.address() != address {
                return Err(ControllerError::InvalidRequest(format!(
                    "identity {} does not belong to member {address}",
                    identity.address()
                )));
            }
            if member.identity.is_none() {
                member.identity = Some(identity.to_public());
            }
        }
        if let Some(authorized) = patch.authorized {
            if authorized != member.authorized {
                member.set_authorized(authorized, CREDENTIAL_API, now);
                if authorized {
                    member.last_authorized_credential = None;
                }
                info!(network_id = %network_id, member = %address, authorized, "Member authorization changed");
            }
        }
        if let Some(v) = patch.no_auto_assign_ips {
            member.no_auto_assign_ips = v;
        }
        if let Some(name) = patch.name {
            member.name = name;
        }
        if let Some(ips) = patch.ip_assignments {
            let mut filtered = Vec::new();
            for ip in ips.iter().filter_map(|s| parse_ip_lenient(s)) {
                if !filtered.contains(&ip) {
                    filtered.push(ip);
                }
            }
            filtered.truncate(self.config.limits.max_admin_entries);
            member.ip_assignments = filtered;
        }
        if let Some(bridge) = patch.active_bridge {
            member.active_bridge = bridge;
        }
        if let Some(capabilities) = patch.capabilities {
            let ids: BTreeSet<u32> = capabilities.iter().filter_map(lenient_u32).collect();
            member.capabilities = ids
                .into_iter()
                .take(self.config.limits.max_admin_entries)
                .collect();
        }
        if let Some(tags) = patch.tags {
            member.tags = parse_tag_pairs(&tags)
                .into_iter()
                .take(self.config.limits.max_admin_entries)
                .collect();
        }

        if sync_active_bridge(&mut network, &member) {
            network.revision += 1;
            self.store.write_network(&network).await?;
            debug!(network_id = %network_id, member = %address, "Active bridge set changed");
        }

        member.member_revision += 1;
        self.store.write_member(&member).await?;
        Ok(member)
    }

    pub async fn get_network(&self, network_id: NetworkId) -> Result<NetworkRecord> {
        self.store
            .read_network(network_id)
            .await?
            .ok_or(ControllerError::NetworkNotFound(network_id))
    }

    pub async fn get_member(&self, network_id: NetworkId, address: Address) -> Result<MemberRecord> {
        self.store
            .read_member(network_id, address)
            .await?
            .ok_or(ControllerError::MemberNotFound {
                network: network_id,
                member: address,
            })
    }

    /// Delete a network and all of its members
    pub async fn delete_network(&self, network_id: NetworkId) -> Result<NetworkRecord> {
        let _guard = self.lock_network(network_id).await;
        let record = self
            .store
            .read_network(network_id)
            .await?
            .ok_or(ControllerError::NetworkNotFound(network_id))?;

        let members = self.store.list_members(network_id).await?;
        for (address, _) in &members {
            self.store.delete_member(network_id, *address).await?;
        }
        self.store.delete_network(network_id).await?;
        self.forget_network(network_id);

        info!(network_id = %network_id, members = members.len(), "Deleted network");
        Ok(record)
    }

    /// Delete one member; its bridge role is withdrawn from the network
    pub async fn delete_member(
        &self,
        network_id: NetworkId,
        address: Address,
    ) -> Result<MemberRecord> {
        let _guard = self.lock_network(network_id).await;
        let member = self
            .store
            .read_member(network_id, address)
            .await?
            .ok_or(ControllerError::MemberNotFound {
                network: network_id,
                member: address,
            })?;

        if let Some(mut network) = self.store.read_network(network_id).await? {
            if network.active_bridges.remove(&address) {
                network.revision += 1;
                self.store.write_network(&network).await?;
            }
        }
        self.store.delete_member(network_id, address).await?;
        info!(network_id = %network_id, member = %address, "Deleted member");
        Ok(member)
    }

    pub async fn list_networks(&self) -> Result<Vec<NetworkId>> {
        Ok(self.store.list_network_ids().await?)
    }

    /// Members of a network with their revisions
    pub async fn list_members(&self, network_id: NetworkId) -> Result<Vec<(Address, u64)>> {
        if self.store.read_network(network_id).await?.is_none() {
            return Err(ControllerError::NetworkNotFound(network_id));
        }
        Ok(self.store.list_members(network_id).await?)
    }

    /// Every network with member counts
    pub async fn list_networks_detailed(&self) -> Result<Vec<NetworkSummary>> {
        let mut out = Vec::new();
        for id in self.store.list_network_ids().await? {
            let Some(network) = self.store.read_network(id).await? else {
                continue;
            };
            let members = self.store.members(id).await?;
            out.push(NetworkSummary {
                total_member_count: members.len(),
                authorized_member_count: members.iter().filter(|m| m.authorized).count(),
                network,
            });
        }
        Ok(out)
    }

    pub async fn status(&self) -> ControllerStatus {
        ControllerStatus {
            controller: self.address(),
            api_version: API_VERSION,
            clock: now_ms(),
            ready: self.store.is_ready().await,
        }
    }
}

/// Canonical forms of the decodable descriptions, at most `cap`
fn normalize_rules(network_id: NetworkId, descriptions: &[Value], cap: usize) -> Vec<Value> {
    descriptions
        .iter()
        .filter_map(|d| match normalize(d) {
            Ok(rule) => Some(rule),
            Err(e) => {
                warn!(network_id = %network_id, error = %e, "Dropping invalid rule");
                None
            }
        })
        .take(cap)
        .collect()
}

/// Mirror the member's bridge flag into the network; true if it changed
fn sync_active_bridge(network: &mut NetworkRecord, member: &MemberRecord) -> bool {
    if member.active_bridge {
        network.active_bridges.insert(member.id)
    } else {
        network.active_bridges.remove(&member.id)
    }
}
