//! Network and member records
//!
//! These are the JSON documents kept in the [`DocumentStore`]. Every field
//! carries its default here, once, so a document written by an older
//! controller (or by hand) deserializes into a complete record.
//!
//! [`DocumentStore`]: crate::store::DocumentStore

use std::collections::{BTreeMap, BTreeSet};
use std::net::{IpAddr, SocketAddr};

use ipnet::IpNet;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::address::{Address, NetworkId};
use crate::identity::Identity;

/// A virtual network
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkRecord {
    pub id: NetworkId,

    #[serde(default)]
    pub name: String,

    /// Members need explicit authorization
    #[serde(default = "default_true")]
    pub private: bool,

    #[serde(default)]
    pub creation_time: i64,

    #[serde(default)]
    pub revision: u64,

    #[serde(default = "default_true")]
    pub enable_broadcast: bool,

    #[serde(default)]
    pub allow_passive_bridging: bool,

    #[serde(default = "default_multicast_limit")]
    pub multicast_limit: u32,

    /// Requested MTU; clamped when compiled
    #[serde(default)]
    pub mtu: Option<u32>,

    /// Rule descriptions in canonical form
    #[serde(default)]
    pub rules: Vec<serde_json::Value>,

    #[serde(default)]
    pub routes: Vec<Route>,

    #[serde(default)]
    pub ip_assignment_pools: Vec<IpAssignmentPool>,

    #[serde(default)]
    pub v4_assign_mode: V4AssignMode,

    #[serde(default)]
    pub v6_assign_mode: V6AssignMode,

    /// Members acting as bridges; mirrored from each member's flag
    #[serde(default)]
    pub active_bridges: BTreeSet<Address>,

    /// Token to expiry time (ms since epoch, 0 = never)
    #[serde(default)]
    pub auth_tokens: BTreeMap<String, i64>,

    /// Requested certificate validity window; clamped when compiled
    #[serde(default)]
    pub certificate_timeout_window_size: Option<i64>,

    /// Capability definitions, ascending by id
    #[serde(default)]
    pub capabilities: Vec<CapabilityDefinition>,

    /// Tag definitions, ascending by id
    #[serde(default)]
    pub tags: Vec<TagDefinition>,

    #[serde(default)]
    pub dns: Option<DnsConfig>,
}

fn default_true() -> bool {
    true
}

fn default_multicast_limit() -> u32 {
    32
}

impl NetworkRecord {
    /// A fresh record carrying every documented default
    pub fn new(id: NetworkId, now: i64) -> Self {
        Self {
            id,
            name: String::new(),
            private: true,
            creation_time: now,
            revision: 0,
            enable_broadcast: true,
            allow_passive_bridging: false,
            multicast_limit: default_multicast_limit(),
            mtu: None,
            rules: Vec::new(),
            routes: Vec::new(),
            ip_assignment_pools: Vec::new(),
            v4_assign_mode: V4AssignMode::default(),
            v6_assign_mode: V6AssignMode::default(),
            active_bridges: BTreeSet::new(),
            auth_tokens: BTreeMap::new(),
            certificate_timeout_window_size: None,
            capabilities: Vec::new(),
            tags: Vec::new(),
            dns: None,
        }
    }

    /// Routes without a gateway
    pub fn on_link_routes(&self) -> impl Iterator<Item = &Route> {
        self.routes.iter().filter(|r| r.is_on_link())
    }

    /// Whether `token` is known and unexpired at `now`
    pub fn token_valid(&self, token: &str, now: i64) -> bool {
        matches!(self.auth_tokens.get(token), Some(&expires) if expires == 0 || expires > now)
    }

    pub fn capability(&self, id: u32) -> Option<&CapabilityDefinition> {
        self.capabilities.iter().find(|c| c.id == id)
    }
}

/// A named bundle of extra rules granted to selected members
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityDefinition {
    pub id: u32,

    /// Granted to every member on its first request
    #[serde(default)]
    pub default: bool,

    /// Rule descriptions in canonical form
    #[serde(default)]
    pub rules: Vec<serde_json::Value>,
}

/// A tag members carry, matched by the tag rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagDefinition {
    pub id: u32,

    /// Value given to members that have none
    #[serde(default)]
    pub default: Option<u32>,
}

/// Resolver settings pushed to members
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsConfig {
    #[serde(default)]
    pub domain: String,

    #[serde(default)]
    pub servers: Vec<IpAddr>,
}

/// A route pushed to members
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub target: IpNet,

    /// Gateway; `None` means the target is directly reachable on the network
    #[serde(default)]
    pub via: Option<IpAddr>,

    #[serde(default)]
    pub flags: u16,

    #[serde(default)]
    pub metric: u16,
}

impl Route {
    pub fn on_link(target: IpNet) -> Self {
        Self {
            target,
            via: None,
            flags: 0,
            metric: 0,
        }
    }

    pub fn is_on_link(&self) -> bool {
        self.via.is_none()
    }

    /// Target and gateway belong to the same address family
    pub fn is_consistent(&self) -> bool {
        match self.via {
            Some(via) => via.is_ipv4() == matches!(self.target, IpNet::V4(_)),
            None => true,
        }
    }
}

/// Inclusive range used for automatic assignment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpAssignmentPool {
    pub ip_range_start: IpAddr,
    pub ip_range_end: IpAddr,
}

impl IpAssignmentPool {
    pub fn new(start: IpAddr, end: IpAddr) -> Self {
        Self {
            ip_range_start: start,
            ip_range_end: end,
        }
    }

    pub fn is_consistent(&self) -> bool {
        self.ip_range_start.is_ipv4() == self.ip_range_end.is_ipv4()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct V4AssignMode {
    #[serde(default)]
    pub zt: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct V6AssignMode {
    /// Assign from pools
    #[serde(default)]
    pub zt: bool,

    /// Derive an fd00::/8 address from network ID and node address
    #[serde(default)]
    pub rfc4193: bool,

    /// Derive an fc00::/8 address with a per-member /80 behind it
    #[serde(default, rename = "6plane")]
    pub six_plane: bool,
}

impl V6AssignMode {
    /// Parse the legacy comma-separated form, e.g. `"rfc4193,zt"`
    pub fn from_legacy(s: &str) -> Self {
        let mut mode = Self::default();
        for part in s.split(',').map(str::trim) {
            match part {
                "zt" => mode.zt = true,
                "rfc4193" => mode.rfc4193 = true,
                "6plane" => mode.six_plane = true,
                _ => {}
            }
        }
        mode
    }
}

/// A node's membership in a network
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberRecord {
    pub id: Address,

    pub nwid: NetworkId,

    /// Bound on first contact and never replaced
    #[serde(default)]
    pub identity: Option<Identity>,

    #[serde(default)]
    pub authorized: bool,

    #[serde(default)]
    pub active_bridge: bool,

    /// Suppress every automatic address for this member
    #[serde(default)]
    pub no_auto_assign_ips: bool,

    #[serde(default)]
    pub name: String,

    /// Managed addresses. Stored masks are ignored; the route supplies it.
    #[serde(default, deserialize_with = "lenient_ip_list")]
    pub ip_assignments: Vec<IpAddr>,

    /// Most recent requests, oldest first
    #[serde(default)]
    pub history: Vec<RequestRecord>,

    #[serde(default, rename = "revision")]
    pub member_revision: u64,

    #[serde(default)]
    pub creation_time: i64,

    #[serde(default)]
    pub last_authorized_time: i64,

    #[serde(default)]
    pub last_deauthorized_time: i64,

    #[serde(default)]
    pub last_authorized_credential_type: Option<String>,

    #[serde(default)]
    pub last_authorized_credential: Option<String>,

    /// Granted capability ids, ascending
    #[serde(default)]
    pub capabilities: Vec<u32>,

    /// Tag values by tag id
    #[serde(
        default,
        serialize_with = "tag_pair_list",
        deserialize_with = "lenient_tag_list"
    )]
    pub tags: BTreeMap<u32, u32>,
}

impl MemberRecord {
    /// New record; authorized by default only on public networks
    pub fn new(nwid: NetworkId, id: Address, network_private: bool, now: i64) -> Self {
        Self {
            id,
            nwid,
            identity: None,
            authorized: !network_private,
            active_bridge: false,
            no_auto_assign_ips: false,
            name: String::new(),
            ip_assignments: Vec::new(),
            history: Vec::new(),
            member_revision: 0,
            creation_time: now,
            last_authorized_time: 0,
            last_deauthorized_time: 0,
            last_authorized_credential_type: None,
            last_authorized_credential: None,
            capabilities: Vec::new(),
            tags: BTreeMap::new(),
        }
    }

    /// Grant the network's default capabilities; used on creation
    pub fn grant_default_capabilities(&mut self, network: &NetworkRecord) {
        for cap in network.capabilities.iter().filter(|c| c.default) {
            if let Err(pos) = self.capabilities.binary_search(&cap.id) {
                self.capabilities.insert(pos, cap.id);
            }
        }
    }

    /// Fill in default values for tags the member lacks; true if any changed
    pub fn apply_default_tags(&mut self, network: &NetworkRecord) -> bool {
        let mut changed = false;
        for tag in &network.tags {
            if let Some(value) = tag.default {
                if !self.tags.contains_key(&tag.id) {
                    self.tags.insert(tag.id, value);
                    changed = true;
                }
            }
        }
        changed
    }

    /// Append a request, evicting the oldest beyond `cap`
    pub fn push_history(&mut self, entry: RequestRecord, cap: usize) {
        self.history.push(entry);
        if self.history.len() > cap {
            let excess = self.history.len() - cap;
            self.history.drain(..excess);
        }
    }

    /// Record an authorization state change at `now`
    pub fn set_authorized(&mut self, authorized: bool, credential_type: &str, now: i64) {
        if authorized == self.authorized {
            return;
        }
        self.authorized = authorized;
        if authorized {
            self.last_authorized_time = now;
            self.last_authorized_credential_type = Some(credential_type.to_string());
        } else {
            self.last_deauthorized_time = now;
        }
    }
}

/// One entry of a member's request history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestRecord {
    pub ts: i64,
    pub authorized: bool,
    #[serde(default)]
    pub client_major_version: Option<u32>,
    #[serde(default)]
    pub client_minor_version: Option<u32>,
    #[serde(default)]
    pub client_revision: Option<u32>,
    #[serde(default)]
    pub protocol_version: Option<u32>,
    #[serde(default)]
    pub from_addr: Option<SocketAddr>,
}

/// Metadata a member attaches to its config request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientMetadata {
    #[serde(default)]
    pub major_version: Option<u32>,
    #[serde(default)]
    pub minor_version: Option<u32>,
    #[serde(default)]
    pub revision: Option<u32>,
    #[serde(default)]
    pub protocol_version: Option<u32>,
    /// Flow-rules engine revision; 0 or absent means the client predates rules
    #[serde(default)]
    pub rules_engine_rev: Option<u32>,
    /// Presented credential, e.g. `token:<secret>`
    #[serde(default)]
    pub auth: Option<String>,
}

impl ClientMetadata {
    /// Token from a `token:` credential
    pub fn auth_token(&self) -> Option<&str> {
        self.auth
            .as_deref()
            .and_then(|a| a.strip_prefix("token:"))
            .filter(|t| !t.is_empty())
    }

    /// Clients that report no rules engine revision predate flow rules
    pub fn supports_rules(&self) -> bool {
        self.rules_engine_rev.unwrap_or(0) > 0
    }
}

/// Parse an address optionally followed by `/bits`, which is discarded
pub fn parse_ip_lenient(s: &str) -> Option<IpAddr> {
    let addr = s.split_once('/').map_or(s, |(addr, _)| addr);
    addr.trim().parse().ok()
}

/// A 32-bit id or value given as a number or numeric string, masked to 32 bits
pub fn lenient_u32(value: &serde_json::Value) -> Option<u32> {
    let n = match value {
        serde_json::Value::Number(n) => n.as_u64()?,
        serde_json::Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    Some((n & 0xffff_ffff) as u32)
}

/// `[[id, value], ...]` pairs; malformed pairs are dropped, later ids win
pub fn parse_tag_pairs(raw: &[serde_json::Value]) -> BTreeMap<u32, u32> {
    raw.iter()
        .filter_map(|pair| match pair.as_array().map(Vec::as_slice) {
            Some([id, value]) => Some((lenient_u32(id)?, lenient_u32(value)?)),
            _ => None,
        })
        .collect()
}

fn tag_pair_list<S: Serializer>(tags: &BTreeMap<u32, u32>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(tags.iter().map(|(id, value)| [*id, *value]))
}

fn lenient_tag_list<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<BTreeMap<u32, u32>, D::Error> {
    let raw: Vec<serde_json::Value> = Vec::deserialize(deserializer)?;
    Ok(parse_tag_pairs(&raw))
}

fn lenient_ip_list<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<IpAddr>, D::Error> {
    let raw: Vec<serde_json::Value> = Vec::deserialize(deserializer)?;
    Ok(raw
        .iter()
        .filter_map(|v| v.as_str())
        .filter_map(parse_ip_lenient)
        .collect())
}
