//! Per-member network configuration assembly
//!
//! Turns a network record plus an authorized member into the configuration
//! the member runs with: rules, routes, managed addresses, specialists,
//! DNS settings, signed capability and tag credentials and, on private
//! networks, a signed certificate of membership.

use std::collections::HashSet;
use std::net::IpAddr;

use ipnet::IpNet;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::address::{Address, NetworkId};
use crate::allocator::AddressAllocator;
use crate::certificate::CertificateOfMembership;
use crate::config::ControllerConfig;
use crate::credential::{Capability, Tag};
use crate::error::Result;
use crate::identity::{Identity, Signer};
use crate::model::{ClientMetadata, DnsConfig, MemberRecord, NetworkRecord, Route};
use crate::rules::{self, Rule};

/// Configuration delivered to one member
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkConfig {
    pub network_id: NetworkId,
    pub issued_to: Address,
    pub private: bool,
    /// Issue time, ms since epoch
    pub timestamp: i64,
    pub credential_time_max_delta: i64,
    pub revision: u64,
    pub name: String,
    pub mtu: u32,
    pub multicast_limit: u32,
    pub enable_broadcast: bool,
    pub allow_passive_bridging: bool,
    /// Member should answer neighbor discovery for its derived addresses
    pub ndp_emulation: bool,
    /// Active bridges
    pub specialists: Vec<Address>,
    pub rules: Vec<Rule>,
    pub routes: Vec<Route>,
    pub static_ips: Vec<IpNet>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capabilities: Vec<Capability>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<Tag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns: Option<DnsConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub com: Option<CertificateOfMembership>,
}

impl NetworkConfig {
    /// Rules in the binary table form members consume
    pub fn rule_table(&self) -> Vec<u8> {
        rules::encode_rule_table(&self.rules)
    }
}

/// Builds [`NetworkConfig`]s on behalf of one controller identity
pub struct ConfigCompiler<'a> {
    config: &'a ControllerConfig,
    signer: &'a dyn Signer,
    identity: &'a Identity,
}

impl<'a> ConfigCompiler<'a> {
    pub fn new(config: &'a ControllerConfig, signer: &'a dyn Signer, identity: &'a Identity) -> Self {
        Self {
            config,
            signer,
            identity,
        }
    }

    /// Compile the config for `member`
    ///
    /// Newly claimed pool addresses are appended to `member.ip_assignments`
    /// and missing default tags are added to `member.tags`; the caller
    /// persists the member before releasing the network's allocation lock.
    /// Clients without flow rules get neither capabilities nor tags.
    pub fn compile(
        &self,
        network: &NetworkRecord,
        member: &mut MemberRecord,
        metadata: &ClientMetadata,
        allocated: &HashSet<IpAddr>,
        now: i64,
        rng: &mut dyn RngCore,
    ) -> Result<NetworkConfig> {
        let limits = &self.config.limits;
        let credential_window = self.config.credentials.clamp(network.certificate_timeout_window_size);

        let (rules, capabilities, tags) = if metadata.supports_rules() {
            (
                self.compile_rules(network),
                self.issue_capabilities(network, member, now)?,
                self.issue_tags(network, member, now)?,
            )
        } else {
            debug!(network_id = %network.id, member = %member.id, "Client predates flow rules, sending accept-all");
            (vec![Rule::accept_all()], Vec::new(), Vec::new())
        };

        let routes: Vec<Route> = network
            .routes
            .iter()
            .filter(|r| r.is_consistent())
            .take(limits.max_routes)
            .copied()
            .collect();

        let is_active_bridge = member.active_bridge || network.active_bridges.contains(&member.id);
        let allocator = AddressAllocator::new(
            network,
            &routes,
            allocated,
            self.config.ip_trial_budget,
            limits.max_static_ips,
        );
        let assignment = allocator.assign(member, is_active_bridge, rng);
        member.ip_assignments.extend(assignment.claimed.iter().copied());

        let com = if network.private {
            Some(CertificateOfMembership::issue(
                self.signer,
                self.identity,
                network.id,
                member.id,
                now,
                credential_window,
            )?)
        } else {
            None
        };

        Ok(NetworkConfig {
            network_id: network.id,
            issued_to: member.id,
            private: network.private,
            timestamp: now,
            credential_time_max_delta: credential_window,
            revision: network.revision,
            name: network.name.clone(),
            mtu: self.config.mtu.clamp(network.mtu),
            multicast_limit: network.multicast_limit,
            enable_broadcast: network.enable_broadcast,
            allow_passive_bridging: network.allow_passive_bridging,
            ndp_emulation: assignment.ndp_emulation,
            specialists: network
                .active_bridges
                .iter()
                .copied()
                .take(limits.max_specialists)
                .collect(),
            rules,
            routes,
            static_ips: assignment.static_ips,
            capabilities,
            tags,
            dns: network.dns.as_ref().map(|dns| DnsConfig {
                domain: dns.domain.clone(),
                servers: dns.servers.iter().copied().take(limits.max_dns_servers).collect(),
            }),
            com,
        })
    }

    /// One credential per granted capability the network still defines
    fn issue_capabilities(
        &self,
        network: &NetworkRecord,
        member: &MemberRecord,
        now: i64,
    ) -> Result<Vec<Capability>> {
        let limits = &self.config.limits;
        let mut out = Vec::new();
        for &id in &member.capabilities {
            if out.len() >= limits.max_capabilities {
                warn!(network_id = %network.id, member = %member.id, max = limits.max_capabilities, "Capability list truncated");
                break;
            }
            let Some(definition) = network.capability(id) else {
                continue;
            };
            let rules = definition
                .rules
                .iter()
                .filter_map(|description| rules::decode(description).ok())
                .take(limits.max_capability_rules)
                .collect();
            out.push(Capability::issue(
                self.signer,
                self.identity,
                id,
                network.id,
                member.id,
                now,
                rules,
            )?);
        }
        Ok(out)
    }

    fn issue_tags(
        &self,
        network: &NetworkRecord,
        member: &mut MemberRecord,
        now: i64,
    ) -> Result<Vec<Tag>> {
        if member.apply_default_tags(network) {
            debug!(network_id = %network.id, member = %member.id, "Assigned default tags");
        }
        member
            .tags
            .iter()
            .take(self.config.limits.max_tags)
            .map(|(&id, &value)| {
                Tag::issue(self.signer, self.identity, id, value, network.id, member.id, now)
            })
            .collect()
    }

    fn compile_rules(&self, network: &NetworkRecord) -> Vec<Rule> {
        let mut out = Vec::with_capacity(network.rules.len().min(self.config.limits.max_rules));
        for description in &network.rules {
            if out.len() >= self.config.limits.max_rules {
                warn!(network_id = %network.id, max = self.config.limits.max_rules, "Rule list truncated");
                break;
            }
            match rules::decode(description) {
                Ok(rule) => out.push(rule),
                Err(e) => warn!(network_id = %network.id, error = %e, "Skipping undecodable rule"),
            }
        }
        if out.is_empty() {
            out.push(Rule::accept_all());
        }
        out
    }
}
