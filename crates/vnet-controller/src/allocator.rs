//! Managed address assignment
//!
//! Produces the static addresses pushed to a member from three sources,
//! in order:
//! 1. addresses derived from (network, member): rfc4193 and 6plane
//! 2. addresses already stored on the member that fall in an on-link route
//! 3. a fresh address drawn from the network's assignment pools
//!
//! Step 3 runs per family only when that family's `zt` mode is on and
//! step 2 found nothing for it. The caller must hold the network's
//! allocation lock from computing the allocated set until the member
//! record with the new claim is written.

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use rand::RngCore;
use tracing::{debug, warn};

use crate::address::{Address, NetworkId};
use crate::model::{IpAssignmentPool, MemberRecord, NetworkRecord, Route};

/// Prefix length of an rfc4193 address
pub const RFC4193_PREFIX_LEN: u8 = 88;

/// Prefix length of a 6plane address
pub const SIX_PLANE_PREFIX_LEN: u8 = 40;

/// Pool ranges at least this wide get the member address embedded
const EMBED_MIN_SPAN: u128 = 0xff_ffff_ffff;

/// `fd` + network ID + `9993` + node address, /88
pub fn rfc4193_address(network: NetworkId, member: Address) -> Ipv6Net {
    let mut b = [0u8; 16];
    b[0] = 0xfd;
    b[1..9].copy_from_slice(&network.to_u64().to_be_bytes());
    b[9] = 0x99;
    b[10] = 0x93;
    b[11..16].copy_from_slice(&member.to_bytes());
    // prefix is a constant below 128
    Ipv6Net::new(Ipv6Addr::from(b), RFC4193_PREFIX_LEN).unwrap_or_default()
}

/// `fc` + folded network ID + node address + `::1`, /40
pub fn six_plane_address(network: NetworkId, member: Address) -> Ipv6Net {
    let nwid = network.to_u64();
    let folded = ((nwid ^ (nwid >> 32)) & 0xffff_ffff) as u32;
    let mut b = [0u8; 16];
    b[0] = 0xfc;
    b[1..5].copy_from_slice(&folded.to_be_bytes());
    b[5..10].copy_from_slice(&member.to_bytes());
    b[15] = 0x01;
    Ipv6Net::new(Ipv6Addr::from(b), SIX_PLANE_PREFIX_LEN).unwrap_or_default()
}

/// Every address held by any member of the network
pub fn allocated_ips<'a>(members: impl IntoIterator<Item = &'a MemberRecord>) -> HashSet<IpAddr> {
    members
        .into_iter()
        .flat_map(|m| m.ip_assignments.iter().copied())
        .collect()
}

/// Result of address assignment for one member
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Assignment {
    /// Addresses to push, with route-derived prefix lengths
    pub static_ips: Vec<IpNet>,
    /// Target should emulate neighbor discovery for derived IPv6 addresses
    pub ndp_emulation: bool,
    /// Addresses newly taken from pools; must be appended to the member
    pub claimed: Vec<IpAddr>,
}

impl Assignment {
    fn push(&mut self, ip: IpNet, cap: usize) {
        if self.static_ips.len() < cap {
            self.static_ips.push(ip);
        }
    }
}

/// Assigns addresses within one network
pub struct AddressAllocator<'a> {
    network: &'a NetworkRecord,
    routes: &'a [Route],
    allocated: &'a HashSet<IpAddr>,
    trial_budget: u32,
    max_static_ips: usize,
}

impl<'a> AddressAllocator<'a> {
    /// `routes` are the validated routes being pushed with the config
    pub fn new(
        network: &'a NetworkRecord,
        routes: &'a [Route],
        allocated: &'a HashSet<IpAddr>,
        trial_budget: u32,
        max_static_ips: usize,
    ) -> Self {
        Self {
            network,
            routes,
            allocated,
            trial_budget,
            max_static_ips,
        }
    }

    pub fn assign(
        &self,
        member: &MemberRecord,
        is_active_bridge: bool,
        rng: &mut dyn RngCore,
    ) -> Assignment {
        let mut out = Assignment::default();
        let cap = self.max_static_ips;
        let v6_mode = self.network.v6_assign_mode;
        let auto = !member.no_auto_assign_ips;

        if auto && v6_mode.rfc4193 {
            out.push(IpNet::V6(rfc4193_address(self.network.id, member.id)), cap);
            out.ndp_emulation = true;
        }
        if auto && v6_mode.six_plane {
            out.push(IpNet::V6(six_plane_address(self.network.id, member.id)), cap);
            out.ndp_emulation = true;
        }

        let mut have_v4 = false;
        let mut have_v6 = false;
        for ip in &member.ip_assignments {
            if let Some(bits) = self.on_link_prefix(*ip) {
                match IpNet::new(*ip, bits) {
                    Ok(net) => out.push(net, cap),
                    Err(e) => warn!(ip = %ip, error = %e, "Skipping stored assignment"),
                }
                match ip {
                    IpAddr::V4(_) => have_v4 = true,
                    IpAddr::V6(_) => have_v6 = true,
                }
            }
        }

        if !auto || is_active_bridge {
            return out;
        }

        if v6_mode.zt && !have_v6 {
            if let Some(net) = self.pick_v6(member, rng) {
                debug!(network_id = %self.network.id, member = %member.id, ip = %net, "Assigned IPv6 address");
                out.claimed.push(net.addr());
                out.push(net, cap);
            }
        }
        if self.network.v4_assign_mode.zt && !have_v4 {
            if let Some(net) = self.pick_v4(member) {
                debug!(network_id = %self.network.id, member = %member.id, ip = %net, "Assigned IPv4 address");
                out.claimed.push(net.addr());
                out.push(net, cap);
            }
        }
        out
    }

    /// Longest prefix of an on-link route containing `ip`
    fn on_link_prefix(&self, ip: IpAddr) -> Option<u8> {
        self.routes
            .iter()
            .filter(|r| r.is_on_link() && r.target.contains(&ip))
            .map(|r| r.target.prefix_len())
            .max()
    }

    fn claimable(&self, ip: IpAddr, member: &MemberRecord) -> Option<u8> {
        let bits = self.on_link_prefix(ip).filter(|bits| *bits > 0)?;
        if self.allocated.contains(&ip) || member.ip_assignments.contains(&ip) {
            return None;
        }
        Some(bits)
    }

    fn pools(&self) -> impl Iterator<Item = &IpAssignmentPool> {
        self.network.ip_assignment_pools.iter()
    }

    fn pick_v6(&self, member: &MemberRecord, rng: &mut dyn RngCore) -> Option<IpNet> {
        for pool in self.pools() {
            let (IpAddr::V6(start), IpAddr::V6(end)) = (pool.ip_range_start, pool.ip_range_end)
            else {
                continue;
            };
            let (s, e) = (u128::from(start), u128::from(end));
            if e < s {
                continue;
            }
            let span = e - s;

            for trial in 0..self.trial_budget {
                let candidate = if trial == 0 && span >= EMBED_MIN_SPAN {
                    s + u128::from(member.id.to_u64())
                } else if span > 0 {
                    s + random_u128(rng) % span
                } else {
                    s
                };
                let ip = IpAddr::V6(Ipv6Addr::from(candidate));
                if let Some(bits) = self.claimable(ip, member) {
                    return IpNet::new(ip, bits).ok();
                }
            }
        }
        None
    }

    fn pick_v4(&self, member: &MemberRecord) -> Option<IpNet> {
        for pool in self.pools() {
            let (IpAddr::V4(start), IpAddr::V4(end)) = (pool.ip_range_start, pool.ip_range_end)
            else {
                continue;
            };
            let (s, e) = (u32::from(start), u32::from(end));
            if e < s || s == 0 {
                continue;
            }
            let span = e - s;
            // never more candidates than the range holds
            let trials = u64::from(self.trial_budget).min(u64::from(span) + 1);
            let mut counter = (member.id.to_u64() & 0xffff_ffff) as u32;

            for _ in 0..trials {
                let candidate = if span > 0 { s + counter % span } else { s };
                counter = counter.wrapping_add(1);
                if candidate & 0xff == 0xff {
                    continue;
                }
                let ip = IpAddr::V4(Ipv4Addr::from(candidate));
                if let Some(bits) = self.claimable(ip, member) {
                    return Ipv4Net::new(Ipv4Addr::from(candidate), bits)
                        .ok()
                        .map(IpNet::V4);
                }
            }
        }
        None
    }
}

fn random_u128(rng: &mut dyn RngCore) -> u128 {
    (u128::from(rng.next_u64()) << 64) | u128::from(rng.next_u64())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const NWID: NetworkId = NetworkId::new(0x8056c2e21c000001);

    fn network_with_pool(start: &str, end: &str, route: &str) -> NetworkRecord {
        let mut n = NetworkRecord::new(NWID, 0);
        n.ip_assignment_pools
            .push(IpAssignmentPool::new(start.parse().unwrap(), end.parse().unwrap()));
        n.routes.push(Route::on_link(route.parse().unwrap()));
        n.v4_assign_mode.zt = true;
        n.v6_assign_mode.zt = true;
        n
    }

    fn member(addr: u64) -> MemberRecord {
        MemberRecord::new(NWID, Address::new(addr), true, 0)
    }

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    #[test]
    fn test_rfc4193_layout() {
        let net = rfc4193_address(NWID, Address::new(0x89e92ceee5));
        assert_eq!(net.prefix_len(), 88);
        assert_eq!(net.addr().to_string(), "fd80:56c2:e21c:0:199:9389:e92c:eee5");
    }

    #[test]
    fn test_six_plane_layout() {
        let net = six_plane_address(NWID, Address::new(0x89e92ceee5));
        assert_eq!(net.prefix_len(), 40);
        // 0x8056c2e2 ^ 0x1c000001 = 0x9c56c2e3
        assert_eq!(net.addr().to_string(), "fc9c:56c2:e389:e92c:eee5::1");
    }

    #[test]
    fn test_v4_start_offset_comes_from_address() {
        let network = network_with_pool("10.0.0.1", "10.0.0.254", "10.0.0.0/24");
        let routes = network.routes.clone();
        let allocated = HashSet::new();
        let alloc = AddressAllocator::new(&network, &routes, &allocated, 1000, 32);

        // span 253, 0x105 % 253 = 8
        let out = alloc.assign(&member(0x105), false, &mut rng());
        assert_eq!(out.static_ips, vec!["10.0.0.9/24".parse::<IpNet>().unwrap()]);
        assert_eq!(out.claimed, vec!["10.0.0.9".parse::<IpAddr>().unwrap()]);
    }

    #[test]
    fn test_v4_skips_taken_addresses() {
        let network = network_with_pool("10.0.0.1", "10.0.0.254", "10.0.0.0/24");
        let routes = network.routes.clone();
        let allocated: HashSet<IpAddr> = ["10.0.0.9", "10.0.0.10"]
            .iter()
            .map(|s| s.parse().unwrap())
            .collect();
        let alloc = AddressAllocator::new(&network, &routes, &allocated, 1000, 32);

        let out = alloc.assign(&member(0x105), false, &mut rng());
        assert_eq!(out.claimed, vec!["10.0.0.11".parse::<IpAddr>().unwrap()]);
    }

    #[test]
    fn test_v4_never_assigns_broadcast_looking_addresses() {
        let network = network_with_pool("10.0.0.250", "10.0.1.5", "10.0.0.0/16");
        let routes = network.routes.clone();
        let mut allocated = HashSet::new();
        for addr in 0..64u64 {
            let alloc = AddressAllocator::new(&network, &routes, &allocated, 1000, 32);
            let out = alloc.assign(&member(addr + 1), false, &mut rng());
            for ip in &out.claimed {
                if let IpAddr::V4(v4) = ip {
                    assert_ne!(v4.octets()[3], 255);
                }
            }
            allocated.extend(out.claimed);
        }
    }

    #[test]
    fn test_v4_requires_on_link_route() {
        let mut network = network_with_pool("10.0.0.1", "10.0.0.254", "10.0.0.0/24");
        network.routes[0].via = Some("10.0.0.254".parse().unwrap());
        let routes = network.routes.clone();
        let allocated = HashSet::new();
        let alloc = AddressAllocator::new(&network, &routes, &allocated, 1000, 32);
        assert!(alloc.assign(&member(1), false, &mut rng()).static_ips.is_empty());
    }

    #[test]
    fn test_pool_exhaustion_degrades_silently() {
        let network = network_with_pool("10.0.0.1", "10.0.0.3", "10.0.0.0/24");
        let routes = network.routes.clone();
        let allocated: HashSet<IpAddr> = ["10.0.0.1", "10.0.0.2", "10.0.0.3"]
            .iter()
            .map(|s| s.parse().unwrap())
            .collect();
        let alloc = AddressAllocator::new(&network, &routes, &allocated, 1000, 32);
        let out = alloc.assign(&member(1), false, &mut rng());
        assert!(out.static_ips.is_empty());
        assert!(out.claimed.is_empty());
    }

    #[test]
    fn test_sequential_members_get_distinct_addresses() {
        // span of 8 usable candidates: .1 through .8
        let network = network_with_pool("10.0.0.1", "10.0.0.9", "10.0.0.0/24");
        let routes = network.routes.clone();
        let mut allocated = HashSet::new();
        for addr in 1..=8u64 {
            let alloc = AddressAllocator::new(&network, &routes, &allocated, 1000, 32);
            let out = alloc.assign(&member(addr * 977), false, &mut rng());
            assert_eq!(out.claimed.len(), 1, "member {addr}");
            assert!(allocated.insert(out.claimed[0]));
        }
        assert_eq!(allocated.len(), 8);
    }

    #[test]
    fn test_existing_assignment_takes_route_prefix() {
        let mut network = network_with_pool("10.0.0.1", "10.0.0.254", "10.0.0.0/24");
        network.routes.push(Route::on_link("10.0.0.0/16".parse().unwrap()));
        let routes = network.routes.clone();
        let allocated = HashSet::new();
        let alloc = AddressAllocator::new(&network, &routes, &allocated, 1000, 32);

        let mut m = member(1);
        m.ip_assignments.push("10.0.0.77".parse().unwrap());
        let out = alloc.assign(&m, false, &mut rng());
        // longest matching on-link route wins, and no new v4 is drawn
        assert_eq!(out.static_ips, vec!["10.0.0.77/24".parse::<IpNet>().unwrap()]);
        assert!(out.claimed.is_empty());
    }

    #[test]
    fn test_existing_assignment_outside_routes_is_dropped() {
        let network = network_with_pool("10.0.0.1", "10.0.0.254", "10.0.0.0/24");
        let routes = network.routes.clone();
        let allocated = HashSet::new();
        let alloc = AddressAllocator::new(&network, &routes, &allocated, 1000, 32);

        let mut m = member(0x105);
        m.ip_assignments.push("192.168.1.1".parse().unwrap());
        let out = alloc.assign(&m, false, &mut rng());
        assert_eq!(out.static_ips, vec!["10.0.0.9/24".parse::<IpNet>().unwrap()]);
    }

    #[test]
    fn test_v6_embeds_member_address_in_wide_range() {
        let mut network = network_with_pool("fd00::", "fd00::ffff:ffff:ffff:ffff", "fd00::/64");
        network.v4_assign_mode.zt = false;
        let routes = network.routes.clone();
        let allocated = HashSet::new();
        let alloc = AddressAllocator::new(&network, &routes, &allocated, 1000, 32);

        let out = alloc.assign(&member(0x89e92ceee5), false, &mut rng());
        assert_eq!(out.static_ips, vec!["fd00::89:e92c:eee5/64".parse::<IpNet>().unwrap()]);
    }

    #[test]
    fn test_v6_random_draw_in_narrow_range() {
        let mut network = network_with_pool("fd00::100", "fd00::1ff", "fd00::/64");
        network.v4_assign_mode.zt = false;
        let routes = network.routes.clone();
        let allocated = HashSet::new();
        let alloc = AddressAllocator::new(&network, &routes, &allocated, 1000, 32);

        let out = alloc.assign(&member(1), false, &mut rng());
        assert_eq!(out.claimed.len(), 1);
        let ip = match out.claimed[0] {
            IpAddr::V6(v6) => u128::from(v6),
            IpAddr::V4(_) => panic!("expected IPv6"),
        };
        let start = u128::from("fd00::100".parse::<Ipv6Addr>().unwrap());
        assert!(ip >= start && ip < start + 0xff);
    }

    #[test]
    fn test_derived_v6_sets_ndp_emulation() {
        let mut network = NetworkRecord::new(NWID, 0);
        network.v6_assign_mode.rfc4193 = true;
        network.v6_assign_mode.six_plane = true;
        let allocated = HashSet::new();
        let alloc = AddressAllocator::new(&network, &[], &allocated, 1000, 32);

        let out = alloc.assign(&member(0x89e92ceee5), false, &mut rng());
        assert!(out.ndp_emulation);
        assert_eq!(out.static_ips.len(), 2);
        assert!(out.claimed.is_empty());
    }

    #[test]
    fn test_active_bridge_gets_no_pool_address() {
        let network = network_with_pool("10.0.0.1", "10.0.0.254", "10.0.0.0/24");
        let routes = network.routes.clone();
        let allocated = HashSet::new();
        let alloc = AddressAllocator::new(&network, &routes, &allocated, 1000, 32);
        assert!(alloc.assign(&member(1), true, &mut rng()).claimed.is_empty());
    }

    #[test]
    fn test_no_auto_assign_suppresses_everything_automatic() {
        let mut network = network_with_pool("10.0.0.1", "10.0.0.254", "10.0.0.0/24");
        network.v6_assign_mode.rfc4193 = true;
        let routes = network.routes.clone();
        let allocated = HashSet::new();
        let alloc = AddressAllocator::new(&network, &routes, &allocated, 1000, 32);

        let mut m = member(1);
        m.no_auto_assign_ips = true;
        m.ip_assignments.push("10.0.0.5".parse().unwrap());
        let out = alloc.assign(&m, false, &mut rng());
        assert_eq!(out.static_ips, vec!["10.0.0.5/24".parse::<IpNet>().unwrap()]);
        assert!(!out.ndp_emulation);
    }

    #[test]
    fn test_static_ip_cap() {
        let mut network = network_with_pool("10.0.0.1", "10.0.0.254", "10.0.0.0/24");
        network.v6_assign_mode.rfc4193 = true;
        network.v6_assign_mode.six_plane = true;
        let routes = network.routes.clone();
        let allocated = HashSet::new();
        let alloc = AddressAllocator::new(&network, &routes, &allocated, 1000, 2);

        let out = alloc.assign(&member(1), false, &mut rng());
        assert_eq!(out.static_ips.len(), 2);
        // the pool address is still claimed even though it did not fit
        assert_eq!(out.claimed.len(), 1);
    }

    #[test]
    fn test_allocated_ips_collects_all_members() {
        let mut a = member(1);
        a.ip_assignments.push("10.0.0.1".parse().unwrap());
        let mut b = member(2);
        b.ip_assignments.push("10.0.0.2".parse().unwrap());
        b.ip_assignments.push("fd00::2".parse().unwrap());
        assert_eq!(allocated_ips([&a, &b]).len(), 3);
    }
}
