//! JSON rule descriptions
//!
//! Descriptions are objects with a symbolic `type`, optional `not` and `or`
//! booleans, and type-specific fields. Decoding is permissive about number
//! encodings; encoding always produces the canonical form, so
//! `decode(&encode(&r)) == r` for every rule.

use std::net::{Ipv4Addr, Ipv6Addr};

use ipnet::{Ipv4Net, Ipv6Net};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Map, Value};

use super::{Forward, Rule, RuleKind, TagOp};
use crate::address::{Address, Mac};
use crate::error::RuleError;

/// Parse a rule description
pub fn decode(description: &Value) -> Result<Rule, RuleError> {
    let obj = description.as_object().ok_or(RuleError::NotAnObject)?;
    let type_name = match obj.get("type") {
        Some(Value::String(s)) => s.as_str(),
        Some(other) => return Err(RuleError::UnknownRuleType(other.to_string())),
        None => return Err(RuleError::UnknownRuleType(String::new())),
    };

    let kind = match type_name {
        "ACTION_DROP" => RuleKind::Drop,
        "ACTION_ACCEPT" => RuleKind::Accept,
        "ACTION_TEE" => RuleKind::Tee(forward(obj)?),
        "ACTION_WATCH" => RuleKind::Watch(forward(obj)?),
        "ACTION_REDIRECT" => RuleKind::Redirect {
            address: address(obj, "address")?,
            flags: uint(obj, "flags", 0)? as u32,
        },
        "ACTION_BREAK" => RuleKind::Break,
        "MATCH_SOURCE_ZEROTIER_ADDRESS" => RuleKind::SourceAddress(address(obj, "zt")?),
        "MATCH_DEST_ZEROTIER_ADDRESS" => RuleKind::DestAddress(address(obj, "zt")?),
        "MATCH_VLAN_ID" => RuleKind::VlanId(uint(obj, "vlanId", 0)? as u16),
        "MATCH_VLAN_PCP" => RuleKind::VlanPcp(uint(obj, "vlanPcp", 0)? as u8),
        "MATCH_VLAN_DEI" => RuleKind::VlanDei(uint(obj, "vlanDei", 0)? as u8),
        "MATCH_MAC_SOURCE" => RuleKind::MacSource(mac(obj)?),
        "MATCH_MAC_DEST" => RuleKind::MacDest(mac(obj)?),
        "MATCH_IPV4_SOURCE" => RuleKind::Ipv4Source(ipv4(obj)?),
        "MATCH_IPV4_DEST" => RuleKind::Ipv4Dest(ipv4(obj)?),
        "MATCH_IPV6_SOURCE" => RuleKind::Ipv6Source(ipv6(obj)?),
        "MATCH_IPV6_DEST" => RuleKind::Ipv6Dest(ipv6(obj)?),
        "MATCH_IP_TOS" => RuleKind::IpTos {
            mask: uint(obj, "mask", 0)? as u8,
            start: uint(obj, "start", 0)? as u8,
            end: uint(obj, "end", 0)? as u8,
        },
        "MATCH_IP_PROTOCOL" => RuleKind::IpProtocol(uint(obj, "ipProtocol", 0)? as u8),
        "MATCH_ETHERTYPE" => RuleKind::EtherType(uint(obj, "etherType", 0)? as u16),
        "MATCH_ICMP" => RuleKind::Icmp {
            icmp_type: uint(obj, "icmpType", 0)? as u8,
            code: match obj.get("icmpCode") {
                None | Some(Value::Null) => None,
                Some(_) => Some(uint(obj, "icmpCode", 0)? as u8),
            },
        },
        "MATCH_IP_SOURCE_PORT_RANGE" => {
            let (start, end) = range16(obj)?;
            RuleKind::SourcePortRange { start, end }
        }
        "MATCH_IP_DEST_PORT_RANGE" => {
            let (start, end) = range16(obj)?;
            RuleKind::DestPortRange { start, end }
        }
        "MATCH_CHARACTERISTICS" => RuleKind::Characteristics {
            mask: hex_or_number(obj, "mask")?,
            value: hex_or_number(obj, "value")?,
        },
        "MATCH_FRAME_SIZE_RANGE" => {
            let (start, end) = range16(obj)?;
            RuleKind::FrameSizeRange { start, end }
        }
        "MATCH_RANDOM" => RuleKind::Random {
            probability: uint(obj, "probability", 0)? as u32,
        },
        other => match TagOp::from_type_name(other) {
            Some(op) => RuleKind::Tags {
                op,
                id: uint(obj, "id", 0)? as u32,
                value: uint(obj, "value", 0)? as u32,
            },
            None => return Err(RuleError::UnknownRuleType(other.to_string())),
        },
    };

    Ok(Rule {
        kind,
        negate: boolean(obj, "not")?,
        or: boolean(obj, "or")?,
    })
}

/// Render a rule as its canonical description
pub fn encode(rule: &Rule) -> Value {
    let mut obj = match &rule.kind {
        RuleKind::Drop | RuleKind::Accept | RuleKind::Break => Map::new(),
        RuleKind::Tee(fwd) | RuleKind::Watch(fwd) => object(json!({
            "address": fwd.address.to_string(),
            "flags": fwd.flags,
            "length": fwd.length,
        })),
        RuleKind::Redirect { address, flags } => object(json!({
            "address": address.to_string(),
            "flags": flags,
        })),
        RuleKind::SourceAddress(zt) | RuleKind::DestAddress(zt) => {
            object(json!({ "zt": zt.to_string() }))
        }
        RuleKind::VlanId(id) => object(json!({ "vlanId": id })),
        RuleKind::VlanPcp(pcp) => object(json!({ "vlanPcp": pcp })),
        RuleKind::VlanDei(dei) => object(json!({ "vlanDei": dei })),
        RuleKind::MacSource(mac) | RuleKind::MacDest(mac) => {
            object(json!({ "mac": mac.to_string() }))
        }
        RuleKind::Ipv4Source(net) | RuleKind::Ipv4Dest(net) => {
            object(json!({ "ip": net.to_string() }))
        }
        RuleKind::Ipv6Source(net) | RuleKind::Ipv6Dest(net) => {
            object(json!({ "ip": net.to_string() }))
        }
        RuleKind::IpTos { mask, start, end } => object(json!({
            "mask": mask,
            "start": start,
            "end": end,
        })),
        RuleKind::IpProtocol(proto) => object(json!({ "ipProtocol": proto })),
        RuleKind::EtherType(et) => object(json!({ "etherType": et })),
        RuleKind::Icmp { icmp_type, code } => object(json!({
            "icmpType": icmp_type,
            "icmpCode": code,
        })),
        RuleKind::SourcePortRange { start, end }
        | RuleKind::DestPortRange { start, end }
        | RuleKind::FrameSizeRange { start, end } => object(json!({
            "start": start,
            "end": end,
        })),
        RuleKind::Characteristics { mask, value } => object(json!({
            "mask": format!("{mask:016x}"),
            "value": format!("{value:016x}"),
        })),
        RuleKind::Random { probability } => object(json!({ "probability": probability })),
        RuleKind::Tags { id, value, .. } => object(json!({ "id": id, "value": value })),
    };

    obj.insert("type".to_string(), Value::from(rule.kind.type_name()));
    obj.insert("not".to_string(), Value::Bool(rule.negate));
    obj.insert("or".to_string(), Value::Bool(rule.or));
    Value::Object(obj)
}

/// Decode and re-encode, returning the canonical form of a description
pub fn normalize(description: &Value) -> Result<Value, RuleError> {
    decode(description).map(|rule| encode(&rule))
}

impl Serialize for Rule {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        encode(self).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Rule {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        decode(&value).map_err(D::Error::custom)
    }
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> RuleError {
    RuleError::InvalidField {
        field,
        reason: reason.into(),
    }
}

/// Unsigned integer field; callers truncate to the field's native width.
/// Accepts JSON numbers and decimal strings.
fn uint(obj: &Map<String, Value>, field: &'static str, default: u64) -> Result<u64, RuleError> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(default),
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_i64().map(|i| i as u64))
            .or_else(|| n.as_f64().map(|f| f as u64))
            .ok_or_else(|| invalid(field, n.to_string())),
        Some(Value::String(s)) => s
            .trim()
            .parse::<u64>()
            .map_err(|_| invalid(field, format!("'{s}' is not a decimal number"))),
        Some(Value::Bool(b)) => Ok(u64::from(*b)),
        Some(other) => Err(invalid(field, format!("unexpected {other}"))),
    }
}

/// 64-bit mask/value field: a JSON number or a hex string
fn hex_or_number(obj: &Map<String, Value>, field: &'static str) -> Result<u64, RuleError> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(0),
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_i64().map(|i| i as u64))
            .ok_or_else(|| invalid(field, n.to_string())),
        Some(Value::String(s)) => {
            let digits = s.trim().trim_start_matches("0x");
            if digits.is_empty() {
                return Ok(0);
            }
            u64::from_str_radix(digits, 16)
                .map_err(|_| invalid(field, format!("'{s}' is not hex")))
        }
        Some(other) => Err(invalid(field, format!("unexpected {other}"))),
    }
}

fn boolean(obj: &Map<String, Value>, field: &'static str) -> Result<bool, RuleError> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(false),
        Some(Value::Bool(b)) => Ok(*b),
        Some(Value::Number(n)) => Ok(n.as_f64().is_some_and(|f| f != 0.0)),
        Some(Value::String(s)) => match s.trim() {
            "true" | "1" => Ok(true),
            "false" | "0" | "" => Ok(false),
            _ => Err(invalid(field, format!("'{s}' is not a boolean"))),
        },
        Some(other) => Err(invalid(field, format!("unexpected {other}"))),
    }
}

fn address(obj: &Map<String, Value>, field: &'static str) -> Result<Address, RuleError> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(Address::default()),
        Some(Value::String(s)) => s
            .parse()
            .map_err(|e: crate::address::ParseAddressError| invalid(field, e.to_string())),
        Some(other) => Err(invalid(field, format!("expected hex string, got {other}"))),
    }
}

fn forward(obj: &Map<String, Value>) -> Result<Forward, RuleError> {
    Ok(Forward {
        address: address(obj, "address")?,
        flags: uint(obj, "flags", 0)? as u32,
        length: uint(obj, "length", 0)? as u16,
    })
}

fn mac(obj: &Map<String, Value>) -> Result<Mac, RuleError> {
    match obj.get("mac") {
        None | Some(Value::Null) => Ok(Mac::default()),
        Some(Value::String(s)) => s.parse().map_err(|_| invalid("mac", s.clone())),
        Some(other) => Err(invalid("mac", other.to_string())),
    }
}

/// End defaults to start when absent
fn range16(obj: &Map<String, Value>) -> Result<(u16, u16), RuleError> {
    let start = uint(obj, "start", 0)? as u16;
    let end = uint(obj, "end", u64::from(start))? as u16;
    Ok((start, end))
}

/// Split `addr[/bits]`; a bare address is a host route
fn split_cidr(s: &str) -> (&str, Option<&str>) {
    match s.split_once('/') {
        Some((addr, bits)) => (addr.trim(), Some(bits.trim())),
        None => (s.trim(), None),
    }
}

fn prefix_bits(bits: Option<&str>, max: u8) -> Result<u8, RuleError> {
    match bits {
        None => Ok(max),
        Some(b) => b
            .parse::<u32>()
            .map(|n| n.min(u32::from(max)) as u8)
            .map_err(|_| invalid("ip", format!("bad prefix length '{b}'"))),
    }
}

fn ipv4(obj: &Map<String, Value>) -> Result<Ipv4Net, RuleError> {
    let text = match obj.get("ip") {
        None | Some(Value::Null) => "0.0.0.0/0",
        Some(Value::String(s)) => s.as_str(),
        Some(other) => return Err(invalid("ip", other.to_string())),
    };
    let (addr, bits) = split_cidr(text);
    let addr: Ipv4Addr = addr
        .parse()
        .map_err(|_| invalid("ip", format!("'{text}' is not an IPv4 address")))?;
    Ipv4Net::new(addr, prefix_bits(bits, 32)?).map_err(|e| invalid("ip", e.to_string()))
}

fn ipv6(obj: &Map<String, Value>) -> Result<Ipv6Net, RuleError> {
    let text = match obj.get("ip") {
        None | Some(Value::Null) => "::/0",
        Some(Value::String(s)) => s.as_str(),
        Some(other) => return Err(invalid("ip", other.to_string())),
    };
    let (addr, bits) = split_cidr(text);
    let addr: Ipv6Addr = addr
        .parse()
        .map_err(|_| invalid("ip", format!("'{text}' is not an IPv6 address")))?;
    Ipv6Net::new(addr, prefix_bits(bits, 128)?).map_err(|e| invalid("ip", e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::fixtures;

    #[test]
    fn test_round_trip_every_kind() {
        for rule in fixtures::every_kind() {
            let encoded = encode(&rule);
            assert_eq!(decode(&encoded).unwrap(), rule, "{encoded}");
        }
    }

    #[test]
    fn test_unknown_type() {
        let err = decode(&json!({ "type": "MATCH_NOTHING" })).unwrap_err();
        assert_eq!(err, RuleError::UnknownRuleType("MATCH_NOTHING".to_string()));
        assert!(matches!(
            decode(&json!({})),
            Err(RuleError::UnknownRuleType(_))
        ));
        assert_eq!(decode(&json!([1, 2])), Err(RuleError::NotAnObject));
    }

    #[test]
    fn test_not_and_or_modifiers() {
        let rule = decode(&json!({ "type": "MATCH_ETHERTYPE", "etherType": 2048, "not": true }))
            .unwrap();
        assert!(rule.negate);
        assert!(!rule.or);
        assert_eq!(rule.kind, RuleKind::EtherType(0x0800));

        let rule = decode(&json!({ "type": "ACTION_DROP", "or": true })).unwrap();
        assert!(rule.or);
        assert!(!rule.negate);
    }

    #[test]
    fn test_numeric_fields_truncate() {
        let rule = decode(&json!({
            "type": "MATCH_IP_DEST_PORT_RANGE",
            "start": 65536 + 80,
            "end": "443",
        }))
        .unwrap();
        assert_eq!(rule.kind, RuleKind::DestPortRange { start: 80, end: 443 });
    }

    #[test]
    fn test_range_end_defaults_to_start() {
        let rule = decode(&json!({ "type": "MATCH_FRAME_SIZE_RANGE", "start": 60 })).unwrap();
        assert_eq!(rule.kind, RuleKind::FrameSizeRange { start: 60, end: 60 });
    }

    #[test]
    fn test_characteristics_accepts_number_or_hex() {
        let from_hex = decode(&json!({
            "type": "MATCH_CHARACTERISTICS",
            "mask": "8000000000000000",
            "value": "0x1",
        }))
        .unwrap();
        let from_num = decode(&json!({
            "type": "MATCH_CHARACTERISTICS",
            "mask": 9223372036854775808u64,
            "value": 1,
        }))
        .unwrap();
        assert_eq!(from_hex, from_num);

        let encoded = encode(&from_hex);
        assert_eq!(encoded["mask"], "8000000000000000");
        assert_eq!(encoded["value"], "0000000000000001");
    }

    #[test]
    fn test_canonical_string_forms() {
        let mac = decode(&json!({ "type": "MATCH_MAC_SOURCE", "mac": "AA-BB-CC-00-11-22" }))
            .unwrap();
        assert_eq!(encode(&mac)["mac"], "aa:bb:cc:00:11:22");

        let zt = decode(&json!({ "type": "MATCH_DEST_ZEROTIER_ADDRESS", "zt": "1a2b" })).unwrap();
        assert_eq!(encode(&zt)["zt"], "0000001a2b");
    }

    #[test]
    fn test_ip_prefix_handling() {
        let host = decode(&json!({ "type": "MATCH_IPV4_SOURCE", "ip": "10.0.0.1" })).unwrap();
        assert_eq!(encode(&host)["ip"], "10.0.0.1/32");

        let clamped = decode(&json!({ "type": "MATCH_IPV6_DEST", "ip": "fd00::/200" })).unwrap();
        assert_eq!(encode(&clamped)["ip"], "fd00::/128");

        assert!(decode(&json!({ "type": "MATCH_IPV4_DEST", "ip": "fd00::1/64" })).is_err());
    }

    #[test]
    fn test_icmp_null_code() {
        let rule = decode(&json!({ "type": "MATCH_ICMP", "icmpType": 3, "icmpCode": null }))
            .unwrap();
        assert_eq!(
            rule.kind,
            RuleKind::Icmp {
                icmp_type: 3,
                code: None
            }
        );
        assert!(encode(&rule)["icmpCode"].is_null());
    }

    #[test]
    fn test_serde_uses_codec() {
        let rules = fixtures::every_kind();
        let json = serde_json::to_string(&rules).unwrap();
        let back: Vec<Rule> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, rules);
    }

    #[test]
    fn test_normalize_fills_modifiers() {
        let normalized = normalize(&json!({ "type": "ACTION_ACCEPT" })).unwrap();
        assert_eq!(
            normalized,
            json!({ "type": "ACTION_ACCEPT", "not": false, "or": false })
        );
    }
}
