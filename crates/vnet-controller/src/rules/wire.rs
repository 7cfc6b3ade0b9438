//! Binary rule table
//!
//! Each record is a type byte (discriminant in the low six bits, `0x80`
//! for negate, `0x40` for or), a payload length byte, and the payload with
//! all integers big-endian.

use std::net::{Ipv4Addr, Ipv6Addr};

use ipnet::{Ipv4Net, Ipv6Net};

use super::{Forward, Rule, RuleKind, TagOp};
use crate::address::{Address, Mac};
use crate::error::RuleError;

pub const NEGATE_BIT: u8 = 0x80;
pub const OR_BIT: u8 = 0x40;
pub const TYPE_MASK: u8 = 0x3f;

const ICMP_HAS_CODE: u8 = 0x01;

/// Serialize a rule list
pub fn encode_rule_table(rules: &[Rule]) -> Vec<u8> {
    let mut out = Vec::with_capacity(rules.len() * 8);
    for rule in rules {
        let mut type_byte = rule.kind.type_code();
        if rule.negate {
            type_byte |= NEGATE_BIT;
        }
        if rule.or {
            type_byte |= OR_BIT;
        }
        let payload = encode_payload(&rule.kind);
        out.push(type_byte);
        out.push(payload.len() as u8);
        out.extend_from_slice(&payload);
    }
    out
}

/// Parse a rule table produced by [`encode_rule_table`]
pub fn decode_rule_table(bytes: &[u8]) -> Result<Vec<Rule>, RuleError> {
    let mut rules = Vec::new();
    let mut pos = 0;
    while pos < bytes.len() {
        if pos + 2 > bytes.len() {
            return Err(RuleError::Truncated(pos));
        }
        let type_byte = bytes[pos];
        let len = bytes[pos + 1] as usize;
        let start = pos + 2;
        let end = start + len;
        if end > bytes.len() {
            return Err(RuleError::Truncated(pos));
        }
        let kind = decode_payload(type_byte & TYPE_MASK, &bytes[start..end])?;
        rules.push(Rule {
            kind,
            negate: type_byte & NEGATE_BIT != 0,
            or: type_byte & OR_BIT != 0,
        });
        pos = end;
    }
    Ok(rules)
}

fn encode_payload(kind: &RuleKind) -> Vec<u8> {
    let mut p = Vec::new();
    match kind {
        RuleKind::Drop | RuleKind::Accept | RuleKind::Break => {}
        RuleKind::Tee(fwd) | RuleKind::Watch(fwd) => {
            p.extend_from_slice(&fwd.address.to_u64().to_be_bytes());
            p.extend_from_slice(&fwd.flags.to_be_bytes());
            p.extend_from_slice(&fwd.length.to_be_bytes());
        }
        RuleKind::Redirect { address, flags } => {
            p.extend_from_slice(&address.to_u64().to_be_bytes());
            p.extend_from_slice(&flags.to_be_bytes());
        }
        RuleKind::SourceAddress(a) | RuleKind::DestAddress(a) => p.extend_from_slice(&a.to_bytes()),
        RuleKind::VlanId(v) | RuleKind::EtherType(v) => p.extend_from_slice(&v.to_be_bytes()),
        RuleKind::VlanPcp(v) | RuleKind::VlanDei(v) | RuleKind::IpProtocol(v) => p.push(*v),
        RuleKind::MacSource(m) | RuleKind::MacDest(m) => p.extend_from_slice(&m.to_bytes()),
        RuleKind::Ipv4Source(net) | RuleKind::Ipv4Dest(net) => {
            p.extend_from_slice(&net.addr().octets());
            p.push(net.prefix_len());
        }
        RuleKind::Ipv6Source(net) | RuleKind::Ipv6Dest(net) => {
            p.extend_from_slice(&net.addr().octets());
            p.push(net.prefix_len());
        }
        RuleKind::IpTos { mask, start, end } => p.extend_from_slice(&[*mask, *start, *end]),
        RuleKind::Icmp { icmp_type, code } => match code {
            Some(code) => p.extend_from_slice(&[*icmp_type, *code, ICMP_HAS_CODE]),
            None => p.extend_from_slice(&[*icmp_type, 0, 0]),
        },
        RuleKind::SourcePortRange { start, end }
        | RuleKind::DestPortRange { start, end }
        | RuleKind::FrameSizeRange { start, end } => {
            p.extend_from_slice(&start.to_be_bytes());
            p.extend_from_slice(&end.to_be_bytes());
        }
        RuleKind::Characteristics { mask, value } => {
            p.extend_from_slice(&mask.to_be_bytes());
            p.extend_from_slice(&value.to_be_bytes());
        }
        RuleKind::Random { probability } => p.extend_from_slice(&probability.to_be_bytes()),
        RuleKind::Tags { id, value, .. } => {
            p.extend_from_slice(&id.to_be_bytes());
            p.extend_from_slice(&value.to_be_bytes());
        }
    }
    p
}

/// Cursor over one record's payload
struct Payload<'a> {
    kind: u8,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Payload<'a> {
    fn new(kind: u8, bytes: &'a [u8], expected: usize) -> Result<Self, RuleError> {
        if bytes.len() != expected {
            return Err(RuleError::BadLength {
                kind,
                len: bytes.len(),
                expected,
            });
        }
        Ok(Self {
            kind,
            bytes,
            pos: 0,
        })
    }

    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.bytes[self.pos..self.pos + N]);
        self.pos += N;
        out
    }

    fn u8(&mut self) -> u8 {
        self.take::<1>()[0]
    }

    fn u16(&mut self) -> u16 {
        u16::from_be_bytes(self.take())
    }

    fn u32(&mut self) -> u32 {
        u32::from_be_bytes(self.take())
    }

    fn u64(&mut self) -> u64 {
        u64::from_be_bytes(self.take())
    }

    fn prefix(&mut self, max: u8) -> Result<u8, RuleError> {
        let bits = self.u8();
        if bits > max {
            return Err(RuleError::InvalidField {
                field: "ip",
                reason: format!("prefix length {bits} in record type {:#04x}", self.kind),
            });
        }
        Ok(bits)
    }
}

fn decode_payload(code: u8, bytes: &[u8]) -> Result<RuleKind, RuleError> {
    let kind = match code {
        0 => {
            Payload::new(code, bytes, 0)?;
            RuleKind::Drop
        }
        1 => {
            Payload::new(code, bytes, 0)?;
            RuleKind::Accept
        }
        2 | 3 => {
            let mut p = Payload::new(code, bytes, 14)?;
            let fwd = Forward {
                address: Address::new(p.u64()),
                flags: p.u32(),
                length: p.u16(),
            };
            if code == 2 {
                RuleKind::Tee(fwd)
            } else {
                RuleKind::Watch(fwd)
            }
        }
        4 => {
            let mut p = Payload::new(code, bytes, 12)?;
            RuleKind::Redirect {
                address: Address::new(p.u64()),
                flags: p.u32(),
            }
        }
        5 => {
            Payload::new(code, bytes, 0)?;
            RuleKind::Break
        }
        24 | 25 => {
            let mut p = Payload::new(code, bytes, Address::LENGTH)?;
            let a = Address::from_bytes(p.take());
            if code == 24 {
                RuleKind::SourceAddress(a)
            } else {
                RuleKind::DestAddress(a)
            }
        }
        26 => RuleKind::VlanId(Payload::new(code, bytes, 2)?.u16()),
        27 => RuleKind::VlanPcp(Payload::new(code, bytes, 1)?.u8()),
        28 => RuleKind::VlanDei(Payload::new(code, bytes, 1)?.u8()),
        29 | 30 => {
            let mac = Mac::from_bytes(Payload::new(code, bytes, 6)?.take());
            if code == 29 {
                RuleKind::MacSource(mac)
            } else {
                RuleKind::MacDest(mac)
            }
        }
        31 | 32 => {
            let mut p = Payload::new(code, bytes, 5)?;
            let addr = Ipv4Addr::from(p.take::<4>());
            let net = Ipv4Net::new(addr, p.prefix(32)?).map_err(|e| RuleError::InvalidField {
                field: "ip",
                reason: e.to_string(),
            })?;
            if code == 31 {
                RuleKind::Ipv4Source(net)
            } else {
                RuleKind::Ipv4Dest(net)
            }
        }
        33 | 34 => {
            let mut p = Payload::new(code, bytes, 17)?;
            let addr = Ipv6Addr::from(p.take::<16>());
            let net = Ipv6Net::new(addr, p.prefix(128)?).map_err(|e| RuleError::InvalidField {
                field: "ip",
                reason: e.to_string(),
            })?;
            if code == 33 {
                RuleKind::Ipv6Source(net)
            } else {
                RuleKind::Ipv6Dest(net)
            }
        }
        35 => {
            let mut p = Payload::new(code, bytes, 3)?;
            RuleKind::IpTos {
                mask: p.u8(),
                start: p.u8(),
                end: p.u8(),
            }
        }
        36 => RuleKind::IpProtocol(Payload::new(code, bytes, 1)?.u8()),
        37 => RuleKind::EtherType(Payload::new(code, bytes, 2)?.u16()),
        38 => {
            let mut p = Payload::new(code, bytes, 3)?;
            let icmp_type = p.u8();
            let code_value = p.u8();
            let flags = p.u8();
            RuleKind::Icmp {
                icmp_type,
                code: (flags & ICMP_HAS_CODE != 0).then_some(code_value),
            }
        }
        39 | 40 | 42 => {
            let mut p = Payload::new(code, bytes, 4)?;
            let (start, end) = (p.u16(), p.u16());
            match code {
                39 => RuleKind::SourcePortRange { start, end },
                40 => RuleKind::DestPortRange { start, end },
                _ => RuleKind::FrameSizeRange { start, end },
            }
        }
        41 => {
            let mut p = Payload::new(code, bytes, 16)?;
            RuleKind::Characteristics {
                mask: p.u64(),
                value: p.u64(),
            }
        }
        43 => RuleKind::Random {
            probability: Payload::new(code, bytes, 4)?.u32(),
        },
        other => match TagOp::from_type_code(other) {
            Some(op) => {
                let mut p = Payload::new(code, bytes, 8)?;
                RuleKind::Tags {
                    op,
                    id: p.u32(),
                    value: p.u32(),
                }
            }
            None => return Err(RuleError::UnknownRuleType(format!("{other:#04x}"))),
        },
    };
    Ok(kind)
}
