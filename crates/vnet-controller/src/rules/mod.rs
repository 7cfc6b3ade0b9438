//! Flow rules
//!
//! A network's traffic policy is an ordered list of rules. Each rule is
//! either an action (drop, accept, tee, ...) or a match that gates the
//! actions following it. Rules are authored as JSON descriptions
//! ([`json`]) and shipped to members as a compact binary table ([`wire`]).

pub mod json;
pub mod wire;

use ipnet::{Ipv4Net, Ipv6Net};

use crate::address::{Address, Mac};

pub use json::{decode, encode};
pub use wire::{decode_rule_table, encode_rule_table};

/// One entry of a network's rule table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rule {
    pub kind: RuleKind,
    /// Invert the sense of a match
    pub negate: bool,
    /// OR this match with the previous one instead of AND
    pub or: bool,
}

impl Rule {
    pub const fn new(kind: RuleKind) -> Self {
        Self {
            kind,
            negate: false,
            or: false,
        }
    }

    /// Unconditional accept; the rule set of a network with no policy
    pub const fn accept_all() -> Self {
        Self::new(RuleKind::Accept)
    }

    pub fn negated(mut self) -> Self {
        self.negate = true;
        self
    }

    pub fn or(mut self) -> Self {
        self.or = true;
        self
    }
}

/// Forwarding target of a tee or watch action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Forward {
    pub address: Address,
    pub flags: u32,
    /// Bytes of each frame to copy; 0 copies the whole frame
    pub length: u16,
}

/// Tag comparison performed by a tag match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagOp {
    Difference,
    BitwiseAnd,
    BitwiseOr,
    BitwiseXor,
    Equal,
    Sender,
    Receiver,
}

/// Action or match with its payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    Drop,
    Accept,
    Tee(Forward),
    Watch(Forward),
    Redirect { address: Address, flags: u32 },
    Break,
    SourceAddress(Address),
    DestAddress(Address),
    VlanId(u16),
    VlanPcp(u8),
    VlanDei(u8),
    MacSource(Mac),
    MacDest(Mac),
    Ipv4Source(Ipv4Net),
    Ipv4Dest(Ipv4Net),
    Ipv6Source(Ipv6Net),
    Ipv6Dest(Ipv6Net),
    IpTos { mask: u8, start: u8, end: u8 },
    IpProtocol(u8),
    EtherType(u16),
    /// `code: None` matches every code of the type
    Icmp { icmp_type: u8, code: Option<u8> },
    SourcePortRange { start: u16, end: u16 },
    DestPortRange { start: u16, end: u16 },
    Characteristics { mask: u64, value: u64 },
    FrameSizeRange { start: u16, end: u16 },
    /// Matches with probability `probability / 2^32`
    Random { probability: u32 },
    Tags { op: TagOp, id: u32, value: u32 },
}

impl RuleKind {
    /// Wire discriminant; actions occupy 0..=15, matches 16..=63
    pub fn type_code(&self) -> u8 {
        match self {
            RuleKind::Drop => 0,
            RuleKind::Accept => 1,
            RuleKind::Tee(_) => 2,
            RuleKind::Watch(_) => 3,
            RuleKind::Redirect { .. } => 4,
            RuleKind::Break => 5,
            RuleKind::SourceAddress(_) => 24,
            RuleKind::DestAddress(_) => 25,
            RuleKind::VlanId(_) => 26,
            RuleKind::VlanPcp(_) => 27,
            RuleKind::VlanDei(_) => 28,
            RuleKind::MacSource(_) => 29,
            RuleKind::MacDest(_) => 30,
            RuleKind::Ipv4Source(_) => 31,
            RuleKind::Ipv4Dest(_) => 32,
            RuleKind::Ipv6Source(_) => 33,
            RuleKind::Ipv6Dest(_) => 34,
            RuleKind::IpTos { .. } => 35,
            RuleKind::IpProtocol(_) => 36,
            RuleKind::EtherType(_) => 37,
            RuleKind::Icmp { .. } => 38,
            RuleKind::SourcePortRange { .. } => 39,
            RuleKind::DestPortRange { .. } => 40,
            RuleKind::Characteristics { .. } => 41,
            RuleKind::FrameSizeRange { .. } => 42,
            RuleKind::Random { .. } => 43,
            RuleKind::Tags { op, .. } => op.type_code(),
        }
    }

    /// Symbolic name used in JSON descriptions
    pub fn type_name(&self) -> &'static str {
        match self {
            RuleKind::Drop => "ACTION_DROP",
            RuleKind::Accept => "ACTION_ACCEPT",
            RuleKind::Tee(_) => "ACTION_TEE",
            RuleKind::Watch(_) => "ACTION_WATCH",
            RuleKind::Redirect { .. } => "ACTION_REDIRECT",
            RuleKind::Break => "ACTION_BREAK",
            RuleKind::SourceAddress(_) => "MATCH_SOURCE_ZEROTIER_ADDRESS",
            RuleKind::DestAddress(_) => "MATCH_DEST_ZEROTIER_ADDRESS",
            RuleKind::VlanId(_) => "MATCH_VLAN_ID",
            RuleKind::VlanPcp(_) => "MATCH_VLAN_PCP",
            RuleKind::VlanDei(_) => "MATCH_VLAN_DEI",
            RuleKind::MacSource(_) => "MATCH_MAC_SOURCE",
            RuleKind::MacDest(_) => "MATCH_MAC_DEST",
            RuleKind::Ipv4Source(_) => "MATCH_IPV4_SOURCE",
            RuleKind::Ipv4Dest(_) => "MATCH_IPV4_DEST",
            RuleKind::Ipv6Source(_) => "MATCH_IPV6_SOURCE",
            RuleKind::Ipv6Dest(_) => "MATCH_IPV6_DEST",
            RuleKind::IpTos { .. } => "MATCH_IP_TOS",
            RuleKind::IpProtocol(_) => "MATCH_IP_PROTOCOL",
            RuleKind::EtherType(_) => "MATCH_ETHERTYPE",
            RuleKind::Icmp { .. } => "MATCH_ICMP",
            RuleKind::SourcePortRange { .. } => "MATCH_IP_SOURCE_PORT_RANGE",
            RuleKind::DestPortRange { .. } => "MATCH_IP_DEST_PORT_RANGE",
            RuleKind::Characteristics { .. } => "MATCH_CHARACTERISTICS",
            RuleKind::FrameSizeRange { .. } => "MATCH_FRAME_SIZE_RANGE",
            RuleKind::Random { .. } => "MATCH_RANDOM",
            RuleKind::Tags { op, .. } => op.type_name(),
        }
    }

    pub fn is_action(&self) -> bool {
        self.type_code() < 16
    }
}

impl TagOp {
    pub const ALL: [TagOp; 7] = [
        TagOp::Difference,
        TagOp::BitwiseAnd,
        TagOp::BitwiseOr,
        TagOp::BitwiseXor,
        TagOp::Equal,
        TagOp::Sender,
        TagOp::Receiver,
    ];

    fn type_code(self) -> u8 {
        match self {
            TagOp::Difference => 44,
            TagOp::BitwiseAnd => 45,
            TagOp::BitwiseOr => 46,
            TagOp::BitwiseXor => 47,
            TagOp::Equal => 48,
            TagOp::Sender => 49,
            TagOp::Receiver => 50,
        }
    }

    fn type_name(self) -> &'static str {
        match self {
            TagOp::Difference => "MATCH_TAGS_DIFFERENCE",
            TagOp::BitwiseAnd => "MATCH_TAGS_BITWISE_AND",
            TagOp::BitwiseOr => "MATCH_TAGS_BITWISE_OR",
            TagOp::BitwiseXor => "MATCH_TAGS_BITWISE_XOR",
            TagOp::Equal => "MATCH_TAGS_EQUAL",
            TagOp::Sender => "MATCH_TAG_SENDER",
            TagOp::Receiver => "MATCH_TAG_RECEIVER",
        }
    }

    fn from_type_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.type_code() == code)
    }

    fn from_type_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.type_name() == name)
    }
}
