//! Node addresses, network IDs and MAC addresses
//!
//! All three are fixed-width integers with a canonical lowercase hex text
//! form. They serialize as strings so stored documents stay readable.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failed to parse an address, network ID or MAC
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid {kind}: '{input}'")]
pub struct ParseAddressError {
    kind: &'static str,
    input: String,
}

impl ParseAddressError {
    fn new(kind: &'static str, input: &str) -> Self {
        Self {
            kind,
            input: input.to_string(),
        }
    }
}

fn parse_hex(kind: &'static str, s: &str, max_digits: usize) -> Result<u64, ParseAddressError> {
    let s = s.trim();
    if s.is_empty() || s.len() > max_digits {
        return Err(ParseAddressError::new(kind, s));
    }
    u64::from_str_radix(s, 16).map_err(|_| ParseAddressError::new(kind, s))
}

/// 40-bit node address
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(u64);

impl Address {
    /// Length in bytes
    pub const LENGTH: usize = 5;

    const MASK: u64 = 0xff_ffff_ffff;

    /// Construct from the low 40 bits of `value`
    pub const fn new(value: u64) -> Self {
        Self(value & Self::MASK)
    }

    pub const fn to_u64(self) -> u64 {
        self.0
    }

    /// Zero and addresses beginning with 0xff are not assignable to nodes
    pub fn is_reserved(self) -> bool {
        self.0 == 0 || (self.0 >> 32) == 0xff
    }

    /// Big-endian byte form
    pub fn to_bytes(self) -> [u8; Self::LENGTH] {
        let b = self.0.to_be_bytes();
        [b[3], b[4], b[5], b[6], b[7]]
    }

    pub fn from_bytes(bytes: [u8; Self::LENGTH]) -> Self {
        let mut b = [0u8; 8];
        b[3..].copy_from_slice(&bytes);
        Self(u64::from_be_bytes(b))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:010x}", self.0)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}

impl FromStr for Address {
    type Err = ParseAddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_hex("address", s, 10).map(Self::new)
    }
}

impl TryFrom<String> for Address {
    type Error = ParseAddressError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Address> for String {
    fn from(a: Address) -> Self {
        a.to_string()
    }
}

/// 64-bit network ID; the top 40 bits are the owning controller's address
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NetworkId(u64);

impl NetworkId {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Compose from a controller address and a 24-bit suffix
    pub const fn from_parts(controller: Address, suffix: u32) -> Self {
        Self((controller.to_u64() << 24) | (suffix as u64 & 0xff_ffff))
    }

    pub const fn to_u64(self) -> u64 {
        self.0
    }

    /// Address of the controller that owns this network
    pub const fn controller(self) -> Address {
        Address::new(self.0 >> 24)
    }

    /// Low 24 bits
    pub const fn suffix(self) -> u32 {
        (self.0 & 0xff_ffff) as u32
    }
}

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl fmt::Debug for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NetworkId({self})")
    }
}

impl FromStr for NetworkId {
    type Err = ParseAddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_hex("network id", s, 16).map(Self)
    }
}

impl TryFrom<String> for NetworkId {
    type Error = ParseAddressError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<NetworkId> for String {
    fn from(n: NetworkId) -> Self {
        n.to_string()
    }
}

/// 48-bit Ethernet MAC address
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Mac(u64);

impl Mac {
    const MASK: u64 = 0xffff_ffff_ffff;

    pub const fn new(value: u64) -> Self {
        Self(value & Self::MASK)
    }

    pub const fn to_u64(self) -> u64 {
        self.0
    }

    pub fn to_bytes(self) -> [u8; 6] {
        let b = self.0.to_be_bytes();
        [b[2], b[3], b[4], b[5], b[6], b[7]]
    }

    pub fn from_bytes(bytes: [u8; 6]) -> Self {
        let mut b = [0u8; 8];
        b[2..].copy_from_slice(&bytes);
        Self(u64::from_be_bytes(b))
    }
}

impl fmt::Display for Mac {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.to_bytes();
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl fmt::Debug for Mac {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Mac({self})")
    }
}

/// Accepts colon, dash or dot separated hex as well as bare hex digits.
impl FromStr for Mac {
    type Err = ParseAddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits: String = s
            .chars()
            .filter(|c| !matches!(c, ':' | '-' | '.' | ' '))
            .collect();
        parse_hex("mac", &digits, 12).map(Self::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_display_is_ten_hex_digits() {
        let addr = Address::new(0x1a2b3c);
        assert_eq!(addr.to_string(), "00001a2b3c");
        assert_eq!("00001a2b3c".parse::<Address>().unwrap(), addr);
    }

    #[test]
    fn test_address_truncates_to_40_bits() {
        let addr = Address::new(0xffff_0102_0304_05);
        assert_eq!(addr.to_u64(), 0x01_0203_0405);
        assert!(Address::new(0).is_reserved());
        assert!(Address::new(0xff_0000_0001).is_reserved());
        assert!(!Address::new(0x89e92ceee5).is_reserved());
    }

    #[test]
    fn test_address_bytes() {
        let addr = Address::new(0x89e92ceee5);
        assert_eq!(addr.to_bytes(), [0x89, 0xe9, 0x2c, 0xee, 0xe5]);
        assert_eq!(Address::from_bytes(addr.to_bytes()), addr);
    }

    #[test]
    fn test_address_rejects_garbage() {
        assert!("".parse::<Address>().is_err());
        assert!("xyz".parse::<Address>().is_err());
        assert!("0123456789a".parse::<Address>().is_err());
    }

    #[test]
    fn test_network_id_parts() {
        let ctrl = Address::new(0x8056c2e21c);
        let nwid = NetworkId::from_parts(ctrl, 0x000001);
        assert_eq!(nwid.to_string(), "8056c2e21c000001");
        assert_eq!(nwid.controller(), ctrl);
        assert_eq!(nwid.suffix(), 1);
        assert_eq!("8056c2e21c000001".parse::<NetworkId>().unwrap(), nwid);
    }

    #[test]
    fn test_ids_serialize_as_strings() {
        let nwid = NetworkId::new(0x8056c2e21c000001);
        assert_eq!(serde_json::to_string(&nwid).unwrap(), "\"8056c2e21c000001\"");
        let addr: Address = serde_json::from_str("\"89e92ceee5\"").unwrap();
        assert_eq!(addr.to_u64(), 0x89e92ceee5);
    }

    #[test]
    fn test_mac_forms() {
        let mac: Mac = "AA:bb:0C:dd:0e:FF".parse().unwrap();
        assert_eq!(mac.to_string(), "aa:bb:0c:dd:0e:ff");
        assert_eq!("aabb0cdd0eff".parse::<Mac>().unwrap(), mac);
        assert_eq!(Mac::from_bytes(mac.to_bytes()), mac);
    }
}
