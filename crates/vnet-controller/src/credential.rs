//! Capability and tag credentials
//!
//! Issued alongside the certificate of membership to members of networks
//! that define capabilities or tags. A capability carries extra rules the
//! holder may present to peers; a tag binds a 32-bit value to the member for
//! the tag-matching rules. Both are signed by the network's controller and
//! rebuilt for every config, never persisted.

use serde::{Deserialize, Serialize};

use crate::address::{Address, NetworkId};
use crate::error::{ControllerError, Result};
use crate::identity::{Identity, Signature, Signer};
use crate::rules::{self, Rule};

fn sign(signer: &dyn Signer, controller: &Identity, body: &[u8]) -> Result<Signature> {
    signer.sign(controller, body).ok_or_else(|| {
        ControllerError::Signing(format!("identity {} cannot sign", controller.address()))
    })
}

/// Rules granted to one member
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capability {
    pub id: u32,
    pub network_id: NetworkId,
    /// Issue time, ms since epoch
    pub timestamp: i64,
    pub issued_to: Address,
    pub signed_by: Address,
    pub rules: Vec<Rule>,
    pub signature: Signature,
}

impl Capability {
    fn signing_bytes(
        id: u32,
        network_id: NetworkId,
        timestamp: i64,
        issued_to: Address,
        signed_by: Address,
        rules: &[Rule],
    ) -> Vec<u8> {
        let table = rules::encode_rule_table(rules);
        let mut buf = Vec::with_capacity(4 + 8 + 8 + Address::LENGTH * 2 + 2 + table.len());
        buf.extend_from_slice(&id.to_be_bytes());
        buf.extend_from_slice(&network_id.to_u64().to_be_bytes());
        buf.extend_from_slice(&timestamp.to_be_bytes());
        buf.extend_from_slice(&issued_to.to_bytes());
        buf.extend_from_slice(&signed_by.to_bytes());
        buf.extend_from_slice(&(rules.len() as u16).to_be_bytes());
        buf.extend_from_slice(&table);
        buf
    }

    pub fn issue(
        signer: &dyn Signer,
        controller: &Identity,
        id: u32,
        network_id: NetworkId,
        issued_to: Address,
        timestamp: i64,
        rules: Vec<Rule>,
    ) -> Result<Self> {
        let signed_by = controller.address();
        let body = Self::signing_bytes(id, network_id, timestamp, issued_to, signed_by, &rules);
        let signature = sign(signer, controller, &body)?;
        Ok(Self {
            id,
            network_id,
            timestamp,
            issued_to,
            signed_by,
            rules,
            signature,
        })
    }

    pub fn verify(&self, signer: &dyn Signer, controller: &Identity) -> bool {
        if controller.address() != self.signed_by
            || self.network_id.controller() != self.signed_by
        {
            return false;
        }
        let body = Self::signing_bytes(
            self.id,
            self.network_id,
            self.timestamp,
            self.issued_to,
            self.signed_by,
            &self.rules,
        );
        signer.verify(controller, &body, &self.signature)
    }
}

/// A tag value bound to one member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tag {
    pub id: u32,
    pub value: u32,
    pub network_id: NetworkId,
    /// Issue time, ms since epoch
    pub timestamp: i64,
    pub issued_to: Address,
    pub signed_by: Address,
    pub signature: Signature,
}

impl Tag {
    fn signing_bytes(
        id: u32,
        value: u32,
        network_id: NetworkId,
        timestamp: i64,
        issued_to: Address,
        signed_by: Address,
    ) -> Vec<u8> {
        let mut buf = Vec::with_capacity(4 + 4 + 8 + 8 + Address::LENGTH * 2);
        buf.extend_from_slice(&id.to_be_bytes());
        buf.extend_from_slice(&value.to_be_bytes());
        buf.extend_from_slice(&network_id.to_u64().to_be_bytes());
        buf.extend_from_slice(&timestamp.to_be_bytes());
        buf.extend_from_slice(&issued_to.to_bytes());
        buf.extend_from_slice(&signed_by.to_bytes());
        buf
    }

    pub fn issue(
        signer: &dyn Signer,
        controller: &Identity,
        id: u32,
        value: u32,
        network_id: NetworkId,
        issued_to: Address,
        timestamp: i64,
    ) -> Result<Self> {
        let signed_by = controller.address();
        let body = Self::signing_bytes(id, value, network_id, timestamp, issued_to, signed_by);
        let signature = sign(signer, controller, &body)?;
        Ok(Self {
            id,
            value,
            network_id,
            timestamp,
            issued_to,
            signed_by,
            signature,
        })
    }

    pub fn verify(&self, signer: &dyn Signer, controller: &Identity) -> bool {
        if controller.address() != self.signed_by
            || self.network_id.controller() != self.signed_by
        {
            return false;
        }
        let body = Self::signing_bytes(
            self.id,
            self.value,
            self.network_id,
            self.timestamp,
            self.issued_to,
            self.signed_by,
        );
        signer.verify(controller, &body, &self.signature)
    }
}
