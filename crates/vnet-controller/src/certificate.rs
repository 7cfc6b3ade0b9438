//! Certificate of membership
//!
//! Issued to members of private networks with each config. Peers compare
//! certificates and accept each other when both are signed by the network's
//! controller and their timestamps lie within `max_delta` of one another.
//! Certificates are never persisted.

use serde::{Deserialize, Serialize};

use crate::address::{Address, NetworkId};
use crate::error::{ControllerError, Result};
use crate::identity::{Identity, Signature, Signer};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateOfMembership {
    /// Issue time, ms since epoch
    pub timestamp: i64,
    /// Largest timestamp difference two peers will accept
    pub max_delta: i64,
    pub network_id: NetworkId,
    pub issued_to: Address,
    pub signed_by: Address,
    pub signature: Signature,
}

impl CertificateOfMembership {
    /// Signed body: fixed-width big-endian fields
    fn signing_bytes(
        timestamp: i64,
        max_delta: i64,
        network_id: NetworkId,
        issued_to: Address,
        signed_by: Address,
    ) -> Vec<u8> {
        let mut buf = Vec::with_capacity(8 + 8 + 8 + Address::LENGTH * 2);
        buf.extend_from_slice(&timestamp.to_be_bytes());
        buf.extend_from_slice(&max_delta.to_be_bytes());
        buf.extend_from_slice(&network_id.to_u64().to_be_bytes());
        buf.extend_from_slice(&issued_to.to_bytes());
        buf.extend_from_slice(&signed_by.to_bytes());
        buf
    }

    /// Issue and sign a certificate with the controller's identity
    pub fn issue(
        signer: &dyn Signer,
        controller: &Identity,
        network_id: NetworkId,
        issued_to: Address,
        timestamp: i64,
        max_delta: i64,
    ) -> Result<Self> {
        let signed_by = controller.address();
        let body = Self::signing_bytes(timestamp, max_delta, network_id, issued_to, signed_by);
        let signature = signer
            .sign(controller, &body)
            .ok_or_else(|| ControllerError::Signing(format!("identity {signed_by} cannot sign")))?;
        Ok(Self {
            timestamp,
            max_delta,
            network_id,
            issued_to,
            signed_by,
            signature,
        })
    }

    /// Signature check against the claimed signer's identity
    pub fn verify(&self, signer: &dyn Signer, controller: &Identity) -> bool {
        if controller.address() != self.signed_by
            || self.network_id.controller() != self.signed_by
        {
            return false;
        }
        let body = Self::signing_bytes(
            self.timestamp,
            self.max_delta,
            self.network_id,
            self.issued_to,
            self.signed_by,
        );
        signer.verify(controller, &body, &self.signature)
    }

    /// Whether two certificates admit each other
    pub fn agrees_with(&self, other: &Self) -> bool {
        self.network_id == other.network_id
            && self.signed_by == other.signed_by
            && self.timestamp.abs_diff(other.timestamp)
                <= u64::try_from(self.max_delta.min(other.max_delta)).unwrap_or(0)
    }
}
