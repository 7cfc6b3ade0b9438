//! Member resolution and authorization
//!
//! Loads or creates the requesting member's record, binds its identity on
//! first contact, applies the authorization policy and records the request
//! in the member's history.

use std::net::SocketAddr;

use tracing::{debug, info, warn};

use crate::config::ControllerConfig;
use crate::error::Result;
use crate::identity::{Identity, Signer};
use crate::model::{ClientMetadata, MemberRecord, NetworkRecord, RequestRecord};
use crate::store::DocumentStore;

/// Credential type recorded when a public network admits a member
pub const CREDENTIAL_PUBLIC: &str = "public";
/// Credential type recorded when a network auth token admits a member
pub const CREDENTIAL_TOKEN: &str = "token";
/// Credential type recorded for administrative authorization
pub const CREDENTIAL_API: &str = "api";

/// Outcome of resolving a request
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// The member may receive a config. The record carries the new history
    /// entry and revision but has not been written yet.
    Authorized(MemberRecord),
    /// The member is not admitted. Any record change has been written.
    Denied,
}

pub struct MemberResolver<'a> {
    store: &'a dyn DocumentStore,
    signer: &'a dyn Signer,
    config: &'a ControllerConfig,
}

impl<'a> MemberResolver<'a> {
    pub fn new(
        store: &'a dyn DocumentStore,
        signer: &'a dyn Signer,
        config: &'a ControllerConfig,
    ) -> Self {
        Self {
            store,
            signer,
            config,
        }
    }

    pub async fn resolve(
        &self,
        network: &NetworkRecord,
        requester: &Identity,
        metadata: &ClientMetadata,
        from: Option<SocketAddr>,
        now: i64,
    ) -> Result<Resolution> {
        let address = requester.address();
        if self.signer.derive_address(requester) != address {
            warn!(network_id = %network.id, member = %address, "Identity does not match its address");
            return Ok(Resolution::Denied);
        }

        let mut member = match self.store.read_member(network.id, address).await? {
            Some(member) => member,
            None => {
                debug!(network_id = %network.id, member = %address, "Creating member record");
                // public admission is applied below so it gets a credential type
                let mut member = MemberRecord::new(network.id, address, true, now);
                member.grant_default_capabilities(network);
                member
            }
        };

        match &member.identity {
            Some(bound) if bound != requester => {
                warn!(network_id = %network.id, member = %address, "Identity differs from the bound one");
                return Ok(Resolution::Denied);
            }
            Some(_) => {}
            None => member.identity = Some(requester.to_public()),
        }

        if !member.authorized {
            self.authorize_by_policy(network, &mut member, metadata, now);
        }

        member.push_history(
            RequestRecord {
                ts: now,
                authorized: member.authorized,
                client_major_version: metadata.major_version,
                client_minor_version: metadata.minor_version,
                client_revision: metadata.revision,
                protocol_version: metadata.protocol_version,
                from_addr: from,
            },
            self.config.history_cap,
        );
        member.member_revision += 1;

        if network.private && !member.authorized {
            self.store.write_member(&member).await?;
            info!(network_id = %network.id, member = %address, "Member not authorized");
            return Ok(Resolution::Denied);
        }
        Ok(Resolution::Authorized(member))
    }

    /// Admit an unauthorized member through a public network or a valid token
    fn authorize_by_policy(
        &self,
        network: &NetworkRecord,
        member: &mut MemberRecord,
        metadata: &ClientMetadata,
        now: i64,
    ) {
        if !network.private {
            member.set_authorized(true, CREDENTIAL_PUBLIC, now);
            member.last_authorized_credential = None;
            return;
        }
        if let Some(token) = metadata.auth_token() {
            if network.token_valid(token, now) {
                member.set_authorized(true, CREDENTIAL_TOKEN, now);
                member.last_authorized_credential = Some(token.to_string());
                info!(network_id = %network.id, member = %member.id, "Member authorized by token");
            } else {
                debug!(network_id = %network.id, member = %member.id, "Rejected unknown or expired token");
            }
        }
    }
}
