//! Document store for network and member records
//!
//! The controller only needs keyed JSON documents. Two backends are
//! provided: [`RedbStore`] persists to a single file, [`InMemoryStore`] is
//! for tests and embedding.

mod memory;
mod persistent;

use async_trait::async_trait;
use thiserror::Error;

use crate::address::{Address, NetworkId};
use crate::model::{MemberRecord, NetworkRecord};

pub use self::memory::InMemoryStore;
pub use self::persistent::RedbStore;

/// Storage errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// Trait for record storage backends
///
/// Writes replace the whole document. Implementations need not make
/// multi-record operations atomic; the controller serializes writers per
/// network.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn read_network(&self, id: NetworkId) -> Result<Option<NetworkRecord>, StoreError>;

    /// Create or replace a network record
    async fn write_network(&self, record: &NetworkRecord) -> Result<(), StoreError>;

    /// Delete a network record, returns true if it existed. Members are
    /// left alone.
    async fn delete_network(&self, id: NetworkId) -> Result<bool, StoreError>;

    /// All network IDs in ascending order
    async fn list_network_ids(&self) -> Result<Vec<NetworkId>, StoreError>;

    async fn read_member(
        &self,
        network: NetworkId,
        member: Address,
    ) -> Result<Option<MemberRecord>, StoreError>;

    /// Create or replace a member record
    async fn write_member(&self, record: &MemberRecord) -> Result<(), StoreError>;

    /// Delete a member record, returns true if it existed
    async fn delete_member(&self, network: NetworkId, member: Address)
        -> Result<bool, StoreError>;

    /// Member addresses with their revisions, ascending by address
    async fn list_members(&self, network: NetworkId) -> Result<Vec<(Address, u64)>, StoreError>;

    /// Full member records of a network
    async fn members(&self, network: NetworkId) -> Result<Vec<MemberRecord>, StoreError> {
        let mut out = Vec::new();
        for (addr, _) in self.list_members(network).await? {
            if let Some(member) = self.read_member(network, addr).await? {
                out.push(member);
            }
        }
        Ok(out)
    }

    /// Whether the backend can serve requests
    async fn is_ready(&self) -> bool {
        true
    }
}
