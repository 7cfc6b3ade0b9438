use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{DocumentStore, StoreError};
use crate::address::{Address, NetworkId};
use crate::model::{MemberRecord, NetworkRecord};

/// In-memory storage for testing
#[derive(Clone, Default)]
pub struct InMemoryStore {
    networks: Arc<RwLock<BTreeMap<NetworkId, NetworkRecord>>>,
    members: Arc<RwLock<BTreeMap<(NetworkId, Address), MemberRecord>>>,
}

impl InMemoryStore {
    /// Create a new empty in-memory store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn read_network(&self, id: NetworkId) -> Result<Option<NetworkRecord>, StoreError> {
        Ok(self.networks.read().await.get(&id).cloned())
    }

    async fn write_network(&self, record: &NetworkRecord) -> Result<(), StoreError> {
        self.networks
            .write()
            .await
            .insert(record.id, record.clone());
        Ok(())
    }

    async fn delete_network(&self, id: NetworkId) -> Result<bool, StoreError> {
        Ok(self.networks.write().await.remove(&id).is_some())
    }

    async fn list_network_ids(&self) -> Result<Vec<NetworkId>, StoreError> {
        Ok(self.networks.read().await.keys().copied().collect())
    }

    async fn read_member(
        &self,
        network: NetworkId,
        member: Address,
    ) -> Result<Option<MemberRecord>, StoreError> {
        Ok(self.members.read().await.get(&(network, member)).cloned())
    }

    async fn write_member(&self, record: &MemberRecord) -> Result<(), StoreError> {
        self.members
            .write()
            .await
            .insert((record.nwid, record.id), record.clone());
        Ok(())
    }

    async fn delete_member(
        &self,
        network: NetworkId,
        member: Address,
    ) -> Result<bool, StoreError> {
        Ok(self
            .members
            .write()
            .await
            .remove(&(network, member))
            .is_some())
    }

    async fn list_members(&self, network: NetworkId) -> Result<Vec<(Address, u64)>, StoreError> {
        let members = self.members.read().await;
        Ok(members
            .range((network, Address::new(0))..=(network, Address::new(u64::MAX)))
            .map(|((_, addr), m)| (*addr, m.member_revision))
            .collect())
    }

    async fn members(&self, network: NetworkId) -> Result<Vec<MemberRecord>, StoreError> {
        let members = self.members.read().await;
        Ok(members
            .range((network, Address::new(0))..=(network, Address::new(u64::MAX)))
            .map(|(_, m)| m.clone())
            .collect())
    }
}
