use std::path::Path;

use async_trait::async_trait;
use redb::{Database, ReadableTable, TableDefinition};

use super::{DocumentStore, StoreError};
use crate::address::{Address, NetworkId};
use crate::model::{MemberRecord, NetworkRecord};

/// Network documents keyed by network ID
const NETWORKS_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("networks");

/// Member documents keyed by (network ID, node address)
const MEMBERS_TABLE: TableDefinition<(u64, u64), &[u8]> = TableDefinition::new("members");

impl From<redb::Error> for StoreError {
    fn from(err: redb::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

impl From<redb::DatabaseError> for StoreError {
    fn from(err: redb::DatabaseError) -> Self {
        StoreError::Database(err.to_string())
    }
}

impl From<redb::TableError> for StoreError {
    fn from(err: redb::TableError) -> Self {
        StoreError::Database(err.to_string())
    }
}

impl From<redb::TransactionError> for StoreError {
    fn from(err: redb::TransactionError) -> Self {
        StoreError::Database(err.to_string())
    }
}

impl From<redb::CommitError> for StoreError {
    fn from(err: redb::CommitError) -> Self {
        StoreError::Database(err.to_string())
    }
}

impl From<redb::StorageError> for StoreError {
    fn from(err: redb::StorageError) -> Self {
        StoreError::Database(err.to_string())
    }
}

/// Redb-backed persistent store
pub struct RedbStore {
    db: Database,
}

impl RedbStore {
    /// Open or create a database file
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        Self::init(Database::create(path)?)
    }

    /// Create an in-memory database (useful for testing)
    pub fn in_memory() -> Result<Self, StoreError> {
        Self::init(Database::builder().create_with_backend(redb::backends::InMemoryBackend::new())?)
    }

    fn init(db: Database) -> Result<Self, StoreError> {
        let write_txn = db.begin_write()?;
        {
            let _networks = write_txn.open_table(NETWORKS_TABLE)?;
            let _members = write_txn.open_table(MEMBERS_TABLE)?;
        }
        write_txn.commit()?;
        Ok(Self { db })
    }

    fn member_range(network: NetworkId) -> std::ops::RangeInclusive<(u64, u64)> {
        (network.to_u64(), 0)..=(network.to_u64(), u64::MAX)
    }
}

#[async_trait]
impl DocumentStore for RedbStore {
    async fn read_network(&self, id: NetworkId) -> Result<Option<NetworkRecord>, StoreError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(NETWORKS_TABLE)?;
        match table.get(id.to_u64())? {
            Some(data) => Ok(Some(serde_json::from_slice(data.value())?)),
            None => Ok(None),
        }
    }

    async fn write_network(&self, record: &NetworkRecord) -> Result<(), StoreError> {
        let data = serde_json::to_vec(record)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(NETWORKS_TABLE)?;
            table.insert(record.id.to_u64(), data.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    async fn delete_network(&self, id: NetworkId) -> Result<bool, StoreError> {
        let write_txn = self.db.begin_write()?;
        let existed = {
            let mut table = write_txn.open_table(NETWORKS_TABLE)?;
            let removed = table.remove(id.to_u64())?;
            removed.is_some()
        };
        write_txn.commit()?;
        Ok(existed)
    }

    async fn list_network_ids(&self) -> Result<Vec<NetworkId>, StoreError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(NETWORKS_TABLE)?;
        let mut ids = Vec::new();
        for entry in table.iter()? {
            let (key, _) = entry?;
            ids.push(NetworkId::new(key.value()));
        }
        Ok(ids)
    }

    async fn read_member(
        &self,
        network: NetworkId,
        member: Address,
    ) -> Result<Option<MemberRecord>, StoreError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(MEMBERS_TABLE)?;
        match table.get((network.to_u64(), member.to_u64()))? {
            Some(data) => Ok(Some(serde_json::from_slice(data.value())?)),
            None => Ok(None),
        }
    }

    async fn write_member(&self, record: &MemberRecord) -> Result<(), StoreError> {
        let data = serde_json::to_vec(record)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(MEMBERS_TABLE)?;
            table.insert((record.nwid.to_u64(), record.id.to_u64()), data.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    async fn delete_member(
        &self,
        network: NetworkId,
        member: Address,
    ) -> Result<bool, StoreError> {
        let write_txn = self.db.begin_write()?;
        let existed = {
            let mut table = write_txn.open_table(MEMBERS_TABLE)?;
            let removed = table.remove((network.to_u64(), member.to_u64()))?;
            removed.is_some()
        };
        write_txn.commit()?;
        Ok(existed)
    }

    async fn list_members(&self, network: NetworkId) -> Result<Vec<(Address, u64)>, StoreError> {
        Ok(self
            .members(network)
            .await?
            .into_iter()
            .map(|m| (m.id, m.member_revision))
            .collect())
    }

    async fn members(&self, network: NetworkId) -> Result<Vec<MemberRecord>, StoreError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(MEMBERS_TABLE)?;
        let mut members = Vec::new();
        for entry in table.range(Self::member_range(network))? {
            let (_, value) = entry?;
            members.push(serde_json::from_slice::<MemberRecord>(value.value())?);
        }
        Ok(members)
    }
}
