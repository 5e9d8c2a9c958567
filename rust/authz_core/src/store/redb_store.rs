//! Persisted permission store using redb.
//!
//! redb is a pure-Rust embedded database with typed tables and ACID
//! transactions. Every mutation here runs in one write transaction: it reads
//! the existing row for the slot, decides flip-versus-create, writes the row,
//! and updates the allow counters. redb serializes writers, so concurrent
//! mutations of the same slot cannot lose updates.
//!
//! Tables:
//! - `permissions`:  record key (see [`keys`](super::keys)) -> StoredPermission (bincode)
//! - `allow_counts`: grant key (resource, scope)            -> u64 roles holding ALLOW
//! - `meta`:         "next_id"                               -> u64 row id sequence

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableTable, Table, TableDefinition, WriteTransaction};
use serde::{Deserialize, Serialize};

use super::keys::{
    decode_record_key, encode_grant_key, encode_pair_prefix, encode_record_key, prefix_upper_bound,
};
use super::{resolve_local, sort_records, PermissionStore};
use crate::error::{Result, StorageError};
use crate::types::{
    Effect, PermissionRecord, PermissionResultType, PermissionType, ResourceId, RoleId, Scope,
};

const RECORDS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("permissions");
const ALLOW_COUNTS: TableDefinition<&[u8], u64> = TableDefinition::new("allow_counts");
const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

const NEXT_ID_KEY: &str = "next_id";

type StorageResult<T> = std::result::Result<T, StorageError>;

/// A persisted record together with its row id.
///
/// The id is assigned when the row is created and survives polarity flips.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredPermission {
    pub id: u64,
    pub record: PermissionRecord,
}

fn read_row<T>(table: &T, key: &[u8]) -> StorageResult<Option<StoredPermission>>
where
    T: ReadableTable<&'static [u8], &'static [u8]>,
{
    match table.get(key)? {
        Some(value) => Ok(Some(bincode::deserialize(value.value())?)),
        None => Ok(None),
    }
}

/// All rows of one (role, resource) pair, wildcard first.
fn scan_pair<T>(table: &T, role: &str, resource: &str) -> StorageResult<Vec<StoredPermission>>
where
    T: ReadableTable<&'static [u8], &'static [u8]>,
{
    let prefix = encode_pair_prefix(role, resource);
    let upper = prefix_upper_bound(&prefix);
    let range = match upper.as_deref() {
        Some(upper) => table.range::<&[u8]>(prefix.as_slice()..upper)?,
        None => table.range::<&[u8]>(prefix.as_slice()..)?,
    };

    let mut rows = Vec::new();
    for entry in range {
        let (key, value) = entry?;
        let row: StoredPermission = bincode::deserialize(value.value())?;
        let decoded = decode_record_key(key.value())
            .ok_or_else(|| StorageError::Corrupt("undecodable record key".to_string()))?;
        if decoded.scope != row.record.scope() {
            return Err(StorageError::Corrupt(format!(
                "row {} does not match its key scope",
                row.id
            )));
        }
        rows.push(row);
    }
    Ok(rows)
}

fn allow_count<T>(table: &T, resource: &str, scope: Scope<'_>) -> StorageResult<u64>
where
    T: ReadableTable<&'static [u8], u64>,
{
    let key = encode_grant_key(resource, scope);
    Ok(table.get(key.as_slice())?.map(|v| v.value()).unwrap_or(0))
}

/// Tables opened inside one write transaction.
struct WriteTables<'txn> {
    records: Table<'txn, &'static [u8], &'static [u8]>,
    counts: Table<'txn, &'static [u8], u64>,
    meta: Table<'txn, &'static str, u64>,
}

impl<'txn> WriteTables<'txn> {
    fn open(txn: &'txn WriteTransaction) -> StorageResult<Self> {
        Ok(Self {
            records: txn.open_table(RECORDS)?,
            counts: txn.open_table(ALLOW_COUNTS)?,
            meta: txn.open_table(META)?,
        })
    }

    fn next_id(&mut self) -> StorageResult<u64> {
        let id = self
            .meta
            .get(NEXT_ID_KEY)?
            .map(|v| v.value())
            .unwrap_or(1);
        self.meta.insert(NEXT_ID_KEY, id + 1)?;
        Ok(id)
    }

    fn bump_allow_count(
        &mut self,
        resource: &str,
        scope: Scope<'_>,
        increment: bool,
    ) -> StorageResult<()> {
        let key = encode_grant_key(resource, scope);
        let current = self
            .counts
            .get(key.as_slice())?
            .map(|v| v.value())
            .unwrap_or(0);
        let next = if increment {
            current + 1
        } else {
            current.checked_sub(1).ok_or_else(|| {
                StorageError::Corrupt(format!("allow counter underflow for resource {resource}"))
            })?
        };
        if next == 0 {
            self.counts.remove(key.as_slice())?;
        } else {
            self.counts.insert(key.as_slice(), next)?;
        }
        Ok(())
    }

    /// Set or clear one slot. An existing row whose polarity differs is
    /// updated in place and keeps its id.
    fn write_slot(
        &mut self,
        role: &RoleId,
        resource: &ResourceId,
        scope: Scope<'_>,
        value: Option<Effect>,
    ) -> StorageResult<Option<PermissionType>> {
        let key = encode_record_key(role.as_str(), resource.as_str(), scope);
        let existing = read_row(&self.records, &key)?;
        let previous = existing.as_ref().map(|row| row.record.kind);

        match (existing, value) {
            (Some(mut row), Some(effect)) => {
                let kind = PermissionType::new(scope, effect);
                if row.record.kind != kind {
                    row.record.kind = kind;
                    let bytes = bincode::serialize(&row)?;
                    self.records.insert(key.as_slice(), bytes.as_slice())?;
                }
            }
            (None, Some(effect)) => {
                let row = StoredPermission {
                    id: self.next_id()?,
                    record: PermissionRecord {
                        role: role.clone(),
                        resource: resource.clone(),
                        action: scope.action().map(str::to_string),
                        kind: PermissionType::new(scope, effect),
                    },
                };
                let bytes = bincode::serialize(&row)?;
                self.records.insert(key.as_slice(), bytes.as_slice())?;
            }
            (Some(_), None) => {
                self.records.remove(key.as_slice())?;
            }
            (None, None) => {}
        }

        let was_allow = previous.map(|kind| kind.effect()) == Some(Effect::Allow);
        let is_allow = value == Some(Effect::Allow);
        if was_allow != is_allow {
            self.bump_allow_count(resource.as_str(), scope, is_allow)?;
        }
        Ok(previous)
    }

    /// Clear every row of the pair that `filter` selects.
    fn clear_pair(
        &mut self,
        role: &RoleId,
        resource: &ResourceId,
        filter: impl Fn(PermissionType) -> bool,
    ) -> StorageResult<usize> {
        let rows = scan_pair(&self.records, role.as_str(), resource.as_str())?;
        let mut cleared = 0;
        for row in rows.iter().filter(|row| filter(row.record.kind)) {
            self.write_slot(role, resource, row.record.scope(), None)?;
            cleared += 1;
        }
        Ok(cleared)
    }
}

/// Permission store persisted in a redb database file.
#[derive(Clone)]
pub struct RedbStore {
    db: Arc<Database>,
}

impl RedbStore {
    /// Open or create a store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = Database::create(path.as_ref()).map_err(StorageError::from)?;
        let store = Self { db: Arc::new(db) };
        // Create the tables up front so read transactions always find them.
        store.write(|_| Ok(()))?;
        tracing::debug!(path = %path.as_ref().display(), "opened redb permission store");
        Ok(store)
    }

    /// Run `f` inside one write transaction, committing only if it succeeds.
    fn write<T>(
        &self,
        f: impl FnOnce(&mut WriteTables<'_>) -> StorageResult<T>,
    ) -> StorageResult<T> {
        let txn = self.db.begin_write()?;
        let out = {
            let mut tables = WriteTables::open(&txn)?;
            f(&mut tables)?
        };
        txn.commit()?;
        Ok(out)
    }

    /// Stored rows (with ids) for the pair.
    pub fn rows(&self, role: &RoleId, resource: &ResourceId) -> Result<Vec<StoredPermission>> {
        let txn = self.db.begin_read().map_err(StorageError::from)?;
        let table = txn.open_table(RECORDS).map_err(StorageError::from)?;
        Ok(scan_pair(&table, role.as_str(), resource.as_str())?)
    }

    /// Total number of stored rows.
    pub fn len(&self) -> Result<u64> {
        use redb::ReadableTableMetadata;

        let txn = self.db.begin_read().map_err(StorageError::from)?;
        let table = txn.open_table(RECORDS).map_err(StorageError::from)?;
        Ok(table.len().map_err(StorageError::from)?)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

impl PermissionStore for RedbStore {
    fn put(
        &self,
        role: &RoleId,
        scope: Scope<'_>,
        resource: &ResourceId,
        effect: Effect,
    ) -> Result<()> {
        let previous = self.write(|t| t.write_slot(role, resource, scope, Some(effect)))?;
        tracing::trace!(%role, %resource, ?scope, ?effect, ?previous, "redb slot written");
        Ok(())
    }

    fn remove(&self, role: &RoleId, action: &str, resource: &ResourceId) -> Result<()> {
        self.write(|t| t.write_slot(role, resource, Scope::Action(action), None))?;
        Ok(())
    }

    fn remove_wildcard(&self, role: &RoleId, resource: &ResourceId) -> Result<()> {
        self.write(|t| t.write_slot(role, resource, Scope::All, None))?;
        Ok(())
    }

    fn remove_all(&self, role: &RoleId, resource: &ResourceId) -> Result<()> {
        let cleared = self.write(|t| t.clear_pair(role, resource, |_| true))?;
        tracing::trace!(%role, %resource, cleared, "redb pair cleared");
        Ok(())
    }

    fn remove_actions_with_effect(
        &self,
        role: &RoleId,
        resource: &ResourceId,
        effect: Effect,
    ) -> Result<()> {
        self.write(|t| {
            t.clear_pair(role, resource, |kind| {
                !kind.is_wildcard() && kind.effect() == effect
            })
        })?;
        Ok(())
    }

    fn records(&self, role: &RoleId, resource: &ResourceId) -> Result<Vec<PermissionRecord>> {
        Ok(self
            .rows(role, resource)?
            .into_iter()
            .map(|row| row.record)
            .collect())
    }

    fn all_records(&self) -> Result<Vec<PermissionRecord>> {
        let txn = self.db.begin_read().map_err(StorageError::from)?;
        let table = txn.open_table(RECORDS).map_err(StorageError::from)?;
        let mut out = Vec::new();
        for entry in table.iter().map_err(StorageError::from)? {
            let (_key, value) = entry.map_err(StorageError::from)?;
            let row: StoredPermission =
                bincode::deserialize(value.value()).map_err(StorageError::from)?;
            out.push(row.record);
        }
        sort_records(&mut out);
        Ok(out)
    }

    fn lookup(
        &self,
        role: &RoleId,
        action: &str,
        resource: &ResourceId,
    ) -> Result<PermissionResultType> {
        let txn = self.db.begin_read().map_err(StorageError::from)?;
        let records = txn.open_table(RECORDS).map_err(StorageError::from)?;

        let effect_at = |scope: Scope<'_>| -> StorageResult<Option<Effect>> {
            let key = encode_record_key(role.as_str(), resource.as_str(), scope);
            Ok(read_row(&records, &key)?.map(|row| row.record.kind.effect()))
        };
        let action_effect = effect_at(Scope::Action(action))?;
        let wildcard_effect = effect_at(Scope::All)?;

        resolve_local(action_effect, wildcard_effect, || {
            let counts = txn.open_table(ALLOW_COUNTS).map_err(StorageError::from)?;
            let allows = allow_count(&counts, resource.as_str(), Scope::Action(action))?
                + allow_count(&counts, resource.as_str(), Scope::All)?;
            Ok(allows > 0)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn role(id: &str) -> RoleId {
        RoleId::from(id)
    }

    fn res(id: &str) -> ResourceId {
        ResourceId::from(id)
    }

    fn open_store() -> (tempfile::TempDir, RedbStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = RedbStore::open(dir.path().join("authz.redb")).unwrap();
        (dir, store)
    }

    #[test]
    fn test_flip_keeps_row_id() {
        let (_dir, store) = open_store();
        let r = role("r");
        let doc = res("doc");

        store.put(&r, Scope::Action("read"), &doc, Effect::Deny).unwrap();
        let before = store.rows(&r, &doc).unwrap();
        assert_eq!(before.len(), 1);
        assert_eq!(before[0].record.kind, PermissionType::Deny);

        store.put(&r, Scope::Action("read"), &doc, Effect::Allow).unwrap();
        let after = store.rows(&r, &doc).unwrap();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].record.kind, PermissionType::Allow);
        assert_eq!(after[0].id, before[0].id);
    }

    #[test]
    fn test_repeated_put_is_idempotent() {
        let (_dir, store) = open_store();
        store
            .put(&role("r"), Scope::All, &res("doc"), Effect::Allow)
            .unwrap();
        store
            .put(&role("r"), Scope::All, &res("doc"), Effect::Allow)
            .unwrap();
        assert_eq!(store.len().unwrap(), 1);

        // A single remove clears the counter a double put would have inflated.
        store.remove_wildcard(&role("r"), &res("doc")).unwrap();
        assert_eq!(
            store.lookup(&role("x"), "read", &res("doc")).unwrap(),
            PermissionResultType::AllowImplicitly
        );
    }

    #[test]
    fn test_all_records_sorted_by_role() {
        let (_dir, store) = open_store();
        // "zz" has a shorter length prefix than "aaa" but must sort after it.
        store
            .put(&role("zz"), Scope::Action("read"), &res("doc"), Effect::Allow)
            .unwrap();
        store
            .put(&role("aaa"), Scope::All, &res("doc"), Effect::Deny)
            .unwrap();

        let roles: Vec<_> = store
            .all_records()
            .unwrap()
            .into_iter()
            .map(|rec| rec.role)
            .collect();
        assert_eq!(roles, vec![role("aaa"), role("zz")]);
    }

    #[test]
    fn test_records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("authz.redb");

        let first_id = {
            let store = RedbStore::open(&path).unwrap();
            store
                .put(&role("owner"), Scope::Action("read"), &res("doc"), Effect::Allow)
                .unwrap();
            store.rows(&role("owner"), &res("doc")).unwrap()[0].id
        };

        let store = RedbStore::open(&path).unwrap();
        assert_eq!(
            store.lookup(&role("owner"), "read", &res("doc")).unwrap(),
            PermissionResultType::AllowExplicitly
        );
        assert_eq!(
            store.lookup(&role("other"), "read", &res("doc")).unwrap(),
            PermissionResultType::DenyImplicitly
        );

        store
            .put(&role("owner"), Scope::Action("write"), &res("doc"), Effect::Deny)
            .unwrap();
        let rows = store.rows(&role("owner"), &res("doc")).unwrap();
        let write_id = rows
            .iter()
            .find(|row| row.record.action.as_deref() == Some("write"))
            .unwrap()
            .id;
        assert!(write_id > first_id);
    }

    #[test]
    fn test_rows_ordered_wildcard_first() {
        let (_dir, store) = open_store();
        let r = role("r");
        let doc = res("doc");
        store.put(&r, Scope::Action("write"), &doc, Effect::Deny).unwrap();
        store.put(&r, Scope::All, &doc, Effect::Allow).unwrap();
        store.put(&r, Scope::Action("close"), &doc, Effect::Allow).unwrap();

        let kinds: Vec<_> = store
            .records(&r, &doc)
            .unwrap()
            .into_iter()
            .map(|rec| (rec.kind, rec.action))
            .collect();
        assert_eq!(
            kinds,
            vec![
                (PermissionType::AllowAll, None),
                (PermissionType::Allow, Some("close".to_string())),
                (PermissionType::Deny, Some("write".to_string())),
            ]
        );
    }

    #[test]
    fn test_pair_scan_does_not_leak_into_neighbours() {
        let (_dir, store) = open_store();
        store
            .put(&role("a"), Scope::Action("x"), &res("bc"), Effect::Allow)
            .unwrap();
        store
            .put(&role("ab"), Scope::Action("x"), &res("c"), Effect::Allow)
            .unwrap();
        store
            .put(&role("a"), Scope::Action("x"), &res("b"), Effect::Allow)
            .unwrap();

        assert_eq!(store.records(&role("a"), &res("b")).unwrap().len(), 1);
        store.remove_all(&role("a"), &res("b")).unwrap();
        assert_eq!(store.len().unwrap(), 2);
    }

    #[test]
    fn test_remove_actions_with_effect() {
        let (_dir, store) = open_store();
        let r = role("r");
        let doc = res("doc");
        store.put(&r, Scope::All, &doc, Effect::Deny).unwrap();
        store.put(&r, Scope::Action("read"), &doc, Effect::Allow).unwrap();
        store.put(&r, Scope::Action("write"), &doc, Effect::Deny).unwrap();

        store.remove_actions_with_effect(&r, &doc, Effect::Allow).unwrap();
        let kinds: Vec<_> = store
            .records(&r, &doc)
            .unwrap()
            .into_iter()
            .map(|rec| rec.kind)
            .collect();
        assert_eq!(kinds, vec![PermissionType::DenyAll, PermissionType::Deny]);

        assert_eq!(
            store.lookup(&role("x"), "read", &doc).unwrap(),
            PermissionResultType::AllowImplicitly
        );
    }

    #[test]
    fn test_allow_counts_track_remove_all() {
        let (_dir, store) = open_store();
        let owner = role("owner");
        let doc = res("doc");
        store.put(&owner, Scope::All, &doc, Effect::Allow).unwrap();
        store.put(&owner, Scope::Action("read"), &doc, Effect::Allow).unwrap();
        assert_eq!(
            store.lookup(&role("x"), "write", &doc).unwrap(),
            PermissionResultType::DenyImplicitly
        );

        store.remove_all(&owner, &doc).unwrap();
        assert!(store.is_empty().unwrap());
        assert_eq!(
            store.lookup(&role("x"), "read", &doc).unwrap(),
            PermissionResultType::AllowImplicitly
        );
    }
}
