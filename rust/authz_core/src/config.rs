//! Policy documents.
//!
//! A policy is a JSON document naming the storage backend, the role graph and
//! an ordered list of grants:
//!
//! ```json
//! {
//!   "storage": { "backend": "redb", "path": "permissions.redb" },
//!   "roles": { "admin": ["editor"] },
//!   "grants": [
//!     { "role": "editor", "resource": "report", "action": "read", "effect": "allow" },
//!     { "role": "admin", "resource": "report", "effect": "allow" }
//!   ]
//! }
//! ```
//!
//! Grants without an `action` apply to all actions.

use std::path::{Path, PathBuf};

use ahash::AHashSet;
use serde::{Deserialize, Serialize};

use crate::engine::PermissionEngine;
use crate::error::{AuthzError, Result};
use crate::roles::RoleGraph;
use crate::store::memory::MemoryStore;
use crate::store::redb_store::RedbStore;
use crate::store::PermissionStore;
use crate::types::{Effect, ResourceId, RoleId, Scope};

/// Storage backend selection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    #[default]
    Memory,
    Redb { path: PathBuf },
}

impl StorageConfig {
    pub fn open(&self) -> Result<Box<dyn PermissionStore>> {
        match self {
            StorageConfig::Memory => Ok(Box::new(MemoryStore::new())),
            StorageConfig::Redb { path } => Ok(Box::new(RedbStore::open(path)?)),
        }
    }
}

/// One grant. `action: None` means every action on the resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GrantConfig {
    pub role: RoleId,
    pub resource: ResourceId,
    #[serde(default)]
    pub action: Option<String>,
    pub effect: Effect,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub roles: RoleGraph,
    #[serde(default)]
    pub grants: Vec<GrantConfig>,
}

/// Parse a policy from a JSON string.
pub fn parse_policy(json: &str) -> Result<PolicyConfig> {
    Ok(serde_json::from_str(json)?)
}

/// Read a policy file. A relative redb path is resolved against the
/// directory holding the policy file.
pub fn load_policy<P: AsRef<Path>>(path: P) -> Result<PolicyConfig> {
    let path = path.as_ref();
    let json = std::fs::read_to_string(path)
        .map_err(|e| AuthzError::Config(format!("failed to read {}: {e}", path.display())))?;
    let mut policy = parse_policy(&json)?;

    if let StorageConfig::Redb { path: db_path } = &mut policy.storage {
        if db_path.is_relative() {
            if let Some(dir) = path.parent() {
                *db_path = dir.join(&*db_path);
            }
        }
    }
    tracing::debug!(
        policy = %path.display(),
        grants = policy.grants.len(),
        "policy loaded"
    );
    Ok(policy)
}

impl GrantConfig {
    fn apply_to<S: PermissionStore>(&self, engine: &PermissionEngine<S>) -> Result<()> {
        match (self.action.as_deref(), self.effect) {
            (Some(action), Effect::Allow) => engine.allow(&self.role, action, &self.resource),
            (Some(action), Effect::Deny) => engine.deny(&self.role, action, &self.resource),
            (None, Effect::Allow) => engine.allow_all(&self.role, &self.resource),
            (None, Effect::Deny) => engine.deny_all(&self.role, &self.resource),
        }
    }
}

impl PolicyConfig {
    /// Make the engine hold exactly this policy.
    ///
    /// The role graph is replaced by the document's links. Grants are
    /// replayed in document order into a scratch store, and the engine's
    /// store is then reconciled against it: records the document no longer
    /// produces are removed, the rest are written. Unchanged persisted rows
    /// keep their ids.
    pub fn apply<S: PermissionStore>(&self, engine: &PermissionEngine<S>) -> Result<()> {
        for parent in engine.roles().parents() {
            if self.roles.sub_roles(parent).next().is_none() {
                engine.set_sub_roles(parent, Vec::new())?;
            }
        }
        for parent in self.roles.parents() {
            engine.set_sub_roles(parent, self.roles.sub_roles(parent).cloned())?;
        }

        let desired = PermissionEngine::new(MemoryStore::new());
        for grant in &self.grants {
            grant.apply_to(&desired)?;
        }
        let wanted = desired.store().all_records()?;
        let keep: AHashSet<(&RoleId, &ResourceId, Option<&str>)> = wanted
            .iter()
            .map(|rec| (&rec.role, &rec.resource, rec.action.as_deref()))
            .collect();

        let store = engine.store();
        let mut removed = 0usize;
        for stale in store.all_records()? {
            if keep.contains(&(&stale.role, &stale.resource, stale.action.as_deref())) {
                continue;
            }
            match stale.scope() {
                Scope::Action(action) => store.remove(&stale.role, action, &stale.resource)?,
                Scope::All => store.remove_wildcard(&stale.role, &stale.resource)?,
            }
            removed += 1;
        }
        for record in &wanted {
            store.put(
                &record.role,
                record.scope(),
                &record.resource,
                record.kind.effect(),
            )?;
        }

        tracing::debug!(
            grants = self.grants.len(),
            records = wanted.len(),
            removed,
            "policy applied"
        );
        Ok(())
    }

    /// Open the configured store and build an engine holding this policy.
    pub fn build_engine(&self) -> Result<PermissionEngine<Box<dyn PermissionStore>>> {
        let engine = PermissionEngine::new(self.storage.open()?);
        self.apply(&engine)?;
        Ok(engine)
    }
}
