//! In-memory permission store.
//!
//! Records live in role → resource → slots maps. An allow index counts, per
//! resource, how many roles hold an ALLOW for each action and how many hold
//! an ALLOW_ALL, so the closed-scope check in `lookup` never scans roles.
//! Nothing is persisted.

use std::collections::BTreeMap;

use ahash::AHashMap;
use parking_lot::RwLock;

use super::{resolve_local, sort_records, PermissionStore};
use crate::error::Result;
use crate::types::{
    Effect, PermissionRecord, PermissionResultType, PermissionType, ResourceId, RoleId, Scope,
};

/// Slots held by one role on one resource.
#[derive(Debug, Default)]
struct Slots {
    actions: BTreeMap<String, Effect>,
    wildcard: Option<Effect>,
}

impl Slots {
    fn is_empty(&self) -> bool {
        self.actions.is_empty() && self.wildcard.is_none()
    }
}

/// Allow-grant counts for one resource across all roles.
#[derive(Debug, Default)]
struct AllowCounts {
    actions: AHashMap<String, usize>,
    wildcard: usize,
}

#[derive(Debug, Default)]
struct Inner {
    grants: AHashMap<RoleId, AHashMap<ResourceId, Slots>>,
    allow_index: AHashMap<ResourceId, AllowCounts>,
}

impl Inner {
    fn slots(&self, role: &RoleId, resource: &ResourceId) -> Option<&Slots> {
        self.grants.get(role)?.get(resource)
    }

    /// Single write path: every mutation goes through here so the allow
    /// index stays in step with the slots.
    fn set_slot(
        &mut self,
        role: &RoleId,
        resource: &ResourceId,
        scope: Scope<'_>,
        value: Option<Effect>,
    ) -> Option<Effect> {
        let by_resource = self.grants.entry(role.clone()).or_default();
        let slots = by_resource.entry(resource.clone()).or_default();
        let previous = match (scope, value) {
            (Scope::All, _) => std::mem::replace(&mut slots.wildcard, value),
            (Scope::Action(action), Some(effect)) => slots.actions.insert(action.to_string(), effect),
            (Scope::Action(action), None) => slots.actions.remove(action),
        };
        if slots.is_empty() {
            by_resource.remove(resource);
            if by_resource.is_empty() {
                self.grants.remove(role);
            }
        }

        let was_allow = previous == Some(Effect::Allow);
        let is_allow = value == Some(Effect::Allow);
        if was_allow != is_allow {
            self.adjust_allow_count(resource, scope, is_allow);
        }
        previous
    }

    fn adjust_allow_count(&mut self, resource: &ResourceId, scope: Scope<'_>, increment: bool) {
        let counts = self.allow_index.entry(resource.clone()).or_default();
        match scope {
            Scope::All => {
                if increment {
                    counts.wildcard += 1;
                } else {
                    counts.wildcard = counts.wildcard.saturating_sub(1);
                }
            }
            Scope::Action(action) => {
                if increment {
                    *counts.actions.entry(action.to_string()).or_default() += 1;
                } else if let Some(count) = counts.actions.get_mut(action) {
                    *count -= 1;
                    if *count == 0 {
                        counts.actions.remove(action);
                    }
                }
            }
        }
        if counts.wildcard == 0 && counts.actions.is_empty() {
            self.allow_index.remove(resource);
        }
    }

    fn record_count(&self) -> usize {
        self.grants
            .values()
            .flat_map(|by_resource| by_resource.values())
            .map(|slots| slots.actions.len() + usize::from(slots.wildcard.is_some()))
            .sum()
    }

    fn scope_has_allow(&self, action: &str, resource: &ResourceId) -> bool {
        self.allow_index
            .get(resource)
            .is_some_and(|counts| counts.wildcard > 0 || counts.actions.contains_key(action))
    }
}

/// Permission store kept entirely in process memory.
///
/// One read-write lock guards all maps; lookups take the read side.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored records.
    pub fn len(&self) -> usize {
        self.inner.read().record_count()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().grants.is_empty()
    }
}

impl PermissionStore for MemoryStore {
    fn put(
        &self,
        role: &RoleId,
        scope: Scope<'_>,
        resource: &ResourceId,
        effect: Effect,
    ) -> Result<()> {
        let previous = self.inner.write().set_slot(role, resource, scope, Some(effect));
        tracing::trace!(%role, %resource, ?scope, ?effect, ?previous, "memory slot written");
        Ok(())
    }

    fn remove(&self, role: &RoleId, action: &str, resource: &ResourceId) -> Result<()> {
        self.inner
            .write()
            .set_slot(role, resource, Scope::Action(action), None);
        Ok(())
    }

    fn remove_wildcard(&self, role: &RoleId, resource: &ResourceId) -> Result<()> {
        self.inner.write().set_slot(role, resource, Scope::All, None);
        Ok(())
    }

    fn remove_all(&self, role: &RoleId, resource: &ResourceId) -> Result<()> {
        let mut inner = self.inner.write();
        let actions: Vec<String> = match inner.slots(role, resource) {
            Some(slots) => slots.actions.keys().cloned().collect(),
            None => return Ok(()),
        };
        for action in &actions {
            inner.set_slot(role, resource, Scope::Action(action), None);
        }
        inner.set_slot(role, resource, Scope::All, None);
        Ok(())
    }

    fn remove_actions_with_effect(
        &self,
        role: &RoleId,
        resource: &ResourceId,
        effect: Effect,
    ) -> Result<()> {
        let mut inner = self.inner.write();
        let actions: Vec<String> = match inner.slots(role, resource) {
            Some(slots) => slots
                .actions
                .iter()
                .filter(|(_, e)| **e == effect)
                .map(|(action, _)| action.clone())
                .collect(),
            None => return Ok(()),
        };
        for action in &actions {
            inner.set_slot(role, resource, Scope::Action(action), None);
        }
        Ok(())
    }

    fn records(&self, role: &RoleId, resource: &ResourceId) -> Result<Vec<PermissionRecord>> {
        let inner = self.inner.read();
        let Some(slots) = inner.slots(role, resource) else {
            return Ok(Vec::new());
        };

        let record = |action: Option<&str>, effect: Effect| PermissionRecord {
            role: role.clone(),
            resource: resource.clone(),
            action: action.map(str::to_string),
            kind: PermissionType::new(Scope::from(action), effect),
        };

        let mut out = Vec::with_capacity(slots.actions.len() + 1);
        if let Some(effect) = slots.wildcard {
            out.push(record(None, effect));
        }
        for (action, effect) in &slots.actions {
            out.push(record(Some(action.as_str()), *effect));
        }
        Ok(out)
    }

    fn all_records(&self) -> Result<Vec<PermissionRecord>> {
        let inner = self.inner.read();
        let mut out = Vec::with_capacity(inner.record_count());
        for (role, by_resource) in &inner.grants {
            for (resource, slots) in by_resource {
                let record = |action: Option<&str>, effect: Effect| PermissionRecord {
                    role: role.clone(),
                    resource: resource.clone(),
                    action: action.map(str::to_string),
                    kind: PermissionType::new(Scope::from(action), effect),
                };
                if let Some(effect) = slots.wildcard {
                    out.push(record(None, effect));
                }
                for (action, effect) in &slots.actions {
                    out.push(record(Some(action.as_str()), *effect));
                }
            }
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
        let inner = self.inner.read();
        let slots = inner.slots(role, resource);
        resolve_local(
            slots.and_then(|s| s.actions.get(action).copied()),
            slots.and_then(|s| s.wildcard),
            || Ok(inner.scope_has_allow(action, resource)),
        )
    }
}
