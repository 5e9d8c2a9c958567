//! Permission record storage.
//!
//! A store keeps at most one record per (role, scope, resource) slot, where
//! the scope is a concrete action or the all-actions wildcard. Writing a slot
//! that already holds the opposite polarity flips it in place.
//!
//! # Storage Backends
//!
//! - [`memory::MemoryStore`]: nested maps behind a read-write lock
//! - [`redb_store::RedbStore`]: persisted rows in a redb database, one write
//!   transaction per mutation
//!
//! Identifier validation is the engine's job; stores accept any identifier.

pub mod keys;
pub mod memory;
pub mod redb_store;

use std::sync::Arc;

use crate::error::Result;
use crate::types::{Effect, PermissionRecord, PermissionResultType, ResourceId, RoleId, Scope};

pub trait PermissionStore: Send + Sync {
    /// Create or overwrite the record for this exact scope.
    fn put(&self, role: &RoleId, scope: Scope<'_>, resource: &ResourceId, effect: Effect)
        -> Result<()>;

    /// Delete the concrete-action record for `action`, if present.
    fn remove(&self, role: &RoleId, action: &str, resource: &ResourceId) -> Result<()>;

    /// Delete the wildcard (ALLOW_ALL / DENY_ALL) record, if present.
    fn remove_wildcard(&self, role: &RoleId, resource: &ResourceId) -> Result<()>;

    /// Delete every record, concrete and wildcard, for the pair.
    fn remove_all(&self, role: &RoleId, resource: &ResourceId) -> Result<()>;

    /// Delete every concrete-action record of one polarity for the pair.
    fn remove_actions_with_effect(
        &self,
        role: &RoleId,
        resource: &ResourceId,
        effect: Effect,
    ) -> Result<()>;

    /// Records stored for the pair, wildcard first, then actions in order.
    fn records(&self, role: &RoleId, resource: &ResourceId) -> Result<Vec<PermissionRecord>>;

    /// Every stored record, ordered by role, then resource, wildcard first.
    fn all_records(&self) -> Result<Vec<PermissionRecord>>;

    /// Local result for exactly this role; sub-roles are not consulted.
    fn lookup(&self, role: &RoleId, action: &str, resource: &ResourceId)
        -> Result<PermissionResultType>;
}

/// Resolve a role's local result from its own records and whether any role
/// holds an allow for the scope. Shared by both backends.
pub(crate) fn resolve_local(
    action_effect: Option<Effect>,
    wildcard_effect: Option<Effect>,
    scope_has_allow: impl FnOnce() -> Result<bool>,
) -> Result<PermissionResultType> {
    match (action_effect, wildcard_effect) {
        (Some(Effect::Allow), _) => Ok(PermissionResultType::AllowExplicitly),
        (Some(Effect::Deny), _) => Ok(PermissionResultType::DenyExplicitly),
        (None, Some(Effect::Allow)) => Ok(PermissionResultType::AllowExplicitly),
        (None, Some(Effect::Deny)) => Ok(PermissionResultType::DenyExplicitly),
        (None, None) => {
            if scope_has_allow()? {
                Ok(PermissionResultType::DenyImplicitly)
            } else {
                Ok(PermissionResultType::AllowImplicitly)
            }
        }
    }
}

/// Order records by role, then resource, wildcard before concrete actions.
pub(crate) fn sort_records(records: &mut [PermissionRecord]) {
    records.sort_by(|a, b| {
        (&a.role, &a.resource, &a.action).cmp(&(&b.role, &b.resource, &b.action))
    });
}

macro_rules! forward_store {
    ($($ptr:ident),*) => {
        $(
            impl<S: PermissionStore + ?Sized> PermissionStore for $ptr<S> {
                fn put(
                    &self,
                    role: &RoleId,
                    scope: Scope<'_>,
                    resource: &ResourceId,
                    effect: Effect,
                ) -> Result<()> {
                    (**self).put(role, scope, resource, effect)
                }

                fn remove(&self, role: &RoleId, action: &str, resource: &ResourceId) -> Result<()> {
                    (**self).remove(role, action, resource)
                }

                fn remove_wildcard(&self, role: &RoleId, resource: &ResourceId) -> Result<()> {
                    (**self).remove_wildcard(role, resource)
                }

                fn remove_all(&self, role: &RoleId, resource: &ResourceId) -> Result<()> {
                    (**self).remove_all(role, resource)
                }

                fn remove_actions_with_effect(
                    &self,
                    role: &RoleId,
                    resource: &ResourceId,
                    effect: Effect,
                ) -> Result<()> {
                    (**self).remove_actions_with_effect(role, resource, effect)
                }

                fn records(
                    &self,
                    role: &RoleId,
                    resource: &ResourceId,
                ) -> Result<Vec<PermissionRecord>> {
                    (**self).records(role, resource)
                }

                fn all_records(&self) -> Result<Vec<PermissionRecord>> {
                    (**self).all_records()
                }

                fn lookup(
                    &self,
                    role: &RoleId,
                    action: &str,
                    resource: &ResourceId,
                ) -> Result<PermissionResultType> {
                    (**self).lookup(role, action, resource)
                }
            }
        )*
    };
}

forward_store!(Box, Arc);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AuthzError;

    #[test]
    fn concrete_record_beats_wildcard() {
        let result = resolve_local(Some(Effect::Deny), Some(Effect::Allow), || Ok(true)).unwrap();
        assert_eq!(result, PermissionResultType::DenyExplicitly);

        let result = resolve_local(Some(Effect::Allow), Some(Effect::Deny), || Ok(false)).unwrap();
        assert_eq!(result, PermissionResultType::AllowExplicitly);
    }

    #[test]
    fn wildcard_applies_without_concrete_record() {
        let result = resolve_local(None, Some(Effect::Deny), || Ok(false)).unwrap();
        assert_eq!(result, PermissionResultType::DenyExplicitly);
    }

    #[test]
    fn closed_scope_is_implicit_deny() {
        assert_eq!(
            resolve_local(None, None, || Ok(true)).unwrap(),
            PermissionResultType::DenyImplicitly
        );
        assert_eq!(
            resolve_local(None, None, || Ok(false)).unwrap(),
            PermissionResultType::AllowImplicitly
        );
    }

    #[test]
    fn scope_probe_skipped_when_explicit() {
        let result = resolve_local(Some(Effect::Allow), None, || {
            Err(AuthzError::Config("probe should not run".to_string()))
        });
        assert!(result.is_ok());
    }
}
