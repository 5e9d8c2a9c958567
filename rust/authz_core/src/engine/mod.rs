//! Permission engine.
//!
//! Validates identifiers, delegates record mutations to a [`PermissionStore`]
//! and evaluates access for a set of roles by walking the role graph one
//! level at a time.

use ahash::AHashSet;
use parking_lot::RwLock;

use crate::error::{AuthzError, Result};
use crate::roles::RoleGraph;
use crate::store::PermissionStore;
use crate::types::{Effect, PermissionRecord, PermissionResultType, ResourceId, RoleId, Scope};


fn ensure_role(role: &RoleId) -> Result<()> {
    if role.is_blank() {
        return Err(AuthzError::InvalidArgument(
            "role identifier may not be blank".to_string(),
        ));
    }
    Ok(())
}

fn ensure_resource(resource: &ResourceId) -> Result<()> {
    if resource.is_blank() {
        return Err(AuthzError::InvalidArgument(
            "resource identifier may not be blank".to_string(),
        ));
    }
    Ok(())
}

/// Role-hierarchy permission engine over a pluggable store.
///
/// The engine holds no per-check state; each evaluation is a self-contained
/// sweep, so a single engine can be shared across threads.
pub struct PermissionEngine<S> {
    store: S,
    roles: RwLock<RoleGraph>,
}

impl<S: PermissionStore> PermissionEngine<S> {
    pub fn new(store: S) -> Self {
        Self::with_roles(store, RoleGraph::new())
    }

    pub fn with_roles(store: S, roles: RoleGraph) -> Self {
        Self {
            store,
            roles: RwLock::new(roles),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Snapshot of the current role graph.
    pub fn roles(&self) -> RoleGraph {
        self.roles.read().clone()
    }

    // ------------------------------------------------------------------
    // Role graph
    // ------------------------------------------------------------------

    pub fn add_sub_role(&self, parent: &RoleId, child: &RoleId) -> Result<bool> {
        let added = self.roles.write().add_sub_role(parent, child)?;
        tracing::debug!(%parent, %child, added, "sub-role linked");
        Ok(added)
    }

    pub fn remove_sub_role(&self, parent: &RoleId, child: &RoleId) -> Result<bool> {
        let removed = self.roles.write().remove_sub_role(parent, child)?;
        tracing::debug!(%parent, %child, removed, "sub-role unlinked");
        Ok(removed)
    }

    pub fn set_sub_roles<I>(&self, parent: &RoleId, children: I) -> Result<()>
    where
        I: IntoIterator<Item = RoleId>,
    {
        self.roles.write().set_sub_roles(parent, children)
    }

    /// Direct sub-roles of `role`.
    pub fn sub_roles(&self, role: &RoleId) -> Vec<RoleId> {
        self.roles.read().sub_roles(role).cloned().collect()
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    /// Grant `action` on `resource` to `role`, overriding an existing deny.
    pub fn allow(&self, role: &RoleId, action: &str, resource: &ResourceId) -> Result<()> {
        ensure_role(role)?;
        ensure_resource(resource)?;
        self.store
            .put(role, Scope::Action(action), resource, Effect::Allow)?;
        tracing::debug!(%role, action, %resource, "allow");
        Ok(())
    }

    /// Deny `action` on `resource` to `role`, overriding an existing allow.
    pub fn deny(&self, role: &RoleId, action: &str, resource: &ResourceId) -> Result<()> {
        ensure_role(role)?;
        ensure_resource(resource)?;
        self.store
            .put(role, Scope::Action(action), resource, Effect::Deny)?;
        tracing::debug!(%role, action, %resource, "deny");
        Ok(())
    }

    /// Grant every action on `resource` to `role`. Concrete denies the role
    /// held for the resource are dropped; later denies still take effect.
    pub fn allow_all(&self, role: &RoleId, resource: &ResourceId) -> Result<()> {
        ensure_role(role)?;
        ensure_resource(resource)?;
        self.store.put(role, Scope::All, resource, Effect::Allow)?;
        self.store
            .remove_actions_with_effect(role, resource, Effect::Deny)?;
        tracing::debug!(%role, %resource, "allow all");
        Ok(())
    }

    /// Deny every action on `resource` to `role`. Concrete allows the role
    /// held for the resource are dropped; later allows still take effect.
    pub fn deny_all(&self, role: &RoleId, resource: &ResourceId) -> Result<()> {
        ensure_role(role)?;
        ensure_resource(resource)?;
        self.store.put(role, Scope::All, resource, Effect::Deny)?;
        self.store
            .remove_actions_with_effect(role, resource, Effect::Allow)?;
        tracing::debug!(%role, %resource, "deny all");
        Ok(())
    }

    /// Remove the record for one concrete action.
    pub fn remove_permission(
        &self,
        role: &RoleId,
        action: &str,
        resource: &ResourceId,
    ) -> Result<()> {
        ensure_role(role)?;
        ensure_resource(resource)?;
        self.store.remove(role, action, resource)?;
        tracing::debug!(%role, action, %resource, "permission removed");
        Ok(())
    }

    /// Remove the all-actions record (ALLOW_ALL or DENY_ALL).
    pub fn remove_all_permission(&self, role: &RoleId, resource: &ResourceId) -> Result<()> {
        ensure_role(role)?;
        ensure_resource(resource)?;
        self.store.remove_wildcard(role, resource)?;
        tracing::debug!(%role, %resource, "wildcard permission removed");
        Ok(())
    }

    /// Remove every record the role holds for the resource.
    pub fn remove_all_permissions(&self, role: &RoleId, resource: &ResourceId) -> Result<()> {
        ensure_role(role)?;
        ensure_resource(resource)?;
        self.store.remove_all(role, resource)?;
        tracing::debug!(%role, %resource, "all permissions removed");
        Ok(())
    }

    /// Records the role holds for the resource, wildcard first.
    pub fn records(&self, role: &RoleId, resource: &ResourceId) -> Result<Vec<PermissionRecord>> {
        ensure_role(role)?;
        ensure_resource(resource)?;
        self.store.records(role, resource)
    }

    // ------------------------------------------------------------------
    // Evaluation
    // ------------------------------------------------------------------

    /// Whether `role` (or one of its sub-roles) may perform `action`.
    pub fn has_access(&self, role: &RoleId, action: &str, resource: &ResourceId) -> Result<bool> {
        ensure_role(role)?;
        self.has_access_any([role], action, resource)
    }

    /// Whether any of `roles` may perform `action`. Absent or blank roles in
    /// the set are ignored; an empty set is allowed implicitly.
    pub fn has_access_any<'a, I, R>(
        &self,
        roles: I,
        action: &str,
        resource: &ResourceId,
    ) -> Result<bool>
    where
        I: IntoIterator<Item = R>,
        R: Into<Option<&'a RoleId>>,
    {
        Ok(self.evaluate(roles, action, resource)?.is_allowed())
    }

    /// Decisive result of the hierarchy sweep.
    ///
    /// Levels are evaluated breadth-first. Within a level an explicit allow
    /// beats an explicit deny; the first level with any explicit result
    /// decides. Without one, the call is denied implicitly if any visited role
    /// was implicitly denied, and allowed implicitly otherwise.
    pub fn evaluate<'a, I, R>(
        &self,
        roles: I,
        action: &str,
        resource: &ResourceId,
    ) -> Result<PermissionResultType>
    where
        I: IntoIterator<Item = R>,
        R: Into<Option<&'a RoleId>>,
    {
        ensure_resource(resource)?;

        let graph = self.roles.read();
        let mut visited: AHashSet<RoleId> = AHashSet::new();
        let mut frontier: Vec<RoleId> = roles
            .into_iter()
            .filter_map(|role| -> Option<&'a RoleId> { role.into() })
            .filter(|role| !role.is_blank())
            .cloned()
            .collect();
        let mut implicit_deny = false;
        let mut depth = 0usize;

        while !frontier.is_empty() {
            let mut next = Vec::new();
            let mut explicit_deny = false;

            for role in frontier {
                if !visited.insert(role.clone()) {
                    continue;
                }
                next.extend(graph.sub_roles(&role).cloned());

                match self.store.lookup(&role, action, resource)? {
                    PermissionResultType::AllowExplicitly => {
                        tracing::debug!(%role, action, %resource, depth, "allowed explicitly");
                        return Ok(PermissionResultType::AllowExplicitly);
                    }
                    PermissionResultType::DenyExplicitly => explicit_deny = true,
                    PermissionResultType::DenyImplicitly => implicit_deny = true,
                    PermissionResultType::AllowImplicitly => {}
                }
            }

            tracing::trace!(depth, explicit_deny, implicit_deny, "level evaluated");
            if explicit_deny {
                tracing::debug!(action, %resource, depth, "denied explicitly");
                return Ok(PermissionResultType::DenyExplicitly);
            }
            frontier = next;
            depth += 1;
        }

        let result = if implicit_deny {
            PermissionResultType::DenyImplicitly
        } else {
            PermissionResultType::AllowImplicitly
        };
        tracing::debug!(action, %resource, %result, "no explicit rule");
        Ok(result)
    }
}
