//! Identifier-keyed role graph.
//!
//! Each role maps to the set of roles directly assigned to it. A role does
//! not own its sub-roles; links are plain identifiers, so the graph may hold
//! cycles and diamonds. Consumers traverse it through a visited set.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{AuthzError, Result};
use crate::types::RoleId;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleGraph {
    links: BTreeMap<RoleId, BTreeSet<RoleId>>,
}

fn ensure_role(role: &RoleId) -> Result<()> {
    if role.is_blank() {
        return Err(AuthzError::InvalidArgument(
            "role identifier may not be blank".to_string(),
        ));
    }
    Ok(())
}

impl RoleGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign `child` as a direct sub-role of `parent`.
    /// Returns false if the link already existed.
    pub fn add_sub_role(&mut self, parent: &RoleId, child: &RoleId) -> Result<bool> {
        ensure_role(parent)?;
        ensure_role(child)?;
        Ok(self
            .links
            .entry(parent.clone())
            .or_default()
            .insert(child.clone()))
    }

    /// Remove a direct sub-role link. Returns false if it was not present.
    pub fn remove_sub_role(&mut self, parent: &RoleId, child: &RoleId) -> Result<bool> {
        ensure_role(parent)?;
        let Some(children) = self.links.get_mut(parent) else {
            return Ok(false);
        };
        let removed = children.remove(child);
        if children.is_empty() {
            self.links.remove(parent);
        }
        Ok(removed)
    }

    /// Replace every direct sub-role of `parent`.
    pub fn set_sub_roles<I>(&mut self, parent: &RoleId, children: I) -> Result<()>
    where
        I: IntoIterator<Item = RoleId>,
    {
        ensure_role(parent)?;
        let children: BTreeSet<RoleId> = children.into_iter().collect();
        for child in &children {
            ensure_role(child)?;
        }
        if children.is_empty() {
            self.links.remove(parent);
        } else {
            self.links.insert(parent.clone(), children);
        }
        Ok(())
    }

    /// Direct sub-roles of `role` (empty for unknown roles).
    pub fn sub_roles<'a>(&'a self, role: &RoleId) -> impl Iterator<Item = &'a RoleId> + 'a {
        self.links.get(role).into_iter().flatten()
    }

    /// Roles that have at least one sub-role.
    pub fn parents(&self) -> impl Iterator<Item = &RoleId> {
        self.links.keys()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}
