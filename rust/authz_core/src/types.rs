//! Domain types shared across authz_core modules.

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! identifier {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Blank identifiers stand in for an absent role/resource.
            pub fn is_blank(&self) -> bool {
                self.0.trim().is_empty()
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

identifier!(
    /// Unique identifier of a role.
    RoleId
);

identifier!(
    /// Unique identifier of a protected resource.
    ResourceId
);

/// Which actions a record covers: one named action or all of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope<'a> {
    Action(&'a str),
    All,
}

impl<'a> Scope<'a> {
    pub fn action(&self) -> Option<&'a str> {
        match *self {
            Scope::Action(action) => Some(action),
            Scope::All => None,
        }
    }
}

impl<'a> From<Option<&'a str>> for Scope<'a> {
    fn from(action: Option<&'a str>) -> Self {
        action.map_or(Scope::All, Scope::Action)
    }
}

/// Polarity of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effect {
    Allow,
    Deny,
}

/// Stored record type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PermissionType {
    Allow,
    Deny,
    AllowAll,
    DenyAll,
}

impl PermissionType {
    pub fn new(scope: Scope<'_>, effect: Effect) -> Self {
        match (scope, effect) {
            (Scope::Action(_), Effect::Allow) => Self::Allow,
            (Scope::Action(_), Effect::Deny) => Self::Deny,
            (Scope::All, Effect::Allow) => Self::AllowAll,
            (Scope::All, Effect::Deny) => Self::DenyAll,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allow => "ALLOW",
            Self::Deny => "DENY",
            Self::AllowAll => "ALLOW_ALL",
            Self::DenyAll => "DENY_ALL",
        }
    }

    pub fn effect(&self) -> Effect {
        match self {
            Self::Allow | Self::AllowAll => Effect::Allow,
            Self::Deny | Self::DenyAll => Effect::Deny,
        }
    }

    /// Whether this type covers every action on the resource.
    pub fn is_wildcard(&self) -> bool {
        matches!(self, Self::AllowAll | Self::DenyAll)
    }
}

impl fmt::Display for PermissionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One stored permission. `action` is `None` for wildcard records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionRecord {
    pub role: RoleId,
    pub resource: ResourceId,
    pub action: Option<String>,
    pub kind: PermissionType,
}

impl PermissionRecord {
    pub fn scope(&self) -> Scope<'_> {
        Scope::from(self.action.as_deref())
    }
}

/// Outcome of evaluating one role (or a whole role set) for an action.
///
/// Explicit results come from a configured record and end hierarchy
/// traversal. Implicit results are defaults: a scope is implicitly denied
/// when some role holds an allow for it, and implicitly allowed otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PermissionResultType {
    AllowExplicitly,
    DenyExplicitly,
    AllowImplicitly,
    DenyImplicitly,
}

impl PermissionResultType {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::AllowExplicitly | Self::AllowImplicitly)
    }

    pub fn is_explicit(&self) -> bool {
        matches!(self, Self::AllowExplicitly | Self::DenyExplicitly)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AllowExplicitly => "ALLOW_EXPLICITLY",
            Self::DenyExplicitly => "DENY_EXPLICITLY",
            Self::AllowImplicitly => "ALLOW_IMPLICITLY",
            Self::DenyImplicitly => "DENY_IMPLICITLY",
        }
    }
}

impl fmt::Display for PermissionResultType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
