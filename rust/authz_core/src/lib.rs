//! `authz_core`: role-hierarchy permission engine.
//!
//! Permissions are records of the form (role, action or wildcard, resource,
//! allow/deny). An access check walks the caller's roles and their sub-roles
//! level by level, returning at the first level that yields an explicit
//! result and falling back to the implicit default otherwise.
//!
//! Modules:
//! - `types`: identifiers, permission record types, result type
//! - `roles`: identifier-keyed role graph (sub-role links)
//! - `store`: `PermissionStore` trait plus memory and redb backends
//! - `engine`: `PermissionEngine`: validation, mutations, `has_access`
//! - `config`: JSON policy documents (roles, grants, storage backend)
//! - `error`: `AuthzError` / `StorageError`

pub mod config;
pub mod engine;
pub mod error;
pub mod roles;
pub mod store;
pub mod types;

pub use engine::PermissionEngine;
pub use error::{AuthzError, Result, StorageError};
pub use roles::RoleGraph;
pub use store::memory::MemoryStore;
pub use store::redb_store::RedbStore;
pub use store::PermissionStore;
pub use types::{
    Effect, PermissionRecord, PermissionResultType, PermissionType, ResourceId, RoleId, Scope,
};
