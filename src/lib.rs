//! Page and module access resolution.
//!
//! A principal's access to a page is decided by three sources, in order:
//! public pages are open to everyone, an individual override wins over
//! anything else, and grants held by the principal's groups fill the rest.
//! Everything not covered is denied.
//!
//! [`PermissionResolver`] fetches all facts of a principal with five bulk
//! reads, keeps them in an injected [`ResolverCache`] and optionally in a
//! [`PersistentCache`] with TTL. [`PermissionStore`] mutates grants and
//! invalidates caches synchronously. [`AccessGate`] is the predicate surface
//! for middleware.
//!
//! # Examples
//!
//! Resolving access with the in-memory store (enable `memory-store`):
//! ```no_run
//! use rs_gatekeeper::{AccessGate, PageId, PermissionResolverBuilder, PrincipalId};
//! # #[cfg(feature = "memory-store")]
//! # {
//! use rs_gatekeeper::MemoryStore;
//! use std::sync::Arc;
//! let store = MemoryStore::new();
//! let resolver = Arc::new(PermissionResolverBuilder::new(store).build());
//! let gate = AccessGate::new(resolver);
//! let member = PrincipalId::try_from("member_1").unwrap();
//! let page = PageId::try_from("page_1").unwrap();
//! let _ = gate.can_access_page(Some(&member), &page);
//! # }
//! ```
//!
//! Picking a persistent backend (enable `memory-cache`):
//! ```no_run
//! # #[cfg(feature = "memory-cache")]
//! # {
//! use rs_gatekeeper::{MemoryCache, PersistentCache, SessionCache, probe_backend};
//! use std::sync::Arc;
//! let shared: Arc<dyn PersistentCache> = Arc::new(MemoryCache::new(1024));
//! let session: Arc<dyn PersistentCache> = Arc::new(SessionCache::new());
//! let backend = probe_backend(vec![shared, session]);
//! # let _ = backend;
//! # }
//! ```
#![forbid(unsafe_code)]

mod cache;
mod config;
mod dialect;
mod error;
mod gate;
mod permission_store;
mod registry;
mod resolved;
mod resolver;
mod resolver_cache;
mod store;
mod types;
#[cfg(any(test, feature = "memory-cache"))]
mod memory_cache;

#[cfg(any(test, feature = "memory-store"))]
mod memory_store;

pub use crate::cache::{NoCache, PersistentCache, probe_backend};
pub use crate::config::{AccessConfig, DEFAULT_CACHE_PREFIX, DEFAULT_CACHE_TTL_SECS, ModuleConfig};
pub use crate::dialect::{BooleanDialect, Dialect, DialectKind, PresenceDialect};
pub use crate::error::{Error, Result, StoreError};
pub use crate::gate::{AccessGate, Decision};
pub use crate::permission_store::{DenyOutcome, PermissionStore, PermissionStoreBuilder};
pub use crate::registry::{ModuleRegistry, StaticModuleRegistry};
pub use crate::resolved::{GrantSource, PageGrant, PublicPages, ResolvedPermissionSet};
pub use crate::resolver::{Invalidate, PermissionResolver, PermissionResolverBuilder};
pub use crate::resolver_cache::{Epoch, ResolverCache};
pub use crate::store::{GrantStore, GroupStore, IndividualGrant, PageStore, PublicPage, Store};
pub use crate::types::{
    GroupId, IdGenerator, ModuleName, PageId, PageSlug, PrincipalId, Resource, RowId,
    UuidGenerator,
};

#[cfg(any(test, feature = "memory-store"))]
pub use crate::memory_store::MemoryStore;

#[cfg(any(test, feature = "memory-cache"))]
pub use crate::memory_cache::{MemoryCache, SessionCache};
