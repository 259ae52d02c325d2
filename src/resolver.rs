use crate::cache::{NoCache, PersistentCache};
use crate::config::{AccessConfig, DEFAULT_CACHE_PREFIX, DEFAULT_CACHE_TTL_SECS};
use crate::dialect::{BooleanDialect, Dialect};
use crate::error::{Error, Result};
use crate::registry::{ModuleRegistry, StaticModuleRegistry};
use crate::resolved::{Prefetch, ResolvedPermissionSet};
use crate::resolver_cache::ResolverCache;
use crate::store::Store;
use crate::types::{GroupId, ModuleName, PageId, PageSlug, PrincipalId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

const CACHE_FORMAT_VERSION: u32 = 2;

// Principal ids never contain `#`, so these keys cannot clash with sets.
const GLOBAL_GENERATION_SUFFIX: &str = "#gen";
const PRINCIPAL_GENERATION_INFIX: &str = "#gen#";

/// Invalidation tokens shared through the persistent cache.
///
/// Every invalidation writes a fresh random token, so a set built from an
/// older snapshot never matches again, even across resolvers that do not
/// share a [`ResolverCache`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct Generation {
    global: Option<String>,
    principal: Option<String>,
}

#[derive(Serialize)]
struct CachedEnvelopeRef<'a> {
    signature: &'a str,
    generation: &'a Generation,
    set: &'a ResolvedPermissionSet,
}

#[derive(Deserialize)]
struct CachedEnvelope {
    signature: String,
    generation: Generation,
    set: ResolvedPermissionSet,
}

/// Cache invalidation hooks called by the mutation layer.
#[async_trait]
pub trait Invalidate: Send + Sync {
    /// Drops cached facts of one principal.
    async fn invalidate(&self, principal: &PrincipalId);

    /// Drops cached facts of every principal.
    async fn invalidate_all(&self);
}

#[async_trait]
impl<T> Invalidate for Arc<T>
where
    T: Invalidate + ?Sized,
{
    async fn invalidate(&self, principal: &PrincipalId) {
        (**self).invalidate(principal).await;
    }

    async fn invalidate_all(&self) {
        (**self).invalidate_all().await;
    }
}

/// Resolves page and module access for principals.
///
/// Facts for a principal are fetched once with five bulk reads, folded into a
/// [`ResolvedPermissionSet`] and kept in the injected [`ResolverCache`] and,
/// when configured, in a [`PersistentCache`] shared across resolvers.
/// Access checks never fail: any store error denies non-public resources.
pub struct PermissionResolver<S, C = NoCache> {
    store: S,
    cache: C,
    resolved: Arc<ResolverCache>,
    dialect: Arc<dyn Dialect>,
    registry: Arc<dyn ModuleRegistry>,
    cache_ttl: Duration,
    cache_prefix: String,
    cache_signature: String,
}

impl<S, C> fmt::Debug for PermissionResolver<S, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PermissionResolver")
            .field("dialect", &self.dialect)
            .field("resolved", &self.resolved.len())
            .field("cache_ttl", &self.cache_ttl)
            .field("cache_prefix", &self.cache_prefix)
            .finish_non_exhaustive()
    }
}

/// Builder for [`PermissionResolver`].
pub struct PermissionResolverBuilder<S, C = NoCache> {
    store: S,
    cache: C,
    resolved: Option<Arc<ResolverCache>>,
    dialect: Arc<dyn Dialect>,
    registry: Arc<dyn ModuleRegistry>,
    cache_ttl: Duration,
    cache_prefix: String,
}

impl<S> PermissionResolverBuilder<S, NoCache> {
    /// Creates a new builder with default configuration.
    pub fn new(store: S) -> Self {
        Self {
            store,
            cache: NoCache,
            resolved: None,
            dialect: Arc::new(BooleanDialect),
            registry: Arc::new(StaticModuleRegistry::new()),
            cache_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
            cache_prefix: DEFAULT_CACHE_PREFIX.to_string(),
        }
    }
}

impl<S, C> PermissionResolverBuilder<S, C> {
    /// Applies TTL, key prefix, dialect and module registry from `config`.
    pub fn config(mut self, config: &AccessConfig) -> Self {
        self.cache_ttl = config.cache_ttl();
        self.cache_prefix = config.cache_prefix.clone();
        self.dialect = config.dialect.into_dialect();
        self.registry = Arc::new(StaticModuleRegistry::from(&config.modules));
        self
    }

    /// Sets the storage dialect of individual grant rows.
    pub fn dialect(mut self, dialect: Arc<dyn Dialect>) -> Self {
        self.dialect = dialect;
        self
    }

    /// Sets the module registry.
    pub fn registry(mut self, registry: Arc<dyn ModuleRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Shares an existing in-memory cache instead of creating one.
    pub fn resolver_cache(mut self, resolved: Arc<ResolverCache>) -> Self {
        self.resolved = Some(resolved);
        self
    }

    /// Sets the lifetime of persisted sets.
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Sets the key prefix of persisted sets.
    pub fn cache_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.cache_prefix = prefix.into();
        self
    }

    /// Sets the persistent cache implementation.
    pub fn cache<C2: PersistentCache>(self, cache: C2) -> PermissionResolverBuilder<S, C2> {
        PermissionResolverBuilder {
            store: self.store,
            cache,
            resolved: self.resolved,
            dialect: self.dialect,
            registry: self.registry,
            cache_ttl: self.cache_ttl,
            cache_prefix: self.cache_prefix,
        }
    }

    /// Builds the resolver.
    pub fn build(self) -> PermissionResolver<S, C> {
        let cache_signature = format!("v{CACHE_FORMAT_VERSION};dialect:{}", self.dialect.name());

        PermissionResolver {
            store: self.store,
            cache: self.cache,
            resolved: self.resolved.unwrap_or_default(),
            dialect: self.dialect,
            registry: self.registry,
            cache_ttl: self.cache_ttl,
            cache_prefix: self.cache_prefix,
            cache_signature,
        }
    }
}

impl<S, C> PermissionResolver<S, C>
where
    S: Store,
    C: PersistentCache,
{
    /// Resolves and caches every access fact of a principal.
    ///
    /// Returns the cached set when one exists. Otherwise consults the
    /// persistent cache, and on a miss issues exactly five bulk reads.
    ///
    /// A rebuild that overlaps an invalidation, in this resolver or in any
    /// other one sharing the persistent cache, is returned to the caller
    /// but not cached.
    pub async fn initialize(&self, principal: &PrincipalId) -> Result<Arc<ResolvedPermissionSet>> {
        if let Some(set) = self.resolved.get(principal) {
            return Ok(set);
        }

        let epoch = self.resolved.epoch(principal);
        let generation = self.generation(principal).await;
        if let Some(set) = self.load_persisted(principal, &generation).await {
            let set = Arc::new(set);
            self.resolved
                .insert_if_current(principal, epoch, Arc::clone(&set));
            return Ok(set);
        }

        let set = Arc::new(self.prefetch(principal).await?);
        if self.generation(principal).await != generation {
            tracing::debug!(
                principal = %principal,
                "principal invalidated elsewhere during rebuild, result not cached"
            );
            return Ok(set);
        }
        if self
            .resolved
            .insert_if_current(principal, epoch, Arc::clone(&set))
        {
            self.persist(principal, &set, &generation).await;
            // An invalidation may have landed while persisting.
            if !self.resolved.is_current(principal, epoch) {
                self.cache.delete(&self.cache_key(principal)).await;
            }
        } else {
            tracing::debug!(
                principal = %principal,
                "principal invalidated during rebuild, result not cached"
            );
        }
        Ok(set)
    }

    /// Returns whether a principal (or an anonymous visitor) may open a page.
    ///
    /// Public pages are allowed before any principal resolution happens.
    pub async fn can_access_page(&self, principal: Option<&PrincipalId>, page: &PageId) -> bool {
        if self.is_public_page(page).await {
            return true;
        }
        let Some(principal) = principal else {
            return false;
        };
        self.resolve_or_deny(principal)
            .await
            .is_some_and(|set| set.allows_page(page))
    }

    /// Returns whether a principal (or an anonymous visitor) may use a module.
    pub async fn can_access_module(
        &self,
        principal: Option<&PrincipalId>,
        module: &ModuleName,
    ) -> bool {
        if self.registry.is_public(module) || !self.registry.gating_enabled() {
            return true;
        }
        let Some(principal) = principal else {
            return false;
        };
        self.resolve_or_deny(principal)
            .await
            .is_some_and(|set| set.allows_module(module))
    }

    /// Returns whether a page is public and active.
    ///
    /// Reuses the public pages of any resolved principal, and queries the
    /// store directly when nobody has been resolved yet.
    pub async fn is_public_page(&self, page: &PageId) -> bool {
        if let Some(source) = self.resolved.public_source() {
            return source.public_pages().contains(page);
        }
        match self.store.page_public(page.clone()).await {
            Ok(public) => public,
            Err(error) => {
                tracing::warn!(page = %page, error = %error, "public page lookup failed, denying");
                false
            }
        }
    }

    /// Returns whether the page with `slug` is public and active.
    pub async fn is_public_page_by_slug(&self, slug: &PageSlug) -> bool {
        if let Some(source) = self.resolved.public_source() {
            return source.public_pages().contains_slug(slug);
        }
        match self.store.page_public_by_slug(slug.clone()).await {
            Ok(public) => public,
            Err(error) => {
                tracing::warn!(slug = %slug, error = %error, "public page lookup failed, denying");
                false
            }
        }
    }

    /// Every page the principal may open, public pages included, sorted.
    ///
    /// Empty when resolution fails.
    pub async fn accessible_pages(&self, principal: &PrincipalId) -> Vec<PageId> {
        self.resolve_or_deny(principal)
            .await
            .map(|set| set.accessible_pages())
            .unwrap_or_default()
    }

    /// Groups of a principal, sorted. Empty when resolution fails.
    pub async fn groups_of(&self, principal: &PrincipalId) -> Vec<GroupId> {
        let Some(set) = self.resolve_or_deny(principal).await else {
            return Vec::new();
        };
        let mut groups: Vec<GroupId> = set.groups().iter().cloned().collect();
        groups.sort();
        groups
    }

    /// Drops in-memory and persisted facts of exactly one principal.
    ///
    /// Also rotates the principal's shared generation token, so rebuilds in
    /// flight elsewhere are not written back.
    pub async fn invalidate(&self, principal: &PrincipalId) {
        self.resolved.invalidate(principal);
        self.rotate_generation(&self.principal_generation_key(principal))
            .await;
        self.cache.delete(&self.cache_key(principal)).await;
        tracing::debug!(principal = %principal, "invalidated resolved permissions");
    }

    /// Drops every in-memory set and every enumerable persisted set.
    ///
    /// Sets left behind by backends that cannot enumerate keys are rejected
    /// on load because the global generation token changes.
    pub async fn invalidate_all(&self) {
        self.resolved.invalidate_all();
        if !self.cache.delete_prefix(&self.cache_prefix).await {
            tracing::debug!(
                backend = self.cache.name(),
                "persistent cache cannot enumerate keys, stale entries rejected by generation"
            );
        }
        self.rotate_generation(&self.global_generation_key()).await;
        tracing::debug!("invalidated all resolved permissions");
    }

    /// The in-memory cache this resolver serves from.
    pub fn resolver_cache(&self) -> &Arc<ResolverCache> {
        &self.resolved
    }

    /// The storage dialect this resolver folds grants with.
    pub fn dialect(&self) -> &Arc<dyn Dialect> {
        &self.dialect
    }

    async fn resolve_or_deny(&self, principal: &PrincipalId) -> Option<Arc<ResolvedPermissionSet>> {
        match self.initialize(principal).await {
            Ok(set) => Some(set),
            Err(error) => {
                tracing::warn!(
                    principal = %principal,
                    error = %error,
                    "permission resolution failed, denying non-public access"
                );
                None
            }
        }
    }

    async fn prefetch(&self, principal: &PrincipalId) -> Result<ResolvedPermissionSet> {
        let (groups, individual, public_pages) = futures::try_join!(
            self.store.principal_groups(principal.clone()),
            self.store.individual_page_grants(principal.clone()),
            self.store.public_pages(),
        )
        .map_err(Error::from)?;

        let (group_pages, group_modules) = futures::try_join!(
            self.store.group_page_grants(&groups),
            self.store.group_module_grants(&groups),
        )
        .map_err(Error::from)?;

        tracing::debug!(
            principal = %principal,
            groups = groups.len(),
            individual = individual.len(),
            group_pages = group_pages.len(),
            "resolved permissions from store"
        );

        Ok(ResolvedPermissionSet::build(
            self.dialect.as_ref(),
            Prefetch {
                groups,
                individual,
                group_pages,
                group_modules,
                public_pages,
            },
        ))
    }

    fn cache_key(&self, principal: &PrincipalId) -> String {
        format!("{}{}", self.cache_prefix, principal)
    }

    fn global_generation_key(&self) -> String {
        format!("{}{GLOBAL_GENERATION_SUFFIX}", self.cache_prefix)
    }

    fn principal_generation_key(&self, principal: &PrincipalId) -> String {
        format!("{}{PRINCIPAL_GENERATION_INFIX}{}", self.cache_prefix, principal)
    }

    async fn generation(&self, principal: &PrincipalId) -> Generation {
        let global_key = self.global_generation_key();
        let principal_key = self.principal_generation_key(principal);
        let (global, principal) =
            futures::join!(self.cache.get(&global_key), self.cache.get(&principal_key));
        Generation {
            global: global.and_then(|raw| String::from_utf8(raw).ok()),
            principal: principal.and_then(|raw| String::from_utf8(raw).ok()),
        }
    }

    async fn rotate_generation(&self, key: &str) {
        // Outlives every set written under the previous token.
        let ttl = self.cache_ttl.saturating_mul(2);
        let token = uuid::Uuid::new_v4().to_string();
        self.cache.set(key, token.into_bytes(), ttl).await;
    }

    async fn load_persisted(
        &self,
        principal: &PrincipalId,
        generation: &Generation,
    ) -> Option<ResolvedPermissionSet> {
        let raw = self.cache.get(&self.cache_key(principal)).await?;
        match serde_json::from_slice::<CachedEnvelope>(&raw) {
            Ok(envelope) if envelope.signature != self.cache_signature => {
                tracing::debug!(
                    principal = %principal,
                    "persistent cache entry has foreign signature"
                );
                None
            }
            Ok(envelope) if envelope.generation != *generation => {
                tracing::debug!(
                    principal = %principal,
                    "persistent cache entry predates an invalidation"
                );
                None
            }
            Ok(envelope) => {
                tracing::debug!(principal = %principal, "persistent cache hit");
                Some(envelope.set)
            }
            Err(error) => {
                tracing::warn!(
                    principal = %principal,
                    error = %error,
                    "undecodable persistent cache entry"
                );
                None
            }
        }
    }

    async fn persist(
        &self,
        principal: &PrincipalId,
        set: &ResolvedPermissionSet,
        generation: &Generation,
    ) {
        let envelope = CachedEnvelopeRef {
            signature: &self.cache_signature,
            generation,
            set,
        };
        match serde_json::to_vec(&envelope) {
            Ok(bytes) => {
                self.cache
                    .set(&self.cache_key(principal), bytes, self.cache_ttl)
                    .await;
            }
            Err(error) => {
                tracing::warn!(
                    principal = %principal,
                    error = %error,
                    "failed to encode resolved permissions"
                );
            }
        }
    }
}

#[async_trait]
impl<S, C> Invalidate for PermissionResolver<S, C>
where
    S: Store,
    C: PersistentCache,
{
    async fn invalidate(&self, principal: &PrincipalId) {
        PermissionResolver::invalidate(self, principal).await;
    }

    async fn invalidate_all(&self) {
        PermissionResolver::invalidate_all(self).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryCache;
    use crate::MemoryStore;
    use crate::dialect::PresenceDialect;
    use crate::error::StoreError;
    use crate::permission_store::{PermissionStore, PermissionStoreBuilder};
    use std::sync::atomic::{AtomicBool, Ordering};
    use crate::store::{GrantStore, GroupStore, IndividualGrant, PageStore, PublicPage};
    use crate::types::{Resource, RowId};
    use futures::executor::block_on;

    fn principal(value: &str) -> PrincipalId {
        PrincipalId::try_from(value).unwrap()
    }

    fn page(value: &str) -> PageId {
        PageId::try_from(value).unwrap()
    }

    fn group(value: &str) -> GroupId {
        GroupId::try_from(value).unwrap()
    }

    fn module(value: &str) -> ModuleName {
        ModuleName::try_from(value).unwrap()
    }

    fn seeded_store() -> MemoryStore {
        let store = MemoryStore::new();
        store.upsert_page(page("p1"), PageSlug::try_from("members").unwrap(), false, true);
        store.upsert_page(page("p2"), PageSlug::try_from("home").unwrap(), true, true);
        store.upsert_page(page("p3"), PageSlug::try_from("admin").unwrap(), false, true);
        block_on(store.insert_membership(None, principal("m1"), group("g1"))).unwrap();
        block_on(store.insert_group_grant(None, group("g1"), Resource::Page(page("p1")))).unwrap();
        store
    }

    #[test]
    fn group_grant_allows_member() {
        let resolver = PermissionResolverBuilder::new(seeded_store()).build();

        assert!(block_on(resolver.can_access_page(Some(&principal("m1")), &page("p1"))));
    }

    #[test]
    fn unrelated_page_is_denied() {
        let resolver = PermissionResolverBuilder::new(seeded_store()).build();

        assert!(!block_on(resolver.can_access_page(Some(&principal("m1")), &page("p3"))));
        assert!(!block_on(resolver.can_access_page(Some(&principal("m2")), &page("p1"))));
    }

    #[test]
    fn individual_denial_beats_group_grant() {
        let store = seeded_store();
        block_on(store.insert_individual_grant(IndividualGrant {
            id: None,
            principal: principal("m1"),
            page: page("p1"),
            allowed: Some(false),
        }))
        .unwrap();
        let resolver = PermissionResolverBuilder::new(store).build();

        assert!(!block_on(resolver.can_access_page(Some(&principal("m1")), &page("p1"))));
    }

    #[test]
    fn null_denial_column_is_never_a_grant() {
        let store = seeded_store();
        block_on(store.insert_individual_grant(IndividualGrant {
            id: None,
            principal: principal("m1"),
            page: page("p3"),
            allowed: None,
        }))
        .unwrap();
        let resolver = PermissionResolverBuilder::new(store).build();

        assert!(!block_on(resolver.can_access_page(Some(&principal("m1")), &page("p3"))));
    }

    #[test]
    fn initialize_issues_five_reads_once() {
        let store = seeded_store();
        let resolver = PermissionResolverBuilder::new(store.clone()).build();
        let m1 = principal("m1");

        block_on(resolver.initialize(&m1)).unwrap();
        assert_eq!(store.read_count(), 5);

        block_on(resolver.initialize(&m1)).unwrap();
        assert!(block_on(resolver.can_access_page(Some(&m1), &page("p1"))));
        assert_eq!(store.read_count(), 5);
    }

    #[test]
    fn anonymous_public_page_skips_principal_resolution() {
        let store = seeded_store();
        let resolver = PermissionResolverBuilder::new(store.clone()).build();

        assert!(block_on(resolver.can_access_page(None, &page("p2"))));
        assert_eq!(store.read_count(), 1);
        assert!(resolver.resolver_cache().is_empty());

        assert!(!block_on(resolver.can_access_page(None, &page("p1"))));
    }

    #[test]
    fn public_lookup_reuses_resolved_principal() {
        let store = seeded_store();
        let resolver = PermissionResolverBuilder::new(store.clone()).build();
        block_on(resolver.initialize(&principal("m1"))).unwrap();
        store.reset_read_count();

        assert!(block_on(resolver.is_public_page(&page("p2"))));
        assert!(block_on(resolver.is_public_page_by_slug(&PageSlug::try_from("home").unwrap())));
        assert!(!block_on(resolver.is_public_page(&page("p1"))));
        assert_eq!(store.read_count(), 0);
    }

    #[test]
    fn store_outage_fails_closed() {
        let store = seeded_store();
        let resolver = PermissionResolverBuilder::new(store.clone()).build();
        let m1 = principal("m1");

        store.set_fail_reads(true);
        assert!(!block_on(resolver.can_access_page(Some(&m1), &page("p1"))));
        assert!(matches!(block_on(resolver.initialize(&m1)), Err(Error::Store(_))));
        assert!(resolver.resolver_cache().is_empty());
        assert!(block_on(resolver.accessible_pages(&m1)).is_empty());

        store.set_fail_reads(false);
        assert!(block_on(resolver.can_access_page(Some(&m1), &page("p1"))));
    }

    #[test]
    fn invalidate_reflects_new_grant() {
        let store = seeded_store();
        let resolver = PermissionResolverBuilder::new(store.clone()).build();
        let m1 = principal("m1");
        assert!(!block_on(resolver.can_access_page(Some(&m1), &page("p3"))));

        block_on(store.insert_individual_grant(IndividualGrant {
            id: None,
            principal: m1.clone(),
            page: page("p3"),
            allowed: Some(true),
        }))
        .unwrap();
        assert!(!block_on(resolver.can_access_page(Some(&m1), &page("p3"))));

        block_on(resolver.invalidate(&m1));
        assert!(block_on(resolver.can_access_page(Some(&m1), &page("p3"))));
    }

    #[test]
    fn persistent_cache_is_shared_between_resolvers() {
        let store = seeded_store();
        let cache = MemoryCache::new(16);
        let m1 = principal("m1");

        let first = PermissionResolverBuilder::new(store.clone())
            .cache(cache.clone())
            .build();
        block_on(first.initialize(&m1)).unwrap();
        assert_eq!(cache.len(), 1);
        store.reset_read_count();

        let second = PermissionResolverBuilder::new(store.clone())
            .cache(cache.clone())
            .build();
        block_on(second.initialize(&m1)).unwrap();
        assert!(block_on(second.can_access_page(Some(&m1), &page("p1"))));
        assert!(block_on(second.can_access_page(Some(&m1), &page("p2"))));
        assert_eq!(store.read_count(), 0);

        block_on(second.invalidate(&m1));
        assert!(block_on(cache.get(&second.cache_key(&m1))).is_none());
    }

    #[test]
    fn persistent_cache_isolates_dialects() {
        let store = seeded_store();
        let cache = MemoryCache::new(16);
        let m1 = principal("m1");

        let boolean = PermissionResolverBuilder::new(store.clone())
            .cache(cache.clone())
            .build();
        block_on(boolean.initialize(&m1)).unwrap();
        store.reset_read_count();

        let presence = PermissionResolverBuilder::new(store.clone())
            .dialect(Arc::new(PresenceDialect))
            .cache(cache)
            .build();
        block_on(presence.initialize(&m1)).unwrap();
        assert_eq!(store.read_count(), 5);
    }

    #[test]
    fn invalidate_all_clears_persisted_sets() {
        let store = seeded_store();
        let cache = MemoryCache::new(16);
        let resolver = PermissionResolverBuilder::new(store)
            .cache(cache.clone())
            .build();
        block_on(resolver.initialize(&principal("m1"))).unwrap();
        block_on(resolver.initialize(&principal("m2"))).unwrap();
        assert_eq!(cache.len(), 2);

        block_on(resolver.invalidate_all());
        assert!(block_on(cache.get(&resolver.cache_key(&principal("m1")))).is_none());
        assert!(block_on(cache.get(&resolver.cache_key(&principal("m2")))).is_none());
        assert_eq!(cache.len(), 1);
        assert!(resolver.resolver_cache().is_empty());
    }

    #[test]
    fn entry_persisted_before_invalidation_is_rejected() {
        let store = seeded_store();
        let cache = MemoryCache::new(16);
        let m1 = principal("m1");
        let resolver = PermissionResolverBuilder::new(store.clone())
            .cache(cache.clone())
            .build();
        block_on(resolver.initialize(&m1)).unwrap();
        let key = resolver.cache_key(&m1);
        let stale = block_on(cache.get(&key)).unwrap();

        block_on(resolver.invalidate(&m1));
        // A slow writer puts the old entry back after the invalidation.
        block_on(cache.set(&key, stale, Duration::from_secs(60)));
        store.reset_read_count();

        let fresh = PermissionResolverBuilder::new(store.clone())
            .cache(cache)
            .build();
        block_on(fresh.initialize(&m1)).unwrap();
        assert_eq!(store.read_count(), 5);
    }

    #[test]
    fn ttl_beyond_instant_range_still_resolves() {
        let config: AccessConfig =
            serde_json::from_str(r#"{ "cache_ttl_secs": 18446744073709551615 }"#).unwrap();
        let resolver = PermissionResolverBuilder::new(seeded_store())
            .config(&config)
            .cache(MemoryCache::new(16))
            .build();
        let m1 = principal("m1");

        assert!(block_on(resolver.can_access_page(Some(&m1), &page("p1"))));
        block_on(resolver.invalidate(&m1));
        block_on(resolver.invalidate_all());
        assert!(block_on(resolver.can_access_page(Some(&m1), &page("p1"))));
    }

    #[test]
    fn module_access_follows_registry_and_groups() {
        let store = seeded_store();
        block_on(store.insert_group_grant(None, group("g1"), Resource::Module(module("blog"))))
            .unwrap();
        let registry = StaticModuleRegistry::new()
            .gating_enabled(true)
            .public_module(module("news"));
        let resolver = PermissionResolverBuilder::new(store)
            .registry(Arc::new(registry))
            .build();
        let m1 = principal("m1");

        assert!(block_on(resolver.can_access_module(None, &module("news"))));
        assert!(!block_on(resolver.can_access_module(None, &module("blog"))));
        assert!(block_on(resolver.can_access_module(Some(&m1), &module("blog"))));
        assert!(!block_on(resolver.can_access_module(Some(&m1), &module("billing"))));
    }

    #[test]
    fn module_gating_disabled_allows_everyone() {
        let resolver = PermissionResolverBuilder::new(seeded_store()).build();

        assert!(block_on(resolver.can_access_module(None, &module("billing"))));
        assert!(resolver.resolver_cache().is_empty());
    }

    #[test]
    fn accessible_pages_and_groups() {
        let resolver = PermissionResolverBuilder::new(seeded_store()).build();
        let m1 = principal("m1");

        assert_eq!(block_on(resolver.accessible_pages(&m1)), vec![page("p1"), page("p2")]);
        assert_eq!(block_on(resolver.groups_of(&m1)), vec![group("g1")]);
    }

    type SharedResolver = PermissionResolver<MemoryStore, MemoryCache>;

    /// What happens in the middle of a rebuild.
    enum Race {
        /// The resolver's own cache invalidates the principal.
        LocalInvalidation(Arc<ResolverCache>),
        /// Another scope grants the page once, after the individual rows
        /// were read.
        AdminGrant {
            admin: PermissionStore<MemoryStore, Arc<SharedResolver>>,
            page: PageId,
            armed: AtomicBool,
        },
    }

    /// Store that interleaves an invalidation with a rebuild.
    struct RacingStore {
        inner: MemoryStore,
        race: Race,
    }

    #[async_trait]
    impl GroupStore for RacingStore {
        async fn principal_groups(
            &self,
            principal: PrincipalId,
        ) -> std::result::Result<Vec<GroupId>, StoreError> {
            if let Race::LocalInvalidation(resolved) = &self.race {
                resolved.invalidate(&principal);
            }
            self.inner.principal_groups(principal).await
        }

        async fn membership_exists(
            &self,
            principal: PrincipalId,
            group: GroupId,
        ) -> std::result::Result<bool, StoreError> {
            self.inner.membership_exists(principal, group).await
        }

        async fn insert_membership(
            &self,
            id: Option<RowId>,
            principal: PrincipalId,
            group: GroupId,
        ) -> std::result::Result<(), StoreError> {
            self.inner.insert_membership(id, principal, group).await
        }

        async fn delete_membership(
            &self,
            principal: PrincipalId,
            group: GroupId,
        ) -> std::result::Result<bool, StoreError> {
            self.inner.delete_membership(principal, group).await
        }
    }

    #[async_trait]
    impl GrantStore for RacingStore {
        async fn individual_page_grants(
            &self,
            principal: PrincipalId,
        ) -> std::result::Result<Vec<IndividualGrant>, StoreError> {
            let rows = self.inner.individual_page_grants(principal.clone()).await?;
            if let Race::AdminGrant { admin, page, armed } = &self.race {
                if armed.swap(false, Ordering::SeqCst) {
                    admin
                        .grant_individual(&principal, page)
                        .await
                        .map_err(StoreError::from)?;
                }
            }
            Ok(rows)
        }

        async fn individual_grant(
            &self,
            principal: PrincipalId,
            page: PageId,
        ) -> std::result::Result<Option<IndividualGrant>, StoreError> {
            self.inner.individual_grant(principal, page).await
        }

        async fn insert_individual_grant(
            &self,
            grant: IndividualGrant,
        ) -> std::result::Result<(), StoreError> {
            self.inner.insert_individual_grant(grant).await
        }

        async fn update_individual_grant(
            &self,
            principal: PrincipalId,
            page: PageId,
            allowed: Option<bool>,
        ) -> std::result::Result<bool, StoreError> {
            self.inner
                .update_individual_grant(principal, page, allowed)
                .await
        }

        async fn delete_individual_grant(
            &self,
            principal: PrincipalId,
            page: PageId,
        ) -> std::result::Result<bool, StoreError> {
            self.inner.delete_individual_grant(principal, page).await
        }

        async fn group_page_grants(
            &self,
            groups: &[GroupId],
        ) -> std::result::Result<Vec<PageId>, StoreError> {
            self.inner.group_page_grants(groups).await
        }

        async fn group_module_grants(
            &self,
            groups: &[GroupId],
        ) -> std::result::Result<Vec<ModuleName>, StoreError> {
            self.inner.group_module_grants(groups).await
        }

        async fn group_grant_exists(
            &self,
            group: GroupId,
            resource: Resource,
        ) -> std::result::Result<bool, StoreError> {
            self.inner.group_grant_exists(group, resource).await
        }

        async fn insert_group_grant(
            &self,
            id: Option<RowId>,
            group: GroupId,
            resource: Resource,
        ) -> std::result::Result<(), StoreError> {
            self.inner.insert_group_grant(id, group, resource).await
        }

        async fn delete_group_grant(
            &self,
            group: GroupId,
            resource: Resource,
        ) -> std::result::Result<bool, StoreError> {
            self.inner.delete_group_grant(group, resource).await
        }
    }

    #[async_trait]
    impl PageStore for RacingStore {
        async fn public_pages(&self) -> std::result::Result<Vec<PublicPage>, StoreError> {
            self.inner.public_pages().await
        }

        async fn page_public(&self, page: PageId) -> std::result::Result<bool, StoreError> {
            self.inner.page_public(page).await
        }

        async fn page_public_by_slug(
            &self,
            slug: PageSlug,
        ) -> std::result::Result<bool, StoreError> {
            self.inner.page_public_by_slug(slug).await
        }
    }

    #[test]
    fn rebuild_racing_an_invalidation_is_not_cached() {
        let resolved = Arc::new(ResolverCache::new());
        let cache = MemoryCache::new(16);
        let store = RacingStore {
            inner: seeded_store(),
            race: Race::LocalInvalidation(Arc::clone(&resolved)),
        };
        let resolver = PermissionResolverBuilder::new(store)
            .resolver_cache(Arc::clone(&resolved))
            .cache(cache.clone())
            .build();
        let m1 = principal("m1");

        let set = block_on(resolver.initialize(&m1)).unwrap();
        assert!(set.allows_page(&page("p1")));
        assert!(resolved.get(&m1).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn rebuild_racing_another_scope_is_not_persisted() {
        let inner = seeded_store();
        let cache = MemoryCache::new(16);
        let m1 = principal("m1");

        // Admin scope with its own in-memory cache.
        let admin_resolver = Arc::new(
            PermissionResolverBuilder::new(inner.clone())
                .cache(cache.clone())
                .build(),
        );
        let admin = PermissionStoreBuilder::new(inner.clone(), admin_resolver).build();
        let racing = PermissionResolverBuilder::new(RacingStore {
            inner: inner.clone(),
            race: Race::AdminGrant {
                admin,
                page: page("p3"),
                armed: AtomicBool::new(true),
            },
        })
        .cache(cache.clone())
        .build();

        let stale = block_on(racing.initialize(&m1)).unwrap();
        assert!(!stale.allows_page(&page("p3")));
        assert_eq!(inner.stored_individual(&m1, &page("p3")).unwrap().allowed, Some(true));
        assert!(racing.resolver_cache().is_empty());
        assert!(block_on(cache.get(&racing.cache_key(&m1))).is_none());

        let fresh = PermissionResolverBuilder::new(inner)
            .cache(cache)
            .build();
        assert!(block_on(fresh.can_access_page(Some(&m1), &page("p3"))));
    }
}
