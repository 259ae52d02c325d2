use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::error::StoreError;
use crate::store::{GrantStore, GroupStore, IndividualGrant, PageStore, PublicPage};
use crate::types::{GroupId, ModuleName, PageId, PageSlug, PrincipalId, Resource, RowId};

/// In-memory store implementation for tests and demos.
///
/// Every read call is counted so callers can assert how many round trips a
/// resolution took, and reads or writes can be switched to fail.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

#[derive(Debug, Clone)]
struct PageRecord {
    slug: PageSlug,
    is_public: bool,
    active: bool,
}

#[derive(Debug, Default)]
struct Inner {
    pages: RwLock<HashMap<PageId, PageRecord>>,
    memberships: RwLock<HashMap<(PrincipalId, GroupId), Option<RowId>>>,
    individual: RwLock<HashMap<(PrincipalId, PageId), IndividualGrant>>,
    group_grants: RwLock<HashMap<(GroupId, Resource), Option<RowId>>>,
    reads: AtomicUsize,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a page.
    pub fn upsert_page(&self, page: PageId, slug: PageSlug, is_public: bool, active: bool) {
        write(&self.inner.pages).insert(
            page,
            PageRecord {
                slug,
                is_public,
                active,
            },
        );
    }

    /// Returns the number of read calls served so far.
    pub fn read_count(&self) -> usize {
        self.inner.reads.load(Ordering::SeqCst)
    }

    /// Resets the read counter.
    pub fn reset_read_count(&self) {
        self.inner.reads.store(0, Ordering::SeqCst);
    }

    /// Makes every subsequent read fail (or succeed again).
    pub fn set_fail_reads(&self, on: bool) {
        self.inner.fail_reads.store(on, Ordering::SeqCst);
    }

    /// Makes every subsequent write fail (or succeed again).
    pub fn set_fail_writes(&self, on: bool) {
        self.inner.fail_writes.store(on, Ordering::SeqCst);
    }

    /// Returns the stored individual override, bypassing the read counter.
    pub fn stored_individual(
        &self,
        principal: &PrincipalId,
        page: &PageId,
    ) -> Option<IndividualGrant> {
        read(&self.inner.individual)
            .get(&(principal.clone(), page.clone()))
            .cloned()
    }

    /// Returns the number of stored group grant rows.
    pub fn group_grant_count(&self) -> usize {
        read(&self.inner.group_grants).len()
    }

    fn begin_read(&self) -> std::result::Result<(), StoreError> {
        self.inner.reads.fetch_add(1, Ordering::SeqCst);
        if self.inner.fail_reads.load(Ordering::SeqCst) {
            return Err("memory store: reads unavailable".into());
        }
        Ok(())
    }

    fn begin_write(&self) -> std::result::Result<(), StoreError> {
        if self.inner.fail_writes.load(Ordering::SeqCst) {
            return Err("memory store: writes unavailable".into());
        }
        Ok(())
    }

    fn is_visible(record: &PageRecord) -> bool {
        record.is_public && record.active
    }
}

#[async_trait]
impl GroupStore for MemoryStore {
    async fn principal_groups(
        &self,
        principal: PrincipalId,
    ) -> std::result::Result<Vec<GroupId>, StoreError> {
        self.begin_read()?;
        let guard = read(&self.inner.memberships);
        Ok(guard
            .keys()
            .filter(|(member, _)| member == &principal)
            .map(|(_, group)| group.clone())
            .collect())
    }

    async fn membership_exists(
        &self,
        principal: PrincipalId,
        group: GroupId,
    ) -> std::result::Result<bool, StoreError> {
        self.begin_read()?;
        Ok(read(&self.inner.memberships).contains_key(&(principal, group)))
    }

    async fn insert_membership(
        &self,
        id: Option<RowId>,
        principal: PrincipalId,
        group: GroupId,
    ) -> std::result::Result<(), StoreError> {
        self.begin_write()?;
        write(&self.inner.memberships).insert((principal, group), id);
        Ok(())
    }

    async fn delete_membership(
        &self,
        principal: PrincipalId,
        group: GroupId,
    ) -> std::result::Result<bool, StoreError> {
        self.begin_write()?;
        Ok(write(&self.inner.memberships)
            .remove(&(principal, group))
            .is_some())
    }
}

#[async_trait]
impl GrantStore for MemoryStore {
    async fn individual_page_grants(
        &self,
        principal: PrincipalId,
    ) -> std::result::Result<Vec<IndividualGrant>, StoreError> {
        self.begin_read()?;
        let guard = read(&self.inner.individual);
        Ok(guard
            .values()
            .filter(|grant| grant.principal == principal)
            .cloned()
            .collect())
    }

    async fn individual_grant(
        &self,
        principal: PrincipalId,
        page: PageId,
    ) -> std::result::Result<Option<IndividualGrant>, StoreError> {
        self.begin_read()?;
        Ok(read(&self.inner.individual)
            .get(&(principal, page))
            .cloned())
    }

    async fn insert_individual_grant(
        &self,
        grant: IndividualGrant,
    ) -> std::result::Result<(), StoreError> {
        self.begin_write()?;
        write(&self.inner.individual).insert((grant.principal.clone(), grant.page.clone()), grant);
        Ok(())
    }

    async fn update_individual_grant(
        &self,
        principal: PrincipalId,
        page: PageId,
        allowed: Option<bool>,
    ) -> std::result::Result<bool, StoreError> {
        self.begin_write()?;
        let mut guard = write(&self.inner.individual);
        Ok(match guard.get_mut(&(principal, page)) {
            Some(grant) => {
                grant.allowed = allowed;
                true
            }
            None => false,
        })
    }

    async fn delete_individual_grant(
        &self,
        principal: PrincipalId,
        page: PageId,
    ) -> std::result::Result<bool, StoreError> {
        self.begin_write()?;
        Ok(write(&self.inner.individual)
            .remove(&(principal, page))
            .is_some())
    }

    async fn group_page_grants(
        &self,
        groups: &[GroupId],
    ) -> std::result::Result<Vec<PageId>, StoreError> {
        self.begin_read()?;
        let wanted: HashSet<&GroupId> = groups.iter().collect();
        let guard = read(&self.inner.group_grants);
        Ok(guard
            .keys()
            .filter(|(group, _)| wanted.contains(group))
            .filter_map(|(_, resource)| match resource {
                Resource::Page(page) => Some(page.clone()),
                Resource::Module(_) => None,
            })
            .collect())
    }

    async fn group_module_grants(
        &self,
        groups: &[GroupId],
    ) -> std::result::Result<Vec<ModuleName>, StoreError> {
        self.begin_read()?;
        let wanted: HashSet<&GroupId> = groups.iter().collect();
        let guard = read(&self.inner.group_grants);
        Ok(guard
            .keys()
            .filter(|(group, _)| wanted.contains(group))
            .filter_map(|(_, resource)| match resource {
                Resource::Module(module) => Some(module.clone()),
                Resource::Page(_) => None,
            })
            .collect())
    }

    async fn group_grant_exists(
        &self,
        group: GroupId,
        resource: Resource,
    ) -> std::result::Result<bool, StoreError> {
        self.begin_read()?;
        Ok(read(&self.inner.group_grants).contains_key(&(group, resource)))
    }

    async fn insert_group_grant(
        &self,
        id: Option<RowId>,
        group: GroupId,
        resource: Resource,
    ) -> std::result::Result<(), StoreError> {
        self.begin_write()?;
        write(&self.inner.group_grants).insert((group, resource), id);
        Ok(())
    }

    async fn delete_group_grant(
        &self,
        group: GroupId,
        resource: Resource,
    ) -> std::result::Result<bool, StoreError> {
        self.begin_write()?;
        Ok(write(&self.inner.group_grants)
            .remove(&(group, resource))
            .is_some())
    }
}

#[async_trait]
impl PageStore for MemoryStore {
    async fn public_pages(&self) -> std::result::Result<Vec<PublicPage>, StoreError> {
        self.begin_read()?;
        let guard = read(&self.inner.pages);
        Ok(guard
            .iter()
            .filter(|(_, record)| Self::is_visible(record))
            .map(|(id, record)| PublicPage {
                id: id.clone(),
                slug: record.slug.clone(),
            })
            .collect())
    }

    async fn page_public(&self, page: PageId) -> std::result::Result<bool, StoreError> {
        self.begin_read()?;
        Ok(read(&self.inner.pages)
            .get(&page)
            .is_some_and(Self::is_visible))
    }

    async fn page_public_by_slug(
        &self,
        slug: PageSlug,
    ) -> std::result::Result<bool, StoreError> {
        self.begin_read()?;
        Ok(read(&self.inner.pages)
            .values()
            .any(|record| record.slug == slug && Self::is_visible(record)))
    }
}
