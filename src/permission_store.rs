use crate::config::AccessConfig;
use crate::dialect::{BooleanDialect, Dialect};
use crate::error::{Error, Result};
use crate::resolver::Invalidate;
use crate::store::{IndividualGrant, Store};
use crate::types::{GroupId, IdGenerator, PageId, PrincipalId, Resource, RowId};
use std::fmt;
use std::sync::Arc;

/// Effect of [`PermissionStore::deny_individual`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyOutcome {
    /// An explicit denial row now overrides group grants.
    Denied,
    /// The dialect cannot store denials; the override row was removed and
    /// group or public rules apply again.
    Removed,
}

/// Administrative mutations of grants and memberships.
///
/// Every successful mutation invalidates cached permissions before returning:
/// per principal for individual grants and memberships, globally for group
/// grants. Store failures are returned as [`Error::Store`] and never retried.
pub struct PermissionStore<S, I> {
    store: S,
    invalidator: I,
    dialect: Arc<dyn Dialect>,
    ids: Option<Arc<dyn IdGenerator>>,
}

impl<S, I> fmt::Debug for PermissionStore<S, I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PermissionStore")
            .field("dialect", &self.dialect)
            .field("generates_ids", &self.ids.is_some())
            .finish_non_exhaustive()
    }
}

/// Builder for [`PermissionStore`].
pub struct PermissionStoreBuilder<S, I> {
    store: S,
    invalidator: I,
    dialect: Arc<dyn Dialect>,
    ids: Option<Arc<dyn IdGenerator>>,
}

impl<S, I> PermissionStoreBuilder<S, I> {
    /// Creates a builder for the boolean dialect without row id generation.
    pub fn new(store: S, invalidator: I) -> Self {
        Self {
            store,
            invalidator,
            dialect: Arc::new(BooleanDialect),
            ids: None,
        }
    }

    /// Applies the dialect from `config`.
    pub fn config(mut self, config: &AccessConfig) -> Self {
        self.dialect = config.dialect.into_dialect();
        self
    }

    /// Sets the storage dialect of individual grant rows.
    pub fn dialect(mut self, dialect: Arc<dyn Dialect>) -> Self {
        self.dialect = dialect;
        self
    }

    /// Generates explicit primary keys for inserted rows.
    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// Builds the store.
    pub fn build(self) -> PermissionStore<S, I> {
        PermissionStore {
            store: self.store,
            invalidator: self.invalidator,
            dialect: self.dialect,
            ids: self.ids,
        }
    }
}

impl<S, I> PermissionStore<S, I>
where
    S: Store,
    I: Invalidate,
{
    /// Grants a principal individual access to a page.
    ///
    /// Flips an existing denial, or inserts a grant row.
    pub async fn grant_individual(&self, principal: &PrincipalId, page: &PageId) -> Result<()> {
        self.upsert_individual(principal, page, self.dialect.grant_value())
            .await?;
        tracing::info!(principal = %principal, page = %page, "granted individual page access");
        self.invalidator.invalidate(principal).await;
        Ok(())
    }

    /// Records an explicit denial that overrides group grants.
    ///
    /// Dialects that cannot store a denial remove the override instead and
    /// report [`DenyOutcome::Removed`].
    pub async fn deny_individual(
        &self,
        principal: &PrincipalId,
        page: &PageId,
    ) -> Result<DenyOutcome> {
        let Some(denial) = self.dialect.denial_value() else {
            tracing::info!(
                principal = %principal,
                page = %page,
                dialect = self.dialect.name(),
                "dialect cannot store denials, removing override"
            );
            self.remove_individual(principal, page).await?;
            return Ok(DenyOutcome::Removed);
        };

        self.upsert_individual(principal, page, Some(denial)).await?;
        tracing::info!(principal = %principal, page = %page, "denied individual page access");
        self.invalidator.invalidate(principal).await;
        Ok(DenyOutcome::Denied)
    }

    /// Removes an individual override; group and public rules apply again.
    pub async fn remove_individual(&self, principal: &PrincipalId, page: &PageId) -> Result<()> {
        let removed = self
            .store
            .delete_individual_grant(principal.clone(), page.clone())
            .await
            .map_err(Error::from)?;
        tracing::info!(
            principal = %principal,
            page = %page,
            removed,
            "removed individual override"
        );
        self.invalidator.invalidate(principal).await;
        Ok(())
    }

    /// Grants a group access to a page or module. Invalidates every principal.
    pub async fn grant_group(&self, group: &GroupId, resource: &Resource) -> Result<()> {
        let exists = self
            .store
            .group_grant_exists(group.clone(), resource.clone())
            .await
            .map_err(Error::from)?;
        if !exists {
            self.store
                .insert_group_grant(self.next_id(), group.clone(), resource.clone())
                .await
                .map_err(Error::from)?;
        }
        tracing::info!(group = %group, resource = %resource, "granted group access");
        self.invalidator.invalidate_all().await;
        Ok(())
    }

    /// Revokes a group grant. Invalidates every principal.
    pub async fn remove_group(&self, group: &GroupId, resource: &Resource) -> Result<()> {
        let removed = self
            .store
            .delete_group_grant(group.clone(), resource.clone())
            .await
            .map_err(Error::from)?;
        tracing::info!(group = %group, resource = %resource, removed, "removed group access");
        self.invalidator.invalidate_all().await;
        Ok(())
    }

    /// Adds a principal to a group.
    pub async fn add_member_to_group(
        &self,
        principal: &PrincipalId,
        group: &GroupId,
    ) -> Result<()> {
        let exists = self
            .store
            .membership_exists(principal.clone(), group.clone())
            .await
            .map_err(Error::from)?;
        if !exists {
            self.store
                .insert_membership(self.next_id(), principal.clone(), group.clone())
                .await
                .map_err(Error::from)?;
        }
        tracing::info!(principal = %principal, group = %group, "added group member");
        self.invalidator.invalidate(principal).await;
        Ok(())
    }

    /// Removes a principal from a group.
    pub async fn remove_member_from_group(
        &self,
        principal: &PrincipalId,
        group: &GroupId,
    ) -> Result<()> {
        let removed = self
            .store
            .delete_membership(principal.clone(), group.clone())
            .await
            .map_err(Error::from)?;
        tracing::info!(principal = %principal, group = %group, removed, "removed group member");
        self.invalidator.invalidate(principal).await;
        Ok(())
    }

    /// Whether denials can override group grants with this store's dialect.
    pub fn supports_explicit_denial(&self) -> bool {
        self.dialect.supports_explicit_denial()
    }

    async fn upsert_individual(
        &self,
        principal: &PrincipalId,
        page: &PageId,
        allowed: Option<bool>,
    ) -> Result<()> {
        let existing = self
            .store
            .individual_grant(principal.clone(), page.clone())
            .await
            .map_err(Error::from)?;
        match existing {
            Some(row) if row.allowed == allowed => {}
            Some(_) => {
                self.store
                    .update_individual_grant(principal.clone(), page.clone(), allowed)
                    .await
                    .map_err(Error::from)?;
            }
            None => {
                self.store
                    .insert_individual_grant(IndividualGrant {
                        id: self.next_id(),
                        principal: principal.clone(),
                        page: page.clone(),
                        allowed,
                    })
                    .await
                    .map_err(Error::from)?;
            }
        }
        Ok(())
    }

    fn next_id(&self) -> Option<RowId> {
        self.ids.as_ref().map(|ids| ids.next_id())
    }
}
