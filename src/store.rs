use crate::error::StoreError;
use crate::types::{GroupId, ModuleName, PageId, PageSlug, PrincipalId, Resource, RowId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A principal's individual override on a page.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndividualGrant {
    /// Row id, when the backend requires explicit keys.
    pub id: Option<RowId>,
    /// Principal the override applies to.
    pub principal: PrincipalId,
    /// Page the override applies to.
    pub page: PageId,
    /// Stored `allowed` column. Always `None` on presence-only backends, and
    /// `None` for a NULL column on boolean backends.
    pub allowed: Option<bool>,
}

/// A public, active page as returned by the public page listing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicPage {
    /// Page id.
    pub id: PageId,
    /// Page slug.
    pub slug: PageSlug,
}

/// Store interface for principal to group membership.
#[async_trait]
pub trait GroupStore {
    /// Returns every group the principal belongs to.
    async fn principal_groups(
        &self,
        principal: PrincipalId,
    ) -> std::result::Result<Vec<GroupId>, StoreError>;

    /// Returns whether the membership row exists.
    async fn membership_exists(
        &self,
        principal: PrincipalId,
        group: GroupId,
    ) -> std::result::Result<bool, StoreError>;

    /// Inserts a membership row.
    async fn insert_membership(
        &self,
        id: Option<RowId>,
        principal: PrincipalId,
        group: GroupId,
    ) -> std::result::Result<(), StoreError>;

    /// Deletes a membership row. Returns whether a row was removed.
    async fn delete_membership(
        &self,
        principal: PrincipalId,
        group: GroupId,
    ) -> std::result::Result<bool, StoreError>;
}

/// Store interface for individual and group grants.
#[async_trait]
pub trait GrantStore {
    /// Returns every individual page override of a principal.
    async fn individual_page_grants(
        &self,
        principal: PrincipalId,
    ) -> std::result::Result<Vec<IndividualGrant>, StoreError>;

    /// Returns the individual override for one (principal, page) pair.
    async fn individual_grant(
        &self,
        principal: PrincipalId,
        page: PageId,
    ) -> std::result::Result<Option<IndividualGrant>, StoreError>;

    /// Inserts an individual override row.
    async fn insert_individual_grant(
        &self,
        grant: IndividualGrant,
    ) -> std::result::Result<(), StoreError>;

    /// Updates the `allowed` column of an existing override.
    async fn update_individual_grant(
        &self,
        principal: PrincipalId,
        page: PageId,
        allowed: Option<bool>,
    ) -> std::result::Result<bool, StoreError>;

    /// Deletes an individual override. Returns whether a row was removed.
    async fn delete_individual_grant(
        &self,
        principal: PrincipalId,
        page: PageId,
    ) -> std::result::Result<bool, StoreError>;

    /// Returns pages granted to any of `groups`. Backends must accept an
    /// empty slice and return no rows.
    async fn group_page_grants(
        &self,
        groups: &[GroupId],
    ) -> std::result::Result<Vec<PageId>, StoreError>;

    /// Returns modules granted to any of `groups`. Backends must accept an
    /// empty slice and return no rows.
    async fn group_module_grants(
        &self,
        groups: &[GroupId],
    ) -> std::result::Result<Vec<ModuleName>, StoreError>;

    /// Returns whether a group grant row exists.
    async fn group_grant_exists(
        &self,
        group: GroupId,
        resource: Resource,
    ) -> std::result::Result<bool, StoreError>;

    /// Inserts a group grant row.
    async fn insert_group_grant(
        &self,
        id: Option<RowId>,
        group: GroupId,
        resource: Resource,
    ) -> std::result::Result<(), StoreError>;

    /// Deletes a group grant row. Returns whether a row was removed.
    async fn delete_group_grant(
        &self,
        group: GroupId,
        resource: Resource,
    ) -> std::result::Result<bool, StoreError>;
}

/// Store interface for page visibility.
#[async_trait]
pub trait PageStore {
    /// Returns every page that is both public and active.
    async fn public_pages(&self) -> std::result::Result<Vec<PublicPage>, StoreError>;

    /// Returns whether a page is public and active.
    async fn page_public(&self, page: PageId) -> std::result::Result<bool, StoreError>;

    /// Returns whether the page with `slug` is public and active.
    async fn page_public_by_slug(&self, slug: PageSlug)
    -> std::result::Result<bool, StoreError>;
}

/// Composite store trait.
pub trait Store: GroupStore + GrantStore + PageStore + Send + Sync {}

impl<T> Store for T where T: GroupStore + GrantStore + PageStore + Send + Sync {}
