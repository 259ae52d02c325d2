use crate::dialect::Dialect;
use crate::store::{IndividualGrant, PublicPage};
use crate::types::{GroupId, ModuleName, PageId, PageSlug};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};

/// Where a page decision came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantSource {
    /// Principal-specific override.
    Individual,
    /// Grant held by one of the principal's groups.
    Group,
}

/// Resolved decision for one page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageGrant {
    /// Whether the page may be opened.
    pub allowed: bool,
    /// Origin of the decision.
    pub source: GrantSource,
}

/// Public, active pages. Identical for every principal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicPages {
    ids: HashSet<PageId>,
    slugs: HashSet<PageSlug>,
}

impl PublicPages {
    /// Returns whether the page is public.
    pub fn contains(&self, page: &PageId) -> bool {
        self.ids.contains(page)
    }

    /// Returns whether the page with `slug` is public.
    pub fn contains_slug(&self, slug: &PageSlug) -> bool {
        self.slugs.contains(slug)
    }

    /// Iterates public page ids.
    pub fn ids(&self) -> impl Iterator<Item = &PageId> {
        self.ids.iter()
    }
}

impl FromIterator<PublicPage> for PublicPages {
    fn from_iter<I: IntoIterator<Item = PublicPage>>(iter: I) -> Self {
        let mut public = Self::default();
        for page in iter {
            public.ids.insert(page.id);
            public.slugs.insert(page.slug);
        }
        public
    }
}

/// Raw rows returned by the pre-fetch reads.
#[derive(Debug, Default)]
pub(crate) struct Prefetch {
    pub groups: Vec<GroupId>,
    pub individual: Vec<IndividualGrant>,
    pub group_pages: Vec<PageId>,
    pub group_modules: Vec<ModuleName>,
    pub public_pages: Vec<PublicPage>,
}

/// Materialized access facts for one principal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedPermissionSet {
    groups: HashSet<GroupId>,
    pages: HashMap<PageId, PageGrant>,
    modules: HashSet<ModuleName>,
    public_pages: PublicPages,
}

impl ResolvedPermissionSet {
    /// Folds pre-fetched rows into a lookup index.
    ///
    /// Individual rows are folded completely before any group row, and a group
    /// row only fills a page that has no entry yet. An individual denial
    /// therefore always shadows group grants.
    pub(crate) fn build(dialect: &dyn Dialect, prefetch: Prefetch) -> Self {
        let Prefetch {
            groups,
            individual,
            group_pages,
            group_modules,
            public_pages,
        } = prefetch;

        let mut pages = HashMap::with_capacity(individual.len() + group_pages.len());
        for grant in individual {
            pages.insert(
                grant.page,
                PageGrant {
                    allowed: dialect.is_allowed(grant.allowed),
                    source: GrantSource::Individual,
                },
            );
        }
        for page in group_pages {
            pages.entry(page).or_insert(PageGrant {
                allowed: true,
                source: GrantSource::Group,
            });
        }

        Self {
            groups: groups.into_iter().collect(),
            pages,
            modules: group_modules.into_iter().collect(),
            public_pages: public_pages.into_iter().collect(),
        }
    }

    /// Groups the principal belongs to.
    pub fn groups(&self) -> &HashSet<GroupId> {
        &self.groups
    }

    /// Resolved decision for a page, if any source mentions it.
    pub fn page_grant(&self, page: &PageId) -> Option<PageGrant> {
        self.pages.get(page).copied()
    }

    /// Principal-scoped page decision; absent pages are denied.
    pub fn allows_page(&self, page: &PageId) -> bool {
        self.pages.get(page).is_some_and(|grant| grant.allowed)
    }

    /// Principal-scoped module decision.
    pub fn allows_module(&self, module: &ModuleName) -> bool {
        self.modules.contains(module)
    }

    /// Public pages captured alongside this set.
    pub fn public_pages(&self) -> &PublicPages {
        &self.public_pages
    }

    /// Every page the principal may open, public pages included, sorted.
    pub fn accessible_pages(&self) -> Vec<PageId> {
        let allowed = self
            .pages
            .iter()
            .filter(|(_, grant)| grant.allowed)
            .map(|(page, _)| page);
        allowed
            .chain(self.public_pages.ids())
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{BooleanDialect, PresenceDialect};
    use crate::types::PrincipalId;

    fn page(value: &str) -> PageId {
        PageId::try_from(value).unwrap()
    }

    fn individual(page_id: &str, allowed: Option<bool>) -> IndividualGrant {
        IndividualGrant {
            id: None,
            principal: PrincipalId::try_from("m1").unwrap(),
            page: page(page_id),
            allowed,
        }
    }

    #[test]
    fn individual_denial_shadows_group_grant() {
        let set = ResolvedPermissionSet::build(
            &BooleanDialect,
            Prefetch {
                individual: vec![individual("p1", Some(false))],
                group_pages: vec![page("p1"), page("p2")],
                ..Prefetch::default()
            },
        );

        assert!(!set.allows_page(&page("p1")));
        assert_eq!(
            set.page_grant(&page("p1")).map(|grant| grant.source),
            Some(GrantSource::Individual)
        );
        assert!(set.allows_page(&page("p2")));
        assert!(!set.allows_page(&page("p3")));
    }

    #[test]
    fn null_allowed_column_denies_on_boolean_dialect() {
        let set = ResolvedPermissionSet::build(
            &BooleanDialect,
            Prefetch {
                individual: vec![individual("p1", None)],
                group_pages: vec![page("p1")],
                ..Prefetch::default()
            },
        );

        assert!(!set.allows_page(&page("p1")));
    }

    #[test]
    fn presence_dialect_treats_row_as_grant() {
        let set = ResolvedPermissionSet::build(
            &PresenceDialect,
            Prefetch {
                individual: vec![individual("p1", None)],
                ..Prefetch::default()
            },
        );

        assert!(set.allows_page(&page("p1")));
    }

    #[test]
    fn accessible_pages_merges_public_and_allowed() {
        let set = ResolvedPermissionSet::build(
            &BooleanDialect,
            Prefetch {
                individual: vec![individual("p3", Some(false))],
                group_pages: vec![page("p2"), page("p3")],
                public_pages: vec![PublicPage {
                    id: page("p1"),
                    slug: PageSlug::try_from("home").unwrap(),
                }],
                ..Prefetch::default()
            },
        );

        assert_eq!(set.accessible_pages(), vec![page("p1"), page("p2")]);
        assert!(set.public_pages().contains_slug(&PageSlug::try_from("home").unwrap()));
    }
}
