use crate::cache::{NoCache, PersistentCache};
use crate::resolver::PermissionResolver;
use crate::store::Store;
use crate::types::{ModuleName, PageId, PrincipalId};
use std::sync::Arc;

/// Authorization decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Access is granted.
    Allow,
    /// Access is denied; the caller answers with a 403 or a redirect.
    Deny,
}

impl Decision {
    /// Returns whether the decision is [`Decision::Allow`].
    pub fn is_allowed(self) -> bool {
        matches!(self, Self::Allow)
    }
}

impl From<bool> for Decision {
    fn from(allowed: bool) -> Self {
        if allowed { Self::Allow } else { Self::Deny }
    }
}

/// Predicates used by request-handling middleware.
///
/// Holds no state of its own; clones share the resolver.
#[derive(Debug)]
pub struct AccessGate<S, C = NoCache> {
    resolver: Arc<PermissionResolver<S, C>>,
}

impl<S, C> Clone for AccessGate<S, C> {
    fn clone(&self) -> Self {
        Self {
            resolver: Arc::clone(&self.resolver),
        }
    }
}

impl<S, C> AccessGate<S, C>
where
    S: Store,
    C: PersistentCache,
{
    /// Creates a gate over a shared resolver.
    pub fn new(resolver: Arc<PermissionResolver<S, C>>) -> Self {
        Self { resolver }
    }

    /// Returns whether a principal (or anonymous visitor) may open a page.
    pub async fn can_access_page(&self, principal: Option<&PrincipalId>, page: &PageId) -> bool {
        self.resolver.can_access_page(principal, page).await
    }

    /// Returns whether a principal (or anonymous visitor) may use a module.
    pub async fn can_access_module(
        &self,
        principal: Option<&PrincipalId>,
        module: &ModuleName,
    ) -> bool {
        self.resolver.can_access_module(principal, module).await
    }

    /// Decides a page request.
    pub async fn require_page(&self, principal: Option<&PrincipalId>, page: &PageId) -> Decision {
        let decision = Decision::from(self.can_access_page(principal, page).await);
        if decision == Decision::Deny {
            tracing::debug!(
                principal = ?principal.map(PrincipalId::as_str),
                page = %page,
                "page access denied"
            );
        }
        decision
    }

    /// Decides a module request.
    pub async fn require_module(
        &self,
        principal: Option<&PrincipalId>,
        module: &ModuleName,
    ) -> Decision {
        let decision = Decision::from(self.can_access_module(principal, module).await);
        if decision == Decision::Deny {
            tracing::debug!(
                principal = ?principal.map(PrincipalId::as_str),
                module = %module,
                "module access denied"
            );
        }
        decision
    }

    /// The resolver behind this gate.
    pub fn resolver(&self) -> &Arc<PermissionResolver<S, C>> {
        &self.resolver
    }
}
