use crate::resolved::ResolvedPermissionSet;
use crate::types::PrincipalId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Upper bound of remembered per-principal invalidations. Past it the
/// record is dropped and every earlier snapshot counts as stale.
const MAX_TRACKED_INVALIDATIONS: usize = 4096;

/// Generation snapshot taken before a rebuild starts.
///
/// A rebuild may only be stored if no invalidation touching its principal
/// happened after the snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Epoch {
    seq: u64,
}

/// In-memory resolved sets, owned by the request or connection scope and
/// injected into [`PermissionResolver`](crate::PermissionResolver).
#[derive(Debug, Default)]
pub struct ResolverCache {
    state: Mutex<State>,
}

#[derive(Debug, Default)]
struct State {
    sets: HashMap<PrincipalId, Arc<ResolvedPermissionSet>>,
    // Sequence number of the last invalidation per principal.
    invalidated: HashMap<PrincipalId, u64>,
    // Bumped by every invalidation.
    seq: u64,
    // Snapshots older than this are stale for every principal.
    floor: u64,
    // Any resolved set; its public pages are shared by every principal.
    public_source: Option<Arc<ResolvedPermissionSet>>,
}

impl State {
    fn is_current(&self, principal: &PrincipalId, epoch: Epoch) -> bool {
        epoch.seq >= self.floor
            && self
                .invalidated
                .get(principal)
                .is_none_or(|&at| at <= epoch.seq)
    }
}

impl ResolverCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the resolved set of a principal.
    pub fn get(&self, principal: &PrincipalId) -> Option<Arc<ResolvedPermissionSet>> {
        self.state().sets.get(principal).cloned()
    }

    /// Takes a generation snapshot before rebuilding `principal`.
    pub fn epoch(&self, _principal: &PrincipalId) -> Epoch {
        Epoch {
            seq: self.state().seq,
        }
    }

    /// Returns whether no invalidation touched `principal` since `epoch`.
    pub fn is_current(&self, principal: &PrincipalId, epoch: Epoch) -> bool {
        self.state().is_current(principal, epoch)
    }

    /// Stores `set` unless the principal was invalidated after `epoch`.
    ///
    /// Returns whether the set was stored.
    pub fn insert_if_current(
        &self,
        principal: &PrincipalId,
        epoch: Epoch,
        set: Arc<ResolvedPermissionSet>,
    ) -> bool {
        let mut state = self.state();
        if !state.is_current(principal, epoch) {
            return false;
        }
        state.public_source = Some(Arc::clone(&set));
        state.sets.insert(principal.clone(), set);
        true
    }

    /// Returns a resolved set whose public pages can be reused, if any
    /// principal has been resolved since the last global invalidation.
    pub fn public_source(&self) -> Option<Arc<ResolvedPermissionSet>> {
        self.state().public_source.clone()
    }

    /// Drops the set of one principal.
    pub fn invalidate(&self, principal: &PrincipalId) {
        let mut state = self.state();
        state.seq += 1;
        let seq = state.seq;
        state.sets.remove(principal);
        state.invalidated.insert(principal.clone(), seq);
        if state.invalidated.len() > MAX_TRACKED_INVALIDATIONS {
            state.floor = seq;
            state.invalidated.clear();
        }
    }

    /// Drops every set and the public page snapshot.
    pub fn invalidate_all(&self) {
        let mut state = self.state();
        state.seq += 1;
        state.floor = state.seq;
        state.sets.clear();
        state.invalidated.clear();
        state.public_source = None;
    }

    /// Returns the number of resolved principals.
    pub fn len(&self) -> usize {
        self.state().sets.len()
    }

    /// Returns whether no principal is resolved.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
