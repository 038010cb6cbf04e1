//! Scoped ownership of spawned world entities.
//!
//! Every task owns one scope, nested under its parent task's scope; top-level
//! tasks nest under [`TaskId::ROOT`]. Spawns register their handle under the
//! spawning task's scope. Releasing a scope destroys every handle registered
//! under it and its nested scopes exactly once, then closes those scopes, so a
//! hazard never outlives the task that spawned it.
//!
//! Handles are destroyed in ascending order within each scope, which keeps
//! teardown deterministic for replays and tests.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::api::SpawnService;
use crate::task::TaskId;

/// Opaque handle to an entity created by a [`SpawnService`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HazardHandle(pub u64);

impl fmt::Display for HazardHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "hazard#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// The scope was released (or never opened); the late spawn is refused.
    #[error("{handle} cannot join closed scope {scope}")]
    ScopeClosed { scope: TaskId, handle: HazardHandle },

    #[error("{handle} is already owned by {owner}")]
    AlreadyOwned { handle: HazardHandle, owner: TaskId },
}

#[derive(Debug, Default)]
struct Scope {
    parent: Option<TaskId>,
    children: Vec<TaskId>,
    handles: BTreeSet<HazardHandle>,
}

/// Tracks which task scope owns each live hazard.
#[derive(Debug)]
pub struct HazardRegistry {
    scopes: HashMap<TaskId, Scope>,
    owners: HashMap<HazardHandle, TaskId>,
}

impl HazardRegistry {
    /// Creates a registry with the root scope open.
    pub fn new() -> Self {
        let mut scopes = HashMap::new();
        scopes.insert(TaskId::ROOT, Scope::default());
        Self {
            scopes,
            owners: HashMap::new(),
        }
    }

    /// Opens a scope for `scope`, nested under `parent`.
    ///
    /// A closed or unknown parent falls back to the root scope.
    pub fn open_scope(&mut self, scope: TaskId, parent: TaskId) {
        if self.scopes.contains_key(&scope) {
            return;
        }

        let parent = if self.scopes.contains_key(&parent) {
            parent
        } else {
            warn!(
                target: "encounter::hazard",
                %scope,
                %parent,
                "parent scope closed; nesting under root"
            );
            TaskId::ROOT
        };

        if let Some(entry) = self.scopes.get_mut(&parent) {
            entry.children.push(scope);
        }
        self.scopes.insert(
            scope,
            Scope {
                parent: Some(parent),
                ..Scope::default()
            },
        );
    }

    pub fn is_open(&self, scope: TaskId) -> bool {
        self.scopes.contains_key(&scope)
    }

    /// Records `handle` as owned by `scope`.
    ///
    /// Fails when the scope is already released; the caller decides what to do
    /// with the orphaned entity.
    pub fn register(&mut self, scope: TaskId, handle: HazardHandle) -> Result<(), RegistryError> {
        if let Some(owner) = self.owners.get(&handle) {
            return Err(RegistryError::AlreadyOwned {
                handle,
                owner: *owner,
            });
        }

        let entry = self
            .scopes
            .get_mut(&scope)
            .ok_or(RegistryError::ScopeClosed { scope, handle })?;
        entry.handles.insert(handle);
        self.owners.insert(handle, scope);
        Ok(())
    }

    /// Forgets a handle whose entity ended on its own (left the arena, hit
    /// something). Nothing is destroyed. Returns `false` for unknown handles.
    pub fn expire(&mut self, handle: HazardHandle) -> bool {
        let Some(scope) = self.owners.remove(&handle) else {
            return false;
        };
        if let Some(entry) = self.scopes.get_mut(&scope) {
            entry.handles.remove(&handle);
        }
        true
    }

    pub fn owner(&self, handle: HazardHandle) -> Option<TaskId> {
        self.owners.get(&handle).copied()
    }

    /// Live handles in `scope` and its nested scopes.
    pub fn live_in(&self, scope: TaskId) -> usize {
        self.descendants(scope)
            .iter()
            .filter_map(|id| self.scopes.get(id))
            .map(|entry| entry.handles.len())
            .sum()
    }

    /// Live handles across every scope.
    pub fn total_live(&self) -> usize {
        self.owners.len()
    }

    /// Destroys every handle in `scope` and its nested scopes, leaving the
    /// scopes open. Returns the number of entities destroyed.
    pub fn purge(&mut self, scope: TaskId, spawner: &mut dyn SpawnService) -> usize {
        let mut destroyed = 0;
        for id in self.descendants(scope) {
            let Some(entry) = self.scopes.get_mut(&id) else {
                continue;
            };
            for handle in std::mem::take(&mut entry.handles) {
                self.owners.remove(&handle);
                spawner.destroy(handle);
                destroyed += 1;
            }
        }

        if destroyed > 0 {
            debug!(target: "encounter::hazard", %scope, destroyed, "purged scope");
        }
        destroyed
    }

    /// Destroys every handle in `scope` and its nested scopes, then closes
    /// them. Releasing a closed scope is a no-op, so the call is idempotent.
    pub fn release_scope(&mut self, scope: TaskId, spawner: &mut dyn SpawnService) -> usize {
        if !self.scopes.contains_key(&scope) {
            return 0;
        }

        let destroyed = self.purge(scope, spawner);
        let closed = self.descendants(scope);

        if let Some(parent) = self.scopes.get(&scope).and_then(|s| s.parent)
            && let Some(entry) = self.scopes.get_mut(&parent)
        {
            entry.children.retain(|child| *child != scope);
        }
        for id in &closed {
            self.scopes.remove(id);
        }

        debug!(
            target: "encounter::hazard",
            %scope,
            destroyed,
            closed = closed.len(),
            "released scope"
        );
        destroyed
    }

    /// `scope` followed by all of its nested scopes, depth-first.
    fn descendants(&self, scope: TaskId) -> Vec<TaskId> {
        let mut out = Vec::new();
        let mut stack = vec![scope];
        while let Some(id) = stack.pop() {
            if let Some(entry) = self.scopes.get(&id) {
                out.push(id);
                stack.extend(entry.children.iter().rev().copied());
            }
        }
        out
    }
}

impl Default for HazardRegistry {
    fn default() -> Self {
        Self::new()
    }
}
