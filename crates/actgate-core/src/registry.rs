use std::collections::BTreeMap;

use chrono::Utc;

use crate::error::{ActgateError, Result};
use crate::types::{Action, ActionDescriptor, ActionId, ActionStatus};

/// Per-session arena of actions, keyed by a stable id.
///
/// Callers hold ids, never references: every lookup goes through the map so a
/// wholesale replacement via [`ActionRegistry::reconcile`] can never leave a
/// continuation pointing at a stale object.
#[derive(Debug, Clone, Default)]
pub struct ActionRegistry {
    actions: BTreeMap<ActionId, Action>,
    next_id: u64,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self {
            actions: BTreeMap::new(),
            next_id: 1,
        }
    }

    /// Assign a fresh id and store the action as `pending`.
    pub fn register(&mut self, descriptor: ActionDescriptor) -> ActionId {
        let id = ActionId(self.next_id.max(1));
        self.next_id = id.0 + 1;
        self.actions.insert(id, Action::new(id, descriptor));
        id
    }

    pub fn get(&self, id: ActionId) -> Option<&Action> {
        self.actions.get(&id)
    }

    /// All actions in id order.
    pub fn list(&self) -> impl Iterator<Item = &Action> {
        self.actions.values()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn with_status(&self, status: ActionStatus) -> impl Iterator<Item = &Action> {
        self.actions.values().filter(move |a| a.status == status)
    }

    pub fn running(&self) -> Option<&Action> {
        self.with_status(ActionStatus::Running).next()
    }

    /// True while any action waits on the user or the executor.
    pub fn has_unsettled(&self) -> bool {
        self.actions.values().any(|a| !a.status.is_settled())
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    /// `pending -> running`. Returns a snapshot taken after the transition.
    pub fn approve(&mut self, id: ActionId) -> Result<Action> {
        self.transition(id, ActionStatus::Running, None)
    }

    /// `running -> succeeded | failed`, attaching the result text.
    pub fn complete(&mut self, id: ActionId, succeeded: bool, result: String) -> Result<Action> {
        let to = if succeeded {
            ActionStatus::Succeeded
        } else {
            ActionStatus::Failed
        };
        self.transition(id, to, Some(result))
    }

    /// `running -> pending` after an execution-level error; the result text
    /// is kept so the user can see why before re-approving.
    pub fn fail_and_retry(&mut self, id: ActionId, result: String) -> Result<Action> {
        self.transition(id, ActionStatus::Pending, Some(result))
    }

    /// `pending -> denied`. Terminal.
    pub fn deny(&mut self, id: ActionId) -> Result<Action> {
        self.transition(id, ActionStatus::Denied, None)
    }

    /// `failed -> pending`.
    pub fn retry(&mut self, id: ActionId) -> Result<Action> {
        let from = self.status_of(id)?;
        if from != ActionStatus::Failed {
            return Err(ActgateError::InvalidTransition {
                id,
                from,
                to: ActionStatus::Pending,
            });
        }
        self.transition(id, ActionStatus::Pending, None)
    }

    fn status_of(&self, id: ActionId) -> Result<ActionStatus> {
        self.actions
            .get(&id)
            .map(|a| a.status)
            .ok_or(ActgateError::ActionNotFound(id))
    }

    fn transition(
        &mut self,
        id: ActionId,
        to: ActionStatus,
        result: Option<String>,
    ) -> Result<Action> {
        let action = self
            .actions
            .get_mut(&id)
            .ok_or(ActgateError::ActionNotFound(id))?;
        if !action.status.can_transition_to(to) {
            return Err(ActgateError::InvalidTransition {
                id,
                from: action.status,
                to,
            });
        }
        action.status = to;
        if result.is_some() {
            action.result = result;
        }
        action.updated_at = Utc::now();
        Ok(action.clone())
    }

    // -----------------------------------------------------------------------
    // Replication
    // -----------------------------------------------------------------------

    /// Replace the collection with `incoming`, matching by id.
    ///
    /// A local `running` action survives when the incoming copy is missing or
    /// still `pending`. Only a local approval starts execution, so an incoming
    /// `running` copy never overrides a local action that is not running, and
    /// one with no local counterpart arrives as `pending`. Ids are never
    /// handed out again after a reconcile.
    pub fn reconcile(&mut self, incoming: Vec<Action>) {
        let mut merged: BTreeMap<ActionId, Action> = BTreeMap::new();
        for mut action in incoming {
            let resolved = match self.actions.get(&action.id) {
                Some(local)
                    if local.status == ActionStatus::Running
                        && action.status == ActionStatus::Pending =>
                {
                    local.clone()
                }
                Some(local)
                    if action.status == ActionStatus::Running
                        && local.status != ActionStatus::Running =>
                {
                    local.clone()
                }
                None if action.status == ActionStatus::Running => {
                    action.status = ActionStatus::Pending;
                    action
                }
                _ => action,
            };
            merged.insert(resolved.id, resolved);
        }
        for local in self.actions.values() {
            if local.status == ActionStatus::Running && !merged.contains_key(&local.id) {
                merged.insert(local.id, local.clone());
            }
        }

        let max_seen = merged
            .keys()
            .chain(self.actions.keys())
            .map(|id| id.0)
            .max()
            .unwrap_or(0);
        self.next_id = self.next_id.max(max_seen + 1);
        self.actions = merged;
    }
}
