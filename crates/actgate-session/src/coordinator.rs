//! Single-flight control loop for one session.
//!
//! A session alternates between two kinds of work and never overlaps them:
//! a *generation* (model output streamed through the tag scanner) and an
//! *execution* (one approved action). Both are guarded by the session lock:
//! the check ("is anything active?") and the set ("this is now active")
//! happen in the same critical section, and no lock is held across the
//! model stream or the executor.
//!
//! ```text
//! submit_user_message ─▶ generation ─▶ actions registered `pending`
//!        ▲                                   │
//!        │                          approve / deny
//!        │                                   ▼
//!        └──── maybe_continue ◀── outcome appended to the conversation
//! ```

use std::sync::Arc;

use actgate_core::executor::{ExecError, Executor};
use actgate_core::scanner::StreamTagScanner;
use actgate_core::types::{Action, ActionDescriptor, ActionId};
use futures::StreamExt;
use model_stream::{ChatMessage, Role, TokenSource};
use tokio::sync::{broadcast, watch, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::error::{BusyReason, Result, SessionError};
use crate::events::SessionEvent;
use crate::prompt::result_message;
use crate::session::{ActiveGeneration, ConversationMessage, SessionSnapshot, SessionState};

const EVENT_CAPACITY: usize = 512;

/// Handle to one session. Cheap to clone; all clones drive the same state.
#[derive(Clone)]
pub struct SessionCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    id: String,
    state: Mutex<SessionState>,
    events: broadcast::Sender<SessionEvent>,
    generating: watch::Sender<bool>,
    source: Arc<dyn TokenSource>,
    executor: Executor,
    system_prompt: String,
}

impl SessionCoordinator {
    pub fn new(
        id: impl Into<String>,
        source: Arc<dyn TokenSource>,
        executor: Executor,
        system_prompt: impl Into<String>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (generating, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                id: id.into(),
                state: Mutex::new(SessionState::new()),
                events,
                generating,
                source,
                executor,
                system_prompt: system_prompt.into(),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn executor(&self) -> &Executor {
        &self.inner.executor
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let state = self.inner.state.lock().await;
        SessionSnapshot::capture(&self.inner.id, &state)
    }

    pub async fn action(&self, id: ActionId) -> Option<Action> {
        self.inner.state.lock().await.registry.get(id).cloned()
    }

    pub async fn is_generating(&self) -> bool {
        self.inner.state.lock().await.is_generating()
    }

    /// Resolves once no generation is in progress.
    pub async fn wait_for_idle(&self) {
        let mut rx = self.inner.generating.subscribe();
        let _ = rx.wait_for(|generating| !*generating).await;
    }

    // -----------------------------------------------------------------------
    // User operations
    // -----------------------------------------------------------------------

    /// Append a user message and start a generation. Returns its id.
    pub async fn submit_user_message(&self, text: impl Into<String>) -> Result<u64> {
        let generation = {
            let mut state = self.inner.state.lock().await;
            ensure_idle(&state)?;
            let message = ConversationMessage::new(Role::User, text);
            state.messages.push(message.clone());
            self.emit(SessionEvent::MessageAppended { message });
            self.begin_generation(&mut state)
        };
        self.spawn_generation(generation).await;
        Ok(generation)
    }

    /// Run a pending action to its outcome.
    ///
    /// The action is `running` (and broadcast as such) before the executor is
    /// invoked. The returned action reflects the recorded outcome.
    pub async fn approve(&self, id: ActionId) -> Result<Action> {
        let running = {
            let mut state = self.inner.state.lock().await;
            ensure_idle(&state)?;
            let action = state.registry.approve(id)?;
            self.emit(SessionEvent::ActionUpdated {
                action: action.clone(),
            });
            action
        };
        info!(session = %self.inner.id, action = %id, kind = %running.kind, "action approved");

        // Outcome recording lives in its own task so it completes even if the
        // caller stops waiting.
        let this = self.clone();
        let descriptor = running.descriptor();
        tokio::spawn(async move { this.execute_and_record(id, descriptor).await })
            .await
            .map_err(|e| SessionError::Core(std::io::Error::other(e).into()))?
    }

    async fn execute_and_record(&self, id: ActionId, descriptor: ActionDescriptor) -> Result<Action> {
        let executor = self.inner.executor.clone();
        let outcome = tokio::spawn(async move { executor.execute(&descriptor).await }).await;

        let (action, next) = {
            let mut state = self.inner.state.lock().await;
            let recorded = match outcome {
                Ok(Ok(output)) => state.registry.complete(id, true, output),
                Ok(Err(e)) if e.is_policy() => {
                    info!(session = %self.inner.id, action = %id, reason = %e, "action refused");
                    state.registry.complete(id, false, e.to_string())
                }
                Ok(Err(e)) => {
                    warn!(session = %self.inner.id, action = %id, error = %e, "action failed, back to pending");
                    state.registry.fail_and_retry(id, e.to_string())
                }
                Err(join) => {
                    warn!(session = %self.inner.id, action = %id, error = %join, "execution task aborted");
                    let e = ExecError::Io(std::io::Error::other(join));
                    state.registry.fail_and_retry(id, e.to_string())
                }
            };
            let action = match recorded {
                Ok(action) => action,
                Err(e) => {
                    // Replaced wholesale while running; report what is there now.
                    warn!(session = %self.inner.id, action = %id, error = %e, "could not record outcome");
                    state.registry.get(id).cloned().ok_or(e)?
                }
            };
            self.emit(SessionEvent::ActionUpdated {
                action: action.clone(),
            });
            self.append_result(&mut state, &action);
            let next = self.maybe_continue(&mut state);
            (action, next)
        };
        if let Some(generation) = next {
            self.spawn_generation(generation).await;
        }
        Ok(action)
    }

    /// `pending -> denied`. The model is told, and the loop resumes once
    /// nothing else is outstanding.
    pub async fn deny(&self, id: ActionId) -> Result<Action> {
        let (action, next) = {
            let mut state = self.inner.state.lock().await;
            ensure_idle(&state)?;
            let action = state.registry.deny(id)?;
            info!(session = %self.inner.id, action = %id, "action denied");
            self.emit(SessionEvent::ActionUpdated {
                action: action.clone(),
            });
            self.append_result(&mut state, &action);
            let next = self.maybe_continue(&mut state);
            (action, next)
        };
        if let Some(generation) = next {
            self.spawn_generation(generation).await;
        }
        Ok(action)
    }

    /// `failed -> pending`, so a refused action can be approved again.
    pub async fn retry(&self, id: ActionId) -> Result<Action> {
        let mut state = self.inner.state.lock().await;
        let action = state.registry.retry(id)?;
        self.emit(SessionEvent::ActionUpdated {
            action: action.clone(),
        });
        Ok(action)
    }

    /// Abandon the current generation. Returns false when none was active.
    pub async fn cancel(&self) -> bool {
        let mut state = self.inner.state.lock().await;
        let Some(active) = state.generation.take() else {
            return false;
        };
        if let Some(abort) = active.abort {
            abort.abort();
        }
        self.inner.generating.send_replace(false);
        info!(session = %self.inner.id, generation = active.id, "generation cancelled");
        let message = ConversationMessage::new(Role::System, "[generation cancelled by user]");
        state.messages.push(message.clone());
        self.emit(SessionEvent::GenerationCancelled {
            generation: active.id,
        });
        self.emit(SessionEvent::MessageAppended { message });
        true
    }

    /// Reconcile actions replicated from another view of this session.
    pub async fn sync_actions(&self, actions: Vec<Action>) {
        let mut state = self.inner.state.lock().await;
        state.registry.reconcile(actions);
        debug!(session = %self.inner.id, actions = state.registry.len(), "actions reconciled");
    }

    // -----------------------------------------------------------------------
    // Generation
    // -----------------------------------------------------------------------

    /// Set the generation flag. Caller holds the lock and has checked idleness.
    fn begin_generation(&self, state: &mut MutexGuard<'_, SessionState>) -> u64 {
        state.generation_counter += 1;
        let generation = state.generation_counter;
        state.generation = Some(ActiveGeneration {
            id: generation,
            abort: None,
        });
        self.inner.generating.send_replace(true);
        self.emit(SessionEvent::GenerationStarted { generation });
        info!(session = %self.inner.id, generation, "generation started");
        generation
    }

    /// Start the next generation if nothing is active or outstanding.
    /// Check and set share one critical section.
    fn maybe_continue(&self, state: &mut MutexGuard<'_, SessionState>) -> Option<u64> {
        if state.is_generating() || state.registry.has_unsettled() {
            return None;
        }
        Some(self.begin_generation(state))
    }

    async fn spawn_generation(&self, generation: u64) {
        let this = self.clone();
        let handle = tokio::spawn(async move { this.run_generation(generation).await });
        let abort = handle.abort_handle();

        let mut state = self.inner.state.lock().await;
        match state.generation.as_mut() {
            Some(active) if active.id == generation => active.abort = Some(abort),
            // Finished or cancelled before the handle was stored.
            _ if !handle.is_finished() => abort.abort(),
            _ => {}
        }
    }

    async fn run_generation(&self, generation: u64) {
        let conversation = {
            let state = self.inner.state.lock().await;
            if !state.is_current(generation) {
                return;
            }
            let mut chat = Vec::with_capacity(state.messages.len() + 1);
            chat.push(ChatMessage::system(self.inner.system_prompt.clone()));
            chat.extend(state.messages.iter().map(ConversationMessage::to_chat));
            chat
        };
        debug!(
            session = %self.inner.id,
            generation,
            source = self.inner.source.name(),
            turns = conversation.len(),
            "requesting model stream"
        );

        let mut stream = self.inner.source.stream(conversation);
        let mut scanner = StreamTagScanner::new();
        let mut raw = String::new();
        let mut display = String::new();
        let mut failure = None;

        while let Some(item) = stream.next().await {
            match item {
                Ok(fragment) => {
                    raw.push_str(&fragment);
                    let text = scanner.push(&fragment);
                    if !text.is_empty() {
                        display.push_str(&text);
                        self.emit(SessionEvent::Token { generation, text });
                    }
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }
        drop(stream);

        let scanned = scanner.finish();
        if !scanned.display.is_empty() {
            display.push_str(&scanned.display);
            self.emit(SessionEvent::Token {
                generation,
                text: scanned.display.clone(),
            });
        }

        let mut state = self.inner.state.lock().await;
        if !state.is_current(generation) {
            debug!(session = %self.inner.id, generation, "stale generation result dropped");
            return;
        }

        if let Some(e) = failure {
            warn!(session = %self.inner.id, generation, error = %e, "generation failed");
            if !raw.is_empty() {
                self.push_message(&mut state, ConversationMessage::assistant(raw, display));
            }
            let notice = ConversationMessage::new(Role::System, format!("[model error: {e}]"));
            self.push_message(&mut state, notice);
            self.end_generation(&mut state);
            self.emit(SessionEvent::GenerationFailed {
                generation,
                error: e.to_string(),
            });
            return;
        }

        if scanned.discarded > 0 {
            debug!(session = %self.inner.id, generation, discarded = scanned.discarded, "partial action tags dropped");
        }
        self.push_message(&mut state, ConversationMessage::assistant(raw, display));
        let mut ids = Vec::with_capacity(scanned.actions.len());
        for descriptor in scanned.actions {
            let id = state.registry.register(descriptor);
            if let Some(action) = state.registry.get(id) {
                self.emit(SessionEvent::ActionProposed {
                    action: action.clone(),
                });
            }
            ids.push(id);
        }
        info!(session = %self.inner.id, generation, actions = ids.len(), "generation finished");
        self.end_generation(&mut state);
        self.emit(SessionEvent::GenerationFinished {
            generation,
            actions: ids,
            discarded: scanned.discarded,
        });
    }

    fn end_generation(&self, state: &mut MutexGuard<'_, SessionState>) {
        state.generation = None;
        self.inner.generating.send_replace(false);
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn append_result(&self, state: &mut MutexGuard<'_, SessionState>, action: &Action) {
        let message = ConversationMessage::new(Role::User, result_message(action));
        self.push_message(state, message);
    }

    fn push_message(&self, state: &mut MutexGuard<'_, SessionState>, message: ConversationMessage) {
        state.messages.push(message.clone());
        self.emit(SessionEvent::MessageAppended { message });
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }
}

fn ensure_idle(state: &SessionState) -> Result<()> {
    if state.is_generating() {
        return Err(SessionError::Busy(BusyReason::Generating));
    }
    if let Some(id) = state.running_action() {
        return Err(SessionError::Busy(BusyReason::ActionRunning(id)));
    }
    Ok(())
}

impl std::fmt::Debug for SessionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCoordinator")
            .field("id", &self.inner.id)
            .field("source", &self.inner.source.name())
            .finish()
    }
}

