use std::collections::HashMap;
use std::sync::Arc;

use actgate_core::executor::Executor;
use model_stream::TokenSource;
use tokio::sync::Mutex;
use tracing::info;

use crate::coordinator::SessionCoordinator;
use crate::error::{Result, SessionError};

/// Owns every live session. Sessions share the token source and executor
/// (and therefore the safety gate and backup store) but nothing else.
pub struct SessionManager {
    sessions: Mutex<HashMap<String, SessionCoordinator>>,
    source: Arc<dyn TokenSource>,
    executor: Executor,
    system_prompt: String,
}

impl SessionManager {
    pub fn new(source: Arc<dyn TokenSource>, executor: Executor, system_prompt: String) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            source,
            executor,
            system_prompt,
        }
    }

    pub async fn create(&self) -> SessionCoordinator {
        let id = uuid::Uuid::new_v4().to_string();
        let session = SessionCoordinator::new(
            id.clone(),
            Arc::clone(&self.source),
            self.executor.clone(),
            self.system_prompt.clone(),
        );
        self.sessions.lock().await.insert(id.clone(), session.clone());
        info!(session = %id, "session created");
        session
    }

    pub async fn get(&self, id: &str) -> Result<SessionCoordinator> {
        self.sessions
            .lock()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| SessionError::NotFound(id.to_string()))
    }

    /// Drop a session, cancelling any generation it has in flight.
    pub async fn remove(&self, id: &str) -> Result<()> {
        let session = self
            .sessions
            .lock()
            .await
            .remove(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        session.cancel().await;
        info!(session = %id, "session removed");
        Ok(())
    }

    pub async fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}
