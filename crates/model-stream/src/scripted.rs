use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use crate::stream::{TokenSource, TokenStream};
use crate::types::ChatMessage;
use crate::ModelError;

/// One step of a scripted generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptStep {
    Text(String),
    Delay(Duration),
    /// Emit an upstream error and end the stream.
    Fail(String),
    /// Never end; only cancellation stops the stream.
    Hang,
}

/// A [`TokenSource`] that replays pre-recorded turns in order and records
/// every conversation it was asked to continue. Once the script runs out,
/// each further generation is an empty stream.
#[derive(Debug, Default)]
pub struct ScriptedSource {
    turns: Mutex<VecDeque<Vec<ScriptStep>>>,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a turn made of text fragments.
    pub fn turn<I, S>(self, fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let steps = fragments
            .into_iter()
            .map(|s| ScriptStep::Text(s.into()))
            .collect();
        self.steps(steps)
    }

    /// Append a turn with explicit steps.
    pub fn steps(self, steps: Vec<ScriptStep>) -> Self {
        if let Ok(mut turns) = self.turns.lock() {
            turns.push_back(steps);
        }
        self
    }

    /// Conversations received so far, one per generation.
    pub fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    pub fn remaining_turns(&self) -> usize {
        self.turns.lock().map(|t| t.len()).unwrap_or(0)
    }
}

impl TokenSource for ScriptedSource {
    fn stream(&self, messages: Vec<ChatMessage>) -> TokenStream {
        if let Ok(mut r) = self.requests.lock() {
            r.push(messages);
        }
        let steps = self
            .turns
            .lock()
            .ok()
            .and_then(|mut t| t.pop_front())
            .unwrap_or_default();

        let (tx, stream) = TokenStream::channel();
        tokio::spawn(async move {
            for step in steps {
                match step {
                    ScriptStep::Text(t) => {
                        if tx.send(Ok(t)).await.is_err() {
                            return;
                        }
                    }
                    ScriptStep::Delay(d) => tokio::time::sleep(d).await,
                    ScriptStep::Fail(msg) => {
                        let _ = tx.send(Err(ModelError::Upstream(msg))).await;
                        return;
                    }
                    ScriptStep::Hang => {
                        tx.closed().await;
                        return;
                    }
                }
            }
        });
        stream
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
