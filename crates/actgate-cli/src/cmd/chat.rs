use super::load_runtime;
use crate::output::{one_line, print_json, print_table};
use actgate_core::types::{ActionId, ActionStatus};
use actgate_session::prompt::system_prompt;
use actgate_session::{source_from_config, ConfigWatcher, SessionCoordinator, SessionEvent, SessionManager};
use anyhow::{anyhow, Context};
use std::io::{IsTerminal, Write};
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::warn;

const PRINTER_DRAIN: Duration = Duration::from_secs(1);

const HELP: &str = "\
commands:
  /approve [id]   run a pending action (the oldest one when no id is given)
  /deny [id]      refuse a pending action
  /retry <id>     make a failed action approvable again
  /actions        list actions in this session
  /cancel         stop the current reply
  /help           show this text
  /quit           leave (also Ctrl-D)
anything else is sent to the model";

// ---------------------------------------------------------------------------
// Input parsing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
enum Input {
    Message(String),
    Approve(Option<ActionId>),
    Deny(Option<ActionId>),
    Retry(ActionId),
    Actions,
    Cancel,
    Help,
    Quit,
}

impl Input {
    fn parse(line: &str) -> anyhow::Result<Self> {
        let Some(rest) = line.strip_prefix('/') else {
            return Ok(Input::Message(line.to_string()));
        };
        let mut parts = rest.split_whitespace();
        let name = parts.next().unwrap_or("");
        let id = parts
            .next()
            .map(|raw| raw.parse::<ActionId>())
            .transpose()?;
        match name {
            "approve" | "a" => Ok(Input::Approve(id)),
            "deny" | "d" => Ok(Input::Deny(id)),
            "retry" => id
                .map(Input::Retry)
                .ok_or_else(|| anyhow!("usage: /retry <id>")),
            "actions" | "ls" => Ok(Input::Actions),
            "cancel" => Ok(Input::Cancel),
            "help" | "?" => Ok(Input::Help),
            "quit" | "exit" | "q" => Ok(Input::Quit),
            other => Err(anyhow!("unknown command '/{other}' (try /help)")),
        }
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run(root: &Path, instructions: Option<&str>, json: bool) -> anyhow::Result<()> {
    let (config, gate, executor) = load_runtime(root)?;
    let source = source_from_config(&config.model).context("failed to set up model source")?;
    let extra = instructions.or(config.model.system_prompt.as_deref());
    let prompt = system_prompt(config.os, extra);

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let watcher = ConfigWatcher::new(root, gate).spawn();
        let manager = SessionManager::new(source, executor, prompt);
        let session = manager.create().await;
        let mut printer = tokio::spawn(print_events(session.subscribe(), json));

        if !json && std::io::stdin().is_terminal() {
            println!("actgate session {} ({}). /help for commands.", session.id(), config.model.model);
        }
        let id = session.id().to_string();
        let result = repl(&session, json).await;

        watcher.abort();
        drop(session);
        let _ = manager.remove(&id).await;
        drop(manager);
        // The printer ends once the last session handle is gone.
        if tokio::time::timeout(PRINTER_DRAIN, &mut printer).await.is_err() {
            printer.abort();
        }
        result
    })
}

async fn repl(session: &SessionCoordinator, json: bool) -> anyhow::Result<()> {
    // Piped input is handled one turn at a time.
    let interactive = std::io::stdin().is_terminal();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let input = match Input::parse(line) {
            Ok(Input::Quit) => break,
            Ok(input) => input,
            Err(e) => {
                eprintln!("{e}");
                continue;
            }
        };
        if let Err(e) = handle(session, input, json).await {
            eprintln!("error: {e:#}");
        }
        if !interactive {
            session.wait_for_idle().await;
        }
    }

    session.wait_for_idle().await;
    Ok(())
}

async fn handle(session: &SessionCoordinator, input: Input, json: bool) -> anyhow::Result<()> {
    match input {
        Input::Message(text) => {
            session.submit_user_message(text).await?;
        }
        Input::Approve(id) => {
            let id = pick_pending(session, id).await?;
            session.approve(id).await?;
        }
        Input::Deny(id) => {
            let id = pick_pending(session, id).await?;
            session.deny(id).await?;
        }
        Input::Retry(id) => {
            session.retry(id).await?;
        }
        Input::Actions => list_actions(session, json).await?,
        Input::Cancel => {
            if !session.cancel().await {
                println!("nothing to cancel");
            }
        }
        Input::Help => println!("{HELP}"),
        Input::Quit => {}
    }
    Ok(())
}

/// The given id, or the oldest pending action.
async fn pick_pending(session: &SessionCoordinator, id: Option<ActionId>) -> anyhow::Result<ActionId> {
    if let Some(id) = id {
        return Ok(id);
    }
    session
        .snapshot()
        .await
        .actions
        .iter()
        .find(|a| a.status == ActionStatus::Pending)
        .map(|a| a.id)
        .ok_or_else(|| anyhow!("no pending actions"))
}

async fn list_actions(session: &SessionCoordinator, json: bool) -> anyhow::Result<()> {
    let snapshot = session.snapshot().await;
    if json {
        return print_json(&snapshot.actions);
    }
    if snapshot.actions.is_empty() {
        println!("No actions.");
        return Ok(());
    }
    let rows = snapshot
        .actions
        .iter()
        .map(|a| {
            vec![
                a.id.to_string(),
                a.status.to_string(),
                one_line(&a.summary(), 60),
            ]
        })
        .collect();
    print_table(&["ID", "STATUS", "ACTION"], rows);
    Ok(())
}

// ---------------------------------------------------------------------------
// Event rendering
// ---------------------------------------------------------------------------

async fn print_events(rx: broadcast::Receiver<SessionEvent>, json: bool) {
    let mut events = BroadcastStream::new(rx);
    while let Some(item) = events.next().await {
        match item {
            Ok(event) if json => match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(e) => warn!(error = %e, "unserializable event"),
            },
            Ok(event) => render(&event),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                warn!(skipped, "event output fell behind")
            }
        }
    }
}

fn render(event: &SessionEvent) {
    match event {
        SessionEvent::Token { text, .. } => {
            print!("{text}");
            let _ = std::io::stdout().flush();
        }
        SessionEvent::GenerationFinished { actions, .. } => {
            println!();
            if !actions.is_empty() {
                println!("{} action(s) awaiting approval: /approve <id> or /deny <id>", actions.len());
            }
        }
        SessionEvent::GenerationFailed { error, .. } => {
            println!();
            eprintln!("model error: {error}");
        }
        SessionEvent::GenerationCancelled { .. } => println!("\n[cancelled]"),
        SessionEvent::ActionProposed { action } => {
            println!("\n  [{}] {}", action.id, one_line(&action.summary(), 72));
        }
        SessionEvent::ActionUpdated { action } => {
            println!("  [{}] {}", action.id, action.status);
            if action.status != ActionStatus::Running {
                if let Some(result) = action.result.as_deref().filter(|r| !r.is_empty()) {
                    for line in result.trim_end().lines() {
                        println!("    {line}");
                    }
                }
            }
        }
        SessionEvent::GenerationStarted { .. } | SessionEvent::MessageAppended { .. } => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_a_message() {
        assert_eq!(
            Input::parse("list my files").unwrap(),
            Input::Message("list my files".into())
        );
    }

    #[test]
    fn slash_commands_take_optional_ids() {
        assert_eq!(Input::parse("/approve a2").unwrap(), Input::Approve(Some(ActionId(2))));
        assert_eq!(Input::parse("/approve").unwrap(), Input::Approve(None));
        assert_eq!(Input::parse("/d 4").unwrap(), Input::Deny(Some(ActionId(4))));
        assert_eq!(Input::parse("/retry a1").unwrap(), Input::Retry(ActionId(1)));
        assert_eq!(Input::parse("/quit").unwrap(), Input::Quit);
    }

    #[test]
    fn bad_commands_are_rejected() {
        assert!(Input::parse("/retry").is_err());
        assert!(Input::parse("/approve abc").is_err());
        assert!(Input::parse("/frobnicate").is_err());
    }
}
