use actgate_core::types::{Action, ActionStatus, TargetOs};

/// System prompt teaching the model the action markup.
pub fn system_prompt(os: TargetOs, extra: Option<&str>) -> String {
    let shell = if os.is_windows() {
        "cmd.exe"
    } else {
        "/bin/sh"
    };
    let mut prompt = format!(
        "You are an assistant with supervised access to a {os} machine.\n\
         You may request operations by emitting action tags. Every action is shown to \
         the user and only runs after they approve it; you will then receive the result.\n\
         \n\
         Action tags:\n\
         [ACTION:READ_FILE:<path>[/ACTION]\n\
         [ACTION:RUN_CMD:<command>[/ACTION]        (run by {shell})\n\
         [ACTION:RUN_SCRIPT:<path>:<arguments>[/ACTION]\n\
         [ACTION:WRITE_FILE:<path>:<content>[/ACTION]\n\
         \n\
         Rules:\n\
         - Use absolute paths.\n\
         - Everything after the first ':' following the path is content or arguments.\n\
         - Destructive commands are blocked and file access is limited to allowed directories.\n\
         - After emitting actions, stop and wait for their results."
    );
    if let Some(extra) = extra.map(str::trim).filter(|e| !e.is_empty()) {
        prompt.push_str("\n\n");
        prompt.push_str(extra);
    }
    prompt
}

/// Conversation entry that reports an action outcome back to the model.
pub fn result_message(action: &Action) -> String {
    let outcome = match action.status {
        ActionStatus::Succeeded => "succeeded",
        ActionStatus::Failed => "failed",
        ActionStatus::Denied => "denied by user",
        ActionStatus::Pending => "failed, awaiting retry",
        ActionStatus::Running => "running",
    };
    let mut msg = format!("[ACTION_RESULT {} {}: {outcome}]", action.id, action.summary());
    if let Some(result) = action.result.as_deref().filter(|r| !r.is_empty()) {
        msg.push('\n');
        msg.push_str(result);
    }
    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use actgate_core::types::{ActionDescriptor, ActionId, ActionKind};

    #[test]
    fn prompt_names_all_kinds_and_extra_text() {
        let p = system_prompt(TargetOs::Linux, Some("Be brief."));
        for kind in ActionKind::all() {
            assert!(p.contains(kind.opener()), "{kind}");
        }
        assert!(p.contains("[/ACTION]"));
        assert!(p.ends_with("Be brief."));
        assert!(system_prompt(TargetOs::Windows, None).contains("cmd.exe"));
    }

    #[test]
    fn result_message_includes_outcome_and_output() {
        let mut action = Action::new(
            ActionId(3),
            ActionDescriptor::new(ActionKind::RunCmd, "echo hi", None),
        );
        action.status = ActionStatus::Succeeded;
        action.result = Some("hi\n".into());
        assert_eq!(
            result_message(&action),
            "[ACTION_RESULT a3 RUN_CMD echo hi: succeeded]\nhi\n"
        );

        action.status = ActionStatus::Denied;
        action.result = None;
        assert_eq!(
            result_message(&action),
            "[ACTION_RESULT a3 RUN_CMD echo hi: denied by user]"
        );
    }
}
