use super::load_runtime;
use crate::output::print_json;
use actgate_core::scanner::scan;
use serde::Serialize;
use std::path::Path;

#[derive(Serialize)]
struct ExecReport {
    kind: String,
    target: String,
    ok: bool,
    output: String,
}

/// Run every tag in `text` in order. Stops at the first failure.
pub fn run(root: &Path, text: &str, json: bool) -> anyhow::Result<()> {
    let scanned = scan(text);
    if scanned.actions.is_empty() {
        anyhow::bail!("no complete action tags found");
    }
    let (_, _, executor) = load_runtime(root)?;

    let rt = tokio::runtime::Runtime::new()?;
    let mut reports = Vec::new();
    let mut failed = None;
    rt.block_on(async {
        for action in &scanned.actions {
            let result = executor.execute(action).await;
            let ok = result.is_ok();
            let output = match result {
                Ok(out) => out,
                Err(e) => e.to_string(),
            };
            reports.push(ExecReport {
                kind: action.kind.to_string(),
                target: action.target.clone(),
                ok,
                output,
            });
            if !ok {
                failed = Some(action.target.clone());
                break;
            }
        }
    });

    if json {
        print_json(&reports)?;
    } else {
        for r in &reports {
            let status = if r.ok { "ok" } else { "failed" };
            println!("{} {} [{status}]", r.kind, r.target);
            println!("{}", r.output.trim_end());
        }
    }

    if let Some(target) = failed {
        anyhow::bail!("action failed: {target}");
    }
    Ok(())
}
