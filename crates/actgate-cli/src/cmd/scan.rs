use crate::output::{one_line, print_json, print_table};
use actgate_core::scanner::scan;
use anyhow::Context;
use std::io::Read;
use std::path::Path;

pub fn run(file: Option<&Path>, json: bool) -> anyhow::Result<()> {
    let text = match file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("failed to read stdin")?;
            buf
        }
    };

    let output = scan(&text);

    if json {
        return print_json(&serde_json::json!({
            "display": output.display,
            "actions": output.actions,
            "discarded": output.discarded,
        }));
    }

    print!("{}", output.display);
    if !output.display.is_empty() && !output.display.ends_with('\n') {
        println!();
    }
    println!();
    if output.actions.is_empty() {
        println!("No actions.");
    } else {
        let rows = output
            .actions
            .iter()
            .enumerate()
            .map(|(i, a)| {
                vec![
                    (i + 1).to_string(),
                    a.kind.to_string(),
                    a.target.clone(),
                    a.content.as_deref().map(|c| one_line(c, 40)).unwrap_or_default(),
                ]
            })
            .collect();
        print_table(&["#", "KIND", "TARGET", "CONTENT"], rows);
    }
    if output.discarded > 0 {
        println!("{} incomplete tag(s) discarded", output.discarded);
    }
    Ok(())
}
