#![allow(deprecated)]
use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn actgate(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("actgate").unwrap();
    cmd.current_dir(dir.path())
        .env("ACTGATE_ROOT", dir.path())
        .env_remove("RUST_LOG");
    cmd
}

/// Config that confines reads, writes and backups to the temp dir.
fn sandbox_config(dir: &TempDir, extra: &str) {
    let root = dir.path().display();
    let yaml = format!(
        "safety:\n  read_prefixes: [\"{root}\"]\n  write_prefixes: [\"{root}\"]\nbackup_dir: \"{root}/backups\"\n{extra}"
    );
    std::fs::create_dir_all(dir.path().join(".actgate")).unwrap();
    std::fs::write(dir.path().join(".actgate/config.yaml"), yaml).unwrap();
}

// ---------------------------------------------------------------------------
// actgate config
// ---------------------------------------------------------------------------

#[test]
fn config_init_writes_defaults_once() {
    let dir = TempDir::new().unwrap();
    actgate(&dir).args(["config", "init"]).assert().success();
    assert!(dir.path().join(".actgate/config.yaml").exists());

    actgate(&dir)
        .args(["config", "init"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
    actgate(&dir)
        .args(["config", "init", "--force"])
        .assert()
        .success();
}

#[test]
fn config_validate_clean_and_broken() {
    let dir = TempDir::new().unwrap();
    actgate(&dir)
        .args(["config", "validate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Config is valid"));

    std::fs::create_dir_all(dir.path().join(".actgate")).unwrap();
    std::fs::write(
        dir.path().join(".actgate/config.yaml"),
        "safety:\n  extra_blocked_commands:\n    - id: broken\n      pattern: '('\n      description: bad\n",
    )
    .unwrap();
    actgate(&dir)
        .args(["config", "validate"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("[error]"));
}

#[test]
fn config_show_json_includes_safety_section() {
    let dir = TempDir::new().unwrap();
    actgate(&dir)
        .args(["config", "show", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"safety\""))
        .stdout(predicate::str::contains("\"command_timeout_secs\": 30"));
}

// ---------------------------------------------------------------------------
// actgate check
// ---------------------------------------------------------------------------

#[test]
fn check_command_reports_blocking_rule() {
    let dir = TempDir::new().unwrap();
    actgate(&dir)
        .args(["check", "command", "rm", "-rf", "/"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("denied"))
        .stdout(predicate::str::contains("rm-recursive-force"));

    actgate(&dir)
        .args(["check", "command", "ls -la"])
        .assert()
        .success()
        .stdout(predicate::str::contains("allowed: ls -la"));
}

#[test]
fn check_paths_against_prefixes() {
    let dir = TempDir::new().unwrap();
    sandbox_config(&dir, "");
    let inside = dir.path().join("notes.txt");

    actgate(&dir)
        .args(["check", "write", inside.to_str().unwrap()])
        .assert()
        .success();
    actgate(&dir)
        .args(["check", "read", "/etc/shadow"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("not under an allowed read prefix"));
}

// ---------------------------------------------------------------------------
// actgate scan
// ---------------------------------------------------------------------------

#[test]
fn scan_file_lists_actions_and_display_text() {
    let dir = TempDir::new().unwrap();
    let reply = dir.path().join("reply.txt");
    std::fs::write(
        &reply,
        "Checking. [ACTION:RUN_CMD:uname -a[/ACTION]\n[ACTION:READ_FILE:/tmp/x]",
    )
    .unwrap();

    actgate(&dir)
        .args(["scan", reply.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("Checking."))
        .stdout(predicate::str::contains("RUN_CMD"))
        .stdout(predicate::str::contains("uname -a"))
        .stdout(predicate::str::contains("READ_FILE"))
        .stdout(predicate::str::contains("[ACTION:").not());
}

#[test]
fn scan_stdin_json_counts_discarded_tags() {
    let dir = TempDir::new().unwrap();
    actgate(&dir)
        .args(["scan", "--json"])
        .write_stdin("ok [ACTION:RUN_CMD:ls")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"discarded\": 1"))
        .stdout(predicate::str::contains("\"actions\": []"));
}

// ---------------------------------------------------------------------------
// actgate exec / backups
// ---------------------------------------------------------------------------

#[cfg(unix)]
#[test]
fn exec_write_backs_up_and_backups_lists_it() {
    let dir = TempDir::new().unwrap();
    sandbox_config(&dir, "");
    let target = dir.path().join("notes.txt");
    std::fs::write(&target, "old").unwrap();

    let tag = format!("[ACTION:WRITE_FILE:{}:\nnew[/ACTION]", target.display());
    actgate(&dir)
        .args(["exec", &tag])
        .assert()
        .success()
        .stdout(predicate::str::contains("backed up"));
    assert_eq!(std::fs::read_to_string(&target).unwrap(), "new");

    actgate(&dir)
        .args(["backups", "list", "--for", target.to_str().unwrap(), "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("notes.txt"));
}

#[cfg(unix)]
#[test]
fn exec_blocked_command_fails_without_running() {
    let dir = TempDir::new().unwrap();
    sandbox_config(&dir, "");
    actgate(&dir)
        .args(["exec", "[ACTION:RUN_CMD:rm -rf /[/ACTION]"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("blocked by rule"));
}

#[test]
fn exec_without_tags_is_an_error() {
    let dir = TempDir::new().unwrap();
    actgate(&dir)
        .args(["exec", "no tags here"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no complete action tags"));
}

// ---------------------------------------------------------------------------
// actgate chat
// ---------------------------------------------------------------------------

#[cfg(unix)]
#[test]
fn chat_with_command_model_runs_approved_action() {
    let dir = TempDir::new().unwrap();
    sandbox_config(
        &dir,
        "model:\n  provider: command\n  command: [\"sh\", \"-c\", \"cat > /dev/null; printf 'Sure. [ACTION:RUN_CMD:echo approved-output[/ACTION]'\"]\n",
    );

    actgate(&dir)
        .arg("chat")
        .write_stdin("say hi\n/approve\n/actions\n/quit\n")
        .timeout(std::time::Duration::from_secs(30))
        .assert()
        .success()
        .stdout(predicate::str::contains("Sure."))
        .stdout(predicate::str::contains("[a1] RUN_CMD echo approved-output"))
        .stdout(predicate::str::contains("succeeded"))
        .stdout(predicate::str::contains("approved-output"));
}
