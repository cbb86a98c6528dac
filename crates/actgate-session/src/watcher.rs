use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use actgate_core::config::Config;
use actgate_core::paths;
use actgate_core::safety::SafetyGate;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(800);

/// Polls `<root>/.actgate/config.yaml` and swaps the gate policy whenever the
/// file's mtime changes. A file that fails to load or compile leaves the
/// current policy in place. Removing the file reverts to the defaults.
pub struct ConfigWatcher {
    path: PathBuf,
    gate: SafetyGate,
    interval: Duration,
}

impl ConfigWatcher {
    pub fn new(root: &Path, gate: SafetyGate) -> Self {
        Self {
            path: paths::config_path(root),
            gate,
            interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Start polling. Abort the returned handle to stop.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut last_mtime = mtime(&self.path).await;
            loop {
                tokio::time::sleep(self.interval).await;
                let current = mtime(&self.path).await;
                if current == last_mtime {
                    continue;
                }
                last_mtime = current;
                self.reload();
            }
        })
    }

    fn reload(&self) {
        let cfg = if self.path.exists() {
            match Config::load_file(&self.path) {
                Ok(cfg) => cfg,
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "config reload failed, keeping current policy");
                    return;
                }
            }
        } else {
            Config::default()
        };
        match self.gate.reload(&cfg.safety) {
            Ok(()) => info!(path = %self.path.display(), "safety policy reloaded"),
            Err(e) => warn!(path = %self.path.display(), error = %e, "invalid safety policy, keeping current"),
        }
    }
}

async fn mtime(path: &Path) -> Option<SystemTime> {
    tokio::fs::metadata(path).await.ok()?.modified().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_config(root: &Path, yaml: &str) {
        let path = paths::config_path(root);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, yaml).unwrap();
    }

    async fn eventually(mut check: impl FnMut() -> bool) -> bool {
        for _ in 0..100 {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }

    #[tokio::test]
    async fn edit_swaps_policy_without_restart() {
        let dir = TempDir::new().unwrap();
        write_config(dir.path(), "version: 1\n");
        let gate = SafetyGate::default();
        assert!(gate.is_command_allowed("curl http://example.com"));

        let handle = ConfigWatcher::new(dir.path(), gate.clone())
            .interval(Duration::from_millis(20))
            .spawn();
        tokio::time::sleep(Duration::from_millis(50)).await;
        write_config(
            dir.path(),
            "safety:\n  extra_blocked_commands:\n    - id: no-curl\n      pattern: '\\bcurl\\b'\n      description: network fetch\n",
        );

        assert!(eventually(|| !gate.is_command_allowed("curl http://example.com")).await);
        assert_eq!(
            gate.check_command("curl x").unwrap_err().rule_id,
            "no-curl"
        );
        handle.abort();
    }

    #[tokio::test]
    async fn broken_file_keeps_current_policy() {
        let dir = TempDir::new().unwrap();
        write_config(dir.path(), "version: 1\n");
        let gate = SafetyGate::default();
        let handle = ConfigWatcher::new(dir.path(), gate.clone())
            .interval(Duration::from_millis(20))
            .spawn();
        tokio::time::sleep(Duration::from_millis(50)).await;

        write_config(
            dir.path(),
            "safety:\n  extra_blocked_commands:\n    - id: bad\n      pattern: '('\n      description: x\n",
        );
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!gate.is_command_allowed("rm -rf /"));
        assert!(gate.is_command_allowed("ls"));
        handle.abort();
    }
}
