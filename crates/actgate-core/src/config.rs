use crate::error::Result;
use crate::paths;
use crate::safety::{default_read_prefixes, default_write_prefixes, BlockRule, RuleSpec};
use crate::types::TargetOs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// SafetyConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyConfig {
    #[serde(default = "default_read_prefixes")]
    pub read_prefixes: Vec<String>,
    #[serde(default = "default_write_prefixes")]
    pub write_prefixes: Vec<String>,
    /// Replaces the built-in rule list when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_commands: Option<Vec<RuleSpec>>,
    /// Evaluated after the built-in (or replacement) rules.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_blocked_commands: Vec<RuleSpec>,
    /// Deny any path containing a `..` segment.
    #[serde(default)]
    pub reject_parent_segments: bool,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            read_prefixes: default_read_prefixes(),
            write_prefixes: default_write_prefixes(),
            blocked_commands: None,
            extra_blocked_commands: Vec::new(),
            reject_parent_segments: false,
        }
    }
}

// ---------------------------------------------------------------------------
// LimitsConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
    #[serde(default = "default_command_output")]
    pub command_output_bytes: usize,
    #[serde(default = "default_script_timeout")]
    pub script_timeout_secs: u64,
    #[serde(default = "default_script_output")]
    pub script_output_bytes: usize,
}

fn default_command_timeout() -> u64 {
    30
}

fn default_command_output() -> usize {
    1024 * 1024
}

fn default_script_timeout() -> u64 {
    60
}

fn default_script_output() -> usize {
    2 * 1024 * 1024
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            command_timeout_secs: default_command_timeout(),
            command_output_bytes: default_command_output(),
            script_timeout_secs: default_script_timeout(),
            script_output_bytes: default_script_output(),
        }
    }
}

impl LimitsConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn script_timeout(&self) -> Duration {
        Duration::from_secs(self.script_timeout_secs)
    }
}

// ---------------------------------------------------------------------------
// ModelConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelProvider {
    /// Ollama-compatible `/api/chat` NDJSON stream.
    Ollama,
    /// A local command that reads the conversation on stdin and streams text.
    Command,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: ModelProvider,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// argv for [`ModelProvider::Command`].
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

fn default_provider() -> ModelProvider {
    ModelProvider::Ollama
}

fn default_endpoint() -> String {
    "http://localhost:11434".to_string()
}

fn default_model() -> String {
    "llama3.1".to_string()
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            endpoint: default_endpoint(),
            model: default_model(),
            command: Vec::new(),
            system_prompt: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Config (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub os: TargetOs,
    #[serde(default)]
    pub safety: SafetyConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    /// Defaults to `~/.actgate/backups`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_dir: Option<String>,
    #[serde(default)]
    pub model: ModelConfig,
}

fn default_version() -> u32 {
    1
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            os: TargetOs::host(),
            safety: SafetyConfig::default(),
            limits: LimitsConfig::default(),
            backup_dir: None,
            model: ModelConfig::default(),
        }
    }
}

impl Config {
    /// Load `<root>/.actgate/config.yaml`, or defaults when the file is absent.
    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load_file(&path)
    }

    pub fn load_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        if data.trim().is_empty() {
            return Ok(Self::default());
        }
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    pub fn backup_dir(&self) -> Result<PathBuf> {
        match &self.backup_dir {
            Some(raw) => paths::expand_home(raw),
            None => paths::default_backup_dir(),
        }
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        // 1. Every rule pattern must compile
        let rules = self
            .safety
            .blocked_commands
            .iter()
            .flatten()
            .chain(self.safety.extra_blocked_commands.iter());
        for spec in rules {
            if let Err(e) = BlockRule::compile(spec) {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: e.to_string(),
                });
            }
        }

        // 2. An explicitly empty rule list disables the blocklist
        if matches!(&self.safety.blocked_commands, Some(v) if v.is_empty()) {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "safety.blocked_commands is empty: no commands are blocked".to_string(),
            });
        }

        // 3. Empty prefixes would never match; flag them
        for (field, prefixes) in [
            ("read_prefixes", &self.safety.read_prefixes),
            ("write_prefixes", &self.safety.write_prefixes),
        ] {
            if prefixes.iter().any(|p| p.trim().is_empty()) {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: format!("safety.{field} contains an empty prefix"),
                });
            }
            if prefixes.iter().any(|p| p == "/") {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: format!("safety.{field} allows the whole filesystem ('/')"),
                });
            }
        }

        // 4. Limits must be non-zero
        let limits = &self.limits;
        for (field, value) in [
            ("command_timeout_secs", limits.command_timeout_secs as usize),
            ("command_output_bytes", limits.command_output_bytes),
            ("script_timeout_secs", limits.script_timeout_secs as usize),
            ("script_output_bytes", limits.script_output_bytes),
        ] {
            if value == 0 {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: format!("limits.{field} must be greater than zero"),
                });
            }
        }

        // 5. Command provider needs an argv
        if self.model.provider == ModelProvider::Command && self.model.command.is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "model.provider is 'command' but model.command is empty".to_string(),
            });
        }

        warnings
    }
}
