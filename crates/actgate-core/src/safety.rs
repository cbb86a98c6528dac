//! Command blocklist and path confinement.
//!
//! The gate is a coarse filter, not a sandbox. Decisions are pure functions of
//! the current [`Policy`] snapshot; the gate never logs, mutates, or executes.
//! Reloading builds a whole new snapshot and swaps one pointer, so a reader
//! sees either the old policy or the new one, never a mix.

use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::SafetyConfig;
use crate::error::{ActgateError, Result};

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

/// Serializable form of a blocked-command rule, as it appears in config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSpec {
    pub id: String,
    pub pattern: String,
    #[serde(default)]
    pub description: String,
}

impl RuleSpec {
    fn new(id: &str, pattern: &str, description: &str) -> Self {
        Self {
            id: id.to_string(),
            pattern: pattern.to_string(),
            description: description.to_string(),
        }
    }
}

/// A compiled rule. Matching is a regex search over the literal command text.
#[derive(Debug, Clone)]
pub struct BlockRule {
    pub id: String,
    pub description: String,
    regex: Regex,
}

impl BlockRule {
    pub fn compile(spec: &RuleSpec) -> Result<Self> {
        let regex = Regex::new(&spec.pattern).map_err(|source| ActgateError::InvalidPattern {
            id: spec.id.clone(),
            source,
        })?;
        Ok(Self {
            id: spec.id.clone(),
            description: spec.description.clone(),
            regex,
        })
    }

    pub fn matches(&self, command: &str) -> bool {
        self.regex.is_match(command)
    }

    pub fn pattern(&self) -> &str {
        self.regex.as_str()
    }
}

/// Built-in destructive-pattern rules, evaluated in order.
pub fn default_rules() -> Vec<RuleSpec> {
    vec![
        // Recursive force delete
        RuleSpec::new(
            "rm-recursive-force",
            r"(?i)\brm\s+(?:-[a-z-]*\s+)*-[a-z]*(?:r[a-z]*f|f[a-z]*r)",
            "recursive force delete",
        ),
        RuleSpec::new(
            "rm-recursive-force-split",
            r"(?i)\brm\b.*(?:\s-r\b|--recursive\b).*(?:\s-f\b|--force\b)|\brm\b.*(?:\s-f\b|--force\b).*(?:\s-r\b|--recursive\b)",
            "recursive force delete",
        ),
        RuleSpec::new(
            "rm-no-preserve-root",
            r"--no-preserve-root",
            "delete without root protection",
        ),
        RuleSpec::new(
            "windows-recursive-delete",
            r"(?i)\b(?:rd|rmdir)\s+/s\b|\bdel\s+(?:\S+\s+)*/s\b|\bremove-item\b.*-recurse",
            "recursive delete",
        ),
        // Disk formatting
        RuleSpec::new(
            "format-disk",
            r"(?i)\bmkfs(?:\.[a-z0-9]+)?\b|\bformat\s+[a-z]:|\bformat-volume\b|\bdiskpart\b",
            "disk formatting",
        ),
        // Filesystem mutation utilities
        RuleSpec::new(
            "raw-device-write",
            r"\bdd\s+.*\bof=/dev/",
            "raw write to a block device",
        ),
        RuleSpec::new(
            "partition-tools",
            r"\b(?:fdisk|sfdisk|parted|wipefs|shred)\b",
            "partition or wipe utility",
        ),
        RuleSpec::new(
            "chmod-root-777",
            r"\bchmod\s+(?:-[a-zA-Z]+\s+)*0?777\s+/(?:\s|$)",
            "world-writable root",
        ),
        RuleSpec::new(
            "chown-root-recursive",
            r"\bchown\s+(?:-[a-zA-Z]+\s+)*-R\s+\S+\s+/(?:\s|$)",
            "recursive ownership change of root",
        ),
        // Fork bomb
        RuleSpec::new(
            "fork-bomb",
            r":\s*\(\s*\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:",
            "fork bomb",
        ),
        // Pipe-to-shell downloads
        RuleSpec::new(
            "pipe-to-shell",
            r"(?i)\b(?:curl|wget)\b[^|]*\|\s*(?:sudo\s+)?(?:(?:ba|z|da|k)?sh|python[0-9.]*|perl)\b",
            "downloaded script piped into an interpreter",
        ),
        RuleSpec::new(
            "powershell-download-exec",
            r"(?i)\b(?:iwr|irm|invoke-webrequest|invoke-restmethod)\b.*\|\s*(?:iex|invoke-expression)\b|downloadstring\s*\(",
            "downloaded script executed in place",
        ),
        // Privileged account mutation
        RuleSpec::new(
            "account-mutation",
            r"(?i)(?:^|[\s;&|(])(?:sudo\s+)?(?:useradd|userdel|usermod|adduser|deluser|groupadd|groupdel|passwd|chpasswd|visudo)\b|\bnet\s+user\b",
            "user or group account change",
        ),
        // Critical file overwrite
        RuleSpec::new(
            "critical-file-overwrite",
            r">\s*/etc/(?:passwd|shadow|sudoers|group|fstab|hosts)\b|\btee\s+(?:-a\s+)?/etc/(?:passwd|shadow|sudoers|group|fstab)\b",
            "overwrite of a critical system file",
        ),
        RuleSpec::new(
            "device-overwrite",
            r">\s*/dev/(?:sd[a-z]|hd[a-z]|nvme\d|disk\d|mmcblk\d)",
            "redirect into a block device",
        ),
        // Power and service state
        RuleSpec::new(
            "power-state",
            r"(?i)\b(?:shutdown|reboot|halt|poweroff|stop-computer|restart-computer)\b|\binit\s+[06]\b",
            "power state change",
        ),
        RuleSpec::new(
            "service-state",
            r"(?i)\bsystemctl\s+(?:stop|disable|mask|kill|isolate)\b|\bservice\s+\S+\s+stop\b|\bstop-service\b|\bkill\s+-9\s+-1\b",
            "service state change",
        ),
    ]
}

pub fn default_read_prefixes() -> Vec<String> {
    [
        "/home", "/Users", "/tmp", "/var/tmp", "/var/log", "/etc", "/opt", "/srv", "/usr/share",
        "/usr/local", r"C:\Users", r"C:\Temp",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

pub fn default_write_prefixes() -> Vec<String> {
    ["/home", "/Users", "/tmp", "/var/tmp", r"C:\Users", r"C:\Temp"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

// ---------------------------------------------------------------------------
// Denial
// ---------------------------------------------------------------------------

/// Structured reason a command was refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Denial {
    pub rule_id: String,
    pub description: String,
}

impl fmt::Display for Denial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "blocked by rule '{}': {}", self.rule_id, self.description)
    }
}

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// Immutable policy snapshot.
#[derive(Debug, Clone)]
pub struct Policy {
    rules: Vec<BlockRule>,
    read_prefixes: Vec<String>,
    write_prefixes: Vec<String>,
    reject_parent_segments: bool,
}

impl Policy {
    pub fn from_config(cfg: &SafetyConfig) -> Result<Self> {
        let specs = cfg
            .blocked_commands
            .clone()
            .unwrap_or_else(default_rules);
        let rules = specs
            .iter()
            .chain(cfg.extra_blocked_commands.iter())
            .map(BlockRule::compile)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            rules,
            read_prefixes: cfg.read_prefixes.clone(),
            write_prefixes: cfg.write_prefixes.clone(),
            reject_parent_segments: cfg.reject_parent_segments,
        })
    }

    pub fn rules(&self) -> &[BlockRule] {
        &self.rules
    }

    pub fn read_prefixes(&self) -> &[String] {
        &self.read_prefixes
    }

    pub fn write_prefixes(&self) -> &[String] {
        &self.write_prefixes
    }

    /// First rule matching `command`, in declaration order.
    pub fn check_command(&self, command: &str) -> std::result::Result<(), Denial> {
        match self.rules.iter().find(|r| r.matches(command)) {
            Some(rule) => Err(Denial {
                rule_id: rule.id.clone(),
                description: rule.description.clone(),
            }),
            None => Ok(()),
        }
    }

    pub fn is_command_allowed(&self, command: &str) -> bool {
        self.check_command(command).is_ok()
    }

    pub fn is_path_readable(&self, path: &str) -> bool {
        self.path_allowed(path, &self.read_prefixes)
    }

    pub fn is_path_writable(&self, path: &str) -> bool {
        self.path_allowed(path, &self.write_prefixes)
    }

    // Literal string prefix; no canonicalization or symlink resolution.
    fn path_allowed(&self, path: &str, prefixes: &[String]) -> bool {
        if path.is_empty() {
            return false;
        }
        if self.reject_parent_segments && has_parent_segment(path) {
            return false;
        }
        prefixes
            .iter()
            .any(|p| !p.is_empty() && path.starts_with(p.as_str()))
    }
}

impl Default for Policy {
    fn default() -> Self {
        let rules = default_rules()
            .iter()
            .filter_map(|spec| BlockRule::compile(spec).ok())
            .collect();
        Self {
            rules,
            read_prefixes: default_read_prefixes(),
            write_prefixes: default_write_prefixes(),
            reject_parent_segments: false,
        }
    }
}

fn has_parent_segment(path: &str) -> bool {
    path.split(['/', '\\']).any(|seg| seg == "..")
}

// ---------------------------------------------------------------------------
// SafetyGate
// ---------------------------------------------------------------------------

/// Shared handle to the current policy. Clones share the same snapshot slot.
#[derive(Debug, Clone)]
pub struct SafetyGate {
    policy: Arc<ArcSwap<Policy>>,
}

impl SafetyGate {
    pub fn new(policy: Policy) -> Self {
        Self {
            policy: Arc::new(ArcSwap::from_pointee(policy)),
        }
    }

    pub fn from_config(cfg: &SafetyConfig) -> Result<Self> {
        Ok(Self::new(Policy::from_config(cfg)?))
    }

    /// The snapshot in effect right now.
    pub fn snapshot(&self) -> Arc<Policy> {
        self.policy.load_full()
    }

    pub fn swap(&self, policy: Policy) {
        self.policy.store(Arc::new(policy));
    }

    /// Compile `cfg` and swap it in. On error the current policy stays.
    pub fn reload(&self, cfg: &SafetyConfig) -> Result<()> {
        let policy = Policy::from_config(cfg)?;
        self.swap(policy);
        Ok(())
    }

    pub fn check_command(&self, command: &str) -> std::result::Result<(), Denial> {
        self.policy.load().check_command(command)
    }

    pub fn is_command_allowed(&self, command: &str) -> bool {
        self.policy.load().is_command_allowed(command)
    }

    pub fn is_path_readable(&self, path: &str) -> bool {
        self.policy.load().is_path_readable(path)
    }

    pub fn is_path_writable(&self, path: &str) -> bool {
        self.policy.load().is_path_writable(path)
    }
}

impl Default for SafetyGate {
    fn default() -> Self {
        Self::new(Policy::default())
    }
}
