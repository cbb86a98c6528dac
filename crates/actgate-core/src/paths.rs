use crate::error::{ActgateError, Result};
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const ACTGATE_DIR: &str = ".actgate";
pub const CONFIG_FILE: &str = ".actgate/config.yaml";
pub const HOME_BACKUPS_DIR: &str = ".actgate/backups";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

/// Default process-wide backup directory: `~/.actgate/backups`.
pub fn default_backup_dir() -> Result<PathBuf> {
    let home = home::home_dir().ok_or(ActgateError::HomeNotFound)?;
    Ok(home.join(HOME_BACKUPS_DIR))
}

/// Expand a leading `~/` against the user's home directory.
pub fn expand_home(raw: &str) -> Result<PathBuf> {
    match raw.strip_prefix("~/") {
        Some(rest) => {
            let home = home::home_dir().ok_or(ActgateError::HomeNotFound)?;
            Ok(home.join(rest))
        }
        None if raw == "~" => home::home_dir().ok_or(ActgateError::HomeNotFound),
        None => Ok(PathBuf::from(raw)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_path_is_under_actgate_dir() {
        let p = config_path(Path::new("/proj"));
        assert_eq!(p, PathBuf::from("/proj/.actgate/config.yaml"));
    }

    #[test]
    fn expand_home_leaves_absolute_paths() {
        assert_eq!(expand_home("/var/tmp").unwrap(), PathBuf::from("/var/tmp"));
    }
}
