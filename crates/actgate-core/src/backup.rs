//! Process-wide store of pre-overwrite file copies.
//!
//! Layout: one flat directory, one file per backup, named
//! `<encoded original path>.<UTC timestamp>`. The encoding is reversible:
//! `%`, `_`, `\` and `:` are percent-escaped, then `/` becomes `_`, so two
//! distinct originals never share a key. Records are never deleted here.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::error::Result;
use crate::io;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H-%M-%S%.3fZ";

/// Attempts before giving up on a free name within the same millisecond.
const MAX_COLLISIONS: u32 = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupRecord {
    /// Encoded original path (the key prefix).
    pub key: String,
    pub created_at: DateTime<Utc>,
    /// Location of the copy inside the store.
    pub path: PathBuf,
}

impl BackupRecord {
    /// The path this backup was taken from.
    pub fn original(&self) -> String {
        decode_path(&self.key)
    }
}

#[derive(Debug, Clone)]
pub struct BackupStore {
    dir: PathBuf,
}

impl BackupStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Copy `original` into the store if it exists. Returns `None` when there
    /// was nothing to back up.
    pub fn backup(&self, original: &Path) -> Result<Option<BackupRecord>> {
        let data = match std::fs::read(original) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        io::ensure_dir(&self.dir)?;

        let key = encode_path(&original.to_string_lossy());
        let created_at = Utc::now();
        let stamp = created_at.format(TIMESTAMP_FORMAT).to_string();
        let base = format!("{key}.{stamp}");

        for n in 0..MAX_COLLISIONS {
            let name = if n == 0 {
                base.clone()
            } else {
                format!("{base}.{n}")
            };
            let path = self.dir.join(&name);
            if io::write_new(&path, &data)? {
                debug!(original = %original.display(), backup = %path.display(), "backup written");
                return Ok(Some(BackupRecord {
                    key,
                    created_at,
                    path,
                }));
            }
        }
        Err(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!("no free backup name for {base}"),
        )
        .into())
    }

    /// All records, oldest first. Unrecognised files are skipped.
    pub fn list(&self) -> Result<Vec<BackupRecord>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut records = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some((key, created_at)) = parse_name(&name) {
                records.push(BackupRecord {
                    key,
                    created_at,
                    path: entry.path(),
                });
            }
        }
        records.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.path.cmp(&b.path))
        });
        Ok(records)
    }

    /// Records for one original path, oldest first.
    pub fn list_for(&self, original: &Path) -> Result<Vec<BackupRecord>> {
        let key = encode_path(&original.to_string_lossy());
        Ok(self.list()?.into_iter().filter(|r| r.key == key).collect())
    }
}

/// `/home/me/a_b.txt` -> `_home_me_a%5Fb.txt`, `C:\x` -> `C%3A%5Cx`.
pub fn encode_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for c in path.chars() {
        match c {
            '%' => out.push_str("%25"),
            '_' => out.push_str("%5F"),
            '\\' => out.push_str("%5C"),
            ':' => out.push_str("%3A"),
            '/' => out.push('_'),
            other => out.push(other),
        }
    }
    out
}

/// Inverse of [`encode_path`]. Unknown escapes are kept verbatim.
pub fn decode_path(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut rest = key;
    while let Some(c) = rest.chars().next() {
        let decoded = match c {
            '_' => Some(('/', 1)),
            '%' => match rest.get(1..3) {
                Some("25") => Some(('%', 3)),
                Some("5F") => Some(('_', 3)),
                Some("5C") => Some(('\\', 3)),
                Some("3A") => Some((':', 3)),
                _ => None,
            },
            _ => None,
        };
        let (ch, len) = decoded.unwrap_or((c, c.len_utf8()));
        out.push(ch);
        rest = &rest[len..];
    }
    out
}

static NAME_RE: OnceLock<Regex> = OnceLock::new();

fn name_regex() -> &'static Regex {
    NAME_RE.get_or_init(|| {
        Regex::new(r"^(.+)\.(\d{4}-\d{2}-\d{2}T\d{2}-\d{2}-\d{2}\.\d{3}Z)(?:\.\d+)?$").unwrap()
    })
}

fn parse_name(name: &str) -> Option<(String, DateTime<Utc>)> {
    let caps = name_regex().captures(name)?;
    let key = caps.get(1)?.as_str().to_string();
    let stamp = caps.get(2)?.as_str();
    let naive = NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).ok()?;
    Some((key, naive.and_utc()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn encode_replaces_separators() {
        assert_eq!(encode_path("/home/me/a.txt"), "_home_me_a.txt");
        assert_eq!(encode_path("C:\\Users\\me"), "C%3A%5CUsers%5Cme");
        assert_eq!(encode_path("/a_b"), "_a%5Fb");
        assert_ne!(encode_path("/a_b"), encode_path("/a/b"));
    }

    #[test]
    fn decode_restores_the_original() {
        for original in ["/a_b", "/a/b", "/tmp/100%_done", "C:\\x\\y.txt", "/é/ü"] {
            assert_eq!(decode_path(&encode_path(original)), original);
        }
        assert_eq!(decode_path("_x%ZZ"), "/x%ZZ");
    }

    #[test]
    fn underscore_and_slash_paths_list_separately() {
        let dir = TempDir::new().unwrap();
        let store = BackupStore::new(dir.path().join("bk"));
        let nested = dir.path().join("a").join("b");
        let flat = dir.path().join("a_b");
        std::fs::create_dir_all(nested.parent().unwrap()).unwrap();
        std::fs::write(&nested, "nested").unwrap();
        std::fs::write(&flat, "flat").unwrap();
        store.backup(&nested).unwrap().unwrap();
        store.backup(&flat).unwrap().unwrap();

        let records = store.list_for(&nested).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(std::fs::read_to_string(&records[0].path).unwrap(), "nested");
        assert_eq!(records[0].original(), nested.to_string_lossy());
        assert_eq!(store.list_for(&flat).unwrap().len(), 1);
    }

    #[test]
    fn backup_copies_bytes_verbatim() {
        let dir = TempDir::new().unwrap();
        let store = BackupStore::new(dir.path().join("bk"));
        let original = dir.path().join("data.bin");
        let bytes = vec![0u8, 159, 146, 150, b'\n', 255];
        std::fs::write(&original, &bytes).unwrap();

        let record = store.backup(&original).unwrap().unwrap();
        assert_eq!(std::fs::read(&record.path).unwrap(), bytes);
        assert_eq!(record.key, encode_path(&original.to_string_lossy()));
    }

    #[test]
    fn missing_original_is_not_backed_up() {
        let dir = TempDir::new().unwrap();
        let store = BackupStore::new(dir.path().join("bk"));
        assert!(store.backup(&dir.path().join("nope")).unwrap().is_none());
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn repeated_backups_never_overwrite() {
        let dir = TempDir::new().unwrap();
        let store = BackupStore::new(dir.path().join("bk"));
        let original = dir.path().join("f.txt");

        for i in 0..3 {
            std::fs::write(&original, format!("v{i}")).unwrap();
            store.backup(&original).unwrap().unwrap();
        }
        let records = store.list_for(&original).unwrap();
        assert_eq!(records.len(), 3);
        let mut contents: Vec<String> = records
            .iter()
            .map(|r| std::fs::read_to_string(&r.path).unwrap())
            .collect();
        contents.sort();
        assert_eq!(contents, vec!["v0", "v1", "v2"]);
    }

    #[test]
    fn list_skips_foreign_files() {
        let dir = TempDir::new().unwrap();
        let bk = dir.path().join("bk");
        std::fs::create_dir_all(&bk).unwrap();
        std::fs::write(bk.join("README"), "x").unwrap();
        std::fs::write(bk.join("_tmp_a.txt.2026-01-02T03-04-05.678Z"), "y").unwrap();

        let records = BackupStore::new(&bk).list().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].key, "_tmp_a.txt");
        assert_eq!(
            records[0].created_at.format(TIMESTAMP_FORMAT).to_string(),
            "2026-01-02T03-04-05.678Z"
        );
    }
}
