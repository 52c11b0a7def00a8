//! Name map: last-known name of every forward list.
//!
//! Persists a [`NameMapFile`] JSON document at `<state>/name_map.json`.
//! The map is a cache: a missing or unreadable file means "no previous names",
//! which the rename resolver treats as "no rename".

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use listsync_core::ListId;

use crate::error::{io_err, EngineError};

/// List id → last-known list name.
pub type NameMap = BTreeMap<ListId, String>;

/// On-disk name map payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NameMapFile {
    pub updated_at: DateTime<Utc>,
    pub lists: NameMap,
}

impl NameMapFile {
    pub fn empty() -> Self {
        Self {
            updated_at: Utc::now(),
            lists: NameMap::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum NameMapCompat {
    Structured(NameMapStructuredCompat),
    Legacy(NameMap),
}

#[derive(Debug, Deserialize)]
struct NameMapStructuredCompat {
    pub updated_at: Option<DateTime<Utc>>,
    pub lists: NameMap,
}

/// `<state>/name_map.json`
pub fn map_path_at(state_dir: &Path) -> PathBuf {
    state_dir.join("name_map.json")
}

/// Outcome of [`load_at`]: the map plus why it might be empty.
#[derive(Debug)]
pub struct Loaded {
    pub file: NameMapFile,
    /// Set when the file existed but could not be decoded or parsed.
    pub corrupt: Option<String>,
}

/// Load the name map.
///
/// Returns an empty map if the file does not exist, is not UTF-8 or does not
/// parse. Other I/O failures are errors.
pub fn load_at(state_dir: &Path) -> Result<Loaded, EngineError> {
    let path = map_path_at(state_dir);
    if !path.exists() {
        return Ok(Loaded {
            file: NameMapFile::empty(),
            corrupt: None,
        });
    }
    let bytes = std::fs::read(&path).map_err(|e| io_err(&path, e))?;
    let parsed = std::str::from_utf8(&bytes)
        .map_err(|e| e.to_string())
        .and_then(|contents| serde_json::from_str::<NameMapCompat>(contents).map_err(|e| e.to_string()));
    let file = match parsed {
        Ok(NameMapCompat::Structured(map)) => NameMapFile {
            updated_at: map.updated_at.unwrap_or_else(Utc::now),
            lists: map.lists,
        },
        Ok(NameMapCompat::Legacy(lists)) => NameMapFile {
            updated_at: Utc::now(),
            lists,
        },
        Err(e) => {
            tracing::warn!("ignoring unreadable name map {}: {e}", path.display());
            return Ok(Loaded {
                file: NameMapFile::empty(),
                corrupt: Some(format!("{}: {e}", path.display())),
            });
        }
    };
    Ok(Loaded {
        file,
        corrupt: None,
    })
}

/// Save the name map atomically.
///
/// Writes to `<path>.tmp` then renames to `<path>`.
pub fn save_at(state_dir: &Path, map: &NameMapFile) -> Result<(), EngineError> {
    std::fs::create_dir_all(state_dir).map_err(|e| io_err(state_dir, e))?;

    let path = map_path_at(state_dir);
    let json = serde_json::to_string_pretty(map)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &json).map_err(|e| io_err(&tmp, e))?;
    std::fs::rename(&tmp, &path).map_err(|e| io_err(&path, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn empty_map_when_file_missing() {
        let tmp = TempDir::new().unwrap();
        let loaded = load_at(tmp.path()).unwrap();
        assert!(loaded.file.lists.is_empty());
        assert!(loaded.corrupt.is_none());
    }

    #[test]
    fn save_load_and_tmp_cleanup() {
        let tmp = TempDir::new().unwrap();
        let mut file = NameMapFile::empty();
        file.lists.insert(ListId::from("500"), "spring_promo".into());

        save_at(tmp.path(), &file).unwrap();
        assert!(!map_path_at(tmp.path()).with_extension("json.tmp").exists());

        let loaded = load_at(tmp.path()).unwrap();
        assert_eq!(loaded.file.lists, file.lists);
    }

    #[test]
    fn legacy_flat_map_is_accepted() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(
            map_path_at(tmp.path()),
            r#"{"718": "General", "719": "Newsletter"}"#,
        )
        .unwrap();

        let loaded = load_at(tmp.path()).unwrap();
        assert_eq!(
            loaded.file.lists.get(&ListId::from("719")),
            Some(&"Newsletter".to_string())
        );
    }

    #[test]
    fn structured_without_updated_at_sets_timestamp() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(map_path_at(tmp.path()), r#"{"lists":{"718":"General"}}"#).unwrap();

        let before = Utc::now();
        let loaded = load_at(tmp.path()).unwrap();
        assert!(loaded.file.updated_at >= before);
        assert_eq!(loaded.file.lists.len(), 1);
    }

    #[test]
    fn non_utf8_file_means_no_previous_names() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(map_path_at(tmp.path()), b"{\"lists\":{\"718\":\"Gen\xff\xfe\"}}").unwrap();

        let loaded = load_at(tmp.path()).unwrap();
        assert!(loaded.file.lists.is_empty());
        assert!(loaded.corrupt.as_deref().is_some_and(|r| r.contains("utf-8")));
    }

    #[test]
    fn corrupt_file_means_no_previous_names() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(map_path_at(tmp.path()), "{not json").unwrap();

        let loaded = load_at(tmp.path()).unwrap();
        assert!(loaded.file.lists.is_empty());
        assert!(loaded.corrupt.is_some());
    }
}
