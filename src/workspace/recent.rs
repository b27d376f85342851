//! Recently opened workspaces.
//!
//! A short JSON list kept in the platform data directory, most recent first.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

/// Maximum number of remembered workspaces.
pub const MAX_RECENT: usize = 10;

const FILE_NAME: &str = "recent_workspaces.json";

/// One remembered workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecentEntry {
    /// Absolute path of the workspace file
    pub path: PathBuf,
    /// Display name
    pub name: String,
    /// When it was last opened
    pub last_opened: DateTime<Utc>,
}

/// Persisted list of recently opened workspaces.
#[derive(Debug, Clone)]
pub struct RecentWorkspaces {
    file: PathBuf,
    max_entries: usize,
}

impl RecentWorkspaces {
    /// List stored at an explicit location.
    #[must_use]
    pub fn at(file: impl Into<PathBuf>) -> Self {
        Self {
            file: file.into(),
            max_entries: MAX_RECENT,
        }
    }

    /// List stored in the platform data directory.
    pub fn default_location() -> Result<Self> {
        let dirs = ProjectDirs::from("", "", "dedup")
            .context("Failed to determine project directories")?;
        Ok(Self::at(dirs.data_dir().join(FILE_NAME)))
    }

    /// Where the list is stored.
    #[must_use]
    pub fn file(&self) -> &Path {
        &self.file
    }

    fn read(&self) -> Vec<RecentEntry> {
        let content = match fs::read_to_string(&self.file) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                log::warn!("Failed to read {}: {}", self.file.display(), e);
                return Vec::new();
            }
        };
        serde_json::from_str(&content).unwrap_or_else(|e| {
            log::warn!("Ignoring unreadable recent workspace list: {}", e);
            Vec::new()
        })
    }

    fn write(&self, entries: &[RecentEntry]) -> Result<()> {
        if let Some(parent) = self.file.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(entries)
            .context("Failed to serialize recent workspaces")?;
        fs::write(&self.file, json)
            .with_context(|| format!("Failed to write {}", self.file.display()))?;
        Ok(())
    }

    /// Remembered workspaces that still exist, most recent first.
    ///
    /// Entries whose file is gone are dropped from the stored list.
    pub fn list(&self) -> Result<Vec<RecentEntry>> {
        let stored = self.read();
        let total = stored.len();
        let valid: Vec<_> = stored.into_iter().filter(|e| e.path.exists()).collect();
        if valid.len() != total {
            log::debug!("Pruned {} vanished workspaces", total - valid.len());
            self.write(&valid)?;
        }
        Ok(valid)
    }

    /// Record that `workspace` was just opened. Nonexistent paths are ignored.
    pub fn add(&self, workspace: &Path, name: Option<&str>) -> Result<()> {
        if !workspace.exists() {
            return Ok(());
        }
        let path = workspace
            .canonicalize()
            .with_context(|| format!("Failed to resolve {}", workspace.display()))?;
        let name = name.map_or_else(
            || {
                path.file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default()
            },
            str::to_string,
        );

        let mut entries = self.list()?;
        entries.retain(|e| e.path != path);
        entries.insert(
            0,
            RecentEntry {
                path,
                name,
                last_opened: Utc::now(),
            },
        );
        entries.truncate(self.max_entries);
        self.write(&entries)
    }

    /// Most recently opened workspace, if any.
    pub fn last(&self) -> Result<Option<PathBuf>> {
        Ok(self.list()?.into_iter().next().map(|e| e.path))
    }

    /// Forget one workspace.
    pub fn remove(&self, workspace: &Path) -> Result<()> {
        let resolved = workspace
            .canonicalize()
            .unwrap_or_else(|_| workspace.to_path_buf());
        let mut entries = self.read();
        entries.retain(|e| e.path != workspace && e.path != resolved);
        self.write(&entries)
    }

    /// Forget every workspace.
    pub fn clear(&self) -> Result<()> {
        self.write(&[])
    }
}
