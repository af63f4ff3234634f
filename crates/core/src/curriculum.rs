//! Curriculum Resolution
//!
//! This module resolves a learner's (subject, level) to the instructional
//! text the tutor works from. Resolution never fails: a missing level falls
//! back to level 0 of the same subject, a missing subject falls back to
//! literacy level 0, and when nothing at all is available a fixed minimal
//! literacy plan is used.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Subject used when the requested one has no curriculum.
pub const DEFAULT_SUBJECT: &str = "literacy";

/// Used only when no curriculum resolves at all.
pub const MINIMAL_CURRICULUM: &str =
    "Teach basic literacy: letters A, E, I, O, U and numbers 1 to 5.";

/// Defines the contract for any source of curriculum text.
///
/// This abstraction lets the system swap between file-backed and in-memory
/// curricula while keeping the fallback chain identical for both.
#[async_trait]
pub trait CurriculumProvider: Send + Sync {
    /// Looks up the exact (subject, level) entry, if it exists.
    async fn lookup(&self, subject: &str, level: u32) -> Option<String>;

    /// Lists every subject that has at least one level.
    async fn list_subjects(&self) -> Vec<String>;

    /// Lists the available levels of a subject in ascending order.
    async fn list_levels(&self, subject: &str) -> Vec<u32>;

    /// Resolves curriculum text through the fallback chain.
    async fn resolve(&self, subject: &str, level: u32) -> String {
        if let Some(text) = self.lookup(subject, level).await {
            info!(%subject, level, "Loaded curriculum");
            return text;
        }
        warn!(%subject, level, "Curriculum level not found, trying level 0");
        if let Some(text) = self.lookup(subject, 0).await {
            return text;
        }
        warn!(%subject, "Subject not found, falling back to {} level 0", DEFAULT_SUBJECT);
        if let Some(text) = self.lookup(DEFAULT_SUBJECT, 0).await {
            return text;
        }
        error!("No curriculum available at all, using the built-in minimal plan");
        MINIMAL_CURRICULUM.to_string()
    }
}

/// Reads curriculum from `<root>/<subject>/level<N>.txt` files.
///
/// New subjects are added by creating a folder with level files; no code
/// changes are needed.
pub struct DirectoryCurriculum {
    root: PathBuf,
}

impl DirectoryCurriculum {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn level_path(&self, subject: &str, level: u32) -> Option<PathBuf> {
        // Subjects are path components; anything that could escape the root is rejected.
        let safe = !subject.is_empty()
            && subject
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        safe.then(|| self.root.join(subject).join(format!("level{level}.txt")))
    }
}

fn parse_level_file_name(name: &str) -> Option<u32> {
    name.strip_prefix("level")?.strip_suffix(".txt")?.parse().ok()
}

#[async_trait]
impl CurriculumProvider for DirectoryCurriculum {
    async fn lookup(&self, subject: &str, level: u32) -> Option<String> {
        let path = self.level_path(subject, level)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Some(content.trim().to_string()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read curriculum file");
                None
            }
        }
    }

    async fn list_subjects(&self) -> Vec<String> {
        let Ok(mut entries) = tokio::fs::read_dir(&self.root).await else {
            return Vec::new();
        };
        let mut subjects = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let is_dir = entry
                .file_type()
                .await
                .map(|t| t.is_dir())
                .unwrap_or(false);
            if is_dir {
                if let Some(name) = entry.file_name().to_str() {
                    subjects.push(name.to_string());
                }
            }
        }
        subjects.sort();
        subjects
    }

    async fn list_levels(&self, subject: &str) -> Vec<u32> {
        let Ok(mut entries) = tokio::fs::read_dir(self.root.join(subject)).await else {
            return Vec::new();
        };
        let mut levels = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            if let Some(level) = entry.file_name().to_str().and_then(parse_level_file_name) {
                levels.push(level);
            }
        }
        levels.sort_unstable();
        levels
    }
}

/// An in-memory `CurriculumProvider` for development and testing.
///
/// Provides predictable output without touching the filesystem.
#[derive(Debug, Clone, Default)]
pub struct StaticCurriculum {
    entries: HashMap<(String, u32), String>,
}

impl StaticCurriculum {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(mut self, subject: &str, level: u32, text: &str) -> Self {
        self.entries
            .insert((subject.to_string(), level), text.to_string());
        self
    }
}

#[async_trait]
impl CurriculumProvider for StaticCurriculum {
    async fn lookup(&self, subject: &str, level: u32) -> Option<String> {
        self.entries.get(&(subject.to_string(), level)).cloned()
    }

    async fn list_subjects(&self) -> Vec<String> {
        let mut subjects: Vec<String> = self.entries.keys().map(|(s, _)| s.clone()).collect();
        subjects.sort();
        subjects.dedup();
        subjects
    }

    async fn list_levels(&self, subject: &str) -> Vec<u32> {
        let mut levels: Vec<u32> = self
            .entries
            .keys()
            .filter(|(s, _)| s == subject)
            .map(|(_, l)| *l)
            .collect();
        levels.sort_unstable();
        levels
    }
}
