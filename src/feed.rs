//! Discovery of candidate audio files.
//!
//! The feed is an external collaborator from the scheduler's point of view:
//! each poll returns zero or more paths not reported before. The directory
//! implementation watches for files that have stopped growing before it
//! reports them, since recorders write large files incrementally.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Audio file extensions accepted by default
pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "m4a", "wav", "aac", "flac", "ogg", "wma"];

/// A restartable source of candidate file paths
#[async_trait]
pub trait DiscoveryFeed: Send + Sync {
    /// Paths discovered since the previous poll
    async fn poll(&mut self) -> Result<Vec<PathBuf>>;
}

/// Recursively scans configured directories for audio files.
///
/// A file is reported once, and only after its size has held steady across
/// two consecutive polls.
pub struct DirectoryFeed {
    roots: Vec<PathBuf>,
    extensions: Vec<String>,
    seen: HashSet<PathBuf>,
    pending_sizes: HashMap<PathBuf, u64>,
}

impl DirectoryFeed {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        for root in &roots {
            if !root.exists() {
                warn!("Watch directory does not exist: {}", root.display());
            }
        }

        Self {
            roots,
            extensions: AUDIO_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            seen: HashSet::new(),
            pending_sizes: HashMap::new(),
        }
    }

    pub fn with_extensions(mut self, extensions: Vec<String>) -> Self {
        self.extensions = extensions
            .into_iter()
            .map(|e| e.to_ascii_lowercase())
            .collect();
        self
    }
}

#[async_trait]
impl DiscoveryFeed for DirectoryFeed {
    async fn poll(&mut self) -> Result<Vec<PathBuf>> {
        let mut candidates = Vec::new();
        for root in &self.roots {
            if root.exists() {
                collect_audio_files_with(root, &self.extensions, &mut candidates);
            }
        }

        let mut ready = Vec::new();
        for path in candidates {
            if self.seen.contains(&path) {
                continue;
            }

            let size = match fs::metadata(&path) {
                Ok(metadata) => metadata.len(),
                Err(e) => {
                    debug!("Skipping {}: {}", path.display(), e);
                    continue;
                }
            };

            match self.pending_sizes.get(&path) {
                Some(&previous) if previous == size && size > 0 => {
                    self.pending_sizes.remove(&path);
                    self.seen.insert(path.clone());
                    debug!("New audio file detected: {}", path.display());
                    ready.push(path);
                }
                _ => {
                    // still being written, check again next poll
                    self.pending_sizes.insert(path, size);
                }
            }
        }

        Ok(ready)
    }
}

/// Collect audio files under a directory using the default extension list
pub fn collect_audio_files(root: &Path) -> Vec<PathBuf> {
    let extensions: Vec<String> = AUDIO_EXTENSIONS.iter().map(|e| e.to_string()).collect();
    let mut files = Vec::new();
    collect_audio_files_with(root, &extensions, &mut files);
    files
}

fn collect_audio_files_with(dir: &Path, extensions: &[String], out: &mut Vec<PathBuf>) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Cannot read directory {}: {}", dir.display(), e);
            return;
        }
    };

    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        if path.is_dir() {
            collect_audio_files_with(&path, extensions, out);
        } else if has_extension(&path, extensions) {
            out.push(path);
        }
    }
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .map_or(false, |e| extensions.iter().any(|allowed| *allowed == e))
}
