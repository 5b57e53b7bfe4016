use std::path::{Component, Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use walkdir::WalkDir;

use crate::media::library::VideoIdentity;
use crate::media::mime::classify;

/// Sort keys a media source can order its rows by.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum SortOrder {
    /// Most recently added first.
    #[default]
    DateAddedDesc,
}

/// A query against the host media index: a storage-location prefix plus a sort key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaQuery {
    /// Matched case-insensitively against the start of the directory an item
    /// sits in, relative to its root (`"Movies"` matches `Movies/a.mp4` and
    /// `Movies2/b.mkv`, but not `Movies.mkv` at the root). Empty matches everything.
    pub path_prefix: String,
    pub sort: SortOrder,
}

/// One row returned by a media source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRow {
    pub identity: VideoIdentity,
    /// Seconds since the Unix epoch.
    pub date_added: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("media source unavailable: {0}")]
    Unavailable(String),
    #[error("media source I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The platform's media index, seen from the catalog.
pub trait MediaSource: Send + Sync {
    fn query(&self, query: &MediaQuery) -> Result<Vec<MediaRow>, SourceError>;
}

/// Media source backed by plain directories on disk.
///
/// Each root plays the role of a storage volume; the query prefix is applied to
/// paths relative to the root. Symlinks are followed.
#[derive(Debug, Clone, Default)]
pub struct FsMediaSource {
    roots: Vec<PathBuf>,
}

impl FsMediaSource {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self { roots }
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }
}

impl MediaSource for FsMediaSource {
    fn query(&self, query: &MediaQuery) -> Result<Vec<MediaRow>, SourceError> {
        if self.roots.is_empty() {
            return Err(SourceError::Unavailable("no media roots configured".into()));
        }

        let mut rows = Vec::new();
        let mut reachable = 0usize;

        for root in &self.roots {
            // Missing roots are skipped, not fatal, as long as one is readable
            if !root.is_dir() {
                tracing::warn!("Media root is not a readable directory, skipping: {}", root.display());
                continue;
            }
            reachable += 1;

            for entry in WalkDir::new(root).follow_links(true) {
                match entry {
                    Err(e) => {
                        tracing::warn!("Cannot access entry: {}", e);
                    }
                    Ok(entry) if entry.file_type().is_file() => {
                        if let Some(row) = row_for(root, entry.path(), &query.path_prefix) {
                            rows.push(row);
                        }
                    }
                    Ok(_) => {}
                }
            }
        }

        if reachable == 0 {
            return Err(SourceError::Unavailable(format!(
                "none of {} media roots could be read",
                self.roots.len()
            )));
        }

        match query.sort {
            SortOrder::DateAddedDesc => rows.sort_by(|a, b| b.date_added.cmp(&a.date_added)),
        }

        Ok(rows)
    }
}

fn row_for(root: &Path, path: &Path, prefix: &str) -> Option<MediaRow> {
    classify(path)?;

    let relative = path.strip_prefix(root).ok()?;
    // Only the directory counts; a file directly under a root has location ""
    let location = relative.parent().unwrap_or(Path::new(""));
    if !matches_prefix(location, prefix) {
        return None;
    }

    let canonical = match std::fs::canonicalize(path) {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!("Cannot canonicalize {}: {}", path.display(), e);
            return None;
        }
    };

    let meta = match std::fs::metadata(&canonical) {
        Ok(m) => m,
        Err(e) => {
            tracing::warn!("Cannot stat {}: {}", canonical.display(), e);
            return None;
        }
    };

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let identity = VideoIdentity::from_path(&canonical, name)?;
    let added = meta.created().or_else(|_| meta.modified()).ok();

    tracing::debug!("found {}", identity);
    Some(MediaRow {
        identity,
        date_added: added.map(unix_seconds).unwrap_or(0),
    })
}

/// Prefix test on the `/`-joined relative location, ASCII case-insensitive.
pub fn matches_prefix(relative: &Path, prefix: &str) -> bool {
    if prefix.is_empty() {
        return true;
    }
    let location = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/");

    location.len() >= prefix.len()
        && location.is_char_boundary(prefix.len())
        && location[..prefix.len()].eq_ignore_ascii_case(prefix)
}

fn unix_seconds(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
