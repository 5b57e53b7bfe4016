use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use url::Url;

/// Preview frame decoded from a video. Owned by the entry it was delivered to.
pub type Thumbnail = image::DynamicImage;

/// Stable reference to one video plus the name shown for it.
///
/// Equality and hashing look at the URL only: two identities for the same
/// underlying file are the same key in the position store even if their display
/// names differ.
#[derive(Debug, Clone)]
pub struct VideoIdentity {
    uri: Url,
    name: String,
}

impl VideoIdentity {
    pub fn new(uri: Url, name: impl Into<String>) -> Self {
        Self {
            uri,
            name: name.into(),
        }
    }

    /// Build an identity for a local file. The path should already be canonical
    /// (symlinks and `..` resolved) or the same file can end up with two keys.
    /// Returns None for relative paths.
    pub fn from_path(canonical_path: &Path, name: impl Into<String>) -> Option<Self> {
        let uri = Url::from_file_path(canonical_path).ok()?;
        Some(Self::new(uri, name))
    }

    pub fn uri(&self) -> &Url {
        &self.uri
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stable string form. This is the position store key.
    pub fn key(&self) -> &str {
        self.uri.as_str()
    }

    /// Local filesystem path, when the identity points at a `file://` URL.
    pub fn to_file_path(&self) -> Option<PathBuf> {
        if self.uri.scheme() != "file" {
            return None;
        }
        self.uri.to_file_path().ok()
    }
}

impl PartialEq for VideoIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.uri == other.uri
    }
}

impl Eq for VideoIdentity {}

impl Hash for VideoIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.uri.hash(state);
    }
}

impl fmt::Display for VideoIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.uri)
    }
}

/// One row of the catalog as handed to the UI.
///
/// The derived fields start empty and are filled at most once by a background
/// probe. `OnceLock` makes that single write race-free without a lock; readers
/// see either nothing or the final value.
#[derive(Debug)]
pub struct CatalogEntry {
    identity: VideoIdentity,
    thumbnail: OnceLock<Option<Thumbnail>>,
    duration: OnceLock<String>,
}

impl CatalogEntry {
    pub fn new(identity: VideoIdentity) -> Self {
        Self {
            identity,
            thumbnail: OnceLock::new(),
            duration: OnceLock::new(),
        }
    }

    pub fn identity(&self) -> &VideoIdentity {
        &self.identity
    }

    /// None while the probe is pending or when it found no frame.
    pub fn thumbnail(&self) -> Option<&Thumbnail> {
        self.thumbnail.get().and_then(Option::as_ref)
    }

    /// Duration label, empty while pending or when unknown.
    pub fn duration(&self) -> &str {
        self.duration.get().map(String::as_str).unwrap_or("")
    }

    /// True once a probe has delivered its result (even an empty one).
    pub fn is_enriched(&self) -> bool {
        self.thumbnail.get().is_some() && self.duration.get().is_some()
    }

    /// Store probe results. Returns false if the entry was already enriched,
    /// in which case the new values are dropped.
    pub fn fill(&self, thumbnail: Option<Thumbnail>, duration: String) -> bool {
        let thumb_set = self.thumbnail.set(thumbnail).is_ok();
        let duration_set = self.duration.set(duration).is_ok();
        thumb_set && duration_set
    }
}
