use std::sync::Arc;
use std::time::Instant;

use crate::media::library::{CatalogEntry, VideoIdentity};
use crate::media::source::{MediaQuery, MediaRow, MediaSource, SortOrder};

/// Storage bucket videos are listed from when nothing else is configured.
pub const DEFAULT_DIRECTORY_FILTER: &str = "Movies";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogOptions {
    /// Relative location prefix an item must live under to be listed.
    pub directory_filter: String,
}

impl Default for CatalogOptions {
    fn default() -> Self {
        Self {
            directory_filter: DEFAULT_DIRECTORY_FILTER.to_string(),
        }
    }
}

/// Enumerate the videos a source holds under the configured directory filter.
///
/// Newest first; equal timestamps are ordered by ascending identity key so the
/// list is identical across calls while the underlying data is unchanged.
/// A failing source yields an empty list (logged, never returned as an error).
pub fn list_videos<S>(source: &S, options: &CatalogOptions) -> Vec<VideoIdentity>
where
    S: MediaSource + ?Sized,
{
    let start = Instant::now();
    let query = MediaQuery {
        path_prefix: options.directory_filter.clone(),
        sort: SortOrder::DateAddedDesc,
    };

    let mut rows = match source.query(&query) {
        Ok(rows) => rows,
        Err(e) => {
            tracing::warn!("Catalog enumeration failed, showing no videos: {}", e);
            return Vec::new();
        }
    };

    sort_newest_first(&mut rows);
    // Overlapping roots can report the same file twice
    rows.dedup_by(|a, b| a.identity == b.identity);

    tracing::info!(
        "Catalog lists {} videos under {:?} in {:.1}s",
        rows.len(),
        options.directory_filter,
        start.elapsed().as_secs_f64()
    );

    rows.into_iter().map(|row| row.identity).collect()
}

/// Same as [`list_videos`], wrapped as shareable entries ready for enrichment.
pub fn entries<S>(source: &S, options: &CatalogOptions) -> Vec<Arc<CatalogEntry>>
where
    S: MediaSource + ?Sized,
{
    list_videos(source, options)
        .into_iter()
        .map(|identity| Arc::new(CatalogEntry::new(identity)))
        .collect()
}

/// Total order used for catalog rows: `date_added` descending, then key ascending.
pub fn sort_newest_first(rows: &mut [MediaRow]) {
    rows.sort_by(|a, b| {
        b.date_added
            .cmp(&a.date_added)
            .then_with(|| a.identity.key().cmp(b.identity.key()))
    });
}
