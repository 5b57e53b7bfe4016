use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::media::decoder::{DecoderFactory, OpenDecoder, ProbeError};
use crate::media::library::{CatalogEntry, Thumbnail, VideoIdentity};

/// Where in the video the preview frame is sampled.
pub const DEFAULT_PROBE_OFFSET: Duration = Duration::from_secs(60);

pub const DEFAULT_MAX_CONCURRENT_PROBES: usize = 4;

/// Format a millisecond duration as `minutes:seconds`, seconds zero-padded.
/// Minutes keep counting past an hour: 3_725_000 ms is "62:05".
pub fn format_duration(ms: u64) -> String {
    let total_seconds = ms / 1000;
    format!("{}:{:02}", total_seconds / 60, total_seconds % 60)
}

/// Turn raw container duration metadata into a label.
/// None for anything that is not a whole number of milliseconds.
pub fn duration_label(raw: &str) -> Option<String> {
    raw.trim().parse::<u64>().ok().map(format_duration)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractorOptions {
    pub probe_offset: Duration,
    /// Give up waiting for a single probe after this long. None waits forever.
    pub probe_timeout: Option<Duration>,
    pub max_concurrent_probes: usize,
}

impl Default for ExtractorOptions {
    fn default() -> Self {
        Self {
            probe_offset: DEFAULT_PROBE_OFFSET,
            probe_timeout: None,
            max_concurrent_probes: DEFAULT_MAX_CONCURRENT_PROBES,
        }
    }
}

/// Derives preview metadata for catalog entries.
///
/// Every extraction opens its own decoder and closes it before returning, so
/// concurrent extractions share nothing. Failures are logged and degrade to an
/// absent thumbnail or an empty duration for that one item.
#[derive(Clone)]
pub struct MetadataExtractor {
    factory: Arc<dyn DecoderFactory>,
    options: ExtractorOptions,
    permits: Arc<Semaphore>,
}

impl MetadataExtractor {
    pub fn new(factory: Arc<dyn DecoderFactory>, options: ExtractorOptions) -> Self {
        let permits = Arc::new(Semaphore::new(options.max_concurrent_probes.max(1)));
        Self {
            factory,
            options,
            permits,
        }
    }

    pub fn options(&self) -> &ExtractorOptions {
        &self.options
    }

    /// Frame at the probe offset, or None. Blocks the calling thread.
    pub fn extract_thumbnail(&self, identity: &VideoIdentity) -> Option<Thumbnail> {
        match self.try_thumbnail(identity) {
            Ok(thumbnail) => {
                if thumbnail.is_none() {
                    tracing::debug!("No frame available for {}", identity.key());
                }
                thumbnail
            }
            Err(e) => {
                tracing::warn!("Thumbnail probe failed for {}: {}", identity.key(), e);
                None
            }
        }
    }

    /// Duration label such as "2:05", or an empty string when unknown.
    /// Blocks the calling thread.
    pub fn extract_duration(&self, identity: &VideoIdentity) -> String {
        self.try_duration(identity).unwrap_or_else(|e| {
            tracing::warn!("Duration probe failed for {}: {}", identity.key(), e);
            String::new()
        })
    }

    /// Thumbnail and duration label together. Blocks the calling thread.
    ///
    /// Logs at most one warning per item: when both probes fail, the second
    /// cause usually repeats the first and goes to debug.
    pub fn extract_preview(&self, identity: &VideoIdentity) -> (Option<Thumbnail>, String) {
        let thumbnail = self.try_thumbnail(identity);
        let duration = self.try_duration(identity);
        match (&thumbnail, &duration) {
            (Err(first), Err(second)) => {
                tracing::warn!("Preview probe failed for {}: {}", identity.key(), first);
                tracing::debug!("Duration probe for {} also failed: {}", identity.key(), second);
            }
            (Err(e), Ok(_)) => {
                tracing::warn!("Thumbnail probe failed for {}: {}", identity.key(), e);
            }
            (Ok(_), Err(e)) => {
                tracing::warn!("Duration probe failed for {}: {}", identity.key(), e);
            }
            (Ok(_), Ok(_)) => {}
        }
        (thumbnail.ok().flatten(), duration.unwrap_or_default())
    }

    fn try_thumbnail(&self, identity: &VideoIdentity) -> Result<Option<Thumbnail>, ProbeError> {
        let mut decoder = OpenDecoder::open(self.factory.as_ref(), identity)?;
        let offset_us = u64::try_from(self.options.probe_offset.as_micros()).unwrap_or(u64::MAX);
        decoder.frame_at(offset_us)
    }

    /// Empty label when the container carries no duration.
    fn try_duration(&self, identity: &VideoIdentity) -> Result<String, ProbeError> {
        let mut decoder = OpenDecoder::open(self.factory.as_ref(), identity)?;
        match decoder.duration_metadata()? {
            Some(raw) => duration_label(&raw)
                .ok_or_else(|| ProbeError::Decode(format!("unparsable duration {:?}", raw))),
            None => Ok(String::new()),
        }
    }

    /// [`extract_thumbnail`](Self::extract_thumbnail) on the blocking pool.
    pub async fn thumbnail(&self, identity: VideoIdentity) -> Option<Thumbnail> {
        let this = self.clone();
        match tokio::task::spawn_blocking(move || this.extract_thumbnail(&identity)).await {
            Ok(thumbnail) => thumbnail,
            Err(e) => {
                tracing::warn!("Thumbnail task failed: {}", e);
                None
            }
        }
    }

    /// [`extract_duration`](Self::extract_duration) on the blocking pool.
    pub async fn duration(&self, identity: VideoIdentity) -> String {
        let this = self.clone();
        match tokio::task::spawn_blocking(move || this.extract_duration(&identity)).await {
            Ok(label) => label,
            Err(e) => {
                tracing::warn!("Duration task failed: {}", e);
                String::new()
            }
        }
    }

    /// Probe one entry in the background and fill it in.
    ///
    /// The task only holds a weak reference: if the UI drops the entry before
    /// the probe finishes, the result is thrown away. The handle resolves to
    /// whether anything was delivered. Must be called inside a tokio runtime.
    pub fn enrich(&self, entry: &Arc<CatalogEntry>) -> JoinHandle<bool> {
        let target = Arc::downgrade(entry);
        let identity = entry.identity().clone();
        let this = self.clone();

        tokio::spawn(async move {
            let Ok(permit) = this.permits.clone().acquire_owned().await else {
                return false;
            };
            if target.strong_count() == 0 {
                tracing::debug!("Entry discarded before probing: {}", identity.key());
                return false;
            }

            let probe = {
                let this = this.clone();
                let identity = identity.clone();
                tokio::task::spawn_blocking(move || {
                    // Held until the probe really finishes, even after a timeout
                    let _permit = permit;
                    this.extract_preview(&identity)
                })
            };

            let joined = match this.options.probe_timeout {
                Some(limit) => match tokio::time::timeout(limit, probe).await {
                    Ok(joined) => joined,
                    Err(_) => {
                        tracing::warn!(
                            "Probe for {} failed: {}",
                            identity.key(),
                            ProbeError::Timeout(limit)
                        );
                        return deliver(&target, &identity, None, String::new());
                    }
                },
                None => probe.await,
            };

            match joined {
                Ok((thumbnail, duration)) => deliver(&target, &identity, thumbnail, duration),
                Err(e) => {
                    tracing::warn!("Probe task for {} failed: {}", identity.key(), e);
                    deliver(&target, &identity, None, String::new())
                }
            }
        })
    }

    /// Enrich every entry concurrently and wait for all of them.
    /// Returns how many entries actually received results.
    pub async fn enrich_all(&self, entries: &[Arc<CatalogEntry>]) -> usize {
        let handles: Vec<_> = entries.iter().map(|entry| self.enrich(entry)).collect();
        let mut delivered = 0;
        for handle in handles {
            if matches!(handle.await, Ok(true)) {
                delivered += 1;
            }
        }
        tracing::debug!("Enriched {}/{} catalog entries", delivered, entries.len());
        delivered
    }
}

fn deliver(
    target: &Weak<CatalogEntry>,
    identity: &VideoIdentity,
    thumbnail: Option<Thumbnail>,
    duration: String,
) -> bool {
    match target.upgrade() {
        Some(entry) => entry.fill(thumbnail, duration),
        None => {
            tracing::debug!("Entry discarded before probe result arrived: {}", identity.key());
            false
        }
    }
}
