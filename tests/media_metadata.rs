use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use image::DynamicImage;
use tracing_subscriber::fmt::MakeWriter;
use url::Url;

use reprise::media::decoder::{Decoder, DecoderFactory, FfmpegDecoderFactory, ProbeError};
use reprise::media::library::{CatalogEntry, Thumbnail, VideoIdentity};
use reprise::media::metadata::{
    duration_label, format_duration, ExtractorOptions, MetadataExtractor,
};

// ── fake decoder ─────────────────────────────────────────────────────────────

/// Behaviour is picked by the identity's display name.
#[derive(Default)]
struct Counters {
    opens: AtomicUsize,
    closes: AtomicUsize,
    live: AtomicUsize,
    max_live: AtomicUsize,
    last_offset_us: AtomicU64,
}

struct FakeFactory {
    counters: Arc<Counters>,
}

struct FakeDecoder {
    name: String,
    counters: Arc<Counters>,
}

impl DecoderFactory for FakeFactory {
    fn open(&self, identity: &VideoIdentity) -> Result<Box<dyn Decoder>, ProbeError> {
        if identity.name() == "corrupt" {
            return Err(ProbeError::Decode("moov atom not found".into()));
        }
        self.counters.opens.fetch_add(1, Ordering::SeqCst);
        let live = self.counters.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.max_live.fetch_max(live, Ordering::SeqCst);
        Ok(Box::new(FakeDecoder {
            name: identity.name().to_string(),
            counters: Arc::clone(&self.counters),
        }))
    }
}

impl Decoder for FakeDecoder {
    fn frame_at(&mut self, offset_us: u64) -> Result<Option<Thumbnail>, ProbeError> {
        self.counters.last_offset_us.store(offset_us, Ordering::SeqCst);
        match self.name.as_str() {
            "broken-frame" => Err(ProbeError::Decode("bad slice header".into())),
            "audio-only" => Ok(None),
            "panic" => panic!("decoder blew up"),
            "slow" => {
                std::thread::sleep(Duration::from_millis(300));
                Ok(Some(DynamicImage::new_rgb8(4, 4)))
            }
            "busy" => {
                std::thread::sleep(Duration::from_millis(30));
                Ok(Some(DynamicImage::new_rgb8(4, 4)))
            }
            _ => Ok(Some(DynamicImage::new_rgb8(4, 4))),
        }
    }

    fn duration_metadata(&mut self) -> Result<Option<String>, ProbeError> {
        match self.name.as_str() {
            "no-duration" | "audio-only" => Ok(None),
            "garbage" => Ok(Some("12 minutes-ish".into())),
            "broken-frame" => Ok(Some("65000".into())),
            "slow" => {
                std::thread::sleep(Duration::from_millis(300));
                Ok(Some("1000".into()))
            }
            _ => Ok(Some("125000".into())),
        }
    }

    fn close(&mut self) {
        self.counters.closes.fetch_add(1, Ordering::SeqCst);
        self.counters.live.fetch_sub(1, Ordering::SeqCst);
    }
}

fn video(name: &str) -> VideoIdentity {
    VideoIdentity::new(Url::parse(&format!("file:///media/Movies/{name}.mp4")).unwrap(), name)
}

fn extractor_with(options: ExtractorOptions) -> (MetadataExtractor, Arc<Counters>) {
    let counters = Arc::new(Counters::default());
    let factory = Arc::new(FakeFactory {
        counters: Arc::clone(&counters),
    });
    (MetadataExtractor::new(factory, options), counters)
}

fn extractor() -> (MetadataExtractor, Arc<Counters>) {
    extractor_with(ExtractorOptions::default())
}

fn assert_balanced(counters: &Counters) {
    assert_eq!(
        counters.opens.load(Ordering::SeqCst),
        counters.closes.load(Ordering::SeqCst),
        "every opened decoder must be closed"
    );
}

async fn wait_until_balanced(counters: &Counters) {
    for _ in 0..200 {
        if counters.opens.load(Ordering::SeqCst) == counters.closes.load(Ordering::SeqCst) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_balanced(counters);
}

// ── format_duration / duration_label ─────────────────────────────────────────

#[test]
fn duration_zero() {
    assert_eq!(format_duration(0), "0:00");
}

#[test]
fn duration_pads_seconds() {
    assert_eq!(format_duration(65_000), "1:05");
    assert_eq!(format_duration(125_000), "2:05");
}

#[test]
fn duration_has_no_hour_rollover() {
    assert_eq!(format_duration(3_725_000), "62:05");
}

#[test]
fn duration_truncates_milliseconds() {
    assert_eq!(format_duration(59_999), "0:59");
}

#[test]
fn label_from_raw_metadata() {
    assert_eq!(duration_label("125000").as_deref(), Some("2:05"));
    assert_eq!(duration_label(" 0 ").as_deref(), Some("0:00"));
}

#[test]
fn label_rejects_garbage() {
    assert_eq!(duration_label(""), None);
    assert_eq!(duration_label("-5"), None);
    assert_eq!(duration_label("1.5e3"), None);
}

// ── synchronous extraction ───────────────────────────────────────────────────

#[test]
fn thumbnail_sampled_at_probe_offset() {
    let (extractor, counters) = extractor();
    assert!(extractor.extract_thumbnail(&video("ok")).is_some());
    assert_eq!(counters.last_offset_us.load(Ordering::SeqCst), 60_000_000);
    assert_balanced(&counters);
}

#[test]
fn custom_probe_offset_is_in_microseconds() {
    let (extractor, counters) = extractor_with(ExtractorOptions {
        probe_offset: Duration::from_millis(1500),
        ..Default::default()
    });
    extractor.extract_thumbnail(&video("ok"));
    assert_eq!(counters.last_offset_us.load(Ordering::SeqCst), 1_500_000);
}

#[test]
fn duration_formatted_from_metadata() {
    let (extractor, counters) = extractor();
    assert_eq!(extractor.extract_duration(&video("ok")), "2:05");
    assert_balanced(&counters);
}

#[test]
fn each_call_opens_its_own_decoder() {
    let (extractor, counters) = extractor();
    extractor.extract_thumbnail(&video("ok"));
    extractor.extract_duration(&video("ok"));
    assert_eq!(counters.opens.load(Ordering::SeqCst), 2);
    assert_balanced(&counters);
}

#[test]
fn open_failure_degrades_to_absent() {
    let (extractor, counters) = extractor();
    assert!(extractor.extract_thumbnail(&video("corrupt")).is_none());
    assert_eq!(extractor.extract_duration(&video("corrupt")), "");
    assert_eq!(counters.opens.load(Ordering::SeqCst), 0);
    assert_balanced(&counters);
}

#[test]
fn frame_error_still_closes_decoder() {
    let (extractor, counters) = extractor();
    assert!(extractor.extract_thumbnail(&video("broken-frame")).is_none());
    // Duration comes from another handle and is unaffected
    assert_eq!(extractor.extract_duration(&video("broken-frame")), "1:05");
    assert_balanced(&counters);
}

#[test]
fn missing_frame_is_absent() {
    let (extractor, counters) = extractor();
    assert!(extractor.extract_thumbnail(&video("audio-only")).is_none());
    assert_balanced(&counters);
}

#[test]
fn missing_duration_is_empty_not_zero() {
    let (extractor, _) = extractor();
    assert_eq!(extractor.extract_duration(&video("no-duration")), "");
}

#[test]
fn unparsable_duration_is_empty() {
    let (extractor, counters) = extractor();
    assert_eq!(extractor.extract_duration(&video("garbage")), "");
    assert_balanced(&counters);
}

// ── real decoder on bad input ────────────────────────────────────────────────

#[test]
fn ffmpeg_decoder_on_missing_file_degrades() {
    let extractor = MetadataExtractor::new(
        Arc::new(FfmpegDecoderFactory::default()),
        ExtractorOptions::default(),
    );
    let missing = VideoIdentity::new(Url::parse("file:///nonexistent/file.mp4").unwrap(), "file.mp4");
    assert!(extractor.extract_thumbnail(&missing).is_none());
    assert_eq!(extractor.extract_duration(&missing), "");
}

#[test]
fn ffmpeg_decoder_on_zero_length_file_degrades() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("empty.mp4");
    std::fs::write(&path, b"").unwrap();
    let identity = VideoIdentity::from_path(&path.canonicalize().unwrap(), "empty.mp4").unwrap();

    let extractor = MetadataExtractor::new(
        Arc::new(FfmpegDecoderFactory::default()),
        ExtractorOptions::default(),
    );
    assert!(extractor.extract_thumbnail(&identity).is_none());
    assert_eq!(extractor.extract_duration(&identity), "");
}

#[test]
fn ffmpeg_decoder_rejects_non_file_urls() {
    let factory = FfmpegDecoderFactory::default();
    let remote = VideoIdentity::new(Url::parse("https://example.com/a.mp4").unwrap(), "a.mp4");
    assert!(matches!(factory.open(&remote), Err(ProbeError::Unsupported(_))));
}

/// `ftyp` followed by a `moov` holding only a version-0 `mvhd`.
fn mp4_with_movie_header(timescale: u32, duration: u32) -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&24u32.to_be_bytes());
    bytes.extend_from_slice(b"ftypisom");
    bytes.extend_from_slice(&0x200u32.to_be_bytes());
    bytes.extend_from_slice(b"isommp41");

    bytes.extend_from_slice(&(8u32 + 108).to_be_bytes());
    bytes.extend_from_slice(b"moov");
    bytes.extend_from_slice(&108u32.to_be_bytes());
    bytes.extend_from_slice(b"mvhd");
    bytes.extend_from_slice(&[0; 4]); // version, flags
    bytes.extend_from_slice(&[0; 8]); // creation, modification
    bytes.extend_from_slice(&timescale.to_be_bytes());
    bytes.extend_from_slice(&duration.to_be_bytes());
    bytes.extend_from_slice(&0x0001_0000u32.to_be_bytes()); // rate
    bytes.extend_from_slice(&0x0100u16.to_be_bytes()); // volume
    bytes.extend_from_slice(&[0; 10]);
    bytes.extend_from_slice(&[0; 36]); // matrix
    bytes.extend_from_slice(&[0; 24]);
    bytes.extend_from_slice(&1u32.to_be_bytes()); // next track id
    bytes
}

#[test]
fn ffmpeg_decoder_on_zero_timescale_degrades() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("zero-timescale.mp4");
    std::fs::write(&path, mp4_with_movie_header(0, 90_000)).unwrap();
    let identity = VideoIdentity::from_path(&path.canonicalize().unwrap(), "zero-timescale.mp4").unwrap();

    let factory = FfmpegDecoderFactory::default();
    let mut decoder = factory.open(&identity).unwrap();
    assert!(matches!(decoder.duration_metadata(), Err(ProbeError::Decode(_))));
    decoder.close();

    let extractor = MetadataExtractor::new(Arc::new(factory), ExtractorOptions::default());
    assert_eq!(extractor.extract_duration(&identity), "");
    assert!(extractor.extract_thumbnail(&identity).is_none());
    assert_eq!(extractor.extract_preview(&identity), (None, String::new()));
}

#[test]
fn ffmpeg_decoder_reads_movie_header_duration() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("header-only.mp4");
    std::fs::write(&path, mp4_with_movie_header(1000, 125_000)).unwrap();
    let identity = VideoIdentity::from_path(&path.canonicalize().unwrap(), "header-only.mp4").unwrap();

    let extractor = MetadataExtractor::new(
        Arc::new(FfmpegDecoderFactory::default()),
        ExtractorOptions::default(),
    );
    assert_eq!(extractor.extract_duration(&identity), "2:05");
}

// ── preview warnings ─────────────────────────────────────────────────────────

#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogBuffer {
    type Writer = LogBuffer;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Runs `f` on this thread with a subscriber capturing every event.
fn warnings_during(f: impl FnOnce()) -> Vec<String> {
    let buffer = LogBuffer::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(buffer.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::DEBUG)
        .finish();
    tracing::subscriber::with_default(subscriber, f);

    let output = String::from_utf8(buffer.0.lock().unwrap().clone()).unwrap();
    output
        .lines()
        .filter(|line| line.contains(" WARN "))
        .map(str::to_string)
        .collect()
}

#[test]
fn open_failure_warns_once_per_item() {
    let (extractor, _) = extractor();
    let mut preview = (Some(DynamicImage::new_rgb8(1, 1)), "x".to_string());
    let warnings = warnings_during(|| preview = extractor.extract_preview(&video("corrupt")));

    assert_eq!(preview, (None, String::new()));
    assert_eq!(warnings.len(), 1, "{warnings:?}");
    assert!(warnings[0].contains("corrupt"));
}

#[test]
fn single_failing_field_warns_once() {
    let (extractor, counters) = extractor();
    let mut preview = (None, String::new());
    let warnings = warnings_during(|| preview = extractor.extract_preview(&video("garbage")));

    assert!(preview.0.is_some());
    assert_eq!(preview.1, "");
    assert_eq!(warnings.len(), 1, "{warnings:?}");
    assert_balanced(&counters);
}

#[test]
fn healthy_preview_logs_no_warning() {
    let (extractor, _) = extractor();
    let mut preview = (None, String::new());
    let warnings = warnings_during(|| preview = extractor.extract_preview(&video("ok")));

    assert!(preview.0.is_some());
    assert_eq!(preview.1, "2:05");
    assert!(warnings.is_empty(), "{warnings:?}");
}

// ── background enrichment ────────────────────────────────────────────────────

#[tokio::test]
async fn async_wrappers_match_sync_results() {
    let (extractor, counters) = extractor();
    assert!(extractor.thumbnail(video("ok")).await.is_some());
    assert_eq!(extractor.duration(video("ok")).await, "2:05");
    assert_balanced(&counters);
}

#[tokio::test]
async fn enrich_fills_entry() {
    let (extractor, counters) = extractor();
    let entry = Arc::new(CatalogEntry::new(video("ok")));
    assert!(extractor.enrich(&entry).await.unwrap());
    assert!(entry.is_enriched());
    assert!(entry.thumbnail().is_some());
    assert_eq!(entry.duration(), "2:05");
    assert_balanced(&counters);
}

#[tokio::test]
async fn one_bad_item_does_not_affect_others() {
    let (extractor, counters) = extractor();
    let entries: Vec<_> = ["ok", "corrupt", "panic", "garbage", "broken-frame"]
        .into_iter()
        .map(|name| Arc::new(CatalogEntry::new(video(name))))
        .collect();

    let delivered = extractor.enrich_all(&entries).await;
    assert_eq!(delivered, entries.len());

    assert_eq!(entries[0].duration(), "2:05");
    assert!(entries[0].thumbnail().is_some());
    assert!(entries[1].thumbnail().is_none());
    assert_eq!(entries[1].duration(), "");
    assert!(entries[2].thumbnail().is_none());
    assert_eq!(entries[2].duration(), "");
    assert_eq!(entries[3].duration(), "");
    assert!(entries[3].thumbnail().is_some());
    assert!(entries[4].thumbnail().is_none());
    assert_eq!(entries[4].duration(), "1:05");
    wait_until_balanced(&counters).await;
}

#[tokio::test]
async fn entry_dropped_before_probe_gets_nothing() {
    let (extractor, counters) = extractor();
    let entry = Arc::new(CatalogEntry::new(video("ok")));
    let handle = extractor.enrich(&entry);
    drop(entry);
    assert!(!handle.await.unwrap());
    assert_balanced(&counters);
}

#[tokio::test]
async fn late_result_for_discarded_entry_is_dropped() {
    let (extractor, counters) = extractor();
    let entry = Arc::new(CatalogEntry::new(video("slow")));
    let handle = extractor.enrich(&entry);
    // Let the probe start, then tear the entry down underneath it
    tokio::time::sleep(Duration::from_millis(50)).await;
    drop(entry);
    assert!(!handle.await.unwrap());
    wait_until_balanced(&counters).await;
}

#[tokio::test]
async fn timed_out_probe_degrades_and_still_closes() {
    let (extractor, counters) = extractor_with(ExtractorOptions {
        probe_timeout: Some(Duration::from_millis(50)),
        ..Default::default()
    });
    let entry = Arc::new(CatalogEntry::new(video("slow")));
    assert!(extractor.enrich(&entry).await.unwrap());
    assert!(entry.thumbnail().is_none());
    assert_eq!(entry.duration(), "");
    wait_until_balanced(&counters).await;
}

#[tokio::test]
async fn concurrent_probes_are_bounded() {
    let (extractor, counters) = extractor_with(ExtractorOptions {
        max_concurrent_probes: 2,
        ..Default::default()
    });
    let entries: Vec<_> = (0..6)
        .map(|_| Arc::new(CatalogEntry::new(video("busy"))))
        .collect();
    assert_eq!(extractor.enrich_all(&entries).await, 6);
    assert!(counters.max_live.load(Ordering::SeqCst) <= 2);
    assert_balanced(&counters);
}

#[test]
fn entry_is_filled_at_most_once() {
    let entry = CatalogEntry::new(video("ok"));
    assert!(entry.fill(None, "1:00".into()));
    assert!(!entry.fill(Some(DynamicImage::new_rgb8(1, 1)), "2:00".into()));
    assert_eq!(entry.duration(), "1:00");
    assert!(entry.thumbnail().is_none());
}
