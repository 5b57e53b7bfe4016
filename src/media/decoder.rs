use std::fs::File;
use std::io::BufReader;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use image::ImageFormat;

use crate::media::library::{Thumbnail, VideoIdentity};
use crate::media::mime::{classify, Container};

/// Width thumbnails are scaled to; height follows the aspect ratio.
pub const THUMBNAIL_WIDTH: u32 = 320;

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("cannot open {0}: {1}")]
    Open(String, #[source] std::io::Error),
    #[error("I/O error while probing: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot decode media: {0}")]
    Decode(String),
    #[error("unsupported media reference: {0}")]
    Unsupported(String),
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
}

/// Opens decoders for videos. Every call must return an independent handle.
pub trait DecoderFactory: Send + Sync {
    fn open(&self, identity: &VideoIdentity) -> Result<Box<dyn Decoder>, ProbeError>;
}

/// An opened media resource.
///
/// Callers must call `close` exactly once when done; [`OpenDecoder`] does that
/// on drop.
pub trait Decoder: Send {
    /// Frame nearest to `offset_us` microseconds. `Ok(None)` means the media has
    /// no frame to give (audio only, empty stream).
    fn frame_at(&mut self, offset_us: u64) -> Result<Option<Thumbnail>, ProbeError>;

    /// Container duration metadata in milliseconds, as the container reports it.
    /// `Ok(None)` when the container carries none.
    fn duration_metadata(&mut self) -> Result<Option<String>, ProbeError>;

    fn close(&mut self);
}

/// Owns an opened decoder and closes it when dropped, on every exit path.
pub struct OpenDecoder {
    inner: Box<dyn Decoder>,
}

impl OpenDecoder {
    pub fn open<F>(factory: &F, identity: &VideoIdentity) -> Result<Self, ProbeError>
    where
        F: DecoderFactory + ?Sized,
    {
        factory.open(identity).map(|inner| Self { inner })
    }

    pub fn frame_at(&mut self, offset_us: u64) -> Result<Option<Thumbnail>, ProbeError> {
        self.inner.frame_at(offset_us)
    }

    pub fn duration_metadata(&mut self) -> Result<Option<String>, ProbeError> {
        self.inner.duration_metadata()
    }
}

impl Drop for OpenDecoder {
    fn drop(&mut self) {
        self.inner.close();
    }
}

/// Default decoder: container headers for duration, an `ffmpeg` process for frames.
#[derive(Debug, Clone)]
pub struct FfmpegDecoderFactory {
    ffmpeg: PathBuf,
}

impl FfmpegDecoderFactory {
    pub fn new(ffmpeg: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
        }
    }
}

impl Default for FfmpegDecoderFactory {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl DecoderFactory for FfmpegDecoderFactory {
    fn open(&self, identity: &VideoIdentity) -> Result<Box<dyn Decoder>, ProbeError> {
        let path = identity
            .to_file_path()
            .ok_or_else(|| ProbeError::Unsupported(identity.key().to_string()))?;
        let file = File::open(&path).map_err(|e| ProbeError::Open(path.display().to_string(), e))?;
        if file.metadata()?.len() == 0 {
            return Err(ProbeError::Decode(format!("{} is empty", path.display())));
        }
        let container = classify(&path).map(|(c, _)| c).unwrap_or(Container::Other);

        Ok(Box::new(FfmpegDecoder {
            ffmpeg: self.ffmpeg.clone(),
            path,
            container,
            file: Some(file),
            duration_ms: None,
        }))
    }
}

struct FfmpegDecoder {
    ffmpeg: PathBuf,
    path: PathBuf,
    container: Container,
    file: Option<File>,
    /// Header read result, cached after the first read.
    duration_ms: Option<Option<u64>>,
}

impl FfmpegDecoder {
    fn file(&self) -> Result<&File, ProbeError> {
        self.file
            .as_ref()
            .ok_or_else(|| ProbeError::Decode("decoder already closed".into()))
    }

    fn header_duration_ms(&mut self) -> Result<Option<u64>, ProbeError> {
        if let Some(cached) = self.duration_ms {
            return Ok(cached);
        }
        let file = self.file()?.try_clone()?;
        let iso_media = self.container.is_iso_media();
        let path = self.path.as_path();
        // Header parsers may panic on corrupt input
        let parsed = std::panic::catch_unwind(AssertUnwindSafe(|| {
            if iso_media {
                mp4_duration_ms(file)
            } else {
                Ok(symphonia_duration_ms(file, path))
            }
        }));
        let duration = match parsed {
            Ok(result) => result?,
            Err(_) => {
                return Err(ProbeError::Decode(format!(
                    "container header of {} is corrupt",
                    self.path.display()
                )))
            }
        };
        if duration.is_none() {
            tracing::debug!("No container duration for {}", self.path.display());
        }
        self.duration_ms = Some(duration);
        Ok(duration)
    }

    fn grab_frame(&self, offset_us: u64) -> Result<Vec<u8>, ProbeError> {
        let seek = format!("{}.{:06}", offset_us / 1_000_000, offset_us % 1_000_000);
        let scale = format!("scale={}:-2", THUMBNAIL_WIDTH);
        let output = Command::new(&self.ffmpeg)
            .arg("-v")
            .arg("error")
            .arg("-ss")
            .arg(&seek)
            .arg("-i")
            .arg(&self.path)
            .args(["-frames:v", "1", "-vf", scale.as_str(), "-f", "image2pipe", "-c:v", "png", "-"])
            .output()?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProbeError::Decode(format!(
                "ffmpeg exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        Ok(output.stdout)
    }
}

impl Decoder for FfmpegDecoder {
    fn frame_at(&mut self, offset_us: u64) -> Result<Option<Thumbnail>, ProbeError> {
        let mut offset_us = offset_us;
        // Probing past the end gives nothing; take the first frame instead
        if let Some(duration_ms) = self.header_duration_ms()? {
            if offset_us / 1000 >= duration_ms {
                offset_us = 0;
            }
        }

        let mut png = self.grab_frame(offset_us)?;
        if png.is_empty() && offset_us > 0 {
            png = self.grab_frame(0)?;
        }
        if png.is_empty() {
            return Ok(None);
        }

        image::load_from_memory_with_format(&png, ImageFormat::Png)
            .map(Some)
            .map_err(|e| ProbeError::Decode(e.to_string()))
    }

    fn duration_metadata(&mut self) -> Result<Option<String>, ProbeError> {
        Ok(self.header_duration_ms()?.map(|ms| ms.to_string()))
    }

    fn close(&mut self) {
        self.file = None;
    }
}

/// Movie header duration. A header that cannot be read at all is treated as
/// missing metadata; one with impossible values is an error.
fn mp4_duration_ms(file: File) -> Result<Option<u64>, ProbeError> {
    let size = file.metadata()?.len();
    let mp4 = match mp4::Mp4Reader::read_header(BufReader::new(file), size) {
        Ok(mp4) => mp4,
        Err(e) => {
            tracing::debug!("Unreadable mp4 header: {}", e);
            return Ok(None);
        }
    };
    let mvhd = &mp4.moov.mvhd;
    let ms = mvhd
        .duration
        .checked_mul(1000)
        .and_then(|scaled| scaled.checked_div(u64::from(mvhd.timescale)))
        .ok_or_else(|| {
            ProbeError::Decode(format!(
                "invalid movie header: duration {} at timescale {}",
                mvhd.duration, mvhd.timescale
            ))
        })?;
    Ok((ms > 0).then_some(ms))
}

/// Duration of the first decodable track, for containers the mp4 parser does not read.
fn symphonia_duration_ms(file: File, path: &Path) -> Option<u64> {
    use symphonia::core::codecs::CODEC_TYPE_NULL;
    use symphonia::core::io::MediaSourceStream;
    use symphonia::core::probe::Hint;

    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &Default::default(), &Default::default())
        .ok()?;

    let track = probed
        .format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)?;

    let tb = track.codec_params.time_base?;
    let n_frames = track.codec_params.n_frames?;
    let t = tb.calc_time(n_frames);
    Some(t.seconds * 1000 + (t.frac * 1000.0).round() as u64)
}
