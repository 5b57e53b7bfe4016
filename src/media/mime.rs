use std::path::Path;

/// Container family of a video file, as far as the extension tells us.
/// Picks the header parser used to read duration metadata.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Container {
    /// ISO base media: MP4, M4V, MOV, 3GP. Read with the mp4 parser.
    IsoMedia,
    Matroska,
    Avi,
    MpegTs,
    Mpeg,
    Other,
}

impl Container {
    pub fn is_iso_media(self) -> bool {
        matches!(self, Container::IsoMedia)
    }
}

/// Classify a path by extension into a (Container, MIME type) pair.
///
/// Returns `None` for anything that is not a video (silent skip, no logging at
/// this layer). Extensions are matched case-insensitively.
pub fn classify(path: &Path) -> Option<(Container, &'static str)> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();

    let result = match ext.as_str() {
        "mp4" => (Container::IsoMedia, "video/mp4"),
        "m4v" => (Container::IsoMedia, "video/x-m4v"),
        "mov" => (Container::IsoMedia, "video/quicktime"),
        "3gp" => (Container::IsoMedia, "video/3gpp"),
        "mkv" => (Container::Matroska, "video/x-matroska"),
        "webm" => (Container::Matroska, "video/webm"),
        "avi" => (Container::Avi, "video/x-msvideo"),
        "ts" | "m2ts" | "mts" => (Container::MpegTs, "video/MP2T"),
        "mpg" | "mpeg" => (Container::Mpeg, "video/mpeg"),
        "wmv" => (Container::Other, "video/x-ms-wmv"),
        "flv" => (Container::Other, "video/x-flv"),
        "ogv" => (Container::Other, "video/ogg"),
        _ => return None,
    };

    Some(result)
}

pub fn is_video(path: &Path) -> bool {
    classify(path).is_some()
}
