use serde::Serialize;
use std::fmt;

/// Minimum buffer length needed to check any signature.
const MIN_SNIFF_LEN: usize = 12;

/// Audio container detected from magic bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Mp4,
    M4a,
    Wav,
    Flac,
    Ogg,
    Unknown,
}

impl AudioFormat {
    /// Classify raw bytes by container signature.
    ///
    /// Never fails: anything unrecognized (or shorter than 12 bytes) is `Unknown`.
    /// Extensions and declared content types are ignored on purpose, since uploads
    /// and base64 payloads routinely omit or misstate them.
    pub fn classify(bytes: &[u8]) -> Self {
        if bytes.len() < MIN_SNIFF_LEN {
            return Self::Unknown;
        }

        if &bytes[4..8] == b"ftyp" {
            let brand_end = bytes.len().min(20);
            let brands = bytes[8..brand_end].to_ascii_lowercase();
            return if brands.windows(3).any(|w| w == b"m4a") {
                Self::M4a
            } else {
                Self::Mp4
            };
        }

        if &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE" {
            return Self::Wav;
        }

        match &bytes[0..4] {
            b"fLaC" => Self::Flac,
            b"OggS" => Self::Ogg,
            _ => Self::Unknown,
        }
    }

    /// MPEG-4 family containers the backend cannot ingest directly.
    pub fn needs_transcoding(self) -> bool {
        matches!(self, Self::Mp4 | Self::M4a)
    }

    /// Extension hint for decoders that probe by file name.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::M4a => "m4a",
            Self::Wav => "wav",
            Self::Flac => "flac",
            Self::Ogg => "ogg",
            Self::Unknown => "bin",
        }
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Mp4 => "MP4",
            Self::M4a => "M4A",
            Self::Wav => "WAV",
            Self::Flac => "FLAC",
            Self::Ogg => "OGG",
            Self::Unknown => "UNKNOWN",
        };
        f.write_str(name)
    }
}
