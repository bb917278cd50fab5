use super::format::AudioFormat;
use super::transcode::AudioTranscoder;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Sample rate assumed when none can be read from the audio itself.
pub const DEFAULT_SAMPLE_RATE_HZ: u32 = 16000;

/// Offset of the little-endian sample rate field in a canonical RIFF/WAVE header
const WAV_SAMPLE_RATE_OFFSET: usize = 24;

/// Backend audio encodings, serialized with the backend's enum names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudioEncoding {
    #[serde(rename = "AUDIO_ENCODING_LINEAR_16")]
    Linear16,
    #[serde(rename = "AUDIO_ENCODING_FLAC")]
    Flac,
    #[serde(rename = "AUDIO_ENCODING_OGG_OPUS")]
    OggOpus,
}

/// Encoding and sample rate describing one audio buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioEncodingSpec {
    pub encoding: AudioEncoding,
    pub sample_rate_hz: u32,
}

impl AudioEncodingSpec {
    /// Derive the backend encoding for audio already in a directly ingestible format.
    ///
    /// MP4/M4A must be transcoded (and re-sniffed) before reaching here; if they do
    /// arrive they get the same best-effort LINEAR16 default as `Unknown`.
    pub fn resolve(bytes: &[u8], format: AudioFormat) -> Self {
        match format {
            AudioFormat::Wav => Self {
                encoding: AudioEncoding::Linear16,
                sample_rate_hz: wav_sample_rate(bytes).unwrap_or(DEFAULT_SAMPLE_RATE_HZ),
            },
            AudioFormat::Flac => Self {
                encoding: AudioEncoding::Flac,
                sample_rate_hz: DEFAULT_SAMPLE_RATE_HZ,
            },
            AudioFormat::Ogg => Self {
                encoding: AudioEncoding::OggOpus,
                sample_rate_hz: DEFAULT_SAMPLE_RATE_HZ,
            },
            AudioFormat::Mp4 | AudioFormat::M4a | AudioFormat::Unknown => Self {
                encoding: AudioEncoding::Linear16,
                sample_rate_hz: DEFAULT_SAMPLE_RATE_HZ,
            },
        }
    }
}

/// Sample rate from the RIFF header, if the buffer is long enough to hold it.
fn wav_sample_rate(bytes: &[u8]) -> Option<u32> {
    let field = bytes.get(WAV_SAMPLE_RATE_OFFSET..WAV_SAMPLE_RATE_OFFSET + 4)?;
    Some(u32::from_le_bytes([field[0], field[1], field[2], field[3]]))
}

/// Audio bytes paired with the spec that describes them
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedAudio {
    pub bytes: Vec<u8>,
    pub spec: AudioEncodingSpec,
    /// Container detected on the inbound bytes, before any transcoding
    pub source_format: AudioFormat,
}

/// Sniff, transcode MPEG-4 containers, re-sniff, then resolve the backend encoding.
pub async fn prepare(bytes: &[u8], transcoder: &AudioTranscoder) -> Result<PreparedAudio> {
    let source_format = AudioFormat::classify(bytes);
    debug!(format = %source_format, bytes = bytes.len(), "Classified inbound audio");

    let (bytes, format) = if source_format.needs_transcoding() {
        let wav = transcoder.transcode(bytes, source_format).await?;
        let format = AudioFormat::classify(&wav);
        (wav, format)
    } else {
        (bytes.to_vec(), source_format)
    };

    let spec = AudioEncodingSpec::resolve(&bytes, format);
    debug!(
        encoding = ?spec.encoding,
        sample_rate_hz = spec.sample_rate_hz,
        "Resolved audio encoding"
    );

    Ok(PreparedAudio {
        bytes,
        spec,
        source_format,
    })
}
