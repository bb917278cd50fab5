//! MPEG-4 audio to canonical WAV conversion.
//!
//! Two mechanisms are tried in order:
//! 1. In-process decoding with symphonia, downmixed and resampled with rubato
//! 2. The external `ffmpeg` binary, fed through a scratch directory
//!
//! Both share one deadline: the fallback only gets whatever time the decoder
//! left, and the decoder stops at the next packet once the deadline passes.
//! The returned error names every mechanism that was tried and whether it was
//! missing, timed out, or rejected the audio.

use super::format::AudioFormat;
use crate::config::AudioConfig;
use crate::error::{AgentError, Result};
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use std::fmt;
use std::io::{Cursor, ErrorKind};
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Canonical output: mono, 16-bit signed PCM.
const TARGET_CHANNELS: u16 = 1;
const TARGET_BITS_PER_SAMPLE: u16 = 16;

/// Input frames fed to the resampler per call
const RESAMPLE_CHUNK: usize = 1024;

/// Why a single conversion mechanism did not produce audio
#[derive(Debug)]
enum AttemptFailure {
    /// The mechanism could not be started at all (e.g. binary not installed)
    Unavailable(String),
    /// The conversion budget ran out before or during this mechanism
    TimedOut(Duration),
    /// The mechanism ran and rejected the input
    Failed(String),
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable(detail) => write!(f, "unavailable ({})", detail),
            Self::TimedOut(limit) => write!(f, "timed out after {}s", limit.as_secs()),
            Self::Failed(detail) => write!(f, "failed: {}", detail),
        }
    }
}

/// Point in time by which one whole conversion must finish
#[derive(Debug, Clone, Copy)]
struct Deadline {
    at: Instant,
    budget: Duration,
}

impl Deadline {
    fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
            budget,
        }
    }

    fn check(&self) -> std::result::Result<(), AttemptFailure> {
        if Instant::now() >= self.at {
            Err(AttemptFailure::TimedOut(self.budget))
        } else {
            Ok(())
        }
    }

    fn tokio(&self) -> tokio::time::Instant {
        tokio::time::Instant::from_std(self.at)
    }
}

/// Converts MPEG-4 family audio into 16-bit mono WAV at a fixed sample rate
#[derive(Debug, Clone)]
pub struct AudioTranscoder {
    target_sample_rate: u32,
    timeout: Duration,
    ffmpeg_path: String,
}

impl AudioTranscoder {
    pub fn new(config: &AudioConfig) -> Self {
        Self {
            target_sample_rate: config.target_sample_rate,
            timeout: config.conversion_timeout(),
            ffmpeg_path: config.ffmpeg_path.clone(),
        }
    }

    pub fn target_sample_rate(&self) -> u32 {
        self.target_sample_rate
    }

    /// Convert `bytes` (sniffed as `source`) to canonical WAV.
    pub async fn transcode(&self, bytes: &[u8], source: AudioFormat) -> Result<Vec<u8>> {
        if !source.needs_transcoding() {
            return Err(AgentError::conversion(format!(
                "{} audio is not an MPEG-4 container and cannot be transcoded",
                source
            )));
        }

        info!(
            "Transcoding {} audio ({} bytes) to {}Hz mono WAV",
            source,
            bytes.len(),
            self.target_sample_rate
        );

        let deadline = Deadline::after(self.timeout);

        let decoder_failure = match self.decode_in_process(bytes, source, deadline).await {
            Ok(wav) => {
                debug!(output_bytes = wav.len(), "In-process decode succeeded");
                return Ok(wav);
            }
            Err(failure) => {
                warn!("In-process decoder {}, falling back to ffmpeg", failure);
                failure
            }
        };

        match self.convert_with_ffmpeg(bytes, source, deadline).await {
            Ok(wav) => {
                debug!(output_bytes = wav.len(), "ffmpeg conversion succeeded");
                Ok(wav)
            }
            Err(ffmpeg_failure) => {
                let hint = match ffmpeg_failure {
                    AttemptFailure::Unavailable(_) => {
                        "; install ffmpeg or set audio.ffmpeg_path"
                    }
                    _ => "",
                };
                Err(AgentError::conversion(format!(
                    "{} to WAV: symphonia decoder {}; ffmpeg ({}) {}{}",
                    source, decoder_failure, self.ffmpeg_path, ffmpeg_failure, hint
                )))
            }
        }
    }

    async fn decode_in_process(
        &self,
        bytes: &[u8],
        source: AudioFormat,
        deadline: Deadline,
    ) -> std::result::Result<Vec<u8>, AttemptFailure> {
        let owned = bytes.to_vec();
        let target_rate = self.target_sample_rate;

        // The task also watches the deadline, so it winds down on its own after a timeout
        let job = tokio::task::spawn_blocking(move || {
            let samples = decode_to_mono(&owned, source.extension(), target_rate, deadline)?;
            encode_wav(&samples, target_rate).map_err(AttemptFailure::Failed)
        });

        match tokio::time::timeout_at(deadline.tokio(), job).await {
            Err(_) => Err(AttemptFailure::TimedOut(deadline.budget)),
            Ok(Err(join_err)) => Err(AttemptFailure::Unavailable(format!(
                "decoder task aborted: {}",
                join_err
            ))),
            Ok(Ok(result)) => result,
        }
    }

    async fn convert_with_ffmpeg(
        &self,
        bytes: &[u8],
        source: AudioFormat,
        deadline: Deadline,
    ) -> std::result::Result<Vec<u8>, AttemptFailure> {
        // Nothing is spawned once the budget is spent
        deadline.check()?;

        // Removed when `scratch` drops, on every return path below
        let scratch = tempfile::Builder::new()
            .prefix("dialog-relay-")
            .tempdir()
            .map_err(|e| AttemptFailure::Unavailable(format!("cannot create temp dir: {}", e)))?;

        let input = scratch.path().join(format!("input.{}", source.extension()));
        let output = scratch.path().join("output.wav");

        tokio::fs::write(&input, bytes)
            .await
            .map_err(|e| AttemptFailure::Unavailable(format!("cannot write temp input: {}", e)))?;

        let mut cmd = self.ffmpeg_command(&input, &output);

        let result = match tokio::time::timeout_at(deadline.tokio(), cmd.output()).await {
            Err(_) => return Err(AttemptFailure::TimedOut(deadline.budget)),
            Ok(result) => result,
        };

        let out = result.map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                AttemptFailure::Unavailable(format!("binary not found: {}", e))
            } else {
                AttemptFailure::Unavailable(format!("failed to spawn: {}", e))
            }
        })?;

        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            return Err(AttemptFailure::Failed(format!(
                "exit status {}: {}",
                out.status,
                stderr.trim()
            )));
        }

        tokio::fs::read(&output)
            .await
            .map_err(|e| AttemptFailure::Failed(format!("no output produced: {}", e)))
    }

    fn ffmpeg_command(&self, input: &Path, output: &Path) -> Command {
        let rate = self.target_sample_rate.to_string();
        let channels = TARGET_CHANNELS.to_string();

        let mut cmd = Command::new(&self.ffmpeg_path);
        cmd.args(["-hide_banner", "-loglevel", "error", "-y", "-i"])
            .arg(input)
            .args([
                "-ar",
                rate.as_str(),
                "-ac",
                channels.as_str(),
                "-acodec",
                "pcm_s16le",
                "-f",
                "wav",
            ])
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

/// Decode any symphonia-supported container into mono i16 samples at `target_rate`.
fn decode_to_mono(
    bytes: &[u8],
    extension_hint: &str,
    target_rate: u32,
    deadline: Deadline,
) -> std::result::Result<Vec<i16>, AttemptFailure> {
    let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes.to_vec())), Default::default());

    let mut hint = Hint::new();
    hint.with_extension(extension_hint);

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| AttemptFailure::Failed(format!("cannot open container: {}", e)))?;

    let mut format = probed.format;
    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| AttemptFailure::Failed("no decodable audio track".to_string()))?;

    let track_id = track.id;
    let mut source_rate = track.codec_params.sample_rate.unwrap_or(target_rate);
    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| AttemptFailure::Failed(format!("unsupported codec: {}", e)))?;

    let mut mono: Vec<f32> = Vec::new();

    loop {
        deadline.check()?;

        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == ErrorKind::UnexpectedEof => break,
            Err(e) => {
                return Err(AttemptFailure::Failed(format!(
                    "failed reading stream: {}",
                    e
                )))
            }
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            // Corrupt packet, skip it
            Err(SymphoniaError::DecodeError(_)) => continue,
            Err(e) => {
                return Err(AttemptFailure::Failed(format!(
                    "failed decoding packet: {}",
                    e
                )))
            }
        };

        source_rate = decoded.spec().rate;
        let channels = decoded.spec().channels.count().max(1);

        let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, *decoded.spec());
        buffer.copy_interleaved_ref(decoded);

        if channels == 1 {
            mono.extend_from_slice(buffer.samples());
        } else {
            mono.extend(
                buffer
                    .samples()
                    .chunks(channels)
                    .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32),
            );
        }
    }

    if mono.is_empty() {
        return Err(AttemptFailure::Failed("decoded audio is empty".to_string()));
    }

    deadline.check()?;
    let resampled =
        resample(&mono, source_rate, target_rate).map_err(AttemptFailure::Failed)?;

    Ok(resampled
        .into_iter()
        .map(|s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
        .collect())
}

/// Band-limited sinc resampling of a mono signal.
///
/// Output is aligned to the input (resampler delay removed) and trimmed to
/// `len * dst / src` frames.
fn resample(input: &[f32], src_rate: u32, dst_rate: u32) -> std::result::Result<Vec<f32>, String> {
    if src_rate == dst_rate || input.is_empty() || src_rate == 0 {
        return Ok(input.to_vec());
    }

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let ratio = dst_rate as f64 / src_rate as f64;
    let mut resampler = SincFixedIn::<f32>::new(ratio, 1.0, params, RESAMPLE_CHUNK, 1)
        .map_err(|e| format!("resampler init: {}", e))?;

    let delay = resampler.output_delay();
    let expected_len = (input.len() as f64 * ratio).round() as usize;
    let mut output = Vec::with_capacity(expected_len + delay + RESAMPLE_CHUNK);

    // Trailing zero chunk flushes the samples held back by the filter delay
    let flush = [0.0f32; RESAMPLE_CHUNK];
    let chunks = input.chunks(RESAMPLE_CHUNK).chain(std::iter::once(&flush[..]));

    for chunk in chunks {
        let frames = if chunk.len() < RESAMPLE_CHUNK {
            let mut padded = chunk.to_vec();
            padded.resize(RESAMPLE_CHUNK, 0.0);
            padded
        } else {
            chunk.to_vec()
        };

        let processed = resampler
            .process(&[frames], None)
            .map_err(|e| format!("resample: {}", e))?;

        if let Some(channel) = processed.first() {
            output.extend_from_slice(channel);
        }

        if output.len() >= expected_len + delay {
            break;
        }
    }

    let mut aligned = output.split_off(delay.min(output.len()));
    aligned.truncate(expected_len);
    Ok(aligned)
}

/// Encode mono i16 samples as an in-memory WAV file.
fn encode_wav(samples: &[i16], sample_rate: u32) -> std::result::Result<Vec<u8>, String> {
    let spec = hound::WavSpec {
        channels: TARGET_CHANNELS,
        sample_rate,
        bits_per_sample: TARGET_BITS_PER_SAMPLE,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::with_capacity(44 + samples.len() * 2));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| format!("cannot start WAV writer: {}", e))?;
        for &sample in samples {
            writer
                .write_sample(sample)
                .map_err(|e| format!("cannot write WAV sample: {}", e))?;
        }
        writer
            .finalize()
            .map_err(|e| format!("cannot finalize WAV: {}", e))?;
    }

    Ok(cursor.into_inner())
}
