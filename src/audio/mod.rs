pub mod encoding;
pub mod format;
pub mod transcode;

pub use encoding::{prepare, AudioEncoding, AudioEncodingSpec, PreparedAudio, DEFAULT_SAMPLE_RATE_HZ};
pub use format::AudioFormat;
pub use transcode::AudioTranscoder;
