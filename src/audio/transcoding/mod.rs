// Transcoding capability consumed by the mixing core
//
// The core never encodes or decodes a wire codec itself. It asks a
// `TranscoderFactory` for a `Transcoder` between two formats and treats a
// failed build as a recoverable, per-participant condition.

pub mod factory;
pub mod rate_converter;

use super::types::{AudioFormat, AudioFrame};

pub use factory::{LinearPcmFactory, PassThrough};
pub use rate_converter::PcmRateConverter;

#[derive(Debug, thiserror::Error)]
pub enum TranscodeError {
    #[error("No transcoding path from {src} to {dst}")]
    Unsupported { src: AudioFormat, dst: AudioFormat },

    #[error("Failed to build transcoder {src} -> {dst}: {reason}")]
    Construction {
        src: AudioFormat,
        dst: AudioFormat,
        reason: String,
    },

    #[error("Frame format {actual} does not match transcoder source {expected}")]
    FormatMismatch {
        expected: AudioFormat,
        actual: AudioFormat,
    },

    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("Resampling failed: {0}")]
    Resample(String),
}

/// A stateful one-way conversion between two formats
pub trait Transcoder: Send {
    fn source(&self) -> AudioFormat;
    fn destination(&self) -> AudioFormat;
    fn translate(&mut self, frame: &AudioFrame) -> Result<AudioFrame, TranscodeError>;
}

/// Builds transcoders on demand. Shared between the mixing thread and every
/// participant's inbound queue.
pub trait TranscoderFactory: Send + Sync {
    fn build(
        &self,
        src: AudioFormat,
        dst: AudioFormat,
    ) -> Result<Box<dyn Transcoder>, TranscodeError>;
}

/// Reject frames that were not produced in the transcoder's source format
pub(crate) fn check_source(
    expected: AudioFormat,
    frame: &AudioFrame,
) -> Result<(), TranscodeError> {
    if frame.format != expected {
        return Err(TranscodeError::FormatMismatch {
            expected,
            actual: frame.format,
        });
    }
    Ok(())
}
