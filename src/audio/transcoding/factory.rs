use colored::*;
use tracing::{debug, info};

use super::{check_source, PcmRateConverter, TranscodeError, Transcoder, TranscoderFactory};
use crate::audio::types::{AudioFormat, AudioFrame};

/// Identity transcoder for formats that already match
#[derive(Debug)]
pub struct PassThrough {
    format: AudioFormat,
}

impl PassThrough {
    pub fn new(format: AudioFormat) -> Self {
        Self { format }
    }
}

impl Transcoder for PassThrough {
    fn source(&self) -> AudioFormat {
        self.format
    }

    fn destination(&self) -> AudioFormat {
        self.format
    }

    fn translate(&mut self, frame: &AudioFrame) -> Result<AudioFrame, TranscodeError> {
        check_source(self.format, frame)?;
        Ok(frame.clone())
    }
}

/// Factory covering linear PCM at any supported rate.
///
/// Compressed encodings are reported as `Unsupported`; deployments that carry
/// codecs plug in their own factory.
#[derive(Debug, Default, Clone, Copy)]
pub struct LinearPcmFactory;

impl LinearPcmFactory {
    pub fn new() -> Self {
        Self
    }
}

impl TranscoderFactory for LinearPcmFactory {
    fn build(
        &self,
        src: AudioFormat,
        dst: AudioFormat,
    ) -> Result<Box<dyn Transcoder>, TranscodeError> {
        if src == dst {
            debug!("Pass-through transcoder for {}", src);
            return Ok(Box::new(PassThrough::new(src)));
        }

        if !src.is_signed_linear() || !dst.is_signed_linear() {
            return Err(TranscodeError::Unsupported { src, dst });
        }

        info!(
            "🎯 {}: Building PCM rate converter {} → {}",
            "TRANSCODER".blue(),
            src,
            dst
        );
        Ok(Box::new(PcmRateConverter::new(src.sample_rate, dst.sample_rate)?))
    }
}
