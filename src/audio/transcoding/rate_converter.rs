use rubato::{FftFixedIn, Resampler};
use tracing::debug;

use super::{check_source, TranscodeError, Transcoder};
use crate::audio::types::{AudioFormat, AudioFrame};

/// Linear PCM sample rate converter backed by rubato's `FftFixedIn`.
///
/// The resampler consumes fixed 10 ms input chunks, so samples that do not
/// fill a chunk are carried over to the next frame. Output length per frame
/// therefore varies by up to one chunk.
pub struct PcmRateConverter {
    resampler: FftFixedIn<f32>,
    src: AudioFormat,
    dst: AudioFormat,
    chunk_size: usize,
    pending: Vec<f32>,
    input_buffer: Vec<Vec<f32>>,
    output_buffer: Vec<Vec<f32>>,
}

impl std::fmt::Debug for PcmRateConverter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PcmRateConverter")
            .field("src", &self.src)
            .field("dst", &self.dst)
            .field("chunk_size", &self.chunk_size)
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl PcmRateConverter {
    pub fn new(input_rate: u32, output_rate: u32) -> Result<Self, TranscodeError> {
        let src = AudioFormat::slin(input_rate);
        let dst = AudioFormat::slin(output_rate);
        if input_rate == 0 || output_rate == 0 {
            return Err(TranscodeError::Construction {
                src,
                dst,
                reason: "sample rate must be non-zero".to_string(),
            });
        }

        let chunk_size = (input_rate as usize / 100).max(1);
        let resampler = FftFixedIn::<f32>::new(
            input_rate as usize,
            output_rate as usize,
            chunk_size,
            1, // sub_chunks
            1, // mono
        )
        .map_err(|e| TranscodeError::Construction {
            src,
            dst,
            reason: e.to_string(),
        })?;

        let max_output_frames = resampler.output_frames_max();
        debug!(
            "PcmRateConverter {}→{}: {} input frames → max {} output frames",
            input_rate, output_rate, chunk_size, max_output_frames
        );

        Ok(Self {
            resampler,
            src,
            dst,
            chunk_size,
            pending: Vec::with_capacity(chunk_size * 2),
            input_buffer: vec![Vec::with_capacity(chunk_size)],
            output_buffer: vec![vec![0.0; max_output_frames]],
        })
    }
}

impl Transcoder for PcmRateConverter {
    fn source(&self) -> AudioFormat {
        self.src
    }

    fn destination(&self) -> AudioFormat {
        self.dst
    }

    fn translate(&mut self, frame: &AudioFrame) -> Result<AudioFrame, TranscodeError> {
        check_source(self.src, frame)?;
        let pcm = frame.to_pcm().ok_or_else(|| {
            TranscodeError::MalformedFrame(format!(
                "{} bytes for {} samples",
                frame.data.len(),
                frame.samples
            ))
        })?;

        self.pending
            .extend(pcm.iter().map(|&s| s as f32 / 32768.0));

        let mut out = Vec::with_capacity(
            (pcm.len() as u64 * self.dst.sample_rate as u64 / self.src.sample_rate as u64) as usize
                + self.output_buffer[0].len(),
        );
        while self.pending.len() >= self.chunk_size {
            self.input_buffer[0].clear();
            self.input_buffer[0].extend(self.pending.drain(..self.chunk_size));

            let (_, produced) = self
                .resampler
                .process_into_buffer(&self.input_buffer, &mut self.output_buffer, None)
                .map_err(|e| TranscodeError::Resample(e.to_string()))?;

            out.extend(
                self.output_buffer[0][..produced]
                    .iter()
                    .map(|&x| (x * 32768.0).round().clamp(-32767.0, 32767.0) as i16),
            );
        }

        Ok(AudioFrame::from_pcm(self.dst.sample_rate, &out))
    }
}
