// Per-participant inbound buffer
//
// Frames arrive in whatever format the participant speaks, are transcoded to
// canonical linear PCM at the session's internal rate and queued as chunks.
// The mixing tick pulls fixed-size reads from the front.

use std::collections::VecDeque;
use std::sync::Arc;

use colored::*;
use tracing::{info, warn};

use crate::audio::transcoding::{TranscodeError, Transcoder, TranscoderFactory};
use crate::audio::types::{AudioFormat, AudioFrame, DEFAULT_BACKLOG_TICKS};

/// Queue counters for observability
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct QueueStats {
    pub total_fed: u64,
    pub total_read: u64,
    pub backlog_flushes: u64,
    pub transcoder_builds: u64,
    pub transcode_failures: u64,
}

pub struct AudioQueue {
    chunks: VecDeque<Vec<i16>>,
    leftover: Vec<i16>,
    queued_samples: usize,
    transcoder: Option<Box<dyn Transcoder>>,
    factory: Arc<dyn TranscoderFactory>,
    output_rate: u32,
    tick_samples: usize,
    backlog_ticks: usize,
    stats: QueueStats,
}

impl std::fmt::Debug for AudioQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioQueue")
            .field("chunks", &self.chunks.len())
            .field("leftover", &self.leftover.len())
            .field("queued_samples", &self.queued_samples)
            .field("output_rate", &self.output_rate)
            .field("tick_samples", &self.tick_samples)
            .finish()
    }
}

impl AudioQueue {
    pub fn new(factory: Arc<dyn TranscoderFactory>, output_rate: u32, tick_samples: usize) -> Self {
        Self {
            chunks: VecDeque::new(),
            leftover: Vec::new(),
            queued_samples: 0,
            transcoder: None,
            factory,
            output_rate,
            tick_samples,
            backlog_ticks: DEFAULT_BACKLOG_TICKS,
            stats: QueueStats::default(),
        }
    }

    pub fn with_backlog_ticks(mut self, backlog_ticks: usize) -> Self {
        self.backlog_ticks = backlog_ticks.max(1);
        self
    }

    /// Canonical format every queued sample is in
    pub fn output_format(&self) -> AudioFormat {
        AudioFormat::slin(self.output_rate)
    }

    /// Transcode and enqueue one frame. Returns the number of chunks queued.
    ///
    /// A frame whose format cannot be transcoded is dropped and the error is
    /// returned; the queue itself stays usable.
    pub fn feed(&mut self, frame: &AudioFrame) -> Result<usize, TranscodeError> {
        if frame.is_empty() {
            return Ok(self.chunk_count());
        }
        let pcm = self.transcode(frame)?;
        Ok(self.push_pcm(pcm))
    }

    /// Convert a frame to canonical PCM without queueing it
    pub fn transcode(&mut self, frame: &AudioFrame) -> Result<Vec<i16>, TranscodeError> {
        let target = self.output_format();
        if frame.format == target {
            return frame.to_pcm().ok_or_else(|| {
                TranscodeError::MalformedFrame(format!(
                    "{} bytes for {} samples",
                    frame.data.len(),
                    frame.samples
                ))
            });
        }

        let stale = match &self.transcoder {
            Some(t) => t.source() != frame.format || t.destination() != target,
            None => true,
        };
        if stale {
            self.transcoder = None;
            match self.factory.build(frame.format, target) {
                Ok(t) => {
                    self.stats.transcoder_builds += 1;
                    info!(
                        "🔁 {}: Inbound transcoder {} → {}",
                        "AUDIO_QUEUE".green(),
                        frame.format,
                        target
                    );
                    self.transcoder = Some(t);
                }
                Err(e) => {
                    self.stats.transcode_failures += 1;
                    return Err(e);
                }
            }
        }

        let translated = match self.transcoder.as_mut() {
            Some(t) => t.translate(frame),
            None => Err(TranscodeError::Unsupported {
                src: frame.format,
                dst: target,
            }),
        };
        let translated = translated.inspect_err(|_| self.stats.transcode_failures += 1)?;

        translated.to_pcm().ok_or_else(|| {
            self.stats.transcode_failures += 1;
            TranscodeError::MalformedFrame(format!(
                "transcoder produced {} instead of {}",
                translated.format, target
            ))
        })
    }

    /// Append canonical samples, flushing first when the queue lags by more
    /// than the backlog limit. Returns the number of chunks queued.
    pub fn push_pcm(&mut self, pcm: Vec<i16>) -> usize {
        if self.tick_samples > 0 && self.queued_samples > self.backlog_ticks * self.tick_samples {
            self.stats.backlog_flushes += 1;
            if self.stats.backlog_flushes == 1 || self.stats.backlog_flushes % 100 == 0 {
                warn!(
                    "{}: Backlog of {} samples exceeds {} ticks, flushing (flush #{})",
                    "AUDIO_QUEUE".yellow(),
                    self.queued_samples,
                    self.backlog_ticks,
                    self.stats.backlog_flushes
                );
            }
            self.flush();
        }

        if !pcm.is_empty() {
            self.stats.total_fed += pcm.len() as u64;
            self.queued_samples += pcm.len();
            self.chunks.push_back(pcm);
        }
        self.chunk_count()
    }

    /// Fill `out` from the front of the queue. Returns how many samples were
    /// written; fewer than `out.len()` only when the queue ran dry.
    pub fn read_into(&mut self, out: &mut [i16]) -> usize {
        let n = out.len();
        let mut filled = 0;

        if !self.leftover.is_empty() {
            let take = n.min(self.leftover.len());
            out[..take].copy_from_slice(&self.leftover[..take]);
            self.leftover.drain(..take);
            filled = take;
        }

        while filled < n {
            let Some(chunk) = self.chunks.pop_front() else {
                break;
            };
            let need = n - filled;
            if chunk.len() <= need {
                out[filled..filled + chunk.len()].copy_from_slice(&chunk);
                filled += chunk.len();
            } else {
                out[filled..n].copy_from_slice(&chunk[..need]);
                self.leftover.extend_from_slice(&chunk[need..]);
                filled = n;
            }
        }

        self.queued_samples -= filled;
        self.stats.total_read += filled as u64;
        filled
    }

    /// Read up to `n` samples
    pub fn read(&mut self, n: usize) -> Vec<i16> {
        let mut out = vec![0; n];
        let filled = self.read_into(&mut out);
        out.truncate(filled);
        out
    }

    pub fn available(&self) -> usize {
        self.queued_samples
    }

    /// Chunks held, counting a partially read chunk as one
    pub fn chunk_count(&self) -> usize {
        self.chunks.len() + usize::from(!self.leftover.is_empty())
    }

    pub fn flush(&mut self) {
        self.chunks.clear();
        self.leftover.clear();
        self.queued_samples = 0;
    }

    /// Switch to a new internal rate. Queued audio was produced for the old
    /// rate and is discarded along with the bound transcoder.
    pub fn reconfigure(&mut self, output_rate: u32, tick_samples: usize) {
        if output_rate != self.output_rate {
            self.flush();
            self.transcoder = None;
            self.output_rate = output_rate;
        }
        self.tick_samples = tick_samples;
    }

    pub fn stats(&self) -> &QueueStats {
        &self.stats
    }
}
