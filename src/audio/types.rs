use std::fmt;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use super::utils::{bytes_to_pcm, pcm_to_bytes, tick_samples};

/// Lowest rate the mixing core will ever run at
pub const MIN_SAMPLE_RATE: u32 = 8000;
/// Highest native rate accepted from a participant
pub const MAX_SAMPLE_RATE: u32 = 192000;
pub const DEFAULT_INTERNAL_RATE: u32 = 8000;
pub const DEFAULT_MIXING_INTERVAL_MS: u32 = 20;
/// Hard ceiling on samples per tick; a session whose rate/interval exceeds it is stopped.
pub const MAX_TICK_SAMPLES: usize = 8096;
pub const DEFAULT_STATS_INTERVAL_TICKS: u32 = 100;
/// Queue lag, in ticks, beyond which inbound audio is flushed
pub const DEFAULT_BACKLOG_TICKS: usize = 4;
pub const DEFAULT_TALK_THRESHOLD_MS: u32 = 160;
pub const DEFAULT_SILENCE_THRESHOLD_MS: u32 = 2500;
pub const DEFAULT_SILENCE_THRESHOLD_DB: f32 = -45.0;

/// Wire encodings a participant may speak. Only `SignedLinear` is understood
/// natively; everything else goes through a [`crate::audio::transcoding::TranscoderFactory`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Encoding {
    SignedLinear,
    Ulaw,
    Alaw,
    G722,
    Gsm,
    Opus,
}

/// Encoding plus sample rate. Two formats are only interchangeable when both match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AudioFormat {
    pub encoding: Encoding,
    pub sample_rate: u32,
}

impl AudioFormat {
    pub fn new(encoding: Encoding, sample_rate: u32) -> Self {
        Self {
            encoding,
            sample_rate,
        }
    }

    /// Canonical linear PCM at `sample_rate`
    pub fn slin(sample_rate: u32) -> Self {
        Self::new(Encoding::SignedLinear, sample_rate)
    }

    pub fn is_signed_linear(&self) -> bool {
        self.encoding == Encoding::SignedLinear
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}@{}Hz", self.encoding, self.sample_rate)
    }
}

/// Opaque audio payload tagged with its format and sample count.
///
/// For `SignedLinear` the payload is little-endian mono i16.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    pub format: AudioFormat,
    pub samples: usize,
    pub data: Vec<u8>,
}

impl AudioFrame {
    pub fn new(format: AudioFormat, samples: usize, data: Vec<u8>) -> Self {
        Self {
            format,
            samples,
            data,
        }
    }

    /// Build a canonical linear PCM frame from samples
    pub fn from_pcm(sample_rate: u32, pcm: &[i16]) -> Self {
        Self {
            format: AudioFormat::slin(sample_rate),
            samples: pcm.len(),
            data: pcm_to_bytes(pcm),
        }
    }

    /// Decode the payload as linear PCM. `None` for any other encoding or a
    /// payload whose length disagrees with the sample count.
    pub fn to_pcm(&self) -> Option<Vec<i16>> {
        if !self.format.is_signed_linear() || self.data.len() != self.samples * 2 {
            return None;
        }
        Some(bytes_to_pcm(&self.data))
    }

    pub fn is_empty(&self) -> bool {
        self.samples == 0 || self.data.is_empty()
    }
}

/// Who drives the mixing tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClockSource {
    /// A dedicated mixing thread with its own periodic timer
    Internal,
    /// The owner calls `MixingSession::tick` from an external timing source
    External,
}

/// Session-level mixing configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MixerConfig {
    pub internal_rate: u32,
    pub mixing_interval_ms: u32,
    pub locked_rate: Option<u32>,
    pub max_internal_rate: Option<u32>,
    pub stats_interval_ticks: u32,
    pub backlog_ticks: usize,
    pub talk_threshold_ms: u32,
    pub silence_threshold_ms: u32,
    pub silence_threshold_db: f32,
    pub drop_silence: bool,
    pub clock: ClockSource,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            internal_rate: DEFAULT_INTERNAL_RATE,
            mixing_interval_ms: DEFAULT_MIXING_INTERVAL_MS,
            locked_rate: None,
            max_internal_rate: None,
            stats_interval_ticks: DEFAULT_STATS_INTERVAL_TICKS,
            backlog_ticks: DEFAULT_BACKLOG_TICKS,
            talk_threshold_ms: DEFAULT_TALK_THRESHOLD_MS,
            silence_threshold_ms: DEFAULT_SILENCE_THRESHOLD_MS,
            silence_threshold_db: DEFAULT_SILENCE_THRESHOLD_DB,
            drop_silence: false,
            clock: ClockSource::Internal,
        }
    }
}

impl MixerConfig {
    pub fn from_json_str(json: &str) -> anyhow::Result<Self> {
        serde_json::from_str(json).context("Failed to parse mixer configuration")
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read mixer configuration {}", path.display()))?;
        Self::from_json_str(&raw)
    }

    pub fn to_json_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write mixer configuration {}", path.display()))
    }

    /// Samples per tick at the configured initial rate
    pub fn tick_samples(&self) -> usize {
        tick_samples(self.internal_rate, self.mixing_interval_ms)
    }
}
