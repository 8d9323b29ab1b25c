// Session-facing mixer types and configuration presets

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::timing::TimingMetrics;
use crate::audio::types::{ClockSource, MixerConfig};

/// Lifecycle of a mixing session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No participants, timer disarmed
    Idle,
    /// At least one participant, ticking
    Running,
    /// Stop requested, finishing the in-flight tick
    Draining,
    /// Terminal
    Stopped,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Running => "running",
            SessionState::Draining => "draining",
            SessionState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Snapshot returned by `MixingSession::session_stats`
#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub session_id: Uuid,
    pub state: SessionState,
    pub participant_count: usize,
    pub internal_rate: u32,
    pub interval_ms: u32,
    pub tick_samples: usize,
    pub locked_rate: Option<u32>,
    pub tick_count: u64,
    pub rate_changes: u64,
    pub cache_generation: u64,
    pub cache_entries: usize,
    pub started_at: DateTime<Utc>,
    pub timing: TimingMetrics,
    pub failure: Option<String>,
}

/// Ready-made configurations
pub struct MixerConfigUtils;

impl MixerConfigUtils {
    /// Narrowband telephony: 8 kHz, 20 ms ticks
    pub fn default_config() -> MixerConfig {
        MixerConfig::default()
    }

    /// Wideband conferences starting at 16 kHz, capped at 48 kHz
    pub fn wideband_config() -> MixerConfig {
        MixerConfig {
            internal_rate: 16000,
            max_internal_rate: Some(48000),
            ..MixerConfig::default()
        }
    }

    /// 10 ms ticks with a tighter backlog for latency-sensitive bridges
    pub fn low_latency_config() -> MixerConfig {
        MixerConfig {
            mixing_interval_ms: 10,
            backlog_ticks: 3,
            talk_threshold_ms: 80,
            ..MixerConfig::default()
        }
    }

    /// Externally clocked variant of `config`
    pub fn externally_clocked(config: MixerConfig) -> MixerConfig {
        MixerConfig {
            clock: ClockSource::External,
            ..config
        }
    }
}
