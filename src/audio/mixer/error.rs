use super::slot_arena::SlotHandle;
use crate::audio::transcoding::TranscodeError;

#[derive(Debug, thiserror::Error)]
pub enum MixerError {
    #[error("Transcoding failed: {0}")]
    Transcode(#[from] TranscodeError),

    #[error(
        "Tick of {samples} samples ({rate} Hz x {interval_ms} ms) exceeds the {max} sample ceiling"
    )]
    TickCeilingExceeded {
        rate: u32,
        interval_ms: u32,
        samples: usize,
        max: usize,
    },

    #[error("Failed to allocate {samples} sample buffers for participant {participant}")]
    Allocation { participant: String, samples: usize },

    #[error("Unknown or stale slot handle {0}")]
    UnknownSlot(SlotHandle),

    #[error("Participant {0} already joined")]
    ParticipantExists(String),

    #[error("Session is {0}")]
    SessionClosed(String),

    #[error("Operation requires an {0} clock")]
    WrongClock(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(#[from] anyhow::Error),

    #[error("Failed to start mixing thread: {0}")]
    ThreadSpawn(#[from] std::io::Error),
}

impl MixerError {
    /// Errors that end the session rather than a single frame or join
    pub fn is_fatal(&self) -> bool {
        matches!(self, MixerError::TickCeilingExceeded { .. })
    }
}

pub type Result<T> = std::result::Result<T, MixerError>;
