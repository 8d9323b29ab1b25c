// Audio module - conference mixing core
//
// - types: formats, frames and session configuration
// - utils: saturating sample arithmetic and PCM helpers
// - transcoding: transcoder traits and the linear PCM rate converter
// - silence: talk/silence classification and hysteresis
// - mixer: queues, cache, rate adaptation, slots and the mixing session

pub mod mixer;
pub mod silence;
pub mod transcoding;
pub mod types;
pub mod utils;

// Re-export commonly used types for easier imports
pub use types::{AudioFormat, AudioFrame, ClockSource, Encoding, MixerConfig};

pub use utils::{
    adjust_volume, saturating_add, saturating_add_into, saturating_subtract,
    saturating_subtract_into,
};

pub use transcoding::{
    LinearPcmFactory, PassThrough, PcmRateConverter, TranscodeError, Transcoder,
    TranscoderFactory,
};

pub use silence::{
    ClassifierStats, EnergyClassifier, FixedClassifier, SilenceClassifier, TalkDetector,
};

pub use mixer::{
    AudioQueue, CacheStatus, MixerConfigUtils, MixerError, MixingSession, ParticipantConfig,
    ParticipantSlot, ParticipantStats, RateDecision, RateStatistics, SessionEvent, SessionState,
    SessionStats, SlotHandle, TickReport, TranscoderCache,
};
