pub mod audio;
pub mod log;

// Re-export the session API for embedding applications
pub use audio::{
    AudioFormat, AudioFrame, ClockSource, Encoding, MixerConfig, MixerConfigUtils, MixerError,
    MixingSession, ParticipantConfig, SessionEvent, SessionState, SlotHandle,
};
