// Conference mixer - tick-synchronous mixing core
//
// Components, leaves first:
// - audio_queue: per-participant inbound buffer in canonical PCM
// - transcoder_cache: shared outbound transcoding per wire format
// - rate_statistics: internal sample rate adaptation
// - participant_slot: one participant's buffers, talk state and lock
// - engine: the per-tick mixing algorithm
// - mixing_session: participant set, lifecycle and the mixing thread

pub mod audio_queue;
pub mod engine;
pub mod error;
pub mod events;
pub mod mixing_session;
pub mod participant_slot;
pub mod rate_statistics;
pub mod slot_arena;
pub mod timing;
pub mod transcoder_cache;
pub mod types;
pub mod validation;

pub use audio_queue::{AudioQueue, QueueStats};
pub use engine::{check_tick_ceiling, MixingEngine, TickReport};
pub use error::{MixerError, Result};
pub use events::SessionEvent;
pub use mixing_session::MixingSession;
pub use participant_slot::{ParticipantConfig, ParticipantSlot, ParticipantStats};
pub use rate_statistics::{RateDecision, RateStatistics};
pub use slot_arena::{SlotArena, SlotHandle};
pub use timing::{TickTimer, TimingMetrics};
pub use transcoder_cache::{CacheStats, CacheStatus, TranscoderCache};
pub use types::{MixerConfigUtils, SessionState, SessionStats};
