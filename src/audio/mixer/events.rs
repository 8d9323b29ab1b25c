use serde::Serialize;

use super::slot_arena::SlotHandle;

/// Notifications from a session to the application layer
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    ParticipantJoined {
        participant: String,
        handle: SlotHandle,
    },
    ParticipantLeft {
        participant: String,
        handle: SlotHandle,
    },
    TalkingChanged {
        participant: String,
        talking: bool,
    },
    RateChanged {
        from: u32,
        to: u32,
    },
    /// The session hit a fatal error and stopped mixing
    Failed {
        reason: String,
    },
    Stopped,
}
