// Talk/silence classification for participants
//
// The classifier itself is a collaborator: anything implementing
// `SilenceClassifier` can be plugged into a participant. The crate ships a
// simple RMS energy classifier and the hysteresis state machine that turns
// per-frame verdicts into a stable talking flag.

mod energy;
mod talk_detector;

pub use energy::EnergyClassifier;
pub use talk_detector::TalkDetector;

/// Level history reported by classifiers that measure energy
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ClassifierStats {
    pub threshold_db: f32,
    pub current_level_db: f32,
    pub peak_level_db: f32,
    pub average_level_db: f32,
    pub frames_classified: u64,
    pub silence_percentage: f32,
}

/// Per-frame voice activity verdict
pub trait SilenceClassifier: Send {
    /// `true` when `pcm` (canonical linear PCM at `sample_rate`) is silence
    fn classify(&mut self, pcm: &[i16], sample_rate: u32) -> bool;

    fn statistics(&self) -> Option<ClassifierStats> {
        None
    }
}

/// Classifier that always reports the same verdict. Useful for participants
/// that must never (or always) count as talking, such as announcement legs.
#[derive(Debug, Clone, Copy)]
pub struct FixedClassifier {
    pub silent: bool,
}

impl FixedClassifier {
    pub fn always_silent() -> Self {
        Self { silent: true }
    }

    pub fn always_voiced() -> Self {
        Self { silent: false }
    }
}

impl SilenceClassifier for FixedClassifier {
    fn classify(&mut self, _pcm: &[i16], _sample_rate: u32) -> bool {
        self.silent
    }
}
