use std::collections::VecDeque;

use super::{ClassifierStats, SilenceClassifier};

const LEVEL_HISTORY: usize = 100;
const SILENCE_FLOOR_DB: f32 = -100.0;

/// RMS energy classifier: a frame is silence when its level in dBFS falls
/// below `threshold_db`.
#[derive(Debug)]
pub struct EnergyClassifier {
    threshold_db: f32,
    recent_levels: VecDeque<f32>,
    frames_classified: u64,
    silent_frames: u64,
}

impl EnergyClassifier {
    pub fn new(threshold_db: f32) -> Self {
        Self {
            threshold_db,
            recent_levels: VecDeque::with_capacity(LEVEL_HISTORY),
            frames_classified: 0,
            silent_frames: 0,
        }
    }

    /// Level of `pcm` in dBFS
    pub fn level_db(pcm: &[i16]) -> f32 {
        linear_to_db(rms_level(pcm))
    }
}

impl SilenceClassifier for EnergyClassifier {
    fn classify(&mut self, pcm: &[i16], _sample_rate: u32) -> bool {
        let db_level = Self::level_db(pcm);

        self.recent_levels.push_back(db_level);
        if self.recent_levels.len() > LEVEL_HISTORY {
            self.recent_levels.pop_front();
        }

        let silent = db_level < self.threshold_db;
        self.frames_classified += 1;
        if silent {
            self.silent_frames += 1;
        }
        silent
    }

    fn statistics(&self) -> Option<ClassifierStats> {
        let current_level_db = self
            .recent_levels
            .back()
            .copied()
            .unwrap_or(SILENCE_FLOOR_DB);
        let peak_level_db = self
            .recent_levels
            .iter()
            .fold(SILENCE_FLOOR_DB, |acc, &level| acc.max(level));
        let average_level_db = if !self.recent_levels.is_empty() {
            self.recent_levels.iter().sum::<f32>() / self.recent_levels.len() as f32
        } else {
            SILENCE_FLOOR_DB
        };
        let silence_percentage = if self.frames_classified > 0 {
            (self.silent_frames as f32 / self.frames_classified as f32) * 100.0
        } else {
            0.0
        };

        Some(ClassifierStats {
            threshold_db: self.threshold_db,
            current_level_db,
            peak_level_db,
            average_level_db,
            frames_classified: self.frames_classified,
            silence_percentage,
        })
    }
}

fn rms_level(pcm: &[i16]) -> f32 {
    if pcm.is_empty() {
        return 0.0;
    }
    let sum_squares: f64 = pcm
        .iter()
        .map(|&s| {
            let x = s as f64 / 32768.0;
            x * x
        })
        .sum();
    (sum_squares / pcm.len() as f64).sqrt() as f32
}

fn linear_to_db(linear: f32) -> f32 {
    if linear <= 0.0 {
        SILENCE_FLOOR_DB
    } else {
        20.0 * linear.log10()
    }
}
