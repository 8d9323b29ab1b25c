/// Hysteresis over per-frame silence verdicts.
///
/// A participant becomes talking after `talk_threshold_ms` of contiguous
/// voiced audio and goes back to silent only after `silence_threshold_ms` of
/// contiguous silence.
#[derive(Debug, Clone)]
pub struct TalkDetector {
    talking: bool,
    voiced_ms: u32,
    silent_ms: u32,
    talk_threshold_ms: u32,
    silence_threshold_ms: u32,
}

impl TalkDetector {
    pub fn new(talk_threshold_ms: u32, silence_threshold_ms: u32) -> Self {
        Self {
            talking: false,
            voiced_ms: 0,
            silent_ms: 0,
            talk_threshold_ms,
            silence_threshold_ms,
        }
    }

    pub fn is_talking(&self) -> bool {
        self.talking
    }

    /// Feed one verdict covering `frame_ms`. Returns the new state when it flips.
    pub fn update(&mut self, is_silence: bool, frame_ms: u32) -> Option<bool> {
        if self.talking {
            if is_silence {
                self.silent_ms = self.silent_ms.saturating_add(frame_ms);
                if self.silent_ms >= self.silence_threshold_ms {
                    self.talking = false;
                    self.silent_ms = 0;
                    self.voiced_ms = 0;
                    return Some(false);
                }
            } else {
                self.silent_ms = 0;
            }
        } else if is_silence {
            self.voiced_ms = 0;
        } else {
            self.voiced_ms = self.voiced_ms.saturating_add(frame_ms);
            if self.voiced_ms >= self.talk_threshold_ms {
                self.talking = true;
                self.voiced_ms = 0;
                self.silent_ms = 0;
                return Some(true);
            }
        }
        None
    }
}
