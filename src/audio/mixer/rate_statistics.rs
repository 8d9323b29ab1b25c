// Internal sample rate adaptation
//
// Once per collection interval the session records every participant's
// native rate and asks for a decision. Rules, first match wins:
//   1. a locked rate overrides everything
//   2. a configured maximum is adopted when anyone runs above it
//   3. the highest rate above current shared by two or more participants
//   4. nobody at or above current: drop to the highest native rate
//   5. otherwise keep

use std::collections::BTreeMap;

/// Result of one collection interval
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Keep,
    Change(u32),
}

#[derive(Debug, Clone)]
pub struct RateStatistics {
    current_rate: u32,
    locked_rate: Option<u32>,
    max_rate: Option<u32>,
    above_current: BTreeMap<u32, usize>,
    num_at_current: usize,
    num_above_current: usize,
    num_above_max: usize,
    highest_rate: u32,
    participants: usize,
}

impl RateStatistics {
    pub fn new(current_rate: u32) -> Self {
        Self {
            current_rate,
            locked_rate: None,
            max_rate: None,
            above_current: BTreeMap::new(),
            num_at_current: 0,
            num_above_current: 0,
            num_above_max: 0,
            highest_rate: 0,
            participants: 0,
        }
    }

    /// Start a fresh collection interval
    pub fn begin(&mut self, current_rate: u32, locked_rate: Option<u32>, max_rate: Option<u32>) {
        self.current_rate = current_rate;
        self.locked_rate = locked_rate;
        self.max_rate = max_rate;
        self.above_current.clear();
        self.num_at_current = 0;
        self.num_above_current = 0;
        self.num_above_max = 0;
        self.highest_rate = 0;
        self.participants = 0;
    }

    /// Account for one participant's native rate
    pub fn record(&mut self, native_rate: u32) {
        self.participants += 1;
        if let Some(max) = self.max_rate {
            if native_rate > max {
                self.num_above_max += 1;
            }
        }

        let rate = match self.max_rate {
            Some(max) => native_rate.min(max),
            None => native_rate,
        };
        self.highest_rate = self.highest_rate.max(rate);

        if rate > self.current_rate {
            self.num_above_current += 1;
            *self.above_current.entry(rate).or_insert(0) += 1;
        } else if rate == self.current_rate {
            self.num_at_current += 1;
        }
    }

    pub fn participants(&self) -> usize {
        self.participants
    }

    pub fn highest_rate(&self) -> u32 {
        self.highest_rate
    }

    /// Decide on the internal rate for the next interval
    pub fn decide(&self) -> RateDecision {
        if let Some(locked) = self.locked_rate {
            return if locked != self.current_rate {
                RateDecision::Change(locked)
            } else {
                RateDecision::Keep
            };
        }

        if let Some(max) = self.max_rate {
            if self.num_above_max > 0 && self.current_rate != max {
                return RateDecision::Change(max);
            }
        }

        if let Some(rate) = self.best_shared_rate() {
            return RateDecision::Change(rate);
        }

        if self.participants > 0 && self.num_at_current == 0 && self.num_above_current == 0 {
            return RateDecision::Change(self.highest_rate);
        }

        RateDecision::Keep
    }

    /// Highest rate above current with at least two supporters. Picking the
    /// highest keeps the next interval from finding another shared rate above
    /// the new one.
    fn best_shared_rate(&self) -> Option<u32> {
        self.above_current
            .iter()
            .rev()
            .find(|(_, &count)| count >= 2)
            .map(|(&rate, _)| rate)
    }
}
