// Tick timing metrics
//
// The mixing thread records how long each tick took to compute and how far
// apart consecutive ticks started, so overload shows up in session stats
// before it shows up as audible gaps.

use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::warn;

/// Ticks whose processing took longer than this share of the interval are "late"
const LATE_TICK_FRACTION: f64 = 1.0;
const EMA_ALPHA: f64 = 0.1;

#[derive(Debug, Clone)]
pub struct TickTimer {
    interval: Duration,
    last_tick_start: Option<Instant>,
    metrics: TimingMetrics,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TimingMetrics {
    pub total_ticks: u64,
    pub late_ticks: u64,
    pub max_processing_us: f64,
    pub average_processing_us: f64,
    pub average_tick_interval_us: f64,
}

impl TickTimer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_tick_start: None,
            metrics: TimingMetrics::default(),
        }
    }

    /// Mark the start of a tick
    pub fn begin(&mut self) -> Instant {
        let now = Instant::now();
        if let Some(prev) = self.last_tick_start {
            let gap_us = now.duration_since(prev).as_secs_f64() * 1e6;
            self.metrics.average_tick_interval_us =
                ema(self.metrics.average_tick_interval_us, gap_us);
        }
        self.last_tick_start = Some(now);
        now
    }

    /// Mark the end of a tick started at `started`
    pub fn end(&mut self, started: Instant) {
        let processing = started.elapsed();
        let processing_us = processing.as_secs_f64() * 1e6;
        let budget_us = self.interval.as_secs_f64() * 1e6 * LATE_TICK_FRACTION;

        self.metrics.total_ticks += 1;
        self.metrics.average_processing_us = ema(self.metrics.average_processing_us, processing_us);
        if processing_us > self.metrics.max_processing_us {
            self.metrics.max_processing_us = processing_us;
        }
        if processing_us > budget_us {
            self.metrics.late_ticks += 1;
            if self.metrics.late_ticks == 1 || self.metrics.late_ticks % 100 == 0 {
                warn!(
                    "⏱️ Tick took {:.1}μs, over the {:.1}μs interval ({} late ticks)",
                    processing_us, budget_us, self.metrics.late_ticks
                );
            }
        }
    }

    pub fn metrics(&self) -> &TimingMetrics {
        &self.metrics
    }
}

impl TimingMetrics {
    /// Percentage of ticks that overran their interval
    pub fn late_percentage(&self) -> f64 {
        if self.total_ticks > 0 {
            (self.late_ticks as f64 / self.total_ticks as f64) * 100.0
        } else {
            0.0
        }
    }

    pub fn is_performance_acceptable(&self) -> bool {
        self.late_percentage() < 5.0
    }

    pub fn summary(&self) -> String {
        format!(
            "Ticks: {}, Late: {:.1}%, Max: {:.1}μs, Avg: {:.1}μs",
            self.total_ticks,
            self.late_percentage(),
            self.max_processing_us,
            self.average_processing_us
        )
    }
}

fn ema(current: f64, sample: f64) -> f64 {
    if current == 0.0 {
        sample
    } else {
        (1.0 - EMA_ALPHA) * current + EMA_ALPHA * sample
    }
}
