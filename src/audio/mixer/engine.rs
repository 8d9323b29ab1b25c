// The mixing tick
//
// One call to `MixingEngine::tick` is one mixing cycle:
//   1. apply a rate change decided on the previous stats pass
//   2. pull one tick from every slot (zero-filled on underrun)
//   3. saturating-sum every contribution into the shared mix
//   4. give each slot the mix, minus its own audio when it is talking
//   5. convert to the slot's wire format, publish, wake the consumer
//   6. every N ticks, collect rate statistics and decide the next rate
// Steps 2-3 finish for all slots before any slot sees step 4.

use std::sync::Arc;
use std::time::Duration;

use colored::*;
use crossbeam::channel::Sender;
use serde::Serialize;
use tracing::{error, info, warn};

use super::error::{MixerError, Result};
use super::events::SessionEvent;
use super::participant_slot::{ParticipantSlot, SlotState};
use super::rate_statistics::{RateDecision, RateStatistics};
use super::timing::{TickTimer, TimingMetrics};
use super::transcoder_cache::{CacheStats, CacheStatus, TranscoderCache};
use crate::audio::transcoding::TranscoderFactory;
use crate::audio::types::{AudioFrame, MixerConfig, MAX_TICK_SAMPLES};
use crate::audio::utils::{
    adjust_volume, saturating_add_into, saturating_subtract_into, tick_samples,
};
use crate::mix_debug;

/// What happened during one tick
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub tick: u64,
    pub internal_rate: u32,
    pub tick_samples: usize,
    pub participants: usize,
    /// Slots that pulled any audio this tick
    pub contributors: usize,
    /// Slots that heard the mix minus their own audio
    pub self_cancelled: usize,
    /// Rate decided by this tick's stats pass, applied on the next tick
    pub rate_decision: Option<u32>,
}

/// Reject rate/interval pairs whose tick would overflow the mix buffers
pub fn check_tick_ceiling(rate: u32, interval_ms: u32) -> Result<usize> {
    let samples = tick_samples(rate, interval_ms);
    if samples > MAX_TICK_SAMPLES {
        return Err(MixerError::TickCeilingExceeded {
            rate,
            interval_ms,
            samples,
            max: MAX_TICK_SAMPLES,
        });
    }
    Ok(samples)
}

pub struct MixingEngine {
    internal_rate: u32,
    interval_ms: u32,
    tick_samples: usize,
    stats_interval: u32,
    stat_countdown: u32,
    max_rate: Option<u32>,
    pending_rate: Option<u32>,
    mix: Vec<i16>,
    cache: TranscoderCache,
    rate_stats: RateStatistics,
    factory: Arc<dyn TranscoderFactory>,
    timer: TickTimer,
    tick_count: u64,
    rate_changes: u64,
    events: Sender<SessionEvent>,
}

impl MixingEngine {
    pub fn new(
        config: &MixerConfig,
        factory: Arc<dyn TranscoderFactory>,
        events: Sender<SessionEvent>,
    ) -> Result<Self> {
        let samples = check_tick_ceiling(config.internal_rate, config.mixing_interval_ms)?;
        Ok(Self {
            internal_rate: config.internal_rate,
            interval_ms: config.mixing_interval_ms,
            tick_samples: samples,
            stats_interval: config.stats_interval_ticks.max(1),
            stat_countdown: 0,
            max_rate: config.max_internal_rate,
            pending_rate: None,
            mix: vec![0; samples],
            cache: TranscoderCache::new(factory.clone()),
            rate_stats: RateStatistics::new(config.internal_rate),
            factory,
            timer: TickTimer::new(Duration::from_millis(config.mixing_interval_ms as u64)),
            tick_count: 0,
            rate_changes: 0,
            events,
        })
    }

    pub fn internal_rate(&self) -> u32 {
        self.internal_rate
    }

    pub fn tick_samples(&self) -> usize {
        self.tick_samples
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms as u64)
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn rate_changes(&self) -> u64 {
        self.rate_changes
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn timing(&self) -> &TimingMetrics {
        self.timer.metrics()
    }

    /// Run one mixing cycle over `slots`
    pub fn tick(
        &mut self,
        slots: &[Arc<ParticipantSlot>],
        locked_rate: Option<u32>,
    ) -> Result<TickReport> {
        let started = self.timer.begin();

        if let Some(rate) = self.pending_rate.take() {
            self.apply_rate(rate, slots)?;
        }
        check_tick_ceiling(self.internal_rate, self.interval_ms)?;

        self.cache.reset_tick();
        self.mix.fill(0);

        let mut contributors = 0;
        for slot in slots {
            let mut guard = slot.lock();
            let state = &mut *guard;
            let rate_moved = state.queue.output_format().sample_rate != self.internal_rate;
            if rate_moved || state.contribution.len() != self.tick_samples {
                state.reconfigure(self.internal_rate, self.tick_samples);
            }
            if state.pull_tick() {
                contributors += 1;
            }
            saturating_add_into(&mut self.mix, &state.contribution);
        }

        let shared_mix = AudioFrame::from_pcm(self.internal_rate, &self.mix);
        let mut self_cancelled = 0;
        for slot in slots {
            let mut guard = slot.lock();
            let state = &mut *guard;

            state.output.copy_from_slice(&self.mix);
            let own_audio = state.had_audio && state.is_talking();
            if own_audio {
                saturating_subtract_into(&mut state.output, &state.contribution);
                self_cancelled += 1;
            }

            let frame = if own_audio || state.listen_volume != 0 {
                adjust_volume(&mut state.output, state.listen_volume);
                let mixed = AudioFrame::from_pcm(self.internal_rate, &state.output);
                self.outbound_frame(slot, state, mixed, false)
            } else {
                self.outbound_frame(slot, state, shared_mix.clone(), true)
            };

            state.publish_outbound(frame);
            drop(guard);
            slot.wake();
        }

        self.tick_count += 1;
        let mut rate_decision = None;
        if self.stat_countdown == 0 {
            rate_decision = self.collect_statistics(slots, locked_rate);
            self.stat_countdown = self.stats_interval;
        }
        self.stat_countdown -= 1;

        mix_debug!(
            "tick {} @{}Hz: {} slots, {} contributing, {} self-cancelled",
            self.tick_count,
            self.internal_rate,
            slots.len(),
            contributors,
            self_cancelled
        );

        self.timer.end(started);
        Ok(TickReport {
            tick: self.tick_count,
            internal_rate: self.internal_rate,
            tick_samples: self.tick_samples,
            participants: slots.len(),
            contributors,
            self_cancelled,
            rate_decision,
        })
    }

    /// Convert a slot's mix into its wire format.
    ///
    /// `shared` frames are the plain mix and go through the cache so every
    /// slot wanting the same format reuses one transcode. Anything else, and
    /// any cache miss, uses the slot's own transcoder. If that fails too the
    /// slot gets the untranslated PCM.
    fn outbound_frame(
        &mut self,
        slot: &ParticipantSlot,
        state: &mut SlotState,
        mixed: AudioFrame,
        shared: bool,
    ) -> AudioFrame {
        let dst = slot.native_write_format();
        if dst == mixed.format {
            return mixed;
        }
        let src = mixed.format;

        if shared {
            match self.cache.get_or_build(dst, src) {
                CacheStatus::Hit => {
                    if let Some(frame) = self.cache.published(dst) {
                        return frame.clone();
                    }
                }
                CacheStatus::Ready => match self.cache.transcode_and_publish(dst, &mixed) {
                    Ok(frame) => return frame,
                    Err(e) => warn!(
                        "{}: Shared transcode {} → {} failed: {}",
                        "MIXER".yellow(),
                        src,
                        dst,
                        e
                    ),
                },
                CacheStatus::Pending | CacheStatus::Failed => {}
            }
        }

        let tick = self.tick_count + 1;
        match state.transcode_private(self.factory.as_ref(), &mixed, dst, tick) {
            Ok(frame) => {
                if shared {
                    self.cache.publish(dst, frame.clone());
                }
                frame
            }
            Err(e) => {
                let failures = state.note_outbound_failure();
                if failures == 1 || failures % 1000 == 0 {
                    warn!(
                        "{}: {} gets untranslated {} audio, no path to {} ({} failures): {}",
                        "MIXER".yellow(),
                        slot.participant_id(),
                        src,
                        dst,
                        failures,
                        e
                    );
                }
                mixed
            }
        }
    }

    fn collect_statistics(
        &mut self,
        slots: &[Arc<ParticipantSlot>],
        locked_rate: Option<u32>,
    ) -> Option<u32> {
        self.rate_stats.begin(self.internal_rate, locked_rate, self.max_rate);
        for slot in slots {
            self.rate_stats.record(slot.native_rate());
        }

        match self.rate_stats.decide() {
            RateDecision::Change(rate) if rate != self.internal_rate => {
                info!(
                    "📈 {}: {} participants, moving internal rate {}Hz → {}Hz",
                    "RATE_ADAPT".cyan(),
                    self.rate_stats.participants(),
                    self.internal_rate,
                    rate
                );
                self.pending_rate = Some(rate);
                Some(rate)
            }
            _ => None,
        }
    }

    /// Switch every slot and the cache to `rate`. The cache is invalidated
    /// before any slot is reconfigured.
    fn apply_rate(&mut self, rate: u32, slots: &[Arc<ParticipantSlot>]) -> Result<()> {
        let samples = match check_tick_ceiling(rate, self.interval_ms) {
            Ok(samples) => samples,
            Err(e) => {
                error!("{}: {}", "MIXER".red(), e);
                return Err(e);
            }
        };
        let from = self.internal_rate;

        self.cache.invalidate_all();
        self.internal_rate = rate;
        self.tick_samples = samples;
        self.mix.clear();
        self.mix.resize(samples, 0);

        for slot in slots {
            slot.lock().reconfigure(rate, samples);
        }

        self.rate_changes += 1;
        let _ = self.events.send(SessionEvent::RateChanged { from, to: rate });
        info!(
            "🔄 {}: Internal rate {}Hz → {}Hz ({} samples per tick)",
            "RATE_ADAPT".cyan(),
            from,
            rate,
            samples
        );
        Ok(())
    }
}
