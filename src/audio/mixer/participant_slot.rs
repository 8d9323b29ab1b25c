// Per-participant mixing state
//
// A slot is touched from two sides: the participant's I/O thread feeds
// inbound frames and drains outbound ones, and the mixing thread pulls one
// tick of audio and publishes the participant's mix. Both go through the
// slot's own mutex; no two slots share a lock.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use colored::*;
use crossbeam::channel::Sender;
use serde::Serialize;
use tokio::sync::Notify;
use tracing::{debug, warn};

use super::audio_queue::{AudioQueue, QueueStats};
use super::error::{MixerError, Result};
use super::events::SessionEvent;
use crate::audio::silence::{ClassifierStats, EnergyClassifier, SilenceClassifier, TalkDetector};
use crate::audio::transcoding::{TranscodeError, Transcoder, TranscoderFactory};
use crate::audio::types::{AudioFormat, AudioFrame, MixerConfig};
use crate::audio::utils::adjust_volume;

/// Everything needed to admit a participant
pub struct ParticipantConfig {
    pub participant_id: String,
    pub native_rate: u32,
    /// Wire format the participant expects outbound frames in
    pub native_format: AudioFormat,
    pub classifier: Option<Box<dyn SilenceClassifier>>,
    pub talk_volume: i32,
    pub listen_volume: i32,
    pub muted: bool,
}

impl ParticipantConfig {
    pub fn new(
        participant_id: impl Into<String>,
        native_rate: u32,
        native_format: AudioFormat,
    ) -> Self {
        Self {
            participant_id: participant_id.into(),
            native_rate,
            native_format,
            classifier: None,
            talk_volume: 0,
            listen_volume: 0,
            muted: false,
        }
    }

    pub fn with_classifier(mut self, classifier: Box<dyn SilenceClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn with_talk_volume(mut self, level: i32) -> Self {
        self.talk_volume = level;
        self
    }

    pub fn with_listen_volume(mut self, level: i32) -> Self {
        self.listen_volume = level;
        self
    }

    pub fn muted(mut self, muted: bool) -> Self {
        self.muted = muted;
        self
    }
}

/// Snapshot of one participant's counters
#[derive(Debug, Clone, Serialize)]
pub struct ParticipantStats {
    pub participant_id: String,
    pub native_rate: u32,
    pub native_format: AudioFormat,
    pub talking: bool,
    pub muted: bool,
    pub frames_in: u64,
    pub inbound_failures: u64,
    pub silent_frames_dropped: u64,
    pub underrun_ticks: u64,
    pub outputs_published: u64,
    pub dropped_outputs: u64,
    pub outbound_transcode_failures: u64,
    pub queued_samples: usize,
    pub queue: QueueStats,
    /// Level history, when the classifier keeps one
    pub classifier: Option<ClassifierStats>,
}

#[derive(Debug, Default)]
struct SlotCounters {
    frames_in: u64,
    inbound_failures: u64,
    silent_frames_dropped: u64,
    underrun_ticks: u64,
    outputs_published: u64,
    dropped_outputs: u64,
    outbound_transcode_failures: u64,
}

/// Lock-protected part of a slot
pub(crate) struct SlotState {
    pub(crate) queue: AudioQueue,
    classifier: Box<dyn SilenceClassifier>,
    talk: TalkDetector,
    internal_rate: u32,
    /// What this slot added to the shared sum this tick
    pub(crate) contribution: Vec<i16>,
    /// This slot's mix for the current tick
    pub(crate) output: Vec<i16>,
    pub(crate) had_audio: bool,
    outbound: Option<AudioFrame>,
    output_ready: bool,
    pub(crate) talk_volume: i32,
    pub(crate) listen_volume: i32,
    pub(crate) muted: bool,
    write_transcoder: Option<Box<dyn Transcoder>>,
    /// Tick that last ran audio through `write_transcoder`
    write_transcoder_tick: u64,
    dtmf: VecDeque<char>,
    counters: SlotCounters,
}

impl SlotState {
    pub(crate) fn is_talking(&self) -> bool {
        self.talk.is_talking()
    }

    /// Pull one tick from the queue into the contribution buffer, zero-filling
    /// any shortfall. Returns whether any audio was pulled.
    pub(crate) fn pull_tick(&mut self) -> bool {
        self.contribution.fill(0);
        let pulled = self.queue.read_into(&mut self.contribution);
        if pulled < self.contribution.len() {
            self.counters.underrun_ticks += 1;
        }
        if self.muted {
            self.contribution.fill(0);
            self.had_audio = false;
        } else {
            self.had_audio = pulled > 0;
        }
        self.had_audio
    }

    /// Transcode this slot's own mix for tick `tick` to `dst` with the slot's
    /// private transcoder.
    ///
    /// The transcoder is rebuilt when formats moved or when it sat out the
    /// previous tick, since its carried-over input belongs to older audio.
    pub(crate) fn transcode_private(
        &mut self,
        factory: &dyn TranscoderFactory,
        mix: &AudioFrame,
        dst: AudioFormat,
        tick: u64,
    ) -> std::result::Result<AudioFrame, TranscodeError> {
        let resumed = self.write_transcoder_tick.saturating_add(1) != tick;
        let stale = self
            .write_transcoder
            .as_ref()
            .map_or(true, |t| t.source() != mix.format || t.destination() != dst);
        if stale || resumed {
            self.write_transcoder = None;
            self.write_transcoder = Some(factory.build(mix.format, dst)?);
        }
        self.write_transcoder_tick = tick;
        match self.write_transcoder.as_mut() {
            Some(t) => t.translate(mix),
            None => Err(TranscodeError::Unsupported {
                src: mix.format,
                dst,
            }),
        }
    }

    pub(crate) fn note_outbound_failure(&mut self) -> u64 {
        self.counters.outbound_transcode_failures += 1;
        self.counters.outbound_transcode_failures
    }

    /// Hand a finished frame to the consumer side. An earlier frame that was
    /// never taken is overwritten and counted as dropped.
    pub(crate) fn publish_outbound(&mut self, frame: AudioFrame) {
        if self.output_ready {
            self.counters.dropped_outputs += 1;
        }
        self.outbound = Some(frame);
        self.output_ready = true;
        self.counters.outputs_published += 1;
    }

    pub(crate) fn reconfigure(&mut self, internal_rate: u32, tick_samples: usize) {
        self.internal_rate = internal_rate;
        self.queue.reconfigure(internal_rate, tick_samples);
        self.contribution.clear();
        self.contribution.resize(tick_samples, 0);
        self.output.clear();
        self.output.resize(tick_samples, 0);
        self.write_transcoder = None;
        self.had_audio = false;
    }
}

/// One participant's state inside a session
pub struct ParticipantSlot {
    participant_id: String,
    native_rate: u32,
    native_format: AudioFormat,
    drop_silence: bool,
    state: Mutex<SlotState>,
    output_notify: Notify,
    closed: AtomicBool,
    events: Sender<SessionEvent>,
}

impl std::fmt::Debug for ParticipantSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParticipantSlot")
            .field("participant_id", &self.participant_id)
            .field("native_rate", &self.native_rate)
            .field("native_format", &self.native_format)
            .finish()
    }
}

impl ParticipantSlot {
    pub(crate) fn new(
        participant: ParticipantConfig,
        mixer: &MixerConfig,
        internal_rate: u32,
        tick_samples: usize,
        factory: Arc<dyn TranscoderFactory>,
        events: Sender<SessionEvent>,
    ) -> Result<Self> {
        let alloc_error = || MixerError::Allocation {
            participant: participant.participant_id.clone(),
            samples: tick_samples,
        };
        let mut contribution = Vec::new();
        contribution
            .try_reserve_exact(tick_samples)
            .map_err(|_| alloc_error())?;
        contribution.resize(tick_samples, 0);
        let mut output = Vec::new();
        output
            .try_reserve_exact(tick_samples)
            .map_err(|_| alloc_error())?;
        output.resize(tick_samples, 0);

        let classifier = participant
            .classifier
            .unwrap_or_else(|| Box::new(EnergyClassifier::new(mixer.silence_threshold_db)));

        let state = SlotState {
            queue: AudioQueue::new(factory, internal_rate, tick_samples)
                .with_backlog_ticks(mixer.backlog_ticks),
            classifier,
            talk: TalkDetector::new(mixer.talk_threshold_ms, mixer.silence_threshold_ms),
            internal_rate,
            contribution,
            output,
            had_audio: false,
            outbound: None,
            output_ready: false,
            talk_volume: participant.talk_volume,
            listen_volume: participant.listen_volume,
            muted: participant.muted,
            write_transcoder: None,
            write_transcoder_tick: 0,
            dtmf: VecDeque::new(),
            counters: SlotCounters::default(),
        };

        Ok(Self {
            participant_id: participant.participant_id,
            native_rate: participant.native_rate,
            native_format: participant.native_format,
            drop_silence: mixer.drop_silence,
            state: Mutex::new(state),
            output_notify: Notify::new(),
            closed: AtomicBool::new(false),
            events,
        })
    }

    pub fn participant_id(&self) -> &str {
        &self.participant_id
    }

    pub fn native_rate(&self) -> u32 {
        self.native_rate
    }

    pub fn native_write_format(&self) -> AudioFormat {
        self.native_format
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, SlotState> {
        // Slot state is consistent between statements, so a panic elsewhere
        // does not leave it half-written.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Feed one inbound frame: transcode, classify, apply talk volume, queue.
    pub fn deliver_inbound(
        &self,
        frame: &AudioFrame,
    ) -> std::result::Result<usize, TranscodeError> {
        let mut state = self.lock();
        state.counters.frames_in += 1;
        if frame.is_empty() {
            return Ok(state.queue.chunk_count());
        }

        let mut pcm = match state.queue.transcode(frame) {
            Ok(pcm) => pcm,
            Err(e) => {
                state.counters.inbound_failures += 1;
                let failures = state.counters.inbound_failures;
                if failures == 1 || failures % 100 == 0 {
                    warn!(
                        "{}: Dropping inbound {} frame from {} ({} failures): {}",
                        "PARTICIPANT".yellow(),
                        frame.format,
                        self.participant_id,
                        failures,
                        e
                    );
                }
                return Err(e);
            }
        };

        // A short frame can be held back whole by a rate converter; with no
        // samples there is nothing to classify.
        if pcm.is_empty() {
            return Ok(state.queue.chunk_count());
        }

        let rate = state.internal_rate;
        let silent = state.classifier.classify(&pcm, rate);
        let frame_ms = if rate > 0 {
            (pcm.len() as u64 * 1000 / rate as u64) as u32
        } else {
            0
        };
        if let Some(talking) = state.talk.update(silent, frame_ms) {
            debug!(
                "{} {} talking",
                self.participant_id,
                if talking { "started" } else { "stopped" }
            );
            let _ = self.events.send(SessionEvent::TalkingChanged {
                participant: self.participant_id.clone(),
                talking,
            });
        }

        if self.drop_silence && silent && !state.talk.is_talking() {
            state.counters.silent_frames_dropped += 1;
            return Ok(state.queue.chunk_count());
        }

        adjust_volume(&mut pcm, state.talk_volume);
        Ok(state.queue.push_pcm(pcm))
    }

    /// Latest published frame, once per tick
    pub fn take_outbound(&self) -> Option<AudioFrame> {
        let mut state = self.lock();
        if !state.output_ready {
            return None;
        }
        state.output_ready = false;
        state.outbound.take()
    }

    /// Wait for the next published frame. `None` once the slot has left the
    /// session or the session stopped.
    pub async fn wait_outbound(&self) -> Option<AudioFrame> {
        loop {
            let notified = self.output_notify.notified();
            if let Some(frame) = self.take_outbound() {
                return Some(frame);
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            notified.await;
        }
    }

    pub fn is_talking(&self) -> bool {
        self.lock().is_talking()
    }

    pub fn take_dtmf(&self) -> Option<char> {
        self.lock().dtmf.pop_front()
    }

    pub(crate) fn queue_dtmf(&self, digit: char) {
        self.lock().dtmf.push_back(digit);
    }

    pub(crate) fn wake(&self) {
        self.output_notify.notify_one();
    }

    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.output_notify.notify_waiters();
        self.output_notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> ParticipantStats {
        let state = self.lock();
        ParticipantStats {
            participant_id: self.participant_id.clone(),
            native_rate: self.native_rate,
            native_format: self.native_format,
            talking: state.is_talking(),
            muted: state.muted,
            frames_in: state.counters.frames_in,
            inbound_failures: state.counters.inbound_failures,
            silent_frames_dropped: state.counters.silent_frames_dropped,
            underrun_ticks: state.counters.underrun_ticks,
            outputs_published: state.counters.outputs_published,
            dropped_outputs: state.counters.dropped_outputs,
            outbound_transcode_failures: state.counters.outbound_transcode_failures,
            queued_samples: state.queue.available(),
            queue: state.queue.stats().clone(),
            classifier: state.classifier.statistics(),
        }
    }
}
