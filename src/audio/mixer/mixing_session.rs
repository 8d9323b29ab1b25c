// Mixing session: participant set, lifecycle and the mixing thread
//
// Join/leave take the session-wide participant lock only long enough to
// mutate the arena. The mixing thread snapshots the live slots at the start
// of each tick, so a participant that leaves mid-tick is released after the
// tick finishes with it.
//
// Lock order: participants -> state. The engine lock is held only by the
// tick itself and by readers of engine counters.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread::{self, JoinHandle};

use chrono::Utc;
use colored::*;
use crossbeam::channel::{self, Receiver, Sender};
use crossbeam::select;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::engine::{check_tick_ceiling, MixingEngine, TickReport};
use super::error::{MixerError, Result};
use super::events::SessionEvent;
use super::participant_slot::{ParticipantConfig, ParticipantSlot, ParticipantStats};
use super::slot_arena::{SlotArena, SlotHandle};
use super::types::{SessionState, SessionStats};
use super::validation::{
    validate_config, validate_participant_id, validate_rate_for_interval, validate_sample_rate,
    validate_volume,
};
use crate::audio::transcoding::{LinearPcmFactory, TranscoderFactory};
use crate::audio::types::{AudioFormat, AudioFrame, ClockSource, MixerConfig};

enum Control {
    Wake,
    Stop,
}

struct SessionShared {
    id: Uuid,
    config: MixerConfig,
    factory: Arc<dyn TranscoderFactory>,
    participants: RwLock<SlotArena<Arc<ParticipantSlot>>>,
    state: Mutex<SessionState>,
    engine: Mutex<MixingEngine>,
    locked_rate: Mutex<Option<u32>>,
    internal_rate: AtomicU32,
    tick_samples: AtomicUsize,
    failure: Mutex<Option<String>>,
    started_at: chrono::DateTime<Utc>,
    events: Sender<SessionEvent>,
}

/// Locks whose data stays valid across a panic in another holder
fn relock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl SessionShared {
    fn participants(&self) -> RwLockReadGuard<'_, SlotArena<Arc<ParticipantSlot>>> {
        self.participants
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn participants_mut(&self) -> RwLockWriteGuard<'_, SlotArena<Arc<ParticipantSlot>>> {
        self.participants
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn state(&self) -> SessionState {
        *relock(&self.state)
    }

    fn snapshot(&self) -> Vec<Arc<ParticipantSlot>> {
        self.participants().values().cloned().collect()
    }

    fn run_tick(&self) -> Result<TickReport> {
        let slots = self.snapshot();
        let locked_rate = *relock(&self.locked_rate);

        let mut engine = relock(&self.engine);
        let report = engine.tick(&slots, locked_rate)?;
        self.internal_rate
            .store(engine.internal_rate(), Ordering::Release);
        self.tick_samples
            .store(engine.tick_samples(), Ordering::Release);
        Ok(report)
    }

    fn close_all(&self) {
        for slot in self.participants().values() {
            slot.close();
        }
    }

    /// Move to `Stopped` after the in-flight tick. Returns false if already stopped.
    fn finish_stop(&self) -> bool {
        {
            let mut state = relock(&self.state);
            if *state == SessionState::Stopped {
                return false;
            }
            *state = SessionState::Stopped;
        }
        self.close_all();
        let _ = self.events.send(SessionEvent::Stopped);
        info!("⏹️ {}: Session {} stopped", "MIXING_SESSION".red(), self.id);
        true
    }

    fn fail(&self, err: &MixerError) {
        error!(
            "{}: Session {} failed: {}",
            "MIXING_SESSION".red(),
            self.id,
            err
        );
        *relock(&self.failure) = Some(err.to_string());
        *relock(&self.state) = SessionState::Stopped;
        self.close_all();
        let _ = self.events.send(SessionEvent::Failed {
            reason: err.to_string(),
        });
    }
}

fn run_mixing_thread(shared: Arc<SessionShared>, control: Receiver<Control>) {
    info!(
        "🎛️ {}: Mixing thread for session {} started",
        "MIXING_SESSION".green(),
        shared.id
    );

    let mut ticker: Option<Receiver<std::time::Instant>> = None;
    loop {
        match shared.state() {
            SessionState::Stopped => break,
            SessionState::Draining => {
                shared.finish_stop();
                break;
            }
            SessionState::Idle => {
                ticker = None;
                match control.recv() {
                    Ok(Control::Wake) => continue,
                    Ok(Control::Stop) | Err(_) => {
                        shared.finish_stop();
                        break;
                    }
                }
            }
            SessionState::Running => {
                let tick = ticker
                    .get_or_insert_with(|| channel::tick(relock(&shared.engine).interval()))
                    .clone();
                let keep_running = select! {
                    recv(control) -> msg => matches!(msg, Ok(Control::Wake)),
                    recv(tick) -> _ => match shared.run_tick() {
                        Ok(_) => true,
                        Err(e) => {
                            shared.fail(&e);
                            return;
                        }
                    },
                };
                if !keep_running {
                    shared.finish_stop();
                    break;
                }
            }
        }
    }

    info!(
        "{}: Mixing thread for session {} exited",
        "MIXING_SESSION".green(),
        shared.id
    );
}

/// A conference's mixing core.
///
/// Create one per conference, `join` participants, and hand each
/// participant's [`ParticipantSlot`] to its I/O path. With the internal clock
/// a dedicated thread mixes every `mixing_interval_ms`; with
/// [`ClockSource::External`] the owner calls [`MixingSession::tick`].
pub struct MixingSession {
    shared: Arc<SessionShared>,
    control: Sender<Control>,
    thread: Mutex<Option<JoinHandle<()>>>,
    events: Receiver<SessionEvent>,
}

impl MixingSession {
    pub fn new(config: MixerConfig) -> Result<Self> {
        Self::with_factory(config, Arc::new(LinearPcmFactory::new()))
    }

    pub fn with_factory(config: MixerConfig, factory: Arc<dyn TranscoderFactory>) -> Result<Self> {
        validate_config(&config)?;
        let tick_samples = check_tick_ceiling(config.internal_rate, config.mixing_interval_ms)?;

        let (event_tx, event_rx) = channel::unbounded();
        let engine = MixingEngine::new(&config, factory.clone(), event_tx.clone())?;
        let id = Uuid::new_v4();

        let shared = Arc::new(SessionShared {
            id,
            factory,
            participants: RwLock::new(SlotArena::new()),
            state: Mutex::new(SessionState::Idle),
            engine: Mutex::new(engine),
            locked_rate: Mutex::new(config.locked_rate),
            internal_rate: AtomicU32::new(config.internal_rate),
            tick_samples: AtomicUsize::new(tick_samples),
            failure: Mutex::new(None),
            started_at: Utc::now(),
            events: event_tx,
            config,
        });

        let (control_tx, control_rx) = channel::unbounded();
        let thread = match shared.config.clock {
            ClockSource::Internal => {
                let thread_shared = shared.clone();
                let handle = thread::Builder::new()
                    .name(format!("confmix-{}", &id.simple().to_string()[..8]))
                    .spawn(move || run_mixing_thread(thread_shared, control_rx))?;
                Some(handle)
            }
            ClockSource::External => None,
        };

        info!(
            "🎛️ {}: Session {} created at {}Hz, {}ms ticks ({:?} clock)",
            "MIXING_SESSION".green(),
            id,
            shared.config.internal_rate,
            shared.config.mixing_interval_ms,
            shared.config.clock
        );

        Ok(Self {
            shared,
            control: control_tx,
            thread: Mutex::new(thread),
            events: event_rx,
        })
    }

    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    pub fn config(&self) -> &MixerConfig {
        &self.shared.config
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// Session events; every clone sees each event once between them
    pub fn events(&self) -> Receiver<SessionEvent> {
        self.events.clone()
    }

    pub fn join(
        &self,
        participant_id: &str,
        native_rate: u32,
        native_format: AudioFormat,
    ) -> Result<SlotHandle> {
        self.join_participant(ParticipantConfig::new(participant_id, native_rate, native_format))
    }

    pub fn join_participant(&self, participant: ParticipantConfig) -> Result<SlotHandle> {
        validate_participant_id(&participant.participant_id)?;
        validate_sample_rate(participant.native_rate)?;
        validate_volume(participant.talk_volume)?;
        validate_volume(participant.listen_volume)?;

        let state = self.state();
        if matches!(state, SessionState::Draining | SessionState::Stopped) {
            return Err(MixerError::SessionClosed(state.to_string()));
        }

        let participant_id = participant.participant_id.clone();
        let slot = Arc::new(ParticipantSlot::new(
            participant,
            &self.shared.config,
            self.shared.internal_rate.load(Ordering::Acquire),
            self.shared.tick_samples.load(Ordering::Acquire),
            self.shared.factory.clone(),
            self.shared.events.clone(),
        )?);

        let (handle, count, woke) = {
            let mut participants = self.shared.participants_mut();
            if participants
                .values()
                .any(|s| s.participant_id() == participant_id)
            {
                return Err(MixerError::ParticipantExists(participant_id));
            }
            let handle = participants.insert(slot);

            let mut state = relock(&self.shared.state);
            let woke = *state == SessionState::Idle;
            if woke {
                *state = SessionState::Running;
            }
            (handle, participants.len(), woke)
        };

        if woke {
            let _ = self.control.send(Control::Wake);
        }
        let _ = self.shared.events.send(SessionEvent::ParticipantJoined {
            participant: participant_id.clone(),
            handle,
        });
        info!(
            "➕ {}: {} joined as {} ({} participants)",
            "MIXING_SESSION".green(),
            participant_id,
            handle,
            count
        );
        Ok(handle)
    }

    pub fn leave(&self, handle: SlotHandle) -> Result<()> {
        let (slot, remaining) = {
            let mut participants = self.shared.participants_mut();
            let slot = participants
                .remove(handle)
                .ok_or(MixerError::UnknownSlot(handle))?;
            if participants.is_empty() {
                let mut state = relock(&self.shared.state);
                if *state == SessionState::Running {
                    *state = SessionState::Idle;
                }
            }
            (slot, participants.len())
        };

        slot.close();
        let _ = self.shared.events.send(SessionEvent::ParticipantLeft {
            participant: slot.participant_id().to_string(),
            handle,
        });
        info!(
            "➖ {}: {} left ({} participants)",
            "MIXING_SESSION".green(),
            slot.participant_id(),
            remaining
        );
        Ok(())
    }

    /// I/O-side view of a participant
    pub fn participant(&self, handle: SlotHandle) -> Result<Arc<ParticipantSlot>> {
        self.shared
            .participants()
            .get(handle)
            .cloned()
            .ok_or(MixerError::UnknownSlot(handle))
    }

    pub fn deliver_inbound(&self, handle: SlotHandle, frame: &AudioFrame) -> Result<usize> {
        let slot = self.participant(handle)?;
        slot.deliver_inbound(frame).map_err(MixerError::from)
    }

    pub fn take_outbound(&self, handle: SlotHandle) -> Result<Option<AudioFrame>> {
        Ok(self.participant(handle)?.take_outbound())
    }

    /// Forward a DTMF digit to every other participant. Returns how many received it.
    pub fn deliver_dtmf(&self, from: SlotHandle, digit: char) -> Result<usize> {
        let participants = self.shared.participants();
        if !participants.contains(from) {
            return Err(MixerError::UnknownSlot(from));
        }
        let mut delivered = 0;
        for (handle, slot) in participants.iter() {
            if handle != from {
                slot.queue_dtmf(digit);
                delivered += 1;
            }
        }
        Ok(delivered)
    }

    pub fn set_talk_volume(&self, handle: SlotHandle, level: i32) -> Result<()> {
        validate_volume(level)?;
        self.participant(handle)?.lock().talk_volume = level;
        Ok(())
    }

    pub fn set_listen_volume(&self, handle: SlotHandle, level: i32) -> Result<()> {
        validate_volume(level)?;
        self.participant(handle)?.lock().listen_volume = level;
        Ok(())
    }

    pub fn set_muted(&self, handle: SlotHandle, muted: bool) -> Result<()> {
        self.participant(handle)?.lock().muted = muted;
        Ok(())
    }

    /// Pin the internal rate, or release the pin with `None`. Takes effect at
    /// the next statistics pass.
    pub fn set_locked_rate(&self, rate: Option<u32>) -> Result<()> {
        if let Some(rate) = rate {
            validate_rate_for_interval(rate, self.shared.config.mixing_interval_ms)?;
        }
        *relock(&self.shared.locked_rate) = rate;
        info!(
            "🔒 {}: Locked rate set to {:?}",
            "RATE_ADAPT".cyan(),
            rate
        );
        Ok(())
    }

    /// Drive one tick from an external clock
    pub fn tick(&self) -> Result<TickReport> {
        if self.shared.config.clock != ClockSource::External {
            return Err(MixerError::WrongClock("external".to_string()));
        }
        match self.state() {
            SessionState::Running => {}
            SessionState::Idle => return Ok(TickReport::default()),
            state => return Err(MixerError::SessionClosed(state.to_string())),
        }

        self.shared.run_tick().inspect_err(|e| {
            if e.is_fatal() {
                self.shared.fail(e);
            }
        })
    }

    /// Stop mixing after the in-flight tick and close every participant
    pub fn stop(&self) -> Result<()> {
        {
            let mut state = relock(&self.shared.state);
            if *state == SessionState::Stopped {
                return Ok(());
            }
            *state = SessionState::Draining;
        }

        let handle = relock(&self.thread).take();
        match handle {
            Some(handle) => {
                let _ = self.control.send(Control::Stop);
                if handle.join().is_err() {
                    warn!("{}: Mixing thread panicked", "MIXING_SESSION".red());
                    self.shared.finish_stop();
                }
            }
            None => {
                // Waits out a tick in progress on the external clock
                let _engine = relock(&self.shared.engine);
                self.shared.finish_stop();
            }
        }

        let engine = relock(&self.shared.engine);
        let timing = engine.timing();
        if timing.is_performance_acceptable() {
            info!(
                "{}: Session {} timing: {}",
                "MIXING_SESSION".green(),
                self.shared.id,
                timing.summary()
            );
        } else {
            warn!(
                "{}: Session {} ran late: {}",
                "MIXING_SESSION".yellow(),
                self.shared.id,
                timing.summary()
            );
        }
        Ok(())
    }

    pub fn session_stats(&self) -> SessionStats {
        let participant_count = self.shared.participants().len();
        let engine = relock(&self.shared.engine);
        let cache = engine.cache_stats();
        SessionStats {
            session_id: self.shared.id,
            state: self.state(),
            participant_count,
            internal_rate: engine.internal_rate(),
            interval_ms: self.shared.config.mixing_interval_ms,
            tick_samples: engine.tick_samples(),
            locked_rate: *relock(&self.shared.locked_rate),
            tick_count: engine.tick_count(),
            rate_changes: engine.rate_changes(),
            cache_generation: cache.generation,
            cache_entries: cache.entries,
            started_at: self.shared.started_at,
            timing: engine.timing().clone(),
            failure: relock(&self.shared.failure).clone(),
        }
    }

    pub fn participant_stats(&self, handle: SlotHandle) -> Result<ParticipantStats> {
        Ok(self.participant(handle)?.stats())
    }

    pub fn participant_count(&self) -> usize {
        self.shared.participants().len()
    }
}

impl Drop for MixingSession {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("Failed to stop session {} on drop: {}", self.shared.id, e);
        }
    }
}
