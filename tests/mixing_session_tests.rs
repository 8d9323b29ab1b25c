use confmix::audio::mixer::{MixerConfigUtils, SessionEvent, SessionState};
use confmix::audio::{
    saturating_subtract, AudioFormat, AudioFrame, ClockSource, Encoding, FixedClassifier,
    MixerConfig, MixingSession, ParticipantConfig,
};
use confmix::MixerError;

/// Externally clocked session where one voiced frame is enough to count as talking
fn session() -> MixingSession {
    MixingSession::new(MixerConfig {
        clock: ClockSource::External,
        talk_threshold_ms: 0,
        ..MixerConfig::default()
    })
    .unwrap()
}

fn tone(amplitude: i16) -> AudioFrame {
    AudioFrame::from_pcm(8000, &[amplitude; 160])
}

fn silent_participant(id: &str) -> ParticipantConfig {
    ParticipantConfig::new(id, 8000, AudioFormat::slin(8000))
        .with_classifier(Box::new(FixedClassifier::always_silent()))
}

fn talking_participant(id: &str) -> ParticipantConfig {
    ParticipantConfig::new(id, 8000, AudioFormat::slin(8000))
        .with_classifier(Box::new(FixedClassifier::always_voiced()))
}

fn outbound_pcm(session: &MixingSession, handle: confmix::SlotHandle) -> Vec<i16> {
    session
        .take_outbound(handle)
        .unwrap()
        .expect("frame published")
        .to_pcm()
        .expect("linear PCM")
}

#[cfg(test)]
mod scenario_tests {
    use super::*;

    #[test]
    fn test_talking_participant_does_not_hear_itself() {
        let session = session();
        let p1 = session.join_participant(silent_participant("p1")).unwrap();
        let p2 = session.join_participant(talking_participant("p2")).unwrap();

        session.deliver_inbound(p1, &tone(1200)).unwrap();
        session.deliver_inbound(p2, &tone(3400)).unwrap();
        session.tick().unwrap();

        let out1 = outbound_pcm(&session, p1);
        let out2 = outbound_pcm(&session, p2);
        assert_eq!(out1.len(), 160);
        assert!(out1.iter().all(|&s| s == 4600), "p1 hears A+B");
        assert!(out2.iter().all(|&s| s == 1200), "p2 hears only A");
    }

    #[test]
    fn test_self_cancellation_is_saturating() {
        let session = session();
        let p1 = session.join_participant(talking_participant("p1")).unwrap();
        let p2 = session.join_participant(talking_participant("p2")).unwrap();

        session.deliver_inbound(p1, &tone(30000)).unwrap();
        session.deliver_inbound(p2, &tone(20000)).unwrap();
        let report = session.tick().unwrap();
        assert_eq!(report.self_cancelled, 2);

        // Sum clamps at 32767, so subtraction cannot fully restore the other party
        let sum = 32767;
        assert!(outbound_pcm(&session, p1)
            .iter()
            .all(|&s| s == saturating_subtract(sum, 30000)));
        assert!(outbound_pcm(&session, p2)
            .iter()
            .all(|&s| s == saturating_subtract(sum, 20000)));
    }

    #[test]
    fn test_missing_transcoder_degrades_one_participant_only() {
        let session = session();
        let p1 = session.join_participant(silent_participant("p1")).unwrap();
        let p2 = session.join_participant(silent_participant("p2")).unwrap();
        let opus = session
            .join_participant(
                ParticipantConfig::new("opus-leg", 48000, AudioFormat::new(Encoding::Opus, 48000))
                    .with_classifier(Box::new(FixedClassifier::always_silent())),
            )
            .unwrap();

        session.deliver_inbound(p1, &tone(100)).unwrap();
        session.deliver_inbound(p2, &tone(200)).unwrap();
        session.tick().unwrap();
        session.deliver_inbound(p1, &tone(100)).unwrap();
        session.deliver_inbound(p2, &tone(200)).unwrap();
        session.tick().unwrap();

        // Best-effort untranslated output, but still marked ready
        let frame = session.take_outbound(opus).unwrap().expect("output ready");
        assert_eq!(frame.format, AudioFormat::slin(8000));
        assert!(session.participant_stats(opus).unwrap().outbound_transcode_failures >= 2);

        assert!(outbound_pcm(&session, p1).iter().all(|&s| s == 300));
        assert!(outbound_pcm(&session, p2).iter().all(|&s| s == 300));
        assert_eq!(session.state(), SessionState::Running);
    }

    #[test]
    fn test_short_wideband_frames_still_mark_talking() {
        let session = MixingSession::new(MixerConfig {
            clock: ClockSource::External,
            talk_threshold_ms: 20,
            ..MixerConfig::default()
        })
        .unwrap();
        let events = session.events();
        let wide = session
            .join("wide", 48000, AudioFormat::slin(48000))
            .unwrap();
        let narrow = session.join_participant(silent_participant("narrow")).unwrap();

        // 5 ms frames: every other one is held back whole by the resampler
        for _ in 0..200 {
            session
                .deliver_inbound(wide, &AudioFrame::from_pcm(48000, &[12000; 240]))
                .unwrap();
        }
        assert!(session.participant(wide).unwrap().is_talking());
        assert!(events.try_iter().any(|e| e
            == SessionEvent::TalkingChanged {
                participant: "wide".to_string(),
                talking: true
            }));

        let report = session.tick().unwrap();
        assert_eq!(report.self_cancelled, 1);
        let own = session.take_outbound(wide).unwrap().expect("frame published");
        assert_eq!(own.format, AudioFormat::slin(48000));
        assert!(own.to_pcm().unwrap().iter().all(|&s| s == 0));
        assert!(outbound_pcm(&session, narrow).iter().any(|&s| s > 1000));
    }

    #[test]
    fn test_underrun_contributes_silence() {
        let session = session();
        let p1 = session.join_participant(silent_participant("p1")).unwrap();
        let p2 = session.join_participant(silent_participant("p2")).unwrap();
        session.deliver_inbound(p1, &AudioFrame::from_pcm(8000, &[500; 60])).unwrap();

        let report = session.tick().unwrap();
        assert_eq!(report.contributors, 1);

        let out = outbound_pcm(&session, p2);
        assert!(out[..60].iter().all(|&s| s == 500));
        assert!(out[60..].iter().all(|&s| s == 0));
        assert_eq!(session.participant_stats(p1).unwrap().underrun_ticks, 1);
        assert_eq!(session.participant_stats(p2).unwrap().underrun_ticks, 1);
    }
}

#[cfg(test)]
mod lifecycle_tests {
    use super::*;

    #[test]
    fn test_state_follows_participants() {
        let session = session();
        assert_eq!(session.state(), SessionState::Idle);

        let a = session.join("a", 8000, AudioFormat::slin(8000)).unwrap();
        assert_eq!(session.state(), SessionState::Running);
        let b = session.join("b", 8000, AudioFormat::slin(8000)).unwrap();

        session.leave(a).unwrap();
        assert_eq!(session.state(), SessionState::Running);
        session.leave(b).unwrap();
        assert_eq!(session.state(), SessionState::Idle);

        // Idle sessions do not tick
        assert_eq!(session.tick().unwrap().tick, 0);
    }

    #[test]
    fn test_stale_handle_is_rejected() {
        let session = session();
        let a = session.join("a", 8000, AudioFormat::slin(8000)).unwrap();
        session.leave(a).unwrap();
        let b = session.join("b", 8000, AudioFormat::slin(8000)).unwrap();

        assert!(matches!(session.leave(a), Err(MixerError::UnknownSlot(_))));
        assert!(session.take_outbound(a).is_err());
        assert!(session.participant(b).is_ok());
    }

    #[test]
    fn test_duplicate_and_invalid_joins() {
        let session = session();
        session.join("a", 8000, AudioFormat::slin(8000)).unwrap();
        assert!(matches!(
            session.join("a", 8000, AudioFormat::slin(8000)),
            Err(MixerError::ParticipantExists(_))
        ));
        assert!(matches!(
            session.join("", 8000, AudioFormat::slin(8000)),
            Err(MixerError::InvalidConfig(_))
        ));
        assert!(matches!(
            session.join("b", 4000, AudioFormat::slin(4000)),
            Err(MixerError::InvalidConfig(_))
        ));
        assert_eq!(session.participant_count(), 1);
    }

    #[test]
    fn test_stop_closes_session() {
        let session = session();
        let a = session.join("a", 8000, AudioFormat::slin(8000)).unwrap();
        let events = session.events();

        session.stop().unwrap();
        assert_eq!(session.state(), SessionState::Stopped);
        assert!(session.participant(a).unwrap().is_closed());
        assert!(matches!(session.tick(), Err(MixerError::SessionClosed(_))));
        assert!(matches!(
            session.join("b", 8000, AudioFormat::slin(8000)),
            Err(MixerError::SessionClosed(_))
        ));
        assert!(events.try_iter().any(|e| e == SessionEvent::Stopped));

        // Second stop is a no-op
        session.stop().unwrap();
    }

    #[test]
    fn test_internal_clock_session_rejects_manual_ticks() {
        let session = MixingSession::new(MixerConfigUtils::default_config()).unwrap();
        assert!(matches!(session.tick(), Err(MixerError::WrongClock(_))));
    }

    #[test]
    fn test_rate_past_tick_ceiling_stops_session() {
        let session = MixingSession::new(MixerConfig {
            clock: ClockSource::External,
            mixing_interval_ms: 100,
            ..MixerConfig::default()
        })
        .unwrap();
        let events = session.events();
        let a = session.join("a", 96000, AudioFormat::slin(96000)).unwrap();
        session.join("b", 96000, AudioFormat::slin(96000)).unwrap();

        // First tick decides 96 kHz; applying it needs 9600 samples per tick
        assert_eq!(session.tick().unwrap().rate_decision, Some(96000));
        assert!(matches!(
            session.tick(),
            Err(MixerError::TickCeilingExceeded { samples: 9600, .. })
        ));

        assert_eq!(session.state(), SessionState::Stopped);
        assert!(session.participant(a).unwrap().is_closed());
        assert!(session.session_stats().failure.is_some());
        assert!(events
            .try_iter()
            .any(|e| matches!(e, SessionEvent::Failed { .. })));
        assert!(matches!(session.tick(), Err(MixerError::SessionClosed(_))));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let result = MixingSession::new(MixerConfig {
            mixing_interval_ms: 7,
            ..MixerConfig::default()
        });
        assert!(matches!(result, Err(MixerError::InvalidConfig(_))));
    }
}

#[cfg(test)]
mod participant_control_tests {
    use super::*;

    #[test]
    fn test_dtmf_reaches_everyone_else() {
        let session = session();
        let a = session.join("a", 8000, AudioFormat::slin(8000)).unwrap();
        let b = session.join("b", 8000, AudioFormat::slin(8000)).unwrap();
        let c = session.join("c", 8000, AudioFormat::slin(8000)).unwrap();

        assert_eq!(session.deliver_dtmf(a, '5').unwrap(), 2);
        assert_eq!(session.participant(a).unwrap().take_dtmf(), None);
        assert_eq!(session.participant(b).unwrap().take_dtmf(), Some('5'));
        assert_eq!(session.participant(c).unwrap().take_dtmf(), Some('5'));
    }

    #[test]
    fn test_muted_participant_is_not_heard() {
        let session = session();
        let a = session.join_participant(silent_participant("a")).unwrap();
        let b = session.join_participant(silent_participant("b")).unwrap();
        session.set_muted(a, true).unwrap();

        session.deliver_inbound(a, &tone(1000)).unwrap();
        session.deliver_inbound(b, &tone(10)).unwrap();
        session.tick().unwrap();

        assert!(outbound_pcm(&session, b).iter().all(|&s| s == 10));
    }

    #[test]
    fn test_listen_volume_scales_output() {
        let session = session();
        let a = session.join_participant(silent_participant("a")).unwrap();
        let b = session.join_participant(silent_participant("b")).unwrap();
        session.set_listen_volume(b, -2).unwrap();
        assert!(session.set_listen_volume(b, 9).is_err());

        session.deliver_inbound(a, &tone(1000)).unwrap();
        session.tick().unwrap();

        assert!(outbound_pcm(&session, a).iter().all(|&s| s == 1000));
        assert!(outbound_pcm(&session, b).iter().all(|&s| s == 500));
    }

    #[test]
    fn test_talking_events_are_reported() {
        let session = session();
        let events = session.events();
        let a = session.join_participant(talking_participant("a")).unwrap();
        session.deliver_inbound(a, &tone(1000)).unwrap();

        let talking: Vec<_> = events
            .try_iter()
            .filter(|e| matches!(e, SessionEvent::TalkingChanged { .. }))
            .collect();
        assert_eq!(
            talking,
            vec![SessionEvent::TalkingChanged {
                participant: "a".to_string(),
                talking: true
            }]
        );
    }

    #[test]
    fn test_untaken_output_is_dropped_not_queued() {
        let session = session();
        let a = session.join_participant(silent_participant("a")).unwrap();
        session.tick().unwrap();
        session.tick().unwrap();

        assert!(session.take_outbound(a).unwrap().is_some());
        assert!(session.take_outbound(a).unwrap().is_none());
        assert_eq!(session.participant_stats(a).unwrap().dropped_outputs, 1);
    }
}
