use confmix::audio::mixer::{MixerConfigUtils, RateDecision, RateStatistics};
use confmix::audio::{
    AudioFormat, AudioFrame, FixedClassifier, MixerConfig, MixingSession, ParticipantConfig,
};
use confmix::{MixerError, SessionEvent};
use proptest::prelude::*;

fn decide(current: u32, locked: Option<u32>, max: Option<u32>, rates: &[u32]) -> RateDecision {
    let mut stats = RateStatistics::new(current);
    stats.begin(current, locked, max);
    for &rate in rates {
        stats.record(rate);
    }
    stats.decide()
}

fn rate() -> impl Strategy<Value = u32> {
    prop::sample::select(vec![8000u32, 11025, 16000, 22050, 24000, 32000, 44100, 48000, 96000])
}

fn listener(id: &str, rate: u32) -> ParticipantConfig {
    ParticipantConfig::new(id, rate, AudioFormat::slin(rate))
        .with_classifier(Box::new(FixedClassifier::always_silent()))
}

fn external(stats_interval_ticks: u32) -> MixingSession {
    MixingSession::new(MixerConfigUtils::externally_clocked(MixerConfig {
        stats_interval_ticks,
        ..MixerConfig::default()
    }))
    .unwrap()
}

#[cfg(test)]
mod decision_property_tests {
    use super::*;

    proptest! {
        #[test]
        fn second_interval_keeps_rate(
            current in rate(),
            rates in proptest::collection::vec(rate(), 0..12),
            locked in proptest::option::of(rate()),
            max in proptest::option::of(rate()),
        ) {
            let next = match decide(current, locked, max, &rates) {
                RateDecision::Change(next) => next,
                RateDecision::Keep => current,
            };
            prop_assert_eq!(decide(next, locked, max, &rates), RateDecision::Keep);
        }

        #[test]
        fn capped_decisions_never_exceed_max(
            current in rate(),
            rates in proptest::collection::vec(rate(), 1..12),
            max in rate(),
        ) {
            prop_assume!(current <= max);
            if let RateDecision::Change(next) = decide(current, None, Some(max), &rates) {
                prop_assert!(next <= max);
            }
        }
    }
}

#[cfg(test)]
mod session_rate_tests {
    use super::*;

    #[test]
    fn test_shared_wideband_rate_is_adopted_once() {
        let session = external(100);
        let events = session.events();
        let wide_a = session.join_participant(listener("wide-a", 16000)).unwrap();
        let wide_b = session.join_participant(listener("wide-b", 16000)).unwrap();
        let narrow = session.join_participant(listener("narrow", 8000)).unwrap();

        let first = session.tick().unwrap();
        assert_eq!(first.internal_rate, 8000);
        assert_eq!(first.rate_decision, Some(16000));

        let second = session.tick().unwrap();
        assert_eq!(second.internal_rate, 16000);
        assert_eq!(second.tick_samples, 320);

        let stats = session.session_stats();
        assert_eq!(stats.internal_rate, 16000);
        assert_eq!(stats.cache_generation, 1);
        assert_eq!(stats.rate_changes, 1);

        for _ in 0..150 {
            assert_eq!(session.tick().unwrap().internal_rate, 16000);
        }
        assert_eq!(session.session_stats().cache_generation, 1);
        assert_eq!(
            events
                .try_iter()
                .filter(|e| matches!(e, SessionEvent::RateChanged { .. }))
                .count(),
            1
        );

        // Wideband legs now mix at their native rate without conversion
        session.take_outbound(wide_b).unwrap();
        session
            .deliver_inbound(wide_a, &AudioFrame::from_pcm(16000, &[700; 320]))
            .unwrap();
        session.tick().unwrap();
        let heard = session.take_outbound(wide_b).unwrap().unwrap();
        assert_eq!(heard.format, AudioFormat::slin(16000));
        assert_eq!(heard.to_pcm().unwrap(), vec![700; 320]);

        let narrow_out = session.take_outbound(narrow).unwrap().unwrap();
        assert_eq!(narrow_out.format, AudioFormat::slin(8000));
    }

    #[test]
    fn test_locked_rate_overrides_participants() {
        let session = external(2);
        session.join_participant(listener("a", 8000)).unwrap();
        session.join_participant(listener("b", 8000)).unwrap();
        session.set_locked_rate(Some(32000)).unwrap();

        session.tick().unwrap();
        assert_eq!(session.tick().unwrap().internal_rate, 32000);
        assert_eq!(session.session_stats().locked_rate, Some(32000));

        for _ in 0..4 {
            assert_eq!(session.tick().unwrap().internal_rate, 32000);
        }

        // Released: everyone is below 32 kHz, so the next pass drops back
        session.set_locked_rate(None).unwrap();
        for _ in 0..3 {
            session.tick().unwrap();
        }
        assert_eq!(session.session_stats().internal_rate, 8000);
        assert_eq!(session.session_stats().cache_generation, 2);
    }

    #[test]
    fn test_invalid_locked_rate_is_rejected() {
        let session = external(100);
        assert!(matches!(
            session.set_locked_rate(Some(4000)),
            Err(MixerError::InvalidConfig(_))
        ));
        assert_eq!(session.session_stats().locked_rate, None);
    }

    #[test]
    fn test_participants_all_below_drop_the_rate() {
        let session = MixingSession::new(MixerConfigUtils::externally_clocked(
            MixerConfigUtils::wideband_config(),
        ))
        .unwrap();
        let a = session.join_participant(listener("a", 8000)).unwrap();

        let first = session.tick().unwrap();
        assert_eq!(first.internal_rate, 16000);
        assert_eq!(first.rate_decision, Some(8000));
        assert_eq!(session.tick().unwrap().internal_rate, 8000);

        session.take_outbound(a).unwrap();
        session.tick().unwrap();
        let out = session.take_outbound(a).unwrap().unwrap();
        assert_eq!(out.format, AudioFormat::slin(8000));
        assert_eq!(out.samples, 160);
    }
}
