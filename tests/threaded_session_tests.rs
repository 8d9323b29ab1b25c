use std::time::{Duration, Instant};

use confmix::audio::mixer::SessionState;
use confmix::audio::{
    AudioFormat, AudioFrame, FixedClassifier, MixerConfig, MixingSession, ParticipantConfig,
};
use confmix::log::{is_mix_debug_enabled, set_mix_debug};
use confmix::SessionEvent;
use serial_test::serial;

fn listener(id: &str) -> ParticipantConfig {
    ParticipantConfig::new(id, 8000, AudioFormat::slin(8000))
        .with_classifier(Box::new(FixedClassifier::always_silent()))
}

fn wait_for<F: FnMut() -> bool>(timeout: Duration, mut condition: F) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

#[cfg(test)]
mod internal_clock_tests {
    use super::*;

    #[test]
    #[serial]
    fn test_mixing_thread_publishes_every_tick() {
        let session = MixingSession::new(MixerConfig::default()).unwrap();
        let a = session.join_participant(listener("a")).unwrap();
        let b = session.join_participant(listener("b")).unwrap();

        session
            .deliver_inbound(a, &AudioFrame::from_pcm(8000, &[900; 160]))
            .unwrap();

        let mut heard = Vec::new();
        assert!(wait_for(Duration::from_secs(2), || {
            if let Some(frame) = session.take_outbound(b).unwrap() {
                heard.extend(frame.to_pcm().unwrap());
            }
            heard.contains(&900)
        }));
        assert!(wait_for(Duration::from_secs(2), || session.session_stats().tick_count >= 5));

        session.stop().unwrap();
        assert_eq!(session.state(), SessionState::Stopped);
    }

    #[test]
    #[serial]
    fn test_idle_session_stops_ticking() {
        let session = MixingSession::new(MixerConfig::default()).unwrap();
        let a = session.join_participant(listener("a")).unwrap();
        assert!(wait_for(Duration::from_secs(2), || session.session_stats().tick_count >= 2));

        session.leave(a).unwrap();
        assert_eq!(session.state(), SessionState::Idle);

        // Allow an in-flight tick to land, then the count must hold still
        std::thread::sleep(Duration::from_millis(60));
        let settled = session.session_stats().tick_count;
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(session.session_stats().tick_count, settled);

        // Rejoining re-arms the timer
        session.join_participant(listener("b")).unwrap();
        assert!(wait_for(Duration::from_secs(2), || {
            session.session_stats().tick_count > settled
        }));
    }

    #[test]
    #[serial]
    fn test_stop_joins_thread_and_reports() {
        let session = MixingSession::new(MixerConfig::default()).unwrap();
        let events = session.events();
        let a = session.join_participant(listener("a")).unwrap();
        let slot = session.participant(a).unwrap();

        session.stop().unwrap();
        assert!(slot.is_closed());
        assert_eq!(session.state(), SessionState::Stopped);
        assert!(events.try_iter().any(|e| e == SessionEvent::Stopped));

        let ticks = session.session_stats().tick_count;
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(session.session_stats().tick_count, ticks);
    }

    #[test]
    #[serial]
    fn test_debug_flag_toggles_during_mixing() {
        let session = MixingSession::new(MixerConfig::default()).unwrap();
        session.join_participant(listener("a")).unwrap();

        set_mix_debug(true);
        assert!(is_mix_debug_enabled());
        assert!(wait_for(Duration::from_secs(2), || session.session_stats().tick_count >= 3));
        set_mix_debug(false);
        assert!(!is_mix_debug_enabled());
    }
}

#[cfg(test)]
mod async_output_tests {
    use super::*;

    #[tokio::test]
    #[serial]
    async fn test_wait_outbound_resolves_with_next_frame() {
        let session = MixingSession::new(MixerConfig::default()).unwrap();
        let a = session.join_participant(listener("a")).unwrap();
        let slot = session.participant(a).unwrap();

        let frame = tokio::time::timeout(Duration::from_secs(2), slot.wait_outbound())
            .await
            .expect("tick within timeout");
        let frame = frame.expect("slot still live");
        assert_eq!(frame.samples, 160);
    }

    #[tokio::test]
    #[serial]
    async fn test_wait_outbound_ends_when_participant_leaves() {
        let session = MixingSession::new(MixerConfig::default()).unwrap();
        let a = session.join_participant(listener("a")).unwrap();
        let slot = session.participant(a).unwrap();
        session.leave(a).unwrap();

        // Let an in-flight tick finish, then drain what it published
        tokio::time::sleep(Duration::from_millis(60)).await;
        while slot.take_outbound().is_some() {}
        let result = tokio::time::timeout(Duration::from_secs(2), slot.wait_outbound())
            .await
            .expect("closed slot resolves");
        assert!(result.is_none());
    }

    #[test]
    #[serial]
    fn test_wait_outbound_after_stop_with_block_on() {
        let session = MixingSession::new(MixerConfig::default()).unwrap();
        let a = session.join_participant(listener("a")).unwrap();
        let slot = session.participant(a).unwrap();
        session.stop().unwrap();
        while slot.take_outbound().is_some() {}

        assert!(tokio_test::block_on(slot.wait_outbound()).is_none());
    }
}
