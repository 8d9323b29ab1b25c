// Configuration and input validation for the mixing core
//
// Everything here returns `anyhow::Result` with a message meant for an
// operator; the session converts failures into `MixerError::InvalidConfig`.

use anyhow::Result;

use crate::audio::types::{MixerConfig, MAX_SAMPLE_RATE, MAX_TICK_SAMPLES, MIN_SAMPLE_RATE};
use crate::audio::utils::tick_samples;

/// Validate a participant identifier supplied by the signaling layer
pub fn validate_participant_id(participant_id: &str) -> Result<()> {
    if participant_id.is_empty() {
        return Err(anyhow::anyhow!("Participant ID cannot be empty"));
    }
    if participant_id.len() > 128 {
        return Err(anyhow::anyhow!(
            "Participant ID too long: maximum 128 characters allowed, got {}",
            participant_id.len()
        ));
    }
    if let Some(c) = participant_id
        .chars()
        .find(|c| c.is_whitespace() || c.is_control())
    {
        return Err(anyhow::anyhow!(
            "Participant ID contains invalid character {:?}",
            c
        ));
    }
    Ok(())
}

/// Validate a native or internal sample rate
pub fn validate_sample_rate(sample_rate: u32) -> Result<()> {
    if !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&sample_rate) {
        return Err(anyhow::anyhow!(
            "Invalid sample rate: {} (must be {}-{} Hz)",
            sample_rate,
            MIN_SAMPLE_RATE,
            MAX_SAMPLE_RATE
        ));
    }
    Ok(())
}

/// Validate that `sample_rate` at `interval_ms` fits the tick buffer ceiling
pub fn validate_rate_for_interval(sample_rate: u32, interval_ms: u32) -> Result<()> {
    validate_sample_rate(sample_rate)?;
    let samples = tick_samples(sample_rate, interval_ms);
    if samples > MAX_TICK_SAMPLES {
        return Err(anyhow::anyhow!(
            "{} Hz at {} ms needs {} samples per tick (maximum: {})",
            sample_rate,
            interval_ms,
            samples,
            MAX_TICK_SAMPLES
        ));
    }
    Ok(())
}

/// Validate mixer configuration before a session is created
pub fn validate_config(config: &MixerConfig) -> Result<()> {
    if config.mixing_interval_ms < 10
        || config.mixing_interval_ms > 100
        || config.mixing_interval_ms % 10 != 0
    {
        return Err(anyhow::anyhow!(
            "Invalid mixing interval: {} ms (must be a multiple of 10 between 10 and 100)",
            config.mixing_interval_ms
        ));
    }

    validate_rate_for_interval(config.internal_rate, config.mixing_interval_ms)?;
    if let Some(locked) = config.locked_rate {
        validate_rate_for_interval(locked, config.mixing_interval_ms)?;
    }
    if let Some(max) = config.max_internal_rate {
        validate_rate_for_interval(max, config.mixing_interval_ms)?;
    }

    if config.stats_interval_ticks == 0 {
        return Err(anyhow::anyhow!("Statistics interval must be at least one tick"));
    }
    if config.backlog_ticks == 0 {
        return Err(anyhow::anyhow!("Backlog limit must be at least one tick"));
    }

    if config.silence_threshold_ms < config.talk_threshold_ms {
        return Err(anyhow::anyhow!(
            "Silence threshold ({} ms) must not be shorter than talk threshold ({} ms)",
            config.silence_threshold_ms,
            config.talk_threshold_ms
        ));
    }
    if config.silence_threshold_db.is_nan() || config.silence_threshold_db > 0.0 {
        return Err(anyhow::anyhow!(
            "Silence threshold must be a dBFS value at or below 0, got {}",
            config.silence_threshold_db
        ));
    }

    Ok(())
}

/// Validate a volume level (0 = unchanged, ±n = multiply/divide by n)
pub fn validate_volume(level: i32) -> Result<()> {
    if !(-4..=4).contains(&level) {
        return Err(anyhow::anyhow!(
            "Volume level {} out of range (must be -4 to 4)",
            level
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_participant_id_rules() {
        assert!(validate_participant_id("sip:alice@example.com").is_ok());
        assert!(validate_participant_id("").is_err());
        assert!(validate_participant_id("has space").is_err());
        assert!(validate_participant_id(&"x".repeat(129)).is_err());
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&MixerConfig::default()).is_ok());
    }

    #[test]
    fn test_interval_must_be_multiple_of_ten() {
        let config = MixerConfig {
            mixing_interval_ms: 15,
            ..MixerConfig::default()
        };
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_ceiling_is_enforced() {
        let config = MixerConfig {
            internal_rate: 192000,
            mixing_interval_ms: 100,
            ..MixerConfig::default()
        };
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("samples per tick"));
    }

    #[test]
    fn test_hysteresis_order() {
        let config = MixerConfig {
            talk_threshold_ms: 500,
            silence_threshold_ms: 100,
            ..MixerConfig::default()
        };
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_volume_range() {
        assert!(validate_volume(0).is_ok());
        assert!(validate_volume(-4).is_ok());
        assert!(validate_volume(5).is_err());
    }
}
