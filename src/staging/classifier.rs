use serde::{Deserialize, Serialize};

use crate::db::AxisSummary;
use crate::staging::config::ClassifierConfig;
use crate::staging::features::{eye_movement_present, AudioAnalysis, MovementIntensity, MovementLevel};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum SleepStage {
    Awake,
    Light,
    Deep,
    Rem,
}

impl SleepStage {
    pub fn is_asleep(self) -> bool {
        !matches!(self, SleepStage::Awake)
    }
}

/// Rule-based stage label for one chunk. First matching rule wins:
///
/// 1. `Deep`: no movement, no eye-movement proxy, not snoring.
/// 2. `Rem`: low movement, eye-movement proxy, snoring.
/// 3. `Light`: low or medium movement.
/// 4. `Light` for everything else, or `Awake` on high movement when
///    [`ClassifierConfig::awake_on_high_movement`] is set.
///
/// Pure function of its inputs.
pub fn classify(
    movement: &MovementIntensity,
    audio: &AudioAnalysis,
    trailing_gyro: &[AxisSummary],
    config: &ClassifierConfig,
) -> SleepStage {
    let eye_movement = eye_movement_present(trailing_gyro, config);

    match movement.level {
        MovementLevel::None if !eye_movement && !audio.is_snoring => SleepStage::Deep,
        MovementLevel::Low if eye_movement && audio.is_snoring => SleepStage::Rem,
        MovementLevel::Low | MovementLevel::Medium => SleepStage::Light,
        MovementLevel::High if config.awake_on_high_movement => SleepStage::Awake,
        _ => SleepStage::Light,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn movement(level: MovementLevel) -> MovementIntensity {
        MovementIntensity {
            level,
            magnitude: 0.0,
            timestamp_ms: 0,
        }
    }

    fn snoring(is_snoring: bool) -> AudioAnalysis {
        AudioAnalysis {
            is_snoring,
            noise_level: 42.0,
            has_high_noise: false,
        }
    }

    fn gyro(x: f64) -> AxisSummary {
        AxisSummary {
            x,
            y: 0.0,
            z: 0.0,
            sample_count: 30,
        }
    }

    fn restless_gyro() -> Vec<AxisSummary> {
        (0..6).map(|i| gyro(if i % 2 == 0 { 0.0 } else { 0.5 })).collect()
    }

    fn still_gyro() -> Vec<AxisSummary> {
        vec![gyro(0.02); 6]
    }

    #[test]
    fn test_still_quiet_chunks_are_deep() {
        let config = ClassifierConfig::default();
        let stage = classify(
            &movement(MovementLevel::None),
            &snoring(false),
            &still_gyro(),
            &config,
        );
        assert_eq!(stage, SleepStage::Deep);
    }

    #[test]
    fn test_deep_needs_every_condition() {
        let config = ClassifierConfig::default();
        let none = movement(MovementLevel::None);
        assert_eq!(
            classify(&none, &snoring(true), &still_gyro(), &config),
            SleepStage::Light
        );
        assert_eq!(
            classify(&none, &snoring(false), &restless_gyro(), &config),
            SleepStage::Light
        );
    }

    #[test]
    fn test_rem_needs_low_movement_eye_proxy_and_snoring() {
        let config = ClassifierConfig::default();
        let low = movement(MovementLevel::Low);
        assert_eq!(
            classify(&low, &snoring(true), &restless_gyro(), &config),
            SleepStage::Rem
        );
        assert_eq!(
            classify(&low, &snoring(false), &restless_gyro(), &config),
            SleepStage::Light
        );
        assert_eq!(
            classify(&low, &snoring(true), &still_gyro(), &config),
            SleepStage::Light
        );
        assert_eq!(
            classify(&movement(MovementLevel::Medium), &snoring(true), &restless_gyro(), &config),
            SleepStage::Light
        );
    }

    #[test]
    fn test_high_movement_falls_through_to_light_by_default() {
        let config = ClassifierConfig::default();
        let high = movement(MovementLevel::High);
        assert_eq!(
            classify(&high, &snoring(false), &still_gyro(), &config),
            SleepStage::Light
        );

        let config = ClassifierConfig {
            awake_on_high_movement: true,
            ..ClassifierConfig::default()
        };
        assert_eq!(
            classify(&high, &snoring(false), &still_gyro(), &config),
            SleepStage::Awake
        );
    }

    #[test]
    fn test_classification_is_deterministic() {
        let config = ClassifierConfig::default();
        let levels = [
            MovementLevel::None,
            MovementLevel::Low,
            MovementLevel::Medium,
            MovementLevel::High,
        ];
        for level in levels {
            for snore in [false, true] {
                for trailing in [still_gyro(), restless_gyro()] {
                    let first = classify(&movement(level), &snoring(snore), &trailing, &config);
                    for _ in 0..5 {
                        assert_eq!(
                            classify(&movement(level), &snoring(snore), &trailing, &config),
                            first
                        );
                    }
                }
            }
        }
    }
}
