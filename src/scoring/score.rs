use anyhow::Result;

use crate::db::StageHours;
use crate::scoring::config::ScoringConfig;
use crate::settings::{CaffeineHabit, UserProfile};

#[derive(Debug, Clone, Copy)]
pub struct ScoreInputs {
    pub stages: StageHours,
    pub awake_count: u32,
    pub sleep_latency_min: f64,
}

/// 0-100 sleep quality score.
///
/// Base is the share of the sleep goal actually slept, capped at 100.
/// Adjustments follow for awakenings, latency, caffeine habit and the deep
/// and REM shares of the night, then the result is clamped and rounded.
/// A non-positive or non-finite goal is rejected.
pub fn compute_sleep_score(
    inputs: &ScoreInputs,
    profile: &UserProfile,
    config: &ScoringConfig,
) -> Result<u8> {
    profile.validate()?;

    let asleep = finite_or_zero(inputs.stages.asleep()).max(0.0);
    let mut score = (100.0 * asleep / profile.sleep_goal_hours).min(100.0);

    let extra_awakenings = inputs.awake_count.saturating_sub(config.free_awakenings);
    score -= config.awakening_penalty * extra_awakenings as f64;

    let latency = finite_or_zero(inputs.sleep_latency_min);
    if latency < config.fast_latency_min {
        score += config.fast_latency_bonus;
    }
    if latency > config.slow_latency_min {
        score -= config.slow_latency_penalty;
    }

    if profile.caffeine_habit == CaffeineHabit::High {
        score -= config.high_caffeine_penalty;
    }

    let total = finite_or_zero(inputs.stages.total());
    if total > 0.0 {
        let deep_fraction = inputs.stages.deep / total;
        let rem_fraction = inputs.stages.rem / total;
        if within(deep_fraction, config.deep_fraction_range) {
            score += config.deep_bonus;
        }
        if within(rem_fraction, config.rem_fraction_range) {
            score += config.rem_bonus;
        }
    }

    Ok(score.clamp(0.0, 100.0).round() as u8)
}

fn within(value: f64, (low, high): (f64, f64)) -> bool {
    value >= low && value <= high
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}
