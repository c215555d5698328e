/// Sleep score weights and the fixed fallback stage split.
#[derive(Debug, Clone)]
pub struct ScoringConfig {
    /// Fallback split of the session when no chunk could be classified.
    pub fallback_light_fraction: f64,
    pub fallback_deep_fraction: f64,
    pub fallback_rem_fraction: f64,

    /// Awakenings tolerated before the per-awakening penalty applies
    pub free_awakenings: u32,
    pub awakening_penalty: f64,

    /// Latency strictly below this earns the bonus (minutes)
    pub fast_latency_min: f64,
    pub fast_latency_bonus: f64,
    /// Latency strictly above this costs the penalty (minutes)
    pub slow_latency_min: f64,
    pub slow_latency_penalty: f64,

    pub high_caffeine_penalty: f64,

    /// Inclusive healthy ranges of the deep and REM share of the night
    pub deep_fraction_range: (f64, f64),
    pub deep_bonus: f64,
    pub rem_fraction_range: (f64, f64),
    pub rem_bonus: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            fallback_light_fraction: 0.55,
            fallback_deep_fraction: 0.20,
            fallback_rem_fraction: 0.25,
            free_awakenings: 2,
            awakening_penalty: 5.0,
            fast_latency_min: 20.0,
            fast_latency_bonus: 3.0,
            slow_latency_min: 45.0,
            slow_latency_penalty: 5.0,
            high_caffeine_penalty: 10.0,
            deep_fraction_range: (0.15, 0.25),
            deep_bonus: 5.0,
            rem_fraction_range: (0.20, 0.30),
            rem_bonus: 5.0,
        }
    }
}
