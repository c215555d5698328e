/// Thresholds for the rule-based stage classifier.
///
/// These are heuristic tuning knobs, not values derived from a physiological
/// model. Defaults are the reference values the scoring was calibrated with.
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    /// Mean accelerometer magnitude (g) below which movement is `None`.
    pub movement_low_threshold: f64,
    /// Below this movement is `Low`.
    pub movement_medium_threshold: f64,
    /// Below this movement is `Medium`, at or above it `High`.
    pub movement_high_threshold: f64,
    /// Trailing accelerometer chunks averaged into one intensity reading.
    pub movement_window_chunks: usize,

    /// Gyroscope chunks required before the eye-movement proxy can fire.
    pub eye_movement_min_chunks: usize,
    /// Trailing gyroscope chunks considered by the proxy.
    pub eye_movement_window_chunks: usize,
    /// Variance of gyroscope magnitudes above which the proxy is present.
    pub eye_movement_variance_threshold: f64,

    /// Snoring frequency band, inclusive (Hz).
    pub snore_min_hz: f64,
    pub snore_max_hz: f64,
    /// Readings must be louder than this to count toward snoring (dB).
    pub snore_min_decibel: f64,
    /// Share of in-band readings needed to call a chunk snoring.
    pub snore_min_fraction: f64,
    /// Mean loudness above which a chunk is flagged noisy (dB).
    pub high_noise_decibel: f64,
    /// Audio chunks older than this relative to the motion chunk are ignored.
    pub audio_max_age_ms: i64,

    /// Label `High` movement as `Awake` instead of falling through to `Light`.
    pub awake_on_high_movement: bool,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            movement_low_threshold: 0.1,
            movement_medium_threshold: 0.5,
            movement_high_threshold: 1.5,
            movement_window_chunks: 10,
            eye_movement_min_chunks: 5,
            eye_movement_window_chunks: 10,
            eye_movement_variance_threshold: 0.01,
            snore_min_hz: 200.0,
            snore_max_hz: 400.0,
            snore_min_decibel: 40.0,
            snore_min_fraction: 0.10,
            high_noise_decibel: 50.0,
            audio_max_age_ms: 60_000,
            awake_on_high_movement: false,
        }
    }
}
