/// Chunking parameters.
#[derive(Debug, Clone)]
pub struct ChunkingConfig {
    /// Raw samples folded into one chunk (30 accelerometer readings ≈ 3 s at 10 Hz).
    pub chunk_size: usize,

    /// Upper bound on raw samples of each kind pulled from the store per
    /// transaction.
    pub batch_size: usize,

    /// A kind's trailing partial group is chunked on its own once it is this
    /// much older than the newest fetched sample, e.g. after its sensor
    /// stopped. Until then it holds back newer chunks of the other kinds.
    pub stale_group_ms: i64,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 30,
            batch_size: 1000,
            stale_group_ms: 60_000,
        }
    }
}
