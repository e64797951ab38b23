//! Shared constants for sampling and result keys

/// Sampling intervals
pub mod sampling {
    use std::time::Duration;

    /// Default interval between samples of a monitored call
    pub const DEFAULT: Duration = Duration::from_secs(3);

    /// Fast sampling, mostly useful for short calls and tests
    pub const FAST: Duration = Duration::from_millis(100);
}

/// Prefix of the key a monitored call's log is delivered under
pub const DECORATOR_PREFIX: &str = "decorator-";

/// Size of the length header preceding a worker's result frame
pub const FRAME_HEADER_LEN: usize = std::mem::size_of::<u64>();
