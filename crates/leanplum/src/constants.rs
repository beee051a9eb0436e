/// Default endpoint; override per-session with `Leanplum::set_api_path`.
pub const DEFAULT_API_PATH: &str = "https://www.leanplum.com/api";

/// Default batch size threshold.
pub const DEFAULT_BATCH_MAX: usize = 10;

/// Default delay before a partial batch is flushed.
pub const DEFAULT_FLUSH_DELAY_MS: u64 = 5000;
