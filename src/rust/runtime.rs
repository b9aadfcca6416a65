use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};

use crate::classification::ClassificationError;

/// Controls how many threads scan positions are processed on.
///
/// * `threads == 1` runs serially on the calling thread
/// * `threads == 0` uses rayon's global pool
/// * `threads > 1` builds a dedicated pool with that many workers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub threads: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self { threads: 1 }
    }
}

impl RuntimeConfig {
    pub fn serial() -> Self {
        Self { threads: 1 }
    }

    /// Uses the global rayon pool
    pub fn parallel() -> Self {
        Self { threads: 0 }
    }

    pub fn with_threads(threads: usize) -> Self {
        Self { threads }
    }

    pub fn is_serial(&self) -> bool {
        self.threads == 1
    }
}

/// Builds a dedicated pool for `config`, or returns `None` when the work should
/// run serially or on the global pool.
pub fn create_thread_pool(
    config: &RuntimeConfig,
) -> Result<Option<ThreadPool>, ClassificationError> {
    if config.threads <= 1 {
        return Ok(None);
    }
    let pool = ThreadPoolBuilder::new()
        .num_threads(config.threads)
        .thread_name(|i| format!("stemclass-worker-{}", i))
        .build()?;
    Ok(Some(pool))
}
