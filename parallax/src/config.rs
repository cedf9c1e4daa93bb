// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::error::Error;

/// Scheduler configuration. Arrives fully populated; the runtime never reads
/// the environment or command line itself.
#[derive(Debug, Clone)]
pub struct Config {
    /// Number of worker threads; 0 means one per available CPU.
    pub threads: usize,
    /// Size of a user-level thread stack in bytes.
    pub stack_size: usize,
    /// Maximum number of free stacks cached per worker. Overflow trims the
    /// cache back to half the limit.
    pub stack_cache_limit: usize,
    /// Deque depth above which a worker switches to work-first spawning.
    pub wf_threshold: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            threads: 0,
            stack_size: 32 * 1024,
            stack_cache_limit: 32,
            wf_threshold: 16,
        }
    }
}

impl Config {
    /// Resolves `threads == 0` to the available parallelism.
    pub(crate) fn worker_count(&self) -> usize {
        if self.threads != 0 {
            self.threads
        } else {
            std::thread::available_parallelism().map_or(1, |n| n.get())
        }
    }

    pub(crate) fn validate(&self) -> Result<(), Error> {
        if self.stack_size < fiber::MIN_STACK_SIZE {
            return Err(Error::Config(format!(
                "stack size {} below the minimum of {}",
                self.stack_size,
                fiber::MIN_STACK_SIZE
            )));
        }
        if self.stack_cache_limit == 0 {
            return Err(Error::Config(
                "stack cache limit must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
