// Retry bookkeeping and loop limits for one task.
use std::time::{Duration, Instant};

use crate::agent_engine::state::LoopConfig;

pub struct LoopController {
    config: LoopConfig,
    start_time: Instant,
    failure_count: u32,
    cycles: u32,
}

impl LoopController {
    pub fn new(config: LoopConfig) -> Self {
        Self {
            config,
            start_time: Instant::now(),
            failure_count: 0,
            cycles: 0,
        }
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    /// Count one failed attempt. Returns the new retry count.
    pub fn record_failure(&mut self) -> u32 {
        self.failure_count += 1;
        self.failure_count
    }

    /// The retry budget is spent; the next step is escalation.
    pub fn exhausted(&self) -> bool {
        self.failure_count >= self.config.max_retries
    }

    pub fn clear_failures(&mut self) {
        self.failure_count = 0;
    }

    pub fn record_cycle(&mut self) {
        self.cycles += 1;
    }

    pub fn cycles(&self) -> u32 {
        self.cycles
    }

    /// Cycle or wall-clock limit reached.
    pub fn should_stop(&self) -> bool {
        if let Some(max) = self.config.max_cycles {
            if self.cycles >= max {
                return true;
            }
        }
        match self.config.max_duration_minutes {
            Some(minutes) => self.start_time.elapsed() >= Duration::from_secs(u64::from(minutes) * 60),
            None => false,
        }
    }

    /// Clamp a requested pause to the configured maximum.
    pub fn pause_for(&self, seconds: u64) -> Duration {
        Duration::from_secs(seconds.min(self.config.max_pause_secs))
    }

    /// Fresh counters for a new task.
    pub fn reset(&mut self) {
        self.start_time = Instant::now();
        self.failure_count = 0;
        self.cycles = 0;
    }
}
