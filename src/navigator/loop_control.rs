use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopMode {
    /// Run until every branch is exhausted.
    UntilExhausted,
    /// Stop cleanly once the duration has elapsed.
    Timed(Duration),
}

/// Per-state tick counters and the run-level stop conditions.
pub struct LoopController {
    mode: LoopMode,
    start_time: Instant,
    idle_ticks: u32,
    swipes: u32,
    recoveries_without_progress: u32,
}

impl LoopController {
    pub fn new(mode: LoopMode) -> Self {
        Self {
            mode,
            start_time: Instant::now(),
            idle_ticks: 0,
            swipes: 0,
            recoveries_without_progress: 0,
        }
    }

    pub fn should_stop(&self) -> bool {
        match self.mode {
            LoopMode::UntilExhausted => false,
            LoopMode::Timed(max) => self.start_time.elapsed() >= max,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Count a tick where nothing fired; returns the new count.
    pub fn record_idle(&mut self) -> u32 {
        self.idle_ticks += 1;
        self.idle_ticks
    }

    /// A scroll restarts the idle budget but not the swipe budget.
    pub fn record_swipe(&mut self) -> u32 {
        self.swipes += 1;
        self.idle_ticks = 0;
        self.swipes
    }

    /// The cursor moved: both per-state budgets start over.
    pub fn on_transition(&mut self) {
        self.idle_ticks = 0;
        self.swipes = 0;
    }

    pub fn on_progress(&mut self) {
        self.recoveries_without_progress = 0;
    }

    pub fn record_recovery(&mut self) -> u32 {
        self.on_transition();
        self.recoveries_without_progress += 1;
        self.recoveries_without_progress
    }

    pub fn idle_ticks(&self) -> u32 {
        self.idle_ticks
    }

    pub fn swipes(&self) -> u32 {
        self.swipes
    }
}
