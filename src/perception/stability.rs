use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::PilotResult;
use crate::perception::types::Screenshot;

/// Settle detection after an action: poll frames until consecutive ones stop
/// changing, instead of relying only on the fixed settle delay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StabilityConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_max_wait")]
    pub max_wait_ms: u64,
    #[serde(default = "default_check_interval")]
    pub check_interval_ms: u64,
    /// Fraction of sampled bytes allowed to differ between "equal" frames.
    #[serde(default = "default_threshold")]
    pub stability_threshold: f64,
    #[serde(default = "default_min_stable_frames")]
    pub min_stable_frames: usize,
}

impl Default for StabilityConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_wait_ms: default_max_wait(),
            check_interval_ms: default_check_interval(),
            stability_threshold: default_threshold(),
            min_stable_frames: default_min_stable_frames(),
        }
    }
}

fn default_max_wait() -> u64 {
    5000
}

fn default_check_interval() -> u64 {
    200
}

fn default_threshold() -> f64 {
    0.02
}

fn default_min_stable_frames() -> usize {
    2
}

pub struct VisualStabilityDetector {
    config: StabilityConfig,
    last_frame: Option<Vec<u8>>,
    stable_frame_count: usize,
}

impl VisualStabilityDetector {
    pub fn new(config: StabilityConfig) -> Self {
        Self {
            config,
            last_frame: None,
            stable_frame_count: 0,
        }
    }

    pub fn reset(&mut self) {
        self.last_frame = None;
        self.stable_frame_count = 0;
    }

    pub fn compute_frame_difference(&self, frame1: &[u8], frame2: &[u8]) -> f64 {
        if frame1.is_empty() || frame2.is_empty() || frame1.len() != frame2.len() {
            return 1.0;
        }

        let sample_step = (frame1.len() / 1000).max(1);
        let mut diff_count = 0usize;
        let mut total_samples = 0usize;

        for i in (0..frame1.len()).step_by(sample_step) {
            if (frame1[i] as i32 - frame2[i] as i32).abs() > 10 {
                diff_count += 1;
            }
            total_samples += 1;
        }

        diff_count as f64 / total_samples as f64
    }

    /// Feed the next frame; true once `min_stable_frames` consecutive frames
    /// stayed under the difference threshold.
    pub fn is_stable(&mut self, frame: &Screenshot) -> bool {
        let raw = frame.image().as_raw();
        if let Some(last) = &self.last_frame {
            if self.compute_frame_difference(last, raw) < self.config.stability_threshold {
                self.stable_frame_count += 1;
            } else {
                self.stable_frame_count = 0;
            }
        }
        self.last_frame = Some(raw.clone());
        self.stable_frame_count >= self.config.min_stable_frames
    }
}

/// Poll `capture_frame` until the screen stops moving. Returns `Ok(false)` on
/// timeout or stop request; capture errors propagate.
pub async fn wait_for_visual_stability<F, Fut>(
    mut capture_frame: F,
    config: &StabilityConfig,
    stop_flag: &Arc<AtomicBool>,
) -> PilotResult<bool>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = PilotResult<Screenshot>>,
{
    let mut detector = VisualStabilityDetector::new(config.clone());
    let start_time = std::time::Instant::now();

    while start_time.elapsed() < Duration::from_millis(config.max_wait_ms) {
        if stop_flag.load(Ordering::Relaxed) {
            return Ok(false);
        }

        let frame = capture_frame().await?;
        if detector.is_stable(&frame) {
            tracing::debug!(elapsed = ?start_time.elapsed(), "screen settled");
            return Ok(true);
        }

        tokio::time::sleep(Duration::from_millis(config.check_interval_ms)).await;
    }

    tracing::debug!(elapsed = ?start_time.elapsed(), "screen did not settle in time");
    Ok(false)
}
