use std::time::Duration;

use crate::config::RecoveryConfig;
use crate::device::{Device, KeyCode};
use crate::errors::PilotResult;
use crate::perception::types::Screenshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnwindReport {
    pub presses: u32,
    pub polls: u32,
    /// The poll check recognised the root before the press budget ran out.
    pub reached_root: bool,
}

/// Press BACK up to `back_presses` times, `press_delay_ms` apart. Every
/// `poll_every` presses a frame is captured and handed to `at_root`; the
/// unwind stops early once it returns `Ok(true)`.
pub async fn unwind<F>(device: &dyn Device, cfg: &RecoveryConfig, mut at_root: F) -> PilotResult<UnwindReport>
where
    F: FnMut(&Screenshot) -> PilotResult<bool>,
{
    let delay = Duration::from_millis(cfg.press_delay_ms);
    let mut report = UnwindReport {
        presses: 0,
        polls: 0,
        reached_root: false,
    };

    tracing::info!(device = device.endpoint(), presses = cfg.back_presses, "unwinding to root");
    for i in 1..=cfg.back_presses {
        device.send_key(KeyCode::Back).await?;
        report.presses = i;
        tokio::time::sleep(delay).await;

        if i % cfg.poll_every == 0 && i < cfg.back_presses {
            let shot = device.capture().await?;
            report.polls += 1;
            tracing::debug!(presses = i, "unwind poll");
            if at_root(&shot)? {
                report.reached_root = true;
                break;
            }
        }
    }
    Ok(report)
}
