use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::calibration::Calibration;
use crate::config::{AppConfig, RecoveryConfig};
use crate::device::Device;
use crate::errors::{PilotError, PilotResult};
use crate::navigator::graph::MenuGraph;
use crate::navigator::loop_control::{LoopController, LoopMode};
use crate::navigator::progress::{Branch, ProgressCounts, ProgressRecord};
use crate::navigator::recovery::{self, UnwindReport};
use crate::navigator::state::{
    Action, Cursor, RecoveryReason, StateId, StateKind, TickOutcome, Transition, Trigger,
};
use crate::perception::detector::detect;
use crate::perception::readings::FrameReadings;
use crate::perception::stability::{wait_for_visual_stability, StabilityConfig};
use crate::perception::types::{Point, Screenshot};

#[derive(Debug, Clone)]
pub struct NavigatorSettings {
    pub tick_timeout: u32,
    pub poll_interval: Duration,
    pub settle: Duration,
    pub recovery: RecoveryConfig,
    pub stability: StabilityConfig,
    pub verify: VerifySettings,
    pub mode: LoopMode,
}

/// Re-scan policy for transitions marked `verify`.
#[derive(Debug, Clone, Copy)]
pub struct VerifySettings {
    pub attempts: u32,
    pub delay: Duration,
    pub radius: f64,
}

impl NavigatorSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        let mode = match cfg.navigation.max_run_minutes {
            Some(m) => LoopMode::Timed(Duration::from_secs(m as u64 * 60)),
            None => LoopMode::UntilExhausted,
        };
        Self {
            tick_timeout: cfg.navigation.tick_timeout,
            poll_interval: Duration::from_millis(cfg.navigation.poll_interval_ms),
            settle: Duration::from_millis(cfg.navigation.settle_ms),
            recovery: cfg.recovery.clone(),
            stability: cfg.settle.clone(),
            verify: VerifySettings {
                attempts: cfg.navigation.verify_attempts,
                delay: Duration::from_millis(cfg.navigation.verify_delay_ms),
                radius: cfg.navigation.verify_radius_px as f64,
            },
            mode,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NavigatorStats {
    pub ticks: u64,
    pub transitions: u64,
    pub swipes: u64,
    pub recoveries: u32,
    pub battles: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunEnd {
    Exhausted,
    Stopped,
    TimeLimit,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub end: RunEnd,
    pub stats: NavigatorStats,
    pub progress: ProgressCounts,
    pub elapsed: Duration,
}

/// Which states a frame confirms, out of some candidate set.
enum Sighting {
    One(StateId),
    Many(Vec<String>),
    None,
}

/// What one frame means for the current state. Computed without side effects.
enum Decision {
    Ambiguous {
        during: &'static str,
        candidates: Vec<String>,
    },
    Fire {
        at: StateId,
        transition: Transition,
        point: Option<Point>,
        fallback: Option<Transition>,
        scrollable: bool,
    },
    Idle {
        at: StateId,
        fallback: Option<Transition>,
        scrollable: bool,
    },
    NoRoute {
        at: StateId,
    },
}

/// Screenshot-driven walker over a `MenuGraph`. One per device; owns the
/// cursor and the progress record.
pub struct Navigator {
    device: Arc<dyn Device>,
    graph: MenuGraph,
    calibration: Calibration,
    progress: ProgressRecord,
    settings: NavigatorSettings,
    loop_ctrl: LoopController,
    stop: Arc<AtomicBool>,
    cursor: Cursor,
    stats: NavigatorStats,
}

impl Navigator {
    pub fn new(
        device: Arc<dyn Device>,
        graph: MenuGraph,
        calibration: Calibration,
        progress: ProgressRecord,
        settings: NavigatorSettings,
        stop: Arc<AtomicBool>,
    ) -> Self {
        let loop_ctrl = LoopController::new(settings.mode);
        Self {
            device,
            graph,
            calibration,
            progress,
            settings,
            loop_ctrl,
            stop,
            cursor: Cursor::Unsynced,
            stats: NavigatorStats::default(),
        }
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    /// Force the cursor, e.g. back to `Unsynced` after a reconnect so the
    /// next tick runs the resume pass.
    pub fn set_cursor(&mut self, cursor: Cursor) {
        self.cursor = cursor;
        self.loop_ctrl.on_transition();
    }

    pub fn progress(&self) -> &ProgressRecord {
        &self.progress
    }

    pub fn progress_mut(&mut self) -> &mut ProgressRecord {
        &mut self.progress
    }

    pub fn stats(&self) -> NavigatorStats {
        self.stats
    }

    fn name(&self, id: StateId) -> &str {
        self.graph.name(id)
    }

    /// Tick until every branch is exhausted, the stop flag is raised, or the
    /// run time limit passes. Faults propagate.
    pub async fn run(&mut self) -> PilotResult<RunSummary> {
        let end = loop {
            if self.stop.load(Ordering::Relaxed) {
                tracing::info!("stop requested");
                break RunEnd::Stopped;
            }
            if self.loop_ctrl.should_stop() {
                tracing::info!(elapsed = ?self.loop_ctrl.elapsed(), "run time limit reached");
                break RunEnd::TimeLimit;
            }

            match self.tick().await? {
                TickOutcome::Finished => break RunEnd::Exhausted,
                TickOutcome::Waiting { .. } => tokio::time::sleep(self.settings.poll_interval).await,
                _ => {}
            }
        };

        let summary = RunSummary {
            end,
            stats: self.stats,
            progress: self.progress.counts(),
            elapsed: self.loop_ctrl.elapsed(),
        };
        tracing::info!(
            end = ?summary.end,
            battles = summary.stats.battles,
            recoveries = summary.stats.recoveries,
            exhausted = summary.progress.exhausted,
            "navigator finished"
        );
        Ok(summary)
    }

    /// One capture → detect → decide → act cycle.
    pub async fn tick(&mut self) -> PilotResult<TickOutcome> {
        self.stats.ticks += 1;

        let Some(branch) = self.progress.next_branch().cloned() else {
            tracing::info!("every branch exhausted");
            return Ok(TickOutcome::Finished);
        };

        let current = match self.cursor {
            Cursor::Error => {
                return Err(PilotError::Navigation(
                    "navigator position is lost; recovery was exhausted".into(),
                ))
            }
            Cursor::Unsynced => return self.resume().await,
            Cursor::At(id) => id,
        };

        let goal = self.graph.leaf_for(&branch).ok_or_else(|| {
            PilotError::Navigation(format!("no leaf state for branch {branch}"))
        })?;

        let shot = self.device.capture().await?;
        let decision = self.decide(current, goal, &shot)?;

        match decision {
            Decision::Ambiguous { during, candidates } => {
                tracing::warn!(state = self.name(current), during, candidates = %candidates.join(", "), "ambiguous detection");
                self.recover(RecoveryReason::Ambiguous { during, candidates }).await
            }
            Decision::NoRoute { at } => {
                self.relocate(current, at);
                let state = self.name(at).to_string();
                self.recover(RecoveryReason::NoRoute { state }).await
            }
            Decision::Fire {
                at,
                transition,
                point,
                fallback,
                scrollable,
            } => {
                self.relocate(current, at);
                let point = match (&transition.trigger, point) {
                    (Trigger::Target(name), Some(first)) if transition.verify => {
                        match self.confirm_detection(name, first).await? {
                            Some(p) => Some(p),
                            None => return self.idle(at, goal, &branch, fallback, scrollable).await,
                        }
                    }
                    _ => point,
                };
                self.fire(at, &transition, point, &branch, goal).await
            }
            Decision::Idle { at, fallback, scrollable } => {
                self.relocate(current, at);
                self.idle(at, goal, &branch, fallback, scrollable).await
            }
        }
    }

    // ── Decide ──────────────────────────────────────────────────────────────

    fn decide(&self, current: StateId, goal: StateId, shot: &Screenshot) -> PilotResult<Decision> {
        let mut readings = FrameReadings::new(shot, &self.calibration);

        // Locate: the current state or one of its successors, never two.
        let mut candidates = vec![current];
        candidates.extend(self.graph.successors(current));
        let mut confirmed = Vec::new();
        for id in candidates {
            if self.graph.is_observable(id, &self.calibration)
                && readings.found(self.graph.state(id).confirm_target())?
            {
                confirmed.push(id);
            }
        }
        let at = match confirmed.as_slice() {
            [] => current,
            [one] => *one,
            many => {
                return Ok(Decision::Ambiguous {
                    during: "locate",
                    candidates: many.iter().map(|id| self.name(*id).to_string()).collect(),
                })
            }
        };

        let state = self.graph.state(at);
        let eligible: Vec<&Transition> = if at == goal {
            state.transitions.iter().filter(|t| t.engage).collect()
        } else {
            match self.graph.next_hop(at, goal) {
                Some(hop) => state
                    .transitions
                    .iter()
                    .filter(|t| !t.engage && t.to == hop)
                    .collect(),
                None => Vec::new(),
            }
        };
        if eligible.is_empty() {
            return Ok(Decision::NoRoute { at });
        }

        let screen_ok = !self.graph.is_observable(at, &self.calibration)
            || readings.found(state.confirm_target())?;
        let mut fired: Vec<(&Transition, Option<Point>)> = Vec::new();
        for t in eligible.iter().copied() {
            let hit = match &t.trigger {
                Trigger::Target(name) => readings.get(name)?.filter(|r| r.found).map(|r| r.point),
                Trigger::Screen => screen_ok.then_some(None),
                Trigger::Timeout => None,
            };
            if let Some(point) = hit {
                fired.push((t, point));
            }
        }

        let fallback = eligible
            .iter()
            .find(|t| t.trigger == Trigger::Timeout)
            .map(|t| (*t).clone());
        let scrollable = eligible.iter().any(|t| t.scrollable);
        Ok(match fired.as_slice() {
            [] => Decision::Idle {
                at,
                fallback,
                scrollable,
            },
            [(t, point)] => Decision::Fire {
                at,
                transition: (*t).clone(),
                point: *point,
                fallback,
                scrollable,
            },
            many => Decision::Ambiguous {
                during: "trigger",
                candidates: many
                    .iter()
                    .map(|(t, _)| format!("{} via {:?}", self.name(t.to), t.trigger))
                    .collect(),
            },
        })
    }

    fn sync_pass(&self, shot: &Screenshot) -> PilotResult<Sighting> {
        let mut readings = FrameReadings::new(shot, &self.calibration);
        let observable = self
            .graph
            .states()
            .filter(|s| self.graph.is_observable(s.id, &self.calibration))
            .map(|s| s.confirm_target());
        let confirmed: Vec<StateId> = readings
            .detect_all(observable)?
            .into_iter()
            .filter(|(_, r)| r.found)
            .filter_map(|(name, _)| self.graph.find(name))
            .collect();
        Ok(match confirmed.as_slice() {
            [] => Sighting::None,
            [one] => Sighting::One(*one),
            many => Sighting::Many(many.iter().map(|id| self.name(*id).to_string()).collect()),
        })
    }

    /// Re-scan `target` until a sighting lands within the verify radius of
    /// `first`. `None` means every re-scan missed or moved.
    async fn confirm_detection(&self, target: &str, first: Point) -> PilotResult<Option<Point>> {
        let verify = self.settings.verify;
        let Some(wanted) = self.calibration.target(target) else {
            return Ok(Some(first));
        };
        for attempt in 1..=verify.attempts {
            if !verify.delay.is_zero() {
                tokio::time::sleep(verify.delay).await;
            }
            let shot = self.device.capture().await?;
            let again = detect(&shot, wanted)?;
            match again.point {
                Some(p) if again.found && p.distance(first) <= verify.radius => {
                    tracing::debug!(name = target, attempt, x = p.x, y = p.y, "detection confirmed");
                    return Ok(Some(p));
                }
                Some(p) if again.found => {
                    tracing::debug!(name = target, attempt, moved = p.distance(first), "detection moved");
                }
                _ => tracing::debug!(name = target, attempt, "detection vanished"),
            }
        }
        tracing::warn!(
            name = target,
            attempts = verify.attempts,
            "detection failed verification; treating as false positive"
        );
        Ok(None)
    }

    fn relocate(&mut self, believed: StateId, actual: StateId) {
        if believed != actual {
            tracing::warn!(from = self.name(believed), to = self.name(actual), "cursor drift corrected");
            self.cursor = Cursor::At(actual);
            self.loop_ctrl.on_transition();
        }
    }

    // ── Act ─────────────────────────────────────────────────────────────────

    async fn fire(
        &mut self,
        from: StateId,
        transition: &Transition,
        point: Option<Point>,
        branch: &Branch,
        goal: StateId,
    ) -> PilotResult<TickOutcome> {
        let to = transition.to;
        tracing::info!(from = self.name(from), to = self.name(to), action = %transition.action, "transition");

        self.execute(&transition.action, point).await?;
        self.cursor = Cursor::At(to);
        self.loop_ctrl.on_transition();
        self.stats.transitions += 1;
        self.on_arrival(transition, goal, branch)?;
        self.settle().await?;

        Ok(TickOutcome::Acted { from, to })
    }

    async fn idle(
        &mut self,
        at: StateId,
        goal: StateId,
        branch: &Branch,
        fallback: Option<Transition>,
        scrollable: bool,
    ) -> PilotResult<TickOutcome> {
        let idle_ticks = self.loop_ctrl.record_idle();
        let (budget, scroll, name) = {
            let s = self.graph.state(at);
            (
                s.tick_budget.unwrap_or(self.settings.tick_timeout),
                s.scroll.clone(),
                s.name.clone(),
            )
        };
        if idle_ticks < budget {
            tracing::debug!(state = %name, idle_ticks, budget, "waiting for trigger");
            return Ok(TickOutcome::Waiting { idle_ticks });
        }

        if let Some(t) = fallback {
            tracing::info!(state = %name, idle_ticks, "tick budget spent; taking fallback transition");
            return self.fire(at, &t, None, branch, goal).await;
        }

        if let (true, Some(policy)) = (scrollable, scroll) {
            if self.loop_ctrl.swipes() < policy.max_swipes {
                let gesture = self.calibration.gesture(&policy.gesture)?;
                self.device
                    .swipe(gesture.start, gesture.end, Duration::from_millis(gesture.total_ms()))
                    .await?;
                let swipes = self.loop_ctrl.record_swipe();
                self.stats.swipes += 1;
                tracing::info!(state = %name, swipes, max = policy.max_swipes, "scrolled");
                self.settle().await?;
                return Ok(TickOutcome::Scrolled { state: at, swipes });
            }
        }

        if at == goal {
            self.progress.exhaust(branch);
            self.loop_ctrl.on_transition();
            self.loop_ctrl.on_progress();
            if self.progress.is_difficulty_exhausted(&branch.difficulty) {
                tracing::info!(difficulty = %branch.difficulty, "difficulty complete");
            }
            return Ok(TickOutcome::BranchClosed(branch.clone()));
        }

        tracing::warn!(state = %name, idle_ticks, "navigation timeout");
        self.recover(RecoveryReason::Timeout { state: name }).await
    }

    /// Progress bookkeeping after `transition` fired. Only a first visit to
    /// a leaf or a victory counts; a battle that ran out its tick budget is
    /// a failure like any other navigation timeout.
    fn on_arrival(&mut self, transition: &Transition, goal: StateId, branch: &Branch) -> PilotResult<()> {
        let to = transition.to;
        if to == goal && self.progress.begin(branch) {
            self.loop_ctrl.on_progress();
        }
        if self.graph.state(to).kind != StateKind::BattleResult {
            return Ok(());
        }
        if transition.trigger == Trigger::Timeout {
            tracing::warn!(branch = %branch, "battle timed out without a victory flash");
            let reason = RecoveryReason::Timeout {
                state: self.name(to).to_string(),
            };
            return self.record_failure(&reason);
        }
        self.stats.battles += 1;
        self.loop_ctrl.on_progress();
        tracing::info!(branch = %branch, battles = self.stats.battles, "battle completed");
        Ok(())
    }

    /// Count one failure against the no-progress streak. Past the limit the
    /// cursor is lost.
    fn record_failure(&mut self, reason: &RecoveryReason) -> PilotResult<()> {
        let streak = self.loop_ctrl.record_recovery();
        let limit = self.settings.recovery.max_without_progress;
        if streak > limit {
            self.cursor = Cursor::Error;
            tracing::error!(streak, limit, reason = %reason, "too many failures without progress");
            return Err(PilotError::RecoveryExhausted {
                attempts: streak,
                reason: format!("no progress across {limit} failures; last: {reason}"),
            });
        }
        Ok(())
    }

    async fn execute(&self, action: &Action, detected: Option<Point>) -> PilotResult<()> {
        for step in action.steps() {
            match step {
                Action::Tap(name) => {
                    let p = self.calibration.point(name)?;
                    self.device.tap(p).await?;
                }
                Action::TapTarget(name) => {
                    let p = match detected {
                        Some(p) => p,
                        None => self.calibration.point(name)?,
                    };
                    self.device.tap(p).await?;
                }
                Action::Swipe(name) => {
                    let g = self.calibration.gesture(name)?;
                    self.device
                        .swipe(g.start, g.end, Duration::from_millis(g.total_ms()))
                        .await?;
                }
                Action::Wait(d) => {
                    if !d.is_zero() {
                        tokio::time::sleep(*d).await;
                    }
                }
                Action::Key(k) => self.device.send_key(*k).await?,
                Action::Unwind => {
                    let report = self.unwind().await?;
                    tracing::debug!(presses = report.presses, reached_root = report.reached_root, "unwound");
                }
                Action::Sequence(_) => {}
            }
        }
        Ok(())
    }

    async fn settle(&self) -> PilotResult<()> {
        if !self.settings.settle.is_zero() {
            tokio::time::sleep(self.settings.settle).await;
        }
        if self.settings.stability.enabled {
            let device = self.device.as_ref();
            wait_for_visual_stability(move || device.capture(), &self.settings.stability, &self.stop)
                .await?;
        }
        Ok(())
    }

    // ── Resume & recovery ───────────────────────────────────────────────────

    async fn resume(&mut self) -> PilotResult<TickOutcome> {
        let shot = self.device.capture().await?;
        match self.sync_pass(&shot)? {
            Sighting::One(id) => {
                tracing::info!(state = self.name(id), "resumed");
                self.cursor = Cursor::At(id);
                self.loop_ctrl.on_transition();
                Ok(TickOutcome::Resynced(id))
            }
            Sighting::Many(candidates) => {
                self.recover(RecoveryReason::Ambiguous {
                    during: "resume",
                    candidates,
                })
                .await
            }
            Sighting::None => self.recover(RecoveryReason::Unsynced).await,
        }
    }

    async fn unwind(&self) -> PilotResult<UnwindReport> {
        let root = self.graph.state(self.graph.root());
        let root_target = self.calibration.target(root.confirm_target());
        recovery::unwind(self.device.as_ref(), &self.settings.recovery, |shot| match root_target {
            Some(t) => Ok(detect(shot, t)?.found),
            None => Ok(false),
        })
        .await
    }

    /// Unwind to the root and resynchronise. Bounded by `max_attempts` per
    /// call and by `max_without_progress` consecutive calls.
    async fn recover(&mut self, reason: RecoveryReason) -> PilotResult<TickOutcome> {
        self.stats.recoveries += 1;
        self.record_failure(&reason)?;

        tracing::warn!(reason = %reason, "invoking recovery protocol");
        let root = self.graph.root();
        let root_observable = self.graph.is_observable(root, &self.calibration);
        let attempts = self.settings.recovery.max_attempts;

        for attempt in 1..=attempts {
            let report = self.unwind().await?;
            let shot = self.device.capture().await?;
            match self.sync_pass(&shot)? {
                Sighting::One(id) => {
                    tracing::info!(
                        attempt,
                        landed = self.name(id),
                        presses = report.presses,
                        early = report.reached_root,
                        "recovered"
                    );
                    self.cursor = Cursor::At(id);
                    self.loop_ctrl.on_transition();
                    return Ok(TickOutcome::Recovered { reason, landed: id });
                }
                Sighting::None if !root_observable => {
                    tracing::info!(attempt, presses = report.presses, "recovered; assuming root");
                    self.cursor = Cursor::At(root);
                    self.loop_ctrl.on_transition();
                    return Ok(TickOutcome::Recovered { reason, landed: root });
                }
                Sighting::None => {
                    tracing::warn!(attempt, "no known screen after unwind");
                }
                Sighting::Many(candidates) => {
                    tracing::warn!(attempt, candidates = %candidates.join(", "), "ambiguous screen after unwind");
                }
            }
        }

        self.cursor = Cursor::Error;
        tracing::error!(attempts, reason = %reason, "recovery exhausted");
        Err(PilotError::RecoveryExhausted {
            attempts,
            reason: reason.to_string(),
        })
    }
}
