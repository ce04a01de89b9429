//! Test doubles: a stack-based simulated device and synthetic calibration.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use image::{Rgb, RgbImage};

use crate::calibration::{Calibration, CalibrationEntry, Gesture};
use crate::config::{AppConfig, NavigationConfig, RecoveryConfig, TopologyConfig};
use crate::device::{Device, KeyCode};
use crate::errors::{PilotError, PilotResult};
use crate::navigator::engine::{Navigator, NavigatorSettings};
use crate::navigator::graph::{MenuGraph, VICTORY_TARGET};
use crate::navigator::progress::ProgressRecord;
use crate::navigator::state::NavigationState;
use crate::perception::stability::StabilityConfig;
use crate::perception::types::{DetectionTarget, HsvRange, Point, Region, Screenshot};

pub const FRAME_W: u32 = 640;
pub const FRAME_H: u32 = 400;
pub const CELL: u32 = 40;
const SQUARE: u32 = 20;
const GREEN: Rgb<u8> = Rgb([0, 255, 0]);
const WHITE: Rgb<u8> = Rgb([250, 250, 250]);

pub fn cell_region(index: usize) -> Region {
    let cols = (FRAME_W / CELL) as usize;
    Region::new(
        (index % cols) as u32 * CELL,
        (index / cols) as u32 * CELL,
        CELL,
        CELL,
    )
}

/// Draw the 20×20 green marker of `index` (area 400).
pub fn paint_cell(img: &mut RgbImage, index: usize) {
    let r = cell_region(index);
    for y in r.y + 10..r.y + 10 + SQUARE {
        for x in r.x + 10..r.x + 10 + SQUARE {
            img.put_pixel(x, y, GREEN);
        }
    }
}

pub fn frame_with(cells: &[usize]) -> Screenshot {
    let mut img = RgbImage::new(FRAME_W, FRAME_H);
    for c in cells {
        paint_cell(&mut img, *c);
    }
    Screenshot::from_rgb(img)
}

pub fn green_target(region: Region) -> DetectionTarget {
    DetectionTarget::new(
        "",
        vec![HsvRange::new([50, 100, 100], [70, 255, 255])],
        region,
        [150, 3000],
    )
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCall {
    Capture,
    Tap(Point),
    Swipe(Point, Point),
    Key(KeyCode),
    Reconnect,
}

#[derive(Default)]
struct SimState {
    stack: Vec<usize>,
    overlay: Vec<usize>,
    script: VecDeque<Vec<usize>>,
    blank_captures: u32,
    failing_captures: u32,
    white: bool,
    calls: Vec<DeviceCall>,
}

/// Renders the cell on top of a screen stack. BACK pops the stack down to
/// its bottom entry.
pub struct SimulatedDevice {
    state: Mutex<SimState>,
}

impl SimulatedDevice {
    pub fn new(stack: Vec<usize>) -> Self {
        Self {
            state: Mutex::new(SimState {
                stack,
                ..Default::default()
            }),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut SimState) -> R) -> R {
        let mut guard = self.state.lock().unwrap();
        f(&mut guard)
    }

    pub fn calls(&self) -> Vec<DeviceCall> {
        self.with(|s| s.calls.clone())
    }

    pub fn count(&self, pred: impl Fn(&DeviceCall) -> bool) -> usize {
        self.with(|s| s.calls.iter().filter(|c| pred(c)).count())
    }

    pub fn clear_calls(&self) {
        self.with(|s| s.calls.clear())
    }

    pub fn stack(&self) -> Vec<usize> {
        self.with(|s| s.stack.clone())
    }

    pub fn set_stack(&self, stack: Vec<usize>) {
        self.with(|s| s.stack = stack)
    }

    /// Extra cells drawn on every frame.
    pub fn set_overlay(&self, cells: Vec<usize>) {
        self.with(|s| s.overlay = cells)
    }

    /// Cells drawn on the next frame only.
    pub fn show_once(&self, cells: Vec<usize>) {
        self.script(vec![cells])
    }

    /// Extra cells for the next frames, one entry per capture.
    pub fn script(&self, frames: Vec<Vec<usize>>) {
        self.with(|s| s.script.extend(frames))
    }

    pub fn blank_next(&self, n: u32) {
        self.with(|s| s.blank_captures = n)
    }

    pub fn fail_next(&self, n: u32) {
        self.with(|s| s.failing_captures = n)
    }

    pub fn set_white(&self, white: bool) {
        self.with(|s| s.white = white)
    }
}

#[async_trait]
impl Device for SimulatedDevice {
    fn endpoint(&self) -> &str {
        "sim"
    }

    async fn capture(&self) -> PilotResult<Screenshot> {
        self.with(|s| {
            s.calls.push(DeviceCall::Capture);
            if s.failing_captures > 0 {
                s.failing_captures -= 1;
                return Err(PilotError::Device("simulated transport fault".into()));
            }
            let bg = if s.white { WHITE } else { Rgb([0, 0, 0]) };
            let mut img = RgbImage::from_pixel(FRAME_W, FRAME_H, bg);
            if s.blank_captures > 0 {
                s.blank_captures -= 1;
                return Ok(Screenshot::from_rgb(img));
            }
            if let Some(top) = s.stack.last() {
                paint_cell(&mut img, *top);
            }
            let extra = s.script.pop_front().unwrap_or_default();
            for c in s.overlay.iter().chain(extra.iter()) {
                paint_cell(&mut img, *c);
            }
            Ok(Screenshot::from_rgb(img))
        })
    }

    async fn tap(&self, at: Point) -> PilotResult<()> {
        self.with(|s| s.calls.push(DeviceCall::Tap(at)));
        Ok(())
    }

    async fn swipe(&self, from: Point, to: Point, _duration: Duration) -> PilotResult<()> {
        self.with(|s| s.calls.push(DeviceCall::Swipe(from, to)));
        Ok(())
    }

    async fn send_key(&self, key: KeyCode) -> PilotResult<()> {
        self.with(|s| {
            s.calls.push(DeviceCall::Key(key));
            if key == KeyCode::Back && s.stack.len() > 1 {
                s.stack.pop();
            }
        });
        Ok(())
    }

    async fn reconnect(&self) -> PilotResult<()> {
        self.with(|s| s.calls.push(DeviceCall::Reconnect));
        Ok(())
    }
}

/// A menu graph with synthetic calibration: every observable state and
/// every trigger target owns one marker cell; state `i` uses cell `i`.
pub struct SimWorld {
    pub graph: MenuGraph,
    pub calibration: Calibration,
    cells: HashMap<String, usize>,
}

impl SimWorld {
    pub fn new(topology: &TopologyConfig, observable: impl Fn(&NavigationState) -> bool) -> Self {
        let graph = MenuGraph::build(topology, &fast_navigation());
        let mut calibration = Calibration::default();
        let mut cells = HashMap::new();

        for s in graph.states() {
            if observable(s) {
                calibration.insert(
                    s.name.clone(),
                    CalibrationEntry::Target(green_target(cell_region(s.id.0))),
                );
                cells.insert(s.name.clone(), s.id.0);
            }
        }

        let req = graph.requirements();
        let mut next = graph.len();
        for name in &req.targets {
            if name == VICTORY_TARGET {
                let mut flash = DetectionTarget::new(
                    "",
                    vec![HsvRange::new([0, 0, 200], [180, 40, 255])],
                    Region::new(0, 0, FRAME_W, FRAME_H),
                    [1, u32::MAX],
                );
                flash.fill_threshold = Some(0.9);
                calibration.insert(name.clone(), CalibrationEntry::Target(flash));
                continue;
            }
            calibration.insert(name.clone(), CalibrationEntry::Target(green_target(cell_region(next))));
            cells.insert(name.clone(), next);
            next += 1;
        }
        for (i, name) in req.points.iter().enumerate() {
            calibration.insert(
                name.clone(),
                CalibrationEntry::Point { at: Point::new(1000 + i as i32, 5) },
            );
        }
        for (i, name) in req.gestures.iter().enumerate() {
            calibration.insert(
                name.clone(),
                CalibrationEntry::Gesture(Gesture {
                    start: Point::new(2000 + i as i32, 300),
                    end: Point::new(2000 + i as i32, 100),
                    duration_ms: 1,
                    hold_ms: 0,
                }),
            );
        }

        Self {
            graph,
            calibration,
            cells,
        }
    }

    /// Every state observable.
    pub fn full(topology: &TopologyConfig) -> Self {
        Self::new(topology, |_| true)
    }

    pub fn cell(&self, name: &str) -> usize {
        self.cells[name]
    }

    pub fn point(&self, name: &str) -> Point {
        self.calibration.point(name).unwrap()
    }

    /// Cells of the root-to-`state` menu path, the screen stack a device at
    /// `state` would have.
    pub fn stack_for(&self, state: &str) -> Vec<usize> {
        let id = self.graph.find(state).unwrap();
        self.graph
            .path_from_root(id)
            .unwrap()
            .into_iter()
            .map(|s| s.0)
            .collect()
    }

    pub fn navigator(&self, device: Arc<SimulatedDevice>, topology: &TopologyConfig) -> Navigator {
        Navigator::new(
            device,
            self.graph.clone(),
            self.calibration.clone(),
            ProgressRecord::new(topology),
            fast_settings(),
            Arc::new(AtomicBool::new(false)),
        )
    }
}

pub fn fast_navigation() -> NavigationConfig {
    NavigationConfig {
        poll_interval_ms: 0,
        settle_ms: 0,
        battle_warmup_secs: 0,
        auto_to_battle_ms: 0,
        collect_delay_secs: 0,
        battle_tick_budget: 5,
        verify_delay_ms: 0,
        ..Default::default()
    }
}

pub fn fast_settings() -> NavigatorSettings {
    let mut cfg = AppConfig::default();
    cfg.navigation = fast_navigation();
    cfg.recovery = RecoveryConfig {
        press_delay_ms: 0,
        ..Default::default()
    };
    cfg.settle = StabilityConfig::default();
    NavigatorSettings::from_config(&cfg)
}

/// One difficulty, one series of three expansions.
pub fn small_topology() -> TopologyConfig {
    use crate::config::{DifficultyEntry, SeriesEntry};
    TopologyConfig {
        difficulties: vec![DifficultyEntry {
            name: "beginner".into(),
            scroll: false,
        }],
        series: vec![SeriesEntry {
            name: "A".into(),
            expansions: 3,
        }],
        ..Default::default()
    }
}
