use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{PilotError, PilotResult};
use crate::navigator::graph::slug;
use crate::perception::stability::StabilityConfig;

const CONFIG_FILE: &str = "config.toml";
const ADB_ENV: &str = "MENUPILOT_ADB";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub calibration: CalibrationConfig,
    #[serde(default)]
    pub navigation: NavigationConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
    /// Optional visual-settle wait after each action.
    #[serde(default)]
    pub settle: StabilityConfig,
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub topology: TopologyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Path to the adb executable. `MENUPILOT_ADB` overrides it.
    #[serde(default = "default_adb_path")]
    pub adb_path: String,
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
    /// Reconnect attempts after a transport fault before the instance gives up.
    #[serde(default = "default_reconnect_attempts")]
    pub reconnect_attempts: u32,
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            adb_path: default_adb_path(),
            command_timeout_secs: default_command_timeout(),
            reconnect_attempts: default_reconnect_attempts(),
            reconnect_delay_secs: default_reconnect_delay(),
        }
    }
}

fn default_adb_path() -> String {
    "adb".into()
}

fn default_command_timeout() -> u64 {
    15
}

fn default_reconnect_attempts() -> u32 {
    3
}

fn default_reconnect_delay() -> u64 {
    5
}

/// Emulator port scan. MuMu 12 exposes instance N on `base_port + N * port_increment`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default = "default_true")]
    pub scan_ports: bool,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_base_port")]
    pub base_port: u16,
    #[serde(default = "default_port_increment")]
    pub port_increment: u16,
    #[serde(default = "default_max_instances")]
    pub max_instances: u16,
    #[serde(default = "default_verify_timeout")]
    pub verify_timeout_secs: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            scan_ports: true,
            host: default_host(),
            base_port: default_base_port(),
            port_increment: default_port_increment(),
            max_instances: default_max_instances(),
            verify_timeout_secs: default_verify_timeout(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "127.0.0.1".into()
}

fn default_base_port() -> u16 {
    16384
}

fn default_port_increment() -> u16 {
    32
}

fn default_max_instances() -> u16 {
    10
}

fn default_verify_timeout() -> u64 {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationConfig {
    /// Directory holding the shared and device-specific calibration files.
    #[serde(default = "default_calibration_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_shared_file")]
    pub shared_file: String,
    /// Device files are named `<prefix><sanitised endpoint>.json`.
    #[serde(default = "default_device_prefix")]
    pub device_file_prefix: String,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            dir: default_calibration_dir(),
            shared_file: default_shared_file(),
            device_file_prefix: default_device_prefix(),
        }
    }
}

fn default_calibration_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_shared_file() -> String {
    "adb_config.json".into()
}

fn default_device_prefix() -> String {
    "adb_config_".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigationConfig {
    /// Consecutive ticks without a trigger before scrolling or recovering.
    #[serde(default = "default_tick_timeout")]
    pub tick_timeout: u32,
    /// Wait between ticks that found nothing.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Wait after every executed action.
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    #[serde(default = "default_difficulty_swipes")]
    pub difficulty_max_swipes: u32,
    #[serde(default = "default_leaf_swipes")]
    pub leaf_max_swipes: u32,
    /// Tick budget of the in-battle state before the fallback transition fires.
    #[serde(default = "default_battle_budget")]
    pub battle_tick_budget: u32,
    /// Wait after pressing BATTLE before victory monitoring starts.
    #[serde(default = "default_battle_warmup")]
    pub battle_warmup_secs: u64,
    #[serde(default = "default_auto_to_battle")]
    pub auto_to_battle_ms: u64,
    #[serde(default = "default_collect_delay")]
    pub collect_delay_secs: u64,
    /// Re-scans of a reward sighting before it is tapped. 0 taps at once.
    #[serde(default = "default_verify_attempts")]
    pub verify_attempts: u32,
    #[serde(default = "default_verify_delay")]
    pub verify_delay_ms: u64,
    /// How far a re-scanned reward may move and still count as the same one.
    #[serde(default = "default_verify_radius")]
    pub verify_radius_px: u32,
    /// Stop the instance cleanly after this many minutes. `None` runs until
    /// every branch is exhausted.
    #[serde(default)]
    pub max_run_minutes: Option<u32>,
}

impl Default for NavigationConfig {
    fn default() -> Self {
        Self {
            tick_timeout: default_tick_timeout(),
            poll_interval_ms: default_poll_interval(),
            settle_ms: default_settle_ms(),
            difficulty_max_swipes: default_difficulty_swipes(),
            leaf_max_swipes: default_leaf_swipes(),
            battle_tick_budget: default_battle_budget(),
            battle_warmup_secs: default_battle_warmup(),
            auto_to_battle_ms: default_auto_to_battle(),
            collect_delay_secs: default_collect_delay(),
            verify_attempts: default_verify_attempts(),
            verify_delay_ms: default_verify_delay(),
            verify_radius_px: default_verify_radius(),
            max_run_minutes: None,
        }
    }
}

fn default_tick_timeout() -> u32 {
    5
}

fn default_poll_interval() -> u64 {
    1000
}

fn default_settle_ms() -> u64 {
    1500
}

fn default_difficulty_swipes() -> u32 {
    2
}

fn default_leaf_swipes() -> u32 {
    3
}

fn default_battle_budget() -> u32 {
    900
}

fn default_battle_warmup() -> u64 {
    30
}

fn default_auto_to_battle() -> u64 {
    1200
}

fn default_collect_delay() -> u64 {
    2
}

fn default_verify_attempts() -> u32 {
    2
}

fn default_verify_delay() -> u64 {
    1000
}

fn default_verify_radius() -> u32 {
    50
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Back presses per unwind, enough to leave any reachable depth.
    #[serde(default = "default_back_presses")]
    pub back_presses: u32,
    #[serde(default = "default_press_delay")]
    pub press_delay_ms: u64,
    /// Take a polling screenshot every N presses.
    #[serde(default = "default_poll_every")]
    pub poll_every: u32,
    /// Unwind + resync attempts per recovery before the instance is lost.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Recoveries tolerated in a row without any branch progress.
    #[serde(default = "default_max_without_progress")]
    pub max_without_progress: u32,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            back_presses: default_back_presses(),
            press_delay_ms: default_press_delay(),
            poll_every: default_poll_every(),
            max_attempts: default_max_attempts(),
            max_without_progress: default_max_without_progress(),
        }
    }
}

fn default_back_presses() -> u32 {
    30
}

fn default_press_delay() -> u64 {
    300
}

fn default_poll_every() -> u32 {
    10
}

fn default_max_attempts() -> u32 {
    3
}

fn default_max_without_progress() -> u32 {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Delay between consecutive instance launches.
    #[serde(default = "default_stagger")]
    pub stagger_secs: u64,
    /// Explicit endpoints; when empty the coordinator discovers them.
    #[serde(default)]
    pub endpoints: Vec<String>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            stagger_secs: default_stagger(),
            endpoints: Vec::new(),
        }
    }
}

fn default_stagger() -> u64 {
    5
}

/// Shape of the menu tree the navigator explores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologyConfig {
    #[serde(default = "default_difficulties")]
    pub difficulties: Vec<DifficultyEntry>,
    #[serde(default = "default_series")]
    pub series: Vec<SeriesEntry>,
    /// Expansion rows visible in the list before it has to be swiped.
    #[serde(default = "default_visible_slots")]
    pub visible_slots: u32,
    /// 1-based slot of the first expansion row (slot 1 is the series header).
    #[serde(default = "default_first_slot")]
    pub first_slot: u32,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            difficulties: default_difficulties(),
            series: default_series(),
            visible_slots: default_visible_slots(),
            first_slot: default_first_slot(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DifficultyEntry {
    pub name: String,
    /// Whether the button may need a swipe to come into view.
    #[serde(default = "default_true")]
    pub scroll: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeriesEntry {
    pub name: String,
    pub expansions: u32,
}

fn default_difficulties() -> Vec<DifficultyEntry> {
    ["beginner", "intermediate", "advanced", "expert"]
        .iter()
        .map(|name| DifficultyEntry {
            name: name.to_string(),
            scroll: *name != "beginner",
        })
        .collect()
}

fn default_series() -> Vec<SeriesEntry> {
    vec![
        SeriesEntry { name: "A".into(), expansions: 11 },
        SeriesEntry { name: "B".into(), expansions: 1 },
    ]
}

fn default_visible_slots() -> u32 {
    2
}

fn default_first_slot() -> u32 {
    2
}

impl AppConfig {
    /// Reject values that would make a bounded loop unbounded or empty.
    pub fn validate(&self) -> PilotResult<()> {
        if self.navigation.tick_timeout == 0 {
            return Err(PilotError::Config("navigation.tick_timeout must be at least 1".into()));
        }
        if self.navigation.battle_tick_budget == 0 {
            return Err(PilotError::Config(
                "navigation.battle_tick_budget must be at least 1".into(),
            ));
        }
        if self.recovery.back_presses == 0 || self.recovery.max_attempts == 0 {
            return Err(PilotError::Config(
                "recovery.back_presses and recovery.max_attempts must be at least 1".into(),
            ));
        }
        if self.recovery.poll_every == 0 {
            return Err(PilotError::Config("recovery.poll_every must be at least 1".into()));
        }
        if self.topology.difficulties.is_empty() || self.topology.series.is_empty() {
            return Err(PilotError::Config(
                "topology needs at least one difficulty and one series".into(),
            ));
        }
        let difficulties = self.topology.difficulties.iter().map(|d| d.name.as_str());
        if let Some(name) = first_slug_collision(difficulties) {
            return Err(PilotError::Config(format!("difficulty '{name}' is listed twice")));
        }
        if let Some(name) = first_slug_collision(self.topology.series.iter().map(|s| s.name.as_str())) {
            return Err(PilotError::Config(format!("series '{name}' is listed twice")));
        }
        if let Some(s) = self.topology.series.iter().find(|s| s.expansions == 0) {
            return Err(PilotError::Config(format!("series '{}' has no expansions", s.name)));
        }
        if self.topology.visible_slots == 0 || self.topology.first_slot == 0 {
            return Err(PilotError::Config(
                "topology.visible_slots and topology.first_slot are 1-based and must be non-zero"
                    .into(),
            ));
        }
        Ok(())
    }
}

/// First name whose state slug was already taken by an earlier one.
fn first_slug_collision<'a>(names: impl Iterator<Item = &'a str>) -> Option<&'a str> {
    let mut seen = HashSet::new();
    names.into_iter().find(|name| !seen.insert(slug(name)))
}

fn resolve_config_path() -> PilotResult<Option<PathBuf>> {
    if let Ok(exe) = std::env::current_exe() {
        if let Some(parent) = exe.parent() {
            let candidate = parent.join(CONFIG_FILE);
            if candidate.exists() {
                tracing::debug!(path = %candidate.display(), "config found next to executable");
                return Ok(Some(candidate));
            }
        }
    }

    let cwd = std::env::current_dir()?;
    let candidate = cwd.join(CONFIG_FILE);
    if candidate.exists() {
        tracing::debug!(path = %candidate.display(), "config found in working directory");
        return Ok(Some(candidate));
    }

    if let Some(dir) = dirs::config_dir() {
        let candidate = dir.join("menupilot").join(CONFIG_FILE);
        if candidate.exists() {
            tracing::debug!(path = %candidate.display(), "config found in user config dir");
            return Ok(Some(candidate));
        }
    }

    Ok(None)
}

/// Load `config.toml`. An explicit path must exist; otherwise the usual
/// locations are searched and built-in defaults apply when nothing is found.
pub fn load_config(explicit: Option<&Path>) -> PilotResult<AppConfig> {
    let path = match explicit {
        Some(p) if p.exists() => Some(p.to_path_buf()),
        Some(p) => {
            return Err(PilotError::Config(format!(
                "config file {} does not exist",
                p.display()
            )))
        }
        None => resolve_config_path()?,
    };

    let mut config = match &path {
        Some(path) => {
            let content = std::fs::read_to_string(path)?;
            let config: AppConfig = toml::from_str(&content)?;
            tracing::info!(path = %path.display(), "config loaded");
            config
        }
        None => {
            tracing::info!("no config.toml found; using built-in defaults");
            AppConfig::default()
        }
    };

    if let Ok(adb) = std::env::var(ADB_ENV) {
        if !adb.trim().is_empty() {
            tracing::debug!(adb = %adb, "adb path overridden from environment");
            config.device.adb_path = adb;
        }
    }

    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg: AppConfig = toml::from_str(
            r#"
            [navigation]
            tick_timeout = 7

            [recovery]
            back_presses = 70
            "#,
        )
        .unwrap();
        assert_eq!(cfg.navigation.tick_timeout, 7);
        assert_eq!(cfg.navigation.poll_interval_ms, 1000);
        assert_eq!(cfg.recovery.back_presses, 70);
        assert_eq!(cfg.recovery.max_attempts, 3);
        assert_eq!(cfg.coordinator.stagger_secs, 5);
        assert_eq!(cfg.topology.difficulties.len(), 4);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn names_that_share_a_state_slug_are_rejected() {
        let mut cfg = AppConfig::default();
        cfg.topology.series = vec![
            SeriesEntry { name: "A".into(), expansions: 1 },
            SeriesEntry { name: "a".into(), expansions: 2 },
        ];
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("series 'a'"), "{err}");

        let mut cfg = AppConfig::default();
        cfg.topology.difficulties.push(DifficultyEntry {
            name: "Beginner ".into(),
            scroll: true,
        });
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("difficulty"), "{err}");
    }

    #[test]
    fn lowest_difficulty_does_not_scroll_by_default() {
        let topo = TopologyConfig::default();
        assert_eq!(topo.difficulties[0].name, "beginner");
        assert!(!topo.difficulties[0].scroll);
        assert!(topo.difficulties[1..].iter().all(|d| d.scroll));
    }

    #[test]
    fn zero_budgets_are_rejected() {
        let mut cfg = AppConfig::default();
        cfg.navigation.tick_timeout = 0;
        assert!(matches!(cfg.validate(), Err(PilotError::Config(_))));

        let mut cfg = AppConfig::default();
        cfg.recovery.back_presses = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = AppConfig::default();
        cfg.topology.series[1].expansions = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn explicit_path_is_loaded() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[coordinator]\nstagger_secs = 9").unwrap();
        let cfg = load_config(Some(file.path())).unwrap();
        assert_eq!(cfg.coordinator.stagger_secs, 9);
    }

    #[test]
    fn missing_explicit_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config(Some(&dir.path().join("nope.toml"))).unwrap_err();
        assert!(matches!(err, PilotError::Config(_)));
    }
}
