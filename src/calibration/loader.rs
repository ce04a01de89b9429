use std::path::{Path, PathBuf};

use crate::calibration::types::{Calibration, CalibrationEntry, CalibrationFile, Gesture};
use crate::config::CalibrationConfig;
use crate::errors::{PilotError, PilotResult};
use crate::perception::types::Point;

/// Region a list swipe is derived from when no explicit gesture is calibrated.
pub const BATTLE_LIST_REGION: &str = "battle_list";
pub const BATTLE_LIST_SCROLL: &str = "battle_list_scroll";

/// `127.0.0.1:16384` → `127_0_0_1_16384`
pub fn sanitize_endpoint(endpoint: &str) -> String {
    endpoint.replace([':', '.'], "_")
}

pub fn device_file_path(cfg: &CalibrationConfig, endpoint: &str) -> PathBuf {
    cfg.dir.join(format!(
        "{}{}.json",
        cfg.device_file_prefix,
        sanitize_endpoint(endpoint)
    ))
}

pub fn shared_file_path(cfg: &CalibrationConfig) -> PathBuf {
    cfg.dir.join(&cfg.shared_file)
}

pub fn load_file(path: &Path) -> PilotResult<Calibration> {
    let content = std::fs::read_to_string(path)?;
    let file: CalibrationFile = serde_json::from_str(&content).map_err(|e| {
        PilotError::Calibration(format!("{} is not valid calibration JSON: {e}", path.display()))
    })?;
    Calibration::from_file(file)
}

/// Shared calibration with the device file layered on top. At least one of
/// the two must exist.
pub fn load_for_device(cfg: &CalibrationConfig, endpoint: &str) -> PilotResult<Calibration> {
    let shared_path = shared_file_path(cfg);
    let device_path = device_file_path(cfg, endpoint);

    let shared = if shared_path.exists() {
        Some(load_file(&shared_path)?)
    } else {
        None
    };
    let device = if device_path.exists() {
        Some(load_file(&device_path)?)
    } else {
        None
    };

    let calibration = match (shared, device) {
        (None, None) => {
            return Err(PilotError::Calibration(format!(
                "no calibration for {endpoint}: neither {} nor {} exists",
                device_path.display(),
                shared_path.display()
            )))
        }
        (Some(shared), None) => {
            tracing::info!(endpoint, path = %shared_path.display(), entries = shared.len(), "using shared calibration");
            shared
        }
        (None, Some(device)) => {
            tracing::info!(endpoint, path = %device_path.display(), entries = device.len(), "using device calibration");
            device
        }
        (Some(shared), Some(device)) => {
            let (merged, replaced) = shared.layered(device);
            tracing::info!(
                endpoint,
                path = %device_path.display(),
                entries = merged.len(),
                overrides = replaced,
                "device calibration layered over shared"
            );
            merged
        }
    };

    Ok(derive_defaults(calibration))
}

/// Fill entries that can be computed from others: a fast upward swipe over
/// the battle list, from 80% to 20% of its height.
pub fn derive_defaults(mut calibration: Calibration) -> Calibration {
    if !calibration.contains(BATTLE_LIST_SCROLL) {
        if let Some(rect) = calibration.region(BATTLE_LIST_REGION) {
            let x = (rect.x + rect.w / 2) as i32;
            let gesture = Gesture {
                start: Point::new(x, (rect.y + rect.h * 4 / 5) as i32),
                end: Point::new(x, (rect.y + rect.h / 5) as i32),
                duration_ms: 200,
                hold_ms: 0,
            };
            tracing::debug!(?gesture, "derived battle list swipe from region");
            calibration.insert(BATTLE_LIST_SCROLL, CalibrationEntry::Gesture(gesture));
        }
    }
    calibration
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(dir: &Path) -> CalibrationConfig {
        CalibrationConfig {
            dir: dir.to_path_buf(),
            ..Default::default()
        }
    }

    fn write(dir: &Path, name: &str, body: &str) {
        std::fs::write(dir.join(name), body).unwrap();
    }

    #[test]
    fn endpoint_is_sanitised_for_file_names() {
        assert_eq!(sanitize_endpoint("127.0.0.1:16416"), "127_0_0_1_16416");
        let c = CalibrationConfig::default();
        assert!(device_file_path(&c, "emulator-5554")
            .ends_with("adb_config_emulator-5554.json"));
    }

    #[test]
    fn device_file_overrides_shared() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "adb_config.json",
            r#"{"entries": {
                "battles_tab": {"kind": "point", "at": [10, 10]},
                "auto_button": {"kind": "point", "at": [20, 20]}
            }}"#,
        );
        write(
            dir.path(),
            "adb_config_127_0_0_1_16384.json",
            r#"{"entries": {"battles_tab": {"kind": "point", "at": [99, 99]}}}"#,
        );
        let cal = load_for_device(&cfg(dir.path()), "127.0.0.1:16384").unwrap();
        assert_eq!(cal.point("battles_tab").unwrap(), Point::new(99, 99));
        assert_eq!(cal.point("auto_button").unwrap(), Point::new(20, 20));

        let other = load_for_device(&cfg(dir.path()), "127.0.0.1:16416").unwrap();
        assert_eq!(other.point("battles_tab").unwrap(), Point::new(10, 10));
    }

    #[test]
    fn missing_files_are_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_for_device(&cfg(dir.path()), "127.0.0.1:16384").unwrap_err();
        assert!(matches!(err, PilotError::Calibration(_)));
    }

    #[test]
    fn malformed_json_is_a_calibration_error() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "adb_config.json", "{ not json");
        let err = load_for_device(&cfg(dir.path()), "x").unwrap_err();
        assert!(matches!(err, PilotError::Calibration(_)));
    }

    #[test]
    fn battle_list_swipe_is_derived_from_region() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "adb_config.json",
            r#"{"entries": {"battle_list": {"kind": "region", "rect": [0, 100, 200, 1000]}}}"#,
        );
        let cal = load_for_device(&cfg(dir.path()), "x").unwrap();
        let g = cal.gesture(BATTLE_LIST_SCROLL).unwrap();
        assert_eq!(g.start, Point::new(100, 900));
        assert_eq!(g.end, Point::new(100, 300));
        assert_eq!(g.duration_ms, 200);
    }
}
