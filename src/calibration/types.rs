use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::{PilotError, PilotResult};
use crate::perception::types::{DetectionTarget, Point, Region};

/// A swipe between two points. `hold_ms` keeps the finger down at the end so
/// the list does not fling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gesture {
    pub start: Point,
    pub end: Point,
    #[serde(default = "default_duration")]
    pub duration_ms: u64,
    #[serde(default)]
    pub hold_ms: u64,
}

fn default_duration() -> u64 {
    400
}

impl Gesture {
    pub fn total_ms(&self) -> u64 {
        self.duration_ms + self.hold_ms
    }
}

/// One named calibration entry, tagged by `kind` in the JSON file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CalibrationEntry {
    Point { at: Point },
    Gesture(Gesture),
    Region { rect: Region },
    Target(DetectionTarget),
}

impl CalibrationEntry {
    pub fn kind(&self) -> &'static str {
        match self {
            CalibrationEntry::Point { .. } => "point",
            CalibrationEntry::Gesture(_) => "gesture",
            CalibrationEntry::Region { .. } => "region",
            CalibrationEntry::Target(_) => "target",
        }
    }
}

/// On-disk layout of `adb_config.json` and its per-device variants.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CalibrationFile {
    #[serde(default)]
    pub entries: BTreeMap<String, CalibrationEntry>,
}

/// Resolved calibration for one device. Immutable once loaded.
#[derive(Debug, Clone, Default)]
pub struct Calibration {
    entries: BTreeMap<String, CalibrationEntry>,
}

impl Calibration {
    /// Validate every entry and stamp target names from their keys.
    pub fn from_file(file: CalibrationFile) -> PilotResult<Self> {
        let mut entries = file.entries;
        for (name, entry) in entries.iter_mut() {
            if let CalibrationEntry::Target(target) = entry {
                target.name = name.clone();
                target.validate()?;
            }
            if let CalibrationEntry::Gesture(g) = entry {
                if g.start == g.end {
                    return Err(PilotError::Calibration(format!(
                        "gesture '{name}' starts and ends at the same point"
                    )));
                }
            }
        }
        Ok(Self { entries })
    }

    /// Entries of `over` replace same-named entries of `self`.
    pub fn layered(mut self, over: Calibration) -> (Self, usize) {
        let mut replaced = 0;
        for (name, entry) in over.entries {
            if self.entries.insert(name, entry).is_some() {
                replaced += 1;
            }
        }
        (self, replaced)
    }

    pub fn insert(&mut self, name: impl Into<String>, entry: CalibrationEntry) {
        let name = name.into();
        let entry = match entry {
            CalibrationEntry::Target(mut t) => {
                t.name = name.clone();
                CalibrationEntry::Target(t)
            }
            other => other,
        };
        self.entries.insert(name, entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn point(&self, name: &str) -> PilotResult<Point> {
        match self.entries.get(name) {
            Some(CalibrationEntry::Point { at }) => Ok(*at),
            Some(other) => Err(wrong_kind(name, "point", other)),
            None => Err(missing(name, "point")),
        }
    }

    pub fn gesture(&self, name: &str) -> PilotResult<Gesture> {
        match self.entries.get(name) {
            Some(CalibrationEntry::Gesture(g)) => Ok(*g),
            Some(other) => Err(wrong_kind(name, "gesture", other)),
            None => Err(missing(name, "gesture")),
        }
    }

    pub fn region(&self, name: &str) -> Option<Region> {
        match self.entries.get(name) {
            Some(CalibrationEntry::Region { rect }) => Some(*rect),
            _ => None,
        }
    }

    /// `None` when the target is not calibrated; such a target never fires.
    pub fn target(&self, name: &str) -> Option<&DetectionTarget> {
        match self.entries.get(name) {
            Some(CalibrationEntry::Target(t)) => Some(t),
            _ => None,
        }
    }

    pub fn has_target(&self, name: &str) -> bool {
        self.target(name).is_some()
    }
}

fn missing(name: &str, kind: &str) -> PilotError {
    PilotError::Calibration(format!("{kind} '{name}' is not calibrated"))
}

fn wrong_kind(name: &str, want: &str, got: &CalibrationEntry) -> PilotError {
    PilotError::Calibration(format!(
        "'{name}' is calibrated as a {}, expected a {want}",
        got.kind()
    ))
}
