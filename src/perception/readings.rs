use std::collections::HashMap;

use opencv::core::Mat;

use crate::calibration::Calibration;
use crate::errors::PilotResult;
use crate::perception::detector::detect_in;
use crate::perception::hsv::to_hsv;
use crate::perception::types::{DetectionResult, Screenshot};

/// Detections over a single frame, evaluated lazily and memoised so a
/// target consulted by both the locate step and a trigger is scanned once.
/// The HSV conversion happens on the first lookup and is shared after that.
pub struct FrameReadings<'a> {
    shot: &'a Screenshot,
    calibration: &'a Calibration,
    hsv: Option<Mat>,
    cache: HashMap<String, DetectionResult>,
}

impl<'a> FrameReadings<'a> {
    pub fn new(shot: &'a Screenshot, calibration: &'a Calibration) -> Self {
        Self {
            shot,
            calibration,
            hsv: None,
            cache: HashMap::new(),
        }
    }

    /// `Ok(None)` if `name` is not a calibrated target.
    pub fn get(&mut self, name: &str) -> PilotResult<Option<DetectionResult>> {
        if let Some(hit) = self.cache.get(name) {
            return Ok(Some(*hit));
        }
        let Some(target) = self.calibration.target(name) else {
            return Ok(None);
        };
        if self.hsv.is_none() {
            self.hsv = Some(to_hsv(self.shot.image())?);
        }
        let Some(hsv) = self.hsv.as_ref() else {
            return Ok(None);
        };
        let result = detect_in(hsv, target)?;
        tracing::trace!(name, found = result.found, confidence = result.confidence, "detect");
        self.cache.insert(name.to_string(), result);
        Ok(Some(result))
    }

    pub fn found(&mut self, name: &str) -> PilotResult<bool> {
        Ok(self.get(name)?.map(|r| r.found).unwrap_or(false))
    }

    /// Evaluate a batch of targets; uncalibrated names are skipped.
    pub fn detect_all<'n, I>(&mut self, names: I) -> PilotResult<Vec<(&'n str, DetectionResult)>>
    where
        I: IntoIterator<Item = &'n str>,
    {
        let mut out = Vec::new();
        for name in names {
            if let Some(r) = self.get(name)? {
                out.push((name, r));
            }
        }
        Ok(out)
    }

    pub fn evaluated(&self) -> usize {
        self.cache.len()
    }
}
