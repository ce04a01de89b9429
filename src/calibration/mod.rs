pub mod loader;
pub mod types;

pub use loader::load_for_device;
pub use types::{Calibration, CalibrationEntry, CalibrationFile, Gesture};
