pub mod adb;
pub mod discovery;
pub mod traits;

pub use adb::AdbDevice;
pub use traits::{Device, KeyCode};
