pub mod detector;
pub mod hsv;
pub mod readings;
pub mod stability;
pub mod types;
