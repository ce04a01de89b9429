use thiserror::Error;

#[derive(Debug, Error)]
pub enum PilotError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Calibration error: {0}")]
    Calibration(String),

    #[error("Device error: {0}")]
    Device(String),

    #[error("Perception error: {0}")]
    Perception(String),

    #[error("Navigation error: {0}")]
    Navigation(String),

    #[error("Recovery exhausted after {attempts} attempt(s): {reason}")]
    RecoveryExhausted { attempts: u32, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialize error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Stopped by request")]
    Cancelled,
}

impl PilotError {
    /// Faults of the device transport; these are retried via reconnect
    /// before they become instance-fatal.
    pub fn is_device_fault(&self) -> bool {
        matches!(
            self,
            PilotError::Device(_) | PilotError::Io(_) | PilotError::Image(_)
        )
    }
}

impl From<opencv::Error> for PilotError {
    fn from(e: opencv::Error) -> Self {
        PilotError::Perception(format!("opencv: {e}"))
    }
}

pub type PilotResult<T> = Result<T, PilotError>;
