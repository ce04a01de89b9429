use std::time::Duration;

use async_trait::async_trait;

use crate::errors::PilotResult;
use crate::perception::types::{Point, Screenshot};

/// Android key events the navigator sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCode {
    Back,
}

impl KeyCode {
    pub fn code(self) -> u32 {
        match self {
            KeyCode::Back => 4,
        }
    }
}

/// The only side-effecting seam between the navigator and a device.
/// Implementations serialise their own calls; one instance owns one device.
#[async_trait]
pub trait Device: Send + Sync {
    /// Stable identifier, e.g. `127.0.0.1:16384`.
    fn endpoint(&self) -> &str;

    async fn capture(&self) -> PilotResult<Screenshot>;

    async fn tap(&self, at: Point) -> PilotResult<()>;

    /// Drag from `from` to `to` over `duration` (including any end hold).
    async fn swipe(&self, from: Point, to: Point, duration: Duration) -> PilotResult<()>;

    async fn send_key(&self, key: KeyCode) -> PilotResult<()>;

    /// Re-establish the transport after a fault.
    async fn reconnect(&self) -> PilotResult<()>;
}
