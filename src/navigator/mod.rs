pub mod engine;
pub mod graph;
pub mod loop_control;
pub mod progress;
pub mod recovery;
pub mod state;

pub use engine::{Navigator, NavigatorSettings, RunEnd, RunSummary};
pub use graph::MenuGraph;
pub use progress::{Branch, BranchStatus, ProgressRecord};
pub use state::{Cursor, TickOutcome};
