use std::fmt;
use std::time::Duration;

use crate::device::KeyCode;
use crate::navigator::progress::Branch;

/// Index of a state in its `MenuGraph`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateId(pub usize);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateKind {
    Menu,
    /// Expansion battle list for one branch.
    Leaf(Branch),
    BattleSetup,
    InBattle,
    BattleResult,
}

/// What must be observed for a transition to fire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// A named detection target is found in the frame.
    Target(String),
    /// The source state's own screen is confirmed (or unobservable).
    Screen,
    /// Fires only once the state's tick budget is spent.
    Timeout,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Tap a calibrated point.
    Tap(String),
    /// Tap where the trigger's target was detected; falls back to a
    /// calibrated point of the same name.
    TapTarget(String),
    /// Perform a calibrated swipe gesture.
    Swipe(String),
    Wait(Duration),
    Key(KeyCode),
    /// Back-press unwind to the root, same as the recovery unwind.
    Unwind,
    Sequence(Vec<Action>),
}

impl Action {
    /// Leaf actions in execution order.
    pub fn steps(&self) -> Vec<&Action> {
        match self {
            Action::Sequence(inner) => inner.iter().flat_map(|a| a.steps()).collect(),
            other => vec![other],
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Tap(n) => write!(f, "tap {n}"),
            Action::TapTarget(n) => write!(f, "tap detected {n}"),
            Action::Swipe(n) => write!(f, "swipe {n}"),
            Action::Wait(d) => write!(f, "wait {}ms", d.as_millis()),
            Action::Key(k) => write!(f, "key {k:?}"),
            Action::Unwind => write!(f, "unwind"),
            Action::Sequence(steps) => write!(f, "sequence of {}", steps.len()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub trigger: Trigger,
    pub action: Action,
    pub to: StateId,
    /// May a swipe bring this trigger into view?
    pub scrollable: bool,
    /// Engaging a battle from a leaf. Only eligible at the goal leaf and
    /// never used for routing.
    pub engage: bool,
    /// Re-scan the trigger target before acting on it.
    pub verify: bool,
}

impl Transition {
    pub fn new(trigger: Trigger, action: Action, to: StateId) -> Self {
        Self {
            trigger,
            action,
            to,
            scrollable: false,
            engage: false,
            verify: false,
        }
    }

    pub fn scrollable(mut self, yes: bool) -> Self {
        self.scrollable = yes;
        self
    }

    pub fn engaging(mut self) -> Self {
        self.engage = true;
        self
    }

    pub fn verified(mut self) -> Self {
        self.verify = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrollPolicy {
    /// Calibrated gesture name.
    pub gesture: String,
    pub max_swipes: u32,
}

#[derive(Debug, Clone)]
pub struct NavigationState {
    pub id: StateId,
    pub name: String,
    pub kind: StateKind,
    pub transitions: Vec<Transition>,
    pub scroll: Option<ScrollPolicy>,
    /// Overrides the global tick timeout.
    pub tick_budget: Option<u32>,
}

impl NavigationState {
    /// Confirming target: the calibration target named after the state.
    pub fn confirm_target(&self) -> &str {
        &self.name
    }
}

/// Where the navigator believes the device is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cursor {
    /// Fresh start or after a reconnect: run the resume pass first.
    Unsynced,
    At(StateId),
    /// Recovery exhausted; the instance is lost.
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryReason {
    Ambiguous { during: &'static str, candidates: Vec<String> },
    Timeout { state: String },
    Unsynced,
    NoRoute { state: String },
}

impl fmt::Display for RecoveryReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecoveryReason::Ambiguous { during, candidates } => {
                write!(f, "ambiguous detection during {during}: {}", candidates.join(", "))
            }
            RecoveryReason::Timeout { state } => write!(f, "navigation timeout in {state}"),
            RecoveryReason::Unsynced => write!(f, "no state recognised on screen"),
            RecoveryReason::NoRoute { state } => write!(f, "no route to goal from {state}"),
        }
    }
}

/// Result of one `Navigator::tick`.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Resynced(StateId),
    Acted { from: StateId, to: StateId },
    Waiting { idle_ticks: u32 },
    Scrolled { state: StateId, swipes: u32 },
    BranchClosed(Branch),
    Recovered { reason: RecoveryReason, landed: StateId },
    Finished,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_sequences_flatten_in_order() {
        let a = Action::Sequence(vec![
            Action::Tap("auto_button".into()),
            Action::Sequence(vec![Action::Wait(Duration::from_millis(5)), Action::Unwind]),
            Action::Key(KeyCode::Back),
        ]);
        let steps = a.steps();
        assert_eq!(steps.len(), 4);
        assert_eq!(steps[0], &Action::Tap("auto_button".into()));
        assert_eq!(steps[2], &Action::Unwind);
    }

    #[test]
    fn recovery_reason_is_readable() {
        let r = RecoveryReason::Ambiguous {
            during: "locate",
            candidates: vec!["home".into(), "battles".into()],
        };
        assert_eq!(r.to_string(), "ambiguous detection during locate: home, battles");
    }
}
