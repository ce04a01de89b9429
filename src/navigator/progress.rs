use std::fmt;

use crate::config::TopologyConfig;

/// One leaf of the menu tree: a (difficulty, series, expansion) triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Branch {
    pub difficulty: String,
    pub series: String,
    /// 1-based.
    pub expansion: u32,
}

impl Branch {
    pub fn new(difficulty: impl Into<String>, series: impl Into<String>, expansion: u32) -> Self {
        Self {
            difficulty: difficulty.into(),
            series: series.into(),
            expansion,
        }
    }
}

impl fmt::Display for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.difficulty, self.series, self.expansion)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchStatus {
    Unvisited,
    InProgress,
    Exhausted,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressCounts {
    pub unvisited: usize,
    pub in_progress: usize,
    pub exhausted: usize,
}

/// Per-run traversal record. Statuses only move forward:
/// unvisited → in-progress → exhausted.
#[derive(Debug, Clone)]
pub struct ProgressRecord {
    branches: Vec<(Branch, BranchStatus)>,
}

impl ProgressRecord {
    /// Every leaf of `topology`, in depth-first order.
    pub fn new(topology: &TopologyConfig) -> Self {
        let mut branches = Vec::new();
        for d in &topology.difficulties {
            for s in &topology.series {
                for e in 1..=s.expansions {
                    branches.push((Branch::new(&d.name, &s.name, e), BranchStatus::Unvisited));
                }
            }
        }
        Self { branches }
    }

    pub fn len(&self) -> usize {
        self.branches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.branches.is_empty()
    }

    pub fn status(&self, branch: &Branch) -> Option<BranchStatus> {
        self.branches
            .iter()
            .find(|(b, _)| b == branch)
            .map(|(_, s)| *s)
    }

    fn slot(&mut self, branch: &Branch) -> Option<&mut BranchStatus> {
        self.branches
            .iter_mut()
            .find(|(b, _)| b == branch)
            .map(|(_, s)| s)
    }

    /// Mark arrival at a leaf. Returns true if the status changed; an
    /// exhausted branch stays exhausted.
    pub fn begin(&mut self, branch: &Branch) -> bool {
        match self.slot(branch) {
            Some(s @ BranchStatus::Unvisited) => {
                *s = BranchStatus::InProgress;
                tracing::info!(branch = %branch, "branch in progress");
                true
            }
            _ => false,
        }
    }

    /// Close a branch for the rest of the run.
    pub fn exhaust(&mut self, branch: &Branch) -> bool {
        match self.slot(branch) {
            Some(s) if *s != BranchStatus::Exhausted => {
                *s = BranchStatus::Exhausted;
                let counts = self.counts();
                tracing::info!(
                    branch = %branch,
                    exhausted = counts.exhausted,
                    total = self.branches.len(),
                    "branch exhausted"
                );
                true
            }
            _ => false,
        }
    }

    /// First in-progress branch, else first unvisited one.
    pub fn next_branch(&self) -> Option<&Branch> {
        self.branches
            .iter()
            .find(|(_, s)| *s == BranchStatus::InProgress)
            .or_else(|| self.branches.iter().find(|(_, s)| *s == BranchStatus::Unvisited))
            .map(|(b, _)| b)
    }

    pub fn is_fully_exhausted(&self) -> bool {
        self.branches.iter().all(|(_, s)| *s == BranchStatus::Exhausted)
    }

    pub fn is_difficulty_exhausted(&self, difficulty: &str) -> bool {
        self.branches
            .iter()
            .filter(|(b, _)| b.difficulty == difficulty)
            .all(|(_, s)| *s == BranchStatus::Exhausted)
    }

    pub fn counts(&self) -> ProgressCounts {
        let mut c = ProgressCounts::default();
        for (_, s) in &self.branches {
            match s {
                BranchStatus::Unvisited => c.unvisited += 1,
                BranchStatus::InProgress => c.in_progress += 1,
                BranchStatus::Exhausted => c.exhausted += 1,
            }
        }
        c
    }
}
