use std::collections::{BTreeSet, HashMap, VecDeque};
use std::time::Duration;

use crate::calibration::Calibration;
use crate::config::{NavigationConfig, TopologyConfig};
use crate::device::KeyCode;
use crate::errors::{PilotError, PilotResult};
use crate::navigator::progress::Branch;
use crate::navigator::state::{
    Action, NavigationState, ScrollPolicy, StateId, StateKind, Transition, Trigger,
};

pub const HOME: &str = "home";
pub const BATTLES: &str = "battles";
pub const DIFFICULTY_SELECT: &str = "difficulty-select";
pub const BATTLE_SETUP: &str = "battle-setup";
pub const IN_BATTLE: &str = "in-battle";
pub const BATTLE_RESULT: &str = "battle-result";

pub const REWARD_TARGET: &str = "reward_icons";
pub const VICTORY_TARGET: &str = "victory_flash";
pub const DIFFICULTY_SCROLL: &str = "difficulty_scroll";
pub const EXPANSION_SCROLL: &str = "expansion_scroll";

/// State-name form of a difficulty or series name.
pub(crate) fn slug(s: &str) -> String {
    s.trim().to_lowercase().replace([' ', '_'], "-")
}

pub fn difficulty_state(d: &str) -> String {
    format!("difficulty-{}", slug(d))
}

pub fn expansions_state(d: &str) -> String {
    format!("expansions-{}", slug(d))
}

pub fn list_page_state(d: &str, s: &str, page: u32) -> String {
    format!("expansion-list-{}-{}-page-{page}", slug(d), slug(s))
}

pub fn leaf_state(branch: &Branch) -> String {
    format!(
        "expansion-{}-{}-{}",
        slug(&branch.difficulty),
        slug(&branch.series),
        branch.expansion
    )
}

/// Swipes needed before expansion `e` is visible, and the 1-based list slot
/// it then occupies.
pub fn expansion_placement(topology: &TopologyConfig, expansion: u32) -> (u32, u32) {
    let visible = topology.visible_slots;
    if expansion <= visible {
        (0, topology.first_slot + expansion - 1)
    } else {
        (expansion - visible, topology.first_slot + visible - 1)
    }
}

/// Calibration names the graph refers to, by kind.
#[derive(Debug, Default, Clone)]
pub struct Requirements {
    pub points: BTreeSet<String>,
    pub gestures: BTreeSet<String>,
    pub targets: BTreeSet<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Coverage {
    pub states: usize,
    pub observable: usize,
}

/// The fixed menu hierarchy as a directed graph rooted at `home`.
#[derive(Debug, Clone)]
pub struct MenuGraph {
    states: Vec<NavigationState>,
    by_name: HashMap<String, StateId>,
    leaves: HashMap<Branch, StateId>,
    root: StateId,
}

impl MenuGraph {
    pub fn build(topology: &TopologyConfig, nav: &NavigationConfig) -> Self {
        let mut g = MenuGraph {
            states: Vec::new(),
            by_name: HashMap::new(),
            leaves: HashMap::new(),
            root: StateId(0),
        };

        let home = g.add(HOME, StateKind::Menu);
        let battles = g.add(BATTLES, StateKind::Menu);
        let select = g.add(DIFFICULTY_SELECT, StateKind::Menu);
        let setup = g.add(BATTLE_SETUP, StateKind::BattleSetup);
        let in_battle = g.add(IN_BATTLE, StateKind::InBattle);
        let result = g.add(BATTLE_RESULT, StateKind::BattleResult);
        g.root = home;

        // ── Top of the tree ─────────────────────────────────────────────
        g.link(home, Transition::new(Trigger::Screen, Action::Tap("battles_tab".into()), battles));
        g.link(battles, Transition::new(Trigger::Screen, Action::Tap("solo_battle_button".into()), select));
        g.link(battles, Transition::new(Trigger::Screen, Action::Key(KeyCode::Back), home));
        g.link(select, Transition::new(Trigger::Screen, Action::Key(KeyCode::Back), battles));
        g.states[select.0].scroll = Some(ScrollPolicy {
            gesture: DIFFICULTY_SCROLL.into(),
            max_swipes: nav.difficulty_max_swipes,
        });

        // ── Difficulty → series → expansion list → leaf ─────────────────
        for d in &topology.difficulties {
            let diff = g.add(&difficulty_state(&d.name), StateKind::Menu);
            let exps = g.add(&expansions_state(&d.name), StateKind::Menu);

            let button = format!("difficulty_button.{}", d.name);
            g.link(
                select,
                Transition::new(Trigger::Target(button.clone()), Action::TapTarget(button), diff)
                    .scrollable(d.scroll),
            );
            g.link(diff, Transition::new(Trigger::Screen, Action::Tap("expansions_button".into()), exps));
            g.link(diff, Transition::new(Trigger::Screen, Action::Key(KeyCode::Back), select));
            g.link(exps, Transition::new(Trigger::Screen, Action::Key(KeyCode::Back), diff));

            for s in &topology.series {
                let pages = s.expansions.saturating_sub(topology.visible_slots) + 1;
                let page_ids: Vec<StateId> = (1..=pages)
                    .map(|p| g.add(&list_page_state(&d.name, &s.name, p), StateKind::Menu))
                    .collect();

                g.link(
                    exps,
                    Transition::new(
                        Trigger::Screen,
                        Action::Tap(format!("series_button.{}", s.name)),
                        page_ids[0],
                    ),
                );
                for pair in page_ids.windows(2) {
                    g.link(
                        pair[0],
                        Transition::new(Trigger::Screen, Action::Swipe(EXPANSION_SCROLL.into()), pair[1]),
                    );
                }
                for page in &page_ids {
                    g.link(*page, Transition::new(Trigger::Screen, Action::Key(KeyCode::Back), diff));
                }

                for e in 1..=s.expansions {
                    let branch = Branch::new(&d.name, &s.name, e);
                    let leaf = g.add(&leaf_state(&branch), StateKind::Leaf(branch.clone()));
                    g.leaves.insert(branch, leaf);

                    let (swipes, slot) = expansion_placement(topology, e);
                    g.link(
                        page_ids[swipes as usize],
                        Transition::new(
                            Trigger::Screen,
                            Action::Tap(format!("expansion_slot.{slot}")),
                            leaf,
                        ),
                    );
                    g.link(
                        leaf,
                        Transition::new(
                            Trigger::Target(REWARD_TARGET.into()),
                            Action::TapTarget(REWARD_TARGET.into()),
                            setup,
                        )
                        .scrollable(true)
                        .engaging()
                        .verified(),
                    );
                    g.link(leaf, Transition::new(Trigger::Screen, Action::Tap("expansions_button".into()), exps));
                    g.states[leaf.0].scroll = Some(ScrollPolicy {
                        gesture: crate::calibration::loader::BATTLE_LIST_SCROLL.into(),
                        max_swipes: nav.leaf_max_swipes,
                    });
                }
            }
        }

        // ── Battle ───────────────────────────────────────────────────────
        g.link(
            setup,
            Transition::new(
                Trigger::Screen,
                Action::Sequence(vec![
                    Action::Tap("auto_button".into()),
                    Action::Wait(Duration::from_millis(nav.auto_to_battle_ms)),
                    Action::Tap("battle_button".into()),
                    Action::Wait(Duration::from_secs(nav.battle_warmup_secs)),
                ]),
                in_battle,
            ),
        );
        g.link(
            in_battle,
            Transition::new(Trigger::Target(VICTORY_TARGET.into()), Action::Wait(Duration::ZERO), result),
        );
        g.link(in_battle, Transition::new(Trigger::Timeout, Action::Wait(Duration::ZERO), result));
        g.states[in_battle.0].tick_budget = Some(nav.battle_tick_budget);
        g.link(
            result,
            Transition::new(
                Trigger::Screen,
                Action::Sequence(vec![
                    Action::Wait(Duration::from_secs(nav.collect_delay_secs)),
                    Action::Unwind,
                ]),
                home,
            ),
        );

        g
    }

    fn add(&mut self, name: &str, kind: StateKind) -> StateId {
        let id = StateId(self.states.len());
        self.states.push(NavigationState {
            id,
            name: name.to_string(),
            kind,
            transitions: Vec::new(),
            scroll: None,
            tick_budget: None,
        });
        self.by_name.insert(name.to_string(), id);
        id
    }

    fn link(&mut self, from: StateId, transition: Transition) {
        self.states[from.0].transitions.push(transition);
    }

    pub fn root(&self) -> StateId {
        self.root
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn state(&self, id: StateId) -> &NavigationState {
        &self.states[id.0]
    }

    pub fn states(&self) -> impl Iterator<Item = &NavigationState> {
        self.states.iter()
    }

    pub fn find(&self, name: &str) -> Option<StateId> {
        self.by_name.get(name).copied()
    }

    pub fn name(&self, id: StateId) -> &str {
        &self.states[id.0].name
    }

    pub fn leaf_for(&self, branch: &Branch) -> Option<StateId> {
        self.leaves.get(branch).copied()
    }

    /// Distinct one-hop destinations of `id`, excluding itself.
    pub fn successors(&self, id: StateId) -> Vec<StateId> {
        let mut out: Vec<StateId> = Vec::new();
        for t in &self.states[id.0].transitions {
            if t.to != id && !out.contains(&t.to) {
                out.push(t.to);
            }
        }
        out
    }

    fn parents_from(&self, from: StateId, allow_engage: bool) -> Vec<Option<StateId>> {
        let mut parent = vec![None; self.states.len()];
        let mut seen = vec![false; self.states.len()];
        let mut queue = VecDeque::from([from]);
        seen[from.0] = true;
        while let Some(cur) = queue.pop_front() {
            for t in &self.states[cur.0].transitions {
                if t.engage && !allow_engage {
                    continue;
                }
                if !seen[t.to.0] {
                    seen[t.to.0] = true;
                    parent[t.to.0] = Some(cur);
                    queue.push_back(t.to);
                }
            }
        }
        parent
    }

    /// Shortest route `from → to` over routing edges, both ends included.
    /// Battle-engaging edges are never part of a route.
    pub fn route(&self, from: StateId, to: StateId) -> Option<Vec<StateId>> {
        self.path(from, to, false)
    }

    fn path(&self, from: StateId, to: StateId, allow_engage: bool) -> Option<Vec<StateId>> {
        if from == to {
            return Some(vec![from]);
        }
        let parent = self.parents_from(from, allow_engage);
        parent[to.0]?;
        let mut path = vec![to];
        let mut cur = to;
        while let Some(p) = parent[cur.0] {
            path.push(p);
            if p == from {
                break;
            }
            cur = p;
        }
        path.reverse();
        Some(path)
    }

    /// First step of the route toward `goal`; `goal` itself when already there.
    pub fn next_hop(&self, from: StateId, goal: StateId) -> Option<StateId> {
        let route = self.route(from, goal)?;
        Some(*route.get(1).unwrap_or(&goal))
    }

    /// Menu path the device walks from the root to `id`, root first.
    pub fn path_from_root(&self, id: StateId) -> Option<Vec<StateId>> {
        self.path(self.root, id, true)
    }

    pub fn unreachable_from_root(&self) -> Vec<&str> {
        let parent = self.parents_from(self.root, true);
        self.states
            .iter()
            .filter(|s| s.id != self.root && parent[s.id.0].is_none())
            .map(|s| s.name.as_str())
            .collect()
    }

    pub fn requirements(&self) -> Requirements {
        let mut req = Requirements::default();
        for state in &self.states {
            let scrolls = state.transitions.iter().any(|t| t.scrollable);
            if let (Some(policy), true) = (&state.scroll, scrolls) {
                req.gestures.insert(policy.gesture.clone());
            }
            for t in &state.transitions {
                if let Trigger::Target(name) = &t.trigger {
                    req.targets.insert(name.clone());
                }
                for step in t.action.steps() {
                    match step {
                        Action::Tap(n) => {
                            req.points.insert(n.clone());
                        }
                        Action::Swipe(n) => {
                            req.gestures.insert(n.clone());
                        }
                        _ => {}
                    }
                }
            }
        }
        req
    }

    /// A state is observable when its confirming target is calibrated.
    pub fn is_observable(&self, id: StateId, calibration: &Calibration) -> bool {
        calibration.has_target(self.state(id).confirm_target())
    }

    /// Check that everything the graph acts on is calibrated.
    pub fn validate(&self, calibration: &Calibration) -> PilotResult<Coverage> {
        let unreachable = self.unreachable_from_root();
        if !unreachable.is_empty() {
            return Err(PilotError::Navigation(format!(
                "states unreachable from {}: {}",
                self.name(self.root),
                unreachable.join(", ")
            )));
        }

        let req = self.requirements();
        let mut missing: Vec<String> = Vec::new();
        for p in &req.points {
            if calibration.point(p).is_err() {
                missing.push(format!("point {p}"));
            }
        }
        for g in &req.gestures {
            if calibration.gesture(g).is_err() {
                missing.push(format!("gesture {g}"));
            }
        }
        for t in &req.targets {
            if !calibration.has_target(t) {
                missing.push(format!("target {t}"));
            }
        }
        if !missing.is_empty() {
            return Err(PilotError::Calibration(format!(
                "missing or mistyped entries: {}",
                missing.join(", ")
            )));
        }

        let observable = self
            .states
            .iter()
            .filter(|s| self.is_observable(s.id, calibration))
            .count();
        Ok(Coverage {
            states: self.states.len(),
            observable,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_graph() -> MenuGraph {
        MenuGraph::build(&TopologyConfig::default(), &NavigationConfig::default())
    }

    #[test]
    fn default_topology_size() {
        let g = default_graph();
        // 6 fixed + per difficulty: 2 + A (10 pages + 11 leaves) + B (1 page + 1 leaf)
        assert_eq!(g.len(), 6 + 4 * (2 + 21 + 2));
        assert_eq!(g.name(g.root()), HOME);
    }

    #[test]
    fn every_state_reachable_from_root() {
        let g = default_graph();
        assert!(g.unreachable_from_root().is_empty());
        for s in g.states() {
            assert!(g.path_from_root(s.id).is_some(), "{} unreachable", s.name);
        }
    }

    #[test]
    fn expansion_placement_follows_list_geometry() {
        let t = TopologyConfig::default();
        assert_eq!(expansion_placement(&t, 1), (0, 2));
        assert_eq!(expansion_placement(&t, 2), (0, 3));
        assert_eq!(expansion_placement(&t, 3), (1, 3));
        assert_eq!(expansion_placement(&t, 11), (9, 3));
    }

    #[test]
    fn lowest_difficulty_is_not_scrollable() {
        let g = default_graph();
        let select = g.state(g.find(DIFFICULTY_SELECT).unwrap());
        let beginner = g.find(&difficulty_state("beginner")).unwrap();
        let expert = g.find(&difficulty_state("expert")).unwrap();
        let to = |id| select.transitions.iter().find(|t| t.to == id).unwrap();
        assert!(!to(beginner).scrollable);
        assert!(to(expert).scrollable);
    }

    #[test]
    fn route_to_leaf_walks_the_menu() {
        let g = default_graph();
        let leaf = g.leaf_for(&Branch::new("advanced", "A", 4)).unwrap();
        let names: Vec<&str> = g
            .route(g.root(), leaf)
            .unwrap()
            .into_iter()
            .map(|id| g.name(id))
            .collect();
        assert_eq!(
            names,
            vec![
                "home",
                "battles",
                "difficulty-select",
                "difficulty-advanced",
                "expansions-advanced",
                "expansion-list-advanced-a-page-1",
                "expansion-list-advanced-a-page-2",
                "expansion-list-advanced-a-page-3",
                "expansion-advanced-a-4",
            ]
        );
    }

    #[test]
    fn routes_never_pass_through_a_battle() {
        let g = default_graph();
        let from = g.leaf_for(&Branch::new("beginner", "A", 1)).unwrap();
        let to = g.leaf_for(&Branch::new("expert", "B", 1)).unwrap();
        let route = g.route(from, to).unwrap();
        let setup = g.find(BATTLE_SETUP).unwrap();
        assert!(!route.contains(&setup));
        assert_eq!(g.next_hop(from, to), g.find(&expansions_state("beginner")));
        assert_eq!(g.next_hop(to, to), Some(to));
    }

    #[test]
    fn battle_states_lead_back_home() {
        let g = default_graph();
        let result = g.find(BATTLE_RESULT).unwrap();
        assert_eq!(g.successors(result), vec![g.root()]);
        let in_battle = g.state(g.find(IN_BATTLE).unwrap());
        assert_eq!(in_battle.tick_budget, Some(900));
        assert!(in_battle.transitions.iter().any(|t| t.trigger == Trigger::Timeout));
    }

    #[test]
    fn only_the_reward_engage_is_verified() {
        let g = default_graph();
        let verified: Vec<&Transition> = g
            .states()
            .flat_map(|s| s.transitions.iter())
            .filter(|t| t.verify)
            .collect();
        assert!(!verified.is_empty());
        assert!(verified
            .iter()
            .all(|t| t.engage && t.trigger == Trigger::Target(REWARD_TARGET.into())));
    }

    #[test]
    fn validate_lists_missing_calibration() {
        let g = default_graph();
        let err = g.validate(&Calibration::default()).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("point battles_tab"));
        assert!(msg.contains("target reward_icons"));
        assert!(msg.contains("gesture expansion_scroll"));
    }

    #[test]
    fn requirements_cover_every_slot() {
        let req = default_graph().requirements();
        assert!(req.points.contains("expansion_slot.2"));
        assert!(req.points.contains("expansion_slot.3"));
        assert!(!req.points.contains("expansion_slot.4"));
        assert!(req.points.contains("series_button.B"));
        assert!(req.targets.contains("difficulty_button.beginner"));
        assert!(req.gestures.contains(DIFFICULTY_SCROLL));
    }
}
