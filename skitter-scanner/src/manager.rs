//! Ownership and traversal of the crawl graph.

use crate::model::{ActionId, ActionSpec, CrawlAction, CrawlInput, CrawlState, StateHash, StateId};
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::debug;

/// Arena holding every state and action discovered by a crawl.
///
/// Lookups never mutate the graph and report absence with `None`.
#[derive(Debug, Default)]
pub struct CrawlStateManager {
    states: Vec<CrawlState>,
    // Pruned actions leave a tombstone so ids stay stable
    actions: Vec<Option<CrawlAction>>,
    by_hash: HashMap<StateHash, StateId>,
    root: Option<StateId>,
    dispatched: HashSet<ActionId>,
}

impl CrawlStateManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a state, or returns the existing one carrying the same hash.
    ///
    /// The depth of an existing state is left untouched: the depth recorded at
    /// first discovery is authoritative.
    pub fn add_state(&mut self, url: impl Into<String>, hash: StateHash, depth: usize) -> StateId {
        if let Some(&existing) = self.by_hash.get(&hash) {
            return existing;
        }
        let id = StateId(self.states.len());
        self.by_hash.insert(hash.clone(), id);
        self.states.push(CrawlState::new(id, url.into(), hash, depth));
        id
    }

    pub fn set_root(&mut self, id: StateId) {
        self.root = Some(id);
    }

    pub fn root(&self) -> Option<StateId> {
        self.root
    }

    pub fn state(&self, id: StateId) -> Option<&CrawlState> {
        self.states.get(id.0)
    }

    pub fn action(&self, id: ActionId) -> Option<&CrawlAction> {
        self.actions.get(id.0).and_then(Option::as_ref)
    }

    /// Appends an action to `parent`, unless the parent already holds one
    /// with the same locator and content hash.
    pub fn add_action(&mut self, parent: StateId, spec: ActionSpec) -> Option<ActionId> {
        let state = self.states.get(parent.0)?;
        let duplicate = state.actions.iter().filter_map(|&a| self.action(a)).any(|a| {
            a.locator == spec.locator && a.content_hash == spec.content_hash
        });
        if duplicate {
            return None;
        }

        let id = ActionId(self.actions.len());
        self.actions.push(Some(CrawlAction {
            id,
            element: spec.element,
            operation: spec.operation,
            locator: spec.locator,
            xpath: spec.xpath,
            content_hash: spec.content_hash,
            parent,
            child: None,
        }));
        self.states[parent.0].actions.push(id);
        Some(id)
    }

    pub fn add_input(&mut self, state: StateId, input: CrawlInput) {
        if let Some(state) = self.states.get_mut(state.0) {
            state.inputs.push(input);
        }
    }

    /// Links an executed action to the state it produced. The link is set
    /// once; returns false if the action is unknown or already linked.
    pub fn set_child(&mut self, action: ActionId, child: StateId) -> bool {
        if child.0 >= self.states.len() {
            return false;
        }
        match self.actions.get_mut(action.0).and_then(Option::as_mut) {
            Some(action) if action.child.is_none() => {
                action.child = Some(child);
                true
            }
            _ => false,
        }
    }

    /// Permanently strikes an action from its parent state.
    pub fn remove_action(&mut self, id: ActionId) -> Option<CrawlAction> {
        let action = self.actions.get_mut(id.0)?.take()?;
        if let Some(parent) = self.states.get_mut(action.parent.0) {
            parent.actions.retain(|&a| a != id);
        }
        self.dispatched.remove(&id);
        debug!("Removed action {} ({}) from {}", id, action.locator, action.parent);
        Some(action)
    }

    /// False iff an action with this locator and content hash is reachable
    /// from the root.
    pub fn is_action_unique(&self, locator: &str, content_hash: &str) -> bool {
        let Some(root) = self.root else {
            return true;
        };

        let mut seen_actions = HashSet::new();
        let mut queue = VecDeque::from([root]);
        while let Some(state_id) = queue.pop_front() {
            let Some(state) = self.state(state_id) else {
                continue;
            };
            for &action_id in &state.actions {
                if !seen_actions.insert(action_id) {
                    continue;
                }
                let Some(action) = self.action(action_id) else {
                    continue;
                };
                if action.locator == locator && action.content_hash == content_hash {
                    return false;
                }
                if let Some(child) = action.child {
                    queue.push_back(child);
                }
            }
        }
        true
    }

    /// Depth-first search over the states reachable from the root.
    pub fn find_state_by_hash(&self, hash: &StateHash) -> Option<&CrawlState> {
        let root = self.root?;
        let mut visited = HashSet::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if !visited.insert(id) {
                continue;
            }
            let state = self.state(id)?;
            if &state.hash == hash {
                return Some(state);
            }
            stack.extend(self.children(state).filter(|c| !visited.contains(c)));
        }
        None
    }

    /// Picks the next action to execute and marks it dispatched.
    ///
    /// States are walked depth first from the root. Within a state the first
    /// unexecuted, undispatched action in discovery order wins; failing that,
    /// the walk descends into the state's children, first-discovered first.
    pub fn next_action(&mut self) -> Option<ActionId> {
        let root = self.root?;
        let mut visited = HashSet::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if !visited.insert(id) {
                continue;
            }
            let Some(state) = self.state(id) else {
                continue;
            };

            let mut children = Vec::new();
            let mut eligible = None;
            for action in state.actions.iter().filter_map(|&a| self.action(a)) {
                match action.child {
                    Some(child) => children.push(child),
                    None if !self.dispatched.contains(&action.id) => {
                        eligible = Some(action.id);
                        break;
                    }
                    None => {}
                }
            }

            if let Some(action) = eligible {
                self.dispatched.insert(action);
                return Some(action);
            }
            stack.extend(children.into_iter().rev().filter(|c| !visited.contains(c)));
        }
        None
    }

    /// Fewest actions that lead from the root to `target`, in execution
    /// order. The root itself is reached by the empty path.
    pub fn shortest_path(&self, target: StateId) -> Option<Vec<ActionId>> {
        let root = self.root?;
        if root == target {
            return Some(Vec::new());
        }

        // state -> action that first reached it
        let mut came_from: HashMap<StateId, ActionId> = HashMap::new();
        let mut visited = HashSet::from([root]);
        let mut queue = VecDeque::from([root]);
        while let Some(id) = queue.pop_front() {
            let Some(state) = self.state(id) else {
                continue;
            };
            for action in state.actions.iter().filter_map(|&a| self.action(a)) {
                let Some(child) = action.child else {
                    continue;
                };
                if !visited.insert(child) {
                    continue;
                }
                came_from.insert(child, action.id);
                if child == target {
                    return Some(self.unwind(&came_from, target));
                }
                queue.push_back(child);
            }
        }
        None
    }

    fn unwind(&self, came_from: &HashMap<StateId, ActionId>, target: StateId) -> Vec<ActionId> {
        let mut path = Vec::new();
        let mut current = target;
        while let Some(&action) = came_from.get(&current) {
            path.push(action);
            match self.action(action) {
                Some(a) => current = a.parent,
                None => break,
            }
        }
        path.reverse();
        path
    }

    fn children<'a>(&'a self, state: &'a CrawlState) -> impl Iterator<Item = StateId> + 'a {
        state
            .actions
            .iter()
            .filter_map(|&a| self.action(a))
            .filter_map(|a| a.child)
    }

    pub fn states(&self) -> impl Iterator<Item = &CrawlState> {
        self.states.iter()
    }

    pub fn actions(&self) -> impl Iterator<Item = &CrawlAction> {
        self.actions.iter().flatten()
    }

    pub fn state_count(&self) -> usize {
        self.states.len()
    }

    pub fn action_count(&self) -> usize {
        self.actions().count()
    }

    /// Executed edges of the graph, for export. Nodes are labelled with URL
    /// and depth, edges with the action's locator.
    pub fn to_graph(&self) -> DiGraph<String, String> {
        let mut graph = DiGraph::new();
        let nodes: Vec<NodeIndex> = self
            .states
            .iter()
            .map(|s| graph.add_node(format!("{} [{}] depth={}", s.url, s.hash, s.depth)))
            .collect();
        for action in self.actions() {
            if let Some(child) = action.child {
                graph.add_edge(
                    nodes[action.parent.0],
                    nodes[child.0],
                    action.locator.clone(),
                );
            }
        }
        graph
    }
}
