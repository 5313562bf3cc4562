//! Labeled reachability graph of a model.

use std::fmt::{Debug, Formatter};

use crate::bitset::BitSet;
use crate::fault_set::FaultSet;
use crate::transition::StateFormulaSet;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct GraphEdge {
    pub target: u32,
    /// Labels of the target state.
    pub formulas: StateFormulaSet,
    /// Faults active during the step.
    pub faults: FaultSet,
}

/// Edges and labels collected by one worker.
#[derive(Debug, Default)]
pub(crate) struct GraphFragment {
    pub edges: Vec<(u32, GraphEdge)>,
    pub initial: Vec<GraphEdge>,
    pub labels: Vec<(u32, StateFormulaSet)>,
}

/// Reachable states with their outgoing edges in compressed sparse row layout.
pub struct StateGraph {
    /// Edges of state `s` are `edges[offsets[s]..offsets[s + 1]]`.
    offsets: Vec<u32>,
    edges: Vec<GraphEdge>,
    initial: Vec<GraphEdge>,
    labels: Vec<StateFormulaSet>,
    label_names: Vec<String>,
}

impl StateGraph {
    pub(crate) fn from_fragments(
        state_count: usize,
        fragments: Vec<GraphFragment>,
        label_names: Vec<String>,
    ) -> Self {
        let mut edges = Vec::new();
        let mut initial = Vec::new();
        let mut labels = vec![StateFormulaSet::empty(); state_count];
        for fragment in fragments {
            edges.extend(fragment.edges);
            initial.extend(fragment.initial);
            for (state, formulas) in fragment.labels {
                labels[state as usize] = formulas;
            }
        }
        // Stable: the edges of a state keep their enumeration order.
        edges.sort_by_key(|&(source, _)| source);

        let mut offsets = vec![0u32; state_count + 1];
        for &(source, _) in &edges {
            offsets[source as usize + 1] += 1;
        }
        for state in 0..state_count {
            offsets[state + 1] += offsets[state];
        }

        Self {
            offsets,
            edges: edges.into_iter().map(|(_, edge)| edge).collect(),
            initial,
            labels,
            label_names,
        }
    }

    pub fn state_count(&self) -> usize {
        self.labels.len()
    }

    /// Number of edges, including the initial transitions.
    pub fn transition_count(&self) -> usize {
        self.edges.len() + self.initial.len()
    }

    pub fn initial_transitions(&self) -> &[GraphEdge] {
        &self.initial
    }

    pub fn successors(&self, state: u32) -> &[GraphEdge] {
        let start = self.offsets[state as usize] as usize;
        let end = self.offsets[state as usize + 1] as usize;
        &self.edges[start..end]
    }

    pub fn labels(&self, state: u32) -> StateFormulaSet {
        self.labels[state as usize]
    }

    pub fn label_names(&self) -> &[String] {
        &self.label_names
    }

    /// States without outgoing edges.
    pub fn terminal_states(&self) -> BitSet {
        BitSet::from_predicate(self.state_count(), |state| self.successors(state).is_empty())
    }

    /// States labeled with `label`.
    pub fn states_satisfying(&self, label: usize) -> BitSet {
        BitSet::from_predicate(self.state_count(), |state| self.labels(state).get(label))
    }
}

impl Debug for StateGraph {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateGraph")
            .field("states", &self.state_count())
            .field("transitions", &self.transition_count())
            .finish()
    }
}
