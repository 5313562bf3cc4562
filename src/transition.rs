//! Candidate transitions computed while expanding one state.

use std::fmt::{Debug, Formatter};

use serde::{Deserialize, Serialize};

use crate::error::{Capacity, Error, Result};
use crate::fault_set::FaultSet;

/// Set of state formula labels holding in a state; bit `i` is label `i`.
#[derive(Copy, Clone, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct StateFormulaSet(u32);

impl StateFormulaSet {
    /// Maximal number of labels.
    pub const CAPACITY: usize = 32;

    pub const fn empty() -> Self {
        StateFormulaSet(0)
    }

    pub const fn from_bits(bits: u32) -> Self {
        StateFormulaSet(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    #[inline]
    pub fn get(self, label: usize) -> bool {
        assert!(label < Self::CAPACITY, "Label {} out of range", label);
        self.0 & (1 << label) != 0
    }

    #[inline]
    pub fn set(&mut self, label: usize, value: bool) {
        assert!(label < Self::CAPACITY, "Label {} out of range", label);
        if value {
            self.0 |= 1 << label;
        } else {
            self.0 &= !(1 << label);
        }
    }
}

impl Debug for StateFormulaSet {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "StateFormulaSet({:#b})", self.0)
    }
}

/// A transition proposed by one path of a model step.
///
/// The target state vector lives in the owning [`TransitionBuffer`].
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateTransition {
    pub activated_faults: FaultSet,
    pub formulas: StateFormulaSet,
    pub probability: f64,
    /// Leaf of the step graph the path ended in.
    pub continuation_id: usize,
    pub is_valid: bool,
    /// Set by modifiers when committing this transition must stop the traversal.
    pub terminates: bool,
}

/// Fixed-capacity scratch buffer for the transitions of one state.
#[derive(Debug, Clone)]
pub struct TransitionBuffer {
    state_size: usize,
    capacity: usize,
    transitions: Vec<CandidateTransition>,
    targets: Vec<u8>,
    choices: Option<Vec<Vec<usize>>>,
}

impl TransitionBuffer {
    pub fn new(state_size: usize, capacity: usize) -> Self {
        Self {
            state_size,
            capacity,
            transitions: Vec::with_capacity(capacity),
            targets: Vec::with_capacity(capacity * state_size),
            choices: None,
        }
    }

    /// Makes the buffer remember the choices of every path it receives.
    pub fn with_choice_recording(mut self) -> Self {
        self.choices = Some(Vec::new());
        self
    }

    pub fn state_size(&self) -> usize {
        self.state_size
    }

    pub fn records_choices(&self) -> bool {
        self.choices.is_some()
    }

    pub fn len(&self) -> usize {
        self.transitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }

    pub fn clear(&mut self) {
        self.transitions.clear();
        self.targets.clear();
        if let Some(choices) = &mut self.choices {
            choices.clear();
        }
    }

    /// Appends a transition with a zeroed target vector and returns its index.
    pub fn push(&mut self, transition: CandidateTransition) -> Result<usize> {
        if self.transitions.len() >= self.capacity {
            return Err(Error::CapacityExceeded {
                kind: Capacity::Successor,
                capacity: self.capacity,
            });
        }
        self.transitions.push(transition);
        self.targets.resize(self.targets.len() + self.state_size, 0);
        if let Some(choices) = &mut self.choices {
            choices.push(Vec::new());
        }
        Ok(self.transitions.len() - 1)
    }

    pub fn transition(&self, index: usize) -> &CandidateTransition {
        &self.transitions[index]
    }

    pub fn transition_mut(&mut self, index: usize) -> &mut CandidateTransition {
        &mut self.transitions[index]
    }

    pub fn target(&self, index: usize) -> &[u8] {
        let start = index * self.state_size;
        &self.targets[start..start + self.state_size]
    }

    pub fn target_mut(&mut self, index: usize) -> &mut [u8] {
        let start = index * self.state_size;
        &mut self.targets[start..start + self.state_size]
    }

    /// Returns the transition and its target vector for in-place modification.
    pub fn get_mut(&mut self, index: usize) -> (&mut CandidateTransition, &mut [u8]) {
        let start = index * self.state_size;
        (
            &mut self.transitions[index],
            &mut self.targets[start..start + self.state_size],
        )
    }

    pub fn set_choices(&mut self, index: usize, path: Vec<usize>) {
        if let Some(choices) = &mut self.choices {
            choices[index] = path;
        }
    }

    /// Choices of the path that produced transition `index`, if recording is enabled.
    pub fn choices(&self, index: usize) -> Option<&[usize]> {
        self.choices.as_ref().map(|choices| choices[index].as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&CandidateTransition, &[u8])> {
        self.transitions
            .iter()
            .zip(self.targets.chunks_exact(self.state_size.max(1)))
    }

    pub fn valid_count(&self) -> usize {
        self.transitions.iter().filter(|t| t.is_valid).count()
    }
}
