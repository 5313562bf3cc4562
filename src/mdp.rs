//! Markov decision processes with flat probability distributions.
//!
//! Every state owns a chain of distributions; every distribution owns a chain
//! of transitions. Both chains are singly linked through `u32` indices into
//! pre-sized arrays.

use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use crate::error::{Capacity, Error, Result};
use crate::formula::FormulaLabels;
use crate::transition::StateFormulaSet;

const NONE: u32 = u32::MAX;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
struct DistributionElement {
    first_transition: u32,
    next: u32,
}

#[derive(Debug, Copy, Clone, PartialEq)]
struct TransitionElement {
    target: u32,
    probability: f64,
    next: u32,
}

pub struct Mdp {
    state_first_distribution: Vec<u32>,
    initial_first_distribution: u32,
    distributions: Vec<DistributionElement>,
    transitions: Vec<TransitionElement>,
    state_labels: Vec<StateFormulaSet>,
    labels: Arc<FormulaLabels>,
}

impl Mdp {
    pub fn state_count(&self) -> usize {
        self.state_first_distribution.len()
    }

    pub fn distribution_count(&self) -> usize {
        self.distributions.len()
    }

    pub fn transition_count(&self) -> usize {
        self.transitions.len()
    }

    fn chain(&self, first: u32) -> impl Iterator<Item = u32> + '_ {
        std::iter::successors((first != NONE).then_some(first), move |&distribution| {
            let next = self.distributions[distribution as usize].next;
            (next != NONE).then_some(next)
        })
    }

    /// Distributions leaving `state`.
    pub fn distributions(&self, state: u32) -> impl Iterator<Item = u32> + '_ {
        self.chain(self.state_first_distribution[state as usize])
    }

    /// Distributions of the initial step.
    pub fn initial_distributions(&self) -> impl Iterator<Item = u32> + '_ {
        self.chain(self.initial_first_distribution)
    }

    /// `(target, probability)` pairs of a distribution.
    pub fn transitions(&self, distribution: u32) -> impl Iterator<Item = (u32, f64)> + '_ {
        let first = self.distributions[distribution as usize].first_transition;
        std::iter::successors((first != NONE).then_some(first), move |&transition| {
            let next = self.transitions[transition as usize].next;
            (next != NONE).then_some(next)
        })
        .map(move |transition| {
            let element = &self.transitions[transition as usize];
            (element.target, element.probability)
        })
    }

    pub fn state_labels(&self, state: u32) -> StateFormulaSet {
        self.state_labels[state as usize]
    }

    pub fn labels(&self) -> &Arc<FormulaLabels> {
        &self.labels
    }
}

impl Debug for Mdp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mdp")
            .field("states", &self.state_count())
            .field("distributions", &self.distribution_count())
            .field("transitions", &self.transition_count())
            .finish()
    }
}

/// Appends distributions to the chains of an [`Mdp`].
pub struct MdpBuilder {
    mdp: Mdp,
    state_last_distribution: Vec<u32>,
    initial_last_distribution: u32,
    capacity: usize,
}

impl MdpBuilder {
    /// Creates a builder for `state_count` states and at most `capacity` transitions.
    pub fn new(state_count: usize, capacity: usize, labels: Arc<FormulaLabels>) -> Self {
        Self {
            mdp: Mdp {
                state_first_distribution: vec![NONE; state_count],
                initial_first_distribution: NONE,
                distributions: Vec::new(),
                transitions: Vec::with_capacity(capacity.min(1 << 16)),
                state_labels: vec![StateFormulaSet::empty(); state_count],
                labels,
            },
            state_last_distribution: vec![NONE; state_count],
            initial_last_distribution: NONE,
            capacity,
        }
    }

    pub fn set_state_labels(&mut self, state: u32, formulas: StateFormulaSet) {
        self.mdp.state_labels[state as usize] = formulas;
    }

    fn push_distribution(&mut self, distribution: &[(u32, f64)]) -> Result<u32> {
        assert!(!distribution.is_empty(), "Empty distribution");
        if self.mdp.transitions.len() + distribution.len() > self.capacity {
            return Err(Error::CapacityExceeded {
                kind: Capacity::Distribution,
                capacity: self.capacity,
            });
        }

        let first = self.mdp.transitions.len() as u32;
        for (i, &(target, probability)) in distribution.iter().enumerate() {
            assert!(
                (target as usize) < self.mdp.state_count(),
                "Unknown target state {}",
                target
            );
            let next = if i + 1 < distribution.len() {
                first + i as u32 + 1
            } else {
                NONE
            };
            self.mdp.transitions.push(TransitionElement {
                target,
                probability,
                next,
            });
        }

        self.mdp.distributions.push(DistributionElement {
            first_transition: first,
            next: NONE,
        });
        Ok(self.mdp.distributions.len() as u32 - 1)
    }

    fn link(&mut self, last: u32, distribution: u32) {
        if last != NONE {
            self.mdp.distributions[last as usize].next = distribution;
        }
    }

    pub fn add_distribution(&mut self, state: u32, distribution: &[(u32, f64)]) -> Result<()> {
        let index = self.push_distribution(distribution)?;
        let last = self.state_last_distribution[state as usize];
        self.link(last, index);
        if last == NONE {
            self.mdp.state_first_distribution[state as usize] = index;
        }
        self.state_last_distribution[state as usize] = index;
        Ok(())
    }

    pub fn add_initial_distribution(&mut self, distribution: &[(u32, f64)]) -> Result<()> {
        let index = self.push_distribution(distribution)?;
        let last = self.initial_last_distribution;
        self.link(last, index);
        if last == NONE {
            self.mdp.initial_first_distribution = index;
        }
        self.initial_last_distribution = index;
        Ok(())
    }

    pub fn build(self) -> Mdp {
        self.mdp
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    #[test]
    fn test_chains() {
        let mut builder = MdpBuilder::new(3, 16, Arc::new(FormulaLabels::default()));
        builder.add_initial_distribution(&[(0, 1.0)]).unwrap();
        builder.add_distribution(0, &[(1, 0.5), (2, 0.5)]).unwrap();
        builder.add_distribution(1, &[(1, 1.0)]).unwrap();
        builder.add_distribution(0, &[(0, 1.0)]).unwrap();
        builder.set_state_labels(2, StateFormulaSet::from_bits(1));
        let mdp = builder.build();

        assert_eq!(mdp.state_count(), 3);
        assert_eq!(mdp.distribution_count(), 4);
        assert_eq!(mdp.transition_count(), 5);

        let of_state = |state| -> Vec<Vec<(u32, f64)>> {
            mdp.distributions(state).map(|d| mdp.transitions(d).collect()).collect()
        };
        assert_eq!(of_state(0), vec![vec![(1, 0.5), (2, 0.5)], vec![(0, 1.0)]]);
        assert_eq!(of_state(1), vec![vec![(1, 1.0)]]);
        assert!(of_state(2).is_empty());
        assert_eq!(mdp.initial_distributions().count(), 1);
        assert!(mdp.state_labels(2).get(0));
    }

    #[test]
    fn test_capacity() {
        let mut builder = MdpBuilder::new(2, 2, Arc::new(FormulaLabels::default()));
        builder.add_distribution(0, &[(0, 0.5), (1, 0.5)]).unwrap();
        assert!(matches!(
            builder.add_distribution(1, &[(1, 1.0)]),
            Err(Error::CapacityExceeded {
                kind: Capacity::Distribution,
                capacity: 2
            })
        ));
    }
}
