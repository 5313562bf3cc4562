//! Labeled transition Markov decision processes.
//!
//! The steps of a model interleave nondeterministic and probabilistic choices
//! in arbitrary order. An [`Ltmdp`] keeps that structure: the transitions
//! leaving a state form a *continuation graph* whose inner elements are
//! nondeterministic or probabilistic splits and whose leaves are transition
//! targets. Children of a split are stored contiguously as `from..=to`.
//! Forwarded continuations, produced when a model declares a fault activation
//! inert, point at the element that stands for both alternatives.

use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use log::debug;

use crate::error::{Error, Result};
use crate::formula::FormulaLabels;
use crate::mdp::{Mdp, MdpBuilder};
use crate::step_graph::{ChoiceKind, StepGraph};
use crate::transition::{StateFormulaSet, TransitionBuffer};

const PROBABILITY_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ContinuationKind {
    /// Leaf; `from` indexes the transition targets.
    Target,
    /// Stands for the element `from`.
    Forward,
    Nondeterministic,
    Probabilistic,
    /// Leaf whose transition was invalidated.
    Blocked,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ContinuationElement {
    pub kind: ContinuationKind,
    pub from: u32,
    pub to: u32,
    /// Probability relative to the parent split.
    pub probability: f64,
}

impl ContinuationElement {
    fn placeholder() -> Self {
        Self {
            kind: ContinuationKind::Blocked,
            from: 0,
            to: 0,
            probability: 1.0,
        }
    }

    pub fn children(&self) -> std::ops::RangeInclusive<u32> {
        match self.kind {
            ContinuationKind::Nondeterministic | ContinuationKind::Probabilistic => self.from..=self.to,
            #[allow(clippy::reversed_empty_ranges)]
            _ => 1..=0,
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct TransitionTarget {
    pub state: u32,
    pub formulas: StateFormulaSet,
}

/// Continuation graphs built by one worker, with worker-local indices.
#[derive(Debug, Default)]
pub(crate) struct LtmdpFragment {
    elements: Vec<ContinuationElement>,
    targets: Vec<TransitionTarget>,
    roots: Vec<(u32, u32)>,
    initial_root: Option<u32>,
    labels: Vec<(u32, StateFormulaSet)>,
}

impl LtmdpFragment {
    /// Copies the step graph of one expanded state. Returns the number of elements added.
    ///
    /// `states[i]` is the stored target of transition `i`, or `None` if it is invalid.
    pub fn add_step(
        &mut self,
        source: Option<u32>,
        graph: &StepGraph,
        buffer: &TransitionBuffer,
        states: &[Option<u32>],
    ) -> usize {
        let base = self.elements.len();
        let mut elements = vec![u32::MAX; graph.len()];
        let mut order = vec![0usize];
        elements[0] = base as u32;
        self.elements.push(ContinuationElement::placeholder());

        let mut position = 0;
        while position < order.len() {
            let cid = order[position];
            position += 1;
            let node = graph.node(cid);
            let element = elements[cid] as usize;

            let kind = match node.kind {
                ChoiceKind::Nondeterministic => ContinuationKind::Nondeterministic,
                ChoiceKind::Probabilistic => ContinuationKind::Probabilistic,
                ChoiceKind::Forward => {
                    // Resolved once all split children have their elements.
                    continue;
                }
                ChoiceKind::UnsplitOrFinal => {
                    let target = node
                        .target
                        .and_then(|transition| states[transition].map(|state| (transition, state)));
                    self.elements[element] = match target {
                        Some((transition, state)) => {
                            self.targets.push(TransitionTarget {
                                state,
                                formulas: buffer.transition(transition).formulas,
                            });
                            ContinuationElement {
                                kind: ContinuationKind::Target,
                                from: (self.targets.len() - 1) as u32,
                                to: (self.targets.len() - 1) as u32,
                                probability: node.probability,
                            }
                        }
                        None => ContinuationElement {
                            probability: node.probability,
                            ..ContinuationElement::placeholder()
                        },
                    };
                    continue;
                }
            };

            let from = self.elements.len() as u32;
            for child in node.children() {
                elements[child] = self.elements.len() as u32;
                self.elements.push(ContinuationElement::placeholder());
                order.push(child);
            }
            self.elements[element] = ContinuationElement {
                kind,
                from,
                to: self.elements.len() as u32 - 1,
                probability: node.probability,
            };
        }

        for &cid in &order {
            let node = graph.node(cid);
            if node.kind == ChoiceKind::Forward {
                let target = elements[node.to];
                assert_ne!(target, u32::MAX, "Continuation {} forwards to an unreachable continuation", cid);
                self.elements[elements[cid] as usize] = ContinuationElement {
                    kind: ContinuationKind::Forward,
                    from: target,
                    to: target,
                    probability: node.probability,
                };
            }
        }

        match source {
            Some(state) => self.roots.push((state, base as u32)),
            None => self.initial_root = Some(base as u32),
        }
        self.elements.len() - base
    }

    pub fn add_label(&mut self, state: u32, formulas: StateFormulaSet) {
        self.labels.push((state, formulas));
    }
}

pub struct Ltmdp {
    elements: Vec<ContinuationElement>,
    targets: Vec<TransitionTarget>,
    state_roots: Vec<u32>,
    initial_root: u32,
    state_labels: Vec<StateFormulaSet>,
    labels: Arc<FormulaLabels>,
}

impl Ltmdp {
    pub(crate) fn from_fragments(
        state_count: usize,
        fragments: Vec<LtmdpFragment>,
        labels: Arc<FormulaLabels>,
    ) -> Self {
        let mut elements = Vec::new();
        let mut targets = Vec::new();
        let mut state_roots = vec![u32::MAX; state_count];
        let mut initial_root = u32::MAX;
        let mut state_labels = vec![StateFormulaSet::empty(); state_count];

        for fragment in fragments {
            let element_offset = elements.len() as u32;
            let target_offset = targets.len() as u32;
            elements.extend(fragment.elements.into_iter().map(|mut element| {
                match element.kind {
                    ContinuationKind::Target => {
                        element.from += target_offset;
                        element.to += target_offset;
                    }
                    ContinuationKind::Blocked => {}
                    _ => {
                        element.from += element_offset;
                        element.to += element_offset;
                    }
                }
                element
            }));
            targets.extend(fragment.targets);
            for (state, root) in fragment.roots {
                state_roots[state as usize] = root + element_offset;
            }
            if let Some(root) = fragment.initial_root {
                initial_root = root + element_offset;
            }
            for (state, formulas) in fragment.labels {
                state_labels[state as usize] = formulas;
            }
        }

        assert_ne!(initial_root, u32::MAX, "No initial continuation graph");
        assert!(
            state_roots.iter().all(|&root| root != u32::MAX),
            "Some states were never expanded"
        );

        Self {
            elements,
            targets,
            state_roots,
            initial_root,
            state_labels,
            labels,
        }
    }

    pub fn state_count(&self) -> usize {
        self.state_roots.len()
    }

    pub fn element_count(&self) -> usize {
        self.elements.len()
    }

    pub fn target_count(&self) -> usize {
        self.targets.len()
    }

    pub fn element(&self, index: u32) -> &ContinuationElement {
        &self.elements[index as usize]
    }

    pub fn target(&self, index: u32) -> &TransitionTarget {
        &self.targets[index as usize]
    }

    /// Root of the continuation graph leaving `state`.
    pub fn root(&self, state: u32) -> u32 {
        self.state_roots[state as usize]
    }

    pub fn initial_root(&self) -> u32 {
        self.initial_root
    }

    pub fn state_labels(&self, state: u32) -> StateFormulaSet {
        self.state_labels[state as usize]
    }

    pub fn labels(&self) -> &Arc<FormulaLabels> {
        &self.labels
    }

    /// Checks that the children of every probabilistic split sum to one.
    pub fn validate(&self) -> Result<()> {
        for (index, element) in self.elements.iter().enumerate() {
            if element.kind != ContinuationKind::Probabilistic {
                continue;
            }
            let sum: f64 = element
                .children()
                .map(|child| self.element(child).probability)
                .sum();
            if (sum - 1.0).abs() > PROBABILITY_TOLERANCE {
                return Err(Error::ProbabilityNotConserved {
                    element: index as u32,
                    sum,
                });
            }
        }
        Ok(())
    }

    /// Probability distributions over target states that the element stands for.
    fn distributions(&self, index: u32) -> Vec<Vec<(u32, f64)>> {
        let element = self.element(index);
        match element.kind {
            ContinuationKind::Target => vec![vec![(self.target(element.from).state, 1.0)]],
            ContinuationKind::Forward => self.distributions(element.from),
            ContinuationKind::Blocked => Vec::new(),
            ContinuationKind::Nondeterministic => {
                element.children().flat_map(|child| self.distributions(child)).collect()
            }
            ContinuationKind::Probabilistic => {
                let mut products: Vec<Vec<(u32, f64)>> = vec![Vec::new()];
                for child in element.children() {
                    let weight = self.element(child).probability;
                    let alternatives = self.distributions(child);
                    products = products
                        .iter()
                        .flat_map(|prefix| {
                            alternatives.iter().map(move |alternative| {
                                let mut distribution = prefix.clone();
                                distribution.extend(
                                    alternative
                                        .iter()
                                        .map(|&(state, probability)| (state, probability * weight)),
                                );
                                distribution
                            })
                        })
                        .collect();
                }
                products
            }
        }
    }

    fn normalized_distributions(&self, root: u32) -> Vec<Vec<(u32, f64)>> {
        let mut distributions: Vec<Vec<(u32, f64)>> = self
            .distributions(root)
            .into_iter()
            .map(|mut distribution| {
                distribution.sort_by_key(|&(state, _)| state);
                let mut merged: Vec<(u32, f64)> = Vec::with_capacity(distribution.len());
                for (state, probability) in distribution {
                    match merged.last_mut() {
                        Some((last, sum)) if *last == state => *sum += probability,
                        _ => merged.push((state, probability)),
                    }
                }
                merged.retain(|&(_, probability)| probability > 0.0);
                merged
            })
            .filter(|distribution| !distribution.is_empty())
            .collect();
        distributions.dedup();
        distributions
    }

    /// Flattens the continuation graphs into distributions per state.
    ///
    /// Nondeterministic splits contribute the union of their children's
    /// distributions; probabilistic splits combine one distribution of every
    /// child, weighted by the child's probability.
    pub fn to_mdp(&self, transition_capacity: usize) -> Result<Mdp> {
        let mut builder = MdpBuilder::new(self.state_count(), transition_capacity, Arc::clone(&self.labels));
        for distribution in self.normalized_distributions(self.initial_root) {
            builder.add_initial_distribution(&distribution)?;
        }
        for state in 0..self.state_count() as u32 {
            builder.set_state_labels(state, self.state_labels(state));
            for distribution in self.normalized_distributions(self.root(state)) {
                builder.add_distribution(state, &distribution)?;
            }
        }
        let mdp = builder.build();
        debug!(
            "Flattened LTMDP with {} elements into MDP with {} distributions",
            self.elements.len(),
            mdp.distribution_count()
        );
        Ok(mdp)
    }
}

impl Debug for Ltmdp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ltmdp")
            .field("states", &self.state_count())
            .field("elements", &self.element_count())
            .field("targets", &self.target_count())
            .finish()
    }
}
