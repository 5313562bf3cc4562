//! Recording and replaying the choices of a model step.
//!
//! Models never pick nondeterministic or probabilistic alternatives by
//! themselves. Every decision is routed through the [`ChoiceResolver`], which
//! enumerates all combinations of decisions of one step in depth-first order:
//!
//! ```text
//! resolver.prepare_next_state();
//! while resolver.prepare_next_path()? {
//!     // restore the source state, execute the step,
//!     // every choice calls handle_choice / handle_probabilistic_choice
//! }
//! ```
//!
//! The first time a choice index is reached in a path, option `0` is taken and
//! the number of options is remembered. When the path is finished, the deepest
//! choice with untaken options is advanced and everything after it is
//! forgotten, so the next execution replays the common prefix and explores the
//! next alternative.
//!
//! Each decision also allocates *continuation ids* in the step's
//! [`StepGraph`], which preserves how the decisions nest. A choice can later be
//! *forwarded*: its untaken options are merged into the current path because
//! they would not make a difference (see [`ChoiceResolver::forward_untaken_choices_at_index`]).

use crate::error::{Error, Result};
use crate::step_graph::{ChoiceKind, StepGraph};

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
struct ChosenValue {
    option: usize,
    continuation_id: usize,
}

#[derive(Debug, Clone)]
pub struct ChoiceResolver {
    chosen: Vec<ChosenValue>,
    /// Number of options of each recorded choice; `0` marks choices that are never advanced.
    value_count: Vec<usize>,
    /// Number of choices taken so far in the current path.
    next_index: usize,
    first_path: bool,
    continuation_id: usize,
    next_free_continuation_id: usize,
    step_graph: StepGraph,
}

impl Default for ChoiceResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl ChoiceResolver {
    pub fn new() -> Self {
        Self {
            chosen: Vec::new(),
            value_count: Vec::new(),
            next_index: 0,
            first_path: true,
            continuation_id: 0,
            next_free_continuation_id: 1,
            step_graph: StepGraph::new(),
        }
    }

    /// Prepares the enumeration of all paths of a new step.
    pub fn prepare_next_state(&mut self) {
        self.chosen.clear();
        self.value_count.clear();
        self.next_index = 0;
        self.first_path = true;
        self.continuation_id = 0;
        self.next_free_continuation_id = 1;
        self.step_graph.clear();
    }

    /// Advances to the next path, returning `false` when all paths of the step have been taken.
    pub fn prepare_next_path(&mut self) -> Result<bool> {
        if self.first_path {
            self.first_path = false;
            self.next_index = 0;
            self.continuation_id = 0;
            return Ok(true);
        }

        if self.next_index != self.value_count.len() {
            return Err(Error::Nondeterminism {
                expected: self.value_count.len(),
                actual: self.next_index,
            });
        }

        self.next_index = 0;
        self.continuation_id = 0;

        while let (Some(chosen), Some(&count)) = (self.chosen.pop(), self.value_count.last()) {
            if count > chosen.option + 1 {
                self.chosen.push(ChosenValue {
                    option: chosen.option + 1,
                    continuation_id: chosen.continuation_id + 1,
                });
                return Ok(true);
            }
            self.value_count.pop();
        }

        Ok(false)
    }

    fn record(&mut self, count: usize, kind: ChoiceKind) -> usize {
        assert!(count > 0, "Cannot choose from zero options");

        let index = self.next_index;
        self.next_index += 1;

        if let Some(chosen) = self.chosen.get(index) {
            self.continuation_id = chosen.continuation_id;
            return chosen.option;
        }

        let parent = self.continuation_id;
        let first = self.next_free_continuation_id;
        let last = first + count - 1;
        self.chosen.push(ChosenValue {
            option: 0,
            continuation_id: first,
        });
        self.value_count.push(count);
        self.next_free_continuation_id += count;
        self.continuation_id = first;

        let probability = match kind {
            ChoiceKind::Probabilistic => {
                self.step_graph.probabilistic_split(parent, first, last);
                1.0 / count as f64
            }
            _ => {
                self.step_graph.nondeterministic_split(parent, first, last);
                1.0
            }
        };
        for cid in first..=last {
            self.step_graph.set_probability(cid, probability);
        }

        0
    }

    /// Returns the option to take for a nondeterministic choice among `count` options.
    pub fn handle_choice(&mut self, count: usize) -> usize {
        self.record(count, ChoiceKind::Nondeterministic)
    }

    /// Returns the option to take for a probabilistic choice among `count` options.
    ///
    /// Options are equally likely unless [`set_probability_of_last_choice`][Self::set_probability_of_last_choice]
    /// is called right afterwards.
    pub fn handle_probabilistic_choice(&mut self, count: usize) -> usize {
        self.record(count, ChoiceKind::Probabilistic)
    }

    /// Sets the probability of the option just taken by the most recent choice.
    pub fn set_probability_of_last_choice(&mut self, probability: f64) {
        if self.next_index > 0 && self.next_index == self.value_count.len() {
            self.step_graph
                .set_probability(self.continuation_id, probability);
        }
    }

    /// Merges the untaken options of the choice at `index` into the current path.
    ///
    /// The option taken at `index` must be the first one. Afterwards the choice
    /// is never advanced, and in the step graph the second child of the split
    /// is forwarded to the current continuation, carrying the probability of all
    /// untaken options.
    pub fn forward_untaken_choices_at_index(&mut self, index: usize) {
        assert!(
            index < self.next_index,
            "Choice index {} was not taken in the current path",
            index
        );
        if self.value_count[index] <= 1 {
            return;
        }
        assert_eq!(
            self.chosen[index].option, 0,
            "Only choices that took their first option can be forwarded"
        );

        let parent = if index == 0 {
            0
        } else {
            self.chosen[index - 1].continuation_id
        };
        let taken = self.chosen[index].continuation_id;
        let untaken = taken + 1;

        self.step_graph.prune_to_two(parent);
        self.step_graph.forward(untaken, self.continuation_id);
        let probability = match self.step_graph.kind(parent) {
            ChoiceKind::Probabilistic => 1.0 - self.step_graph.probability(taken),
            _ => 1.0,
        };
        self.step_graph.set_probability(untaken, probability);

        self.value_count[index] = 0;
    }

    /// Makes the resolver replay exactly the given options.
    pub fn set_choices(&mut self, choices: &[usize]) {
        for &option in choices {
            self.chosen.push(ChosenValue {
                option,
                continuation_id: 0,
            });
            self.value_count.push(0);
        }
    }

    /// Options taken in the current path.
    pub fn choices(&self) -> Vec<usize> {
        self.chosen[..self.next_index]
            .iter()
            .map(|chosen| chosen.option)
            .collect()
    }

    /// Index of the most recent choice of the current path.
    pub fn last_choice_index(&self) -> Option<usize> {
        self.next_index.checked_sub(1)
    }

    /// Continuation the current path has reached.
    pub fn continuation_id(&self) -> usize {
        self.continuation_id
    }

    /// Product of the probabilities of the options taken in the current path.
    ///
    /// Forwarded choices do not contribute, since all their options end up in this path.
    pub fn path_probability(&self) -> f64 {
        self.chosen[..self.next_index]
            .iter()
            .zip(&self.value_count)
            .filter(|(_, &count)| count > 0)
            .map(|(chosen, _)| self.step_graph.probability(chosen.continuation_id))
            .product()
    }

    pub fn step_graph(&self) -> &StepGraph {
        &self.step_graph
    }

    pub fn step_graph_mut(&mut self) -> &mut StepGraph {
        &mut self.step_graph
    }
}
