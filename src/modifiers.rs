//! Post-processing of the candidate transitions of a step.
//!
//! Modifiers run in a fixed order on every [`TransitionBuffer`] before its
//! candidates are committed. They can invalidate candidates, mark them as
//! terminating, and maintain additional bytes in the header of the state
//! vector. Header bytes are requested through [`TransitionModifier::extra_bytes`];
//! the traversal assigns each modifier its offset before the first step.

use std::sync::Arc;

use crate::fault_set::FaultSet;
use crate::formula::{FormulaLabels, StateEvaluator};
use crate::transition::TransitionBuffer;

pub trait TransitionModifier: Send {
    /// Number of header bytes this modifier stores in every state vector.
    fn extra_bytes(&self) -> usize {
        0
    }

    /// Offset of this modifier's header bytes within the state vector.
    fn set_extra_bytes_offset(&mut self, _offset: usize) {}

    /// Adjusts the candidates leaving `source`, or leaving the initial state if `source` is `None`.
    fn modify_transitions(&mut self, buffer: &mut TransitionBuffer, source: Option<&[u8]>);
}

/// Creates a fresh modifier for every worker.
pub type ModifierFactory = Arc<dyn Fn() -> Box<dyn TransitionModifier> + Send + Sync>;

/// Invalidates transitions that activate a suppressed fault.
#[derive(Debug, Clone)]
pub struct FaultSuppressionModifier {
    suppressed: FaultSet,
}

impl FaultSuppressionModifier {
    pub fn new(suppressed: FaultSet) -> Self {
        Self { suppressed }
    }

    pub fn factory(suppressed: FaultSet) -> ModifierFactory {
        Arc::new(move || Box::new(FaultSuppressionModifier::new(suppressed)))
    }
}

impl TransitionModifier for FaultSuppressionModifier {
    fn modify_transitions(&mut self, buffer: &mut TransitionBuffer, _source: Option<&[u8]>) {
        for index in 0..buffer.len() {
            let transition = buffer.transition_mut(index);
            if !transition.activated_faults.intersection(self.suppressed).is_empty() {
                transition.is_valid = false;
            }
        }
    }
}

/// Maintains the history bits of `Once` formulas.
///
/// Bit `k` of the 4 header bytes is set as soon as the `k`-th observed operand
/// holds in a target state, and stays set in all successors. The bit is also
/// stamped into the candidate's formula labels, so that nested `Once`
/// operands observe the labels of the inner ones.
pub struct ObserveFormulasModifier {
    labels: Arc<FormulaLabels>,
    operands: Vec<StateEvaluator>,
    offset: usize,
}

impl ObserveFormulasModifier {
    pub const EXTRA_BYTES: usize = 4;

    pub fn new(labels: Arc<FormulaLabels>, operands: Vec<StateEvaluator>) -> Self {
        assert_eq!(
            labels.once_operands().len(),
            operands.len(),
            "Every observed formula needs an evaluator"
        );
        Self {
            labels,
            operands,
            offset: 0,
        }
    }

    fn read(&self, state: &[u8]) -> u32 {
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&state[self.offset..self.offset + Self::EXTRA_BYTES]);
        u32::from_le_bytes(bytes)
    }
}

impl TransitionModifier for ObserveFormulasModifier {
    fn extra_bytes(&self) -> usize {
        Self::EXTRA_BYTES
    }

    fn set_extra_bytes_offset(&mut self, offset: usize) {
        self.offset = offset;
    }

    fn modify_transitions(&mut self, buffer: &mut TransitionBuffer, source: Option<&[u8]>) {
        let previous = source.map_or(0, |source| self.read(source));
        for index in 0..buffer.len() {
            let (transition, target) = buffer.get_mut(index);
            let mut enrichment = 0u32;
            for (k, operand) in self.operands.iter().enumerate() {
                let bit = previous & (1 << k) != 0 || operand(transition.formulas);
                if bit {
                    enrichment |= 1 << k;
                }
                transition.formulas.set(self.labels.once_label(k), bit);
            }
            target[self.offset..self.offset + Self::EXTRA_BYTES].copy_from_slice(&enrichment.to_le_bytes());
        }
    }
}

/// Marks transitions into states satisfying `condition` as terminating.
pub struct EarlyTerminationModifier {
    condition: StateEvaluator,
}

impl EarlyTerminationModifier {
    pub fn new(condition: StateEvaluator) -> Self {
        Self { condition }
    }
}

impl TransitionModifier for EarlyTerminationModifier {
    fn modify_transitions(&mut self, buffer: &mut TransitionBuffer, _source: Option<&[u8]>) {
        for index in 0..buffer.len() {
            let transition = buffer.transition_mut(index);
            if transition.is_valid && (self.condition)(transition.formulas) {
                transition.terminates = true;
            }
        }
    }
}

const NEITHER: u8 = 0;
const FIRST: u8 = 1;
const BOTH: u8 = 2;

/// Restricts runs to those first activating `first` in an earlier step than `second`.
///
/// With `force_simultaneous`, both must instead be activated for the first time in the same step.
/// Once both were activated, all transitions are allowed.
#[derive(Debug, Clone)]
pub struct FaultOrderModifier {
    first: usize,
    second: usize,
    force_simultaneous: bool,
    offset: usize,
}

impl FaultOrderModifier {
    pub fn new(first: usize, second: usize, force_simultaneous: bool) -> Self {
        assert_ne!(first, second, "Cannot order a fault with itself");
        Self {
            first,
            second,
            force_simultaneous,
            offset: 0,
        }
    }

    pub fn factory(first: usize, second: usize, force_simultaneous: bool) -> ModifierFactory {
        Arc::new(move || Box::new(FaultOrderModifier::new(first, second, force_simultaneous)))
    }

    /// Next tracking state, or `None` if the transition violates the requested order.
    fn advance(&self, current: u8, faults: FaultSet) -> Option<u8> {
        let first = faults.contains(self.first);
        let second = faults.contains(self.second);
        match current {
            NEITHER => match (first, second) {
                (true, true) if self.force_simultaneous => Some(BOTH),
                (true, true) => None,
                (true, false) if self.force_simultaneous => None,
                (true, false) => Some(FIRST),
                (false, true) => None,
                (false, false) => Some(NEITHER),
            },
            FIRST if second => Some(BOTH),
            other => Some(other),
        }
    }
}

impl TransitionModifier for FaultOrderModifier {
    fn extra_bytes(&self) -> usize {
        1
    }

    fn set_extra_bytes_offset(&mut self, offset: usize) {
        self.offset = offset;
    }

    fn modify_transitions(&mut self, buffer: &mut TransitionBuffer, source: Option<&[u8]>) {
        let current = source.map_or(NEITHER, |source| source[self.offset]);
        for index in 0..buffer.len() {
            let (transition, target) = buffer.get_mut(index);
            match self.advance(current, transition.activated_faults) {
                Some(next) => target[self.offset] = next,
                None => transition.is_valid = false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::formula::Formula;
    use crate::transition::{CandidateTransition, StateFormulaSet};

    fn buffer(state_size: usize, transitions: &[(FaultSet, u32)]) -> TransitionBuffer {
        let mut buffer = TransitionBuffer::new(state_size, 8);
        for &(activated_faults, formulas) in transitions {
            buffer
                .push(CandidateTransition {
                    activated_faults,
                    formulas: StateFormulaSet::from_bits(formulas),
                    probability: 1.0,
                    continuation_id: 0,
                    is_valid: true,
                    terminates: false,
                })
                .unwrap();
        }
        buffer
    }

    fn valid(buffer: &TransitionBuffer) -> Vec<bool> {
        buffer.iter().map(|(t, _)| t.is_valid).collect()
    }

    #[test]
    fn test_fault_suppression() {
        let mut buffer = buffer(
            1,
            &[
                (FaultSet::empty(), 0),
                (FaultSet::from_faults([1]), 0),
                (FaultSet::from_faults([0, 2]), 0),
            ],
        );
        let mut modifier = FaultSuppressionModifier::new(FaultSet::from_faults([2]));
        modifier.modify_transitions(&mut buffer, None);
        assert_eq!(valid(&buffer), vec![true, true, false]);
    }

    #[test]
    fn test_observe_once() {
        let a = Formula::atomic("a", |state| state[0] == 1);
        let once = Formula::once(a.clone());
        let labels = Arc::new(FormulaLabels::new([&once]).unwrap());
        let operand = labels.compile(&a).unwrap();
        let once_label = labels.once_label(0);
        let mut modifier = ObserveFormulasModifier::new(labels, vec![operand]);
        modifier.set_extra_bytes_offset(1);

        // a does not hold, a holds.
        let mut initial = buffer(5, &[(FaultSet::empty(), 0), (FaultSet::empty(), 1)]);
        modifier.modify_transitions(&mut initial, None);
        assert!(!initial.transition(0).formulas.get(once_label));
        assert!(initial.transition(1).formulas.get(once_label));
        assert_eq!(&initial.target(1)[1..5], &[1, 0, 0, 0]);

        // The bit survives into successors where a no longer holds.
        let source = initial.target(1).to_vec();
        let mut successors = buffer(5, &[(FaultSet::empty(), 0)]);
        modifier.modify_transitions(&mut successors, Some(&source));
        assert!(successors.transition(0).formulas.get(once_label));
        assert_eq!(&successors.target(0)[1..5], &[1, 0, 0, 0]);
    }

    #[test]
    fn test_early_termination_skips_invalid() {
        let mut buffer = buffer(1, &[(FaultSet::empty(), 1), (FaultSet::empty(), 0), (FaultSet::empty(), 1)]);
        buffer.transition_mut(2).is_valid = false;
        let mut modifier = EarlyTerminationModifier::new(Arc::new(|formulas: StateFormulaSet| formulas.get(0)));
        modifier.modify_transitions(&mut buffer, None);
        let terminates: Vec<bool> = buffer.iter().map(|(t, _)| t.terminates).collect();
        assert_eq!(terminates, vec![true, false, false]);
    }

    #[test]
    fn test_fault_order() {
        let none = FaultSet::empty();
        let first = FaultSet::from_faults([0]);
        let second = FaultSet::from_faults([1]);
        let both = FaultSet::from_faults([0, 1]);
        let transitions = [(none, 0), (first, 0), (second, 0), (both, 0)];

        let mut ordered = FaultOrderModifier::new(0, 1, false);
        let mut buffer_ordered = buffer(1, &transitions);
        ordered.modify_transitions(&mut buffer_ordered, None);
        assert_eq!(valid(&buffer_ordered), vec![true, true, false, false]);
        assert_eq!(buffer_ordered.target(1), &[FIRST]);

        // After the first fault, the second may follow.
        let mut after_first = buffer(1, &transitions);
        ordered.modify_transitions(&mut after_first, Some(&[FIRST]));
        assert_eq!(valid(&after_first), vec![true; 4]);
        assert_eq!(after_first.target(2), &[BOTH]);
        assert_eq!(after_first.target(0), &[FIRST]);

        let mut simultaneous = FaultOrderModifier::new(0, 1, true);
        let mut buffer_simultaneous = buffer(1, &transitions);
        simultaneous.modify_transitions(&mut buffer_simultaneous, None);
        assert_eq!(valid(&buffer_simultaneous), vec![true, false, false, true]);
        assert_eq!(buffer_simultaneous.target(3), &[BOTH]);
    }
}
