//! The stepping interface implemented by analyzed systems.
//!
//! A model is a plain Rust value that knows how to serialize itself into a
//! fixed number of bytes ([`ExecutableModel::write_state`]), restore itself
//! from those bytes ([`ExecutableModel::read_state`]) and perform one step.
//! Every decision a step makes, including fault activations, is taken through
//! the [`ExecutionContext`], which lets the analysis enumerate all outcomes.
//!
//! [`AnalysisModel`] wraps a model for the traversal: it lays out the full
//! state vector, enumerates all paths of a step and turns each of them into a
//! [`CandidateTransition`].

use std::ops::Range;
use std::sync::Arc;

use log::trace;

use crate::choice::ChoiceResolver;
use crate::error::{Error, Result};
use crate::fault::{Activation, Fault, FaultRuntime};
use crate::fault_set::FaultSet;
use crate::formula::{Formula, FormulaLabels};
use crate::transition::{CandidateTransition, StateFormulaSet, TransitionBuffer};

/// A discrete system that can be stepped by the analysis.
pub trait ExecutableModel: Send {
    /// Number of bytes written by [`write_state`][Self::write_state].
    fn state_size(&self) -> usize;

    /// Serializes the current state into exactly `state_size()` bytes.
    fn write_state(&self, state: &mut [u8]);

    /// Restores the state previously written by [`write_state`][Self::write_state].
    fn read_state(&mut self, state: &[u8]);

    /// Faults that can be injected, in identifier order.
    fn faults(&self) -> Vec<Fault>;

    /// Formulas the model wants to expose as labels.
    fn formulas(&self) -> Vec<Formula> {
        Vec::new()
    }

    /// Leaves the initial state. Executed from the state the model was created in.
    fn execute_initial_step(&mut self, context: &mut ExecutionContext<'_>) -> Result<()>;

    fn execute_step(&mut self, context: &mut ExecutionContext<'_>) -> Result<()>;
}

/// Decisions available to a model while it executes a step.
pub struct ExecutionContext<'a> {
    resolver: &'a mut ChoiceResolver,
    faults: &'a mut FaultRuntime,
}

impl<'a> ExecutionContext<'a> {
    pub fn new(resolver: &'a mut ChoiceResolver, faults: &'a mut FaultRuntime) -> Self {
        Self { resolver, faults }
    }

    /// Chooses one of `count` alternatives nondeterministically.
    ///
    /// Returns `None` if there is nothing to choose from. A single alternative is taken without
    /// recording a choice.
    pub fn choose_index(&mut self, count: usize) -> Option<usize> {
        match count {
            0 => None,
            1 => Some(0),
            _ => Some(self.resolver.handle_choice(count)),
        }
    }

    pub fn choose<'t, T>(&mut self, options: &'t [T]) -> Option<&'t T> {
        self.choose_index(options.len()).map(|index| &options[index])
    }

    pub fn choose_bool(&mut self) -> bool {
        self.resolver.handle_choice(2) == 1
    }

    /// Chooses a value in the inclusive range `low..=high`.
    pub fn choose_from_range(&mut self, low: i64, high: i64) -> i64 {
        assert!(low <= high, "Empty range {}..={}", low, high);
        let count = (high - low + 1) as usize;
        match self.choose_index(count) {
            Some(index) => low + index as i64,
            None => unreachable!(),
        }
    }

    /// Chooses one of the options with the attached probabilities.
    pub fn choose_with_probabilities<'t, T>(&mut self, options: &'t [(T, f64)]) -> Option<&'t T> {
        match options.len() {
            0 => None,
            1 => Some(&options[0].0),
            count => {
                let index = self.resolver.handle_probabilistic_choice(count);
                self.resolver.set_probability_of_last_choice(options[index].1);
                Some(&options[index].0)
            }
        }
    }

    /// Asks whether `fault` is activated in this step. See [`FaultRuntime::try_activate`].
    pub fn try_activate(&mut self, fault: usize) -> bool {
        self.faults.try_activate(fault, self.resolver)
    }

    /// Declares that the activation of `fault` would not have changed this step.
    pub fn undo_activation(&mut self, fault: usize) {
        self.faults.undo_activation(fault, self.resolver);
    }

    pub fn is_activated(&self, fault: usize) -> bool {
        self.faults.is_activated(fault)
    }

    pub fn resolver(&mut self) -> &mut ChoiceResolver {
        &mut *self.resolver
    }
}

/// Layout of a state vector: `[header | model | permanent fault bits]`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct StateLayout {
    pub header: usize,
    pub model: usize,
    pub faults: usize,
}

impl StateLayout {
    pub const FAULT_BYTES: usize = 8;

    pub fn new(header: usize, model: usize, has_permanent_faults: bool) -> Self {
        Self {
            header,
            model,
            faults: if has_permanent_faults {
                Self::FAULT_BYTES
            } else {
                0
            },
        }
    }

    /// Total size of a state vector; never zero.
    pub fn state_size(&self) -> usize {
        (self.header + self.model + self.faults).max(1)
    }

    pub fn header_range(&self) -> Range<usize> {
        0..self.header
    }

    pub fn model_range(&self) -> Range<usize> {
        self.header..self.header + self.model
    }

    pub fn fault_range(&self) -> Range<usize> {
        let start = self.header + self.model;
        start..start + self.faults
    }

    /// Permanent faults recorded in `state`.
    pub fn permanent_faults(&self, state: &[u8]) -> FaultSet {
        if self.faults == 0 {
            return FaultSet::empty();
        }
        let mut bytes = [0u8; Self::FAULT_BYTES];
        bytes.copy_from_slice(&state[self.fault_range()]);
        FaultSet::from_bits(u64::from_le_bytes(bytes))
    }
}

/// A model prepared for traversal.
pub struct AnalysisModel<M> {
    model: M,
    resolver: ChoiceResolver,
    faults: FaultRuntime,
    declarations: Vec<Fault>,
    layout: StateLayout,
    labels: Arc<FormulaLabels>,
    initial_model_state: Box<[u8]>,
}

impl<M: ExecutableModel> AnalysisModel<M> {
    /// Wraps `model`, reserving `header_bytes` in front of its state for modifiers.
    pub fn new(model: M, header_bytes: usize, labels: Arc<FormulaLabels>) -> Result<Self> {
        let declarations = model.faults();
        let faults = FaultRuntime::new(&declarations)?;
        let layout = StateLayout::new(header_bytes, model.state_size(), faults.has_permanent_faults());
        let mut initial_model_state = vec![0; layout.model].into_boxed_slice();
        model.write_state(&mut initial_model_state);
        Ok(Self {
            model,
            resolver: ChoiceResolver::new(),
            faults,
            declarations,
            layout,
            labels,
            initial_model_state,
        })
    }

    pub fn layout(&self) -> StateLayout {
        self.layout
    }

    pub fn state_size(&self) -> usize {
        self.layout.state_size()
    }

    pub fn faults(&self) -> &[Fault] {
        &self.declarations
    }

    pub fn labels(&self) -> &Arc<FormulaLabels> {
        &self.labels
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn resolver(&self) -> &ChoiceResolver {
        &self.resolver
    }

    pub fn set_activations(&mut self, activations: &[Activation]) {
        self.faults.set_activations(activations);
    }

    pub fn activations(&self) -> Vec<Activation> {
        self.faults.activations()
    }

    pub fn set_forward_optimization(&mut self, enabled: bool) {
        self.faults.set_forward_optimization(enabled);
    }

    /// Enumerates the transitions leaving the initial state.
    pub fn compute_initial_transitions(&mut self, buffer: &mut TransitionBuffer) -> Result<()> {
        self.compute_transitions(None, buffer)
    }

    /// Enumerates the transitions leaving `source`.
    pub fn compute_successors(&mut self, source: &[u8], buffer: &mut TransitionBuffer) -> Result<()> {
        self.compute_transitions(Some(source), buffer)
    }

    fn compute_transitions(&mut self, source: Option<&[u8]>, buffer: &mut TransitionBuffer) -> Result<()> {
        assert_eq!(buffer.state_size(), self.state_size(), "Buffer has wrong state size");
        buffer.clear();
        self.resolver.prepare_next_state();
        while self.resolver.prepare_next_path()? {
            self.execute(source)?;
            self.emit(source, buffer)?;
        }
        trace!("Computed {} transitions", buffer.len());
        Ok(())
    }

    /// Re-executes the single path given by `choices` and stores its transition in `buffer`.
    pub fn replay(&mut self, source: Option<&[u8]>, choices: &[usize], buffer: &mut TransitionBuffer) -> Result<()> {
        buffer.clear();
        self.resolver.prepare_next_state();
        self.resolver.set_choices(choices);
        if !self.resolver.prepare_next_path()? {
            return Err(Error::ReplayDiverged { step: 0 });
        }
        self.execute(source)?;
        let taken = self.resolver.choices().len();
        if taken != choices.len() {
            return Err(Error::Nondeterminism {
                expected: choices.len(),
                actual: taken,
            });
        }
        self.emit(source, buffer)?;
        Ok(())
    }

    fn execute(&mut self, source: Option<&[u8]>) -> Result<()> {
        match source {
            Some(state) => {
                self.model.read_state(&state[self.layout.model_range()]);
                self.faults.restore_permanent(self.layout.permanent_faults(state));
            }
            None => {
                self.model.read_state(&self.initial_model_state);
                self.faults.restore_permanent(FaultSet::empty());
            }
        }

        let mut context = ExecutionContext::new(&mut self.resolver, &mut self.faults);
        match source {
            Some(_) => self.model.execute_step(&mut context),
            None => self.model.execute_initial_step(&mut context),
        }
    }

    fn emit(&mut self, source: Option<&[u8]>, buffer: &mut TransitionBuffer) -> Result<()> {
        let continuation_id = self.resolver.continuation_id();
        let index = buffer.push(CandidateTransition {
            activated_faults: self.faults.activated(),
            formulas: StateFormulaSet::empty(),
            probability: self.resolver.path_probability(),
            continuation_id,
            is_valid: true,
            terminates: false,
        })?;

        let layout = self.layout;
        let (transition, target) = buffer.get_mut(index);
        if let Some(source) = source {
            target[layout.header_range()].copy_from_slice(&source[layout.header_range()]);
        }
        self.model.write_state(&mut target[layout.model_range()]);
        if layout.faults > 0 {
            let bits = self.faults.permanent_activations().bits();
            target[layout.fault_range()].copy_from_slice(&bits.to_le_bytes());
        }
        transition.formulas = self.labels.evaluate_atomics(&target[layout.model_range()]);

        self.resolver.step_graph_mut().set_target_of_final(continuation_id, index);
        if buffer.records_choices() {
            buffer.set_choices(index, self.resolver.choices());
        }
        Ok(())
    }
}
