//! Fault declarations and their per-step activation bookkeeping.
//!
//! A model declares its faults once via [`ExecutableModel::faults`][crate::model::ExecutableModel::faults].
//! During analysis every model instance owns a [`FaultRuntime`] that decides,
//! whenever the model asks, whether a fault is activated. Depending on the
//! fault's [`Activation`] mode the decision is fixed or branches the search
//! through the [`ChoiceResolver`].

use serde::{Deserialize, Serialize};

use crate::choice::ChoiceResolver;
use crate::error::{Error, Result};
use crate::fault_set::FaultSet;

/// How the analysis treats a fault.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Activation {
    /// The fault is activated whenever it is activatable.
    Forced,
    /// The fault is never activated.
    Suppressed,
    /// Both outcomes are explored.
    Nondeterministic,
}

/// Lifetime of an activation.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Persistence {
    /// Activation holds for a single step only.
    Transient,
    /// Once activated, the fault stays active for the rest of the run.
    Permanent,
}

/// Declaration of an injectable fault.
#[derive(Debug, Clone, PartialEq)]
pub struct Fault {
    identifier: usize,
    name: String,
    persistence: Persistence,
    activation: Activation,
    probability: Option<f64>,
    subsumed: FaultSet,
}

impl Fault {
    pub fn new(identifier: usize, name: impl Into<String>, persistence: Persistence) -> Self {
        assert!(
            identifier < FaultSet::MAX_FAULTS,
            "More than 63 faults are not supported"
        );
        Self {
            identifier,
            name: name.into(),
            persistence,
            activation: Activation::Nondeterministic,
            probability: None,
            subsumed: FaultSet::empty(),
        }
    }

    pub fn transient(identifier: usize, name: impl Into<String>) -> Self {
        Self::new(identifier, name, Persistence::Transient)
    }

    pub fn permanent(identifier: usize, name: impl Into<String>) -> Self {
        Self::new(identifier, name, Persistence::Permanent)
    }

    /// Sets the declared activation mode (default: nondeterministic).
    pub fn with_activation(mut self, activation: Activation) -> Self {
        self.activation = activation;
        self
    }

    /// Sets the probability of occurrence used by probabilistic analyses.
    pub fn with_probability(mut self, probability: f64) -> Self {
        assert!(
            (0.0..=1.0).contains(&probability),
            "Probability {} is not in [0, 1]",
            probability
        );
        self.probability = Some(probability);
        self
    }

    /// Declares that this fault subsumes the fault `other`.
    pub fn subsumes(mut self, other: usize) -> Self {
        self.subsumed = self.subsumed.add(other);
        self
    }

    pub fn identifier(&self) -> usize {
        self.identifier
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn persistence(&self) -> Persistence {
        self.persistence
    }
    pub fn activation(&self) -> Activation {
        self.activation
    }
    pub fn probability(&self) -> Option<f64> {
        self.probability
    }
    /// Directly declared subsumed faults.
    pub fn subsumed(&self) -> FaultSet {
        self.subsumed
    }
}

/// Checks that `faults` fit into a [`FaultSet`] and are declared in identifier order.
pub fn validate_faults(faults: &[Fault]) -> Result<()> {
    FaultSet::check_fault_count(faults.len())?;
    for (position, fault) in faults.iter().enumerate() {
        if fault.identifier != position {
            return Err(Error::InvalidFaultIdentifier {
                name: fault.name.clone(),
                identifier: fault.identifier,
                position,
            });
        }
    }
    Ok(())
}

#[derive(Debug, Clone)]
struct FaultState {
    activation: Activation,
    persistence: Persistence,
    probability: Option<f64>,
    tried: bool,
    activated: bool,
    /// Index of the activation decision in the current path, if one was recorded.
    choice_index: Option<usize>,
}

/// Activation state of all faults of one model instance.
#[derive(Debug, Clone)]
pub struct FaultRuntime {
    faults: Vec<FaultState>,
    forward_optimization: bool,
}

impl FaultRuntime {
    pub fn new(faults: &[Fault]) -> Result<Self> {
        validate_faults(faults)?;
        let faults = faults
            .iter()
            .map(|fault| FaultState {
                activation: fault.activation,
                persistence: fault.persistence,
                probability: fault.probability,
                tried: false,
                activated: false,
                choice_index: None,
            })
            .collect();
        Ok(Self {
            faults,
            forward_optimization: true,
        })
    }

    pub fn len(&self) -> usize {
        self.faults.len()
    }

    pub fn is_empty(&self) -> bool {
        self.faults.is_empty()
    }

    pub fn set_forward_optimization(&mut self, enabled: bool) {
        self.forward_optimization = enabled;
    }

    /// Overrides the activation mode of every fault.
    pub fn set_activations(&mut self, activations: &[Activation]) {
        assert_eq!(activations.len(), self.faults.len(), "Activation count mismatch");
        for (state, &activation) in self.faults.iter_mut().zip(activations) {
            state.activation = activation;
        }
    }

    pub fn activations(&self) -> Vec<Activation> {
        self.faults.iter().map(|state| state.activation).collect()
    }

    pub fn has_permanent_faults(&self) -> bool {
        self.faults
            .iter()
            .any(|state| state.persistence == Persistence::Permanent)
    }

    /// Clears the per-step bookkeeping; transient faults are deactivated.
    pub fn reset(&mut self) {
        for state in &mut self.faults {
            state.tried = false;
            state.choice_index = None;
            if state.persistence == Persistence::Transient {
                state.activated = false;
            }
        }
    }

    /// Restores the activation of permanent faults from a state vector and resets the step.
    pub fn restore_permanent(&mut self, activated: FaultSet) {
        for (fault, state) in self.faults.iter_mut().enumerate() {
            state.activated =
                state.persistence == Persistence::Permanent && activated.contains(fault);
        }
        self.reset();
    }

    /// Permanent faults that are currently active.
    pub fn permanent_activations(&self) -> FaultSet {
        FaultSet::from_faults(
            self.faults
                .iter()
                .enumerate()
                .filter(|(_, state)| state.persistence == Persistence::Permanent && state.activated)
                .map(|(fault, _)| fault),
        )
    }

    /// All faults active at the end of the current step.
    pub fn activated(&self) -> FaultSet {
        FaultSet::from_faults(
            self.faults
                .iter()
                .enumerate()
                .filter(|(_, state)| state.activated)
                .map(|(fault, _)| fault),
        )
    }

    pub fn is_activated(&self, fault: usize) -> bool {
        self.faults[fault].activated
    }

    /// Decides whether `fault` is activated in the current step.
    pub fn try_activate(&mut self, fault: usize, resolver: &mut ChoiceResolver) -> bool {
        let state = &mut self.faults[fault];
        if state.activated || state.tried {
            return state.activated;
        }
        state.tried = true;
        state.activated = match state.activation {
            Activation::Forced => true,
            Activation::Suppressed => false,
            Activation::Nondeterministic => {
                let option = match state.probability {
                    Some(probability) => {
                        let option = resolver.handle_probabilistic_choice(2);
                        let branch = if option == 1 { probability } else { 1.0 - probability };
                        resolver.set_probability_of_last_choice(branch);
                        option
                    }
                    None => resolver.handle_choice(2),
                };
                state.choice_index = resolver.last_choice_index();
                option == 1
            }
        };
        state.activated
    }

    /// Declares that activating `fault` in the current step would not have changed anything.
    ///
    /// The untaken activation branch is merged into the current path, so it is
    /// never explored separately. The fault becomes undecided again and may be
    /// activated by a later [`try_activate`][Self::try_activate] of the same step.
    pub fn undo_activation(&mut self, fault: usize, resolver: &mut ChoiceResolver) {
        if !self.forward_optimization {
            return;
        }
        let state = &mut self.faults[fault];
        if let Some(index) = state.choice_index.take() {
            assert!(!state.activated, "Cannot undo the activation of an activated fault");
            resolver.forward_untaken_choices_at_index(index);
            state.tried = false;
        }
    }
}
