//! Errors reported by the analysis engine.

use std::fmt::{Display, Formatter};

use thiserror::Error;

/// Pre-allocated resource whose capacity can be exhausted during a run.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Capacity {
    State,
    Successor,
    Transition,
    ContinuationGraph,
    Distribution,
}

impl Display for Capacity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Capacity::State => "state",
            Capacity::Successor => "successor",
            Capacity::Transition => "transition",
            Capacity::ContinuationGraph => "continuation graph",
            Capacity::Distribution => "distribution",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Unable to store more than {capacity} {kind} entries. Try increasing the {kind} capacity.")]
    CapacityExceeded { kind: Capacity, capacity: usize },

    #[error("Detected nondeterminism in the model: {expected} choices were recorded, but {actual} were taken while replaying the path")]
    Nondeterminism { expected: usize, actual: usize },

    #[error("State {state} has no valid successors")]
    TerminalState { state: u32 },

    #[error("The model has no valid initial transitions")]
    NoInitialStates,

    #[error("Model step failed: {0}")]
    Model(String),

    #[error("Faults '{first}' and '{second}' override '{component}' with the same priority {priority} and are both activated")]
    AmbiguousFaultEffect {
        component: String,
        first: String,
        second: String,
        priority: i32,
    },

    #[error("More than 63 faults are not supported (model declares {0})")]
    TooManyFaults(usize),

    #[error("Fault '{name}' has identifier {identifier}, but is declared at position {position}")]
    InvalidFaultIdentifier {
        name: String,
        identifier: usize,
        position: usize,
    },

    #[error("At most 32 state formulas are supported, got {0}")]
    TooManyFormulas(usize),

    #[error("Formula '{0}' cannot be evaluated over a single state")]
    NotStateFormula(String),

    #[error("Formula '{0}' is not supported by this checker")]
    UnsupportedFormula(String),

    #[error("Probabilities leaving continuation element {element} sum to {sum} instead of 1")]
    ProbabilityNotConserved { element: u32, sum: f64 },

    #[error("Counterexample replay diverged at step {step}")]
    ReplayDiverged { step: usize },

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Failed to start the worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Creates an error raised by a model while executing a step.
    pub fn model(message: impl Display) -> Self {
        Error::Model(message.to_string())
    }

    /// Fatal errors abort a whole analysis instead of being attributed to one fault set.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::CapacityExceeded { .. }
                | Error::TooManyFaults(_)
                | Error::TooManyFormulas(_)
                | Error::InvalidFaultIdentifier { .. }
                | Error::NotStateFormula(_)
                | Error::InvalidConfiguration(_)
                | Error::ThreadPool(_)
        )
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
