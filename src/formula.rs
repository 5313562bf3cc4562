//! Formulas over model states and their compilation to label evaluators.
//!
//! Atomic propositions are opaque predicates over the model's serialized
//! state. During traversal every atomic proposition gets a *label*, a bit in
//! the [`StateFormulaSet`] of each transition. Boolean combinations of labels
//! are then evaluated on the bit set alone, without touching the model again.
//!
//! The past-time operator `Once` is supported as a state formula: the
//! [`ObserveFormulasModifier`][crate::modifiers::ObserveFormulasModifier]
//! carries one enrichment bit per `Once` operand in the state vector and
//! stamps it as an additional label.

use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::transition::StateFormulaSet;

pub type Predicate = Arc<dyn Fn(&[u8]) -> bool + Send + Sync>;

/// Compiled state formula, evaluated over the labels of a state.
pub type StateEvaluator = Arc<dyn Fn(StateFormulaSet) -> bool + Send + Sync>;

/// A named predicate over the serialized state of a model.
#[derive(Clone)]
pub struct AtomicProposition {
    label: String,
    predicate: Predicate,
}

impl AtomicProposition {
    pub fn new(label: impl Into<String>, predicate: impl Fn(&[u8]) -> bool + Send + Sync + 'static) -> Self {
        Self {
            label: label.into(),
            predicate: Arc::new(predicate),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn evaluate(&self, state: &[u8]) -> bool {
        (self.predicate)(state)
    }
}

impl Debug for AtomicProposition {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "AtomicProposition({})", self.label)
    }
}

/// Atomic propositions are identified by their label.
impl PartialEq for AtomicProposition {
    fn eq(&self, other: &Self) -> bool {
        self.label == other.label
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum UnaryOperator {
    Not,
    Next,
    Finally,
    Globally,
    Once,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum BinaryOperator {
    And,
    Or,
    Implies,
    Equivalence,
    Until,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Objective {
    Minimum,
    Maximum,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Formula {
    Constant(bool),
    Atomic(AtomicProposition),
    Unary {
        operator: UnaryOperator,
        operand: Box<Formula>,
    },
    Binary {
        operator: BinaryOperator,
        left: Box<Formula>,
        right: Box<Formula>,
    },
    /// `Finally` or `Globally` restricted to the first `bound` steps.
    BoundedUnary {
        operator: UnaryOperator,
        operand: Box<Formula>,
        bound: usize,
    },
    /// `Until` restricted to the first `bound` steps.
    BoundedBinary {
        operator: BinaryOperator,
        left: Box<Formula>,
        right: Box<Formula>,
        bound: usize,
    },
    /// Minimal or maximal probability of the path formula.
    Probability {
        objective: Objective,
        formula: Box<Formula>,
    },
    /// Minimal or maximal expected number of visited states satisfying `formula` within `bound` steps.
    Reward {
        objective: Objective,
        formula: Box<Formula>,
        bound: usize,
    },
}

impl Formula {
    pub fn constant(value: bool) -> Self {
        Formula::Constant(value)
    }

    pub fn atomic(label: impl Into<String>, predicate: impl Fn(&[u8]) -> bool + Send + Sync + 'static) -> Self {
        Formula::Atomic(AtomicProposition::new(label, predicate))
    }

    fn unary(operator: UnaryOperator, operand: Formula) -> Self {
        Formula::Unary {
            operator,
            operand: Box::new(operand),
        }
    }

    fn binary(operator: BinaryOperator, left: Formula, right: Formula) -> Self {
        Formula::Binary {
            operator,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Self::unary(UnaryOperator::Not, self)
    }
    pub fn and(self, other: Formula) -> Self {
        Self::binary(BinaryOperator::And, self, other)
    }
    pub fn or(self, other: Formula) -> Self {
        Self::binary(BinaryOperator::Or, self, other)
    }
    pub fn implies(self, other: Formula) -> Self {
        Self::binary(BinaryOperator::Implies, self, other)
    }
    pub fn equivalent(self, other: Formula) -> Self {
        Self::binary(BinaryOperator::Equivalence, self, other)
    }

    pub fn next(operand: Formula) -> Self {
        Self::unary(UnaryOperator::Next, operand)
    }
    pub fn finally(operand: Formula) -> Self {
        Self::unary(UnaryOperator::Finally, operand)
    }
    pub fn globally(operand: Formula) -> Self {
        Self::unary(UnaryOperator::Globally, operand)
    }
    pub fn once(operand: Formula) -> Self {
        Self::unary(UnaryOperator::Once, operand)
    }
    pub fn until(left: Formula, right: Formula) -> Self {
        Self::binary(BinaryOperator::Until, left, right)
    }

    pub fn bounded_finally(operand: Formula, bound: usize) -> Self {
        Formula::BoundedUnary {
            operator: UnaryOperator::Finally,
            operand: Box::new(operand),
            bound,
        }
    }
    pub fn bounded_globally(operand: Formula, bound: usize) -> Self {
        Formula::BoundedUnary {
            operator: UnaryOperator::Globally,
            operand: Box::new(operand),
            bound,
        }
    }
    pub fn bounded_until(left: Formula, right: Formula, bound: usize) -> Self {
        Formula::BoundedBinary {
            operator: BinaryOperator::Until,
            left: Box::new(left),
            right: Box::new(right),
            bound,
        }
    }

    pub fn probability(objective: Objective, formula: Formula) -> Self {
        Formula::Probability {
            objective,
            formula: Box::new(formula),
        }
    }
    pub fn reward(objective: Objective, formula: Formula, bound: usize) -> Self {
        Formula::Reward {
            objective,
            formula: Box::new(formula),
            bound,
        }
    }

    /// Returns true if the formula can be evaluated on a single state (given its `Once` history bits).
    pub fn is_state_formula(&self) -> bool {
        match self {
            Formula::Constant(_) | Formula::Atomic(_) => true,
            Formula::Unary { operator, operand } => match operator {
                UnaryOperator::Not | UnaryOperator::Once => operand.is_state_formula(),
                _ => false,
            },
            Formula::Binary {
                operator,
                left,
                right,
            } => *operator != BinaryOperator::Until && left.is_state_formula() && right.is_state_formula(),
            _ => false,
        }
    }

    fn children(&self) -> Vec<&Formula> {
        match self {
            Formula::Constant(_) | Formula::Atomic(_) => Vec::new(),
            Formula::Unary { operand, .. } | Formula::BoundedUnary { operand, .. } => vec![&**operand],
            Formula::Binary { left, right, .. } | Formula::BoundedBinary { left, right, .. } => {
                vec![&**left, &**right]
            }
            Formula::Probability { formula, .. } | Formula::Reward { formula, .. } => vec![&**formula],
        }
    }

    /// Collects the atomic propositions of the formula, without duplicates.
    pub fn collect_atomics(&self, atomics: &mut Vec<AtomicProposition>) {
        if let Formula::Atomic(atomic) = self {
            if !atomics.contains(atomic) {
                atomics.push(atomic.clone());
            }
        }
        for child in self.children() {
            child.collect_atomics(atomics);
        }
    }

    /// Collects the operands of all `Once` subformulas, inner ones first.
    pub fn collect_once_operands(&self, operands: &mut Vec<Formula>) {
        for child in self.children() {
            child.collect_once_operands(operands);
        }
        if let Formula::Unary {
            operator: UnaryOperator::Once,
            operand,
        } = self
        {
            if !operands.contains(operand) {
                operands.push((**operand).clone());
            }
        }
    }
}

impl Display for Formula {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Formula::Constant(value) => write!(f, "{}", value),
            Formula::Atomic(atomic) => write!(f, "{}", atomic.label),
            Formula::Unary { operator, operand } => {
                let symbol = match operator {
                    UnaryOperator::Not => "!",
                    UnaryOperator::Next => "X ",
                    UnaryOperator::Finally => "F ",
                    UnaryOperator::Globally => "G ",
                    UnaryOperator::Once => "O ",
                };
                write!(f, "{}({})", symbol, operand)
            }
            Formula::Binary {
                operator,
                left,
                right,
            } => {
                let symbol = match operator {
                    BinaryOperator::And => "&&",
                    BinaryOperator::Or => "||",
                    BinaryOperator::Implies => "->",
                    BinaryOperator::Equivalence => "<->",
                    BinaryOperator::Until => "U",
                };
                write!(f, "({} {} {})", left, symbol, right)
            }
            Formula::BoundedUnary {
                operator,
                operand,
                bound,
            } => {
                let symbol = match operator {
                    UnaryOperator::Globally => "G",
                    _ => "F",
                };
                write!(f, "{}<={} ({})", symbol, bound, operand)
            }
            Formula::BoundedBinary {
                left, right, bound, ..
            } => write!(f, "({} U<={} {})", left, bound, right),
            Formula::Probability { objective, formula } => {
                write!(f, "P{}=? [{}]", objective_suffix(*objective), formula)
            }
            Formula::Reward {
                objective,
                formula,
                bound,
            } => write!(f, "R{}=? [C<={} {}]", objective_suffix(*objective), bound, formula),
        }
    }
}

fn objective_suffix(objective: Objective) -> &'static str {
    match objective {
        Objective::Minimum => "min",
        Objective::Maximum => "max",
    }
}

/// Assignment of labels to the atomic propositions and `Once` operands of a set of formulas.
///
/// Labels `0..atomic_count` are atomic propositions, the remaining labels are
/// `Once` operands in the order they must be updated.
#[derive(Debug, Clone, Default)]
pub struct FormulaLabels {
    atomics: Vec<AtomicProposition>,
    once_operands: Vec<Formula>,
}

impl FormulaLabels {
    pub fn new<'a>(formulas: impl IntoIterator<Item = &'a Formula>) -> Result<Self> {
        let mut atomics = Vec::new();
        let mut once_operands = Vec::new();
        for formula in formulas {
            formula.collect_atomics(&mut atomics);
            formula.collect_once_operands(&mut once_operands);
        }
        let count = atomics.len() + once_operands.len();
        if count > StateFormulaSet::CAPACITY {
            return Err(Error::TooManyFormulas(count));
        }
        Ok(Self {
            atomics,
            once_operands,
        })
    }

    pub fn len(&self) -> usize {
        self.atomics.len() + self.once_operands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn atomic_count(&self) -> usize {
        self.atomics.len()
    }

    pub fn once_operands(&self) -> &[Formula] {
        &self.once_operands
    }

    /// Label of the `Once` operand `k`.
    pub fn once_label(&self, k: usize) -> usize {
        self.atomics.len() + k
    }

    /// Display names of all labels.
    pub fn names(&self) -> Vec<String> {
        self.atomics
            .iter()
            .map(|atomic| atomic.label.clone())
            .chain(self.once_operands.iter().map(|operand| format!("O ({})", operand)))
            .collect()
    }

    /// Evaluates the atomic propositions on a model state; `Once` labels are left unset.
    pub fn evaluate_atomics(&self, state: &[u8]) -> StateFormulaSet {
        let mut formulas = StateFormulaSet::empty();
        for (label, atomic) in self.atomics.iter().enumerate() {
            formulas.set(label, atomic.evaluate(state));
        }
        formulas
    }

    /// Compiles a state formula into an evaluator over these labels.
    pub fn compile(&self, formula: &Formula) -> Result<StateEvaluator> {
        let not_state_formula = || Error::NotStateFormula(formula.to_string());
        match formula {
            Formula::Constant(value) => {
                let value = *value;
                Ok(Arc::new(move |_: StateFormulaSet| value))
            }
            Formula::Atomic(atomic) => {
                let label = self
                    .atomics
                    .iter()
                    .position(|other| other == atomic)
                    .ok_or_else(not_state_formula)?;
                Ok(Arc::new(move |formulas: StateFormulaSet| formulas.get(label)))
            }
            Formula::Unary { operator, operand } => match operator {
                UnaryOperator::Not => {
                    let operand = self.compile(operand)?;
                    Ok(Arc::new(move |formulas: StateFormulaSet| !operand(formulas)))
                }
                UnaryOperator::Once => {
                    let k = self
                        .once_operands
                        .iter()
                        .position(|other| other == &**operand)
                        .ok_or_else(not_state_formula)?;
                    let label = self.once_label(k);
                    Ok(Arc::new(move |formulas: StateFormulaSet| formulas.get(label)))
                }
                _ => Err(not_state_formula()),
            },
            Formula::Binary {
                operator,
                left,
                right,
            } => {
                if *operator == BinaryOperator::Until {
                    return Err(not_state_formula());
                }
                let left = self.compile(left)?;
                let right = self.compile(right)?;
                let operator = *operator;
                Ok(Arc::new(move |formulas: StateFormulaSet| match operator {
                    BinaryOperator::And => left(formulas) && right(formulas),
                    BinaryOperator::Or => left(formulas) || right(formulas),
                    BinaryOperator::Implies => !left(formulas) || right(formulas),
                    BinaryOperator::Equivalence => left(formulas) == right(formulas),
                    BinaryOperator::Until => unreachable!(),
                }))
            }
            _ => Err(not_state_formula()),
        }
    }
}
