//! Probabilities and rewards on an [`Mdp`] by value iteration.
//!
//! State subformulas are compiled with the labels the MDP was generated with,
//! so every atomic proposition a query mentions must have been passed to the
//! traversal that produced the MDP. Path formulas are evaluated from the
//! initial distributions; the initial step itself does not count towards step
//! bounds.

use log::debug;

use crate::bitset::BitSet;
use crate::error::{Error, Result};
use crate::formula::{BinaryOperator, Formula, Objective, UnaryOperator};
use crate::mdp::Mdp;

const DEFAULT_TOLERANCE: f64 = 1e-10;
const DEFAULT_MAX_ITERATIONS: usize = 1_000_000;

fn dual(objective: Objective) -> Objective {
    match objective {
        Objective::Minimum => Objective::Maximum,
        Objective::Maximum => Objective::Minimum,
    }
}

pub struct ProbabilityChecker<'a> {
    mdp: &'a Mdp,
    tolerance: f64,
    max_iterations: usize,
}

impl<'a> ProbabilityChecker<'a> {
    pub fn new(mdp: &'a Mdp) -> Self {
        Self {
            mdp,
            tolerance: DEFAULT_TOLERANCE,
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn states_satisfying(&self, formula: &Formula) -> Result<BitSet> {
        let evaluator = self.mdp.labels().compile(formula)?;
        Ok(BitSet::from_predicate(self.mdp.state_count(), |state| {
            evaluator(self.mdp.state_labels(state))
        }))
    }

    /// Evaluates `Pmin`/`Pmax` of a path formula.
    pub fn calculate_probability(&self, formula: &Formula) -> Result<f64> {
        match formula {
            Formula::Probability { objective, formula } => self.path_probability(*objective, formula),
            _ => Err(Error::UnsupportedFormula(formula.to_string())),
        }
    }

    /// Evaluates `Rmin`/`Rmax`: the expected number of states satisfying the
    /// formula among the first `bound` states of a path.
    pub fn calculate_reward(&self, formula: &Formula) -> Result<f64> {
        let Formula::Reward {
            objective,
            formula,
            bound,
        } = formula
        else {
            return Err(Error::UnsupportedFormula(formula.to_string()));
        };

        let rewarded = self.states_satisfying(formula)?;
        let mut values = vec![0.0; self.mdp.state_count()];
        let mut next = values.clone();
        for _ in 0..*bound {
            for state in 0..self.mdp.state_count() as u32 {
                let reward = if rewarded.contains(state) { 1.0 } else { 0.0 };
                next[state as usize] = reward + self.optimum(*objective, state, &values).unwrap_or(0.0);
            }
            std::mem::swap(&mut values, &mut next);
        }
        Ok(self.initial_value(*objective, &values))
    }

    fn path_probability(&self, objective: Objective, path: &Formula) -> Result<f64> {
        let all = || BitSet::new(self.mdp.state_count()).complement();
        let values = match path {
            Formula::Unary {
                operator: UnaryOperator::Finally,
                operand,
            } => self.until(objective, &all(), &self.states_satisfying(operand)?, None),
            Formula::BoundedUnary {
                operator: UnaryOperator::Finally,
                operand,
                bound,
            } => self.until(objective, &all(), &self.states_satisfying(operand)?, Some(*bound)),
            Formula::Binary {
                operator: BinaryOperator::Until,
                left,
                right,
            } => self.until(
                objective,
                &self.states_satisfying(left)?,
                &self.states_satisfying(right)?,
                None,
            ),
            Formula::BoundedBinary {
                operator: BinaryOperator::Until,
                left,
                right,
                bound,
            } => self.until(
                objective,
                &self.states_satisfying(left)?,
                &self.states_satisfying(right)?,
                Some(*bound),
            ),
            Formula::Unary {
                operator: UnaryOperator::Globally,
                operand,
            } => {
                let violation = Formula::finally((**operand).clone().not());
                return Ok(1.0 - self.path_probability(dual(objective), &violation)?);
            }
            Formula::BoundedUnary {
                operator: UnaryOperator::Globally,
                operand,
                bound,
            } => {
                let violation = Formula::bounded_finally((**operand).clone().not(), *bound);
                return Ok(1.0 - self.path_probability(dual(objective), &violation)?);
            }
            Formula::Unary {
                operator: UnaryOperator::Next,
                operand,
            } => {
                let satisfied = self.states_satisfying(operand)?;
                let indicator: Vec<f64> = (0..self.mdp.state_count() as u32)
                    .map(|state| if satisfied.contains(state) { 1.0 } else { 0.0 })
                    .collect();
                (0..self.mdp.state_count() as u32)
                    .map(|state| self.optimum(objective, state, &indicator).unwrap_or(0.0))
                    .collect()
            }
            _ => return Err(Error::UnsupportedFormula(path.to_string())),
        };
        Ok(self.initial_value(objective, &values))
    }

    /// States that reach `goal` through `allowed` states with positive probability under some choice.
    fn may_reach(&self, allowed: &BitSet, goal: &BitSet) -> BitSet {
        let mut reached = goal.clone();
        loop {
            let mut changed = false;
            for state in 0..self.mdp.state_count() as u32 {
                if reached.contains(state) || !allowed.contains(state) {
                    continue;
                }
                let hits = self.mdp.distributions(state).any(|distribution| {
                    self.mdp
                        .transitions(distribution)
                        .any(|(target, probability)| probability > 0.0 && reached.contains(target))
                });
                if hits {
                    reached.insert(state);
                    changed = true;
                }
            }
            if !changed {
                return reached;
            }
        }
    }

    fn until(&self, objective: Objective, allowed: &BitSet, goal: &BitSet, bound: Option<usize>) -> Vec<f64> {
        let candidates = self.may_reach(allowed, goal);
        let mut values: Vec<f64> = (0..self.mdp.state_count() as u32)
            .map(|state| if goal.contains(state) { 1.0 } else { 0.0 })
            .collect();
        let mut next = values.clone();

        let iterations = bound.unwrap_or(self.max_iterations);
        for iteration in 0..iterations {
            let mut difference: f64 = 0.0;
            for state in candidates.iter() {
                if goal.contains(state) {
                    continue;
                }
                let value = self.optimum(objective, state, &values).unwrap_or(0.0);
                difference = difference.max((value - values[state as usize]).abs());
                next[state as usize] = value;
            }
            std::mem::swap(&mut values, &mut next);
            if bound.is_none() && difference < self.tolerance {
                debug!("Value iteration converged after {} iterations", iteration + 1);
                break;
            }
        }
        values
    }

    /// Best expected value over the distributions of `state`, or `None` if it has none.
    fn optimum(&self, objective: Objective, state: u32, values: &[f64]) -> Option<f64> {
        self.optimum_over(objective, self.mdp.distributions(state), values)
    }

    fn optimum_over(&self, objective: Objective, distributions: impl Iterator<Item = u32>, values: &[f64]) -> Option<f64> {
        distributions
            .map(|distribution| {
                self.mdp
                    .transitions(distribution)
                    .map(|(target, probability)| probability * values[target as usize])
                    .sum::<f64>()
            })
            .reduce(|a, b| match objective {
                Objective::Minimum => a.min(b),
                Objective::Maximum => a.max(b),
            })
    }

    fn initial_value(&self, objective: Objective, values: &[f64]) -> f64 {
        self.optimum_over(objective, self.mdp.initial_distributions(), values)
            .unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use test_log::test;

    use super::*;
    use crate::formula::FormulaLabels;
    use crate::mdp::MdpBuilder;
    use crate::transition::StateFormulaSet;

    fn goal() -> Formula {
        Formula::atomic("goal", |state| state[0] == 1)
    }

    /// State 0 either tosses a coin between goal state 1 and sink 2, or stays.
    fn coin_mdp() -> Mdp {
        let labels = Arc::new(FormulaLabels::new([&goal()]).unwrap());
        let mut builder = MdpBuilder::new(3, 64, labels);
        builder.add_initial_distribution(&[(0, 1.0)]).unwrap();
        builder.add_distribution(0, &[(1, 0.5), (2, 0.5)]).unwrap();
        builder.add_distribution(0, &[(0, 1.0)]).unwrap();
        builder.add_distribution(1, &[(1, 1.0)]).unwrap();
        builder.add_distribution(2, &[(2, 1.0)]).unwrap();
        builder.set_state_labels(1, StateFormulaSet::from_bits(1));
        builder.build()
    }

    fn assert_close(actual: f64, expected: f64) {
        assert!((actual - expected).abs() < 1e-9, "{} != {}", actual, expected);
    }

    #[test]
    fn test_finally() {
        let mdp = coin_mdp();
        let checker = ProbabilityChecker::new(&mdp);
        let max = Formula::probability(Objective::Maximum, Formula::finally(goal()));
        let min = Formula::probability(Objective::Minimum, Formula::finally(goal()));
        assert_close(checker.calculate_probability(&max).unwrap(), 0.5);
        assert_close(checker.calculate_probability(&min).unwrap(), 0.0);
    }

    #[test]
    fn test_bounded_finally() {
        let mdp = coin_mdp();
        let checker = ProbabilityChecker::new(&mdp);
        let within = |bound| Formula::probability(Objective::Maximum, Formula::bounded_finally(goal(), bound));
        assert_close(checker.calculate_probability(&within(0)).unwrap(), 0.0);
        assert_close(checker.calculate_probability(&within(1)).unwrap(), 0.5);
        assert_close(checker.calculate_probability(&within(5)).unwrap(), 0.5);
    }

    #[test]
    fn test_globally_is_dual_of_finally() {
        let mdp = coin_mdp();
        let checker = ProbabilityChecker::new(&mdp);
        let never = Formula::globally(goal().not());
        let max = Formula::probability(Objective::Maximum, never.clone());
        let min = Formula::probability(Objective::Minimum, never);
        assert_close(checker.calculate_probability(&max).unwrap(), 1.0);
        assert_close(checker.calculate_probability(&min).unwrap(), 0.5);
    }

    #[test]
    fn test_geometric_convergence() {
        let labels = Arc::new(FormulaLabels::new([&goal()]).unwrap());
        let mut builder = MdpBuilder::new(2, 64, labels);
        builder.add_initial_distribution(&[(0, 1.0)]).unwrap();
        builder.add_distribution(0, &[(0, 0.9), (1, 0.1)]).unwrap();
        builder.add_distribution(1, &[(1, 1.0)]).unwrap();
        builder.set_state_labels(1, StateFormulaSet::from_bits(1));
        let mdp = builder.build();

        let checker = ProbabilityChecker::new(&mdp);
        let formula = Formula::probability(Objective::Minimum, Formula::finally(goal()));
        assert!((checker.calculate_probability(&formula).unwrap() - 1.0).abs() < 1e-8);
        let formula = Formula::probability(Objective::Minimum, Formula::next(goal()));
        assert_close(checker.calculate_probability(&formula).unwrap(), 0.1);
    }

    #[test]
    fn test_until() {
        let mdp = coin_mdp();
        let checker = ProbabilityChecker::new(&mdp);
        let formula = Formula::probability(Objective::Maximum, Formula::until(goal().not(), goal()));
        assert_close(checker.calculate_probability(&formula).unwrap(), 0.5);
        let formula = Formula::probability(Objective::Maximum, Formula::until(Formula::constant(false), goal()));
        assert_close(checker.calculate_probability(&formula).unwrap(), 0.0);
    }

    #[test]
    fn test_reward() {
        let mdp = coin_mdp();
        let checker = ProbabilityChecker::new(&mdp);
        let max = Formula::reward(Objective::Maximum, goal(), 3);
        let min = Formula::reward(Objective::Minimum, goal(), 3);
        assert_close(checker.calculate_reward(&max).unwrap(), 1.0);
        assert_close(checker.calculate_reward(&min).unwrap(), 0.0);
    }

    #[test]
    fn test_unsupported() {
        let mdp = coin_mdp();
        let checker = ProbabilityChecker::new(&mdp);
        assert!(matches!(
            checker.calculate_probability(&Formula::finally(goal())),
            Err(Error::UnsupportedFormula(_))
        ));
        let unknown = Formula::atomic("unknown", |_| true);
        assert!(matches!(
            checker.calculate_probability(&Formula::probability(Objective::Maximum, Formula::finally(unknown))),
            Err(Error::NotStateFormula(_))
        ));
    }
}
