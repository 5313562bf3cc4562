//! Order relationships between the faults of minimal critical sets.
//!
//! For every pair of faults in a minimal critical set, the hazard is checked
//! three more times: with the first fault activated strictly before the second,
//! the other way round, and with both activated in the same step. The outcomes
//! show whether the order of the activations matters for the hazard.

use std::fmt::{Display, Formatter};
use std::time::{Duration, Instant};

use log::{debug, info};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::config::{AnalysisConfiguration, FaultActivationBehavior};
use crate::counterexample::CounterExample;
use crate::error::Result;
use crate::fault::{Activation, Fault};
use crate::fault_set::FaultSet;
use crate::formula::Formula;
use crate::model::ExecutableModel;
use crate::modifiers::{FaultOrderModifier, FaultSuppressionModifier};
use crate::safety_analysis::{effective_activations, SafetyAnalysisResult};
use crate::traverser::{AnalysisResult, ModelTraverser};

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum OrderRelationshipKind {
    /// The hazard requires both faults to be activated in the same step.
    Simultaneously,
    /// The hazard requires `first` no later than `second`.
    Precedes,
    /// The hazard requires `first` in an earlier step than `second`.
    StrictlyPrecedes,
}

impl Display for OrderRelationshipKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            OrderRelationshipKind::Simultaneously => "simultaneously with",
            OrderRelationshipKind::Precedes => "precedes",
            OrderRelationshipKind::StrictlyPrecedes => "strictly precedes",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderRelationship {
    pub first: usize,
    pub second: usize,
    pub kind: OrderRelationshipKind,
    /// Counterexample of the simultaneous activation check, if it failed.
    pub witness: Option<CounterExample>,
}

#[derive(Debug, Clone)]
pub struct OrderAnalysisResult {
    pub faults: Vec<Fault>,
    pub relationships: FxHashMap<FaultSet, Vec<OrderRelationship>>,
    pub elapsed: Duration,
}

impl Display for OrderAnalysisResult {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut sets: Vec<&FaultSet> = self.relationships.keys().collect();
        sets.sort_by_key(|set| (set.cardinality(), **set));
        for set in sets {
            writeln!(f, "{}:", set.display(&self.faults))?;
            let relationships = &self.relationships[set];
            if relationships.is_empty() {
                writeln!(f, "  no order relationships")?;
            }
            for relationship in relationships {
                writeln!(
                    f,
                    "  {} {} {}",
                    self.faults[relationship.first].name(),
                    relationship.kind,
                    self.faults[relationship.second].name()
                )?;
            }
        }
        Ok(())
    }
}

pub struct OrderAnalysis {
    configuration: AnalysisConfiguration,
}

impl OrderAnalysis {
    pub fn new(configuration: AnalysisConfiguration) -> Self {
        Self { configuration }
    }

    /// Computes the order relationships of every minimal critical set with at least two faults.
    ///
    /// Sets whose check raised an exception are skipped.
    pub fn compute<M: ExecutableModel + 'static>(
        &self,
        creator: impl Fn() -> M + Send + Sync + 'static,
        hazard: &Formula,
        safety: &SafetyAnalysisResult,
    ) -> Result<OrderAnalysisResult> {
        let start = Instant::now();
        let mut traverser = ModelTraverser::new(creator, self.configuration.clone())?;
        let faults = traverser.faults();
        let invariant = hazard.clone().not();
        let activation = match self.configuration.fault_activation_behavior {
            FaultActivationBehavior::ForceOnly => Activation::Forced,
            _ => Activation::Nondeterministic,
        };

        let mut relationships = FxHashMap::default();
        for set in safety.sorted_minimal_critical_sets() {
            if set.cardinality() < 2 || safety.exceptions.contains_key(&set) {
                continue;
            }
            traverser.set_activations(Some(effective_activations(&faults, set, activation)));
            let suppressed = FaultSet::full(faults.len()).difference(set);

            let members: Vec<usize> = set.iter().collect();
            let mut found = Vec::new();
            for (i, &fault1) in members.iter().enumerate() {
                for &fault2 in &members[i + 1..] {
                    if let Some(relationship) = relate(&mut traverser, &invariant, suppressed, fault1, fault2)? {
                        debug!(
                            "{} {} {}",
                            faults[relationship.first].name(),
                            relationship.kind,
                            faults[relationship.second].name()
                        );
                        found.push(relationship);
                    }
                }
            }
            relationships.insert(set, found);
        }

        info!(
            "Computed order relationships of {} critical sets in {:?}",
            relationships.len(),
            start.elapsed()
        );
        Ok(OrderAnalysisResult {
            faults,
            relationships,
            elapsed: start.elapsed(),
        })
    }
}

fn check_order<M: ExecutableModel>(
    traverser: &mut ModelTraverser<M>,
    invariant: &Formula,
    suppressed: FaultSet,
    first: usize,
    second: usize,
    force_simultaneous: bool,
) -> Result<AnalysisResult> {
    traverser.set_modifiers(vec![
        FaultSuppressionModifier::factory(suppressed),
        FaultOrderModifier::factory(first, second, force_simultaneous),
    ]);
    traverser.check_invariant(invariant)
}

fn relate<M: ExecutableModel>(
    traverser: &mut ModelTraverser<M>,
    invariant: &Formula,
    suppressed: FaultSet,
    fault1: usize,
    fault2: usize,
) -> Result<Option<OrderRelationship>> {
    let fault1_first = check_order(traverser, invariant, suppressed, fault1, fault2, false)?.formula_holds;
    let fault2_first = check_order(traverser, invariant, suppressed, fault2, fault1, false)?.formula_holds;
    if !fault1_first && !fault2_first {
        return Ok(None);
    }

    let simultaneous = check_order(traverser, invariant, suppressed, fault1, fault2, true)?;
    let relationship = |first, second, kind| {
        Some(OrderRelationship {
            first,
            second,
            kind,
            witness: simultaneous.counter_example.clone(),
        })
    };
    let holds = simultaneous.formula_holds;
    Ok(match (fault1_first, fault2_first) {
        (true, true) if !holds => relationship(fault1, fault2, OrderRelationshipKind::Simultaneously),
        (false, _) if !holds => relationship(fault1, fault2, OrderRelationshipKind::Precedes),
        (false, _) => relationship(fault1, fault2, OrderRelationshipKind::StrictlyPrecedes),
        (_, false) if !holds => relationship(fault2, fault1, OrderRelationshipKind::Precedes),
        (_, false) => relationship(fault2, fault1, OrderRelationshipKind::StrictlyPrecedes),
        (true, true) => None,
    })
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::model::ExecutionContext;
    use crate::safety_analysis::SafetyAnalysis;

    #[derive(Debug, Copy, Clone, Eq, PartialEq)]
    enum Rule {
        /// A, then B in a later step.
        Strict,
        /// A, then B in the same or a later step.
        Weak,
        /// A and B first activated in the same step.
        Together,
    }

    /// Raises the hazard depending on the order in which faults A and B first occur.
    struct Ordered {
        rule: Rule,
        a_seen: bool,
        a_first: bool,
        b_seen: bool,
        hazard: bool,
    }

    impl Ordered {
        fn new(rule: Rule) -> Self {
            Self {
                rule,
                a_seen: false,
                a_first: false,
                b_seen: false,
                hazard: false,
            }
        }
    }

    impl ExecutableModel for Ordered {
        fn state_size(&self) -> usize {
            4
        }
        fn write_state(&self, state: &mut [u8]) {
            state[0] = self.a_seen as u8;
            state[1] = self.a_first as u8;
            state[2] = self.b_seen as u8;
            state[3] = self.hazard as u8;
        }
        fn read_state(&mut self, state: &[u8]) {
            self.a_seen = state[0] != 0;
            self.a_first = state[1] != 0;
            self.b_seen = state[2] != 0;
            self.hazard = state[3] != 0;
        }
        fn faults(&self) -> Vec<Fault> {
            vec![Fault::transient(0, "A"), Fault::transient(1, "B")]
        }
        fn execute_initial_step(&mut self, _context: &mut ExecutionContext<'_>) -> Result<()> {
            Ok(())
        }
        fn execute_step(&mut self, context: &mut ExecutionContext<'_>) -> Result<()> {
            let a = context.try_activate(0);
            let b = context.try_activate(1);
            match self.rule {
                Rule::Strict => {
                    if a && !b && !self.b_seen {
                        self.a_first = true;
                    }
                    self.hazard |= b && self.a_first;
                }
                Rule::Weak => {
                    if a && !self.b_seen {
                        self.a_first = true;
                    }
                    self.hazard |= b && self.a_first;
                }
                Rule::Together => {
                    self.hazard |= a && b && !self.a_seen && !self.b_seen;
                }
            }
            self.a_seen |= a;
            self.b_seen |= b;
            Ok(())
        }
    }

    fn hazard() -> Formula {
        Formula::atomic("hazard", |state| state[3] != 0)
    }

    fn relationships(rule: Rule) -> Vec<OrderRelationship> {
        let configuration = AnalysisConfiguration::default().with_cpu_count(2);
        let safety = SafetyAnalysis::new(configuration.clone())
            .compute(move || Ordered::new(rule), &hazard())
            .unwrap();
        let both = FaultSet::from_faults([0, 1]);
        assert_eq!(safety.sorted_minimal_critical_sets(), vec![both]);

        let result = OrderAnalysis::new(configuration)
            .compute(move || Ordered::new(rule), &hazard(), &safety)
            .unwrap();
        result.relationships[&both].clone()
    }

    #[test]
    fn test_strictly_precedes() {
        let found = relationships(Rule::Strict);
        assert_eq!(found.len(), 1);
        assert_eq!((found[0].first, found[0].second), (0, 1));
        assert_eq!(found[0].kind, OrderRelationshipKind::StrictlyPrecedes);
        assert!(found[0].witness.is_none());
    }

    #[test]
    fn test_precedes() {
        let found = relationships(Rule::Weak);
        assert_eq!(found.len(), 1);
        assert_eq!((found[0].first, found[0].second), (0, 1));
        assert_eq!(found[0].kind, OrderRelationshipKind::Precedes);
        assert!(found[0].witness.is_some());
    }

    #[test]
    fn test_simultaneously() {
        let found = relationships(Rule::Together);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].kind, OrderRelationshipKind::Simultaneously);
    }
}
