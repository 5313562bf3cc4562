mod common;

use common::{rupture, PressureTank, SENSOR_FAULT, TIMER_FAULT};
use dcca_rs::config::{AnalysisConfiguration, FaultActivationBehavior};
use dcca_rs::error::Result;
use dcca_rs::fault::Fault;
use dcca_rs::fault_set::FaultSet;
use dcca_rs::formula::Formula;
use dcca_rs::heuristics::{MaximalSafeSetHeuristic, MinimalRedundancyHeuristic, SubsumptionHeuristic};
use dcca_rs::model::{ExecutableModel, ExecutionContext};
use dcca_rs::order_analysis::{OrderAnalysis, OrderRelationshipKind};
use dcca_rs::safety_analysis::{SafetyAnalysis, SafetyAnalysisResult};
use test_log::test;

fn configuration() -> AnalysisConfiguration {
    AnalysisConfiguration::default().with_cpu_count(2)
}

fn both() -> FaultSet {
    FaultSet::from_faults([SENSOR_FAULT, TIMER_FAULT])
}

fn analyze(analysis: &mut SafetyAnalysis) -> SafetyAnalysisResult {
    analysis.compute(PressureTank::default, &rupture()).unwrap()
}

#[test]
fn test_jointly_critical_permanent_faults() {
    let result = analyze(&mut SafetyAnalysis::new(configuration()));

    assert!(result.is_complete);
    assert_eq!(result.sorted_minimal_critical_sets(), vec![both()]);
    assert!(result.exceptions.is_empty());

    // The empty set, both singletons and the pair.
    assert_eq!(result.checked_sets.len(), 4);
    assert!(result.checked_sets.contains(&FaultSet::empty()));
    assert!(result.checked_sets.contains(&FaultSet::from_faults([SENSOR_FAULT])));
    assert!(result.checked_sets.contains(&FaultSet::from_faults([TIMER_FAULT])));
}

#[test]
fn test_minimal_sets_are_minimal() {
    let result = analyze(&mut SafetyAnalysis::new(configuration()));

    for &set in &result.minimal_critical_sets {
        for &other in &result.minimal_critical_sets {
            assert!(!other.is_proper_subset_of(set), "{:?} is not minimal", set);
        }
        for fault in set.iter() {
            let subset = set.remove(fault);
            assert!(result.checked_sets.contains(&subset));
            assert!(!result.minimal_critical_sets.contains(&subset));
        }
    }
}

#[test]
fn test_activation_behaviors_agree() {
    for behavior in [
        FaultActivationBehavior::ForceOnly,
        FaultActivationBehavior::ForceThenFallback,
        FaultActivationBehavior::Nondeterministic,
    ] {
        let configuration = configuration().with_fault_activation_behavior(behavior);
        let result = analyze(&mut SafetyAnalysis::new(configuration));
        assert_eq!(result.sorted_minimal_critical_sets(), vec![both()], "{:?}", behavior);
    }
}

#[test]
fn test_critical_set_counterexample_replays() {
    let result = analyze(&mut SafetyAnalysis::new(configuration()));

    let counter_example = &result.counter_examples[&both()];
    assert!(counter_example.last_state().unwrap()[0] >= common::RUPTURE);
    counter_example.replay(PressureTank::default()).unwrap();
}

#[test]
fn test_heuristics_do_not_change_result() {
    let faults = PressureTank::default().faults();

    let mut analysis = SafetyAnalysis::new(configuration());
    analysis.add_heuristic(MaximalSafeSetHeuristic::new(&faults));
    analysis.add_heuristic(MinimalRedundancyHeuristic::new(
        &faults,
        &[vec![SENSOR_FAULT], vec![TIMER_FAULT]],
    ));
    analysis.add_heuristic(SubsumptionHeuristic::new(&faults));
    let result = analyze(&mut analysis);

    assert!(result.is_complete);
    assert_eq!(result.sorted_minimal_critical_sets(), vec![both()]);
}

#[test]
fn test_single_fault_bound_stops_early() {
    let configuration = configuration().with_max_critical_set_cardinality(Some(1));
    let result = analyze(&mut SafetyAnalysis::new(configuration));

    assert!(!result.is_complete);
    assert!(result.minimal_critical_sets.is_empty());
    assert!(!result.checked_sets.contains(&both()));
}

/// Three faults; F1 and F2 subsume each other, the hazard needs both in the same step.
struct Linked {
    hazard: bool,
}

impl ExecutableModel for Linked {
    fn state_size(&self) -> usize {
        1
    }
    fn write_state(&self, state: &mut [u8]) {
        state[0] = self.hazard as u8;
    }
    fn read_state(&mut self, state: &[u8]) {
        self.hazard = state[0] != 0;
    }
    fn faults(&self) -> Vec<Fault> {
        vec![
            Fault::transient(0, "F1").subsumes(1),
            Fault::transient(1, "F2").subsumes(0),
            Fault::transient(2, "F3"),
        ]
    }
    fn execute_initial_step(&mut self, _context: &mut ExecutionContext<'_>) -> Result<()> {
        Ok(())
    }
    fn execute_step(&mut self, context: &mut ExecutionContext<'_>) -> Result<()> {
        let f1 = context.try_activate(0);
        let f2 = context.try_activate(1);
        context.try_activate(2);
        self.hazard |= f1 && f2;
        Ok(())
    }
}

#[test]
fn test_circular_subsumption_is_suggested_once() {
    let hazard = Formula::atomic("hazard", |state| state[0] != 0);
    let faults = Linked { hazard: false }.faults();

    let mut analysis = SafetyAnalysis::new(configuration());
    analysis.add_heuristic(SubsumptionHeuristic::new(&faults));
    let result = analysis.compute(|| Linked { hazard: false }, &hazard).unwrap();

    let linked = FaultSet::from_faults([0, 1]);
    assert!(result.is_complete);
    assert_eq!(result.sorted_minimal_critical_sets(), vec![linked]);
    assert!(result.checked_sets.contains(&linked));
    assert!(result.statistics.suggestion_count >= 1);
}

#[test]
fn test_reused_analysis_suggests_again() {
    let hazard = Formula::atomic("hazard", |state| state[0] != 0);
    let faults = Linked { hazard: false }.faults();

    let mut analysis = SafetyAnalysis::new(configuration());
    analysis.add_heuristic(SubsumptionHeuristic::new(&faults));
    let first = analysis.compute(|| Linked { hazard: false }, &hazard).unwrap();
    let second = analysis.compute(|| Linked { hazard: false }, &hazard).unwrap();

    assert_eq!(first.sorted_minimal_critical_sets(), second.sorted_minimal_critical_sets());
    assert_eq!(first.checked_sets, second.checked_sets);
    assert_eq!(first.statistics.suggestion_count, second.statistics.suggestion_count);
}

/// The tank leaks with `Leak`; activating `Crash` makes the model panic.
struct Volatile {
    leaked: bool,
}

impl ExecutableModel for Volatile {
    fn state_size(&self) -> usize {
        1
    }
    fn write_state(&self, state: &mut [u8]) {
        state[0] = self.leaked as u8;
    }
    fn read_state(&mut self, state: &[u8]) {
        self.leaked = state[0] != 0;
    }
    fn faults(&self) -> Vec<Fault> {
        vec![
            Fault::transient(0, "Leak"),
            Fault::transient(1, "Crash"),
            Fault::transient(2, "Spare"),
        ]
    }
    fn execute_initial_step(&mut self, _context: &mut ExecutionContext<'_>) -> Result<()> {
        Ok(())
    }
    fn execute_step(&mut self, context: &mut ExecutionContext<'_>) -> Result<()> {
        let leak = context.try_activate(0);
        if context.try_activate(1) {
            panic!("pressure valve jammed");
        }
        context.try_activate(2);
        self.leaked |= leak;
        Ok(())
    }
}

#[test]
fn test_panicking_fault_set_is_isolated() {
    let hazard = Formula::atomic("leaked", |state| state[0] != 0);
    let result = SafetyAnalysis::new(configuration())
        .compute(|| Volatile { leaked: false }, &hazard)
        .unwrap();

    let leak = FaultSet::from_faults([0]);
    let crash = FaultSet::from_faults([1]);
    assert!(result.is_complete);
    assert_eq!(result.sorted_minimal_critical_sets(), vec![leak, crash]);
    assert!(result.exceptions[&crash].contains("pressure valve jammed"));
    assert!(!result.exceptions.contains_key(&leak));
    assert!(result.counter_examples.contains_key(&leak));
    assert!(result.checked_sets.contains(&FaultSet::from_faults([2])));
}

#[test]
fn test_sensor_failure_strictly_precedes_timer_failure() {
    let safety = analyze(&mut SafetyAnalysis::new(configuration()));
    let result = OrderAnalysis::new(configuration())
        .compute(PressureTank::default, &rupture(), &safety)
        .unwrap();

    let relationships = &result.relationships[&both()];
    assert_eq!(relationships.len(), 1);
    assert_eq!(relationships[0].first, SENSOR_FAULT);
    assert_eq!(relationships[0].second, TIMER_FAULT);
    assert_eq!(relationships[0].kind, OrderRelationshipKind::StrictlyPrecedes);
    assert!(result.to_string().contains("SensorStuck strictly precedes TimerFails"));
}
