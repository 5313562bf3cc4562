//! Deductive cause-consequence analysis.
//!
//! Searches the powerset of the model's faults for the minimal sets whose
//! activation allows a hazard to occur. Sets are generated level by level in
//! increasing cardinality; a set of cardinality `k` is only generated if all
//! of its subsets of cardinality `k - 1` are safe, since a superset of a
//! critical set is critical. Every set is decided by checking the invariant
//! `!hazard` with all faults outside the set suppressed.
//!
//! Heuristics may suggest additional sets in between. Suggestions do not
//! affect the result: a safe suggestion only spares the checks of its subsets,
//! and critical suggestions are filtered out by the final minimality pass.

use std::collections::VecDeque;
use std::fmt::{Display, Formatter};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::config::{AnalysisConfiguration, FaultActivationBehavior};
use crate::counterexample::CounterExample;
use crate::error::Result;
use crate::fault::{Activation, Fault};
use crate::fault_set::{FaultSet, FaultSetCollection};
use crate::formula::Formula;
use crate::heuristics::FaultSetHeuristic;
use crate::model::ExecutableModel;
use crate::modifiers::FaultSuppressionModifier;
use crate::traverser::ModelTraverser;

#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct HeuristicStatistics {
    /// Sets suggested by heuristics that were not part of a generated level.
    pub suggestion_count: usize,
    /// Sets decided without model checking because of known safe or critical sets.
    pub trivial_check_count: usize,
    pub heuristic_trivial_count: usize,
    /// Suggestions found safe by model checking.
    pub heuristic_non_trivial_safe_count: usize,
}

#[derive(Debug, Clone)]
pub struct SafetyAnalysisResult {
    pub faults: Vec<Fault>,
    pub hazard: String,
    pub minimal_critical_sets: FxHashSet<FaultSet>,
    /// False if the search stopped at the cardinality bound or on the first exception.
    pub is_complete: bool,
    pub checked_sets: FxHashSet<FaultSet>,
    /// Number of model checker runs.
    pub checked_set_count: usize,
    /// Errors raised by the model while checking a minimal critical set.
    pub exceptions: FxHashMap<FaultSet, String>,
    pub counter_examples: FxHashMap<FaultSet, CounterExample>,
    pub forced_faults: FaultSet,
    pub suppressed_faults: FaultSet,
    pub statistics: HeuristicStatistics,
    pub elapsed: Duration,
}

impl SafetyAnalysisResult {
    /// Minimal critical sets ordered by cardinality, then by identifiers.
    pub fn sorted_minimal_critical_sets(&self) -> Vec<FaultSet> {
        let mut sets: Vec<FaultSet> = self.minimal_critical_sets.iter().copied().collect();
        sets.sort_by_key(|set| (set.cardinality(), *set));
        sets
    }

    pub fn fault_names(&self) -> Vec<&str> {
        self.faults.iter().map(|fault| fault.name()).collect()
    }
}

impl Display for SafetyAnalysisResult {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=======================================")?;
        writeln!(f, "=======      Safety Analysis      =====")?;
        writeln!(f, "=======================================")?;
        writeln!(f, "Hazard: {}", self.hazard)?;
        writeln!(f, "Elapsed time: {:?}", self.elapsed)?;
        writeln!(f, "Fault count: {}", self.faults.len())?;
        writeln!(f, "Faults: {}", self.fault_names().join(", "))?;
        if !self.forced_faults.is_empty() {
            writeln!(f, "Forced faults: {}", self.forced_faults.display(&self.faults))?;
        }
        if !self.suppressed_faults.is_empty() {
            writeln!(f, "Suppressed faults: {}", self.suppressed_faults.display(&self.faults))?;
        }
        writeln!(f, "Checked fault sets: {}", self.checked_set_count)?;
        writeln!(f, "Minimal critical sets: {}", self.minimal_critical_sets.len())?;
        if !self.is_complete {
            writeln!(f, "The analysis is incomplete, larger critical sets may exist.")?;
        }
        for (index, set) in self.sorted_minimal_critical_sets().into_iter().enumerate() {
            write!(f, "  ({}) {}", index + 1, set.display(&self.faults))?;
            if let Some(exception) = self.exceptions.get(&set) {
                write!(f, " [exception: {}]", exception)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

pub struct SafetyAnalysis {
    configuration: AnalysisConfiguration,
    heuristics: Vec<Box<dyn FaultSetHeuristic>>,
}

impl SafetyAnalysis {
    pub fn new(configuration: AnalysisConfiguration) -> Self {
        Self {
            configuration,
            heuristics: Vec::new(),
        }
    }

    pub fn configuration(&self) -> &AnalysisConfiguration {
        &self.configuration
    }

    pub fn add_heuristic(&mut self, heuristic: impl FaultSetHeuristic + 'static) {
        self.heuristics.push(Box::new(heuristic));
    }

    /// Computes the minimal critical fault sets of `hazard`.
    pub fn compute<M: ExecutableModel + 'static>(
        &mut self,
        creator: impl Fn() -> M + Send + Sync + 'static,
        hazard: &Formula,
    ) -> Result<SafetyAnalysisResult> {
        let start = Instant::now();
        let traverser = ModelTraverser::new(creator, self.configuration.clone())?;
        let faults = traverser.faults();
        FaultSet::check_fault_count(faults.len())?;

        let with_activation = |activation: Activation| {
            FaultSet::from_faults(
                faults
                    .iter()
                    .filter(|fault| fault.activation() == activation)
                    .map(|fault| fault.identifier()),
            )
        };
        let forced = with_activation(Activation::Forced);
        let suppressed = with_activation(Activation::Suppressed);
        let non_suppressed: Vec<usize> = faults
            .iter()
            .filter(|fault| fault.activation() != Activation::Suppressed)
            .map(|fault| fault.identifier())
            .collect();

        info!("Running deductive cause-consequence analysis of '{}'", hazard);
        info!(
            "Of the {} faults, {} are suppressed, {} are forced and {} are activated nondeterministically",
            faults.len(),
            suppressed.cardinality(),
            forced.cardinality(),
            faults.len() - suppressed.cardinality() - forced.cardinality()
        );

        let mut search = Search {
            traverser,
            invariant: hazard.clone().not(),
            behavior: self.configuration.fault_activation_behavior,
            stop_on_first_exception: self.configuration.stop_on_first_exception,
            faults: faults.clone(),
            forced,
            suppressed,
            safe: FaultSetCollection::new(faults.len()),
            critical: FaultSetCollection::new(faults.len()),
            checked_sets: FxHashSet::default(),
            checked_set_count: 0,
            exceptions: FxHashMap::default(),
            counter_examples: FxHashMap::default(),
            statistics: HeuristicStatistics::default(),
        };
        for heuristic in &mut self.heuristics {
            heuristic.reset();
        }
        let max_cardinality = self.configuration.max_critical_set_cardinality.unwrap_or(usize::MAX);
        let is_complete = search.run(&non_suppressed, max_cardinality, &mut self.heuristics)?;

        let minimal_critical_sets = search.critical.minimal_sets();
        let non_minimal: Vec<FaultSet> = search
            .critical
            .iter()
            .filter(|set| !minimal_critical_sets.contains(set))
            .collect();
        for set in non_minimal {
            search.exceptions.remove(&set);
            search.counter_examples.remove(&set);
        }

        let result = SafetyAnalysisResult {
            faults,
            hazard: hazard.to_string(),
            minimal_critical_sets,
            is_complete,
            checked_sets: search.checked_sets,
            checked_set_count: search.checked_set_count,
            exceptions: search.exceptions,
            counter_examples: search.counter_examples,
            forced_faults: forced,
            suppressed_faults: suppressed,
            statistics: search.statistics,
            elapsed: start.elapsed(),
        };
        info!(
            "Found {} minimal critical sets after {} checks in {:?}",
            result.minimal_critical_sets.len(),
            result.checked_set_count,
            result.elapsed
        );
        Ok(result)
    }
}

/// Activations that enable exactly the faults of `set`, activated as `activation`.
///
/// Faults declared suppressed or forced keep their declared activation.
pub(crate) fn effective_activations(faults: &[Fault], set: FaultSet, activation: Activation) -> Vec<Activation> {
    faults
        .iter()
        .map(|fault| match fault.activation() {
            Activation::Nondeterministic if set.contains(fault.identifier()) => activation,
            Activation::Nondeterministic => Activation::Suppressed,
            declared => declared,
        })
        .collect()
}

/// State of one analysis run.
struct Search<M> {
    traverser: ModelTraverser<M>,
    invariant: Formula,
    behavior: FaultActivationBehavior,
    stop_on_first_exception: bool,
    faults: Vec<Fault>,
    forced: FaultSet,
    suppressed: FaultSet,
    /// Sets found safe by model checking.
    safe: FaultSetCollection,
    critical: FaultSetCollection,
    checked_sets: FxHashSet<FaultSet>,
    checked_set_count: usize,
    exceptions: FxHashMap<FaultSet, String>,
    counter_examples: FxHashMap<FaultSet, CounterExample>,
    statistics: HeuristicStatistics,
}

impl<M: ExecutableModel> Search<M> {
    fn is_valid(&self, set: FaultSet) -> bool {
        self.forced.is_subset_of(set) && self.suppressed.intersection(set).is_empty()
    }

    fn should_stop(&self) -> bool {
        self.stop_on_first_exception && !self.exceptions.is_empty()
    }

    /// Returns whether the search covered every cardinality.
    fn run(
        &mut self,
        faults: &[usize],
        max_cardinality: usize,
        heuristics: &mut [Box<dyn FaultSetHeuristic>],
    ) -> Result<bool> {
        let mut current_safe: FxHashSet<FaultSet> = FxHashSet::default();
        for cardinality in 0..=faults.len() {
            let generated = self.generate_level(cardinality, faults, &mut current_safe);
            current_safe.clear();

            // Invalid sets are never checked but their supersets must still be generated.
            let mut level: FxHashSet<FaultSet> = FxHashSet::default();
            for set in generated {
                if self.is_valid(set) {
                    level.insert(set);
                } else {
                    current_safe.insert(set);
                }
            }
            if level.is_empty() {
                continue;
            }
            if cardinality > max_cardinality {
                info!("Stopping at cardinality {}, larger sets remain unchecked", cardinality);
                return Ok(false);
            }
            info!("Checking {} sets of cardinality {}", level.len(), cardinality);

            let mut ordered: Vec<FaultSet> = level.iter().copied().collect();
            ordered.sort();
            let mut worklist: VecDeque<FaultSet> = ordered.into();
            for heuristic in heuristics.iter_mut() {
                let count = worklist.len();
                heuristic.augment(cardinality, &mut worklist);
                if worklist.len() > count {
                    debug!("Heuristic made {} suggestions", worklist.len() - count);
                }
            }

            while let Some(set) = worklist.pop_front() {
                let is_current_level = level.remove(&set);
                let is_valid = (is_current_level || self.is_valid(set)) && set.cardinality() <= max_cardinality;
                let is_safe = if is_valid {
                    self.check_set(set, !is_current_level)?
                } else {
                    true
                };
                if is_safe && is_current_level {
                    current_safe.insert(set);
                }
                for heuristic in heuristics.iter_mut() {
                    heuristic.update(&mut worklist, set, is_safe);
                }
                if self.should_stop() {
                    return Ok(false);
                }
            }

            let mut remaining: Vec<FaultSet> = level.into_iter().collect();
            remaining.sort();
            for set in remaining {
                if self.check_set(set, false)? {
                    current_safe.insert(set);
                }
                if self.should_stop() {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    /// Generates the sets of `cardinality` all of whose subsets one smaller are in `previous_safe`.
    fn generate_level(
        &self,
        cardinality: usize,
        faults: &[usize],
        previous_safe: &mut FxHashSet<FaultSet>,
    ) -> FxHashSet<FaultSet> {
        let mut result = FxHashSet::default();
        match cardinality {
            0 => {
                result.insert(FaultSet::empty());
            }
            1 => {
                if !previous_safe.is_empty() {
                    result.extend(
                        faults
                            .iter()
                            .map(|&fault| FaultSet::empty().add(fault))
                            .filter(|&set| !self.critical.contains(set)),
                    );
                }
            }
            _ => {
                for (i, &fault) in faults.iter().enumerate() {
                    let mut exhausted = Vec::new();
                    for &safe in previous_safe.iter() {
                        if safe.contains(fault) {
                            exhausted.push(safe);
                            continue;
                        }
                        let set = safe.add(fault);
                        let is_trivially_critical = self.critical.contains(set)
                            || faults[i + 1..]
                                .iter()
                                .any(|&other| set.contains(other) && !previous_safe.contains(&set.remove(other)));
                        if !is_trivially_critical {
                            result.insert(set);
                        }
                    }
                    for set in exhausted {
                        previous_safe.remove(&set);
                    }
                    if previous_safe.is_empty() {
                        break;
                    }
                }
            }
        }
        result
    }

    fn check_set(&mut self, set: FaultSet, is_suggestion: bool) -> Result<bool> {
        if is_suggestion {
            self.statistics.suggestion_count += 1;
        }

        if self.safe.contains_superset_of(set) {
            self.statistics.trivial_check_count += 1;
            if is_suggestion {
                self.statistics.heuristic_trivial_count += 1;
            }
            return Ok(true);
        }
        if is_suggestion && self.critical.contains_subset_of(set) {
            self.statistics.trivial_check_count += 1;
            self.statistics.heuristic_trivial_count += 1;
            return Ok(false);
        }

        let mut is_safe = true;
        if matches!(
            self.behavior,
            FaultActivationBehavior::ForceOnly | FaultActivationBehavior::ForceThenFallback
        ) {
            is_safe = self.check_with_activation(set, is_suggestion, Activation::Forced)?;
        }
        if is_safe && self.behavior != FaultActivationBehavior::ForceOnly {
            if self.behavior == FaultActivationBehavior::ForceThenFallback {
                debug!("Checking {} again with nondeterministic activation", set.display(&self.faults));
            }
            is_safe = self.check_with_activation(set, is_suggestion, Activation::Nondeterministic)?;
        }

        if is_safe {
            self.safe.add(set);
            if is_suggestion {
                self.statistics.heuristic_non_trivial_safe_count += 1;
            }
        }
        Ok(is_safe)
    }

    fn check_with_activation(&mut self, set: FaultSet, is_suggestion: bool, activation: Activation) -> Result<bool> {
        let activations = effective_activations(&self.faults, set, activation);
        let suppressed = FaultSet::full(self.faults.len()).difference(set);
        self.traverser.set_activations(Some(activations));
        self.traverser
            .set_modifiers(vec![FaultSuppressionModifier::factory(suppressed)]);

        let outcome = self.traverser.check_invariant(&self.invariant);
        self.checked_sets.insert(set);
        self.checked_set_count += 1;
        let suffix = if is_suggestion { " [heuristic]" } else { "" };

        match outcome {
            Ok(result) => {
                if result.formula_holds {
                    if is_suggestion {
                        info!("    safe:      {}{}", set.display(&self.faults), suffix);
                    }
                } else {
                    info!("    critical:  {}{}", set.display(&self.faults), suffix);
                    self.critical.add(set);
                }
                if let Some(counter_example) = result.counter_example {
                    self.counter_examples.insert(set, counter_example);
                }
                Ok(result.formula_holds)
            }
            Err(error) if error.is_fatal() => Err(error),
            Err(error) => {
                warn!(
                    "    critical:  {}{} [exception: {}]",
                    set.display(&self.faults),
                    suffix,
                    error
                );
                self.critical.add(set);
                self.exceptions.insert(set, error.to_string());
                Ok(false)
            }
        }
    }
}
