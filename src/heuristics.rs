//! Heuristics guiding the search for minimal critical fault sets.
//!
//! A heuristic may push additional fault sets into the worklist of the safety
//! analysis before a cardinality level is processed, and is told the outcome of
//! every check. Suggestions are always model checked, so a poor heuristic only
//! costs time.

use std::collections::VecDeque;

use log::debug;
use rustc_hash::FxHashSet;

use crate::fault::{Activation, Fault};
use crate::fault_set::{FaultSet, Subsumption};

pub trait FaultSetHeuristic: Send {
    /// Called before the sets of `cardinality` are checked.
    fn augment(&mut self, cardinality: usize, worklist: &mut VecDeque<FaultSet>);

    /// Called after `checked` was found to be safe or critical.
    fn update(&mut self, worklist: &mut VecDeque<FaultSet>, checked: FaultSet, is_safe: bool);

    /// Forgets everything learned from a previous analysis.
    fn reset(&mut self) {}
}

fn non_suppressed(faults: &[Fault]) -> FaultSet {
    FaultSet::from_faults(
        faults
            .iter()
            .filter(|fault| fault.activation() != Activation::Suppressed)
            .map(|fault| fault.identifier()),
    )
}

/// Suggests the subsumed and subsuming closures of checked sets.
pub struct SubsumptionHeuristic {
    subsumption: Subsumption,
    suggested: FxHashSet<FaultSet>,
}

impl SubsumptionHeuristic {
    pub fn new(faults: &[Fault]) -> Self {
        Self {
            subsumption: Subsumption::new(faults),
            suggested: FxHashSet::default(),
        }
    }

    fn suggest(&mut self, set: FaultSet, closure: FaultSet) -> Option<FaultSet> {
        (closure != set && self.suggested.insert(closure)).then_some(closure)
    }
}

impl FaultSetHeuristic for SubsumptionHeuristic {
    fn augment(&mut self, _cardinality: usize, worklist: &mut VecDeque<FaultSet>) {
        let queued: Vec<FaultSet> = worklist.iter().copied().collect();
        for set in queued {
            let closure = set.subsumed_faults(&self.subsumption);
            if let Some(suggestion) = self.suggest(set, closure) {
                worklist.push_front(suggestion);
            }
        }
    }

    fn update(&mut self, worklist: &mut VecDeque<FaultSet>, checked: FaultSet, _is_safe: bool) {
        let subsumed = checked.subsumed_faults(&self.subsumption);
        let subsuming = checked.subsuming_faults(&self.subsumption);
        for closure in [subsumed, subsuming] {
            if let Some(suggestion) = self.suggest(checked, closure) {
                worklist.push_back(suggestion);
            }
        }
    }

    fn reset(&mut self) {
        self.suggested.clear();
    }
}

/// Starts from the largest sets that leave one fault of every redundancy group
/// inactive and shrinks them step by step.
///
/// Useful for systems built from redundant alternatives: such sets are likely
/// safe, and every safe set spares the checks of all its subsets.
pub struct MinimalRedundancyHeuristic {
    all_faults: FaultSet,
    subsumption: Subsumption,
    min_set_size: usize,
    initial: FxHashSet<FaultSet>,
    current: FxHashSet<FaultSet>,
    next: FxHashSet<FaultSet>,
    /// Number of faults removed from a suggestion per step.
    step_size: usize,
    success: isize,
}

impl MinimalRedundancyHeuristic {
    /// Creates the heuristic with a minimal suggestion size of half the faults.
    pub fn new(faults: &[Fault], groups: &[Vec<usize>]) -> Self {
        Self::with_min_set_size(faults, groups, faults.len() / 2)
    }

    pub fn with_min_set_size(faults: &[Fault], groups: &[Vec<usize>], min_set_size: usize) -> Self {
        let all_faults = non_suppressed(faults);
        let subsumption = Subsumption::new(faults);

        let mut products: Vec<FaultSet> = vec![FaultSet::empty()];
        for group in groups {
            products = products
                .iter()
                .flat_map(|&excluded| group.iter().map(move |&fault| excluded.add(fault)))
                .collect();
        }
        let initial = products
            .into_iter()
            .map(|excluded| all_faults.difference(excluded.subsuming_faults(&subsumption)))
            .collect();

        let mut heuristic = Self {
            all_faults,
            subsumption,
            min_set_size,
            initial,
            current: FxHashSet::default(),
            next: FxHashSet::default(),
            step_size: 1,
            success: 0,
        };
        heuristic.reset();
        heuristic
    }

    /// Removes every combination of `step_size` faults (with the faults subsuming them) from every set.
    fn shrink(&self, sets: &FxHashSet<FaultSet>) -> FxHashSet<FaultSet> {
        let mut result = FxHashSet::default();
        for &set in sets {
            let members: Vec<usize> = set.iter().collect();
            for_each_combination(&members, self.step_size, &mut |removed| {
                result.insert(set.difference(removed.subsuming_faults(&self.subsumption)));
            });
        }
        result
    }

    fn tolerance(&self) -> isize {
        (self.all_faults.cardinality() / 4) as isize
    }
}

/// Calls `f` with every subset of `members` of the given size.
fn for_each_combination(members: &[usize], size: usize, f: &mut impl FnMut(FaultSet)) {
    fn recurse(members: &[usize], size: usize, chosen: FaultSet, f: &mut impl FnMut(FaultSet)) {
        if size == 0 {
            f(chosen);
            return;
        }
        for i in 0..members.len() {
            if members.len() - i < size {
                break;
            }
            recurse(&members[i + 1..], size - 1, chosen.add(members[i]), f);
        }
    }
    recurse(members, size, FaultSet::empty(), f);
}

impl FaultSetHeuristic for MinimalRedundancyHeuristic {
    fn augment(&mut self, _cardinality: usize, worklist: &mut VecDeque<FaultSet>) {
        self.success = 0;
        for &suggestion in &self.current {
            worklist.push_front(suggestion);
        }
    }

    fn update(&mut self, _worklist: &mut VecDeque<FaultSet>, checked: FaultSet, is_safe: bool) {
        if !self.current.remove(&checked) {
            return;
        }

        if is_safe {
            self.success += 1;
            self.next.retain(|set| !set.is_subset_of(checked));
        } else {
            self.success -= 1;
        }

        if self.current.is_empty() && checked.cardinality() > self.min_set_size {
            if self.success < -self.tolerance() && is_safe {
                self.step_size += 1;
                self.success = 0;
                debug!("Removing {} faults per step from now on", self.step_size);
            }
            self.current = std::mem::take(&mut self.next);
            self.next = self.shrink(&self.current);
        }
    }

    fn reset(&mut self) {
        self.step_size = 1;
        self.success = 0;
        self.current = self.initial.clone();
        self.next = self.shrink(&self.current);
    }
}

/// Once critical sets are known, suggests the largest sets avoiding all of them.
///
/// Every suggestion is the complement of a hitting set of the critical sets
/// found so far; if it is safe, all its subsets are safe as well.
pub struct MaximalSafeSetHeuristic {
    all_faults: FaultSet,
    forced: FaultSet,
    cardinality_level: usize,
    /// Critical sets the heuristic was seeded with.
    known_critical_sets: Vec<FaultSet>,
    critical_sets: Vec<FaultSet>,
    suggested: FxHashSet<FaultSet>,
    has_new_critical_sets: bool,
}

impl MaximalSafeSetHeuristic {
    pub const DEFAULT_CARDINALITY_LEVEL: usize = 3;

    pub fn new(faults: &[Fault]) -> Self {
        Self::with_cardinality_level(faults, Self::DEFAULT_CARDINALITY_LEVEL)
    }

    /// Suggestions are made from the given cardinality level on.
    pub fn with_cardinality_level(faults: &[Fault], cardinality_level: usize) -> Self {
        Self {
            all_faults: non_suppressed(faults),
            forced: FaultSet::from_faults(
                faults
                    .iter()
                    .filter(|fault| fault.activation() == Activation::Forced)
                    .map(|fault| fault.identifier()),
            ),
            cardinality_level,
            known_critical_sets: Vec::new(),
            critical_sets: Vec::new(),
            suggested: FxHashSet::default(),
            has_new_critical_sets: false,
        }
    }

    /// Seeds the heuristic with critical sets known from a previous analysis; suggestions start immediately.
    pub fn with_critical_sets(faults: &[Fault], critical_sets: impl IntoIterator<Item = FaultSet>) -> Self {
        let mut heuristic = Self::with_cardinality_level(faults, 0);
        heuristic.known_critical_sets.extend(critical_sets);
        heuristic.reset();
        heuristic
    }

    fn collect_hitting_sets(&self, hit: FaultSet, index: usize, result: &mut FxHashSet<FaultSet>) {
        let Some(&critical) = self.critical_sets.get(index) else {
            result.insert(hit);
            return;
        };
        if !critical.intersection(hit).is_empty() {
            self.collect_hitting_sets(hit, index + 1, result);
            return;
        }
        for fault in critical.difference(self.forced).iter() {
            self.collect_hitting_sets(hit.add(fault), index + 1, result);
        }
    }
}

impl FaultSetHeuristic for MaximalSafeSetHeuristic {
    fn augment(&mut self, cardinality: usize, worklist: &mut VecDeque<FaultSet>) {
        if worklist.is_empty()
            || self.critical_sets.is_empty()
            || cardinality < self.cardinality_level
            || !self.has_new_critical_sets
        {
            return;
        }

        self.has_new_critical_sets = false;
        let mut hitting_sets = FxHashSet::default();
        self.collect_hitting_sets(FaultSet::empty(), 0, &mut hitting_sets);

        self.suggested.clear();
        for hitting in hitting_sets {
            let suggestion = self.all_faults.difference(hitting);
            if self.suggested.insert(suggestion) {
                worklist.push_front(suggestion);
            }
        }
        debug!(
            "Suggested {} maximal safe set candidates from {} critical sets",
            self.suggested.len(),
            self.critical_sets.len()
        );
    }

    fn update(&mut self, _worklist: &mut VecDeque<FaultSet>, checked: FaultSet, is_safe: bool) {
        if is_safe || self.suggested.contains(&checked) {
            return;
        }
        self.has_new_critical_sets = true;
        self.critical_sets.push(checked);
    }

    fn reset(&mut self) {
        self.critical_sets.clone_from(&self.known_critical_sets);
        self.suggested.clear();
        self.has_new_critical_sets = !self.critical_sets.is_empty();
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    fn faults(count: usize) -> Vec<Fault> {
        (0..count).map(|i| Fault::transient(i, format!("F{}", i))).collect()
    }

    fn set(faults: &[usize]) -> FaultSet {
        FaultSet::from_faults(faults.iter().copied())
    }

    #[test]
    fn test_subsumption_enqueues_closures() {
        let faults = vec![Fault::transient(0, "F1").subsumes(1), Fault::transient(1, "F2")];
        let mut heuristic = SubsumptionHeuristic::new(&faults);
        let mut worklist = VecDeque::new();

        heuristic.update(&mut worklist, set(&[0]), false);
        assert_eq!(worklist, [set(&[0, 1])]);

        // The same closure is never suggested twice.
        heuristic.update(&mut worklist, set(&[1]), true);
        assert_eq!(worklist, [set(&[0, 1])]);
    }

    #[test]
    fn test_subsumption_suggests_subsuming_closure() {
        let faults = vec![Fault::transient(0, "F1").subsumes(1), Fault::transient(1, "F2")];
        let mut heuristic = SubsumptionHeuristic::new(&faults);
        let mut worklist = VecDeque::new();

        heuristic.update(&mut worklist, set(&[1]), true);
        assert_eq!(worklist, [set(&[0, 1])]);
    }

    #[test]
    fn test_subsumption_reset_forgets_suggestions() {
        let faults = vec![Fault::transient(0, "F1").subsumes(1), Fault::transient(1, "F2")];
        let mut heuristic = SubsumptionHeuristic::new(&faults);

        let mut first = VecDeque::new();
        heuristic.update(&mut first, set(&[0]), false);
        assert_eq!(first, [set(&[0, 1])]);

        heuristic.reset();
        let mut second = VecDeque::new();
        heuristic.update(&mut second, set(&[0]), false);
        assert_eq!(second, [set(&[0, 1])]);
    }

    #[test]
    fn test_subsumption_terminates_on_cycles() {
        let faults = vec![
            Fault::transient(0, "A").subsumes(0).subsumes(1),
            Fault::transient(1, "B").subsumes(2),
            Fault::transient(2, "C").subsumes(0),
        ];
        let mut heuristic = SubsumptionHeuristic::new(&faults);
        let mut worklist = VecDeque::from([set(&[1])]);
        heuristic.augment(1, &mut worklist);
        assert_eq!(worklist.front(), Some(&set(&[0, 1, 2])));

        let mut checks = 0;
        while let Some(checked) = worklist.pop_front() {
            checks += 1;
            heuristic.update(&mut worklist, checked, true);
        }
        assert_eq!(checks, 2);
    }

    #[test]
    fn test_combinations() {
        let mut subsets = Vec::new();
        for_each_combination(&[1, 3, 5, 7], 2, &mut |subset| subsets.push(subset));
        assert_eq!(subsets.len(), 6);
        assert!(subsets.contains(&set(&[5, 7])));
        assert!(subsets.iter().all(|subset| subset.cardinality() == 2));
    }

    #[test]
    fn test_minimal_redundancy_suggestions() {
        let faults = faults(4);
        let mut heuristic = MinimalRedundancyHeuristic::with_min_set_size(&faults, &[vec![0, 1], vec![2, 3]], 1);
        let mut worklist = VecDeque::new();
        heuristic.augment(0, &mut worklist);
        let mut suggestions: Vec<FaultSet> = worklist.iter().copied().collect();
        suggestions.sort();
        assert_eq!(suggestions, vec![set(&[0, 2]), set(&[1, 2]), set(&[0, 3]), set(&[1, 3])]);

        // All suggestions safe: their subsets are not suggested next.
        for suggestion in suggestions {
            heuristic.update(&mut worklist, suggestion, true);
        }
        let mut next = VecDeque::new();
        heuristic.augment(1, &mut next);
        assert!(next.is_empty());
    }

    #[test]
    fn test_minimal_redundancy_shrinks_critical_suggestions() {
        let faults = faults(4);
        let mut heuristic = MinimalRedundancyHeuristic::with_min_set_size(&faults, &[vec![0, 1], vec![2, 3]], 1);
        let mut worklist = VecDeque::new();
        heuristic.augment(0, &mut worklist);
        for suggestion in worklist.clone() {
            heuristic.update(&mut worklist, suggestion, false);
        }
        let mut next = VecDeque::new();
        heuristic.augment(1, &mut next);
        assert_eq!(next.len(), 4);
        assert!(next.iter().all(|set| set.cardinality() == 1));
    }

    #[test]
    fn test_maximal_safe_set_suggestions() {
        let faults = faults(4);
        let mut heuristic = MaximalSafeSetHeuristic::new(&faults);
        let mut worklist = VecDeque::from([set(&[0, 1, 2])]);

        heuristic.update(&mut worklist, set(&[0, 1]), false);
        heuristic.update(&mut worklist, set(&[2]), true);

        // Below the cardinality level nothing is suggested.
        heuristic.augment(2, &mut worklist);
        assert_eq!(worklist.len(), 1);

        heuristic.augment(3, &mut worklist);
        let suggestions: FxHashSet<FaultSet> = worklist.iter().copied().collect();
        assert!(suggestions.contains(&set(&[1, 2, 3])));
        assert!(suggestions.contains(&set(&[0, 2, 3])));
        assert_eq!(worklist.len(), 3);

        // Without new critical sets the suggestions are not repeated.
        heuristic.update(&mut worklist, set(&[1, 2, 3]), false);
        let before = worklist.len();
        heuristic.augment(4, &mut worklist);
        assert_eq!(worklist.len(), before);
    }

    #[test]
    fn test_minimal_redundancy_reset_restarts_from_largest_sets() {
        let faults = faults(4);
        let mut heuristic = MinimalRedundancyHeuristic::with_min_set_size(&faults, &[vec![0, 1], vec![2, 3]], 1);
        let mut worklist = VecDeque::new();
        heuristic.augment(0, &mut worklist);
        for suggestion in worklist.clone() {
            heuristic.update(&mut worklist, suggestion, false);
        }

        heuristic.reset();
        let mut restarted = VecDeque::new();
        heuristic.augment(0, &mut restarted);
        assert_eq!(restarted.len(), 4);
        assert!(restarted.iter().all(|set| set.cardinality() == 2));
    }

    #[test]
    fn test_maximal_safe_set_reset_keeps_seeded_sets_only() {
        let faults = faults(3);
        let mut heuristic = MaximalSafeSetHeuristic::with_critical_sets(&faults, [set(&[0])]);
        heuristic.update(&mut VecDeque::new(), set(&[1]), false);

        heuristic.reset();
        let mut worklist = VecDeque::from([set(&[2])]);
        heuristic.augment(1, &mut worklist);
        assert_eq!(worklist.front(), Some(&set(&[1, 2])));
        assert_eq!(worklist.len(), 2);
    }

    #[test]
    fn test_maximal_safe_set_skips_forced_faults() {
        let faults = vec![
            Fault::transient(0, "A").with_activation(Activation::Forced),
            Fault::transient(1, "B"),
            Fault::transient(2, "C"),
        ];
        let mut heuristic = MaximalSafeSetHeuristic::with_critical_sets(&faults, [set(&[0, 1])]);
        let mut worklist = VecDeque::from([set(&[0])]);
        heuristic.augment(1, &mut worklist);
        assert_eq!(worklist.front(), Some(&set(&[0, 2])));
    }
}
