//! Fault set algebra.
//!
//! A [`FaultSet`] is an immutable bit set over the faults of one model: bit `i`
//! is set iff the fault with identifier `i` is a member. All operations return
//! new sets, so fault sets can be freely copied, hashed and used as map keys.
//!
//! The [`Subsumption`] relation captures "activating fault A has at least the
//! effect of activating fault B". Its closures are used by the heuristics of
//! the safety analysis to propose further fault sets worth checking.
//!
//! [`FaultSetCollection`] groups fault sets by cardinality and answers the
//! subset / superset queries the safety analysis needs for pruning.

use std::fmt::{Debug, Display, Formatter};

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::fault::Fault;

/// An immutable set of fault identifiers.
#[derive(Copy, Clone, Default, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct FaultSet(u64);

impl FaultSet {
    /// Maximal number of faults a model may declare.
    pub const MAX_FAULTS: usize = 63;

    /// Returns the empty fault set.
    pub const fn empty() -> Self {
        FaultSet(0)
    }

    /// Returns the set of all faults with identifiers `0..count`.
    pub fn full(count: usize) -> Self {
        assert!(count <= Self::MAX_FAULTS, "More than 63 faults are not supported");
        FaultSet((1u64 << count) - 1)
    }

    /// Creates a set from raw bits.
    pub const fn from_bits(bits: u64) -> Self {
        FaultSet(bits)
    }

    /// Creates a set containing exactly the given fault identifiers.
    pub fn from_faults(faults: impl IntoIterator<Item = usize>) -> Self {
        faults.into_iter().fold(Self::empty(), |set, fault| set.add(fault))
    }

    /// Ensures that `count` faults fit into a fault set.
    pub fn check_fault_count(count: usize) -> Result<()> {
        if count > Self::MAX_FAULTS {
            return Err(Error::TooManyFaults(count));
        }
        Ok(())
    }

    /// Returns the raw bits of the set.
    #[inline]
    pub const fn bits(self) -> u64 {
        self.0
    }

    /// Returns the number of faults in the set.
    #[inline]
    pub const fn cardinality(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Returns true if the set has no members.
    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Returns true if `fault` is a member of the set.
    #[inline]
    pub fn contains(self, fault: usize) -> bool {
        assert!(fault < Self::MAX_FAULTS, "Fault identifier {} out of range", fault);
        self.0 & (1 << fault) != 0
    }

    /// Returns a copy of the set with `fault` added.
    #[inline]
    pub fn add(self, fault: usize) -> Self {
        assert!(fault < Self::MAX_FAULTS, "Fault identifier {} out of range", fault);
        FaultSet(self.0 | (1 << fault))
    }

    /// Returns a copy of the set with `fault` removed.
    #[inline]
    pub fn remove(self, fault: usize) -> Self {
        assert!(fault < Self::MAX_FAULTS, "Fault identifier {} out of range", fault);
        FaultSet(self.0 & !(1 << fault))
    }

    #[inline]
    pub const fn union(self, other: Self) -> Self {
        FaultSet(self.0 | other.0)
    }

    #[inline]
    pub const fn intersection(self, other: Self) -> Self {
        FaultSet(self.0 & other.0)
    }

    /// Returns the faults of `self` that are not in `other`.
    #[inline]
    pub const fn difference(self, other: Self) -> Self {
        FaultSet(self.0 & !other.0)
    }

    /// Returns true if every member of `self` is a member of `other`.
    #[inline]
    pub const fn is_subset_of(self, other: Self) -> bool {
        self.0 & other.0 == self.0
    }

    #[inline]
    pub const fn is_proper_subset_of(self, other: Self) -> bool {
        self.is_subset_of(other) && self.0 != other.0
    }

    /// Iterates over the fault identifiers of the set in ascending order.
    pub fn iter(self) -> impl Iterator<Item = usize> {
        let mut bits = self.0;
        std::iter::from_fn(move || {
            if bits == 0 {
                return None;
            }
            let fault = bits.trailing_zeros() as usize;
            bits &= bits - 1;
            Some(fault)
        })
    }

    /// Returns the set extended by everything its members subsume.
    pub fn subsumed_faults(self, subsumption: &Subsumption) -> Self {
        self.iter()
            .fold(self, |subsumed, fault| subsumed.union(subsumption.closure(fault)))
    }

    /// Returns the set extended by every fault that (transitively) subsumes one of its members.
    pub fn subsuming_faults(self, subsumption: &Subsumption) -> Self {
        let mut subsuming = self;
        loop {
            let next = (0..subsumption.len())
                .filter(|&fault| !subsumption.closure(fault).intersection(subsuming).is_empty())
                .fold(subsuming, |set, fault| set.add(fault));
            if next == subsuming {
                return subsuming;
            }
            subsuming = next;
        }
    }

    /// Formats the set using the fault names, e.g. `{ F1, F2 }`.
    pub fn display<'a>(self, faults: &'a [Fault]) -> impl Display + 'a {
        DisplayFaultSet { set: self, faults }
    }
}

impl Debug for FaultSet {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

struct DisplayFaultSet<'a> {
    set: FaultSet,
    faults: &'a [Fault],
}

impl Display for DisplayFaultSet<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{")?;
        for (i, fault) in self.set.iter().enumerate() {
            let separator = if i == 0 { " " } else { ", " };
            match self.faults.get(fault) {
                Some(fault) => write!(f, "{}{}", separator, fault.name())?,
                None => write!(f, "{}#{}", separator, fault)?,
            }
        }
        if self.set.is_empty() {
            write!(f, "}}")
        } else {
            write!(f, " }}")
        }
    }
}

/// Transitive subsumption relation of the faults of one model.
#[derive(Debug, Clone)]
pub struct Subsumption {
    /// `closures[f]` holds every fault `f` transitively subsumes.
    closures: Vec<FaultSet>,
}

impl Subsumption {
    /// Computes the transitive closure of the declared subsumption relation.
    ///
    /// Reflexive and circular declarations are allowed; the fixed point is
    /// reached after at most `faults.len()` rounds.
    pub fn new(faults: &[Fault]) -> Self {
        let mut closures: Vec<FaultSet> = faults.iter().map(|fault| fault.subsumed()).collect();
        loop {
            let mut changed = false;
            for fault in 0..closures.len() {
                let current = closures[fault];
                let extended = current
                    .iter()
                    .filter(|&other| other < closures.len())
                    .fold(current, |set, other| set.union(closures[other]));
                if extended != current {
                    closures[fault] = extended;
                    changed = true;
                }
            }
            if !changed {
                return Self { closures };
            }
        }
    }

    /// Number of faults covered by the relation.
    pub fn len(&self) -> usize {
        self.closures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.closures.is_empty()
    }

    /// Faults transitively subsumed by `fault`.
    pub fn closure(&self, fault: usize) -> FaultSet {
        self.closures[fault]
    }
}

/// Fault sets grouped by cardinality.
#[derive(Debug, Clone)]
pub struct FaultSetCollection {
    levels: Vec<FxHashSet<FaultSet>>,
    len: usize,
}

impl FaultSetCollection {
    /// Creates an empty collection for models with `fault_count` faults.
    pub fn new(fault_count: usize) -> Self {
        Self {
            levels: vec![FxHashSet::default(); fault_count + 1],
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Adds `set`, returning false if it was already present.
    pub fn add(&mut self, set: FaultSet) -> bool {
        let cardinality = set.cardinality();
        if cardinality >= self.levels.len() {
            self.levels.resize_with(cardinality + 1, FxHashSet::default);
        }
        let added = self.levels[cardinality].insert(set);
        if added {
            self.len += 1;
        }
        added
    }

    pub fn contains(&self, set: FaultSet) -> bool {
        self.levels
            .get(set.cardinality())
            .is_some_and(|level| level.contains(&set))
    }

    /// Returns true if some member is a subset of `set` (including `set` itself).
    pub fn contains_subset_of(&self, set: FaultSet) -> bool {
        let cardinality = set.cardinality();
        self.levels
            .iter()
            .take(cardinality + 1)
            .any(|level| level.iter().any(|member| member.is_subset_of(set)))
    }

    /// Returns true if some member is a proper subset of `set`.
    pub fn contains_proper_subset_of(&self, set: FaultSet) -> bool {
        let cardinality = set.cardinality();
        self.levels
            .iter()
            .take(cardinality)
            .any(|level| level.iter().any(|member| member.is_subset_of(set)))
    }

    /// Returns true if some member is a superset of `set` (including `set` itself).
    pub fn contains_superset_of(&self, set: FaultSet) -> bool {
        let cardinality = set.cardinality();
        self.levels
            .iter()
            .skip(cardinality)
            .any(|level| level.iter().any(|member| set.is_subset_of(*member)))
    }

    /// Returns the members that have no proper subset in the collection.
    pub fn minimal_sets(&self) -> FxHashSet<FaultSet> {
        self.iter()
            .filter(|&set| !self.contains_proper_subset_of(set))
            .collect()
    }

    /// Iterates over all members, smallest cardinality first.
    pub fn iter(&self) -> impl Iterator<Item = FaultSet> + '_ {
        self.levels.iter().flat_map(|level| level.iter().copied())
    }
}
