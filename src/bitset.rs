//! Dense sets of state indices.
//!
//! Used for per-state bookkeeping after a traversal: states satisfying a
//! label, terminal states, states reaching a goal with positive probability.

/// Fixed-size bit set over the state indices `0..len`.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct BitSet {
    /// Each u64 holds 64 states.
    words: Vec<u64>,
    universe: usize,
    /// Number of set bits, cached.
    count: usize,
}

impl BitSet {
    const BITS_PER_WORD: usize = 64;

    /// Creates an empty set over `universe` states.
    pub fn new(universe: usize) -> Self {
        Self {
            words: vec![0; universe.div_ceil(Self::BITS_PER_WORD)],
            universe,
            count: 0,
        }
    }

    /// Creates the set of all states in `0..universe` satisfying `predicate`.
    pub fn from_predicate(universe: usize, mut predicate: impl FnMut(u32) -> bool) -> Self {
        let mut set = Self::new(universe);
        for state in 0..universe as u32 {
            if predicate(state) {
                set.insert(state);
            }
        }
        set
    }

    /// Number of states in the universe.
    pub fn universe(&self) -> usize {
        self.universe
    }

    /// Number of states in the set.
    #[inline]
    pub fn len(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    #[inline]
    fn word_and_bit(state: u32) -> (usize, u64) {
        let index = state as usize;
        (index / Self::BITS_PER_WORD, 1 << (index % Self::BITS_PER_WORD))
    }

    #[inline]
    pub fn contains(&self, state: u32) -> bool {
        if state as usize >= self.universe {
            return false;
        }
        let (word, mask) = Self::word_and_bit(state);
        self.words[word] & mask != 0
    }

    /// Adds `state`. Returns true if it was not in the set before.
    #[inline]
    pub fn insert(&mut self, state: u32) -> bool {
        assert!(
            (state as usize) < self.universe,
            "State {} is outside the universe of {} states",
            state,
            self.universe
        );
        let (word, mask) = Self::word_and_bit(state);
        let was_clear = self.words[word] & mask == 0;
        if was_clear {
            self.words[word] |= mask;
            self.count += 1;
        }
        was_clear
    }

    /// Removes `state`. Returns true if it was in the set before.
    #[inline]
    pub fn remove(&mut self, state: u32) -> bool {
        if state as usize >= self.universe {
            return false;
        }
        let (word, mask) = Self::word_and_bit(state);
        let was_set = self.words[word] & mask != 0;
        if was_set {
            self.words[word] &= !mask;
            self.count -= 1;
        }
        was_set
    }

    /// States of the universe not in this set.
    pub fn complement(&self) -> Self {
        let mut words: Vec<u64> = self.words.iter().map(|word| !word).collect();
        let tail = self.universe % Self::BITS_PER_WORD;
        if tail != 0 {
            if let Some(last) = words.last_mut() {
                *last &= (1 << tail) - 1;
            }
        }
        Self {
            words,
            universe: self.universe,
            count: self.universe - self.count,
        }
    }

    fn recount(&mut self) {
        self.count = self.words.iter().map(|word| word.count_ones() as usize).sum();
    }

    pub fn union_with(&mut self, other: &BitSet) {
        assert_eq!(self.universe, other.universe, "Universe mismatch");
        for (word, other) in self.words.iter_mut().zip(&other.words) {
            *word |= other;
        }
        self.recount();
    }

    pub fn intersect_with(&mut self, other: &BitSet) {
        assert_eq!(self.universe, other.universe, "Universe mismatch");
        for (word, other) in self.words.iter_mut().zip(&other.words) {
            *word &= other;
        }
        self.recount();
    }

    pub fn iter(&self) -> BitSetIter<'_> {
        BitSetIter {
            words: &self.words,
            word_index: 0,
            current_word: self.words.first().copied().unwrap_or(0),
        }
    }
}

/// Iterator over the states of a [`BitSet`] in increasing order.
pub struct BitSetIter<'a> {
    words: &'a [u64],
    word_index: usize,
    current_word: u64,
}

impl Iterator for BitSetIter<'_> {
    type Item = u32;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.current_word != 0 {
                let bit = self.current_word.trailing_zeros() as usize;
                self.current_word &= self.current_word - 1; // Clear lowest set bit
                return Some((self.word_index * BitSet::BITS_PER_WORD + bit) as u32);
            }

            self.word_index += 1;
            if self.word_index >= self.words.len() {
                return None;
            }
            self.current_word = self.words[self.word_index];
        }
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    #[test]
    fn test_insert_remove() {
        let mut set = BitSet::new(100);
        assert!(set.is_empty());
        assert!(set.insert(42));
        assert!(!set.insert(42));
        assert!(set.contains(42));
        assert!(!set.contains(200));
        assert!(set.remove(42));
        assert!(!set.remove(42));
        assert_eq!(set.len(), 0);
    }

    #[test]
    #[should_panic(expected = "outside the universe")]
    fn test_insert_outside_universe() {
        BitSet::new(10).insert(10);
    }

    #[test]
    fn test_iter_across_words() {
        let set = BitSet::from_predicate(130, |state| matches!(state, 3 | 5 | 64 | 129));
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![3, 5, 64, 129]);
        assert_eq!(set.len(), 4);
    }

    #[test]
    fn test_complement_respects_universe() {
        let set = BitSet::from_predicate(70, |state| state % 2 == 0);
        let complement = set.complement();
        assert_eq!(complement.len(), 35);
        assert!(complement.contains(69));
        assert!(!complement.contains(68));
        assert_eq!(complement.iter().last(), Some(69));
    }

    #[test]
    fn test_union_and_intersection() {
        let mut a = BitSet::from_predicate(10, |state| state < 5);
        let b = BitSet::from_predicate(10, |state| state % 2 == 0);
        let mut c = a.clone();
        a.union_with(&b);
        c.intersect_with(&b);
        assert_eq!(a.iter().collect::<Vec<_>>(), vec![0, 1, 2, 3, 4, 6, 8]);
        assert_eq!(c.iter().collect::<Vec<_>>(), vec![0, 2, 4]);
        assert_eq!(c.len(), 3);
    }
}
