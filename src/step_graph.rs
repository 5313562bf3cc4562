//! Continuation graph of a single model step.
//!
//! Every choice taken while stepping a model splits the current continuation
//! into fresh, consecutively numbered continuations. The resulting tree (a DAG
//! once untaken choices are forwarded) records how nondeterministic and
//! probabilistic decisions nest, so that the LTMDP builder can preserve the
//! exact branching structure of one step instead of flattening it.

/// Role of a continuation.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ChoiceKind {
    /// Not split (yet); a leaf at the end of the step.
    UnsplitOrFinal,
    /// Redirected to the continuation `to`.
    Forward,
    /// Split into the nondeterministic alternatives `from..=to`.
    Nondeterministic,
    /// Split into the probabilistic alternatives `from..=to`.
    Probabilistic,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct StepNode {
    pub kind: ChoiceKind,
    pub from: usize,
    pub to: usize,
    /// Probability relative to the parent split.
    pub probability: f64,
    /// Index of the transition that ends in this continuation (leaves only).
    pub target: Option<usize>,
}

impl StepNode {
    fn unsplit(probability: f64) -> Self {
        Self {
            kind: ChoiceKind::UnsplitOrFinal,
            from: 0,
            to: 0,
            probability,
            target: None,
        }
    }

    /// Children of a split node.
    pub fn children(&self) -> std::ops::RangeInclusive<usize> {
        match self.kind {
            ChoiceKind::Nondeterministic | ChoiceKind::Probabilistic => self.from..=self.to,
            #[allow(clippy::reversed_empty_ranges)]
            _ => 1..=0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StepGraph {
    nodes: Vec<StepNode>,
}

impl Default for StepGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl StepGraph {
    pub fn new() -> Self {
        let mut graph = Self { nodes: Vec::new() };
        graph.clear();
        graph
    }

    /// Resets the graph to the single root continuation `0`.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.nodes.push(StepNode::unsplit(1.0));
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, cid: usize) -> &StepNode {
        &self.nodes[cid]
    }

    fn split(&mut self, source: usize, from: usize, to: usize, kind: ChoiceKind) {
        assert!(from <= to, "Invalid split {}..={}", from, to);
        assert_eq!(from, self.nodes.len(), "Continuation {} is not fresh", from);
        let node = &mut self.nodes[source];
        assert_eq!(
            node.kind,
            ChoiceKind::UnsplitOrFinal,
            "Continuation {} is already split",
            source
        );
        node.kind = kind;
        node.from = from;
        node.to = to;
        self.nodes.resize(to + 1, StepNode::unsplit(1.0));
    }

    pub fn nondeterministic_split(&mut self, source: usize, from: usize, to: usize) {
        self.split(source, from, to, ChoiceKind::Nondeterministic);
    }

    pub fn probabilistic_split(&mut self, source: usize, from: usize, to: usize) {
        self.split(source, from, to, ChoiceKind::Probabilistic);
    }

    /// Keeps only the first two children of the split `source`.
    pub fn prune_to_two(&mut self, source: usize) {
        let node = &mut self.nodes[source];
        assert!(
            matches!(node.kind, ChoiceKind::Nondeterministic | ChoiceKind::Probabilistic),
            "Continuation {} is not split",
            source
        );
        assert!(node.to > node.from, "Continuation {} has a single child", source);
        node.to = node.from + 1;
    }

    /// Redirects the continuation `source` to `to`.
    pub fn forward(&mut self, source: usize, to: usize) {
        let node = &mut self.nodes[source];
        node.kind = ChoiceKind::Forward;
        node.from = to;
        node.to = to;
        node.target = None;
    }

    pub fn set_probability(&mut self, cid: usize, probability: f64) {
        self.nodes[cid].probability = probability;
    }

    pub fn probability(&self, cid: usize) -> f64 {
        self.nodes[cid].probability
    }

    pub fn kind(&self, cid: usize) -> ChoiceKind {
        self.nodes[cid].kind
    }

    /// Records that the path ending in the leaf `cid` produced transition `transition`.
    pub fn set_target_of_final(&mut self, cid: usize, transition: usize) {
        let node = &mut self.nodes[cid];
        assert_eq!(
            node.kind,
            ChoiceKind::UnsplitOrFinal,
            "Continuation {} is not a leaf",
            cid
        );
        node.target = Some(transition);
    }
}
