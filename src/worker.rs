//! Traversal workers.
//!
//! Each worker owns a private model instance, transition buffer and modifier
//! chain, so expanding a state never touches shared data except for the state
//! storage and the load balancer. Graph edges and continuation graphs are
//! collected into worker-local fragments and merged after the traversal.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use log::trace;
use parking_lot::Mutex;

use crate::error::{Capacity, Error, Result};
use crate::graph::{GraphEdge, GraphFragment};
use crate::load_balancer::{LoadBalancer, Work};
use crate::ltmdp::LtmdpFragment;
use crate::model::{AnalysisModel, ExecutableModel};
use crate::modifiers::TransitionModifier;
use crate::storage::StateStorage;
use crate::transition::TransitionBuffer;

/// Number of states a worker takes from the frontier at once.
const BATCH_SIZE: usize = 64;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum TraversalMode {
    /// Stop at the first transition marked as terminating.
    Invariant,
    StateGraph,
    Ltmdp,
}

/// Data shared by all workers of one traversal.
pub(crate) struct Shared<'a> {
    pub storage: &'a StateStorage,
    pub balancer: &'a LoadBalancer,
    pub mode: TraversalMode,
    pub allow_terminal_states: bool,
    pub transition_capacity: usize,
    reserved_transitions: AtomicUsize,
    max_depth: AtomicU32,
    violation: Mutex<Option<u32>>,
}

impl<'a> Shared<'a> {
    pub fn new(
        storage: &'a StateStorage,
        balancer: &'a LoadBalancer,
        mode: TraversalMode,
        allow_terminal_states: bool,
        transition_capacity: usize,
    ) -> Self {
        Self {
            storage,
            balancer,
            mode,
            allow_terminal_states,
            transition_capacity,
            reserved_transitions: AtomicUsize::new(0),
            max_depth: AtomicU32::new(0),
            violation: Mutex::new(None),
        }
    }

    /// Reserves room for `count` stored transitions or continuation elements.
    fn reserve(&self, count: usize) -> Result<()> {
        let reserved = self.reserved_transitions.fetch_add(count, Ordering::Relaxed) + count;
        if reserved > self.transition_capacity {
            let kind = match self.mode {
                TraversalMode::Ltmdp => Capacity::ContinuationGraph,
                _ => Capacity::Transition,
            };
            return Err(Error::CapacityExceeded {
                kind,
                capacity: self.transition_capacity,
            });
        }
        Ok(())
    }

    /// Number of levels of the discovery tree.
    pub fn level_count(&self) -> usize {
        self.max_depth.load(Ordering::Relaxed) as usize + 1
    }

    /// Target state of the first violating transition, if any.
    pub fn violation(&self) -> Option<u32> {
        *self.violation.lock()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown cause"
    }
}

pub(crate) struct Worker<M> {
    pub model: AnalysisModel<M>,
    buffer: TransitionBuffer,
    pub modifiers: Vec<Box<dyn TransitionModifier>>,
    pub graph: GraphFragment,
    pub ltmdp: LtmdpFragment,
    pub computed_transitions: usize,
    pub committed_transitions: usize,
    batch: Vec<Work>,
    discovered: Vec<Work>,
    targets: Vec<Option<u32>>,
}

impl<M: ExecutableModel> Worker<M> {
    pub fn new(
        model: AnalysisModel<M>,
        successor_capacity: usize,
        modifiers: Vec<Box<dyn TransitionModifier>>,
    ) -> Self {
        let buffer = TransitionBuffer::new(model.state_size(), successor_capacity);
        Self {
            model,
            buffer,
            modifiers,
            graph: GraphFragment::default(),
            ltmdp: LtmdpFragment::default(),
            computed_transitions: 0,
            committed_transitions: 0,
            batch: Vec::new(),
            discovered: Vec::new(),
            targets: Vec::new(),
        }
    }

    /// Computes and modifies the transitions leaving `source` (or the initial state).
    pub fn compute(&mut self, source: Option<&[u8]>, buffer: &mut TransitionBuffer) -> Result<()> {
        match source {
            Some(state) => self.model.compute_successors(state, buffer)?,
            None => self.model.compute_initial_transitions(buffer)?,
        }
        for modifier in &mut self.modifiers {
            modifier.modify_transitions(buffer, source);
        }
        Ok(())
    }

    /// Computes and commits the transitions leaving `source`.
    ///
    /// A panicking model is reported as [`Error::Model`], so that the other
    /// workers are released instead of waiting for this one forever.
    fn expand(&mut self, source: Option<u32>, depth: u32, buffer: &mut TransitionBuffer, shared: &Shared<'_>) -> Result<()> {
        let state = source.map(|state| shared.storage.get(state));
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.compute(state, buffer)?;
            self.commit(source, depth, buffer, shared)
        }));
        match outcome {
            Ok(result) => result,
            Err(payload) => Err(Error::model(format!("Model panicked: {}", panic_message(&*payload)))),
        }
    }

    /// Computes the initial transitions and seeds the frontier with their targets.
    pub fn process_initial(&mut self, shared: &Shared<'_>) -> Result<()> {
        let mut buffer = std::mem::replace(&mut self.buffer, TransitionBuffer::new(0, 0));
        let result = self.expand(None, 0, &mut buffer, shared);
        self.buffer = buffer;
        result?;
        shared.balancer.push(self.discovered.drain(..));
        Ok(())
    }

    /// Expands frontier states until the traversal is over.
    pub fn run(&mut self, shared: &Shared<'_>) {
        let mut batch = std::mem::take(&mut self.batch);
        let mut buffer = std::mem::replace(&mut self.buffer, TransitionBuffer::new(0, 0));
        while shared.balancer.take(&mut batch, BATCH_SIZE) {
            for &(state, depth) in &batch {
                if shared.balancer.is_terminated() {
                    break;
                }
                if let Err(error) = self.expand(Some(state), depth, &mut buffer, shared) {
                    shared.balancer.report_error(error);
                    break;
                }
            }
            shared.balancer.finish(&mut self.discovered);
        }
        self.batch = batch;
        self.buffer = buffer;
    }

    fn commit(&mut self, source: Option<u32>, depth: u32, buffer: &TransitionBuffer, shared: &Shared<'_>) -> Result<()> {
        self.computed_transitions += buffer.len();

        let valid = buffer.valid_count();
        if valid == 0 {
            match source {
                None => return Err(Error::NoInitialStates),
                Some(state) if shared.mode != TraversalMode::Invariant && !shared.allow_terminal_states => {
                    return Err(Error::TerminalState { state });
                }
                Some(state) => trace!("State {} is terminal", state),
            }
        }
        if shared.mode == TraversalMode::StateGraph {
            shared.reserve(valid)?;
        }

        let target_depth = if source.is_some() { depth + 1 } else { 0 };
        self.targets.clear();
        let mut violation = None;
        for (transition, target) in buffer.iter() {
            if !transition.is_valid {
                self.targets.push(None);
                continue;
            }

            let (index, is_new) = shared.storage.add_state(target)?;
            self.targets.push(Some(index));
            if source.is_some() {
                self.committed_transitions += 1;
            }

            if is_new {
                if let Some(source) = source {
                    shared.storage.set_parent(index, source);
                }
                self.discovered.push((index, target_depth));
                shared.max_depth.fetch_max(target_depth, Ordering::Relaxed);
                match shared.mode {
                    TraversalMode::StateGraph => self.graph.labels.push((index, transition.formulas)),
                    TraversalMode::Ltmdp => self.ltmdp.add_label(index, transition.formulas),
                    TraversalMode::Invariant => {}
                }
            }

            if shared.mode == TraversalMode::StateGraph {
                let edge = GraphEdge {
                    target: index,
                    formulas: transition.formulas,
                    faults: transition.activated_faults,
                };
                match source {
                    Some(source) => self.graph.edges.push((source, edge)),
                    None => self.graph.initial.push(edge),
                }
            }

            if transition.terminates && violation.is_none() {
                violation = Some(index);
            }
        }

        if shared.mode == TraversalMode::Ltmdp {
            let added = self
                .ltmdp
                .add_step(source, self.model.resolver().step_graph(), buffer, &self.targets);
            shared.reserve(added)?;
        }

        if let Some(target) = violation {
            if shared.balancer.claim_counterexample() {
                trace!("Transition into state {} violates the invariant", target);
                *shared.violation.lock() = Some(target);
            }
            shared.balancer.terminate();
        }
        Ok(())
    }
}
