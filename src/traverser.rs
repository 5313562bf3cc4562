//! Parallel exploration of the reachable state space.
//!
//! [`ModelTraverser`] creates one worker per thread of a fixed `rayon` pool.
//! Worker 0 computes the initial transitions, then all workers expand states
//! from the shared frontier until it is exhausted or the traversal is stopped.
//! Depending on the requested output, the traversal checks an invariant,
//! builds a [`StateGraph`], or builds an [`Ltmdp`].
//!
//! The set of reachable states, the number of transitions and the verdict do
//! not depend on the number of threads; only the counterexample found for a
//! violated invariant may differ between runs.

use std::sync::Arc;
use std::time::Instant;

use log::{debug, info};
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::config::AnalysisConfiguration;
use crate::counterexample::{CounterExample, CounterExampleStep};
use crate::error::{Error, Result};
use crate::fault::{Activation, Fault};
use crate::formula::{Formula, FormulaLabels, StateEvaluator};
use crate::graph::StateGraph;
use crate::load_balancer::LoadBalancer;
use crate::ltmdp::Ltmdp;
use crate::model::{AnalysisModel, ExecutableModel};
use crate::modifiers::{EarlyTerminationModifier, ModifierFactory, ObserveFormulasModifier, TransitionModifier};
use crate::storage::StateStorage;
use crate::transition::TransitionBuffer;
use crate::worker::{Shared, TraversalMode, Worker};

/// Creates fresh model instances, one per worker.
pub type ModelCreator<M> = Arc<dyn Fn() -> M + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisResult {
    pub formula_holds: bool,
    pub counter_example: Option<CounterExample>,
    pub state_count: usize,
    /// Committed transitions between states; initial transitions are not counted.
    pub transition_count: usize,
    /// Candidate transitions computed, including invalid and duplicate ones.
    pub computed_transition_count: usize,
    /// Depth of the discovery tree.
    pub level_count: usize,
}

/// Everything left over from one traversal.
struct Traversal<M> {
    storage: StateStorage,
    workers: Vec<Worker<M>>,
    labels: Arc<FormulaLabels>,
    header_bytes: usize,
    violation: Option<u32>,
    level_count: usize,
}

impl<M> Traversal<M> {
    fn transition_count(&self) -> usize {
        self.workers.iter().map(|worker| worker.committed_transitions).sum()
    }

    fn computed_transition_count(&self) -> usize {
        self.workers.iter().map(|worker| worker.computed_transitions).sum()
    }
}

pub struct ModelTraverser<M> {
    creator: ModelCreator<M>,
    configuration: AnalysisConfiguration,
    pool: ThreadPool,
    activations: Option<Vec<Activation>>,
    modifiers: Vec<ModifierFactory>,
}

impl<M: ExecutableModel> ModelTraverser<M> {
    pub fn new(creator: impl Fn() -> M + Send + Sync + 'static, configuration: AnalysisConfiguration) -> Result<Self> {
        Self::with_creator(Arc::new(creator), configuration)
    }

    pub fn with_creator(creator: ModelCreator<M>, configuration: AnalysisConfiguration) -> Result<Self> {
        configuration.validate()?;
        let pool = ThreadPoolBuilder::new()
            .num_threads(configuration.cpu_count)
            .thread_name(|index| format!("traversal-worker-{}", index))
            .build()?;
        Ok(Self {
            creator,
            configuration,
            pool,
            activations: None,
            modifiers: Vec::new(),
        })
    }

    pub fn configuration(&self) -> &AnalysisConfiguration {
        &self.configuration
    }

    pub fn creator(&self) -> &ModelCreator<M> {
        &self.creator
    }

    /// Fault declarations of the model.
    pub fn faults(&self) -> Vec<Fault> {
        (self.creator)().faults()
    }

    /// Overrides the activation of every fault; `None` uses the declared activations.
    pub fn set_activations(&mut self, activations: Option<Vec<Activation>>) {
        self.activations = activations;
    }

    /// Replaces the modifiers that run before the built-in ones.
    pub fn set_modifiers(&mut self, modifiers: Vec<ModifierFactory>) {
        self.modifiers = modifiers;
    }

    /// Checks that `invariant` holds in every reachable state.
    pub fn check_invariant(&self, invariant: &Formula) -> Result<AnalysisResult> {
        let start = Instant::now();
        let mut traversal = self.traverse(TraversalMode::Invariant, &[], Some(invariant))?;

        let counter_example = match traversal.violation {
            Some(target) if self.configuration.generate_counterexample => {
                Some(self.reconstruct_counter_example(&mut traversal, target)?)
            }
            _ => None,
        };

        let result = AnalysisResult {
            formula_holds: traversal.violation.is_none(),
            counter_example,
            state_count: traversal.storage.len(),
            transition_count: traversal.transition_count(),
            computed_transition_count: traversal.computed_transition_count(),
            level_count: traversal.level_count,
        };
        info!(
            "Checked '{}' in {:?}: {} ({} states, {} transitions, {} levels)",
            invariant,
            start.elapsed(),
            if result.formula_holds { "holds" } else { "violated" },
            result.state_count,
            result.transition_count,
            result.level_count
        );
        Ok(result)
    }

    /// Builds the labeled reachability graph.
    pub fn generate_state_graph(&self, formulas: &[Formula]) -> Result<StateGraph> {
        let start = Instant::now();
        let traversal = self.traverse(TraversalMode::StateGraph, formulas, None)?;
        let fragments = traversal
            .workers
            .into_iter()
            .map(|worker| worker.graph)
            .collect();
        let graph = StateGraph::from_fragments(traversal.storage.len(), fragments, traversal.labels.names());
        info!(
            "Generated state graph in {:?}: {} states, {} transitions",
            start.elapsed(),
            graph.state_count(),
            graph.transition_count()
        );
        Ok(graph)
    }

    /// Builds the LTMDP of the model, preserving the nesting of choices within steps.
    pub fn generate_ltmdp(&self, formulas: &[Formula]) -> Result<Ltmdp> {
        let start = Instant::now();
        let traversal = self.traverse(TraversalMode::Ltmdp, formulas, None)?;
        let state_count = traversal.storage.len();
        let fragments = traversal
            .workers
            .into_iter()
            .map(|worker| worker.ltmdp)
            .collect();
        let ltmdp = Ltmdp::from_fragments(state_count, fragments, traversal.labels);
        info!(
            "Generated LTMDP in {:?}: {} states, {} continuation elements",
            start.elapsed(),
            ltmdp.state_count(),
            ltmdp.element_count()
        );
        Ok(ltmdp)
    }

    fn create_modifiers(
        &self,
        labels: &Arc<FormulaLabels>,
        observed: &[StateEvaluator],
        invariant: Option<&StateEvaluator>,
    ) -> Vec<Box<dyn TransitionModifier>> {
        let mut modifiers: Vec<Box<dyn TransitionModifier>> = self.modifiers.iter().map(|factory| factory()).collect();
        if !observed.is_empty() {
            modifiers.push(Box::new(ObserveFormulasModifier::new(
                Arc::clone(labels),
                observed.to_vec(),
            )));
        }
        if let Some(invariant) = invariant {
            let invariant = Arc::clone(invariant);
            modifiers.push(Box::new(EarlyTerminationModifier::new(Arc::new(move |formulas| {
                !invariant(formulas)
            }))));
        }

        let mut offset = 0;
        for modifier in &mut modifiers {
            modifier.set_extra_bytes_offset(offset);
            offset += modifier.extra_bytes();
        }
        modifiers
    }

    fn traverse(&self, mode: TraversalMode, formulas: &[Formula], invariant: Option<&Formula>) -> Result<Traversal<M>> {
        let configuration = &self.configuration;

        let mut all_formulas = (self.creator)().formulas();
        all_formulas.extend(formulas.iter().cloned());
        all_formulas.extend(invariant.cloned());
        let labels = Arc::new(FormulaLabels::new(all_formulas.iter())?);
        let invariant = invariant.map(|formula| labels.compile(formula)).transpose()?;
        let observed = labels
            .once_operands()
            .iter()
            .map(|operand| labels.compile(operand))
            .collect::<Result<Vec<_>>>()?;

        let mut workers = Vec::with_capacity(configuration.cpu_count);
        let mut header_bytes = 0;
        for _ in 0..configuration.cpu_count {
            let modifiers = self.create_modifiers(&labels, &observed, invariant.as_ref());
            header_bytes = modifiers.iter().map(|modifier| modifier.extra_bytes()).sum();
            let mut model = AnalysisModel::new((self.creator)(), header_bytes, Arc::clone(&labels))?;
            if let Some(activations) = &self.activations {
                model.set_activations(activations);
            }
            model.set_forward_optimization(configuration.enable_forward_optimization);
            workers.push(Worker::new(model, configuration.successor_capacity, modifiers));
        }

        let state_size = workers[0].model.state_size();
        let storage = StateStorage::new(state_size, configuration.state_capacity);
        let balancer = LoadBalancer::new();
        let shared = Shared::new(
            &storage,
            &balancer,
            mode,
            configuration.allow_terminal_states,
            configuration.transition_capacity,
        );
        debug!(
            "Traversing with {} workers, state size {} ({} header bytes), {} labels",
            workers.len(),
            state_size,
            header_bytes,
            labels.len()
        );

        workers[0].process_initial(&shared)?;
        if !balancer.is_terminated() {
            self.pool.scope(|scope| {
                for worker in workers.iter_mut() {
                    let shared = &shared;
                    scope.spawn(move |_| worker.run(shared));
                }
            });
        }
        if let Some(error) = balancer.take_error() {
            return Err(error);
        }

        let violation = shared.violation();
        let level_count = shared.level_count();
        drop(shared);
        Ok(Traversal {
            storage,
            workers,
            labels,
            header_bytes,
            violation,
            level_count,
        })
    }

    /// Recovers the choices leading from an initial state to `target`.
    fn reconstruct_counter_example(&self, traversal: &mut Traversal<M>, target: u32) -> Result<CounterExample> {
        let storage = &traversal.storage;
        let worker = &mut traversal.workers[0];
        let mut buffer =
            TransitionBuffer::new(worker.model.state_size(), self.configuration.successor_capacity).with_choice_recording();

        let path = storage.path_to(target);
        let mut steps = Vec::with_capacity(path.len());
        let mut source: Option<u32> = None;
        for &state in &path {
            worker.compute(source.map(|source| storage.get(source)), &mut buffer)?;
            let expected = storage.get(state);
            let index = (0..buffer.len())
                .find(|&index| buffer.transition(index).is_valid && buffer.target(index) == expected)
                .ok_or(Error::ReplayDiverged { step: steps.len() })?;
            steps.push(CounterExampleStep {
                state: expected.to_vec(),
                choices: buffer.choices(index).map(<[usize]>::to_vec).unwrap_or_default(),
            });
            source = Some(state);
        }

        debug!("Reconstructed counterexample with {} steps", steps.len());
        Ok(CounterExample {
            fault_names: worker.model.faults().iter().map(|fault| fault.name().to_string()).collect(),
            activations: worker.model.activations(),
            header_bytes: traversal.header_bytes,
            steps,
        })
    }
}
