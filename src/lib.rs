//! # dcca-rs: Explicit-State Model Checking and Safety Analysis
//!
//! **`dcca-rs`** explores the complete reachable state space of discrete systems with injectable
//! faults. It checks invariants, builds labeled state graphs and Markov decision processes, and
//! performs **Deductive Cause-Consequence Analysis (DCCA)**: the search for the minimal sets of
//! faults whose activation can cause a hazard.
//!
//! ## How it works
//!
//! States are never given up front. A model is a plain Rust value implementing
//! [`ExecutableModel`][crate::model::ExecutableModel]: it serializes itself into a fixed number of
//! bytes and performs one step at a time. Every decision of a step, including whether a fault is
//! activated, goes through the [`ExecutionContext`][crate::model::ExecutionContext]. The
//! analysis re-executes the step once for every combination of decisions and thereby discovers all
//! successors of a state.
//!
//! - **Parallel**: a fixed pool of workers, each with a private model instance, drains a shared
//!   frontier. The set of reachable states and every verdict are independent of the thread count.
//! - **Bounded**: all storage is pre-sized. Exceeding a capacity is reported as an
//!   [`Error::CapacityExceeded`][crate::error::Error::CapacityExceeded] with a hint which capacity
//!   to raise.
//! - **Probabilistic**: probabilistic and nondeterministic choices are preserved in an
//!   [`Ltmdp`][crate::ltmdp::Ltmdp], which can be flattened into an [`Mdp`][crate::mdp::Mdp] and
//!   checked with the [`ProbabilityChecker`][crate::checker::ProbabilityChecker].
//!
//! ## Basic Usage
//!
//! ```rust
//! use dcca_rs::config::AnalysisConfiguration;
//! use dcca_rs::error::Result;
//! use dcca_rs::fault::Fault;
//! use dcca_rs::formula::Formula;
//! use dcca_rs::model::{ExecutableModel, ExecutionContext};
//! use dcca_rs::safety_analysis::SafetyAnalysis;
//! use dcca_rs::traverser::ModelTraverser;
//!
//! /// A counter that a fault may push past its limit.
//! struct Counter {
//!     value: u8,
//! }
//!
//! impl ExecutableModel for Counter {
//!     fn state_size(&self) -> usize {
//!         1
//!     }
//!     fn write_state(&self, state: &mut [u8]) {
//!         state[0] = self.value;
//!     }
//!     fn read_state(&mut self, state: &[u8]) {
//!         self.value = state[0];
//!     }
//!     fn faults(&self) -> Vec<Fault> {
//!         vec![Fault::transient(0, "Overflow")]
//!     }
//!     fn execute_initial_step(&mut self, _context: &mut ExecutionContext<'_>) -> Result<()> {
//!         Ok(())
//!     }
//!     fn execute_step(&mut self, context: &mut ExecutionContext<'_>) -> Result<()> {
//!         let limit = if context.try_activate(0) { 10 } else { 5 };
//!         self.value = (self.value + 1).min(limit);
//!         Ok(())
//!     }
//! }
//!
//! # fn main() -> Result<()> {
//! let configuration = AnalysisConfiguration::default().with_cpu_count(2);
//! let hazard = Formula::atomic("value > 5", |state| state[0] > 5);
//!
//! // Without faults, the counter stays within its limit.
//! let mut traverser = ModelTraverser::new(|| Counter { value: 0 }, configuration.clone())?;
//! traverser.set_activations(Some(vec![dcca_rs::fault::Activation::Suppressed]));
//! let result = traverser.check_invariant(&hazard.clone().not())?;
//! assert!(result.formula_holds);
//! assert_eq!(result.state_count, 6);
//!
//! // The overflow fault alone can cause the hazard.
//! let result = SafetyAnalysis::new(configuration).compute(|| Counter { value: 0 }, &hazard)?;
//! assert_eq!(result.minimal_critical_sets.len(), 1);
//! # Ok(())
//! # }
//! ```
//!
//! ## Core Components
//!
//! - **[`model`]**: the stepping interface and the state vector layout.
//! - **[`traverser`]**: invariant checking, state graph and LTMDP generation.
//! - **[`safety_analysis`]**: DCCA, guided by the [`heuristics`].
//! - **[`order_analysis`]**: whether the faults of a critical set must occur in a certain order.
//! - **[`checker`]**: minimal and maximal probabilities and rewards on an [`mdp::Mdp`].

pub mod bitset;
pub mod checker;
pub mod choice;
pub mod config;
pub mod counterexample;
pub mod effects;
pub mod error;
pub mod fault;
pub mod fault_set;
pub mod formula;
pub mod graph;
pub mod heuristics;
pub mod load_balancer;
pub mod ltmdp;
pub mod mdp;
pub mod model;
pub mod modifiers;
pub mod order_analysis;
pub mod safety_analysis;
pub mod step_graph;
pub mod storage;
pub mod transition;
pub mod traverser;
mod worker;
