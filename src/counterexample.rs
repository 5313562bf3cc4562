//! Counterexamples: runs of a model leading into a violating state.
//!
//! A counterexample stores, for every step, the reached state vector and the
//! choices that produced it. Replaying the choices on a fresh model instance
//! must reproduce the same states, which makes counterexamples portable: they
//! can be saved as JSON and checked again later.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::sync::Arc;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::fault::Activation;
use crate::formula::FormulaLabels;
use crate::model::{AnalysisModel, ExecutableModel};
use crate::transition::TransitionBuffer;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterExampleStep {
    /// Full state vector reached by this step.
    pub state: Vec<u8>,
    /// Choices taken during the step.
    pub choices: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterExample {
    pub fault_names: Vec<String>,
    /// Fault activations the run was generated with.
    pub activations: Vec<Activation>,
    /// Number of modifier header bytes at the start of every state vector.
    pub header_bytes: usize,
    /// The first step leaves the initial state.
    pub steps: Vec<CounterExampleStep>,
}

impl CounterExample {
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// The violating state.
    pub fn last_state(&self) -> Option<&[u8]> {
        self.steps.last().map(|step| step.state.as_slice())
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    /// Re-executes the recorded choices on `model` and checks that every step reaches the recorded state.
    ///
    /// Header bytes are maintained by transition modifiers and are not compared.
    pub fn replay<M: ExecutableModel>(&self, model: M) -> Result<()> {
        let mut model = AnalysisModel::new(model, self.header_bytes, Arc::new(FormulaLabels::default()))?;
        if model.faults().len() != self.activations.len() {
            return Err(Error::model(format!(
                "Counterexample was generated for {} faults, model declares {}",
                self.activations.len(),
                model.faults().len()
            )));
        }
        model.set_activations(&self.activations);

        let mut buffer = TransitionBuffer::new(model.state_size(), 1);
        let mut source: Option<&[u8]> = None;
        for (index, step) in self.steps.iter().enumerate() {
            match model.replay(source, &step.choices, &mut buffer) {
                Ok(()) => {}
                Err(Error::Nondeterminism { .. }) => return Err(Error::ReplayDiverged { step: index }),
                Err(error) => return Err(error),
            }
            let replayed = buffer.target(0);
            if replayed.len() != step.state.len() || replayed[self.header_bytes..] != step.state[self.header_bytes..] {
                return Err(Error::ReplayDiverged { step: index });
            }
            source = Some(step.state.as_slice());
        }
        debug!("Replayed counterexample with {} steps", self.steps.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::fault::Fault;
    use crate::model::ExecutionContext;

    /// Adds a chosen amount each step; a fault doubles the amount.
    struct Accumulator {
        value: u8,
    }

    impl ExecutableModel for Accumulator {
        fn state_size(&self) -> usize {
            1
        }
        fn write_state(&self, state: &mut [u8]) {
            state[0] = self.value;
        }
        fn read_state(&mut self, state: &[u8]) {
            self.value = state[0];
        }
        fn faults(&self) -> Vec<Fault> {
            vec![Fault::transient(0, "Double")]
        }
        fn execute_initial_step(&mut self, _context: &mut ExecutionContext<'_>) -> Result<()> {
            Ok(())
        }
        fn execute_step(&mut self, context: &mut ExecutionContext<'_>) -> Result<()> {
            let mut amount = *context.choose(&[1u8, 2, 3]).unwrap_or(&0);
            if context.try_activate(0) {
                amount *= 2;
            }
            self.value = self.value.wrapping_add(amount);
            Ok(())
        }
    }

    fn counter_example() -> CounterExample {
        CounterExample {
            fault_names: vec!["Double".into()],
            activations: vec![Activation::Nondeterministic],
            header_bytes: 1,
            steps: vec![
                CounterExampleStep {
                    state: vec![0, 0],
                    choices: vec![],
                },
                CounterExampleStep {
                    state: vec![9, 2],
                    choices: vec![1, 0],
                },
                CounterExampleStep {
                    state: vec![9, 8],
                    choices: vec![2, 1],
                },
            ],
        }
    }

    #[test]
    fn test_replay() {
        let counter_example = counter_example();
        counter_example.replay(Accumulator { value: 0 }).unwrap();
        assert_eq!(counter_example.last_state(), Some(&[9u8, 8][..]));
    }

    #[test]
    fn test_replay_detects_divergence() {
        let mut counter_example = counter_example();
        counter_example.steps[2].state = vec![0, 9];
        assert!(matches!(
            counter_example.replay(Accumulator { value: 0 }),
            Err(Error::ReplayDiverged { step: 2 })
        ));

        let mut counter_example = self::counter_example();
        counter_example.steps[1].choices = vec![1];
        assert!(matches!(
            counter_example.replay(Accumulator { value: 0 }),
            Err(Error::ReplayDiverged { step: 1 })
        ));
    }

    #[test]
    fn test_json_round_trip() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("counterexample.json");
        let counter_example = counter_example();
        counter_example.save(&path).unwrap();
        assert_eq!(CounterExample::load(&path).unwrap(), counter_example);
    }
}
