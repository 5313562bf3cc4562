//! Analysis configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// How DCCA activates the faults of the set under check.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum FaultActivationBehavior {
    /// Faults of the set are forced whenever they are activatable.
    ForceOnly,
    /// Forced first; if the set appears safe, checked again with nondeterministic activation.
    #[default]
    ForceThenFallback,
    /// Faults of the set are activated nondeterministically.
    Nondeterministic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfiguration {
    /// Number of worker threads.
    pub cpu_count: usize,
    /// Maximal number of distinct states.
    pub state_capacity: usize,
    /// Maximal number of candidate transitions of a single step.
    pub successor_capacity: usize,
    /// Maximal number of stored transitions or continuation elements.
    pub transition_capacity: usize,
    pub generate_counterexample: bool,
    /// Merge untaken fault activations that a model declares inert.
    pub enable_forward_optimization: bool,
    pub allow_terminal_states: bool,
    pub fault_activation_behavior: FaultActivationBehavior,
    /// Largest fault set checked by DCCA; `None` checks all cardinalities.
    pub max_critical_set_cardinality: Option<usize>,
    pub stop_on_first_exception: bool,
}

impl Default for AnalysisConfiguration {
    fn default() -> Self {
        Self {
            cpu_count: std::thread::available_parallelism().map_or(1, |n| n.get()),
            state_capacity: 1 << 20,
            successor_capacity: 1 << 14,
            transition_capacity: 1 << 22,
            generate_counterexample: true,
            enable_forward_optimization: true,
            allow_terminal_states: false,
            fault_activation_behavior: FaultActivationBehavior::default(),
            max_critical_set_cardinality: None,
            stop_on_first_exception: false,
        }
    }
}

impl AnalysisConfiguration {
    /// Reads a configuration from a JSON file; missing fields take their default values.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects settings that leave no room for workers, states or successors.
    pub fn validate(&self) -> Result<()> {
        if self.cpu_count == 0 {
            return Err(Error::InvalidConfiguration("cpu_count must be positive".to_string()));
        }
        if self.state_capacity == 0 || self.state_capacity >= u32::MAX as usize {
            return Err(Error::InvalidConfiguration(format!(
                "state_capacity must be in 1..{}, got {}",
                u32::MAX,
                self.state_capacity
            )));
        }
        if self.successor_capacity == 0 {
            return Err(Error::InvalidConfiguration("successor_capacity must be positive".to_string()));
        }
        Ok(())
    }

    pub fn with_cpu_count(mut self, cpu_count: usize) -> Self {
        assert!(cpu_count > 0, "At least one worker is required");
        self.cpu_count = cpu_count;
        self
    }

    pub fn with_state_capacity(mut self, capacity: usize) -> Self {
        self.state_capacity = capacity;
        self
    }

    pub fn with_successor_capacity(mut self, capacity: usize) -> Self {
        self.successor_capacity = capacity;
        self
    }

    pub fn with_transition_capacity(mut self, capacity: usize) -> Self {
        self.transition_capacity = capacity;
        self
    }

    pub fn with_counterexample(mut self, enabled: bool) -> Self {
        self.generate_counterexample = enabled;
        self
    }

    pub fn with_forward_optimization(mut self, enabled: bool) -> Self {
        self.enable_forward_optimization = enabled;
        self
    }

    pub fn with_terminal_states(mut self, allowed: bool) -> Self {
        self.allow_terminal_states = allowed;
        self
    }

    pub fn with_fault_activation_behavior(mut self, behavior: FaultActivationBehavior) -> Self {
        self.fault_activation_behavior = behavior;
        self
    }

    pub fn with_max_critical_set_cardinality(mut self, cardinality: Option<usize>) -> Self {
        self.max_critical_set_cardinality = cardinality;
        self
    }

    pub fn with_stop_on_first_exception(mut self, stop: bool) -> Self {
        self.stop_on_first_exception = stop;
        self
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use test_log::test;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = AnalysisConfiguration::default();
        assert!(config.cpu_count >= 1);
        assert_eq!(config.state_capacity, 1 << 20);
        assert_eq!(config.fault_activation_behavior, FaultActivationBehavior::ForceThenFallback);
        assert!(config.generate_counterexample);
        assert_eq!(config.max_critical_set_cardinality, None);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "cpu_count": 2, "fault_activation_behavior": "ForceOnly", "max_critical_set_cardinality": 3 }}"#
        )
        .unwrap();

        let config = AnalysisConfiguration::from_json_file(file.path()).unwrap();
        assert_eq!(config.cpu_count, 2);
        assert_eq!(config.fault_activation_behavior, FaultActivationBehavior::ForceOnly);
        assert_eq!(config.max_critical_set_cardinality, Some(3));
        assert_eq!(config.successor_capacity, 1 << 14);
    }

    #[test]
    fn test_builders() {
        let config = AnalysisConfiguration::default()
            .with_cpu_count(3)
            .with_state_capacity(10)
            .with_terminal_states(true)
            .with_stop_on_first_exception(true);
        assert_eq!(config.cpu_count, 3);
        assert_eq!(config.state_capacity, 10);
        assert!(config.allow_terminal_states);
        assert!(config.stop_on_first_exception);
    }

    #[test]
    fn test_json_without_workers_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "cpu_count": 0 }}"#).unwrap();

        match AnalysisConfiguration::from_json_file(file.path()) {
            Err(Error::InvalidConfiguration(message)) => assert!(message.contains("cpu_count")),
            other => panic!("Unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_validate() {
        assert!(AnalysisConfiguration::default().validate().is_ok());
        let config = AnalysisConfiguration::default();
        assert!(config.clone().with_state_capacity(0).validate().is_err());
        assert!(config.clone().with_successor_capacity(0).validate().is_err());
        assert!(config.with_state_capacity(u32::MAX as usize).validate().is_err());
    }
}
