//! Priority-ordered fault effects.
//!
//! Faults change the behavior of model components. An [`EffectTable`] maps a
//! component to the effects that faults install on it, each with a priority.
//! When a component executes, [`EffectTable::resolve`] asks the faults of the
//! highest priority group first and returns the effect of the activated one;
//! lower groups are only consulted when no fault of a higher group is active.
//!
//! Two faults of the same group being active at the same time is ambiguous and
//! reported as [`Error::AmbiguousFaultEffect`].

use rustc_hash::FxHashMap;

use crate::error::{Error, Result};
use crate::fault::Fault;
use crate::model::ExecutionContext;

#[derive(Debug, Clone)]
struct Effect<E> {
    fault: usize,
    fault_name: String,
    priority: i32,
    effect: E,
}

#[derive(Debug, Clone)]
pub struct EffectTable<E> {
    components: FxHashMap<String, Vec<Effect<E>>>,
}

impl<E> Default for EffectTable<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> EffectTable<E> {
    pub fn new() -> Self {
        Self {
            components: FxHashMap::default(),
        }
    }

    /// Installs `effect` on `component`, active whenever `fault` is activated.
    pub fn register(&mut self, component: &str, fault: &Fault, priority: i32, effect: E) {
        let effects = self.components.entry(component.to_string()).or_default();
        // Stable: equal priorities keep registration order.
        let position = effects.partition_point(|other| other.priority >= priority);
        effects.insert(
            position,
            Effect {
                fault: fault.identifier(),
                fault_name: fault.name().to_string(),
                priority,
                effect,
            },
        );
    }

    /// Number of effects installed on `component`.
    pub fn effect_count(&self, component: &str) -> usize {
        self.components.get(component).map_or(0, Vec::len)
    }

    /// Returns the effect that overrides `component` in the current step, if any.
    ///
    /// Every fault of a priority group is asked for its activation before the
    /// group is decided, so all combinations within the group are explored.
    pub fn resolve(&self, component: &str, context: &mut ExecutionContext<'_>) -> Result<Option<&E>> {
        let Some(effects) = self.components.get(component) else {
            return Ok(None);
        };

        for group in effects.chunk_by(|a, b| a.priority == b.priority) {
            let mut active: Option<&Effect<E>> = None;
            for effect in group {
                if !context.try_activate(effect.fault) {
                    continue;
                }
                if let Some(first) = active {
                    return Err(Error::AmbiguousFaultEffect {
                        component: component.to_string(),
                        first: first.fault_name.clone(),
                        second: effect.fault_name.clone(),
                        priority: effect.priority,
                    });
                }
                active = Some(effect);
            }
            if let Some(effect) = active {
                return Ok(Some(&effect.effect));
            }
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::choice::ChoiceResolver;
    use crate::fault::{Activation, FaultRuntime};

    #[derive(Debug, Copy, Clone, Eq, PartialEq)]
    enum Output {
        Stuck,
        Off,
        Inverted,
    }

    fn faults() -> Vec<Fault> {
        vec![
            Fault::transient(0, "Stuck"),
            Fault::transient(1, "Off"),
            Fault::transient(2, "Inverted"),
        ]
    }

    /// Collects the resolution outcome of every path.
    fn outcomes(table: &EffectTable<Output>, faults: &[Fault]) -> Vec<Result<Option<Output>, String>> {
        let mut runtime = FaultRuntime::new(faults).unwrap();
        let mut resolver = ChoiceResolver::new();
        resolver.prepare_next_state();
        let mut outcomes = Vec::new();
        while resolver.prepare_next_path().unwrap() {
            runtime.reset();
            let mut context = ExecutionContext::new(&mut resolver, &mut runtime);
            let outcome = table
                .resolve("sensor", &mut context)
                .map(|effect| effect.copied())
                .map_err(|error| error.to_string());
            outcomes.push(outcome);
        }
        outcomes
    }

    #[test]
    fn test_higher_priority_wins() {
        let faults = faults();
        let mut table = EffectTable::new();
        table.register("sensor", &faults[1], 1, Output::Off);
        table.register("sensor", &faults[0], 5, Output::Stuck);
        assert_eq!(table.effect_count("sensor"), 2);

        // Stuck is asked first; Off only when Stuck is not active.
        assert_eq!(
            outcomes(&table, &faults),
            vec![Ok(None), Ok(Some(Output::Off)), Ok(Some(Output::Stuck))]
        );
    }

    #[test]
    fn test_equal_priority_is_ambiguous() {
        let faults = faults();
        let mut table = EffectTable::new();
        table.register("sensor", &faults[0], 1, Output::Stuck);
        table.register("sensor", &faults[2], 1, Output::Inverted);

        let outcomes = outcomes(&table, &faults);
        assert_eq!(outcomes.len(), 4);
        assert_eq!(outcomes[0], Ok(None));
        assert_eq!(outcomes[1], Ok(Some(Output::Inverted)));
        assert_eq!(outcomes[2], Ok(Some(Output::Stuck)));
        let error = outcomes[3].as_ref().unwrap_err();
        assert!(error.contains("'Stuck' and 'Inverted'"), "{}", error);
    }

    #[test]
    fn test_suppressed_fault_has_no_effect() {
        let faults = vec![
            Fault::transient(0, "Stuck").with_activation(Activation::Suppressed),
            Fault::transient(1, "Off"),
            Fault::transient(2, "Inverted"),
        ];
        let mut table = EffectTable::new();
        table.register("sensor", &faults[0], 2, Output::Stuck);
        table.register("sensor", &faults[1], 1, Output::Off);

        assert_eq!(
            outcomes(&table, &faults),
            vec![Ok(None), Ok(Some(Output::Off))]
        );
    }

    #[test]
    fn test_unknown_component() {
        let table = EffectTable::<Output>::new();
        assert_eq!(outcomes(&table, &faults()), vec![Ok(None)]);
    }
}
