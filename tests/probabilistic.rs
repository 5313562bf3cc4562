use dcca_rs::checker::ProbabilityChecker;
use dcca_rs::config::AnalysisConfiguration;
use dcca_rs::error::Result;
use dcca_rs::fault::Fault;
use dcca_rs::formula::{Formula, Objective};
use dcca_rs::ltmdp::ContinuationKind;
use dcca_rs::model::{ExecutableModel, ExecutionContext};
use dcca_rs::traverser::ModelTraverser;
use test_log::test;

const GOAL: u8 = 3;

/// A fair random walk on `0..=GOAL` starting at 1; both ends absorb.
///
/// The `Slip` fault moves the walker towards 0 instead of tossing the coin.
struct RandomWalk {
    position: u8,
    slip_probability: Option<f64>,
}

impl RandomWalk {
    fn new() -> Self {
        Self {
            position: 1,
            slip_probability: None,
        }
    }
}

impl ExecutableModel for RandomWalk {
    fn state_size(&self) -> usize {
        1
    }
    fn write_state(&self, state: &mut [u8]) {
        state[0] = self.position;
    }
    fn read_state(&mut self, state: &[u8]) {
        self.position = state[0];
    }
    fn faults(&self) -> Vec<Fault> {
        let slip = Fault::transient(0, "Slip");
        vec![match self.slip_probability {
            Some(probability) => slip.with_probability(probability),
            None => slip,
        }]
    }
    fn execute_initial_step(&mut self, _context: &mut ExecutionContext<'_>) -> Result<()> {
        Ok(())
    }
    fn execute_step(&mut self, context: &mut ExecutionContext<'_>) -> Result<()> {
        if self.position == 0 || self.position == GOAL {
            return Ok(());
        }
        if context.try_activate(0) {
            self.position -= 1;
        } else {
            let delta = *context.choose_with_probabilities(&[(1i8, 0.5), (-1i8, 0.5)]).unwrap_or(&0);
            self.position = self.position.wrapping_add_signed(delta);
        }
        Ok(())
    }
}

fn goal() -> Formula {
    Formula::atomic("goal", |state| state[0] == GOAL)
}

fn assert_close(actual: f64, expected: f64) {
    assert!((actual - expected).abs() < 1e-6, "{} != {}", actual, expected);
}

fn configuration() -> AnalysisConfiguration {
    AnalysisConfiguration::default().with_cpu_count(2)
}

#[test]
fn test_ltmdp_conserves_probability() {
    let traverser = ModelTraverser::new(RandomWalk::new, configuration()).unwrap();
    let ltmdp = traverser.generate_ltmdp(&[goal()]).unwrap();

    assert_eq!(ltmdp.state_count(), 4);
    ltmdp.validate().unwrap();

    // The fault decision is nondeterministic, the coin toss below it probabilistic.
    let kinds: Vec<ContinuationKind> = (0..ltmdp.element_count() as u32)
        .map(|index| ltmdp.element(index).kind)
        .collect();
    assert!(kinds.contains(&ContinuationKind::Nondeterministic));
    assert!(kinds.contains(&ContinuationKind::Probabilistic));
}

#[test]
fn test_mdp_distributions_sum_to_one() {
    let traverser = ModelTraverser::new(RandomWalk::new, configuration()).unwrap();
    let mdp = traverser.generate_ltmdp(&[goal()]).unwrap().to_mdp(1 << 10).unwrap();

    assert_eq!(mdp.state_count(), 4);
    for state in 0..mdp.state_count() as u32 {
        for distribution in mdp.distributions(state) {
            let sum: f64 = mdp.transitions(distribution).map(|(_, probability)| probability).sum();
            assert_close(sum, 1.0);
        }
    }
}

#[test]
fn test_reachability_with_nondeterministic_fault() {
    let traverser = ModelTraverser::new(RandomWalk::new, configuration()).unwrap();
    let mdp = traverser.generate_ltmdp(&[goal()]).unwrap().to_mdp(1 << 10).unwrap();
    let checker = ProbabilityChecker::new(&mdp);

    // Gambler's ruin: from 1 of 3, the fair walk reaches 3 with probability 1/3.
    let max = Formula::probability(Objective::Maximum, Formula::finally(goal()));
    assert_close(checker.calculate_probability(&max).unwrap(), 1.0 / 3.0);

    // Slipping in every step never reaches the goal.
    let min = Formula::probability(Objective::Minimum, Formula::finally(goal()));
    assert_close(checker.calculate_probability(&min).unwrap(), 0.0);

    // Two upward tosses in a row.
    let bounded = Formula::probability(Objective::Maximum, Formula::bounded_finally(goal(), 2));
    assert_close(checker.calculate_probability(&bounded).unwrap(), 0.25);
}

#[test]
fn test_reachability_with_probabilistic_fault() {
    let traverser = ModelTraverser::new(
        || RandomWalk {
            position: 1,
            slip_probability: Some(0.5),
        },
        configuration(),
    )
    .unwrap();
    let ltmdp = traverser.generate_ltmdp(&[goal()]).unwrap();
    ltmdp.validate().unwrap();
    let mdp = ltmdp.to_mdp(1 << 10).unwrap();
    let checker = ProbabilityChecker::new(&mdp);

    // Every step moves up with probability 1/4 and down with 3/4:
    // p1 = p2 / 4, p2 = 1/4 + 3 p1 / 4, hence p1 = 1/13.
    for objective in [Objective::Minimum, Objective::Maximum] {
        let formula = Formula::probability(objective, Formula::finally(goal()));
        assert_close(checker.calculate_probability(&formula).unwrap(), 1.0 / 13.0);
    }
}
