//! The classic pressure tank case study.
//!
//! A controller fills a tank using a pump. A pressure sensor reports when the
//! tank is full or empty; a timer stops the pump as a backup when the sensor
//! fails to report a full tank. The hazard is a ruptured tank.
//!
//! Run with:
//! ```bash
//! cargo run --example pressure_tank -- --limit 12 --sensor 10 --timeout 11
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use log::info;

use dcca_rs::checker::ProbabilityChecker;
use dcca_rs::config::AnalysisConfiguration;
use dcca_rs::effects::EffectTable;
use dcca_rs::error::Result;
use dcca_rs::fault::Fault;
use dcca_rs::formula::{Formula, Objective};
use dcca_rs::heuristics::{MaximalSafeSetHeuristic, SubsumptionHeuristic};
use dcca_rs::model::{ExecutableModel, ExecutionContext};
use dcca_rs::order_analysis::OrderAnalysis;
use dcca_rs::safety_analysis::SafetyAnalysis;
use dcca_rs::traverser::ModelTraverser;

#[derive(Debug, Parser)]
#[command(author, version)]
struct Cli {
    /// Pressure at which the tank ruptures.
    #[clap(long, value_name = "INT", default_value = "12")]
    limit: u8,

    /// Pressure at which the sensor reports a full tank.
    #[clap(long, value_name = "INT", default_value = "10")]
    sensor: u8,

    /// Number of steps after which the timer stops the pump.
    #[clap(long, value_name = "INT", default_value = "11")]
    timeout: u8,

    /// Number of worker threads (all cores by default).
    #[clap(long, value_name = "INT")]
    threads: Option<usize>,

    /// Analysis configuration in JSON.
    #[clap(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Save the counterexample of the unconstrained hazard check to this file.
    #[clap(long, value_name = "FILE")]
    counterexample: Option<PathBuf>,

    /// Probability of every fault per step.
    #[clap(long, value_name = "FLOAT", default_value = "0.001")]
    fault_probability: f64,

    /// Number of steps considered when computing the hazard probability.
    #[clap(long, value_name = "INT", default_value = "50")]
    steps: usize,
}

const SENSOR_SUPPRESS_IS_FULL: usize = 0;
const SENSOR_SUPPRESS_IS_EMPTY: usize = 1;
const PUMP_SUPPRESS_PUMPING: usize = 2;
const TIMER_SUPPRESS_TIMEOUT: usize = 3;

/// What a fault does to its component.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Override {
    /// The sensor output stays false.
    Silent,
    /// The pump does not run although enabled.
    Idle,
    /// The timer never reports the timeout.
    NeverElapses,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Controller {
    Inactive = 0,
    Filling = 1,
    StoppedBySensor = 2,
    StoppedByTimer = 3,
}

impl Controller {
    fn from_byte(byte: u8) -> Self {
        match byte {
            1 => Controller::Filling,
            2 => Controller::StoppedBySensor,
            3 => Controller::StoppedByTimer,
            _ => Controller::Inactive,
        }
    }
}

#[derive(Debug, Copy, Clone)]
struct Parameters {
    limit: u8,
    sensor: u8,
    timeout: u8,
}

struct PressureTank {
    parameters: Parameters,
    fault_probability: Option<f64>,
    effects: Arc<EffectTable<Override>>,
    pressure: u8,
    controller: Controller,
    pump_enabled: bool,
    timer_active: bool,
    remaining: u8,
}

fn declare_faults(fault_probability: Option<f64>) -> Vec<Fault> {
    let faults = vec![
        Fault::transient(SENSOR_SUPPRESS_IS_FULL, "SensorSuppressIsFull"),
        Fault::transient(SENSOR_SUPPRESS_IS_EMPTY, "SensorSuppressIsEmpty"),
        Fault::transient(PUMP_SUPPRESS_PUMPING, "PumpSuppressPumping"),
        Fault::transient(TIMER_SUPPRESS_TIMEOUT, "TimerSuppressTimeout"),
    ];
    match fault_probability {
        Some(probability) => faults.into_iter().map(|fault| fault.with_probability(probability)).collect(),
        None => faults,
    }
}

impl PressureTank {
    fn new(parameters: Parameters, fault_probability: Option<f64>) -> Self {
        let faults = declare_faults(fault_probability);
        let mut effects = EffectTable::new();
        effects.register("sensor.is_full", &faults[SENSOR_SUPPRESS_IS_FULL], 0, Override::Silent);
        effects.register("sensor.is_empty", &faults[SENSOR_SUPPRESS_IS_EMPTY], 0, Override::Silent);
        effects.register("pump", &faults[PUMP_SUPPRESS_PUMPING], 0, Override::Idle);
        effects.register("timer", &faults[TIMER_SUPPRESS_TIMEOUT], 0, Override::NeverElapses);
        Self {
            parameters,
            fault_probability,
            effects: Arc::new(effects),
            pressure: 0,
            controller: Controller::Inactive,
            pump_enabled: false,
            timer_active: false,
            remaining: 0,
        }
    }

    fn overridden(&self, component: &str, context: &mut ExecutionContext<'_>) -> Result<bool> {
        Ok(self.effects.resolve(component, context)?.is_some())
    }
}

impl ExecutableModel for PressureTank {
    fn state_size(&self) -> usize {
        5
    }

    fn write_state(&self, state: &mut [u8]) {
        state[0] = self.pressure;
        state[1] = self.controller as u8;
        state[2] = self.pump_enabled as u8;
        state[3] = self.timer_active as u8;
        state[4] = self.remaining;
    }

    fn read_state(&mut self, state: &[u8]) {
        self.pressure = state[0];
        self.controller = Controller::from_byte(state[1]);
        self.pump_enabled = state[2] != 0;
        self.timer_active = state[3] != 0;
        self.remaining = state[4];
    }

    fn faults(&self) -> Vec<Fault> {
        declare_faults(self.fault_probability)
    }

    fn execute_initial_step(&mut self, _context: &mut ExecutionContext<'_>) -> Result<()> {
        Ok(())
    }

    fn execute_step(&mut self, context: &mut ExecutionContext<'_>) -> Result<()> {
        // Sensor readings are only faulty when they would report something.
        let is_full = self.pressure >= self.parameters.sensor && !self.overridden("sensor.is_full", context)?;
        let is_empty = self.pressure == 0 && !self.overridden("sensor.is_empty", context)?;
        let has_elapsed = self.timer_active && self.remaining == 0 && !self.overridden("timer", context)?;

        match self.controller {
            Controller::Filling if has_elapsed => {
                self.controller = Controller::StoppedByTimer;
                self.pump_enabled = false;
                self.timer_active = false;
            }
            Controller::Filling if is_full => {
                self.controller = Controller::StoppedBySensor;
                self.pump_enabled = false;
                self.timer_active = false;
            }
            Controller::Filling => {}
            _ if is_empty => {
                self.controller = Controller::Filling;
                self.pump_enabled = true;
                self.timer_active = true;
                self.remaining = self.parameters.timeout;
            }
            _ => {}
        }

        if self.timer_active {
            self.remaining = self.remaining.saturating_sub(1);
        } else {
            self.remaining = 0;
        }

        if self.pump_enabled && !self.overridden("pump", context)? {
            self.pressure = (self.pressure + 1).min(self.parameters.limit);
        } else if self.controller != Controller::Filling {
            self.pressure = self.pressure.saturating_sub(1);
        }
        Ok(())
    }
}

fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    simplelog::TermLogger::init(
        simplelog::LevelFilter::Info,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    )?;

    let time_total = std::time::Instant::now();

    let args = Cli::parse();
    println!("args = {:?}", args);

    let mut configuration = match &args.config {
        Some(path) => AnalysisConfiguration::from_json_file(path)?,
        None => AnalysisConfiguration::default(),
    };
    if let Some(threads) = args.threads {
        configuration = configuration.with_cpu_count(threads);
    }
    println!("configuration = {:?}", configuration);

    let parameters = Parameters {
        limit: args.limit,
        sensor: args.sensor,
        timeout: args.timeout,
    };
    let limit = parameters.limit;
    let ruptured = Formula::atomic("ruptured", move |state| state[0] >= limit);
    let create = move || PressureTank::new(parameters, None);

    // Plain reachability of the hazard, with all faults activated nondeterministically.
    let traverser = ModelTraverser::new(create, configuration.clone())?;
    let result = traverser.check_invariant(&ruptured.clone().not())?;
    println!(
        "Tank can rupture: {} ({} states, {} transitions)",
        !result.formula_holds,
        result.state_count,
        result.transition_count
    );
    if let (Some(counter_example), Some(path)) = (&result.counter_example, &args.counterexample) {
        counter_example.save(path)?;
        info!("Saved counterexample with {} steps to {}", counter_example.len(), path.display());
    }

    let graph = traverser.generate_state_graph(&[ruptured.clone()])?;
    println!("graph = {:?}", graph);
    println!("Ruptured states: {}", graph.states_satisfying(0).len());

    // Deductive cause-consequence analysis.
    let faults = declare_faults(None);
    let mut analysis = SafetyAnalysis::new(configuration.clone());
    analysis.add_heuristic(SubsumptionHeuristic::new(&faults));
    analysis.add_heuristic(MaximalSafeSetHeuristic::new(&faults));
    let safety = analysis.compute(create, &ruptured)?;
    println!("{}", safety);

    let order = OrderAnalysis::new(configuration.clone()).compute(create, &ruptured, &safety)?;
    println!("Order relationships:");
    print!("{}", order);

    // Hazard probability with probabilistic faults.
    let fault_probability = args.fault_probability;
    let traverser = ModelTraverser::new(
        move || PressureTank::new(parameters, Some(fault_probability)),
        configuration.clone(),
    )?;
    let ltmdp = traverser.generate_ltmdp(&[ruptured.clone()])?;
    ltmdp.validate()?;
    println!("ltmdp = {:?}", ltmdp);
    let mdp = ltmdp.to_mdp(configuration.transition_capacity)?;
    println!("mdp = {:?}", mdp);

    let checker = ProbabilityChecker::new(&mdp);
    let within = Formula::bounded_finally(ruptured.clone(), args.steps);
    let probability = checker.calculate_probability(&Formula::probability(Objective::Maximum, within))?;
    println!(
        "Probability of a rupture within {} steps: {:.6e}",
        args.steps, probability
    );

    let time_total = time_total.elapsed();
    println!("Done in {:.1} s", time_total.as_secs_f64());

    Ok(())
}
