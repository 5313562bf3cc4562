#![allow(dead_code)]

use dcca_rs::error::Result;
use dcca_rs::fault::Fault;
use dcca_rs::formula::Formula;
use dcca_rs::model::{ExecutableModel, ExecutionContext};

pub const SENSOR_FAULT: usize = 0;
pub const TIMER_FAULT: usize = 1;

/// The sensor stops the pump at this pressure.
pub const FULL: u8 = 5;
/// The timer stops the pump after this many steps of pumping.
pub const TIMEOUT: u8 = 7;
/// The tank ruptures at this pressure.
pub const RUPTURE: u8 = 8;

/// A tank filled by a pump that is stopped by a pressure sensor or, as a backup, by a timer.
///
/// Only a broken sensor together with a broken timer lets the pressure reach [`RUPTURE`].
#[derive(Debug, Default)]
pub struct PressureTank {
    pub pressure: u8,
    pub timer: u8,
    pub pumping: bool,
}

impl ExecutableModel for PressureTank {
    fn state_size(&self) -> usize {
        3
    }

    fn write_state(&self, state: &mut [u8]) {
        state[0] = self.pressure;
        state[1] = self.timer;
        state[2] = self.pumping as u8;
    }

    fn read_state(&mut self, state: &[u8]) {
        self.pressure = state[0];
        self.timer = state[1];
        self.pumping = state[2] != 0;
    }

    fn faults(&self) -> Vec<Fault> {
        vec![
            Fault::permanent(SENSOR_FAULT, "SensorStuck"),
            Fault::permanent(TIMER_FAULT, "TimerFails"),
        ]
    }

    fn execute_initial_step(&mut self, _context: &mut ExecutionContext<'_>) -> Result<()> {
        self.pumping = true;
        Ok(())
    }

    fn execute_step(&mut self, context: &mut ExecutionContext<'_>) -> Result<()> {
        if !self.pumping {
            self.pressure = 0;
            self.timer = 0;
            self.pumping = true;
            return Ok(());
        }

        self.pressure = (self.pressure + 1).min(RUPTURE);
        self.timer = (self.timer + 1).min(TIMEOUT);
        let sensor_full = self.pressure >= FULL && !context.try_activate(SENSOR_FAULT);
        let timed_out = self.timer >= TIMEOUT && !context.try_activate(TIMER_FAULT);
        if sensor_full || timed_out {
            self.pumping = false;
        }
        Ok(())
    }
}

pub fn rupture() -> Formula {
    Formula::atomic("rupture", |state| state[0] >= RUPTURE)
}

/// A single state that steps to itself.
pub struct SelfLoop;

impl ExecutableModel for SelfLoop {
    fn state_size(&self) -> usize {
        1
    }
    fn write_state(&self, state: &mut [u8]) {
        state[0] = 42;
    }
    fn read_state(&mut self, _state: &[u8]) {}
    fn faults(&self) -> Vec<Fault> {
        Vec::new()
    }
    fn execute_initial_step(&mut self, _context: &mut ExecutionContext<'_>) -> Result<()> {
        Ok(())
    }
    fn execute_step(&mut self, _context: &mut ExecutionContext<'_>) -> Result<()> {
        Ok(())
    }
}
