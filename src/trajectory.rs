//! Compiles scan parameters into the controller's wavetable program.
//!
//! The setup program describes one odd row (X forwards, then one Y step) and
//! one even row (X backwards, then one Y step). The Y generator is cycled
//! `NY / 2` times so the pair repeats over the whole raster. The rest block
//! selects tables, arms one trigger per exposure, configures data recording
//! and moves every axis to its scan start.
//!
//! Wavetable timing is fixed at one point per millisecond (`WTR 0 20 1`), so
//! every duration in ms maps directly to a point count.

use crate::commands::{self, CommandBuffer, WaveAction};
use crate::params::{Axis, AxisAssignment, ScanParameters};

/// Wave generator driving the X axis.
pub const X_GENERATOR: u8 = 1;
/// Wave generator driving the Y axis.
pub const Y_GENERATOR: u8 = 2;

/// Wavetable rate divider giving 1 ms per point.
const WAVE_RATE_DIVIDER: u32 = 20;
const WAVE_INTERPOLATION: u8 = 1;
const RECORD_RATE_DIVIDER: u32 = 40;
/// Trigger points written per `TWS` line.
const TRIGGERS_PER_LINE: usize = 10;

/// Compiled setup and start programs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledScan {
    pub setup: CommandBuffer,
    pub start: CommandBuffer,
}

/// Turns [`ScanParameters`] into GCS command buffers.
///
/// Compilation is a pure function of the parameters and the axis assignment.
/// Parameters must already have passed [`crate::validation::validate`].
#[derive(Debug, Clone, Default)]
pub struct TrajectoryCompiler {
    axes: AxisAssignment,
}

impl TrajectoryCompiler {
    pub fn new(axes: AxisAssignment) -> Self {
        Self { axes }
    }

    pub fn axes(&self) -> &AxisAssignment {
        &self.axes
    }

    /// Compile into fresh buffers.
    pub fn compile(&self, params: &ScanParameters) -> CompiledScan {
        let mut setup = CommandBuffer::new("setup");
        let mut start = CommandBuffer::new("start");
        self.compile_into(params, &mut setup, &mut start);
        CompiledScan { setup, start }
    }

    /// Clear `setup` and `start` and rebuild them from `params`.
    pub fn compile_into(
        &self,
        params: &ScanParameters,
        setup: &mut CommandBuffer,
        start: &mut CommandBuffer,
    ) {
        setup.clear();
        self.odd_row(params, setup);
        self.even_row(params, setup);
        self.rest(params, setup);

        start.clear();
        start.push(commands::wave_generator_go(&[
            (X_GENERATOR, commands::GENERATOR_START_MODE),
            (Y_GENERATOR, commands::GENERATOR_START_MODE),
        ]));
    }

    /// Constant program that halts both generators and all motion.
    pub fn stop_buffer(&self) -> CommandBuffer {
        let mut stop = CommandBuffer::new("stop");
        stop.push(commands::wave_generator_go(&[
            (X_GENERATOR, commands::GENERATOR_STOP_MODE),
            (Y_GENERATOR, commands::GENERATOR_STOP_MODE),
        ]));
        stop.push(commands::stop_all());
        stop
    }

    /// Constant program that closes the servo loop on every physical axis.
    pub fn servo_buffer(&self) -> CommandBuffer {
        let mut servo = CommandBuffer::new("servo");
        for (_, channel) in self.axes.by_physical_axis() {
            servo.push(commands::servo(channel.axis, true));
        }
        servo
    }

    fn odd_row(&self, params: &ScanParameters, setup: &mut CommandBuffer) {
        for step in 0..params.nx {
            let action = if step == 0 {
                WaveAction::Replace
            } else {
                WaveAction::Append
            };
            self.x_step(params, setup, action, params.dx * f64::from(step));
        }

        let x_hold = params.dx * f64::from(params.nx.saturating_sub(1));
        self.y_step(params, setup, WaveAction::Replace, x_hold, 0.0, params.dy);
    }

    fn even_row(&self, params: &ScanParameters, setup: &mut CommandBuffer) {
        for step in 0..params.nx {
            let demand = params.dx * f64::from(params.nx - 1 - step);
            self.x_step(params, setup, WaveAction::Append, demand);
        }

        self.y_step(
            params,
            setup,
            WaveAction::Append,
            0.0,
            params.dy,
            2.0 * params.dy,
        );
    }

    fn x_step(
        &self,
        params: &ScanParameters,
        setup: &mut CommandBuffer,
        action: WaveAction,
        demand: f64,
    ) {
        let table = self.axes.x.table;
        setup.push(commands::wave_linear(
            table,
            action,
            params.move_points(),
            demand,
        ));
        setup.push(commands::wave_linear(
            table,
            WaveAction::Append,
            params.exposure_points(),
            demand,
        ));
    }

    /// Y holds `y_from` while X runs a whole row, then both move together.
    fn y_step(
        &self,
        params: &ScanParameters,
        setup: &mut CommandBuffer,
        action: WaveAction,
        x_hold: f64,
        y_from: f64,
        y_to: f64,
    ) {
        let wait = u64::from(params.nx) * params.step_points();
        let movement = params.move_points();
        setup.push(commands::wave_linear(self.axes.y.table, action, wait, y_from));
        setup.push(commands::wave_linear(
            self.axes.x.table,
            WaveAction::Append,
            movement,
            x_hold,
        ));
        setup.push(commands::wave_linear(
            self.axes.y.table,
            WaveAction::Append,
            movement,
            y_to,
        ));
    }

    fn rest(&self, params: &ScanParameters, setup: &mut CommandBuffer) {
        setup.push(commands::wave_table_rate(WAVE_RATE_DIVIDER, WAVE_INTERPOLATION));
        setup.push(commands::record_table_rate(RECORD_RATE_DIVIDER));
        setup.push(commands::wave_select(X_GENERATOR, self.axes.x.table));
        setup.push(commands::wave_select(Y_GENERATOR, self.axes.y.table));
        setup.push(commands::wave_generator_cycles(
            X_GENERATOR,
            params.row_pair_cycles(),
        ));
        setup.push(commands::clear_triggers());
        setup.push(commands::trigger_output(
            commands::TRIGGER_OUTPUT_LINE,
            commands::TRIGGER_MODE_PARAMETER,
            commands::TRIGGER_MODE_GENERATOR,
        ));
        for chunk in trigger_points(params).chunks(TRIGGERS_PER_LINE) {
            setup.push(commands::trigger_set(commands::TRIGGER_OUTPUT_LINE, chunk));
        }

        let physical = self.axes.by_physical_axis();
        for (record_channel, (_, channel)) in (1u8..).zip(physical) {
            setup.push(commands::record_config(
                record_channel,
                channel.axis,
                commands::RECORD_POSITION,
            ));
        }
        for (record_channel, (_, channel)) in (4u8..).zip(physical) {
            setup.push(commands::record_config(
                record_channel,
                channel.axis,
                commands::RECORD_VELOCITY,
            ));
        }

        setup.push(commands::wave_offset(X_GENERATOR, 0.0));
        setup.push(commands::wave_offset(Y_GENERATOR, 0.0));
        for (axis, channel) in physical {
            setup.push(commands::move_absolute(
                channel.axis,
                params.start_position(axis),
            ));
        }
        setup.push(commands::wave_offset(
            X_GENERATOR,
            params.start_position(Axis::X),
        ));
        setup.push(commands::wave_offset(
            Y_GENERATOR,
            params.start_position(Axis::Y),
        ));
    }
}

/// 1-based X table points where each exposure of a row pair begins.
///
/// A row is `NX` steps followed by the move segment of its Y step; the
/// trigger fires once the move segment of each X step has played.
pub fn trigger_points(params: &ScanParameters) -> Vec<u64> {
    let step = params.step_points();
    let movement = params.move_points();
    let row = u64::from(params.nx) * step + movement;
    (0..2u64)
        .flat_map(|r| (0..u64::from(params.nx)).map(move |k| r * row + k * step + movement + 1))
        .collect()
}
