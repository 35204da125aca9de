//! Ordered command buffers and the GCS command vocabulary.
//!
//! A [`CommandBuffer`] is an ordered list of single command lines. The
//! controller owns three of them (setup, start, stop); none of them share
//! storage, and setup/start are always cleared before being rebuilt.
//!
//! The free functions format individual GCS lines. They only do string
//! substitution; ordering and parameter choice belong to
//! [`crate::trajectory`].

use std::fmt;

/// Zero-argument query answered with a single integer line (`0` = no error).
pub const ERROR_QUERY: &str = "ERR?";

/// Wave generator start mode used to launch a scan (start + trigger offset).
pub const GENERATOR_START_MODE: u32 = 257;

/// Wave generator mode that stops output.
pub const GENERATOR_STOP_MODE: u32 = 0;

/// Data recorder option recorded on channels 4..6 (velocity of the source axis).
pub const RECORD_VELOCITY: u8 = 1;

/// Data recorder option recorded on channels 1..3 (position of the source axis).
pub const RECORD_POSITION: u8 = 2;

/// Digital output line pulsed at every exposure.
pub const TRIGGER_OUTPUT_LINE: u8 = 1;

/// `CTO` parameter selecting the trigger mode.
pub const TRIGGER_MODE_PARAMETER: u8 = 3;

/// Trigger mode that fires at wavetable points set with `TWS`.
pub const TRIGGER_MODE_GENERATOR: u8 = 4;

/// How a `WAV` segment is applied to its wavetable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaveAction {
    /// Start a new wavetable definition
    Replace,
    /// Continue the current definition
    Append,
}

impl WaveAction {
    /// GCS token for the action.
    pub fn token(self) -> &'static str {
        match self {
            WaveAction::Replace => "X",
            WaveAction::Append => "&",
        }
    }
}

impl fmt::Display for WaveAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// An ordered sequence of command lines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandBuffer {
    name: &'static str,
    lines: Vec<String>,
}

impl CommandBuffer {
    /// Creates an empty, named buffer. The name only appears in logs.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            lines: Vec::new(),
        }
    }

    /// Buffer name used in log messages.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Appends one command line.
    pub fn push(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }

    /// Appends every line of `lines` in order.
    pub fn extend<I, S>(&mut self, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lines.extend(lines.into_iter().map(Into::into));
    }

    /// Removes all lines.
    pub fn clear(&mut self) {
        self.lines.clear();
    }

    /// Returns the lines in emission order.
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Newline-joined text of the whole buffer.
    pub fn render(&self) -> String {
        self.lines.join("\n")
    }
}

/// `SVO <axis> <0|1>`
pub fn servo(axis: u8, enabled: bool) -> String {
    format!("SVO {axis} {}", u8::from(enabled))
}

/// `WAV <table> <action> LIN <points> 0 <offset> <points> 0 0`
///
/// A linear segment of zero amplitude: the table holds `offset` for `points`
/// samples, ramping from the previous value with the speed-up/down shaping
/// the controller applies to `LIN` segments.
pub fn wave_linear(table: u8, action: WaveAction, points: u64, offset: f64) -> String {
    format!("WAV {table} {action} LIN {points} 0 {offset:.6} {points} 0 0")
}

/// `WTR 0 <divider> <interpolation>`
pub fn wave_table_rate(divider: u32, interpolation: u8) -> String {
    format!("WTR 0 {divider} {interpolation}")
}

/// `RTR <divider>`
pub fn record_table_rate(divider: u32) -> String {
    format!("RTR {divider}")
}

/// `WSL <generator> <table>`
pub fn wave_select(generator: u8, table: u8) -> String {
    format!("WSL {generator} {table}")
}

/// `WGC <generator> <cycles>`
pub fn wave_generator_cycles(generator: u8, cycles: u32) -> String {
    format!("WGC {generator} {cycles}")
}

/// `TWC`
pub fn clear_triggers() -> String {
    "TWC".to_string()
}

/// `CTO <output line> <parameter> <value>`
pub fn trigger_output(line: u8, parameter: u8, value: u8) -> String {
    format!("CTO {line} {parameter} {value}")
}

/// `TWS <line> <point> 1 [<line> <point> 1 ...]`
///
/// Raises `line` at each wavetable point. Points are 1-based.
pub fn trigger_set(line: u8, points: &[u64]) -> String {
    let args: Vec<String> = points.iter().map(|point| format!("{line} {point} 1")).collect();
    format!("TWS {}", args.join(" "))
}

/// `DRC <channel> <source axis> <option>`
pub fn record_config(channel: u8, axis: u8, option: u8) -> String {
    format!("DRC {channel} {axis} {option}")
}

/// `WOS <generator> <offset>`
pub fn wave_offset(generator: u8, offset: f64) -> String {
    format!("WOS {generator} {offset:.6}")
}

/// `MOV <axis> <position>`
pub fn move_absolute(axis: u8, position: f64) -> String {
    format!("MOV {axis} {position:.6}")
}

/// `WGO <generator> <mode> [<generator> <mode> ...]`
pub fn wave_generator_go(generators: &[(u8, u32)]) -> String {
    let args: Vec<String> = generators
        .iter()
        .map(|(generator, mode)| format!("{generator} {mode}"))
        .collect();
    format!("WGO {}", args.join(" "))
}

/// `STP`
pub fn stop_all() -> String {
    "STP".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_keeps_emission_order() {
        let mut buffer = CommandBuffer::new("setup");
        buffer.push("CMD1");
        buffer.extend(["CMD2", "CMD3"]);

        assert_eq!(buffer.lines(), &["CMD1", "CMD2", "CMD3"]);
        assert_eq!(buffer.render(), "CMD1\nCMD2\nCMD3");
        assert_eq!(buffer.len(), 3);
    }

    #[test]
    fn clear_empties_the_buffer() {
        let mut buffer = CommandBuffer::new("start");
        buffer.push("WGO 1 257 2 257");
        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(buffer.render(), "");
        assert_eq!(buffer.name(), "start");
    }

    #[test]
    fn buffers_do_not_share_storage() {
        let mut setup = CommandBuffer::new("setup");
        setup.push("A");
        let mut copy = setup.clone();
        copy.push("B");
        assert_eq!(setup.len(), 1);
        assert_eq!(copy.len(), 2);
    }

    #[test]
    fn wave_segment_formatting() {
        assert_eq!(
            wave_linear(1, WaveAction::Replace, 40, 0.0),
            "WAV 1 X LIN 40 0 0.000000 40 0 0"
        );
        assert_eq!(
            wave_linear(3, WaveAction::Append, 100, 1.25),
            "WAV 3 & LIN 100 0 1.250000 100 0 0"
        );
    }

    #[test]
    fn generator_and_misc_formatting() {
        assert_eq!(
            wave_generator_go(&[(1, GENERATOR_START_MODE), (2, GENERATOR_START_MODE)]),
            "WGO 1 257 2 257"
        );
        assert_eq!(servo(3, true), "SVO 3 1");
        assert_eq!(servo(2, false), "SVO 2 0");
        assert_eq!(wave_offset(1, 10.0), "WOS 1 10.000000");
        assert_eq!(move_absolute(2, 149.5), "MOV 2 149.500000");
        assert_eq!(record_config(4, 1, RECORD_VELOCITY), "DRC 4 1 1");
        assert_eq!(record_config(1, 1, RECORD_POSITION), "DRC 1 1 2");
        assert_eq!(wave_table_rate(20, 1), "WTR 0 20 1");
    }

    #[test]
    fn trigger_formatting() {
        assert_eq!(clear_triggers(), "TWC");
        assert_eq!(
            trigger_output(TRIGGER_OUTPUT_LINE, TRIGGER_MODE_PARAMETER, TRIGGER_MODE_GENERATOR),
            "CTO 1 3 4"
        );
        assert_eq!(trigger_set(1, &[1, 21, 41]), "TWS 1 1 1 1 21 1 1 41 1");
    }
}
