//! Scan parameters, axis assignment and travel limits.
//!
//! [`ScanParameters`] is the value set the trajectory compiler works from. It is
//! replaced wholesale on every `configure()`; nothing mutates it field by field
//! while a scan is prepared. The field names double as the process-variable
//! names (`NX`, `DX`, `X0`, ...) so an external record layer can address them
//! with [`ScanParameters::get`] / [`ScanParameters::set`].

use crate::error::{ScanError, ScanResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Wavetable capacity of the E-727 in points.
pub const MAX_DATAPOINTS: u64 = 262_144;

/// Wavetable points for a duration in ms.
///
/// The wavetable runs at one point per ms; durations round to the nearest
/// point and never go negative.
pub fn duration_points(duration_ms: f64) -> u64 {
    duration_ms.round().max(0.0) as u64
}

/// Logical scan axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    /// Fast (row) axis
    X,
    /// Slow (column) axis
    Y,
    /// Focus axis
    Z,
}

impl Axis {
    /// All axes in X, Y, Z order.
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    /// Lower-case label used in log and validation messages.
    pub fn label(self) -> &'static str {
        match self {
            Axis::X => "x",
            Axis::Y => "y",
            Axis::Z => "z",
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Wavetable and physical axis ids a logical axis is wired to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxisChannel {
    /// Wavetable id used for this axis' waveform
    pub table: u8,
    /// Physical axis (servo) id on the controller
    pub axis: u8,
}

/// Fixed mapping of logical axes to controller channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxisAssignment {
    pub x: AxisChannel,
    pub y: AxisChannel,
    pub z: AxisChannel,
}

impl Default for AxisAssignment {
    fn default() -> Self {
        Self {
            x: AxisChannel { table: 1, axis: 1 },
            y: AxisChannel { table: 3, axis: 3 },
            z: AxisChannel { table: 2, axis: 2 },
        }
    }
}

impl AxisAssignment {
    /// Channel for a logical axis.
    pub fn channel(&self, axis: Axis) -> AxisChannel {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
            Axis::Z => self.z,
        }
    }

    /// Logical axes ordered by their physical axis id.
    pub fn by_physical_axis(&self) -> [(Axis, AxisChannel); 3] {
        let mut ordered = Axis::ALL.map(|axis| (axis, self.channel(axis)));
        ordered.sort_by_key(|(_, channel)| channel.axis);
        ordered
    }
}

/// Inclusive travel bounds of one axis in µm.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TravelRange {
    pub min: f64,
    pub max: f64,
}

impl Default for TravelRange {
    fn default() -> Self {
        Self {
            min: 0.0,
            max: 300.0,
        }
    }
}

/// Per-axis travel limits plus the wavetable memory budget.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Limits {
    #[serde(default)]
    pub x: TravelRange,
    #[serde(default)]
    pub y: TravelRange,
    #[serde(default)]
    pub z: TravelRange,
    #[serde(default = "default_max_datapoints")]
    pub max_datapoints: u64,
}

fn default_max_datapoints() -> u64 {
    MAX_DATAPOINTS
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            x: TravelRange::default(),
            y: TravelRange::default(),
            z: TravelRange::default(),
            max_datapoints: MAX_DATAPOINTS,
        }
    }
}

impl Limits {
    /// Travel range of one axis.
    pub fn range(&self, axis: Axis) -> TravelRange {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
            Axis::Z => self.z,
        }
    }
}

/// Parameters of one raster step scan.
///
/// Positions and step sizes are in µm, `theta` in degrees, `exposure` and
/// `movetime` in ms. Keys are upper case; lower-case aliases let
/// environment overrides (which arrive lower-cased) address them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE", default)]
pub struct ScanParameters {
    #[serde(alias = "nx")]
    pub nx: u32,
    #[serde(alias = "ny")]
    pub ny: u32,
    #[serde(alias = "nz")]
    pub nz: u32,
    #[serde(alias = "dx")]
    pub dx: f64,
    #[serde(alias = "dy")]
    pub dy: f64,
    #[serde(alias = "dz")]
    pub dz: f64,
    #[serde(alias = "x0")]
    pub x0: f64,
    #[serde(alias = "y0")]
    pub y0: f64,
    #[serde(alias = "z0")]
    pub z0: f64,
    #[serde(alias = "theta")]
    pub theta: f64,
    #[serde(alias = "exposure")]
    pub exposure: f64,
    #[serde(alias = "movetime")]
    pub movetime: f64,
}

impl Default for ScanParameters {
    fn default() -> Self {
        Self {
            nx: 30,
            ny: 30,
            nz: 30,
            dx: 0.1,
            dy: 0.1,
            dz: 0.1,
            x0: 150.0,
            y0: 150.0,
            z0: 150.0,
            theta: 0.0,
            exposure: 100.0,
            movetime: 40.0,
        }
    }
}

impl ScanParameters {
    /// Process-variable names of every field, in declaration order.
    pub const FIELD_NAMES: [&'static str; 12] = [
        "NX", "NY", "NZ", "DX", "DY", "DZ", "X0", "Y0", "Z0", "THETA", "EXPOSURE", "MOVETIME",
    ];

    /// Number of steps along an axis.
    pub fn steps(&self, axis: Axis) -> u32 {
        match axis {
            Axis::X => self.nx,
            Axis::Y => self.ny,
            Axis::Z => self.nz,
        }
    }

    /// Step size along an axis.
    pub fn step_size(&self, axis: Axis) -> f64 {
        match axis {
            Axis::X => self.dx,
            Axis::Y => self.dy,
            Axis::Z => self.dz,
        }
    }

    /// Scan centre along an axis.
    pub fn centre(&self, axis: Axis) -> f64 {
        match axis {
            Axis::X => self.x0,
            Axis::Y => self.y0,
            Axis::Z => self.z0,
        }
    }

    /// Total travel covered along an axis (`D * N`).
    pub fn travel(&self, axis: Axis) -> f64 {
        self.step_size(axis) * f64::from(self.steps(axis))
    }

    /// Position the axis sits at when the scan begins.
    pub fn start_position(&self, axis: Axis) -> f64 {
        self.centre(axis) - self.travel(axis) / 2.0
    }

    /// Wavetable points of the move segment of a step.
    pub fn move_points(&self) -> u64 {
        duration_points(self.movetime)
    }

    /// Wavetable points of the exposure segment of a step.
    pub fn exposure_points(&self) -> u64 {
        duration_points(self.exposure)
    }

    /// Wavetable points of one whole step. Each segment is rounded on its
    /// own, so `NX * step_points()` is exactly the length of an X sweep.
    pub fn step_points(&self) -> u64 {
        self.move_points() + self.exposure_points()
    }

    /// Number of times the device repeats one odd+even row pair.
    pub fn row_pair_cycles(&self) -> u32 {
        self.ny / 2
    }

    /// Read a field by its process-variable name (case-insensitive).
    pub fn get(&self, name: &str) -> ScanResult<f64> {
        let value = match name.to_ascii_uppercase().as_str() {
            "NX" => f64::from(self.nx),
            "NY" => f64::from(self.ny),
            "NZ" => f64::from(self.nz),
            "DX" => self.dx,
            "DY" => self.dy,
            "DZ" => self.dz,
            "X0" => self.x0,
            "Y0" => self.y0,
            "Z0" => self.z0,
            "THETA" => self.theta,
            "EXPOSURE" => self.exposure,
            "MOVETIME" => self.movetime,
            _ => return Err(ScanError::UnknownParameter(name.to_string())),
        };
        Ok(value)
    }

    /// Write a field by its process-variable name (case-insensitive).
    ///
    /// Step counts only accept non-negative integral values.
    pub fn set(&mut self, name: &str, value: f64) -> ScanResult<()> {
        let key = name.to_ascii_uppercase();
        if !value.is_finite() {
            return Err(ScanError::InvalidParameterValue {
                name: key,
                value,
                reason: "value must be finite",
            });
        }
        match key.as_str() {
            "NX" => self.nx = step_count(&key, value)?,
            "NY" => self.ny = step_count(&key, value)?,
            "NZ" => self.nz = step_count(&key, value)?,
            "DX" => self.dx = value,
            "DY" => self.dy = value,
            "DZ" => self.dz = value,
            "X0" => self.x0 = value,
            "Y0" => self.y0 = value,
            "Z0" => self.z0 = value,
            "THETA" => self.theta = value,
            "EXPOSURE" => self.exposure = value,
            "MOVETIME" => self.movetime = value,
            _ => return Err(ScanError::UnknownParameter(name.to_string())),
        }
        Ok(())
    }
}

fn step_count(name: &str, value: f64) -> ScanResult<u32> {
    if value < 0.0 || value.fract() != 0.0 || value > f64::from(u32::MAX) {
        return Err(ScanError::InvalidParameterValue {
            name: name.to_string(),
            value,
            reason: "step counts must be non-negative integers",
        });
    }
    Ok(value as u32)
}
