//! # PI Piezo Step Scan Library
//!
//! Drives a PI E-727 style piezo controller through a 2-D raster step scan.
//! Scan parameters are validated against travel limits and wavetable memory,
//! compiled into GCS wavetable commands, and sent over TCP with an `ERR?`
//! handshake after every program.
//!
//! ## Crate Structure
//!
//! - **`params`**: `ScanParameters`, axis assignment and travel limits.
//! - **`validation`**: pre-flight checks (limits, memory budget) that report
//!   every violation at once.
//! - **`commands`**: `CommandBuffer` and the GCS line vocabulary.
//! - **`trajectory`**: `TrajectoryCompiler`, parameters to setup/start/stop
//!   programs.
//! - **`protocol`**: `CommandProtocol`, the line-oriented exchange with the
//!   controller, including dry-run mode.
//! - **`controller`**: `ScanController`, the scan lifecycle state machine.
//! - **`transform`**: stage/lab frame rotation.
//! - **`clock`**: injectable delays for the settle pause.
//! - **`config`**: Figment-based configuration (TOML + environment).
//! - **`logging`**: `tracing-subscriber` setup.
//! - **`error`**: the `ScanError` enum.

pub mod clock;
pub mod commands;
pub mod config;
pub mod controller;
pub mod error;
pub mod logging;
pub mod params;
pub mod protocol;
pub mod trajectory;
pub mod transform;
pub mod validation;

pub use controller::{ScanController, ScanState, SharedScanController};
pub use error::{ScanError, ScanResult};
pub use params::ScanParameters;
