//! Scan lifecycle: configure, start, abort.
//!
//! # State Machine
//!
//! ```text
//! NotConfigured ──configure──> Preparing ──ok──> Ready ──start──> Ready
//!                                  │                │
//!                                  │ validation or  │ send failed or
//!                                  │ send failed    │ not Ready
//!                                  ▼                ▼
//!                                Error <────────────┘
//! ```
//!
//! `Error` is only left through a fresh `configure()`. `abort()` is accepted in
//! every state and never changes it.
//!
//! Callers that share one controller between tasks wrap it in
//! [`SharedScanController`]; holding its mutex for the duration of an
//! operation is what serializes configure, start and abort.

use crate::clock::{Delay, TokioDelay};
use crate::commands::CommandBuffer;
use crate::config::ScanConfig;
use crate::error::{ScanError, ScanResult};
use crate::params::{Limits, ScanParameters};
use crate::protocol::CommandProtocol;
use crate::trajectory::TrajectoryCompiler;
use crate::validation::{validate, ValidationReport};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{error, info, instrument};

/// Pause between the setup program and the start command so the stage can
/// reach its start position.
pub const SETTLE_DELAY: Duration = Duration::from_secs(1);

/// Controller shared between tasks; the mutex is the operation lock.
pub type SharedScanController = Arc<Mutex<ScanController>>;

/// Lifecycle state of the scan, with its numeric status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScanState {
    /// Nothing has been sent yet
    NotConfigured,
    /// Parameters are being validated and the setup program sent
    Preparing,
    /// The last operation failed
    Error,
    /// Setup accepted; the scan can be started
    Ready,
    /// Reserved status code for an executing scan
    Running,
}

impl ScanState {
    /// Status code published to external monitors.
    pub fn code(self) -> u8 {
        match self {
            ScanState::NotConfigured => 0,
            ScanState::Preparing => 1,
            ScanState::Error => 2,
            ScanState::Ready => 3,
            ScanState::Running => 4,
        }
    }

    /// Inverse of [`ScanState::code`].
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(ScanState::NotConfigured),
            1 => Some(ScanState::Preparing),
            2 => Some(ScanState::Error),
            3 => Some(ScanState::Ready),
            4 => Some(ScanState::Running),
            _ => None,
        }
    }

    /// Check if the state allows starting the scan.
    pub fn can_start(&self) -> bool {
        matches!(self, ScanState::Ready)
    }
}

impl std::fmt::Display for ScanState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanState::NotConfigured => write!(f, "Not configured"),
            ScanState::Preparing => write!(f, "Preparing"),
            ScanState::Error => write!(f, "Error"),
            ScanState::Ready => write!(f, "Ready"),
            ScanState::Running => write!(f, "Running"),
        }
    }
}

/// Drives one controller through the scan lifecycle.
pub struct ScanController {
    protocol: CommandProtocol,
    compiler: TrajectoryCompiler,
    limits: Limits,
    delay: Arc<dyn Delay>,
    settle_delay: Duration,
    state: ScanState,
    params: ScanParameters,
    setup: CommandBuffer,
    start: CommandBuffer,
    stop: CommandBuffer,
    servo: CommandBuffer,
    /// Setup was sent and the stage has not yet been given time to settle
    settle_pending: bool,
}

impl std::fmt::Debug for ScanController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanController")
            .field("protocol", &self.protocol)
            .field("state", &self.state)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

impl ScanController {
    pub fn new(protocol: CommandProtocol, compiler: TrajectoryCompiler, limits: Limits) -> Self {
        let stop = compiler.stop_buffer();
        let servo = compiler.servo_buffer();
        Self {
            protocol,
            compiler,
            limits,
            delay: Arc::new(TokioDelay),
            settle_delay: SETTLE_DELAY,
            state: ScanState::NotConfigured,
            params: ScanParameters::default(),
            setup: CommandBuffer::new("setup"),
            start: CommandBuffer::new("start"),
            stop,
            servo,
            settle_pending: false,
        }
    }

    /// Build a controller from configuration, connecting unless dry-run is set.
    pub async fn from_config(config: &ScanConfig) -> ScanResult<Self> {
        let settings = &config.controller;
        let protocol = if settings.dry_run {
            CommandProtocol::dry_run(format!("{}:{}", settings.host, settings.port))
        } else {
            CommandProtocol::connect(&settings.host, settings.port, settings.connect_timeout())
                .await?
                .with_read_timeout(settings.read_timeout())
        };

        let mut controller = Self::new(
            protocol,
            TrajectoryCompiler::new(config.axes),
            config.limits,
        )
        .with_delay(Arc::new(TokioDelay), settings.settle_delay());
        controller.params = config.scan.clone();
        Ok(controller)
    }

    /// Replace the settle delay implementation.
    pub fn with_delay(mut self, delay: Arc<dyn Delay>, settle_delay: Duration) -> Self {
        self.delay = delay;
        self.settle_delay = settle_delay;
        self
    }

    /// Wrap in the shared, lock-serialized form.
    pub fn into_shared(self) -> SharedScanController {
        Arc::new(Mutex::new(self))
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    /// Parameters of the last `configure()`, or the initial values.
    pub fn parameters(&self) -> &ScanParameters {
        &self.params
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    pub fn setup_buffer(&self) -> &CommandBuffer {
        &self.setup
    }

    pub fn start_buffer(&self) -> &CommandBuffer {
        &self.start
    }

    pub fn stop_buffer(&self) -> &CommandBuffer {
        &self.stop
    }

    pub fn servo_buffer(&self) -> &CommandBuffer {
        &self.servo
    }

    /// Validate `params`, compile them and send the setup program.
    ///
    /// On success the controller is `Ready`. Any failure leaves it in `Error`
    /// with the reason logged and returned.
    #[instrument(skip_all, fields(peer = self.protocol.peer()))]
    pub async fn configure(&mut self, params: ScanParameters) -> ScanResult<ValidationReport> {
        self.state = ScanState::Preparing;
        self.params = params;
        self.settle_pending = false;

        let report = match validate(&self.params, &self.limits) {
            Ok(report) => report,
            Err(reasons) => {
                self.state = ScanState::Error;
                return Err(ScanError::Validation(reasons));
            }
        };

        self.compiler
            .compile_into(&self.params, &mut self.setup, &mut self.start);

        info!("Sending setup commands ({} lines)", self.setup.len());
        let started = Instant::now();
        if let Err(e) = self.protocol.send_buffer(&self.setup).await {
            error!("Sending setup commands failed: {e}");
            self.state = ScanState::Error;
            return Err(e);
        }
        info!(
            "Finished setup commands, took {:.3} s",
            started.elapsed().as_secs_f64()
        );

        self.settle_pending = true;
        self.state = ScanState::Ready;
        Ok(report)
    }

    /// Start a configured scan.
    ///
    /// Only valid in `Ready`; in any other state nothing is sent and the
    /// controller moves to `Error`.
    #[instrument(skip_all, fields(peer = self.protocol.peer()))]
    pub async fn start(&mut self) -> ScanResult<()> {
        if !self.state.can_start() {
            let state = self.state;
            error!("Can't start scan in state '{state}', it needs to be configured first");
            self.state = ScanState::Error;
            return Err(ScanError::NotReady(state));
        }

        if self.settle_pending {
            self.delay.sleep(self.settle_delay).await;
            self.settle_pending = false;
        }

        info!("Sending start commands");
        let started = Instant::now();
        if let Err(e) = self.protocol.send_buffer(&self.start).await {
            error!("Error sending start commands: {e}");
            self.state = ScanState::Error;
            return Err(e);
        }
        info!(
            "Finished start commands, took {:.3} s",
            started.elapsed().as_secs_f64()
        );

        self.state = ScanState::Ready;
        Ok(())
    }

    /// Stop both wave generators and all motion. Accepted in any state.
    #[instrument(skip_all, fields(peer = self.protocol.peer()))]
    pub async fn abort(&mut self) -> ScanResult<()> {
        info!("Sending stop commands");
        let started = Instant::now();
        let result = self.protocol.send_buffer(&self.stop).await;
        info!(
            "Stop commands sent, took {:.3} s",
            started.elapsed().as_secs_f64()
        );
        if let Err(e) = &result {
            error!("Error sending stop commands: {e}");
        }
        result
    }

    /// Close the servo loop on every axis. Does not change the state.
    #[instrument(skip_all, fields(peer = self.protocol.peer()))]
    pub async fn enable_servos(&mut self) -> ScanResult<()> {
        info!("Enabling servos");
        self.protocol.send_buffer(&self.servo).await
    }

    /// `configure` followed by `start`.
    pub async fn run(&mut self, params: ScanParameters) -> ScanResult<ValidationReport> {
        let report = self.configure(params).await?;
        self.start().await?;
        Ok(report)
    }

    /// Close the controller connection.
    pub async fn close(&mut self) -> ScanResult<()> {
        self.protocol.close().await
    }
}
