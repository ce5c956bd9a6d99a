//! Jog and safety controller
//!
//! Turns operator jog requests into URScript commands, gates them on the
//! robot's safety state, and merges telemetry with polled safety fields into
//! a coherent status record. Owns the command and dashboard sockets; the
//! real-time telemetry client is embedded as its own failure domain.

use crate::callback::CallbackRegistry;
use crate::config::JogConfig;
use crate::dashboard::DashboardClient;
use crate::error::{CommandError, ConnectError, JogError};
use crate::realtime::RealtimeClient;
use crate::script::{self, ScriptClient};
use crate::state::{
    wall_timestamp, JogAxis, JogDirection, JogKind, JogMode, JogRequest, PositionData, RobotStatus,
    SafetyState,
};
use anyhow::{anyhow, Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Joint-space deceleration used by the emergency path, rad/s^2.
const ESTOP_DECELERATION: f64 = 2.0;

/// Connection state of the command/dashboard side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Jog sub-state, valid only while connected.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum JogState {
    Idle,
    Jogging { mode: JogMode },
}

/// Safety sub-state derived from polled safety flags and the local
/// emergency-stop latch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SafetyCondition {
    Normal,
    ProtectiveStopped,
    EmergencyStopped,
}

struct ControlState {
    connection: ConnectionState,
    jog: JogState,
    jog_mode: JogMode,
    safety: SafetyCondition,
    /// Set by a software emergency stop; a polled NORMAL does not clear the
    /// stopped sub-state until `reset_safety` has been requested.
    estop_latched: bool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// High-level jog, power and safety interface to one robot.
///
/// All operations are bounded in time and report failure through their return
/// value; no background loop ever propagates an error to the caller.
pub struct JogController {
    config: JogConfig,
    telemetry: Arc<RealtimeClient>,
    command: Arc<Mutex<Option<ScriptClient>>>,
    dashboard: Arc<Mutex<Option<DashboardClient>>>,
    control: Arc<Mutex<ControlState>>,
    status_tx: Arc<watch::Sender<Option<RobotStatus>>>,
    status_rx: watch::Receiver<Option<RobotStatus>>,
    safety_callbacks: Arc<CallbackRegistry<SafetyState>>,
    connection_callbacks: Arc<CallbackRegistry<(bool, String)>>,
    poll_running: Arc<AtomicBool>,
    poll_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl JogController {
    pub fn new(config: JogConfig) -> Self {
        let telemetry = Arc::new(RealtimeClient::from_config(&config));
        let (status_tx, status_rx) = watch::channel(None);

        Self {
            config,
            telemetry,
            command: Arc::new(Mutex::new(None)),
            dashboard: Arc::new(Mutex::new(None)),
            control: Arc::new(Mutex::new(ControlState {
                connection: ConnectionState::Disconnected,
                jog: JogState::Idle,
                jog_mode: JogMode::Cartesian,
                safety: SafetyCondition::Normal,
                estop_latched: false,
            })),
            status_tx: Arc::new(status_tx),
            status_rx,
            safety_callbacks: Arc::new(CallbackRegistry::new("safety")),
            connection_callbacks: Arc::new(CallbackRegistry::new("connection")),
            poll_running: Arc::new(AtomicBool::new(false)),
            poll_task: Mutex::new(None),
        }
    }

    /// Open the command and dashboard sockets and start the status loop.
    ///
    /// Returns false instead of raising on failure so callers can retry. The
    /// telemetry stream is attempted as a best-effort third channel; its loss
    /// degrades position data only.
    pub async fn connect(&self) -> bool {
        {
            let mut control = lock(&self.control);
            if control.connection == ConnectionState::Connected {
                return true;
            }
            control.connection = ConnectionState::Connecting;
        }

        let host = self.config.robot.host.clone();
        let timeout = self.config.robot.connection.connect_timeout();
        info!("Connecting to robot at {}", host);

        let command = match ScriptClient::connect(&host, self.config.robot.ports.command, timeout) {
            Ok(client) => client,
            Err(e) => {
                warn!("command interface connect failed: {}", e);
                self.fail_connect(&format!("command interface: {}", e));
                return false;
            }
        };
        let dashboard =
            match DashboardClient::connect(&host, self.config.robot.ports.dashboard, timeout) {
                Ok(client) => client,
                Err(e) => {
                    warn!("dashboard connect failed: {}", e);
                    self.fail_connect(&format!("dashboard: {}", e));
                    return false;
                }
            };

        *lock(&self.command) = Some(command);
        *lock(&self.dashboard) = Some(dashboard);
        {
            let mut control = lock(&self.control);
            control.connection = ConnectionState::Connected;
            control.jog = JogState::Idle;
            control.safety = if control.estop_latched {
                SafetyCondition::EmergencyStopped
            } else {
                SafetyCondition::Normal
            };
        }

        match self.telemetry.connect() {
            Ok(()) | Err(ConnectError::AlreadyConnected) => {}
            Err(e) => warn!("real-time interface unavailable: {}", e),
        }

        self.start_status_loop();
        self.connection_callbacks
            .emit(&(true, format!("connected to {}", host)));
        true
    }

    fn fail_connect(&self, message: &str) {
        lock(&self.control).connection = ConnectionState::Disconnected;
        self.connection_callbacks.emit(&(false, message.to_string()));
    }

    /// Stop the status loop and close all three sockets. Safe to call from
    /// any state; both background loops observe termination within one
    /// tick/read-timeout interval.
    pub async fn disconnect(&self) {
        self.poll_running.store(false, Ordering::SeqCst);
        if let Some(handle) = lock(&self.poll_task).take() {
            handle.abort();
        }

        let was_connected;
        {
            let mut control = lock(&self.control);
            was_connected = control.connection != ConnectionState::Disconnected;
            if let JogState::Jogging { mode } = control.jog {
                let mut guard = lock(&self.command);
                if let Some(client) = guard.as_mut() {
                    let _ = client
                        .send_line(&script::stop_command(mode, self.config.jog.stop_deceleration));
                }
            }
            control.jog = JogState::Idle;
            control.connection = ConnectionState::Disconnected;
        }

        *lock(&self.command) = None;
        *lock(&self.dashboard) = None;
        self.telemetry.disconnect();

        if was_connected {
            self.connection_callbacks
                .emit(&(false, "disconnected".to_string()));
            info!("Robot controller disconnected");
        }
    }

    fn start_status_loop(&self) {
        if self.poll_running.swap(true, Ordering::SeqCst) {
            return;
        }

        let interval = self.config.rates.poll_interval();
        let dashboard = self.dashboard.clone();
        let control = self.control.clone();
        let telemetry = self.telemetry.clone();
        let status_tx = self.status_tx.clone();
        let safety_callbacks = self.safety_callbacks.clone();
        let connection_callbacks = self.connection_callbacks.clone();
        let running = self.poll_running.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let mut dashboard_ok = true;

            loop {
                ticker.tick().await;
                if !running.load(Ordering::SeqCst) {
                    break;
                }

                let polled = poll_safety(&dashboard);
                if !running.load(Ordering::SeqCst) {
                    break;
                }

                match polled {
                    Ok(safety) => {
                        if !dashboard_ok {
                            dashboard_ok = true;
                            connection_callbacks
                                .emit(&(true, "dashboard channel restored".to_string()));
                        }
                        apply_safety(&control, &safety);
                        let status = RobotStatus {
                            stime: wall_timestamp(),
                            connected: true,
                            position: position_snapshot(&telemetry),
                            safety: safety.clone(),
                        };
                        let _ = status_tx.send(Some(status));
                        safety_callbacks.emit(&safety);
                    }
                    Err(e) => {
                        debug!("status poll failed: {}", e);
                        let newly_lost = {
                            let mut c = lock(&control);
                            let was_connected = c.connection == ConnectionState::Connected;
                            if was_connected {
                                c.connection = ConnectionState::Disconnected;
                                c.jog = JogState::Idle;
                            }
                            was_connected
                        };
                        if newly_lost || dashboard_ok {
                            dashboard_ok = false;
                            connection_callbacks
                                .emit(&(false, format!("status poll failed: {}", e)));
                        }
                        // Keep ticking so the caller continues to observe the
                        // disconnection.
                        let last_safety = status_tx
                            .borrow()
                            .as_ref()
                            .map(|s| s.safety.clone())
                            .unwrap_or_default();
                        let status = RobotStatus {
                            stime: wall_timestamp(),
                            connected: false,
                            position: position_snapshot(&telemetry),
                            safety: last_safety,
                        };
                        let _ = status_tx.send(Some(status));
                    }
                }
            }
        });
        *lock(&self.poll_task) = Some(handle);
    }

    /// Switch the active axis enumeration. Rejected while jogging.
    pub fn set_jog_mode(&self, mode: JogMode) -> bool {
        let mut control = lock(&self.control);
        if let JogState::Jogging { .. } = control.jog {
            warn!("jog mode change rejected: {}", JogError::ModeChangeWhileJogging);
            return false;
        }
        if control.jog_mode != mode {
            info!("jog mode set to {:?}", mode);
        }
        control.jog_mode = mode;
        true
    }

    pub fn jog_mode(&self) -> JogMode {
        lock(&self.control).jog_mode
    }

    /// Start a continuous jog. See [`start_continuous_jog`](Self::start_continuous_jog).
    pub async fn start_jog(
        &self,
        axis: JogAxis,
        direction: JogDirection,
        speed_scale: f64,
    ) -> bool {
        self.start_continuous_jog(axis, direction, speed_scale).await
    }

    /// Start a continuous jog in one axis. Validates the axis against the
    /// active mode and `speed_scale` against (0, 1], requires a normal safety
    /// state, and rejects the request if a jog is already active. Returns
    /// false on any validation or interlock failure.
    pub async fn start_continuous_jog(
        &self,
        axis: JogAxis,
        direction: JogDirection,
        speed_scale: f64,
    ) -> bool {
        match self.try_start_continuous_jog(axis, direction, speed_scale) {
            Ok(()) => true,
            Err(e) => {
                warn!("jog request rejected: {}", e);
                false
            }
        }
    }

    fn try_start_continuous_jog(
        &self,
        axis: JogAxis,
        direction: JogDirection,
        speed_scale: f64,
    ) -> Result<(), JogError> {
        if !(speed_scale > 0.0 && speed_scale <= 1.0) {
            return Err(JogError::InvalidSpeed(speed_scale));
        }
        let speed = self.mapped_speed(axis, speed_scale);

        let mut control = lock(&self.control);
        if control.connection != ConnectionState::Connected {
            return Err(JogError::NotConnected);
        }
        if axis.mode() != control.jog_mode {
            return Err(JogError::InvalidAxis(format!(
                "{:?} is not valid in {:?} mode",
                axis, control.jog_mode
            )));
        }
        self.check_safety(&control)?;
        if let JogState::Jogging { .. } = control.jog {
            return Err(JogError::AlreadyJogging);
        }

        let statement = script::speed_command(
            axis,
            direction,
            speed,
            self.config.jog.acceleration,
            self.config.jog.time_slice,
        );
        self.send_motion(&statement)?;
        control.jog = JogState::Jogging { mode: axis.mode() };
        info!(
            "continuous jog started: {:?} {:?} at {:.3} {}",
            axis,
            direction,
            speed,
            if axis.is_angular() { "rad/s" } else { "m/s" }
        );
        Ok(())
    }

    /// Dispatch a [`JogRequest`] to the matching operation.
    pub async fn submit_jog(&self, request: JogRequest) -> bool {
        match request.kind {
            JogKind::Continuous => {
                self.start_continuous_jog(request.axis, request.direction, request.speed_scale)
                    .await
            }
            JogKind::Step { step_size } => {
                self.step_jog(request.axis, request.direction, step_size, request.speed_scale)
                    .await
            }
        }
    }

    /// Issue one bounded displacement. Fire-and-forget: accepted or rejected
    /// synchronously, never enters the jogging sub-state.
    pub async fn step_jog(
        &self,
        axis: JogAxis,
        direction: JogDirection,
        step_size: f64,
        speed_scale: f64,
    ) -> bool {
        match self.try_step_jog(axis, direction, step_size, speed_scale) {
            Ok(()) => true,
            Err(e) => {
                warn!("step jog rejected: {}", e);
                false
            }
        }
    }

    fn try_step_jog(
        &self,
        axis: JogAxis,
        direction: JogDirection,
        step_size: f64,
        speed_scale: f64,
    ) -> Result<(), JogError> {
        if !(speed_scale > 0.0 && speed_scale <= 1.0) {
            return Err(JogError::InvalidSpeed(speed_scale));
        }
        if !(step_size.is_finite() && step_size > 0.0) {
            return Err(JogError::InvalidStep(step_size));
        }
        let speed = self.mapped_speed(axis, speed_scale);

        let control = lock(&self.control);
        if control.connection != ConnectionState::Connected {
            return Err(JogError::NotConnected);
        }
        if axis.mode() != control.jog_mode {
            return Err(JogError::InvalidAxis(format!(
                "{:?} is not valid in {:?} mode",
                axis, control.jog_mode
            )));
        }
        self.check_safety(&control)?;
        if let JogState::Jogging { .. } = control.jog {
            return Err(JogError::AlreadyJogging);
        }

        let statement = match axis {
            JogAxis::Cartesian(_) => script::cartesian_step_command(
                axis,
                direction,
                step_size,
                speed,
                self.config.jog.acceleration,
            ),
            JogAxis::Joint(joint) => {
                let state = self.telemetry.latest_state().ok_or(JogError::NoTelemetry)?;
                script::joint_step_command(
                    state.joint_positions,
                    joint,
                    direction,
                    step_size,
                    speed,
                    self.config.jog.acceleration,
                )
            }
        };
        self.send_motion(&statement)?;
        info!(
            "step jog sent: {:?} {:?} step {:.4} at {:.3}",
            axis, direction, step_size, speed
        );
        Ok(())
    }

    fn check_safety(&self, control: &ControlState) -> Result<(), JogError> {
        match control.safety {
            SafetyCondition::Normal => Ok(()),
            SafetyCondition::ProtectiveStopped => Err(JogError::SafetyInterlock(
                "robot is protective-stopped".to_string(),
            )),
            SafetyCondition::EmergencyStopped => Err(JogError::SafetyInterlock(
                "robot is emergency-stopped".to_string(),
            )),
        }
    }

    fn mapped_speed(&self, axis: JogAxis, speed_scale: f64) -> f64 {
        if axis.is_angular() {
            speed_scale * self.config.jog.max_angular_speed
        } else {
            speed_scale * self.config.jog.max_linear_speed
        }
    }

    fn send_motion(&self, statement: &str) -> Result<(), JogError> {
        let mut guard = lock(&self.command);
        let client = guard.as_mut().ok_or(JogError::NotConnected)?;
        client.send_line(statement)?;
        Ok(())
    }

    /// Stop the active jog. Idempotent: while idle it returns true and sends
    /// nothing, so at most one stop command goes out per actual transition.
    pub async fn stop_jog(&self) -> bool {
        let mut control = lock(&self.control);
        let mode = match control.jog {
            JogState::Idle => {
                debug!("stop_jog while idle, nothing to do");
                return true;
            }
            JogState::Jogging { mode } => mode,
        };
        control.jog = JogState::Idle;

        let statement = script::stop_command(mode, self.config.jog.stop_deceleration);
        match self.send_motion(&statement) {
            Ok(()) => {
                info!("jog stopped");
                true
            }
            Err(e) => {
                warn!("failed to send stop command: {}", e);
                false
            }
        }
    }

    /// Always accepted, regardless of connection or safety state: forces the
    /// stopped sub-state and latches it, then best-effort delivers an
    /// immediate stop over the command socket and a program stop over the
    /// dashboard.
    pub async fn emergency_stop(&self) {
        warn!("EMERGENCY STOP requested");
        {
            let mut control = lock(&self.control);
            control.jog = JogState::Idle;
            control.safety = SafetyCondition::EmergencyStopped;
            control.estop_latched = true;
        }

        {
            let mut guard = lock(&self.command);
            if let Some(client) = guard.as_mut() {
                if let Err(e) = client.send_line(&script::emergency_stop_command(ESTOP_DECELERATION))
                {
                    warn!("emergency stop script not delivered: {}", e);
                }
            }
        }
        {
            let mut guard = lock(&self.dashboard);
            if let Some(client) = guard.as_mut() {
                if let Err(e) = client.stop_program() {
                    warn!("dashboard stop not delivered: {}", e);
                }
            }
        }

        let safety = SafetyState {
            emergency_stopped: true,
            ..self
                .status_rx
                .borrow()
                .as_ref()
                .map(|s| s.safety.clone())
                .unwrap_or_default()
        };
        self.safety_callbacks.emit(&safety);
    }

    /// Request safety-fault clearance over the dashboard and release the
    /// local emergency-stop latch. The transition back to a normal sub-state
    /// is confirmed only by the next polled safety status.
    pub async fn reset_safety(&self) -> bool {
        let cleared = {
            let mut guard = lock(&self.dashboard);
            match guard.as_mut() {
                None => {
                    warn!("safety reset rejected: dashboard channel not connected");
                    false
                }
                Some(client) => {
                    if let Err(e) = client.close_safety_popup() {
                        debug!("close safety popup: {}", e);
                    }
                    match client.unlock_protective_stop() {
                        Ok(reply) => {
                            info!("safety reset requested ({})", reply);
                            true
                        }
                        Err(e) => {
                            warn!("safety reset failed: {}", e);
                            false
                        }
                    }
                }
            }
        };
        if cleared {
            lock(&self.control).estop_latched = false;
        }
        cleared
    }

    fn dashboard_exec<F>(&self, label: &str, op: F) -> bool
    where
        F: FnOnce(&mut DashboardClient) -> Result<String, CommandError>,
    {
        let mut guard = lock(&self.dashboard);
        match guard.as_mut() {
            None => {
                warn!("{} rejected: dashboard channel not connected", label);
                false
            }
            Some(client) => match op(client) {
                Ok(reply) => {
                    info!("{}: {}", label, reply);
                    true
                }
                Err(e) => {
                    warn!("{} failed: {}", label, e);
                    false
                }
            },
        }
    }

    pub async fn power_on_robot(&self) -> bool {
        self.dashboard_exec("power on", |c| c.power_on())
    }

    pub async fn power_off_robot(&self) -> bool {
        self.dashboard_exec("power off", |c| c.power_off())
    }

    pub async fn release_brakes(&self) -> bool {
        self.dashboard_exec("brake release", |c| c.brake_release())
    }

    /// Latest merged telemetry + safety record, or `None` before the first
    /// successful poll.
    pub fn get_robot_status(&self) -> Option<RobotStatus> {
        self.status_rx.borrow().clone()
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.control).connection == ConnectionState::Connected
    }

    pub fn connection_state(&self) -> ConnectionState {
        lock(&self.control).connection
    }

    pub fn jog_state(&self) -> JogState {
        lock(&self.control).jog
    }

    pub fn safety_condition(&self) -> SafetyCondition {
        lock(&self.control).safety
    }

    /// The embedded real-time telemetry client.
    pub fn telemetry(&self) -> &RealtimeClient {
        &self.telemetry
    }

    /// Register a listener for `(tcp_pose, joint_positions)` updates from the
    /// telemetry stream.
    pub fn add_position_callback<F>(&self, callback: F)
    where
        F: Fn([f64; 6], [f64; 6]) + Send + 'static,
    {
        self.telemetry.add_position_callback(callback);
    }

    /// Register a listener for polled safety updates.
    pub fn add_safety_callback<F>(&self, callback: F)
    where
        F: Fn(SafetyState) + Send + 'static,
    {
        self.safety_callbacks
            .register(move |safety: &SafetyState| callback(safety.clone()));
    }

    /// Register a listener for connection transitions of the command side.
    pub fn add_connection_callback<F>(&self, callback: F)
    where
        F: Fn(bool, &str) + Send + 'static,
    {
        self.connection_callbacks
            .register(move |event: &(bool, String)| callback(event.0, &event.1));
    }
}

impl Drop for JogController {
    fn drop(&mut self) {
        self.poll_running.store(false, Ordering::SeqCst);
        if let Some(handle) = lock(&self.poll_task).take() {
            handle.abort();
        }
    }
}

fn poll_safety(dashboard: &Mutex<Option<DashboardClient>>) -> Result<SafetyState> {
    let mut guard = lock(dashboard);
    let client = guard
        .as_mut()
        .ok_or_else(|| anyhow!("dashboard channel not connected"))?;
    let robot_mode = client.robot_mode().context("robot mode query")?;
    let safety_mode = client.safety_status().context("safety status query")?;
    let program_running = client.program_running().context("program state query")?;
    Ok(SafetyState::from_dashboard(
        &robot_mode,
        &safety_mode,
        program_running,
    ))
}

fn position_snapshot(telemetry: &RealtimeClient) -> Option<PositionData> {
    telemetry.latest_state().map(|state| PositionData {
        tcp_pose: state.tcp_pose,
        joint_positions: state.joint_positions,
    })
}

fn apply_safety(control: &Mutex<ControlState>, safety: &SafetyState) {
    let mut c = lock(control);
    let condition = if safety.emergency_stopped || c.estop_latched {
        SafetyCondition::EmergencyStopped
    } else if safety.protective_stopped {
        SafetyCondition::ProtectiveStopped
    } else {
        SafetyCondition::Normal
    };

    if condition != SafetyCondition::Normal {
        if let JogState::Jogging { .. } = c.jog {
            info!("safety stop reported, forcing jog to idle");
            c.jog = JogState::Idle;
        }
    }
    c.safety = condition;
}
