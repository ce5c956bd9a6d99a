//! Configuration for the jog control core
//!
//! The configuration is owned by an external loader (GUI, daemon, test) and
//! passed in at construction time. Every field has a sensible default so a
//! bare `JogConfig::default()` talks to a robot on the standard vendor ports.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;

/// Standard vendor port for the real-time (telemetry) interface.
pub const UR_REALTIME_PORT: u16 = 30003;
/// Standard vendor port for the secondary (URScript command) interface.
pub const UR_COMMAND_PORT: u16 = 30002;
/// Standard vendor port for the dashboard server.
pub const UR_DASHBOARD_PORT: u16 = 29999;

/// Top-level configuration consumed by [`crate::JogController`].
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct JogConfig {
    pub robot: RobotConfig,
    pub jog: JogSettings,
    pub rates: RateConfig,
    pub limits: WorkspaceLimits,
}

/// Robot endpoint and connection policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RobotConfig {
    pub host: String,
    pub ports: PortConfig,
    pub connection: ConnectionConfig,
}

/// The three independent robot sockets.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PortConfig {
    pub realtime: u16,
    pub command: u16,
    pub dashboard: u16,
}

/// Connect/read timeouts and the telemetry reconnect policy, in seconds.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub timeout: f64,
    pub read_timeout: f64,
    pub retry_attempts: u32,
    pub retry_delay: f64,
}

/// Jog speed limits and motion parameters.
///
/// `speed_scale` requests in (0, 1] are mapped onto `max_linear_speed` (m/s)
/// for Cartesian translation and `max_angular_speed` (rad/s) for rotation and
/// joint motion. `time_slice` bounds a continuous jog command so the arm
/// stops on its own if the operator's stop never arrives.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct JogSettings {
    pub max_linear_speed: f64,
    pub max_angular_speed: f64,
    pub acceleration: f64,
    pub stop_deceleration: f64,
    pub time_slice: f64,
}

/// Background loop rates.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateConfig {
    pub status_poll_hz: u32,
}

/// Plausibility bounds used by the telemetry decoder as a desync guard.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkspaceLimits {
    /// Maximum magnitude of any TCP position component, meters.
    pub max_reach_m: f64,
    /// Maximum magnitude of any joint angle or rotation-vector component,
    /// radians.
    pub max_joint_rad: f64,
}

impl Default for JogConfig {
    fn default() -> Self {
        Self {
            robot: RobotConfig::default(),
            jog: JogSettings::default(),
            rates: RateConfig::default(),
            limits: WorkspaceLimits::default(),
        }
    }
}

impl Default for RobotConfig {
    fn default() -> Self {
        Self {
            host: "192.168.1.100".to_string(),
            ports: PortConfig::default(),
            connection: ConnectionConfig::default(),
        }
    }
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            realtime: UR_REALTIME_PORT,
            command: UR_COMMAND_PORT,
            dashboard: UR_DASHBOARD_PORT,
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            timeout: 2.0,
            read_timeout: 1.0,
            retry_attempts: 3,
            retry_delay: 1.0,
        }
    }
}

impl Default for JogSettings {
    fn default() -> Self {
        Self {
            max_linear_speed: 0.25,
            max_angular_speed: 0.5,
            acceleration: 0.8,
            stop_deceleration: 1.2,
            time_slice: 5.0,
        }
    }
}

impl Default for RateConfig {
    fn default() -> Self {
        Self { status_poll_hz: 10 }
    }
}

impl Default for WorkspaceLimits {
    fn default() -> Self {
        Self {
            max_reach_m: 2.0,
            max_joint_rad: 4.0 * std::f64::consts::PI,
        }
    }
}

impl JogConfig {
    /// Load configuration from a YAML file.
    pub fn load_from_path(path: &str) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_string(),
            source: e,
        })?;
        Self::from_yaml(&contents)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        let config: JogConfig = serde_yaml::from_str(contents)?;
        Ok(config)
    }
}

impl ConnectionConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.read_timeout)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs_f64(self.retry_delay)
    }
}

impl RateConfig {
    /// Poll interval derived from the configured rate, never zero.
    pub fn poll_interval(&self) -> Duration {
        let hz = self.status_poll_hz.max(1);
        Duration::from_millis((1000 / hz).max(1) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_use_vendor_ports() {
        let config = JogConfig::default();
        assert_eq!(config.robot.ports.realtime, 30003);
        assert_eq!(config.robot.ports.command, 30002);
        assert_eq!(config.robot.ports.dashboard, 29999);
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let yaml = r#"
robot:
  host: 10.0.0.7
  ports:
    dashboard: 40003
rates:
  status_poll_hz: 25
"#;
        let config = JogConfig::from_yaml(yaml).expect("valid yaml");
        assert_eq!(config.robot.host, "10.0.0.7");
        assert_eq!(config.robot.ports.dashboard, 40003);
        // Unspecified fields keep their defaults.
        assert_eq!(config.robot.ports.realtime, 30003);
        assert_eq!(config.rates.status_poll_hz, 25);
        assert!((config.jog.max_linear_speed - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn poll_interval_never_zero() {
        let rates = RateConfig { status_poll_hz: 0 };
        assert!(rates.poll_interval() >= Duration::from_millis(1));
    }
}
