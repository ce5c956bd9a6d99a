//! Shared robot state model
//!
//! The decoded telemetry snapshot, the polled safety flags, the merged status
//! record handed to consumers, and the jog request vocabulary.

use serde::{Deserialize, Serialize};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Get current wall-clock time as f64 seconds since UNIX epoch with
/// consistent precision.
pub fn wall_timestamp() -> f64 {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64();

    (timestamp * 1_000_000.0).round() / 1_000_000.0
}

/// Authoritative snapshot of decoded telemetry.
///
/// Constructed and mutated only inside the telemetry receive thread;
/// consumers receive owned clones via callback or [`latest_state`].
///
/// [`latest_state`]: crate::RealtimeClient::latest_state
#[derive(Debug, Clone)]
pub struct RobotState {
    /// Joint angles in radians, J1..J6.
    pub joint_positions: [f64; 6],
    /// TCP pose `[x, y, z, rx, ry, rz]` in meters and radians
    /// (rotation-vector convention).
    pub tcp_pose: [f64; 6],
    /// Joint velocities in rad/s.
    pub joint_speeds: [f64; 6],
    /// TCP velocity `[vx, vy, vz, wx, wy, wz]` in m/s and rad/s.
    pub tcp_speed: [f64; 6],
    /// Controller speed-scaling factor, 0.0..=1.0 where reported.
    pub speed_scaling: f64,
    /// Monotonic receipt time, set by the decoder, never by the sender.
    pub received_at: Instant,
}

impl RobotState {
    /// Seconds elapsed since this snapshot was decoded.
    pub fn age(&self) -> f64 {
        self.received_at.elapsed().as_secs_f64()
    }
}

/// Discrete safety and operating flags, polled over the dashboard channel.
///
/// Superseded atomically on each poll tick, never partially updated. The mode
/// labels are the robot's own vocabulary and are treated as opaque beyond the
/// stop-flag derivation in [`SafetyState::from_dashboard`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyState {
    pub robot_mode: String,
    pub safety_mode: String,
    pub protective_stopped: bool,
    pub emergency_stopped: bool,
    pub program_running: bool,
}

impl Default for SafetyState {
    fn default() -> Self {
        Self {
            robot_mode: "UNKNOWN".to_string(),
            safety_mode: "UNKNOWN".to_string(),
            protective_stopped: false,
            emergency_stopped: false,
            program_running: false,
        }
    }
}

impl SafetyState {
    /// Build a safety record from the raw dashboard query replies.
    pub fn from_dashboard(robot_mode: &str, safety_mode: &str, program_running: bool) -> Self {
        Self {
            robot_mode: robot_mode.to_string(),
            safety_mode: safety_mode.to_string(),
            protective_stopped: is_protective_stop_label(safety_mode),
            emergency_stopped: is_emergency_stop_label(safety_mode),
            program_running,
        }
    }

    /// True when neither stop flag is raised.
    pub fn is_normal(&self) -> bool {
        !self.protective_stopped && !self.emergency_stopped
    }
}

/// Classify a dashboard safety label as a protective stop.
pub fn is_protective_stop_label(label: &str) -> bool {
    label.eq_ignore_ascii_case("PROTECTIVE_STOP")
}

/// Classify a dashboard safety label as an emergency stop
/// (`ROBOT_EMERGENCY_STOP`, `SYSTEM_EMERGENCY_STOP`, ...).
pub fn is_emergency_stop_label(label: &str) -> bool {
    label.to_ascii_uppercase().contains("EMERGENCY_STOP")
}

/// Position half of the merged status record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionData {
    /// TCP pose `[x, y, z, rx, ry, rz]` in meters and radians.
    pub tcp_pose: [f64; 6],
    /// Joint angles in radians.
    pub joint_positions: [f64; 6],
}

/// Merged telemetry + safety record published by the status loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RobotStatus {
    /// Wall-clock timestamp when the record was assembled (UNIX seconds).
    pub stime: f64,
    /// Whether the command/dashboard side is currently connected.
    pub connected: bool,
    /// Latest decoded position, absent until the first telemetry packet.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<PositionData>,
    pub safety: SafetyState,
}

impl RobotStatus {
    /// Render as a single-line JSON event.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Active axis enumeration: Cartesian tool motion or per-joint motion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JogMode {
    Cartesian,
    Joint,
}

/// Cartesian jog axes, indices 0..5 of the speed vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CartesianAxis {
    X,
    Y,
    Z,
    Rx,
    Ry,
    Rz,
}

impl CartesianAxis {
    pub fn index(&self) -> usize {
        match self {
            CartesianAxis::X => 0,
            CartesianAxis::Y => 1,
            CartesianAxis::Z => 2,
            CartesianAxis::Rx => 3,
            CartesianAxis::Ry => 4,
            CartesianAxis::Rz => 5,
        }
    }

    /// Rotational axes jog in rad/s rather than m/s.
    pub fn is_rotational(&self) -> bool {
        self.index() >= 3
    }
}

/// Joint jog axes, J1 is the base joint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JointAxis {
    J1,
    J2,
    J3,
    J4,
    J5,
    J6,
}

impl JointAxis {
    pub fn index(&self) -> usize {
        match self {
            JointAxis::J1 => 0,
            JointAxis::J2 => 1,
            JointAxis::J3 => 2,
            JointAxis::J4 => 3,
            JointAxis::J5 => 4,
            JointAxis::J6 => 5,
        }
    }
}

/// A jog axis together with the mode it belongs to.
///
/// The Cartesian and joint enumerations are disjoint; a request is valid only
/// when the axis matches the controller's active [`JogMode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JogAxis {
    Cartesian(CartesianAxis),
    Joint(JointAxis),
}

impl JogAxis {
    pub fn mode(&self) -> JogMode {
        match self {
            JogAxis::Cartesian(_) => JogMode::Cartesian,
            JogAxis::Joint(_) => JogMode::Joint,
        }
    }

    /// Index into the 6-element speed/position vector for this axis.
    pub fn index(&self) -> usize {
        match self {
            JogAxis::Cartesian(a) => a.index(),
            JogAxis::Joint(j) => j.index(),
        }
    }

    /// Whether the mapped speed unit is rad/s rather than m/s.
    pub fn is_angular(&self) -> bool {
        match self {
            JogAxis::Cartesian(a) => a.is_rotational(),
            JogAxis::Joint(_) => true,
        }
    }
}

/// Direction of a jog request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JogDirection {
    Positive,
    Negative,
}

impl JogDirection {
    pub fn sign(&self) -> f64 {
        match self {
            JogDirection::Positive => 1.0,
            JogDirection::Negative => -1.0,
        }
    }
}

/// Continuous motion until stopped, or a single bounded displacement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum JogKind {
    Continuous,
    Step { step_size: f64 },
}

/// A single motion intent from the operator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JogRequest {
    pub axis: JogAxis,
    pub direction: JogDirection,
    /// Normalized scale in (0, 1], mapped to m/s or rad/s by the controller.
    pub speed_scale: f64,
    pub kind: JogKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safety_flags_derived_from_labels() {
        let normal = SafetyState::from_dashboard("RUNNING", "NORMAL", true);
        assert!(normal.is_normal());
        assert!(!normal.protective_stopped);

        let protective = SafetyState::from_dashboard("RUNNING", "PROTECTIVE_STOP", false);
        assert!(protective.protective_stopped);
        assert!(!protective.emergency_stopped);

        for label in ["ROBOT_EMERGENCY_STOP", "SYSTEM_EMERGENCY_STOP"] {
            let estop = SafetyState::from_dashboard("RUNNING", label, false);
            assert!(estop.emergency_stopped, "label {label} should flag e-stop");
            assert!(!estop.is_normal());
        }
    }

    #[test]
    fn axis_indices_cover_vector() {
        let axes = [
            JogAxis::Cartesian(CartesianAxis::X),
            JogAxis::Cartesian(CartesianAxis::Rz),
            JogAxis::Joint(JointAxis::J1),
            JogAxis::Joint(JointAxis::J6),
        ];
        assert_eq!(axes[0].index(), 0);
        assert_eq!(axes[1].index(), 5);
        assert_eq!(axes[2].index(), 0);
        assert_eq!(axes[3].index(), 5);
        assert_eq!(axes[0].mode(), JogMode::Cartesian);
        assert_eq!(axes[3].mode(), JogMode::Joint);
        assert!(!axes[0].is_angular());
        assert!(axes[1].is_angular());
    }

    #[test]
    fn status_serializes_without_position_when_absent() {
        let status = RobotStatus {
            stime: wall_timestamp(),
            connected: false,
            position: None,
            safety: SafetyState::default(),
        };
        let json = status.to_json();
        assert!(json.contains("\"connected\":false"));
        assert!(!json.contains("position"));

        let with_position = RobotStatus {
            position: Some(PositionData {
                tcp_pose: [0.5, 0.2, 0.3, 0.1, 0.2, 0.3],
                joint_positions: [0.1, 0.2, 0.3, 0.4, 0.5, 0.6],
            }),
            ..status
        };
        let json = with_position.to_json();
        assert!(json.contains("tcp_pose"));
        let parsed: RobotStatus = serde_json::from_str(&json).expect("round trip");
        assert_eq!(parsed.position, with_position.position);
    }
}
