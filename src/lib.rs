//! urjog - jog and safety control core for Universal Robots arms
//!
//! This library decodes the robot's real-time binary telemetry stream and
//! drives manual jog motion through the script and dashboard interfaces,
//! with safety interlocks between the two. It carries no presentation layer:
//! a GUI (or any other consumer) observes the robot through position, safety
//! and connection callbacks and issues commands through [`JogController`].
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use urjog::{CartesianAxis, JogAxis, JogConfig, JogController, JogDirection};
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut config = JogConfig::default();
//!     config.robot.host = "192.168.1.42".to_string();
//!
//!     let controller = JogController::new(config);
//!     controller.add_position_callback(|tcp_pose, joints| {
//!         println!("tcp z = {:.3} m, j1 = {:.3} rad", tcp_pose[2], joints[0]);
//!     });
//!
//!     if controller.connect().await {
//!         controller
//!             .start_jog(
//!                 JogAxis::Cartesian(CartesianAxis::Z),
//!                 JogDirection::Positive,
//!                 0.25,
//!             )
//!             .await;
//!         tokio::time::sleep(std::time::Duration::from_millis(500)).await;
//!         controller.stop_jog().await;
//!         controller.disconnect().await;
//!     }
//! }
//! ```
//!
//! # Architecture
//!
//! - **RealtimeClient**: telemetry decoding (length-prefixed binary packets,
//!   static per-firmware field offsets, validated snapshots)
//! - **JogController**: jog/safety state machine, status polling, command
//!   dispatch over the script and dashboard channels
//! - **DashboardClient** / **ScriptClient**: the two request channels
//! - **CallbackRegistry**: ordered, failure-isolated listener fan-out

pub mod callback;
pub mod config;
pub mod controller;
pub mod dashboard;
pub mod error;
pub mod realtime;
pub mod script;
pub mod state;

// High-level exports for easy usage
pub use config::{JogConfig, RobotConfig, UR_COMMAND_PORT, UR_DASHBOARD_PORT, UR_REALTIME_PORT};
pub use controller::{ConnectionState, JogController, JogState, SafetyCondition};
pub use error::{CommandError, ConfigError, ConnectError, JogError, ProtocolError};
pub use realtime::RealtimeClient;
pub use state::{
    CartesianAxis, JogAxis, JogDirection, JogKind, JogMode, JogRequest, JointAxis, PositionData,
    RobotState, RobotStatus, SafetyState,
};

// Core component exports for advanced usage
pub use callback::CallbackRegistry;
pub use config::{ConnectionConfig, JogSettings, PortConfig, RateConfig, WorkspaceLimits};
pub use dashboard::DashboardClient;
pub use realtime::{PacketLayout, PACKET_LAYOUTS};
pub use script::ScriptClient;
