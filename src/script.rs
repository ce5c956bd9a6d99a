//! URScript command encoding and the command-channel client
//!
//! The secondary interface accepts one script statement per line; the robot
//! executes it immediately. Encoding is pure string construction so it can be
//! unit tested without a socket; [`ScriptClient`] does the one-command,
//! one-send transport. Serialization of writes on the channel is the caller's
//! responsibility (one mutex per socket).

use crate::error::{CommandError, ConnectError};
use crate::state::{JogAxis, JogDirection, JogMode, JointAxis};
use std::io::Write;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::{debug, info};

fn format_vector(values: &[f64; 6]) -> String {
    values
        .iter()
        .map(|v| format!("{:.6}", v))
        .collect::<Vec<_>>()
        .join(",")
}

/// Continuous jog command: a single-axis speed vector with a bounded time
/// slice so the arm self-stops if no stop command ever arrives.
pub fn speed_command(
    axis: JogAxis,
    direction: JogDirection,
    speed: f64,
    acceleration: f64,
    time_slice: f64,
) -> String {
    let mut vector = [0.0_f64; 6];
    vector[axis.index()] = direction.sign() * speed;
    let name = match axis.mode() {
        JogMode::Cartesian => "speedl",
        JogMode::Joint => "speedj",
    };
    format!(
        "{}([{}],{:.4},{:.2})",
        name,
        format_vector(&vector),
        acceleration,
        time_slice
    )
}

/// Stop command matching the mode of the motion being stopped.
pub fn stop_command(mode: JogMode, deceleration: f64) -> String {
    match mode {
        JogMode::Cartesian => format!("stopl({:.4})", deceleration),
        JogMode::Joint => format!("stopj({:.4})", deceleration),
    }
}

/// Immediate stop used by the emergency path; joint-space deceleration halts
/// any motion regardless of how it was commanded.
pub fn emergency_stop_command(deceleration: f64) -> String {
    format!("stopj({:.4})", deceleration)
}

/// One bounded Cartesian displacement. The target is computed on the
/// controller from its own reported pose, so no motion math happens here.
pub fn cartesian_step_command(
    axis: JogAxis,
    direction: JogDirection,
    step_size: f64,
    speed: f64,
    acceleration: f64,
) -> String {
    let mut offset = [0.0_f64; 6];
    offset[axis.index()] = direction.sign() * step_size;
    format!(
        "movel(pose_add(get_actual_tcp_pose(),p[{}]),a={:.4},v={:.4})",
        format_vector(&offset),
        acceleration,
        speed
    )
}

/// One bounded joint displacement from the latest telemetry joint vector.
pub fn joint_step_command(
    current_joints: [f64; 6],
    axis: JointAxis,
    direction: JogDirection,
    step_size: f64,
    speed: f64,
    acceleration: f64,
) -> String {
    let mut target = current_joints;
    target[axis.index()] += direction.sign() * step_size;
    format!(
        "movej([{}],a={:.4},v={:.4})",
        format_vector(&target),
        acceleration,
        speed
    )
}

/// Client for the URScript command channel.
///
/// Request/response in principle, but motion statements are not acknowledged
/// on this interface: one command, one send, response optional.
pub struct ScriptClient {
    stream: TcpStream,
    peer: String,
}

impl ScriptClient {
    /// Connect to the command interface with a bounded timeout.
    pub fn connect(host: &str, port: u16, timeout: Duration) -> Result<Self, ConnectError> {
        let peer = format!("{}:{}", host, port);
        let addr = (host, port)
            .to_socket_addrs()
            .map_err(|e| ConnectError::Unreachable(format!("{}: {}", peer, e)))?
            .next()
            .ok_or_else(|| ConnectError::Unreachable(format!("{}: no address", peer)))?;

        let stream = TcpStream::connect_timeout(&addr, timeout).map_err(|e| {
            if e.kind() == std::io::ErrorKind::TimedOut {
                ConnectError::Timeout(peer.clone())
            } else {
                ConnectError::Unreachable(format!("{}: {}", peer, e))
            }
        })?;
        stream
            .set_write_timeout(Some(timeout))
            .map_err(|e| ConnectError::Unreachable(format!("{}: {}", peer, e)))?;

        info!("Connected to command interface at {}", peer);
        Ok(Self { stream, peer })
    }

    /// Send one script statement, newline terminated.
    pub fn send_line(&mut self, statement: &str) -> Result<(), CommandError> {
        let line = if statement.ends_with('\n') {
            statement.to_string()
        } else {
            format!("{}\n", statement)
        };
        self.stream.write_all(line.as_bytes())?;
        self.stream.flush()?;
        debug!("sent script statement to {}: {}", self.peer, statement.trim_end());
        Ok(())
    }
}
