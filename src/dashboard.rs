//! Dashboard server client
//!
//! Line-oriented text protocol on the vendor dashboard port: one command per
//! line, one reply per line, a greeting banner on connect. Used for power,
//! brake, safety-reset and mode/safety queries, separate from the motion
//! command channel.

use crate::error::{CommandError, ConnectError};
use regex::Regex;
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::{debug, info};

/// Replies to queries look like `Robotmode: RUNNING` or
/// `Safetystatus: PROTECTIVE_STOP`.
const REPLY_PATTERN: &str = r"^[A-Za-z][A-Za-z ]*:\s*(.+)$";

/// Client for the dashboard server.
pub struct DashboardClient {
    stream: TcpStream,
    peer: String,
    reply_pattern: Regex,
}

impl DashboardClient {
    /// Connect to the dashboard server and consume the greeting banner.
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
            .set_read_timeout(Some(timeout))
            .and_then(|_| stream.set_write_timeout(Some(timeout)))
            .map_err(|e| ConnectError::Unreachable(format!("{}: {}", peer, e)))?;

        let mut client = Self {
            stream,
            peer,
            reply_pattern: Regex::new(REPLY_PATTERN).expect("reply pattern is a valid regex"),
        };

        let greeting = client
            .read_line()
            .map_err(|e| ConnectError::Unreachable(format!("{}: {}", client.peer, e)))?;
        info!("Connected to dashboard server at {} ({})", client.peer, greeting);
        Ok(client)
    }

    /// Read one newline-terminated reply.
    fn read_line(&mut self) -> Result<String, CommandError> {
        let mut collected = Vec::new();
        let mut buffer = [0u8; 1];

        loop {
            match self.stream.read_exact(&mut buffer) {
                Ok(_) => {
                    if buffer[0] == b'\n' {
                        break;
                    }
                    collected.push(buffer[0]);
                }
                Err(e)
                    if e.kind() == std::io::ErrorKind::TimedOut
                        || e.kind() == std::io::ErrorKind::WouldBlock =>
                {
                    return Err(CommandError::Timeout);
                }
                Err(e) => return Err(CommandError::Io(e)),
            }
        }

        Ok(String::from_utf8_lossy(&collected).trim().to_string())
    }

    /// Send one command and wait for its single-line reply.
    pub fn exchange(&mut self, command: &str) -> Result<String, CommandError> {
        let line = format!("{}\n", command);
        self.stream.write_all(line.as_bytes())?;
        let reply = self.read_line()?;
        debug!("dashboard {} -> {}", command, reply);
        Ok(reply)
    }

    /// Extract the value half of a `Label: value` reply.
    fn reply_value(&self, reply: &str) -> Result<String, CommandError> {
        self.reply_pattern
            .captures(reply)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
            .ok_or_else(|| CommandError::Rejected(reply.to_string()))
    }

    /// Query the operating mode label (`RUNNING`, `IDLE`, `POWER_OFF`, ...).
    pub fn robot_mode(&mut self) -> Result<String, CommandError> {
        let reply = self.exchange("robotmode")?;
        self.reply_value(&reply)
    }

    /// Query the safety status label (`NORMAL`, `PROTECTIVE_STOP`, ...).
    pub fn safety_status(&mut self) -> Result<String, CommandError> {
        let reply = self.exchange("safetystatus")?;
        self.reply_value(&reply)
    }

    /// Query whether a program is currently executing.
    pub fn program_running(&mut self) -> Result<bool, CommandError> {
        let reply = self.exchange("running")?;
        let value = self.reply_value(&reply)?;
        Ok(value.eq_ignore_ascii_case("true"))
    }

    pub fn power_on(&mut self) -> Result<String, CommandError> {
        self.exchange("power on")
    }

    pub fn power_off(&mut self) -> Result<String, CommandError> {
        self.exchange("power off")
    }

    pub fn brake_release(&mut self) -> Result<String, CommandError> {
        self.exchange("brake release")
    }

    /// Request clearance of a protective stop. The transition back to normal
    /// is confirmed only by a subsequent safety query.
    pub fn unlock_protective_stop(&mut self) -> Result<String, CommandError> {
        self.exchange("unlock protective stop")
    }

    pub fn close_safety_popup(&mut self) -> Result<String, CommandError> {
        self.exchange("close safety popup")
    }

    /// Stop the running program.
    pub fn stop_program(&mut self) -> Result<String, CommandError> {
        self.exchange("stop")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader};
    use std::net::TcpListener;
    use std::thread;

    /// Minimal dashboard server: greeting banner plus canned replies.
    fn spawn_mock() -> (u16, thread::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock");
        let port = listener.local_addr().expect("addr").port();

        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().expect("accept");
            let mut writer = stream.try_clone().expect("clone");
            writer
                .write_all(b"Connected: Universal Robots Dashboard Server\n")
                .expect("greeting");

            let reader = BufReader::new(stream);
            for line in reader.lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(_) => break,
                };
                let reply = match line.trim() {
                    "robotmode" => "Robotmode: RUNNING",
                    "safetystatus" => "Safetystatus: PROTECTIVE_STOP",
                    "running" => "Program running: true",
                    "power on" => "Powering on",
                    "brake release" => "Brake releasing",
                    "unlock protective stop" => "Protective stop releasing",
                    _ => "ERROR",
                };
                if writer.write_all(format!("{}\n", reply).as_bytes()).is_err() {
                    break;
                }
            }
        });

        (port, handle)
    }

    #[test]
    fn queries_parse_reply_values() {
        let (port, server) = spawn_mock();
        let mut client =
            DashboardClient::connect("127.0.0.1", port, Duration::from_secs(2)).expect("connect");

        assert_eq!(client.robot_mode().expect("robotmode"), "RUNNING");
        assert_eq!(
            client.safety_status().expect("safetystatus"),
            "PROTECTIVE_STOP"
        );
        assert!(client.program_running().expect("running"));
        assert_eq!(client.power_on().expect("power on"), "Powering on");
        assert_eq!(
            client.unlock_protective_stop().expect("unlock"),
            "Protective stop releasing"
        );

        drop(client);
        server.join().expect("server thread");
    }

    #[test]
    fn connect_to_closed_port_is_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().expect("addr").port();
        drop(listener);

        let result = DashboardClient::connect("127.0.0.1", port, Duration::from_millis(500));
        assert!(matches!(result, Err(ConnectError::Unreachable(_))));
    }
}
