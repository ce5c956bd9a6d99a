//! Real-time telemetry decoder
//!
//! Owns the streaming socket to the robot's real-time interface and turns the
//! continuous byte stream into validated [`RobotState`] snapshots. Packets are
//! length prefixed (4-byte big-endian total size, prefix included) and carry
//! 6-element big-endian double vectors at fixed offsets; the offsets are a
//! static property of the firmware generation, keyed by the declared packet
//! length and selected once per connection from the first complete packet.
//! Nothing here guesses offsets or endianness at runtime.

use crate::callback::CallbackRegistry;
use crate::config::{ConnectionConfig, JogConfig, WorkspaceLimits};
use crate::error::{ConnectError, ProtocolError};
use crate::state::RobotState;
use std::io::Read;
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Size of the big-endian length prefix.
const LENGTH_PREFIX: usize = 4;
/// Smallest packet the protocol can produce: prefix plus the time field.
const MIN_PACKET_LEN: usize = LENGTH_PREFIX + 8;
/// Declared lengths above this mark a desynchronized stream.
const MAX_PACKET_LEN: usize = 4096;
/// Smoothing factor for the packet-rate moving average.
const FREQUENCY_ALPHA: f64 = 0.1;

/// Byte offsets of the decoded fields for one known packet size.
///
/// Offsets count from the start of the packet, length prefix included, per
/// the vendor client-interface tables.
#[derive(Debug, Clone, Copy)]
pub struct PacketLayout {
    pub packet_len: usize,
    /// Actual joint positions, 6 doubles.
    pub q_actual: usize,
    /// Actual joint velocities, 6 doubles.
    pub qd_actual: usize,
    /// Actual TCP pose, 6 doubles.
    pub tool_vector_actual: usize,
    /// Actual TCP velocity, 6 doubles.
    pub tcp_speed_actual: usize,
    /// Speed scaling, 1 double, absent on the oldest generation.
    pub speed_scaling: Option<usize>,
}

/// Known firmware generations by total packet length. All of them place
/// `q_actual` at byte 252 and `tool_vector_actual` at byte 444.
pub const PACKET_LAYOUTS: &[PacketLayout] = &[
    PacketLayout {
        packet_len: 1044,
        q_actual: 252,
        qd_actual: 300,
        tool_vector_actual: 444,
        tcp_speed_actual: 492,
        speed_scaling: None,
    },
    PacketLayout {
        packet_len: 1060,
        q_actual: 252,
        qd_actual: 300,
        tool_vector_actual: 444,
        tcp_speed_actual: 492,
        speed_scaling: Some(940),
    },
    PacketLayout {
        packet_len: 1108,
        q_actual: 252,
        qd_actual: 300,
        tool_vector_actual: 444,
        tcp_speed_actual: 492,
        speed_scaling: Some(940),
    },
    PacketLayout {
        packet_len: 1116,
        q_actual: 252,
        qd_actual: 300,
        tool_vector_actual: 444,
        tcp_speed_actual: 492,
        speed_scaling: Some(940),
    },
];

impl PacketLayout {
    /// Look up the layout for a declared packet length.
    pub fn for_len(packet_len: usize) -> Option<&'static PacketLayout> {
        PACKET_LAYOUTS.iter().find(|l| l.packet_len == packet_len)
    }
}

fn read_f64(packet: &[u8], offset: usize) -> f64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&packet[offset..offset + 8]);
    f64::from_be_bytes(bytes)
}

fn read_vector6(packet: &[u8], offset: usize) -> [f64; 6] {
    std::array::from_fn(|i| read_f64(packet, offset + i * 8))
}

/// Incremental packet framing over arbitrary read boundaries.
///
/// One socket read is never assumed to be one packet; bytes accumulate until
/// the declared length is available. An implausible declared length clears
/// the buffer so accumulation restarts at the next read.
pub(crate) struct FrameBuffer {
    buf: Vec<u8>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Take the next complete packet, if one is buffered.
    pub fn next_packet(&mut self) -> Result<Option<Vec<u8>>, ProtocolError> {
        if self.buf.len() < LENGTH_PREFIX {
            return Ok(None);
        }
        let declared =
            u32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]) as usize;
        if declared < MIN_PACKET_LEN {
            self.buf.clear();
            return Err(ProtocolError::Undersized {
                declared,
                minimum: MIN_PACKET_LEN,
            });
        }
        if declared > MAX_PACKET_LEN {
            self.buf.clear();
            return Err(ProtocolError::ImplausibleLength(declared));
        }
        if self.buf.len() < declared {
            return Ok(None);
        }
        let packet: Vec<u8> = self.buf.drain(..declared).collect();
        Ok(Some(packet))
    }
}

/// Validated field extraction for one connection.
///
/// The layout is fixed by the first packet and never re-derived; packets
/// whose length disagrees, or whose values fall outside the plausibility
/// bounds, are rejected as a whole so a previously published state is never
/// mixed with garbage.
pub(crate) struct StreamDecoder {
    layout: Option<&'static PacketLayout>,
    limits: WorkspaceLimits,
}

impl StreamDecoder {
    pub fn new(limits: WorkspaceLimits) -> Self {
        Self {
            layout: None,
            limits,
        }
    }

    fn plausible_angle(&self, value: f64) -> bool {
        value.is_finite() && value.abs() <= self.limits.max_joint_rad
    }

    fn plausible_position(&self, value: f64) -> bool {
        value.is_finite() && value.abs() <= self.limits.max_reach_m
    }

    pub fn decode(&mut self, packet: &[u8]) -> Result<RobotState, ProtocolError> {
        let layout = match self.layout {
            Some(layout) => {
                if packet.len() != layout.packet_len {
                    return Err(ProtocolError::LengthMismatch {
                        declared: packet.len(),
                        expected: layout.packet_len,
                    });
                }
                layout
            }
            None => {
                let layout = PacketLayout::for_len(packet.len())
                    .ok_or(ProtocolError::UnknownLayout(packet.len()))?;
                info!(
                    "selected real-time layout for {}-byte packets",
                    layout.packet_len
                );
                self.layout = Some(layout);
                layout
            }
        };

        let joint_positions = read_vector6(packet, layout.q_actual);
        if !joint_positions.iter().all(|&v| self.plausible_angle(v)) {
            return Err(ProtocolError::OutOfRange {
                field: "actual joint positions",
            });
        }

        let tcp_pose = read_vector6(packet, layout.tool_vector_actual);
        let (position, rotation) = tcp_pose.split_at(3);
        if !position.iter().all(|&v| self.plausible_position(v))
            || !rotation.iter().all(|&v| self.plausible_angle(v))
        {
            return Err(ProtocolError::OutOfRange {
                field: "actual TCP pose",
            });
        }

        let speed_scaling = layout
            .speed_scaling
            .map(|offset| read_f64(packet, offset))
            .filter(|s| s.is_finite())
            .unwrap_or(1.0);

        Ok(RobotState {
            joint_positions,
            tcp_pose,
            joint_speeds: read_vector6(packet, layout.qd_actual),
            tcp_speed: read_vector6(packet, layout.tcp_speed_actual),
            speed_scaling,
            received_at: Instant::now(),
        })
    }
}

#[derive(Default)]
struct StreamStats {
    packets_received: u64,
    frequency: f64,
    last_packet: Option<Instant>,
}

struct SharedState {
    running: AtomicBool,
    socket: Mutex<Option<TcpStream>>,
    latest: RwLock<Option<RobotState>>,
    stats: Mutex<StreamStats>,
    position_callbacks: CallbackRegistry<([f64; 6], [f64; 6])>,
    state_callbacks: CallbackRegistry<RobotState>,
    connection_callbacks: CallbackRegistry<(bool, String)>,
}

/// Client for the robot's real-time telemetry interface.
///
/// `connect` spawns a receive thread that frames, decodes, validates and
/// publishes packets; consumers observe updates through callbacks or
/// [`latest_state`](Self::latest_state). Protocol-level problems are
/// recovered internally (dropped packet, last known good retained); socket
/// loss terminates the receive loop and surfaces through the connection
/// callback.
pub struct RealtimeClient {
    host: String,
    port: u16,
    read_timeout: Duration,
    retry_attempts: u32,
    retry_delay: Duration,
    connect_timeout: Duration,
    limits: WorkspaceLimits,
    shared: Arc<SharedState>,
    receive_thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl RealtimeClient {
    /// Create a client for `host:port` with default timeouts and limits.
    pub fn new(host: &str, port: u16) -> Self {
        Self::with_options(
            host,
            port,
            &ConnectionConfig::default(),
            WorkspaceLimits::default(),
        )
    }

    /// Create a client from the full configuration structure.
    pub fn from_config(config: &JogConfig) -> Self {
        Self::with_options(
            &config.robot.host,
            config.robot.ports.realtime,
            &config.robot.connection,
            config.limits,
        )
    }

    pub fn with_options(
        host: &str,
        port: u16,
        connection: &ConnectionConfig,
        limits: WorkspaceLimits,
    ) -> Self {
        Self {
            host: host.to_string(),
            port,
            read_timeout: connection.read_timeout(),
            retry_attempts: connection.retry_attempts,
            retry_delay: connection.retry_delay(),
            connect_timeout: connection.connect_timeout(),
            limits,
            shared: Arc::new(SharedState {
                running: AtomicBool::new(false),
                socket: Mutex::new(None),
                latest: RwLock::new(None),
                stats: Mutex::new(StreamStats::default()),
                position_callbacks: CallbackRegistry::new("position"),
                state_callbacks: CallbackRegistry::new("state"),
                connection_callbacks: CallbackRegistry::new("connection"),
            }),
            receive_thread: Mutex::new(None),
        }
    }

    /// Open the streaming socket and start the receive loop.
    pub fn connect(&self) -> Result<(), ConnectError> {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return Err(ConnectError::AlreadyConnected);
        }

        let peer = format!("{}:{}", self.host, self.port);
        let stream = match self.open_stream(&peer) {
            Ok(stream) => stream,
            Err(e) => {
                self.shared.running.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };

        let reader = match stream.try_clone() {
            Ok(reader) => reader,
            Err(e) => {
                self.shared.running.store(false, Ordering::SeqCst);
                return Err(ConnectError::Unreachable(format!("{}: {}", peer, e)));
            }
        };
        *self
            .shared
            .socket
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(stream);

        let shared = self.shared.clone();
        let limits = self.limits;
        let loop_peer = peer.clone();
        let handle = thread::spawn(move || receive_loop(shared, reader, limits, loop_peer));
        *self
            .receive_thread
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(handle);

        info!("Connected to real-time interface at {}", peer);
        self.shared
            .connection_callbacks
            .emit(&(true, format!("real-time interface connected to {}", peer)));
        Ok(())
    }

    fn open_stream(&self, peer: &str) -> Result<TcpStream, ConnectError> {
        let addr = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| ConnectError::Unreachable(format!("{}: {}", peer, e)))?
            .next()
            .ok_or_else(|| ConnectError::Unreachable(format!("{}: no address", peer)))?;

        let stream = TcpStream::connect_timeout(&addr, self.connect_timeout).map_err(|e| {
            if e.kind() == std::io::ErrorKind::TimedOut {
                ConnectError::Timeout(peer.to_string())
            } else {
                ConnectError::Unreachable(format!("{}: {}", peer, e))
            }
        })?;
        stream
            .set_read_timeout(Some(self.read_timeout))
            .map_err(|e| ConnectError::Unreachable(format!("{}: {}", peer, e)))?;
        Ok(stream)
    }

    /// Stop the receive loop and close the socket. Idempotent; the loop
    /// observes shutdown within one read-timeout interval.
    pub fn disconnect(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
        if let Some(socket) = self
            .shared
            .socket
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            let _ = socket.shutdown(Shutdown::Both);
        }
        if let Some(handle) = self
            .receive_thread
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            let _ = handle.join();
        }
    }

    /// Tear down and retry the connection with the configured policy.
    pub fn reconnect(&self) -> Result<(), ConnectError> {
        self.disconnect();

        let attempts = self.retry_attempts.max(1);
        let mut last_error = None;
        for attempt in 1..=attempts {
            info!("real-time reconnection attempt {}/{}", attempt, attempts);
            match self.connect() {
                Ok(()) => return Ok(()),
                Err(e) => last_error = Some(e),
            }
            if attempt < attempts {
                thread::sleep(self.retry_delay);
            }
        }

        error!(
            "failed to reconnect real-time interface after {} attempts",
            attempts
        );
        Err(last_error
            .unwrap_or_else(|| ConnectError::Unreachable(format!("{}:{}", self.host, self.port))))
    }

    /// Whether the receive loop is currently running.
    pub fn is_connected(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Latest validated snapshot, if any packet has been decoded yet.
    pub fn latest_state(&self) -> Option<RobotState> {
        self.shared
            .latest
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Exponential moving average of the packet rate, Hz.
    pub fn message_frequency(&self) -> f64 {
        self.shared
            .stats
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .frequency
    }

    /// Total validated packets since construction.
    pub fn packets_received(&self) -> u64 {
        self.shared
            .stats
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .packets_received
    }

    /// Register a listener for `(tcp_pose, joint_positions)` updates.
    pub fn add_position_callback<F>(&self, callback: F)
    where
        F: Fn([f64; 6], [f64; 6]) + Send + 'static,
    {
        self.shared
            .position_callbacks
            .register(move |update: &([f64; 6], [f64; 6])| callback(update.0, update.1));
    }

    /// Register a listener for complete [`RobotState`] updates.
    pub fn add_state_callback<F>(&self, callback: F)
    where
        F: Fn(RobotState) + Send + 'static,
    {
        self.shared
            .state_callbacks
            .register(move |state: &RobotState| callback(state.clone()));
    }

    /// Register a listener for connection transitions.
    pub fn add_connection_callback<F>(&self, callback: F)
    where
        F: Fn(bool, &str) + Send + 'static,
    {
        self.shared
            .connection_callbacks
            .register(move |event: &(bool, String)| callback(event.0, &event.1));
    }
}

impl Drop for RealtimeClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn publish(shared: &SharedState, state: RobotState) {
    {
        let mut stats = shared.stats.lock().unwrap_or_else(|e| e.into_inner());
        stats.packets_received += 1;
        if let Some(last) = stats.last_packet {
            let dt = state.received_at.duration_since(last).as_secs_f64();
            if dt > 0.0 {
                let instantaneous = 1.0 / dt;
                stats.frequency =
                    FREQUENCY_ALPHA * instantaneous + (1.0 - FREQUENCY_ALPHA) * stats.frequency;
            }
        }
        stats.last_packet = Some(state.received_at);
    }

    *shared.latest.write().unwrap_or_else(|e| e.into_inner()) = Some(state.clone());
    shared.state_callbacks.emit(&state);
    shared
        .position_callbacks
        .emit(&(state.tcp_pose, state.joint_positions));
}

fn receive_loop(shared: Arc<SharedState>, mut stream: TcpStream, limits: WorkspaceLimits, peer: String) {
    let mut frames = FrameBuffer::new();
    let mut decoder = StreamDecoder::new(limits);
    let mut buf = [0u8; 4096];

    loop {
        if !shared.running.load(Ordering::SeqCst) {
            break;
        }

        match stream.read(&mut buf) {
            Ok(0) => {
                // swap() distinguishes remote close from our own disconnect.
                if shared.running.swap(false, Ordering::SeqCst) {
                    warn!("real-time connection to {} closed by peer", peer);
                    shared
                        .connection_callbacks
                        .emit(&(false, format!("real-time connection to {} closed", peer)));
                }
                break;
            }
            Ok(n) => {
                frames.extend(&buf[..n]);
                loop {
                    match frames.next_packet() {
                        Ok(Some(packet)) => match decoder.decode(&packet) {
                            Ok(state) => publish(&shared, state),
                            Err(e) => debug!("dropped telemetry packet: {}", e),
                        },
                        Ok(None) => break,
                        Err(e) => {
                            debug!("telemetry stream desynchronized: {}", e);
                            break;
                        }
                    }
                }
            }
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(e) => {
                if shared.running.swap(false, Ordering::SeqCst) {
                    error!("real-time receive error from {}: {}", peer, e);
                    shared
                        .connection_callbacks
                        .emit(&(false, format!("real-time receive error: {}", e)));
                }
                break;
            }
        }
    }

    shared.running.store(false, Ordering::SeqCst);
    shared
        .socket
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .take();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::TcpListener;

    const JOINTS: [f64; 6] = [0.1, 0.2, 0.3, 0.4, 0.5, 0.6];
    const TCP_POSE: [f64; 6] = [0.5, 0.2, 0.3, 0.1, 0.2, 0.3];

    fn write_vector6(packet: &mut [u8], offset: usize, values: &[f64; 6]) {
        for (i, value) in values.iter().enumerate() {
            packet[offset + i * 8..offset + (i + 1) * 8].copy_from_slice(&value.to_be_bytes());
        }
    }

    fn build_packet(packet_len: usize, joints: &[f64; 6], tcp: &[f64; 6]) -> Vec<u8> {
        let mut packet = vec![0u8; packet_len];
        packet[..4].copy_from_slice(&(packet_len as u32).to_be_bytes());
        write_vector6(&mut packet, 252, joints);
        write_vector6(&mut packet, 444, tcp);
        packet
    }

    #[test]
    fn decodes_fields_at_documented_offsets() {
        let packet = build_packet(1108, &JOINTS, &TCP_POSE);
        let mut decoder = StreamDecoder::new(WorkspaceLimits::default());

        let state = decoder.decode(&packet).expect("valid packet");
        for i in 0..6 {
            assert!((state.joint_positions[i] - JOINTS[i]).abs() < 1e-12);
            assert!((state.tcp_pose[i] - TCP_POSE[i]).abs() < 1e-12);
        }
        assert_eq!(state.joint_speeds, [0.0; 6]);
        assert_eq!(state.speed_scaling, 0.0);
    }

    #[test]
    fn identical_bytes_decode_identically() {
        let packet = build_packet(1060, &JOINTS, &TCP_POSE);
        let mut decoder = StreamDecoder::new(WorkspaceLimits::default());

        let first = decoder.decode(&packet).expect("first decode");
        let second = decoder.decode(&packet).expect("second decode");
        assert_eq!(first.joint_positions, second.joint_positions);
        assert_eq!(first.tcp_pose, second.tcp_pose);
        assert_eq!(first.joint_speeds, second.joint_speeds);
    }

    #[test]
    fn layout_is_fixed_by_first_packet() {
        let mut decoder = StreamDecoder::new(WorkspaceLimits::default());
        decoder
            .decode(&build_packet(1108, &JOINTS, &TCP_POSE))
            .expect("layout selection");

        let other_generation = build_packet(1060, &JOINTS, &TCP_POSE);
        let result = decoder.decode(&other_generation);
        assert!(matches!(
            result,
            Err(ProtocolError::LengthMismatch {
                declared: 1060,
                expected: 1108
            })
        ));
    }

    #[test]
    fn unknown_packet_length_is_rejected() {
        let mut decoder = StreamDecoder::new(WorkspaceLimits::default());
        let packet = build_packet(1044, &JOINTS, &TCP_POSE);
        let truncated = &packet[..900];
        assert!(matches!(
            decoder.decode(truncated),
            Err(ProtocolError::UnknownLayout(900))
        ));
    }

    #[test]
    fn implausible_values_are_rejected() {
        let mut decoder = StreamDecoder::new(WorkspaceLimits::default());

        let bad_joints = build_packet(1108, &[100.0, 0.0, 0.0, 0.0, 0.0, 0.0], &TCP_POSE);
        assert!(matches!(
            decoder.decode(&bad_joints),
            Err(ProtocolError::OutOfRange { .. })
        ));

        let bad_tcp = build_packet(1108, &JOINTS, &[55.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        assert!(matches!(
            decoder.decode(&bad_tcp),
            Err(ProtocolError::OutOfRange { .. })
        ));

        let nan_tcp = build_packet(1108, &JOINTS, &[f64::NAN, 0.0, 0.0, 0.0, 0.0, 0.0]);
        assert!(matches!(
            decoder.decode(&nan_tcp),
            Err(ProtocolError::OutOfRange { .. })
        ));
    }

    #[test]
    fn framing_reassembles_split_reads() {
        let packet = build_packet(1108, &JOINTS, &TCP_POSE);
        let mut frames = FrameBuffer::new();

        frames.extend(&packet[..3]);
        assert!(frames.next_packet().expect("no error").is_none());
        frames.extend(&packet[3..700]);
        assert!(frames.next_packet().expect("no error").is_none());
        frames.extend(&packet[700..]);

        let framed = frames
            .next_packet()
            .expect("no error")
            .expect("complete packet");
        assert_eq!(framed, packet);
        assert!(frames.next_packet().expect("no error").is_none());
    }

    #[test]
    fn framing_splits_back_to_back_packets() {
        let first = build_packet(1060, &JOINTS, &TCP_POSE);
        let second = build_packet(1060, &TCP_POSE, &JOINTS);
        let mut frames = FrameBuffer::new();
        let mut joined = first.clone();
        joined.extend_from_slice(&second);
        frames.extend(&joined);

        assert_eq!(frames.next_packet().expect("ok").expect("first"), first);
        assert_eq!(frames.next_packet().expect("ok").expect("second"), second);
        assert!(frames.next_packet().expect("ok").is_none());
    }

    #[test]
    fn insane_declared_lengths_reset_the_buffer() {
        let mut frames = FrameBuffer::new();
        frames.extend(&2u32.to_be_bytes());
        frames.extend(&[1, 2, 3]);
        assert!(matches!(
            frames.next_packet(),
            Err(ProtocolError::Undersized { declared: 2, .. })
        ));
        assert!(frames.next_packet().expect("cleared").is_none());

        frames.extend(&100_000u32.to_be_bytes());
        assert!(matches!(
            frames.next_packet(),
            Err(ProtocolError::ImplausibleLength(100_000))
        ));
    }

    fn serve_packets(packets: Vec<Vec<u8>>) -> (u16, thread::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().expect("addr").port();
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("accept");
            for packet in packets {
                stream.write_all(&packet).expect("write packet");
            }
            // Hold the connection open briefly so the client reads everything
            // before seeing EOF.
            thread::sleep(Duration::from_millis(300));
        });
        (port, handle)
    }

    fn wait_for<F: Fn() -> bool>(condition: F, deadline: Duration) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        condition()
    }

    #[test]
    fn streams_packets_to_position_callbacks() {
        let packets = vec![
            build_packet(1108, &[0.0; 6], &[0.1, 0.1, 0.1, 0.0, 0.0, 0.0]),
            build_packet(1108, &JOINTS, &TCP_POSE),
        ];
        let (port, server) = serve_packets(packets);

        let client = RealtimeClient::new("127.0.0.1", port);
        let received: Arc<Mutex<Vec<([f64; 6], [f64; 6])>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        client.add_position_callback(move |tcp, joints| {
            sink.lock().unwrap().push((tcp, joints));
        });

        client.connect().expect("connect");
        assert!(matches!(
            client.connect(),
            Err(ConnectError::AlreadyConnected)
        ));

        assert!(wait_for(
            || client.packets_received() >= 2,
            Duration::from_secs(2)
        ));

        let updates = received.lock().unwrap();
        let (tcp, joints) = updates[updates.len() - 1];
        for i in 0..6 {
            assert!((tcp[i] - TCP_POSE[i]).abs() < 1e-12);
            assert!((joints[i] - JOINTS[i]).abs() < 1e-12);
        }
        drop(updates);

        let latest = client.latest_state().expect("latest state");
        assert_eq!(latest.joint_positions, JOINTS);

        client.disconnect();
        client.disconnect();
        assert!(!client.is_connected());
        server.join().expect("server");
    }

    #[test]
    fn corrupt_packet_keeps_last_known_good() {
        let good = build_packet(1108, &JOINTS, &TCP_POSE);
        let corrupt = build_packet(1108, &JOINTS, &[99.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        let (port, server) = serve_packets(vec![good, corrupt]);

        let client = RealtimeClient::new("127.0.0.1", port);
        client.connect().expect("connect");

        assert!(wait_for(
            || client.packets_received() >= 1,
            Duration::from_secs(2)
        ));
        // Give the corrupt packet time to arrive and be dropped.
        thread::sleep(Duration::from_millis(200));

        assert_eq!(client.packets_received(), 1);
        let latest = client.latest_state().expect("latest");
        assert_eq!(latest.tcp_pose, TCP_POSE);

        client.disconnect();
        server.join().expect("server");
    }

    #[test]
    fn connect_to_closed_port_fails_fast() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().expect("addr").port();
        drop(listener);

        let client = RealtimeClient::new("127.0.0.1", port);
        let start = Instant::now();
        let result = client.connect();
        assert!(matches!(result, Err(ConnectError::Unreachable(_))));
        assert!(start.elapsed() < Duration::from_secs(2));
        assert!(!client.is_connected());
        assert!(client.latest_state().is_none());
    }
}
