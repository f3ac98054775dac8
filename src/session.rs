use crate::config::Config;
use crate::protocol::{self, LineBuffer};
use crate::queue::PoseQueue;
use crate::types::{Endpoint, Intrinsics, PoseUpdate, ProtocolVersion, RecordShape, SessionState};
use crate::{PoseStreamError, Result};
use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

const READ_CHUNK: usize = 4096;

/// Counters for one session, readable from any thread.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub frames_sent: u64,
    pub bytes_sent: u64,
    pub records_received: u64,
    pub records_dropped: u64,
    pub queue_evicted: u64,
}

/// State shared between the session handle and its receive thread.
struct Shared {
    state: AtomicU8,
    ready: AtomicBool,
    stop: AtomicBool,
    frames_sent: AtomicU64,
    bytes_sent: AtomicU64,
    records_received: AtomicU64,
    records_dropped: AtomicU64,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(SessionState::Disconnected as u8),
            ready: AtomicBool::new(false),
            stop: AtomicBool::new(false),
            frames_sent: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            records_received: AtomicU64::new(0),
            records_dropped: AtomicU64::new(0),
        }
    }

    fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: SessionState) {
        let prev = SessionState::from_u8(self.state.swap(state as u8, Ordering::AcqRel));
        if prev != state {
            log::debug!("Session state {:?} -> {:?}", prev, state);
        }
    }
}

/// One TCP connection to a remote pose estimator.
///
/// Outbound frames and control messages go through `&self` methods from
/// the consumer thread. A dedicated receive thread owns a clone of the
/// socket, splits the inbound byte stream into lines, decodes them and
/// pushes the results onto a [`PoseQueue`].
pub struct Session {
    endpoint: Endpoint,
    protocol: ProtocolVersion,
    max_frame_len: usize,
    writer: Mutex<Option<TcpStream>>,
    queue: PoseQueue,
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    /// Connect to `config.endpoint` and start the receive thread.
    pub fn connect(config: &Config) -> Result<Session> {
        let shared = Arc::new(Shared::new());
        shared.set_state(SessionState::Connecting);

        let endpoint = config.endpoint.clone();
        let (stream, reader) = match open_stream(&endpoint, config.connect_timeout)
            .and_then(|stream| split_stream(stream, config))
        {
            Ok(pair) => pair,
            Err(source) => return Err(connection_failed(&shared, &endpoint, source)),
        };

        let queue = PoseQueue::bounded(config.queue_capacity);
        shared.set_state(SessionState::Connected);
        if config.protocol == ProtocolVersion::Legacy {
            shared.ready.store(true, Ordering::Release);
        }

        let thread = std::thread::Builder::new()
            .name("posestream-recv".into())
            .spawn({
                let shared = shared.clone();
                let queue = queue.clone();
                let shape = config.record_shape;
                let lines = LineBuffer::with_max_len(config.max_line_len);
                move || receive_loop(reader, shape, lines, queue, shared)
            })
            .map_err(|e| {
                let _ = stream.shutdown(Shutdown::Both);
                shared.set_state(SessionState::Closed);
                PoseStreamError::ThreadSpawn(e.to_string())
            })?;

        log::info!(
            "Connected to estimator at {} ({:?} protocol, {:?} records)",
            endpoint,
            config.protocol,
            config.record_shape
        );

        Ok(Session {
            endpoint,
            protocol: config.protocol,
            max_frame_len: config.max_frame_len,
            writer: Mutex::new(Some(stream)),
            queue,
            shared,
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Connect to `endpoint` with every other setting at its default.
    pub fn connect_to(endpoint: Endpoint) -> Result<Session> {
        Self::connect(&Config {
            endpoint,
            ..Config::default()
        })
    }

    /// Send one length-prefixed frame.
    ///
    /// The header and payload go out in a single write under the writer
    /// lock, so concurrent senders never interleave partial frames.
    pub fn send_frame(&self, payload: &[u8]) -> Result<()> {
        if self.state() != SessionState::Connected {
            return Err(PoseStreamError::NotConnected);
        }
        if payload.len() > self.max_frame_len {
            return Err(PoseStreamError::PayloadTooLarge {
                len: payload.len(),
                max: self.max_frame_len,
            });
        }

        let frame = protocol::encode_frame(payload)?;
        self.write_all(&frame)?;
        self.shared.frames_sent.fetch_add(1, Ordering::Relaxed);
        log::trace!("Sent frame ({} bytes payload)", payload.len());
        Ok(())
    }

    /// Send the one-shot intrinsics message in this session's protocol version.
    ///
    /// Does nothing when the session is not connected.
    pub fn send_intrinsics(&self, intrinsics: &Intrinsics) -> Result<()> {
        if self.state() != SessionState::Connected {
            log::warn!("Intrinsics not sent, session to {} is not connected", self.endpoint);
            return Ok(());
        }
        let message = protocol::format_intrinsics(intrinsics, self.protocol);
        self.write_all(message.as_bytes())?;
        log::info!("Sent intrinsics to {}: {}", self.endpoint, message.trim_end());
        Ok(())
    }

    fn write_all(&self, bytes: &[u8]) -> Result<()> {
        let mut guard = self.lock_writer();
        let stream = guard.as_mut().ok_or(PoseStreamError::NotConnected)?;
        if let Err(e) = stream.write_all(bytes) {
            log::warn!("Write to {} failed: {}", self.endpoint, e);
            return Err(e.into());
        }
        self.shared
            .bytes_sent
            .fetch_add(bytes.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    fn lock_writer(&self) -> MutexGuard<'_, Option<TcpStream>> {
        self.writer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// True once frames may be sent: after `HANDSHAKE_OK` for the handshake
    /// protocol, immediately after connecting for the legacy one.
    pub fn is_ready(&self) -> bool {
        self.state() == SessionState::Connected && self.shared.ready.load(Ordering::Acquire)
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn protocol(&self) -> ProtocolVersion {
        self.protocol
    }

    /// Queue of decoded records fed by the receive thread.
    pub fn queue(&self) -> &PoseQueue {
        &self.queue
    }

    /// Pop the oldest decoded record, if any.
    pub fn try_pop(&self) -> Option<PoseUpdate> {
        self.queue.try_pop()
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            frames_sent: self.shared.frames_sent.load(Ordering::Relaxed),
            bytes_sent: self.shared.bytes_sent.load(Ordering::Relaxed),
            records_received: self.shared.records_received.load(Ordering::Relaxed),
            records_dropped: self.shared.records_dropped.load(Ordering::Relaxed),
            queue_evicted: self.queue.evicted(),
        }
    }

    /// Close the connection and stop the receive thread. Idempotent.
    pub fn close(&self) {
        if self.shared.stop.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Some(stream) = self.lock_writer().take() {
            // Unblocks the receive thread's pending read.
            let _ = stream.shutdown(Shutdown::Both);
        }
        self.shared.set_state(SessionState::Closed);
        self.shared.ready.store(false, Ordering::Release);

        let handle = self
            .thread
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            if handle.thread().id() != std::thread::current().id() {
                let _ = handle.join();
            }
        }
        log::info!("Session to {} closed", self.endpoint);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

fn nonzero(d: Duration) -> Option<Duration> {
    Some(d.max(Duration::from_millis(1)))
}

fn open_stream(endpoint: &Endpoint, timeout: Duration) -> std::io::Result<TcpStream> {
    let addrs: Vec<SocketAddr> = (endpoint.host.as_str(), endpoint.port)
        .to_socket_addrs()?
        .collect();

    let mut last_err =
        std::io::Error::new(ErrorKind::AddrNotAvailable, "host resolved to no addresses");
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, timeout.max(Duration::from_millis(1))) {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                log::debug!("Connect to {} failed: {}", addr, e);
                last_err = e;
            }
        }
    }
    Err(last_err)
}

/// Apply socket options and clone the read half for the receive thread.
fn split_stream(stream: TcpStream, config: &Config) -> std::io::Result<(TcpStream, TcpStream)> {
    stream.set_nodelay(true)?;
    stream.set_write_timeout(nonzero(config.write_timeout))?;

    let reader = stream.try_clone()?;
    // A zero timeout is rejected by the OS; it also bounds the idle wait.
    reader.set_read_timeout(nonzero(config.poll_interval))?;
    Ok((stream, reader))
}

/// Any failure before the receive thread starts leaves the session disconnected.
fn connection_failed(shared: &Shared, endpoint: &Endpoint, source: std::io::Error) -> PoseStreamError {
    shared.set_state(SessionState::Disconnected);
    let err = PoseStreamError::Connection {
        addr: endpoint.to_string(),
        source,
    };
    log::warn!("{}", err);
    err
}

/// The receive loop runs on the session's dedicated thread.
///
/// The socket read timeout doubles as the idle wait, so an empty socket
/// costs one bounded sleep per iteration. Malformed lines are counted and
/// skipped; only end-of-stream, a socket fault or the stop flag end the loop.
fn receive_loop(
    mut reader: TcpStream,
    shape: RecordShape,
    mut lines: LineBuffer,
    queue: PoseQueue,
    shared: Arc<Shared>,
) {
    let mut buf = [0u8; READ_CHUNK];

    log::info!("Receive loop started ({:?} records)", shape);

    loop {
        if shared.stop.load(Ordering::Acquire) {
            log::info!("Receive loop stopping (close requested)");
            break;
        }

        let n = match reader.read(&mut buf) {
            Ok(0) => {
                if !shared.stop.load(Ordering::Acquire) {
                    log::info!("Estimator closed the connection");
                }
                break;
            }
            Ok(n) => n,
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                ) =>
            {
                continue;
            }
            Err(e) => {
                if !shared.stop.load(Ordering::Acquire) {
                    log::warn!("Receive error: {}", e);
                }
                break;
            }
        };

        for line in lines.feed(&buf[..n]) {
            match protocol::decode_record(&line, shape) {
                Ok(PoseUpdate::Handshake) => {
                    if !shared.ready.swap(true, Ordering::AcqRel) {
                        log::info!("Estimator handshake complete");
                    }
                }
                Ok(update) => {
                    shared.records_received.fetch_add(1, Ordering::Relaxed);
                    queue.push(update);
                }
                Err(e) => {
                    shared.records_dropped.fetch_add(1, Ordering::Relaxed);
                    log::debug!("Dropping record: {}", e);
                }
            }
        }
        let overflowed = lines.take_overflowed();
        if overflowed > 0 {
            shared.records_dropped.fetch_add(overflowed, Ordering::Relaxed);
        }
    }

    if !lines.pending().is_empty() {
        log::debug!("Discarding {} bytes of unterminated input", lines.pending().len());
    }
    shared.ready.store(false, Ordering::Release);
    shared.set_state(SessionState::Closed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    #[test]
    fn test_connect_refused() {
        let port = closed_port();
        let err = Session::connect_to(Endpoint::new("127.0.0.1", port))
            .err()
            .expect("connect should fail");
        match err {
            PoseStreamError::Connection { addr, .. } => {
                assert_eq!(addr, format!("127.0.0.1:{}", port))
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_nonzero_duration() {
        assert_eq!(nonzero(Duration::ZERO), Some(Duration::from_millis(1)));
        assert_eq!(nonzero(Duration::from_millis(5)), Some(Duration::from_millis(5)));
    }

    #[test]
    fn test_setup_failure_resets_state() {
        let shared = Shared::new();
        shared.set_state(SessionState::Connecting);
        let endpoint = Endpoint::new("127.0.0.1", 4000);

        let err = connection_failed(
            &shared,
            &endpoint,
            std::io::Error::new(ErrorKind::InvalidInput, "bad socket option"),
        );
        match err {
            PoseStreamError::Connection { addr, source } => {
                assert_eq!(addr, "127.0.0.1:4000");
                assert_eq!(source.kind(), ErrorKind::InvalidInput);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(shared.state(), SessionState::Disconnected);
    }
}
