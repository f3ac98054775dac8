use crate::filter::SmoothingParams;
use crate::protocol::{DEFAULT_MAX_LINE_LEN, MAX_FRAME_LEN};
use crate::reconstruct::DEFAULT_MARKER_INSET;
use crate::types::{Endpoint, ProtocolVersion, RecordShape};
use std::time::Duration;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 65432;
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;
pub const DEFAULT_MAX_FRAME_LEN: usize = 8 * 1024 * 1024;

/// Runtime configuration for a session and its consumer.
///
/// Every field can be overridden through a `POSESTREAM_*` environment
/// variable; unparseable values fall back to the default.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub endpoint: Endpoint,
    pub connect_timeout: Duration,
    /// Upper bound on one blocking send.
    pub write_timeout: Duration,
    /// Receive-loop idle wait when no bytes are available.
    pub poll_interval: Duration,
    /// Soft cap of the pose queue (drop-oldest beyond it).
    pub queue_capacity: usize,
    pub max_frame_len: usize,
    /// Received text lines longer than this are discarded.
    pub max_line_len: usize,
    pub record_shape: RecordShape,
    pub protocol: ProtocolVersion,
    pub position: SmoothingParams,
    pub rotation: SmoothingParams,
    pub marker_inset: f64,
    pub translation_offset: [f64; 3],
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::new(DEFAULT_HOST, DEFAULT_PORT),
            connect_timeout: Duration::from_millis(3000),
            write_timeout: Duration::from_millis(2000),
            poll_interval: Duration::from_millis(5),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            max_line_len: DEFAULT_MAX_LINE_LEN,
            record_shape: RecordShape::Corners,
            protocol: ProtocolVersion::Handshake,
            position: SmoothingParams::POSITION,
            rotation: SmoothingParams::ROTATION,
            marker_inset: DEFAULT_MARKER_INSET,
            translation_offset: [0.0; 3],
        }
    }
}

impl Config {
    /// Defaults overridden by the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Defaults overridden by an arbitrary key lookup.
    pub fn from_lookup<L: Fn(&str) -> Option<String>>(lookup: L) -> Self {
        let d = Self::default();
        let env = EnvReader { lookup };

        let position = SmoothingParams {
            min_cutoff: env.f64("POSESTREAM_POS_MIN_CUTOFF", d.position.min_cutoff),
            beta: env.f64("POSESTREAM_POS_BETA", d.position.beta),
            d_cutoff: env.f64("POSESTREAM_POS_D_CUTOFF", d.position.d_cutoff),
        };
        let rotation = SmoothingParams {
            min_cutoff: env.f64("POSESTREAM_ROT_MIN_CUTOFF", d.rotation.min_cutoff),
            beta: env.f64("POSESTREAM_ROT_BETA", d.rotation.beta),
            d_cutoff: env.f64("POSESTREAM_ROT_D_CUTOFF", d.rotation.d_cutoff),
        };

        let record_shape = match env.string("POSESTREAM_RECORD_SHAPE", "corners").as_str() {
            "corners" => RecordShape::Corners,
            "vectors" => RecordShape::Vectors,
            other => {
                log::warn!(
                    "Unknown POSESTREAM_RECORD_SHAPE='{}', using corners (supported: corners|vectors)",
                    other
                );
                RecordShape::Corners
            }
        };
        let protocol = match env.string("POSESTREAM_PROTOCOL", "handshake").as_str() {
            "handshake" => ProtocolVersion::Handshake,
            "legacy" => ProtocolVersion::Legacy,
            other => {
                log::warn!(
                    "Unknown POSESTREAM_PROTOCOL='{}', using handshake (supported: handshake|legacy)",
                    other
                );
                ProtocolVersion::Handshake
            }
        };

        Self {
            endpoint: Endpoint::new(
                env.raw("POSESTREAM_HOST").unwrap_or(d.endpoint.host),
                env.parse("POSESTREAM_PORT", d.endpoint.port),
            ),
            connect_timeout: Duration::from_millis(
                env.parse("POSESTREAM_CONNECT_TIMEOUT_MS", d.connect_timeout.as_millis() as u64),
            ),
            write_timeout: Duration::from_millis(
                env.parse("POSESTREAM_WRITE_TIMEOUT_MS", d.write_timeout.as_millis() as u64),
            ),
            poll_interval: Duration::from_millis(
                env.parse("POSESTREAM_POLL_MS", d.poll_interval.as_millis() as u64),
            ),
            queue_capacity: env.parse("POSESTREAM_QUEUE_CAPACITY", d.queue_capacity).max(1),
            max_frame_len: env
                .parse("POSESTREAM_MAX_FRAME_BYTES", d.max_frame_len)
                .min(MAX_FRAME_LEN),
            max_line_len: env.parse("POSESTREAM_MAX_LINE_BYTES", d.max_line_len).max(1),
            record_shape,
            protocol,
            position: if position.validate().is_ok() {
                position
            } else {
                log::warn!("Invalid position smoothing overrides {:?}, using defaults", position);
                d.position
            },
            rotation: if rotation.validate().is_ok() {
                rotation
            } else {
                log::warn!("Invalid rotation smoothing overrides {:?}, using defaults", rotation);
                d.rotation
            },
            marker_inset: env.f64("POSESTREAM_MARKER_INSET", d.marker_inset),
            translation_offset: [
                env.f64("POSESTREAM_OFFSET_X", d.translation_offset[0]),
                env.f64("POSESTREAM_OFFSET_Y", d.translation_offset[1]),
                env.f64("POSESTREAM_OFFSET_Z", d.translation_offset[2]),
            ],
        }
    }
}

struct EnvReader<L> {
    lookup: L,
}

impl<L: Fn(&str) -> Option<String>> EnvReader<L> {
    fn raw(&self, name: &str) -> Option<String> {
        (self.lookup)(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn string(&self, name: &str, default: &str) -> String {
        self.raw(name)
            .map(|v| v.to_ascii_lowercase())
            .unwrap_or_else(|| default.to_string())
    }

    fn parse<T: std::str::FromStr>(&self, name: &str, default: T) -> T {
        self.raw(name)
            .and_then(|v| v.parse::<T>().ok())
            .unwrap_or(default)
    }

    fn f64(&self, name: &str, default: f64) -> f64 {
        let v = self.parse(name, default);
        if v.is_finite() {
            v
        } else {
            default
        }
    }
}
