use std::fmt;

/// World-space rigid transform produced by reconstruction and smoothing.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    /// Position in meters [x, y, z].
    pub position: [f64; 3],
    /// Orientation quaternion [qx, qy, qz, qw].
    pub rotation: [f64; 4],
}

impl Pose {
    pub fn new(position: [f64; 3], rotation: [f64; 4]) -> Self {
        Self { position, rotation }
    }

    /// Origin, no rotation.
    pub fn identity() -> Self {
        Self {
            position: [0.0; 3],
            rotation: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self::identity()
    }
}

/// One decoded control-channel message from the estimator.
#[derive(Debug, Clone, PartialEq)]
pub enum PoseUpdate {
    /// `HANDSHAKE_OK` sentinel: the estimator is ready for frames.
    Handshake,
    /// Four image-space marker corners in pixels, `[x, y]` each.
    Corners { id: String, corners: [[f64; 2]; 4] },
    /// Translation and axis-angle rotation in the estimator's convention.
    Vectors {
        id: String,
        tvec: [f64; 3],
        rvec: [f64; 3],
    },
}

impl PoseUpdate {
    /// Marker identifier, if the record carries one.
    pub fn id(&self) -> Option<&str> {
        match self {
            PoseUpdate::Handshake => None,
            PoseUpdate::Corners { id, .. } | PoseUpdate::Vectors { id, .. } => Some(id),
        }
    }
}

/// Which observation shape the estimator emits. Exactly one is active per deployment.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordShape {
    /// `{"id", "corner0".."corner3"}` records.
    Corners = 0,
    /// `{"id", "tvec", "rvec"}` records.
    Vectors = 1,
}

/// Outbound control-message flavour.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolVersion {
    /// `fx,fy,cx,cy` without a terminator; frames stream immediately.
    Legacy = 0,
    /// `fx,fy,cx,cy,width,height\n`; frames wait for `HANDSHAKE_OK`.
    Handshake = 1,
}

/// Remote estimator address. Immutable once a session starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Pinhole intrinsics of the capture camera, forwarded once per session.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Intrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    /// Image width in pixels.
    pub width: u32,
    /// Image height in pixels.
    pub height: u32,
}

/// World-space ray with a unit direction.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    pub origin: [f64; 3],
    pub direction: [f64; 3],
}

/// Session lifecycle.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    Closed = 3,
}

impl SessionState {
    pub(crate) fn from_u8(v: u8) -> SessionState {
        match v {
            1 => SessionState::Connecting,
            2 => SessionState::Connected,
            3 => SessionState::Closed,
            _ => SessionState::Disconnected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pose_identity() {
        let pose = Pose::identity();
        assert_eq!(pose.position, [0.0, 0.0, 0.0]);
        assert_eq!(pose.rotation, [0.0, 0.0, 0.0, 1.0]);
        assert_eq!(Pose::default(), pose);
    }

    #[test]
    fn test_endpoint_display() {
        assert_eq!(Endpoint::new("10.0.0.2", 65432).to_string(), "10.0.0.2:65432");
    }

    #[test]
    fn test_session_state_roundtrip() {
        for state in [
            SessionState::Disconnected,
            SessionState::Connecting,
            SessionState::Connected,
            SessionState::Closed,
        ] {
            assert_eq!(SessionState::from_u8(state as u8), state);
        }
    }
}
