use std::cell::RefCell;
use std::ffi::{c_char, CString};

/// Errors that can occur anywhere in the pose-streaming pipeline.
///
/// Nothing here is fatal to the host process. The receive loop and the
/// tracker tick turn every variant into "skip this update".
#[derive(Debug, thiserror::Error)]
pub enum PoseStreamError {
    #[error("Failed to connect to {addr}: {source}")]
    Connection {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Stream closed by peer")]
    StreamClosed,

    #[error("Malformed record: {0}")]
    Decode(String),

    #[error("Ray-cast for corner {corner} reported no hit")]
    NoHit { corner: usize },

    #[error("Marker corners are degenerate (collinear or coincident)")]
    DegenerateGeometry,

    #[error("Record shape does not match the active reconstruction strategy")]
    ShapeMismatch,

    #[error("Session is not connected")]
    NotConnected,

    #[error("Frame payload of {len} bytes exceeds the {max}-byte limit")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid smoothing parameters: {0}")]
    InvalidParams(String),

    #[error("Failed to spawn receive thread: {0}")]
    ThreadSpawn(String),
}

impl PoseStreamError {
    /// True for the reconstruction family of errors (the "invalid sentinel").
    pub fn is_reconstruction_failure(&self) -> bool {
        matches!(
            self,
            PoseStreamError::NoHit { .. }
                | PoseStreamError::DegenerateGeometry
                | PoseStreamError::ShapeMismatch
        )
    }
}

/// Last-error storage for the C FFI layer.
///
/// Meant to live in a `thread_local!`: the pointer from [`as_ptr`](Self::as_ptr)
/// stays valid until the next `set` or `clear` on the same thread.
pub(crate) struct LastError {
    message: RefCell<Option<CString>>,
}

impl LastError {
    pub const fn new() -> Self {
        Self {
            message: RefCell::new(None),
        }
    }

    pub fn set(&self, err: &PoseStreamError) {
        let text = err.to_string().replace('\0', " ");
        *self.message.borrow_mut() = CString::new(text).ok();
    }

    pub fn clear(&self) {
        *self.message.borrow_mut() = None;
    }

    pub fn as_ptr(&self) -> *const c_char {
        self.message
            .borrow()
            .as_ref()
            .map_or(std::ptr::null(), |msg| msg.as_ptr())
    }
}
