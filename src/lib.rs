//! # posestream - remote marker-pose streaming client
//!
//! Streams camera frames to a remote pose estimator over TCP and turns the
//! records it sends back into smoothed world-space poses. Provides:
//! - Length-prefixed frame codec and newline-delimited record decoding
//! - A session with a background receive thread and bounded drop-oldest queue
//! - Corner and translation/rotation-vector pose reconstruction
//! - One-euro smoothing for positions and quaternions
//! - C FFI for engine hosts
//!
//! ## Quick Start
//! ```no_run
//! use posestream::{Config, Intrinsics, Pose, Session, Tracker, TickOutcome, VectorReconstructor};
//!
//! let config = Config::from_env();
//! let session = Session::connect(&config).unwrap();
//! session
//!     .send_intrinsics(&Intrinsics { fx: 600.0, fy: 600.0, cx: 320.0, cy: 240.0, width: 640, height: 480 })
//!     .unwrap();
//!
//! let mut tracker = Tracker::from_config(VectorReconstructor::new(Pose::identity()), &config);
//! let start = std::time::Instant::now();
//! loop {
//!     if let TickOutcome::Applied(pose) = tracker.tick(&session, start.elapsed().as_secs_f64()) {
//!         println!("pos: {:?}", pose.position);
//!     }
//!     std::thread::sleep(std::time::Duration::from_millis(16));
//! }
//! ```

pub mod error;
pub mod types;
pub mod protocol;
pub mod queue;
pub mod session;
pub mod filter;
pub mod reconstruct;
pub mod tracker;
pub mod config;
pub mod ffi;

pub use config::Config;
pub use error::PoseStreamError;
pub use filter::{OneEuroFilter, OneEuroQuaternion, OneEuroVector3, PoseFilter, SmoothingParams};
pub use queue::PoseQueue;
pub use reconstruct::{
    CornerReconstructor, EnvironmentRaycaster, RayGenerator, Reconstructor, ReferenceFrame,
    VectorReconstructor,
};
pub use session::{Session, SessionStats};
pub use tracker::{FrameEncoder, PoseSource, TickOutcome, Tracker, TrackerStats};
pub use types::*;

/// Result type alias for posestream operations.
pub type Result<T> = std::result::Result<T, PoseStreamError>;
