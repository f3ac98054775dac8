use crate::config::Config;
use crate::filter::{PoseFilter, SmoothingParams};
use crate::queue::PoseQueue;
use crate::reconstruct::Reconstructor;
use crate::session::Session;
use crate::types::{Pose, PoseUpdate};
use crate::{PoseStreamError, Result};

/// Anything the consumer can pull decoded records from without blocking.
pub trait PoseSource {
    fn next_update(&self) -> Option<PoseUpdate>;
}

impl PoseSource for PoseQueue {
    fn next_update(&self) -> Option<PoseUpdate> {
        self.try_pop()
    }
}

impl PoseSource for Session {
    fn next_update(&self) -> Option<PoseUpdate> {
        self.try_pop()
    }
}

/// Produces one compressed image per capture tick, or `None` when no
/// image is available yet.
pub trait FrameEncoder {
    fn encode(&mut self) -> Option<Vec<u8>>;
}

impl<F: FnMut() -> Option<Vec<u8>>> FrameEncoder for F {
    fn encode(&mut self) -> Option<Vec<u8>> {
        self()
    }
}

/// What a single consumer tick did.
#[derive(Debug)]
pub enum TickOutcome {
    /// Nothing was queued.
    Idle,
    /// A handshake sentinel was dequeued; no pose produced.
    Handshake,
    /// A record was reconstructed and smoothed into this pose.
    Applied(Pose),
    /// Reconstruction failed; the filter was left untouched.
    Failed(PoseStreamError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackerStats {
    pub ticks: u64,
    pub applied: u64,
    pub failed: u64,
    pub frames_streamed: u64,
}

/// Consumer side of the pipeline, driven at an external cadence.
///
/// Each `tick` takes at most one record (oldest first), reconstructs it
/// into a world pose and smooths it. Backlog drains one record per tick.
pub struct Tracker<R> {
    reconstructor: R,
    filter: PoseFilter,
    last_pose: Option<Pose>,
    stats: TrackerStats,
}

impl<R: Reconstructor> Tracker<R> {
    pub fn new(reconstructor: R, filter: PoseFilter) -> Self {
        Self {
            reconstructor,
            filter,
            last_pose: None,
            stats: TrackerStats::default(),
        }
    }

    /// Tracker with the smoothing parameters from `config`.
    pub fn from_config(reconstructor: R, config: &Config) -> Self {
        Self::new(reconstructor, PoseFilter::new(config.position, config.rotation))
    }

    /// Process at most one queued record. `now` is in seconds.
    pub fn tick<S: PoseSource + ?Sized>(&mut self, source: &S, now: f64) -> TickOutcome {
        self.stats.ticks += 1;

        let update = match source.next_update() {
            Some(update) => update,
            None => return TickOutcome::Idle,
        };
        if update == PoseUpdate::Handshake {
            return TickOutcome::Handshake;
        }

        match self.reconstructor.reconstruct(&update) {
            Ok(pose) => {
                let smoothed = self.filter.apply(pose, now);
                self.last_pose = Some(smoothed);
                self.stats.applied += 1;
                TickOutcome::Applied(smoothed)
            }
            Err(e) => {
                self.stats.failed += 1;
                log::debug!(
                    "Skipping record {:?}: {}",
                    update.id().unwrap_or_default(),
                    e
                );
                TickOutcome::Failed(e)
            }
        }
    }

    /// Encode and send one frame if the session is ready for it.
    ///
    /// Returns `Ok(false)` when nothing was sent (session not ready yet, or
    /// the encoder had no image). The encoder is not invoked before the
    /// session is ready.
    pub fn stream_frame<E: FrameEncoder + ?Sized>(
        &mut self,
        session: &Session,
        encoder: &mut E,
    ) -> Result<bool> {
        if !session.is_ready() {
            return Ok(false);
        }
        let payload = match encoder.encode() {
            Some(payload) => payload,
            None => return Ok(false),
        };
        session.send_frame(&payload)?;
        self.stats.frames_streamed += 1;
        Ok(true)
    }

    /// Apply new smoothing parameters before the next evaluation.
    /// Invalid parameters are rejected and the current ones kept.
    pub fn set_params(&mut self, position: SmoothingParams, rotation: SmoothingParams) -> Result<()> {
        self.filter.set_params(position, rotation)
    }

    /// Discard filter history and the last applied pose.
    pub fn reset(&mut self) {
        self.filter.reset();
        self.last_pose = None;
    }

    /// Most recent smoothed pose, if any record has been applied.
    pub fn last_pose(&self) -> Option<Pose> {
        self.last_pose
    }

    pub fn stats(&self) -> TrackerStats {
        self.stats
    }

    pub fn reconstructor(&self) -> &R {
        &self.reconstructor
    }

    pub fn reconstructor_mut(&mut self) -> &mut R {
        &mut self.reconstructor
    }

    pub fn filter(&self) -> &PoseFilter {
        &self.filter
    }
}
