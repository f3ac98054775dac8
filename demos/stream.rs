//! Stream synthetic frames to an estimator and print smoothed poses.
//!
//! Pair with the `fake_estimator` demo. Settings come from `POSESTREAM_*`
//! environment variables.
//!
//! Usage: cargo run --example stream
//! Press Ctrl+C to stop.

use posestream::{
    Config, CornerReconstructor, Intrinsics, Pose, Ray, Reconstructor, RecordShape, Session,
    TickOutcome, Tracker, VectorReconstructor,
};
use std::time::{Duration, Instant};

const TICK: Duration = Duration::from_millis(33);

const INTRINSICS: Intrinsics = Intrinsics {
    fx: 600.0,
    fy: 600.0,
    cx: 320.0,
    cy: 240.0,
    width: 640,
    height: 480,
};

/// Distance of the virtual wall the corner strategy ray-casts against.
const WALL_Z: f64 = 1.0;

fn main() {
    env_logger::init();

    let config = Config::from_env();
    let session = match Session::connect(&config) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Failed to connect: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = session.send_intrinsics(&INTRINSICS) {
        eprintln!("Failed to send intrinsics: {}", e);
        std::process::exit(1);
    }

    match config.record_shape {
        RecordShape::Vectors => {
            let reconstructor = VectorReconstructor::new(Pose::identity())
                .with_offset(config.translation_offset);
            run(&session, Tracker::from_config(reconstructor, &config));
        }
        RecordShape::Corners => {
            let reconstructor = CornerReconstructor::new(
                pinhole_ray,
                wall_hit,
                INTRINSICS.width,
                INTRINSICS.height,
            )
            .with_inset(config.marker_inset);
            run(&session, Tracker::from_config(reconstructor, &config));
        }
    }

    let stats = session.stats();
    println!(
        "\nSent {} frames ({} bytes), received {} records, dropped {}, evicted {}",
        stats.frames_sent,
        stats.bytes_sent,
        stats.records_received,
        stats.records_dropped,
        stats.queue_evicted
    );
}

fn run<R: Reconstructor>(session: &Session, mut tracker: Tracker<R>) {
    println!("Streaming to {} (Ctrl+C to stop)...", session.endpoint());

    let start = Instant::now();
    let mut frame_no: u32 = 0;
    let mut encoder = || {
        frame_no = frame_no.wrapping_add(1);
        Some(synthetic_frame(frame_no))
    };

    while session.is_ready() || start.elapsed() < Duration::from_secs(3) {
        if let Err(e) = tracker.stream_frame(session, &mut encoder) {
            eprintln!("Send failed: {}", e);
            break;
        }

        match tracker.tick(session, start.elapsed().as_secs_f64()) {
            TickOutcome::Applied(pose) => {
                if tracker.stats().applied % 30 == 1 {
                    println!(
                        "pos=[{:+.4}, {:+.4}, {:+.4}]  quat=[{:+.3}, {:+.3}, {:+.3}, {:+.3}]",
                        pose.position[0],
                        pose.position[1],
                        pose.position[2],
                        pose.rotation[0],
                        pose.rotation[1],
                        pose.rotation[2],
                        pose.rotation[3],
                    );
                }
            }
            TickOutcome::Failed(e) => log::debug!("reconstruction failed: {}", e),
            TickOutcome::Idle | TickOutcome::Handshake => {}
        }

        if session.state() == posestream::SessionState::Closed {
            break;
        }
        std::thread::sleep(TICK);
    }

    let s = tracker.stats();
    println!(
        "--- {} ticks, {} applied, {} failed, {} frames streamed ---",
        s.ticks, s.applied, s.failed, s.frames_streamed
    );
}

/// Stand-in for a compressed image: a few KB of patterned bytes.
fn synthetic_frame(n: u32) -> Vec<u8> {
    (0..4096u32).map(|i| (i ^ n) as u8).collect()
}

/// Viewport point (bottom-left origin) to a camera-space ray through a pinhole.
fn pinhole_ray(viewport: [f64; 2]) -> Ray {
    let x = (viewport[0] * INTRINSICS.width as f64 - INTRINSICS.cx) / INTRINSICS.fx;
    let y = (viewport[1] * INTRINSICS.height as f64 - INTRINSICS.cy) / INTRINSICS.fy;
    let len = (x * x + y * y + 1.0).sqrt();
    Ray {
        origin: [0.0; 3],
        direction: [x / len, y / len, 1.0 / len],
    }
}

fn wall_hit(ray: &Ray) -> Option<[f64; 3]> {
    if ray.direction[2] <= 0.0 {
        return None;
    }
    let t = (WALL_Z - ray.origin[2]) / ray.direction[2];
    Some([
        ray.origin[0] + t * ray.direction[0],
        ray.origin[1] + t * ray.direction[1],
        WALL_Z,
    ])
}
