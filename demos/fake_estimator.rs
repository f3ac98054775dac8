//! Stand-in pose estimator for local testing.
//!
//! Accepts sessions on `POSESTREAM_PORT`, reads the newline-terminated
//! intrinsics message, replies `HANDSHAKE_OK`, then answers every received
//! frame with one synthetic record in the configured record shape.
//!
//! Usage: cargo run --example fake_estimator

use posestream::protocol::{self, HANDSHAKE_OK, LINE_TERMINATOR, MAX_FRAME_LEN};
use posestream::{Config, PoseStreamError, RecordShape};
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};

fn main() {
    env_logger::init();

    let config = Config::from_env();
    let addr = format!("0.0.0.0:{}", config.endpoint.port);
    let listener = TcpListener::bind(&addr).unwrap_or_else(|e| {
        eprintln!("Failed to bind {}: {}", addr, e);
        std::process::exit(1);
    });
    eprintln!("Fake estimator listening on {} ({:?} records)", addr, config.record_shape);

    for stream in listener.incoming() {
        let stream = match stream {
            Ok(s) => s,
            Err(e) => {
                eprintln!("accept error: {}", e);
                continue;
            }
        };
        let shape = config.record_shape;
        std::thread::spawn(move || {
            let peer = stream
                .peer_addr()
                .map(|a| a.to_string())
                .unwrap_or_else(|_| "?".into());
            match serve(stream, shape) {
                Ok(frames) => eprintln!("[{}] closed after {} frames", peer, frames),
                Err(e) => eprintln!("[{}] {}", peer, e),
            }
        });
    }
}

fn serve(stream: TcpStream, shape: RecordShape) -> posestream::Result<u64> {
    let mut writer = stream.try_clone()?;
    let mut reader = BufReader::new(stream);

    let mut line = Vec::new();
    reader.read_until(LINE_TERMINATOR, &mut line)?;
    let fields = protocol::parse_intrinsics(&String::from_utf8_lossy(&line))?;
    eprintln!("intrinsics: {:?}", fields);
    writer.write_all(format!("{}\n", HANDSHAKE_OK).as_bytes())?;

    let mut frames = 0u64;
    loop {
        let payload = match protocol::read_frame(&mut reader, MAX_FRAME_LEN) {
            Ok(p) => p,
            Err(PoseStreamError::StreamClosed) => return Ok(frames),
            Err(e) => return Err(e),
        };
        frames += 1;
        log::debug!("frame {} ({} bytes)", frames, payload.len());

        let record = synthetic_record(shape, frames);
        writer.write_all(format!("{}\n", record).as_bytes())?;
    }
}

/// A marker drifting slowly in a circle in front of the camera.
fn synthetic_record(shape: RecordShape, frame: u64) -> serde_json::Value {
    let phase = frame as f64 * 0.05;
    match shape {
        RecordShape::Vectors => serde_json::json!({
            "id": "0",
            "tvec": [0.1 * phase.cos(), 0.1 * phase.sin(), 0.8],
            "rvec": [0.0, 0.2 * phase.sin(), 0.0],
        }),
        RecordShape::Corners => {
            let (cx, cy) = (320.0 + 40.0 * phase.cos(), 240.0 + 40.0 * phase.sin());
            let h = 30.0;
            serde_json::json!({
                "id": "0",
                "corner0": [cx - h, cy - h],
                "corner1": [cx + h, cy - h],
                "corner2": [cx + h, cy + h],
                "corner3": [cx - h, cy + h],
            })
        }
    }
}
