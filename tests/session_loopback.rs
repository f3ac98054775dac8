//! End-to-end session tests against a scripted estimator on 127.0.0.1.

use posestream::protocol::{self, HANDSHAKE_OK};
use posestream::{
    Config, Endpoint, Intrinsics, PoseStreamError, PoseUpdate, ProtocolVersion, RecordShape,
    Session, SessionState,
};
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const INTRINSICS: Intrinsics = Intrinsics {
    fx: 100.0,
    fy: 100.0,
    cx: 50.0,
    cy: 50.0,
    width: 640,
    height: 480,
};

fn config(port: u16, protocol: ProtocolVersion) -> Config {
    Config {
        endpoint: Endpoint::new("127.0.0.1", port),
        protocol,
        record_shape: RecordShape::Vectors,
        ..Config::default()
    }
}

/// Run `script` against the first accepted connection.
fn estimator<F>(script: F) -> (u16, JoinHandle<()>)
where
    F: FnOnce(TcpStream) + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = std::thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        script(stream);
    });
    (port, handle)
}

fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        std::thread::sleep(Duration::from_millis(2));
    }
}

#[test]
fn test_handshake_frames_and_records() {
    let _ = env_logger::builder().is_test(true).try_init();

    let (tx, rx) = mpsc::channel::<Vec<u8>>();
    let (done_tx, done_rx) = mpsc::channel::<()>();
    let (port, server) = estimator(move |stream| {
        let mut writer = stream.try_clone().unwrap();
        let mut reader = BufReader::new(stream);

        let mut line = Vec::new();
        reader.read_until(b'\n', &mut line).unwrap();
        tx.send(line).unwrap();
        writer.write_all(format!("{}\n", HANDSHAKE_OK).as_bytes()).unwrap();

        let mut frame = [0u8; 14];
        reader.read_exact(&mut frame).unwrap();
        tx.send(frame.to_vec()).unwrap();

        // One record dribbled a byte at a time, a malformed line, then another record.
        for b in b"{\"id\":\"t\",\"tvec\":[1,2,3],\"rvec\":[0,0,0]}\n" {
            writer.write_all(&[*b]).unwrap();
            writer.flush().unwrap();
        }
        writer.write_all(b"not json at all\n").unwrap();
        writer
            .write_all(b"{\"id\":\"u\",\"tvec\":[4,5,6],\"rvec\":[0,0,1]}\n")
            .unwrap();

        let _ = done_rx.recv_timeout(Duration::from_secs(5));
    });

    let session = Session::connect(&config(port, ProtocolVersion::Handshake)).unwrap();
    assert_eq!(session.state(), SessionState::Connected);
    assert!(!session.is_ready());

    session.send_intrinsics(&INTRINSICS).unwrap();
    let line = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    let text = String::from_utf8(line).unwrap();
    assert_eq!(text, "100.0,100.0,50.0,50.0,640,480\n");
    assert_eq!(
        protocol::parse_intrinsics(&text).unwrap(),
        vec![100.0, 100.0, 50.0, 50.0, 640.0, 480.0]
    );

    wait_until("handshake", || session.is_ready());

    session.send_frame(&[9u8; 10]).unwrap();
    let frame = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(frame.len(), 14);
    assert_eq!(u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]), 10);
    assert!(frame[4..].iter().all(|&b| b == 9));

    let mut records = Vec::new();
    wait_until("two records", || {
        while let Some(r) = session.try_pop() {
            records.push(r);
        }
        records.len() >= 2
    });
    assert_eq!(
        records[0],
        PoseUpdate::Vectors {
            id: "t".into(),
            tvec: [1.0, 2.0, 3.0],
            rvec: [0.0, 0.0, 0.0],
        }
    );
    assert_eq!(records[1].id(), Some("u"));

    let stats = session.stats();
    assert_eq!(stats.frames_sent, 1);
    assert_eq!(stats.records_received, 2);
    assert_eq!(stats.records_dropped, 1);

    session.close();
    assert_eq!(session.state(), SessionState::Closed);
    session.close();
    assert!(matches!(session.send_frame(&[1]), Err(PoseStreamError::NotConnected)));

    done_tx.send(()).unwrap();
    server.join().unwrap();
}

#[test]
fn test_legacy_protocol_is_ready_immediately() {
    let (tx, rx) = mpsc::channel::<String>();
    let expected = "100.0,100.0,50.0,50.0";
    let (port, server) = estimator(move |mut stream| {
        let mut buf = vec![0u8; expected.len()];
        stream.read_exact(&mut buf).unwrap();
        tx.send(String::from_utf8(buf).unwrap()).unwrap();
    });

    let session = Session::connect(&config(port, ProtocolVersion::Legacy)).unwrap();
    assert!(session.is_ready());
    session.send_intrinsics(&INTRINSICS).unwrap();

    let text = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(text, expected);
    assert_eq!(protocol::parse_intrinsics(&text).unwrap().len(), 4);
    server.join().unwrap();
}

#[test]
fn test_peer_close_transitions_to_closed() {
    let (port, server) = estimator(|stream| drop(stream));

    let session = Session::connect(&config(port, ProtocolVersion::Handshake)).unwrap();
    server.join().unwrap();

    wait_until("closed", || session.state() == SessionState::Closed);
    assert!(!session.is_ready());
    assert!(matches!(session.send_frame(&[0; 4]), Err(PoseStreamError::NotConnected)));
    // Not connected: logged and skipped.
    session.send_intrinsics(&INTRINSICS).unwrap();
}

#[test]
fn test_stalled_consumer_drops_oldest() {
    let (done_tx, done_rx) = mpsc::channel::<()>();
    let (port, server) = estimator(move |mut stream| {
        for n in 0..5 {
            let line = format!("{{\"id\":\"{}\",\"tvec\":[0,0,{}],\"rvec\":[0,0,0]}}\n", n, n);
            stream.write_all(line.as_bytes()).unwrap();
        }
        let _ = done_rx.recv_timeout(Duration::from_secs(5));
    });

    let session = Session::connect(&Config {
        queue_capacity: 2,
        ..config(port, ProtocolVersion::Handshake)
    })
    .unwrap();

    wait_until("five records", || session.stats().records_received == 5);
    assert_eq!(session.queue().len(), 2);
    assert_eq!(session.stats().queue_evicted, 3);
    assert_eq!(session.try_pop().and_then(|r| r.id().map(String::from)), Some("3".into()));
    assert_eq!(session.try_pop().and_then(|r| r.id().map(String::from)), Some("4".into()));

    done_tx.send(()).unwrap();
    server.join().unwrap();
}

#[test]
fn test_unterminated_flood_is_discarded() {
    let (done_tx, done_rx) = mpsc::channel::<()>();
    let (port, server) = estimator(move |mut stream| {
        // Far past the line cap with no newline, then a valid record.
        let junk = vec![b'x'; 16 * 1024];
        for _ in 0..4 {
            stream.write_all(&junk).unwrap();
        }
        stream.write_all(b"\n").unwrap();
        stream
            .write_all(b"{\"id\":\"after\",\"tvec\":[0,0,1],\"rvec\":[0,0,0]}\n")
            .unwrap();
        let _ = done_rx.recv_timeout(Duration::from_secs(5));
    });

    let session = Session::connect(&Config {
        max_line_len: 1024,
        ..config(port, ProtocolVersion::Handshake)
    })
    .unwrap();

    wait_until("record after flood", || session.stats().records_received == 1);
    assert_eq!(session.try_pop().and_then(|r| r.id().map(String::from)), Some("after".into()));
    assert_eq!(session.stats().records_dropped, 1);
    assert_eq!(session.state(), SessionState::Connected);

    done_tx.send(()).unwrap();
    server.join().unwrap();
}

#[test]
fn test_oversized_frame_rejected() {
    let (done_tx, done_rx) = mpsc::channel::<()>();
    let (port, server) = estimator(move |_stream| {
        let _ = done_rx.recv_timeout(Duration::from_secs(5));
    });

    let session = Session::connect(&Config {
        max_frame_len: 8,
        ..config(port, ProtocolVersion::Legacy)
    })
    .unwrap();

    match session.send_frame(&[0u8; 9]) {
        Err(PoseStreamError::PayloadTooLarge { len, max }) => {
            assert_eq!((len, max), (9, 8));
        }
        other => panic!("unexpected result: {:?}", other),
    }
    assert_eq!(session.stats().frames_sent, 0);

    drop(session);
    done_tx.send(()).unwrap();
    server.join().unwrap();
}

#[test]
fn test_connect_failure() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let err = Session::connect(&config(port, ProtocolVersion::Handshake))
        .err()
        .expect("nothing is listening");
    assert!(matches!(err, PoseStreamError::Connection { .. }));
}
