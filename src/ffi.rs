//! C ABI for engine hosts.
//!
//! Opaque handles plus plain `#[repr(C)]` data. The generated header is
//! written to `include/posestream.h` by cbindgen.

use crate::config::Config;
use crate::error::LastError;
use crate::filter::{PoseFilter, SmoothingParams};
use crate::reconstruct::VectorReconstructor;
use crate::session::Session;
use crate::types::{Endpoint, Intrinsics, Pose, PoseUpdate, ProtocolVersion, RecordShape, SessionState};
use crate::PoseStreamError;
use std::ffi::{c_char, c_int, CStr};

thread_local! {
    static LAST_ERROR: LastError = const { LastError::new() };
}

/// Opaque session handle.
pub struct PsSession(Session);

/// Opaque pose filter handle.
pub struct PsPoseFilter(PoseFilter);

/// Kind tag of a [`PsPoseUpdate`].
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PsRecordKind {
    Handshake = 0,
    Corners = 1,
    Vectors = 2,
}

/// Decoded record in C-compatible layout. Only the fields matching `kind` are meaningful.
#[repr(C)]
pub struct PsPoseUpdate {
    pub kind: PsRecordKind,
    /// Null-terminated marker id, truncated to 63 bytes.
    pub id: [c_char; 64],
    /// Pixel corners `[x, y]`, for `Corners`.
    pub corners: [[f64; 2]; 4],
    /// Translation, for `Vectors`.
    pub tvec: [f64; 3],
    /// Axis-angle rotation, for `Vectors`.
    pub rvec: [f64; 3],
}

impl From<&PoseUpdate> for PsPoseUpdate {
    fn from(update: &PoseUpdate) -> Self {
        let mut out = PsPoseUpdate {
            kind: PsRecordKind::Handshake,
            id: str_to_fixed(update.id().unwrap_or_default()),
            corners: [[0.0; 2]; 4],
            tvec: [0.0; 3],
            rvec: [0.0; 3],
        };
        match update {
            PoseUpdate::Handshake => {}
            PoseUpdate::Corners { corners, .. } => {
                out.kind = PsRecordKind::Corners;
                out.corners = *corners;
            }
            PoseUpdate::Vectors { tvec, rvec, .. } => {
                out.kind = PsRecordKind::Vectors;
                out.tvec = *tvec;
                out.rvec = *rvec;
            }
        }
        out
    }
}

fn str_to_fixed<const N: usize>(s: &str) -> [c_char; N] {
    let mut buf = [0 as c_char; N];
    let mut len = s.len().min(N - 1);
    while !s.is_char_boundary(len) {
        len -= 1;
    }
    for (dst, &b) in buf.iter_mut().zip(&s.as_bytes()[..len]) {
        *dst = b as c_char;
    }
    buf
}

fn fail<T>(err: PoseStreamError, value: T) -> T {
    LAST_ERROR.with(|slot| slot.set(&err));
    value
}

/// Connect to an estimator.
///
/// `host` may be null to use `POSESTREAM_HOST`; `port` 0 uses `POSESTREAM_PORT`.
/// `record_shape`: 0 = corners, 1 = vectors. `protocol`: 0 = legacy, 1 = handshake.
/// Any other value keeps the environment/default setting.
/// Returns NULL on error (check `ps_last_error()`).
///
/// # Safety
/// `host` must be a valid null-terminated string, or null.
#[no_mangle]
pub unsafe extern "C" fn ps_connect(
    host: *const c_char,
    port: u16,
    record_shape: c_int,
    protocol: c_int,
) -> *mut PsSession {
    let mut config = Config::from_env();
    if !host.is_null() {
        let host = CStr::from_ptr(host).to_string_lossy().into_owned();
        config.endpoint = Endpoint::new(host, config.endpoint.port);
    }
    if port != 0 {
        config.endpoint.port = port;
    }
    match record_shape {
        0 => config.record_shape = RecordShape::Corners,
        1 => config.record_shape = RecordShape::Vectors,
        _ => {}
    }
    match protocol {
        0 => config.protocol = ProtocolVersion::Legacy,
        1 => config.protocol = ProtocolVersion::Handshake,
        _ => {}
    }

    match Session::connect(&config) {
        Ok(session) => {
            LAST_ERROR.with(LastError::clear);
            Box::into_raw(Box::new(PsSession(session)))
        }
        Err(e) => fail(e, std::ptr::null_mut()),
    }
}

/// Close a session and free it.
///
/// # Safety
/// `session` must be a pointer returned by `ps_connect`, or null.
#[no_mangle]
pub unsafe extern "C" fn ps_close(session: *mut PsSession) {
    if !session.is_null() {
        drop(Box::from_raw(session));
    }
}

/// Send one length-prefixed frame. Returns 0 on success, -1 on error.
///
/// # Safety
/// `session` must be a valid session pointer, or null. `data` must point to
/// `len` readable bytes, or be null when `len` is 0.
#[no_mangle]
pub unsafe extern "C" fn ps_send_frame(session: *const PsSession, data: *const u8, len: usize) -> c_int {
    if session.is_null() || (data.is_null() && len != 0) {
        return fail(PoseStreamError::NotConnected, -1);
    }
    let payload: &[u8] = if len == 0 {
        &[]
    } else {
        std::slice::from_raw_parts(data, len)
    };
    match (*session).0.send_frame(payload) {
        Ok(()) => 0,
        Err(e) => fail(e, -1),
    }
}

/// Send the camera intrinsics message. Returns 0 on success, -1 on error.
///
/// # Safety
/// `session` and `intrinsics` must be valid pointers, or null.
#[no_mangle]
pub unsafe extern "C" fn ps_send_intrinsics(
    session: *const PsSession,
    intrinsics: *const Intrinsics,
) -> c_int {
    if session.is_null() || intrinsics.is_null() {
        return fail(PoseStreamError::NotConnected, -1);
    }
    match (*session).0.send_intrinsics(&*intrinsics) {
        Ok(()) => 0,
        Err(e) => fail(e, -1),
    }
}

/// True once frames may be streamed.
///
/// # Safety
/// `session` must be a valid session pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn ps_is_ready(session: *const PsSession) -> bool {
    !session.is_null() && (*session).0.is_ready()
}

/// Session state: 0 = disconnected, 1 = connecting, 2 = connected, 3 = closed.
///
/// # Safety
/// `session` must be a valid session pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn ps_session_state(session: *const PsSession) -> c_int {
    if session.is_null() {
        return SessionState::Disconnected as c_int;
    }
    (*session).0.state() as c_int
}

/// Pop the oldest decoded record without blocking.
/// Returns 1 if `out` was written, 0 if the queue was empty, -1 on error.
///
/// # Safety
/// `session` and `out` must be valid pointers, or null.
#[no_mangle]
pub unsafe extern "C" fn ps_try_pop(session: *const PsSession, out: *mut PsPoseUpdate) -> c_int {
    if session.is_null() || out.is_null() {
        return -1;
    }
    match (*session).0.try_pop() {
        Some(update) => {
            out.write(PsPoseUpdate::from(&update));
            1
        }
        None => 0,
    }
}

/// Create a pose filter. Null parameter pointers select the tuned defaults.
/// Returns NULL if the parameters are invalid.
///
/// # Safety
/// `position` and `rotation` must be valid pointers, or null.
#[no_mangle]
pub unsafe extern "C" fn ps_filter_new(
    position: *const SmoothingParams,
    rotation: *const SmoothingParams,
) -> *mut PsPoseFilter {
    let position = position.as_ref().copied().unwrap_or(SmoothingParams::POSITION);
    let rotation = rotation.as_ref().copied().unwrap_or(SmoothingParams::ROTATION);
    if let Err(e) = position.validate().and_then(|_| rotation.validate()) {
        return fail(e, std::ptr::null_mut());
    }
    Box::into_raw(Box::new(PsPoseFilter(PoseFilter::new(position, rotation))))
}

/// Smooth one pose sampled at `timestamp` seconds. Returns 0 on success, -1 on error.
///
/// # Safety
/// `filter`, `pose` and `out` must be valid pointers, or null.
#[no_mangle]
pub unsafe extern "C" fn ps_filter_apply(
    filter: *mut PsPoseFilter,
    pose: *const Pose,
    timestamp: f64,
    out: *mut Pose,
) -> c_int {
    if filter.is_null() || pose.is_null() || out.is_null() {
        return -1;
    }
    out.write((*filter).0.apply(*pose, timestamp));
    0
}

/// Replace the filter coefficients. Returns 0 on success, -1 if invalid.
///
/// # Safety
/// All pointers must be valid, or null.
#[no_mangle]
pub unsafe extern "C" fn ps_filter_set_params(
    filter: *mut PsPoseFilter,
    position: *const SmoothingParams,
    rotation: *const SmoothingParams,
) -> c_int {
    let (Some(filter), Some(position), Some(rotation)) =
        (filter.as_mut(), position.as_ref(), rotation.as_ref())
    else {
        return -1;
    };
    match filter.0.set_params(*position, *rotation) {
        Ok(()) => 0,
        Err(e) => fail(e, -1),
    }
}

/// Discard filter history; the next sample passes through unchanged.
///
/// # Safety
/// `filter` must be a valid filter pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn ps_filter_reset(filter: *mut PsPoseFilter) {
    if let Some(filter) = filter.as_mut() {
        filter.0.reset();
    }
}

/// Free a filter.
///
/// # Safety
/// `filter` must be a pointer returned by `ps_filter_new`, or null.
#[no_mangle]
pub unsafe extern "C" fn ps_filter_free(filter: *mut PsPoseFilter) {
    if !filter.is_null() {
        drop(Box::from_raw(filter));
    }
}

/// Compose an estimator translation/rotation-vector pair with a reference pose.
/// `offset` may be null. Returns 0 on success, -1 on error.
///
/// # Safety
/// `reference` and `out` must be valid pointers. `tvec`, `rvec` and a non-null
/// `offset` must each point to 3 doubles.
#[no_mangle]
pub unsafe extern "C" fn ps_reconstruct_vectors(
    reference: *const Pose,
    tvec: *const f64,
    rvec: *const f64,
    offset: *const f64,
    out: *mut Pose,
) -> c_int {
    if reference.is_null() || tvec.is_null() || rvec.is_null() || out.is_null() {
        return -1;
    }
    let read3 = |p: *const f64| [*p, *p.add(1), *p.add(2)];
    let mut reconstructor = VectorReconstructor::new(*reference);
    if !offset.is_null() {
        reconstructor.set_offset(read3(offset));
    }
    match reconstructor.reconstruct_vectors(read3(tvec), read3(rvec)) {
        Ok(pose) => {
            out.write(pose);
            0
        }
        Err(e) => fail(e, -1),
    }
}

/// Last error message recorded on the calling thread, or NULL.
///
/// The pointer stays valid until the next failing `ps_*` call (or successful
/// `ps_connect`) on the same thread. Errors from other threads are not visible.
#[no_mangle]
pub extern "C" fn ps_last_error() -> *const c_char {
    LAST_ERROR.with(LastError::as_ptr)
}
