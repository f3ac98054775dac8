//! Convert decoded [`PoseUpdate`] records into world-space [`Pose`]s.
//!
//! Two strategies exist, one per record shape. Both report an error (the
//! "invalid" result) instead of a partial transform; callers skip smoothing
//! for that tick.

use crate::types::{Pose, PoseUpdate, Ray};
use crate::{PoseStreamError, Result};
use nalgebra::{Quaternion, Unit, UnitQuaternion, Vector3};

/// Default inset (meters) from the marker plane to the tracked object's center.
pub const DEFAULT_MARKER_INSET: f64 = 0.02;

/// Edge or normal lengths below this are treated as degenerate.
const GEOMETRY_EPSILON: f64 = 1e-9;

/// Maps a normalized viewport coordinate (origin bottom-left) to a world-space ray.
pub trait RayGenerator {
    fn viewport_point_to_ray(&self, viewport: [f64; 2]) -> Ray;
}

impl<F: Fn([f64; 2]) -> Ray> RayGenerator for F {
    fn viewport_point_to_ray(&self, viewport: [f64; 2]) -> Ray {
        self(viewport)
    }
}

/// Intersects a ray with the environment mesh.
pub trait EnvironmentRaycaster {
    /// Hit point, or `None` when the ray misses.
    fn raycast(&self, ray: &Ray) -> Option<[f64; 3]>;
}

impl<F: Fn(&Ray) -> Option<[f64; 3]>> EnvironmentRaycaster for F {
    fn raycast(&self, ray: &Ray) -> Option<[f64; 3]> {
        self(ray)
    }
}

/// Live pose of the tracked reference point (typically the capture camera).
pub trait ReferenceFrame {
    fn reference_pose(&self) -> Pose;
}

impl<F: Fn() -> Pose> ReferenceFrame for F {
    fn reference_pose(&self) -> Pose {
        self()
    }
}

/// A fixed reference frame, e.g. for a static rig or tests.
impl ReferenceFrame for Pose {
    fn reference_pose(&self) -> Pose {
        *self
    }
}

/// Strategy interface used by the tracker.
pub trait Reconstructor {
    fn reconstruct(&self, update: &PoseUpdate) -> Result<Pose>;
}

fn vec3(v: [f64; 3]) -> Vector3<f64> {
    Vector3::new(v[0], v[1], v[2])
}

fn unit_quat(q: [f64; 4]) -> UnitQuaternion<f64> {
    UnitQuaternion::from_quaternion(Quaternion::new(q[3], q[0], q[1], q[2]))
}

/// Finite pose, or `DegenerateGeometry` if any component overflowed to inf/NaN.
fn to_pose(position: Vector3<f64>, rotation: UnitQuaternion<f64>) -> Result<Pose> {
    let c = rotation.quaternion().coords;
    let pose = Pose::new([position.x, position.y, position.z], [c.x, c.y, c.z, c.w]);
    if pose
        .position
        .iter()
        .chain(pose.rotation.iter())
        .all(|v| v.is_finite())
    {
        Ok(pose)
    } else {
        Err(PoseStreamError::DegenerateGeometry)
    }
}

/// Pixel corner to normalized viewport coordinate, flipping Y to a bottom-left origin.
pub fn pixel_to_viewport(pixel: [f64; 2], width: u32, height: u32) -> [f64; 2] {
    [
        pixel[0] / width as f64,
        1.0 - pixel[1] / height as f64,
    ]
}

/// Reconstructs a marker pose from its image-space corners by ray-casting
/// three of them (0, 1 and 3) into the environment.
pub struct CornerReconstructor<G, C> {
    rays: G,
    raycaster: C,
    width: u32,
    height: u32,
    inset: f64,
}

impl<G: RayGenerator, C: EnvironmentRaycaster> CornerReconstructor<G, C> {
    pub fn new(rays: G, raycaster: C, width: u32, height: u32) -> Self {
        Self {
            rays,
            raycaster,
            width,
            height,
            inset: DEFAULT_MARKER_INSET,
        }
    }

    pub fn with_inset(mut self, inset: f64) -> Self {
        self.inset = inset;
        self
    }

    /// Update the capture resolution used for pixel normalization.
    pub fn set_resolution(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
    }

    fn hit(&self, corners: &[[f64; 2]; 4], index: usize) -> Result<Vector3<f64>> {
        let viewport = pixel_to_viewport(corners[index], self.width, self.height);
        let ray = self.rays.viewport_point_to_ray(viewport);
        let hit = self
            .raycaster
            .raycast(&ray)
            .ok_or(PoseStreamError::NoHit { corner: index })?;
        if !hit.iter().all(|v| v.is_finite()) {
            return Err(PoseStreamError::DegenerateGeometry);
        }
        Ok(vec3(hit))
    }

    pub fn reconstruct_corners(&self, corners: &[[f64; 2]; 4]) -> Result<Pose> {
        if self.width == 0 || self.height == 0 {
            return Err(PoseStreamError::DegenerateGeometry);
        }
        let p0 = self.hit(corners, 0)?;
        let p1 = self.hit(corners, 1)?;
        let p3 = self.hit(corners, 3)?;

        let edge1 = p1 - p0;
        let edge3 = p3 - p0;
        let normal = edge1
            .cross(&edge3)
            .try_normalize(GEOMETRY_EPSILON)
            .ok_or(PoseStreamError::DegenerateGeometry)?;
        let edge1_dir = edge1
            .try_normalize(GEOMETRY_EPSILON)
            .ok_or(PoseStreamError::DegenerateGeometry)?;

        let position = p0 + edge1 / 2.0 + edge3 / 2.0 - normal * self.inset;
        let forward = normal.cross(&edge1_dir);
        let rotation = UnitQuaternion::face_towards(&forward, &normal);

        to_pose(position, rotation)
    }
}

impl<G: RayGenerator, C: EnvironmentRaycaster> Reconstructor for CornerReconstructor<G, C> {
    fn reconstruct(&self, update: &PoseUpdate) -> Result<Pose> {
        match update {
            PoseUpdate::Corners { corners, .. } => self.reconstruct_corners(corners),
            _ => Err(PoseStreamError::ShapeMismatch),
        }
    }
}

/// Convert an estimator (right-handed, Y-down) translation + axis-angle pair into
/// the consumer's left-handed, Y-up convention.
///
/// Coordinate-system adapter: Y translation is negated; the rotation axis has
/// its Y component negated and the angle is negated. These constants belong to
/// one specific producer/consumer pairing and must be re-verified for any other.
pub fn estimator_to_local(tvec: [f64; 3], rvec: [f64; 3]) -> (Vector3<f64>, UnitQuaternion<f64>) {
    let translation = Vector3::new(tvec[0], -tvec[1], tvec[2]);

    let r = vec3(rvec);
    let angle = r.norm();
    let rotation = if angle > f64::EPSILON {
        let axis = Vector3::new(r.x, -r.y, r.z) / angle;
        UnitQuaternion::from_axis_angle(&Unit::new_unchecked(axis), -angle)
    } else {
        UnitQuaternion::identity()
    };
    (translation, rotation)
}

/// Reconstructs a marker pose from a translation/rotation-vector pair
/// expressed relative to a live reference frame.
pub struct VectorReconstructor<F> {
    reference: F,
    offset: [f64; 3],
}

impl<F: ReferenceFrame> VectorReconstructor<F> {
    pub fn new(reference: F) -> Self {
        Self {
            reference,
            offset: [0.0; 3],
        }
    }

    pub fn with_offset(mut self, offset: [f64; 3]) -> Self {
        self.offset = offset;
        self
    }

    /// Local-frame translation offset, adjustable at runtime.
    pub fn set_offset(&mut self, offset: [f64; 3]) {
        self.offset = offset;
    }

    pub fn offset(&self) -> [f64; 3] {
        self.offset
    }

    pub fn reconstruct_vectors(&self, tvec: [f64; 3], rvec: [f64; 3]) -> Result<Pose> {
        if !tvec.iter().chain(rvec.iter()).all(|v| v.is_finite()) {
            return Err(PoseStreamError::DegenerateGeometry);
        }
        // Finite components can still overflow the rotation angle.
        if !vec3(rvec).norm().is_finite() {
            return Err(PoseStreamError::DegenerateGeometry);
        }
        let (translation, local_rotation) = estimator_to_local(tvec, rvec);

        let reference = self.reference.reference_pose();
        let ref_rotation = unit_quat(reference.rotation);
        let position = vec3(reference.position) + ref_rotation * (translation + vec3(self.offset));
        let rotation = ref_rotation * local_rotation;

        to_pose(position, rotation)
    }
}

impl<F: ReferenceFrame> Reconstructor for VectorReconstructor<F> {
    fn reconstruct(&self, update: &PoseUpdate) -> Result<Pose> {
        match update {
            PoseUpdate::Vectors { tvec, rvec, .. } => self.reconstruct_vectors(*tvec, *rvec),
            _ => Err(PoseStreamError::ShapeMismatch),
        }
    }
}
