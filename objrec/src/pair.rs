use nalgebra::{Matrix3, Vector3};

/// Two oriented scene samples drawn roughly one pair width apart.
#[derive(Debug, Clone, Copy)]
pub struct OrientedPointPair {
    pub p1: Vector3<f32>,
    pub n1: Vector3<f32>,
    pub p2: Vector3<f32>,
    pub n2: Vector3<f32>,
}

/// Rotation/translation-invariant description of an oriented point pair:
/// the point distance and the three angles between the normals and the
/// connecting line. `angle3` (the normal-to-normal angle) is not part of the
/// table key; it prunes candidates within a cell.
#[derive(Debug, Clone, Copy)]
pub struct PairSignature {
    pub distance: f32,
    pub angle1: f32,
    pub angle2: f32,
    pub angle3: f32,
}

impl PairSignature {
    pub fn of(p1: Vector3<f32>, n1: Vector3<f32>, p2: Vector3<f32>, n2: Vector3<f32>) -> Self {
        let diff = p2 - p1;
        let distance = diff.norm();
        let d = diff / distance;
        Self {
            distance,
            angle1: n1.dot(&d).clamp(-1.0, 1.0).acos(),
            angle2: n2.dot(&d).clamp(-1.0, 1.0).acos(),
            angle3: n1.dot(&n2).clamp(-1.0, 1.0).acos(),
        }
    }
}

/// A pair is coplanar when either normal is within `max_angle` of being
/// perpendicular to the connecting line. `d` must be unit length.
pub fn is_coplanar(
    n1: Vector3<f32>,
    n2: Vector3<f32>,
    d: Vector3<f32>,
    max_angle: f32,
) -> bool {
    let threshold = max_angle.sin();
    n1.dot(&d).abs() < threshold || n2.dot(&d).abs() < threshold
}

/// Orthonormal frame of an oriented pair: origin at the midpoint, x along the
/// connecting line, y the part of `n1` orthogonal to x. A degenerate pair
/// (normal parallel to the line) falls back to completing the basis from the
/// coordinate axis least aligned with x.
pub fn pair_frame(
    p1: Vector3<f32>,
    n1: Vector3<f32>,
    p2: Vector3<f32>,
) -> (Matrix3<f32>, Vector3<f32>) {
    let origin = (p1 + p2) * 0.5;
    let x = (p2 - p1).normalize();
    let mut y = n1 - x * n1.dot(&x);
    if y.norm() < 1e-5 {
        let mut axis = 0;
        for i in 1..3 {
            if x[i].abs() < x[axis].abs() {
                axis = i;
            }
        }
        let mut e = Vector3::zeros();
        e[axis] = 1.0;
        y = e - x * e.dot(&x);
    }
    let y = y.normalize();
    let z = x.cross(&y);
    (Matrix3::from_columns(&[x, y, z]), origin)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_invariant_under_rigid_motion() {
        let p1 = Vector3::new(0.0, 0.0, 0.0);
        let n1 = Vector3::new(0.0, 0.0, 1.0);
        let p2 = Vector3::new(0.05, 0.0, 0.0);
        let n2 = Vector3::new(0.0, 1.0, 0.0);
        let a = PairSignature::of(p1, n1, p2, n2);

        let rot = nalgebra::Rotation3::from_euler_angles(0.7, -0.3, 1.9);
        let shift = Vector3::new(0.4, -0.2, 0.9);
        let b = PairSignature::of(
            rot * p1 + shift,
            rot * n1,
            rot * p2 + shift,
            rot * n2,
        );
        assert!((a.distance - b.distance).abs() < 1e-5);
        assert!((a.angle1 - b.angle1).abs() < 1e-4);
        assert!((a.angle2 - b.angle2).abs() < 1e-4);
        assert!((a.angle3 - b.angle3).abs() < 1e-4);
    }

    #[test]
    fn test_coplanarity() {
        let d = Vector3::new(1.0, 0.0, 0.0);
        let up = Vector3::new(0.0, 0.0, 1.0);
        let tilted = Vector3::new(0.5, 0.0, 0.866_025_4);
        let max_angle = 3.0f32.to_radians();
        // both normals perpendicular to the line
        assert!(is_coplanar(up, up, d, max_angle));
        // one normal well off the perpendicular is not enough
        assert!(is_coplanar(tilted, up, d, max_angle));
        assert!(!is_coplanar(tilted, tilted, d, max_angle));
    }

    #[test]
    fn test_pair_frame_orthonormal() {
        let (frame, origin) = pair_frame(
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(0.1, 0.2, 0.97).normalize(),
            Vector3::new(0.05, 0.0, 0.0),
        );
        assert!((origin - Vector3::new(0.025, 0.0, 0.0)).norm() < 1e-6);
        let should_be_identity = frame.transpose() * frame;
        assert!((should_be_identity - Matrix3::identity()).norm() < 1e-5);
        // right-handed
        let x = frame.column(0).into_owned();
        let y = frame.column(1).into_owned();
        let z = frame.column(2).into_owned();
        assert!((x.cross(&y) - z).norm() < 1e-5);
    }

    #[test]
    fn test_pair_frame_degenerate_normal() {
        // normal parallel to the connecting line
        let (frame, _) = pair_frame(
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(0.05, 0.0, 0.0),
        );
        let should_be_identity = frame.transpose() * frame;
        assert!((should_be_identity - Matrix3::identity()).norm() < 1e-5);
    }
}
