use nalgebra::{Matrix3, Vector3};

/// Rigid motion stored as 12 floats: the 3x3 rotation row-major in entries
/// 0..9, the translation in entries 9..12.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RigidTransform([f32; 12]);

impl RigidTransform {
    pub fn identity() -> Self {
        Self::from_parts(Matrix3::identity(), Vector3::zeros())
    }

    pub fn from_parts(rotation: Matrix3<f32>, translation: Vector3<f32>) -> Self {
        let mut e = [0.0; 12];
        for row in 0..3 {
            for col in 0..3 {
                e[row * 3 + col] = rotation[(row, col)];
            }
            e[9 + row] = translation[row];
        }
        Self(e)
    }

    pub fn from_array(entries: [f32; 12]) -> Self {
        Self(entries)
    }

    pub fn as_array(&self) -> [f32; 12] {
        self.0
    }

    pub fn rotation(&self) -> Matrix3<f32> {
        let e = &self.0;
        Matrix3::new(e[0], e[1], e[2], e[3], e[4], e[5], e[6], e[7], e[8])
    }

    pub fn translation(&self) -> Vector3<f32> {
        Vector3::new(self.0[9], self.0[10], self.0[11])
    }

    pub fn rotate(&self, v: Vector3<f32>) -> Vector3<f32> {
        let e = &self.0;
        Vector3::new(
            e[0] * v.x + e[1] * v.y + e[2] * v.z,
            e[3] * v.x + e[4] * v.y + e[5] * v.z,
            e[6] * v.x + e[7] * v.y + e[8] * v.z,
        )
    }

    pub fn apply(&self, p: Vector3<f32>) -> Vector3<f32> {
        self.rotate(p) + self.translation()
    }

    /// `self` applied after `inner`: `a.compose(b).apply(p) == a.apply(b.apply(p))`.
    pub fn compose(&self, inner: &RigidTransform) -> RigidTransform {
        let r = self.rotation() * inner.rotation();
        let t = self.rotate(inner.translation()) + self.translation();
        RigidTransform::from_parts(r, t)
    }
}
