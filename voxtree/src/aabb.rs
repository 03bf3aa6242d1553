use nalgebra::Vector3;

/// Axis-aligned box kept as its two extreme corners.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vector3<f32>,
    pub max: Vector3<f32>,
}

impl Aabb {
    pub fn new(min: Vector3<f32>, max: Vector3<f32>) -> Self {
        Self { min, max }
    }

    /// A degenerate box containing only `p`, ready to be grown.
    pub fn from_point(p: Vector3<f32>) -> Self {
        Self { min: p, max: p }
    }

    pub fn grow(&mut self, p: Vector3<f32>) {
        for i in 0..3 {
            if p[i] < self.min[i] {
                self.min[i] = p[i];
            }
            if p[i] > self.max[i] {
                self.max[i] = p[i];
            }
        }
    }

    pub fn merge(&mut self, other: &Aabb) {
        self.grow(other.min);
        self.grow(other.max);
    }

    pub fn center(&self) -> Vector3<f32> {
        (self.min + self.max) * 0.5
    }

    pub fn extents(&self) -> Vector3<f32> {
        self.max - self.min
    }

    /// Index of the widest axis.
    pub fn widest_axis(&self) -> usize {
        let e = self.extents();
        let mut axis = 0;
        if e.y > e[axis] {
            axis = 1;
        }
        if e.z > e[axis] {
            axis = 2;
        }
        axis
    }

    pub fn overlaps(&self, other: &Aabb) -> bool {
        (0..3).all(|i| self.min[i] <= other.max[i] && other.min[i] <= self.max[i])
    }

    /// Squared distance from `p` to the closest point of the box. Zero inside.
    pub fn min_sq_dist(&self, p: Vector3<f32>) -> f32 {
        let mut d = 0.0;
        for i in 0..3 {
            let v = if p[i] < self.min[i] {
                self.min[i] - p[i]
            } else if p[i] > self.max[i] {
                p[i] - self.max[i]
            } else {
                0.0
            };
            d += v * v;
        }
        d
    }

    /// Squared distance from `p` to the farthest point of the box.
    pub fn max_sq_dist(&self, p: Vector3<f32>) -> f32 {
        let mut d = 0.0;
        for i in 0..3 {
            let v = (p[i] - self.min[i]).abs().max((p[i] - self.max[i]).abs());
            d += v * v;
        }
        d
    }

    /// Whether the sphere surface of `radius` around `center` passes through the box.
    pub fn intersects_sphere_surface(&self, center: Vector3<f32>, radius: f32) -> bool {
        let r2 = radius * radius;
        self.min_sq_dist(center) <= r2 && r2 <= self.max_sq_dist(center)
    }
}
