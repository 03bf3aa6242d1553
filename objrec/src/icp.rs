use nalgebra::{Matrix3, Vector3};
use voxtree::Octree;

use crate::transform::RigidTransform;

const MAX_ITERATIONS: usize = 64;

/// Trimmed iterative closest point against the scene octree. Each round pairs
/// every source point with its nearest scene leaf, keeps only the
/// `num_inliers` best correspondences, and solves the rigid motion of the
/// kept set in closed form. Iteration stops once the trimmed energy stops
/// improving by more than the configured ratio.
pub struct TrimmedIcp<'a> {
    target: &'a Octree,
    new_to_old_energy_ratio: f32,
}

impl<'a> TrimmedIcp<'a> {
    pub fn new(target: &'a Octree) -> Self {
        Self {
            target,
            new_to_old_energy_ratio: 0.99,
        }
    }

    pub fn set_new_to_old_energy_ratio(&mut self, ratio: f32) {
        self.new_to_old_energy_ratio = ratio;
    }

    /// Refines `transform` in place. Does nothing when fewer than three
    /// inliers are requested or available.
    pub fn align(
        &self,
        source: &[Vector3<f32>],
        num_inliers: usize,
        transform: &mut RigidTransform,
    ) {
        let num_inliers = num_inliers.min(source.len());
        if num_inliers < 3 || self.target.is_empty() {
            return;
        }

        let mut old_energy = f32::INFINITY;
        for _ in 0..MAX_ITERATIONS {
            let mut correspondences: Vec<(f32, Vector3<f32>, Vector3<f32>)> = source
                .iter()
                .filter_map(|&p| {
                    let moved = transform.apply(p);
                    self.target
                        .nearest_full_leaf(moved)
                        .map(|leaf| ((leaf.point - moved).norm_squared(), moved, leaf.point))
                })
                .collect();
            correspondences.sort_by(|a, b| a.0.total_cmp(&b.0));
            correspondences.truncate(num_inliers);
            if correspondences.len() < 3 {
                return;
            }

            let energy: f32 = correspondences.iter().map(|c| c.0).sum();
            if energy <= f32::EPSILON || energy / old_energy > self.new_to_old_energy_ratio {
                break;
            }
            old_energy = energy;

            let inv = 1.0 / correspondences.len() as f32;
            let mut src_centroid = Vector3::zeros();
            let mut dst_centroid = Vector3::zeros();
            for &(_, src, dst) in &correspondences {
                src_centroid += src;
                dst_centroid += dst;
            }
            src_centroid *= inv;
            dst_centroid *= inv;

            let mut cross_covariance = Matrix3::zeros();
            for &(_, src, dst) in &correspondences {
                cross_covariance += (dst - dst_centroid) * (src - src_centroid).transpose();
            }

            let svd = cross_covariance.svd(true, true);
            let (Some(u), Some(v_t)) = (svd.u, svd.v_t) else {
                return;
            };
            let mut rotation = u * v_t;
            if rotation.determinant() < 0.0 {
                // reflection: flip the axis of least variance
                let mut u = u;
                u.column_mut(2).neg_mut();
                rotation = u * v_t;
            }
            let translation = dst_centroid - rotation * src_centroid;
            let delta = RigidTransform::from_parts(rotation, translation);
            *transform = delta.compose(transform);
        }
    }
}
