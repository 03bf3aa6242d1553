use fxhash::FxHashMap;
use nalgebra::{Rotation3, Vector3};
use voxtree::Aabb;

use crate::transform::RigidTransform;

pub(crate) type PosKey = (i32, i32, i32);

/// Rotation bin: axis binned on a (polar, azimuth) spherical grid, angle on a
/// 1-D grid, all at the rotation discretization pitch.
type RotKey = (i32, i32, i32);

#[derive(Debug, Clone)]
struct RotBin {
    votes: u32,
    sum: [f32; 12],
}

/// Discretized 6-DOF transform space: an outer grid over the position a
/// placement sends the model's center of mass to, and per position voxel a
/// histogram over discretized rotations, per model. Neighboring voxel keys
/// are logical neighbors in transform space.
pub(crate) struct TransformSpace {
    origin: Vector3<f32>,
    position_cell: f32,
    rotation_cell: f32,
    voxels: FxHashMap<PosKey, FxHashMap<(u32, RotKey), RotBin>>,
}

impl TransformSpace {
    /// `bounds` is the scene box; it is padded on every face by half the
    /// enlargement factor times the largest span.
    pub fn new(
        bounds: &Aabb,
        enlargement_factor: f32,
        position_cell: f32,
        rotation_cell: f32,
    ) -> Self {
        let pad = 0.5 * enlargement_factor * bounds.extents().max();
        Self {
            origin: bounds.min - Vector3::new(pad, pad, pad),
            position_cell,
            rotation_cell,
            voxels: FxHashMap::default(),
        }
    }

    fn position_key(&self, p: Vector3<f32>) -> PosKey {
        (
            ((p.x - self.origin.x) / self.position_cell).floor() as i32,
            ((p.y - self.origin.y) / self.position_cell).floor() as i32,
            ((p.z - self.origin.z) / self.position_cell).floor() as i32,
        )
    }

    fn rotation_key(&self, transform: &RigidTransform) -> RotKey {
        let rotation = Rotation3::from_matrix_unchecked(transform.rotation());
        let (axis, angle) = rotation
            .axis_angle()
            .map(|(axis, angle)| (axis.into_inner(), angle))
            .unwrap_or((Vector3::z(), 0.0));
        let polar = axis.z.clamp(-1.0, 1.0).acos();
        let azimuth = axis.y.atan2(axis.x);
        (
            (polar / self.rotation_cell).floor() as i32,
            (azimuth / self.rotation_cell).floor() as i32,
            (angle / self.rotation_cell).floor() as i32,
        )
    }

    /// Votes for a placement: the voxel is the one the transformed center of
    /// mass lands in, the bin accumulates the transform entries.
    pub fn add(&mut self, model: u32, center_of_mass: Vector3<f32>, transform: &RigidTransform) {
        let pos_key = self.position_key(transform.apply(center_of_mass));
        let rot_key = self.rotation_key(transform);
        let bin = self
            .voxels
            .entry(pos_key)
            .or_default()
            .entry((model, rot_key))
            .or_insert(RotBin {
                votes: 0,
                sum: [0.0; 12],
            });
        bin.votes += 1;
        for (acc, entry) in bin.sum.iter_mut().zip(transform.as_array()) {
            *acc += entry;
        }
    }

    /// Occupied voxel keys in ascending order.
    pub fn occupied_voxels(&self) -> Vec<PosKey> {
        let mut keys: Vec<PosKey> = self.voxels.keys().copied().collect();
        keys.sort_unstable();
        keys
    }

    /// For each model with votes in the voxel: the mean transform of its
    /// most-voted rotation bin, with the vote count. Ascending by model id;
    /// vote ties broken by the smaller rotation key.
    pub fn best_per_model(&self, voxel: PosKey) -> Vec<(u32, RigidTransform, u32)> {
        let Some(bins) = self.voxels.get(&voxel) else {
            return Vec::new();
        };
        let mut sorted: Vec<(&(u32, RotKey), &RotBin)> = bins.iter().collect();
        sorted.sort_unstable_by_key(|(key, _)| **key);

        let mut winners: Vec<(u32, RigidTransform, u32)> = Vec::new();
        for (&(model, _), bin) in sorted {
            let better = match winners.last() {
                Some(&(last_model, _, last_votes)) => {
                    last_model != model || bin.votes > last_votes
                }
                None => true,
            };
            if !better {
                continue;
            }
            let mut mean = bin.sum;
            for entry in &mut mean {
                *entry /= bin.votes as f32;
            }
            let winner = (model, RigidTransform::from_array(mean), bin.votes);
            match winners.last_mut() {
                Some(last) if last.0 == model => *last = winner,
                _ => winners.push(winner),
            }
        }
        winners
    }

    pub fn num_occupied(&self) -> usize {
        self.voxels.len()
    }
}

/// Whether two voxel keys are distinct grid neighbors (one step at most per
/// axis).
pub(crate) fn keys_adjacent(a: PosKey, b: PosKey) -> bool {
    a != b
        && (a.0 - b.0).abs() <= 1
        && (a.1 - b.1).abs() <= 1
        && (a.2 - b.2).abs() <= 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Matrix3;

    fn unit_bounds() -> Aabb {
        Aabb::new(Vector3::zeros(), Vector3::new(1.0, 1.0, 1.0))
    }

    #[test]
    fn test_votes_accumulate_in_one_bin() {
        let mut space = TransformSpace::new(&unit_bounds(), 0.25, 0.02, 5.0f32.to_radians());
        let com = Vector3::new(0.1, 0.1, 0.1);
        let t = RigidTransform::from_parts(
            *Rotation3::from_euler_angles(0.3, 0.2, 0.1).matrix(),
            Vector3::new(0.4, 0.4, 0.4),
        );
        for _ in 0..5 {
            space.add(0, com, &t);
        }
        assert_eq!(space.num_occupied(), 1);
        let voxel = space.occupied_voxels()[0];
        let best = space.best_per_model(voxel);
        assert_eq!(best.len(), 1);
        let (model, mean, votes) = &best[0];
        assert_eq!(*model, 0);
        assert_eq!(*votes, 5);
        // mean of identical transforms is the transform
        for (a, b) in mean.as_array().iter().zip(t.as_array()) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn test_majority_rotation_wins() {
        let mut space = TransformSpace::new(&unit_bounds(), 0.25, 0.02, 5.0f32.to_radians());
        let com = Vector3::zeros();
        let near_identity = RigidTransform::from_parts(Matrix3::identity(), Vector3::new(0.5, 0.5, 0.5));
        let quarter_turn = RigidTransform::from_parts(
            *Rotation3::from_euler_angles(0.0, 0.0, std::f32::consts::FRAC_PI_2).matrix(),
            Vector3::new(0.5, 0.5, 0.5),
        );
        space.add(0, com, &near_identity);
        space.add(0, com, &quarter_turn);
        space.add(0, com, &quarter_turn);

        let voxel = space.occupied_voxels()[0];
        let best = space.best_per_model(voxel);
        assert_eq!(best.len(), 1);
        let (_, mean, votes) = &best[0];
        assert_eq!(*votes, 2);
        for (a, b) in mean.as_array().iter().zip(quarter_turn.as_array()) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn test_distant_placements_use_distinct_voxels() {
        let mut space = TransformSpace::new(&unit_bounds(), 0.25, 0.02, 5.0f32.to_radians());
        let com = Vector3::zeros();
        let a = RigidTransform::from_parts(Matrix3::identity(), Vector3::new(0.2, 0.2, 0.2));
        let b = RigidTransform::from_parts(Matrix3::identity(), Vector3::new(0.8, 0.8, 0.8));
        space.add(0, com, &a);
        space.add(1, com, &b);
        assert_eq!(space.num_occupied(), 2);
        let keys = space.occupied_voxels();
        assert!(!keys_adjacent(keys[0], keys[1]));
    }

    #[test]
    fn test_keys_adjacent() {
        assert!(keys_adjacent((0, 0, 0), (1, 1, 1)));
        assert!(keys_adjacent((0, 0, 0), (0, 0, 1)));
        assert!(!keys_adjacent((0, 0, 0), (0, 0, 0)));
        assert!(!keys_adjacent((0, 0, 0), (2, 0, 0)));
    }
}
