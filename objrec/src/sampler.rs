use rand::Rng;
use voxtree::Octree;

use crate::pair::{is_coplanar, OrientedPointPair};

/// Draws up to `num_iterations` oriented point pairs from the scene octree.
///
/// The first leaf of each pair is sampled without replacement from the full
/// leaves; the partner is a random full leaf crossed by the sphere of one
/// pair width around the first point. Iterations with no partner at that
/// distance, or with a coplanar pair when filtering is on, produce nothing.
pub(crate) fn sample_pairs(
    scene: &Octree,
    num_iterations: usize,
    pair_width: f32,
    max_coplanarity_angle: f32,
    ignore_coplanar: bool,
    rng: &mut impl Rng,
) -> Vec<OrientedPointPair> {
    let leaves = scene.full_leaves();
    let mut remaining: Vec<u32> = (0..leaves.len() as u32).collect();
    let mut pairs = Vec::new();

    for _ in 0..num_iterations {
        if remaining.is_empty() {
            break;
        }
        let pick = rng.gen_range(0..remaining.len());
        let leaf1 = &leaves[remaining.swap_remove(pick) as usize];

        let Some(leaf2) = scene.random_full_leaf_on_sphere(leaf1.point, pair_width, rng) else {
            continue;
        };
        let diff = leaf2.point - leaf1.point;
        let dist = diff.norm();
        if dist < f32::EPSILON {
            continue;
        }
        if ignore_coplanar
            && is_coplanar(leaf1.normal, leaf2.normal, diff / dist, max_coplanarity_angle)
        {
            continue;
        }
        pairs.push(OrientedPointPair {
            p1: leaf1.point,
            n1: leaf1.normal,
            p2: leaf2.point,
            n2: leaf2.normal,
        });
    }
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;
    use rand::{rngs::SmallRng, SeedableRng};

    fn wavy_sheet() -> (Vec<Vector3<f32>>, Vec<Vector3<f32>>) {
        // z = 0.02 sin(40x): curved enough that most pairs are not coplanar
        let mut points = Vec::new();
        let mut normals = Vec::new();
        for i in 0..40 {
            for j in 0..40 {
                let x = i as f32 * 0.004;
                let y = j as f32 * 0.004;
                let z = 0.02 * (40.0 * x).sin();
                points.push(Vector3::new(x, y, z));
                let dzdx = 0.8 * (40.0 * x).cos();
                normals.push(Vector3::new(-dzdx, 0.0, 1.0).normalize());
            }
        }
        (points, normals)
    }

    #[test]
    fn test_empty_scene_yields_no_pairs() {
        let scene = Octree::build(&[], &[], 0.004);
        let mut rng = SmallRng::seed_from_u64(1);
        let pairs = sample_pairs(&scene, 100, 0.05, 0.05, true, &mut rng);
        assert!(pairs.is_empty());
    }

    #[test]
    fn test_pair_distances_near_pair_width() {
        let (points, normals) = wavy_sheet();
        let scene = Octree::build(&points, &normals, 0.004);
        let mut rng = SmallRng::seed_from_u64(2);
        let pair_width = 0.05;
        let pairs = sample_pairs(&scene, 200, pair_width, 0.05, false, &mut rng);
        assert!(!pairs.is_empty());
        // partner cells straddle the sphere, so the averaged points stay
        // within a voxel diagonal of the target distance
        let slack = 0.004 * 3.0f32.sqrt();
        for pair in &pairs {
            let d = (pair.p2 - pair.p1).norm();
            assert!((d - pair_width).abs() <= slack, "distance {d}");
        }
    }

    #[test]
    fn test_coplanarity_filter_holds() {
        let (points, normals) = wavy_sheet();
        let scene = Octree::build(&points, &normals, 0.004);
        let mut rng = SmallRng::seed_from_u64(3);
        let max_angle = 3.0f32.to_radians();
        let pairs = sample_pairs(&scene, 300, 0.05, max_angle, true, &mut rng);
        assert!(!pairs.is_empty());
        let threshold = max_angle.sin();
        for pair in &pairs {
            let d = (pair.p2 - pair.p1).normalize();
            assert!(pair.n1.dot(&d).abs() >= threshold);
            assert!(pair.n2.dot(&d).abs() >= threshold);
        }
    }

    #[test]
    fn test_at_most_one_pair_per_iteration() {
        let (points, normals) = wavy_sheet();
        let scene = Octree::build(&points, &normals, 0.004);
        let mut rng = SmallRng::seed_from_u64(4);
        let pairs = sample_pairs(&scene, 50, 0.05, 0.05, true, &mut rng);
        assert!(pairs.len() <= 50);
    }
}
