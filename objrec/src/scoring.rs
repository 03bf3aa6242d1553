use std::collections::BTreeSet;

use voxtree::{Octree, ZProjection};

use crate::model::Model;
use crate::transform::RigidTransform;

/// Result of checking one placement against the scene projection.
#[derive(Debug, Clone)]
pub(crate) struct Score {
    /// Count of model leaves landing inside a pixel's depth interval; with
    /// normal-based scoring, the accumulated normal agreement instead
    /// (per-leaf dot products, clamped at zero).
    pub match_score: f32,
    /// Model leaves in front of every observed depth in their pixel, which
    /// would occlude a surface the sensor saw.
    pub penalties: u32,
    pub explained_pixels: BTreeSet<u32>,
    pub match_confidence: f32,
}

/// Projects every full leaf of the model through `transform` into the scene's
/// 2.5-D image. A leaf below the pixel's depth interval is impossible and
/// penalized, a leaf inside it is a match that explains the pixel, a leaf
/// behind it (or off the image) is invisible and ignored.
pub(crate) fn score_pose<U>(
    model: &Model<U>,
    transform: &RigidTransform,
    scene: &Octree,
    projection: &ZProjection,
    normal_based: bool,
) -> Score {
    let mut match_score = 0.0f32;
    let mut penalties = 0u32;
    let mut explained_pixels = BTreeSet::new();

    let scene_leaves = scene.full_leaves();
    for leaf in model.octree().full_leaves() {
        let p = transform.apply(leaf.point);
        let Some(pixel) = projection.pixel_at(p.x, p.y) else {
            continue;
        };
        if p.z < pixel.z1 {
            penalties += 1;
        } else if p.z <= pixel.z2 {
            if normal_based {
                let nearest = projection
                    .leaves_at(p.x, p.y)
                    .iter()
                    .min_by(|&&a, &&b| {
                        let da = (scene_leaves[a as usize].point - p).norm_squared();
                        let db = (scene_leaves[b as usize].point - p).norm_squared();
                        da.total_cmp(&db)
                    })
                    .copied();
                if let Some(nearest) = nearest {
                    let rotated = transform.rotate(leaf.normal);
                    // opposed normals contribute nothing; the confidence
                    // stays in [0, 1]
                    match_score += rotated
                        .dot(&scene_leaves[nearest as usize].normal)
                        .max(0.0);
                }
            } else {
                match_score += 1.0;
            }
            explained_pixels.insert(pixel.id);
        }
        // p.z > pixel.z2: the leaf is hidden behind the observed surface
    }

    let match_confidence = match_score / model.num_full_leaves() as f32;
    Score {
        match_score,
        penalties,
        explained_pixels,
        match_confidence,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelLibrary;
    use nalgebra::{Matrix3, Vector3};

    fn bumpy_cloud() -> (Vec<Vector3<f32>>, Vec<Vector3<f32>>) {
        let mut points = Vec::new();
        let mut normals = Vec::new();
        for i in 0..25 {
            for j in 0..25 {
                let x = i as f32 * 0.004;
                let y = j as f32 * 0.004;
                let z = 0.01 * (30.0 * x).sin() * (30.0 * y).cos();
                points.push(Vector3::new(x, y, z));
                let dzdx = 0.3 * (30.0 * x).cos() * (30.0 * y).cos();
                let dzdy = -0.3 * (30.0 * x).sin() * (30.0 * y).sin();
                normals.push(Vector3::new(-dzdx, -dzdy, 1.0).normalize());
            }
        }
        (points, normals)
    }

    fn library_and_scene() -> (ModelLibrary<()>, Octree, ZProjection) {
        let (points, normals) = bumpy_cloud();
        let mut library: ModelLibrary<()> = ModelLibrary::new(0.05, 0.004, 0.05, false);
        library.add_model(&points, &normals, "bumpy", ()).unwrap();
        let scene = Octree::build(&points, &normals, 0.004);
        let projection = ZProjection::build(&scene, 0.006, 0.006);
        (library, scene, projection)
    }

    #[test]
    fn test_identity_placement_scores_high() {
        let (library, scene, projection) = library_and_scene();
        let score = score_pose(
            library.model(0),
            &RigidTransform::identity(),
            &scene,
            &projection,
            false,
        );
        assert!(score.match_confidence > 0.9);
        assert_eq!(score.penalties, 0);
        assert!(!score.explained_pixels.is_empty());
        assert!(score.match_confidence <= 1.0);
    }

    #[test]
    fn test_sunk_placement_is_penalized() {
        let (library, scene, projection) = library_and_scene();
        // push the model well below the observed surface
        let sunk = RigidTransform::from_parts(Matrix3::identity(), Vector3::new(0.0, 0.0, -0.05));
        let score = score_pose(library.model(0), &sunk, &scene, &projection, false);
        assert_eq!(score.match_score, 0.0);
        assert!(score.penalties > 0);
    }

    #[test]
    fn test_raised_placement_is_invisible_not_penalized() {
        let (library, scene, projection) = library_and_scene();
        let raised = RigidTransform::from_parts(Matrix3::identity(), Vector3::new(0.0, 0.0, 0.05));
        let score = score_pose(library.model(0), &raised, &scene, &projection, false);
        assert_eq!(score.match_score, 0.0);
        assert_eq!(score.penalties, 0);
        assert!(score.explained_pixels.is_empty());
    }

    #[test]
    fn test_off_image_placement_is_ignored() {
        let (library, scene, projection) = library_and_scene();
        let outside = RigidTransform::from_parts(Matrix3::identity(), Vector3::new(5.0, 0.0, 0.0));
        let score = score_pose(library.model(0), &outside, &scene, &projection, false);
        assert_eq!(score.match_score, 0.0);
        assert_eq!(score.penalties, 0);
    }

    #[test]
    fn test_normal_based_scoring_rewards_agreement() {
        let (library, scene, projection) = library_and_scene();
        let score = score_pose(
            library.model(0),
            &RigidTransform::identity(),
            &scene,
            &projection,
            true,
        );
        // aligned normals give dot products near one
        assert!(score.match_confidence > 0.8);
        assert!(score.match_confidence <= 1.0 + 1e-6);
    }

    #[test]
    fn test_normal_based_scoring_clamps_opposed_normals() {
        let (points, normals) = bumpy_cloud();
        // same surface, but the model normals all point the other way: every
        // leaf still lands inside its pixel's depth interval
        let flipped: Vec<Vector3<f32>> = normals.iter().map(|n| -n).collect();
        let mut library: ModelLibrary<()> = ModelLibrary::new(0.05, 0.004, 0.05, false);
        library.add_model(&points, &flipped, "inverted", ()).unwrap();
        let scene = Octree::build(&points, &normals, 0.004);
        let projection = ZProjection::build(&scene, 0.006, 0.006);

        let score = score_pose(
            library.model(0),
            &RigidTransform::identity(),
            &scene,
            &projection,
            true,
        );
        assert!(!score.explained_pixels.is_empty());
        assert_eq!(score.match_score, 0.0);
        assert!(score.match_confidence >= 0.0);
        assert!(score.match_confidence <= 1.0);
    }

    #[test]
    fn test_match_plus_skipped_bounded_by_leaves() {
        let (library, scene, projection) = library_and_scene();
        let score = score_pose(
            library.model(0),
            &RigidTransform::identity(),
            &scene,
            &projection,
            false,
        );
        let n = library.model(0).num_full_leaves() as f32;
        assert!(score.match_score + score.penalties as f32 <= n);
    }
}
