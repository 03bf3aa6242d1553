use std::collections::BTreeSet;

use crate::model::{ModelLibrary, ANGLE_CELL};
use crate::pair::{pair_frame, OrientedPointPair, PairSignature};
use crate::transform::RigidTransform;

/// A candidate placement of one library model, before scoring.
#[derive(Debug, Clone, Copy)]
pub struct PoseCandidate {
    pub model: u32,
    pub transform: RigidTransform,
}

/// A scored placement. `explained_pixels` holds the z-projection pixel ids
/// the placement accounts for.
#[derive(Debug, Clone)]
pub struct Hypothesis {
    pub model: u32,
    pub transform: RigidTransform,
    pub explained_pixels: BTreeSet<u32>,
    pub match_confidence: f32,
}

/// Entries whose stored fourth invariant differs from the scene pair's by
/// more than this are pruned inside a cell.
const ANGLE3_TOLERANCE: f32 = 2.0 * ANGLE_CELL;

/// For every scene pair, aligns each compatible model pair from the
/// neighboring table cells onto it and emits the resulting placement.
pub(crate) fn generate_poses<U>(
    library: &ModelLibrary<U>,
    scene_pairs: &[OrientedPointPair],
) -> Vec<PoseCandidate> {
    let mut poses = Vec::new();
    for pair in scene_pairs {
        let sig = PairSignature::of(pair.p1, pair.n1, pair.p2, pair.n2);
        let (scene_frame, scene_origin) = pair_frame(pair.p1, pair.n1, pair.p2);

        for cell in library.table().neighbors(&sig) {
            for model_pairs in cell {
                let leaves = library.model(model_pairs.model).octree().full_leaves();
                for entry in &model_pairs.pairs {
                    if (entry.angle3 - sig.angle3).abs() > ANGLE3_TOLERANCE {
                        continue;
                    }
                    let a = &leaves[entry.leaf1 as usize];
                    let b = &leaves[entry.leaf2 as usize];
                    let (model_frame, model_origin) = pair_frame(a.point, a.normal, b.point);

                    let rotation = scene_frame * model_frame.transpose();
                    let translation = scene_origin - rotation * model_origin;
                    poses.push(PoseCandidate {
                        model: model_pairs.model,
                        transform: RigidTransform::from_parts(rotation, translation),
                    });
                }
            }
        }
    }
    poses
}
