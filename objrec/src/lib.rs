//! Recognition of rigid 3D objects in a depth-sensor point cloud. A library
//! of oriented models is indexed once by pair signatures; each recognition
//! call samples oriented point pairs from the scene, aligns compatible model
//! pairs onto them, clusters the resulting placements in a discretized
//! transform space, scores the cluster representatives against a 2.5-D
//! projection of the scene, and filters the survivors through two graph
//! stages (spatial duplicates, then pixel-overlap conflicts).
//!
//! Calls are self-contained batches: the model library is the only state
//! shared between them, and it is read-only after the models are added.

use nalgebra::Vector3;
use rand::{rngs::SmallRng, SeedableRng};
use voxtree::{Octree, ZProjection};

mod conflict;
mod error;
mod graph;
mod hypothesis;
mod icp;
mod model;
mod pair;
mod sampler;
mod scoring;
mod transform;
mod transform_space;

pub use error::Error;
pub use hypothesis::{Hypothesis, PoseCandidate};
pub use icp::TrimmedIcp;
pub use model::{Model, ModelLibrary};
pub use pair::{OrientedPointPair, PairSignature};
pub use transform::RigidTransform;

use conflict::build_conflict_graph;
use graph::Graph;
use hypothesis::generate_poses;
use sampler::sample_pairs;
use scoring::score_pose;
use transform_space::{keys_adjacent, PosKey, TransformSpace};

/// How far a recognition call runs before returning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecognitionMode {
    /// The whole pipeline; outputs are the conflict-filtered hypotheses.
    Full,
    /// Stop after pair sampling. The pairs stay readable via
    /// [`Recognizer::sampled_pairs`]; the output is empty.
    SampleOpps,
    /// Stop after the close-hypothesis filter. The survivors stay readable
    /// via [`Recognizer::accepted_hypotheses`]; the output is empty.
    TestHypotheses,
}

/// One recognized object.
#[derive(Debug, Clone, Copy)]
pub struct Output<'a, U> {
    pub object_name: &'a str,
    /// Row-major rotation in entries 0..9, translation in 9..12.
    pub rigid_transform: [f32; 12],
    pub match_confidence: f32,
    pub user_data: &'a U,
}

/// `ceil(ln(1-p) / ln(1-q))` Bernoulli trials to see a success of
/// probability `q` at least once with probability `p`.
fn num_trials(p: f32, q: f32) -> usize {
    if p <= 0.0 {
        return 0;
    }
    let q = q.clamp(1e-6, 0.99);
    ((1.0 - p).ln() / (1.0 - q).ln()).ceil() as usize
}

pub struct Recognizer<U = ()> {
    library: ModelLibrary<U>,
    voxel_size: f32,
    position_discretization: f32,
    rotation_discretization: f32,
    abs_zdist_thresh: f32,
    max_coplanarity_angle: f32,
    ignore_coplanar_opps: bool,
    visibility: f32,
    relative_num_of_illegal_pts: f32,
    intersection_fraction: f32,
    scene_bounds_enlargement_factor: f32,
    pair_success_prior: f32,
    do_icp_refinement: bool,
    icp_inlier_fraction: f32,
    normal_based_scoring: bool,
    mode: RecognitionMode,
    seed: Option<u64>,
    sampled_pairs: Vec<OrientedPointPair>,
    accepted: Vec<Hypothesis>,
}

impl<U> Recognizer<U> {
    /// `pair_width` is the target distance between sampled scene points,
    /// `voxel_size` the octree leaf size; both in scene units. The remaining
    /// parameters start at their usual defaults and have setters.
    pub fn new(pair_width: f32, voxel_size: f32) -> Self {
        let max_coplanarity_angle = 3.0f32.to_radians();
        Self {
            library: ModelLibrary::new(pair_width, voxel_size, max_coplanarity_angle, true),
            voxel_size,
            position_discretization: 5.0 * voxel_size,
            rotation_discretization: 5.0f32.to_radians(),
            abs_zdist_thresh: 1.5 * voxel_size,
            max_coplanarity_angle,
            ignore_coplanar_opps: true,
            visibility: 0.2,
            relative_num_of_illegal_pts: 0.02,
            intersection_fraction: 0.03,
            scene_bounds_enlargement_factor: 0.25,
            pair_success_prior: 0.01,
            do_icp_refinement: false,
            icp_inlier_fraction: 0.3,
            normal_based_scoring: false,
            mode: RecognitionMode::Full,
            seed: None,
            sampled_pairs: Vec::new(),
            accepted: Vec::new(),
        }
    }

    pub fn add_model(
        &mut self,
        points: &[Vector3<f32>],
        normals: &[Vector3<f32>],
        name: &str,
        user_data: U,
    ) -> Result<(), Error> {
        self.library.add_model(points, normals, name, user_data)
    }

    pub fn library(&self) -> &ModelLibrary<U> {
        &self.library
    }

    pub fn set_position_discretization(&mut self, value: f32) {
        self.position_discretization = value;
    }

    pub fn set_rotation_discretization(&mut self, radians: f32) {
        self.rotation_discretization = radians;
    }

    pub fn set_abs_zdist_thresh(&mut self, value: f32) {
        self.abs_zdist_thresh = value;
    }

    /// Applies to pairs sampled from the scene and to models added
    /// afterwards; already-registered models keep their pair tables.
    pub fn set_max_coplanarity_angle(&mut self, radians: f32) {
        self.max_coplanarity_angle = radians;
        self.library
            .set_coplanarity_filter(radians, self.ignore_coplanar_opps);
    }

    /// See [`Recognizer::set_max_coplanarity_angle`] for the model-side
    /// caveat.
    pub fn set_ignore_coplanar_opps(&mut self, ignore: bool) {
        self.ignore_coplanar_opps = ignore;
        self.library
            .set_coplanarity_filter(self.max_coplanarity_angle, ignore);
    }

    /// Minimum matched fraction of model leaves for a hypothesis to survive.
    pub fn set_visibility(&mut self, fraction: f32) {
        self.visibility = fraction;
    }

    /// Maximum penalized fraction of model leaves for a hypothesis to
    /// survive.
    pub fn set_relative_num_of_illegal_pts(&mut self, fraction: f32) {
        self.relative_num_of_illegal_pts = fraction;
    }

    /// Explained-pixel overlap ratio above which two hypotheses conflict.
    pub fn set_intersection_fraction(&mut self, fraction: f32) {
        self.intersection_fraction = fraction;
    }

    pub fn set_scene_bounds_enlargement_factor(&mut self, factor: f32) {
        self.scene_bounds_enlargement_factor = factor;
    }

    /// Prior probability that one sampled pair produces a correct placement;
    /// drives the iteration count together with the success probability.
    pub fn set_pair_success_prior(&mut self, q: f32) {
        self.pair_success_prior = q;
    }

    pub fn set_icp_hypotheses_refinement(&mut self, enabled: bool) {
        self.do_icp_refinement = enabled;
    }

    pub fn set_frac_of_points_for_icp_refinement(&mut self, fraction: f32) {
        self.icp_inlier_fraction = fraction;
    }

    pub fn set_normal_based_scoring(&mut self, enabled: bool) {
        self.normal_based_scoring = enabled;
    }

    pub fn set_mode(&mut self, mode: RecognitionMode) {
        self.mode = mode;
    }

    /// Fixing the seed makes two calls on identical input produce identical
    /// output. `None` reseeds from entropy each call.
    pub fn set_seed(&mut self, seed: Option<u64>) {
        self.seed = seed;
    }

    /// Pairs sampled by the most recent call.
    pub fn sampled_pairs(&self) -> &[OrientedPointPair] {
        &self.sampled_pairs
    }

    /// Hypotheses that survived the close-hypothesis filter in the most
    /// recent call.
    pub fn accepted_hypotheses(&self) -> &[Hypothesis] {
        &self.accepted
    }

    /// Runs the pipeline on one scene. Returns the recognized objects in
    /// descending match confidence; empty scenes and scenes where nothing
    /// passes the thresholds yield an empty vec, not an error.
    pub fn recognize(
        &mut self,
        scene_points: &[Vector3<f32>],
        scene_normals: &[Vector3<f32>],
        success_probability: f32,
    ) -> Result<Vec<Output<'_, U>>, Error> {
        self.sampled_pairs.clear();
        self.accepted.clear();
        if scene_points.len() != scene_normals.len() {
            return Err(Error::NormalCountMismatch {
                points: scene_points.len(),
                normals: scene_normals.len(),
            });
        }

        let scene = Octree::build(scene_points, scene_normals, self.voxel_size);
        let num_leaves = scene.full_leaves().len();
        log::debug!("scene octree has {num_leaves} full leaves");
        if num_leaves == 0 {
            return Ok(Vec::new());
        }
        let projection = ZProjection::build(&scene, self.abs_zdist_thresh, self.abs_zdist_thresh);

        let mut rng = match self.seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_entropy(),
        };

        let p = success_probability.min(0.99);
        let num_iterations = num_trials(p, self.pair_success_prior).min(num_leaves);
        log::debug!("sampling {num_iterations} pair candidates for success probability {p}");

        self.sampled_pairs = sample_pairs(
            &scene,
            num_iterations,
            self.library.pair_width(),
            self.max_coplanarity_angle,
            self.ignore_coplanar_opps,
            &mut rng,
        );
        log::debug!("sampled {} oriented point pairs", self.sampled_pairs.len());
        if self.mode == RecognitionMode::SampleOpps {
            return Ok(Vec::new());
        }

        let poses = generate_poses(&self.library, &self.sampled_pairs);
        log::debug!("generated {} pose candidates", poses.len());

        let mut space = TransformSpace::new(
            &scene.bounds(),
            self.scene_bounds_enlargement_factor,
            self.position_discretization,
            self.rotation_discretization,
        );
        for pose in &poses {
            space.add(
                pose.model,
                self.library.model(pose.model).center_of_mass(),
                &pose.transform,
            );
        }

        let icp = self.do_icp_refinement.then(|| TrimmedIcp::new(&scene));
        let mut voxel_keys: Vec<PosKey> = Vec::new();
        let mut representatives: Vec<Hypothesis> = Vec::new();
        for key in space.occupied_voxels() {
            let mut best: Option<Hypothesis> = None;
            for (model_id, mut transform, _votes) in space.best_per_model(key) {
                let model = self.library.model(model_id);
                let mut score = score_pose(
                    model,
                    &transform,
                    &scene,
                    &projection,
                    self.normal_based_scoring,
                );
                if let Some(icp) = &icp {
                    if score.match_score > 3.0 {
                        let num_inliers =
                            (self.icp_inlier_fraction * score.match_score) as usize;
                        let source: Vec<Vector3<f32>> = model
                            .octree()
                            .full_leaves()
                            .iter()
                            .map(|leaf| leaf.point)
                            .collect();
                        icp.align(&source, num_inliers, &mut transform);
                        score = score_pose(
                            model,
                            &transform,
                            &scene,
                            &projection,
                            self.normal_based_scoring,
                        );
                    }
                }
                let num_model_leaves = model.num_full_leaves() as f32;
                if score.match_score < self.visibility * num_model_leaves {
                    continue;
                }
                if score.penalties as f32 > self.relative_num_of_illegal_pts * num_model_leaves
                {
                    continue;
                }
                let candidate = Hypothesis {
                    model: model_id,
                    transform,
                    explained_pixels: score.explained_pixels,
                    match_confidence: score.match_confidence,
                };
                if best
                    .as_ref()
                    .map_or(true, |b| candidate.match_confidence > b.match_confidence)
                {
                    best = Some(candidate);
                }
            }
            if let Some(winner) = best {
                voxel_keys.push(key);
                representatives.push(winner);
            }
        }
        log::debug!("{} voxel representatives pass the thresholds", representatives.len());

        let fitness: Vec<i64> = representatives
            .iter()
            .map(|hyp| hyp.explained_pixels.len() as i64)
            .collect();
        let mut close_graph = Graph::new(representatives);
        for (node, value) in fitness.into_iter().enumerate() {
            close_graph.set_fitness(node, value);
        }
        for i in 0..voxel_keys.len() {
            for j in 0..voxel_keys.len() {
                if keys_adjacent(voxel_keys[i], voxel_keys[j]) {
                    close_graph.add_edge(i, j);
                }
            }
        }
        close_graph.run_partition();
        self.accepted = close_graph.take_on_payloads();
        log::debug!("{} hypotheses accepted", self.accepted.len());
        if self.mode == RecognitionMode::TestHypotheses {
            return Ok(Vec::new());
        }

        let mut conflict_graph = build_conflict_graph(
            self.accepted.clone(),
            &self.library,
            self.intersection_fraction,
        );
        conflict_graph.run_partition();
        let mut winners = conflict_graph.take_on_payloads();
        winners.sort_by(|a, b| b.match_confidence.total_cmp(&a.match_confidence));
        log::debug!("{} objects recognized", winners.len());

        Ok(winners
            .into_iter()
            .map(|hyp| {
                let model = self.library.model(hyp.model);
                Output {
                    object_name: model.name(),
                    rigid_transform: hyp.transform.as_array(),
                    match_confidence: hyp.match_confidence,
                    user_data: model.user_data(),
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_num_trials() {
        assert_eq!(num_trials(0.0, 0.01), 0);
        assert_eq!(num_trials(-1.0, 0.01), 0);
        // ln(0.01)/ln(0.99) = 458.2...
        assert_eq!(num_trials(0.99, 0.01), 459);
        // a certain prior needs one trial
        assert_eq!(num_trials(0.5, 0.99), 1);
    }

    #[test]
    fn test_mismatched_normals_error() {
        let mut recognizer: Recognizer = Recognizer::new(0.05, 0.004);
        let result = recognizer.recognize(&[Vector3::zeros()], &[], 0.9);
        assert!(matches!(result, Err(Error::NormalCountMismatch { .. })));
    }

    #[test]
    fn test_empty_scene_is_not_an_error() {
        let mut recognizer: Recognizer = Recognizer::new(0.05, 0.004);
        let outputs = recognizer.recognize(&[], &[], 0.99).unwrap();
        assert!(outputs.is_empty());
    }
}
