use fxhash::FxHashMap;
use nalgebra::Vector3;
use voxtree::Octree;

use crate::error::Error;
use crate::pair::{is_coplanar, PairSignature};

/// Angular cell size of the pair table, radians. The key quantizes the two
/// normal-to-line angles at this pitch; the fourth invariant is checked
/// against twice this tolerance inside a cell.
pub(crate) const ANGLE_CELL: f32 = std::f32::consts::PI / 16.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct SigKey {
    dist: i32,
    angle1: i32,
    angle2: i32,
}

/// One registered pair of model full leaves. `angle3` is the fourth
/// signature invariant, kept for in-cell pruning.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PairEntry {
    pub leaf1: u32,
    pub leaf2: u32,
    pub angle3: f32,
}

/// Pairs of one model that landed in one cell. Append-only.
#[derive(Debug)]
pub(crate) struct ModelPairs {
    pub model: u32,
    pub pairs: Vec<PairEntry>,
}

/// Grid hash over the 3-D pair signature (distance plus the two
/// normal-to-line angles). Lookup visits the 27 cells around a key.
pub(crate) struct PairTable {
    dist_cell: f32,
    cells: FxHashMap<SigKey, Vec<ModelPairs>>,
}

impl PairTable {
    fn new(dist_cell: f32) -> Self {
        Self {
            dist_cell,
            cells: FxHashMap::default(),
        }
    }

    fn key_of(&self, sig: &PairSignature) -> SigKey {
        SigKey {
            dist: (sig.distance / self.dist_cell).floor() as i32,
            angle1: (sig.angle1 / ANGLE_CELL).floor() as i32,
            angle2: (sig.angle2 / ANGLE_CELL).floor() as i32,
        }
    }

    fn insert(&mut self, model: u32, sig: &PairSignature, leaf1: u32, leaf2: u32) {
        let key = self.key_of(sig);
        let cell = self.cells.entry(key).or_default();
        let entry = PairEntry {
            leaf1,
            leaf2,
            angle3: sig.angle3,
        };
        match cell.iter_mut().find(|mp| mp.model == model) {
            Some(mp) => mp.pairs.push(entry),
            None => cell.push(ModelPairs {
                model,
                pairs: vec![entry],
            }),
        }
    }

    /// Cells in the 3x3x3 neighborhood of the signature's key.
    pub fn neighbors<'a>(
        &'a self,
        sig: &PairSignature,
    ) -> impl Iterator<Item = &'a [ModelPairs]> + 'a {
        let key = self.key_of(sig);
        let mut found = Vec::new();
        for dd in -1..=1 {
            for da1 in -1..=1 {
                for da2 in -1..=1 {
                    let probe = SigKey {
                        dist: key.dist + dd,
                        angle1: key.angle1 + da1,
                        angle2: key.angle2 + da2,
                    };
                    if let Some(cell) = self.cells.get(&probe) {
                        found.push(cell.as_slice());
                    }
                }
            }
        }
        found.into_iter()
    }

    #[cfg(test)]
    fn num_cells(&self) -> usize {
        self.cells.len()
    }
}

/// A library object: its octree, the center of mass of the octree's full
/// leaves, and the caller's payload.
pub struct Model<U> {
    name: String,
    octree: Octree,
    center_of_mass: Vector3<f32>,
    user_data: U,
}

impl<U> Model<U> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn octree(&self) -> &Octree {
        &self.octree
    }

    pub fn center_of_mass(&self) -> Vector3<f32> {
        self.center_of_mass
    }

    pub fn user_data(&self) -> &U {
        &self.user_data
    }

    pub fn num_full_leaves(&self) -> usize {
        self.octree.full_leaves().len()
    }
}

/// Read-only after construction; shared by every recognition call.
pub struct ModelLibrary<U> {
    pair_width: f32,
    voxel_size: f32,
    max_coplanarity_angle: f32,
    ignore_coplanar_pairs: bool,
    models: Vec<Model<U>>,
    table: PairTable,
}

impl<U> ModelLibrary<U> {
    pub fn new(
        pair_width: f32,
        voxel_size: f32,
        max_coplanarity_angle: f32,
        ignore_coplanar_pairs: bool,
    ) -> Self {
        Self {
            pair_width,
            voxel_size,
            max_coplanarity_angle,
            ignore_coplanar_pairs,
            models: Vec::new(),
            table: PairTable::new(voxel_size),
        }
    }

    pub(crate) fn set_coplanarity_filter(&mut self, max_angle: f32, ignore: bool) {
        self.max_coplanarity_angle = max_angle;
        self.ignore_coplanar_pairs = ignore;
    }

    /// Builds the model octree, registers every ordered full-leaf pair whose
    /// distance is within one voxel of the pair width, and stores the model.
    pub fn add_model(
        &mut self,
        points: &[Vector3<f32>],
        normals: &[Vector3<f32>],
        name: &str,
        user_data: U,
    ) -> Result<(), Error> {
        if points.len() != normals.len() {
            return Err(Error::NormalCountMismatch {
                points: points.len(),
                normals: normals.len(),
            });
        }
        if points.is_empty() {
            return Err(Error::EmptyModel);
        }
        if self.models.iter().any(|m| m.name == name) {
            return Err(Error::DuplicateModel(name.to_owned()));
        }

        let octree = Octree::build(points, normals, self.voxel_size);
        let leaves = octree.full_leaves();
        let mut center_of_mass = Vector3::zeros();
        for leaf in leaves {
            center_of_mass += leaf.point;
        }
        center_of_mass /= leaves.len() as f32;

        let model_id = self.models.len() as u32;
        let mut num_pairs = 0usize;
        for i in 0..leaves.len() {
            for j in (i + 1)..leaves.len() {
                let diff = leaves[j].point - leaves[i].point;
                let dist = diff.norm();
                if (dist - self.pair_width).abs() > self.voxel_size {
                    continue;
                }
                if self.ignore_coplanar_pairs
                    && is_coplanar(
                        leaves[i].normal,
                        leaves[j].normal,
                        diff / dist,
                        self.max_coplanarity_angle,
                    )
                {
                    continue;
                }
                // the scene pair is ordered, so register both orders
                let forward = PairSignature::of(
                    leaves[i].point,
                    leaves[i].normal,
                    leaves[j].point,
                    leaves[j].normal,
                );
                let backward = PairSignature::of(
                    leaves[j].point,
                    leaves[j].normal,
                    leaves[i].point,
                    leaves[i].normal,
                );
                self.table
                    .insert(model_id, &forward, leaves[i].id, leaves[j].id);
                self.table
                    .insert(model_id, &backward, leaves[j].id, leaves[i].id);
                num_pairs += 2;
            }
        }
        log::debug!(
            "registered model {name:?}: {} full leaves, {num_pairs} table pairs",
            leaves.len()
        );

        self.models.push(Model {
            name: name.to_owned(),
            octree,
            center_of_mass,
            user_data,
        });
        Ok(())
    }

    pub fn models(&self) -> &[Model<U>] {
        &self.models
    }

    pub fn model(&self, id: u32) -> &Model<U> {
        &self.models[id as usize]
    }

    pub fn pair_width(&self) -> f32 {
        self.pair_width
    }

    pub fn voxel_size(&self) -> f32 {
        self.voxel_size
    }

    pub(crate) fn table(&self) -> &PairTable {
        &self.table
    }
}
