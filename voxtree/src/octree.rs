use nalgebra::Vector3;
use rand::{seq::SliceRandom, Rng};

use crate::aabb::Aabb;

const NO_NODE: u32 = u32::MAX;

#[derive(Debug, Clone, Copy)]
struct Node {
    center: Vector3<f32>,
    half: f32,
    children: [u32; 8],
    leaf: u32,
}

impl Node {
    fn new(center: Vector3<f32>, half: f32) -> Self {
        Self {
            center,
            half,
            children: [NO_NODE; 8],
            leaf: NO_NODE,
        }
    }

    fn cube(&self) -> Aabb {
        let h = Vector3::new(self.half, self.half, self.half);
        Aabb::new(self.center - h, self.center + h)
    }
}

/// An occupied voxel. `point` and `normal` are the averages of the input
/// samples that fell into the cell; `normal` is re-normalized.
#[derive(Debug, Clone)]
pub struct FullLeaf {
    pub id: u32,
    pub point: Vector3<f32>,
    pub normal: Vector3<f32>,
    pub bounds: Aabb,
}

/// Voxel octree over an oriented point cloud.
///
/// The root cell is the smallest power-of-two multiple of `voxel_size` that
/// covers the input bounds, centered on them, so every leaf cell has side
/// `voxel_size` regardless of the cloud extent.
pub struct Octree {
    nodes: Vec<Node>,
    leaves: Vec<FullLeaf>,
    voxel_size: f32,
    depth: u32,
    point_bounds: Aabb,
}

impl Octree {
    pub fn build(points: &[Vector3<f32>], normals: &[Vector3<f32>], voxel_size: f32) -> Self {
        debug_assert_eq!(points.len(), normals.len());
        if points.is_empty() {
            return Self {
                nodes: Vec::new(),
                leaves: Vec::new(),
                voxel_size,
                depth: 0,
                point_bounds: Aabb::from_point(Vector3::zeros()),
            };
        }

        let mut point_bounds = Aabb::from_point(points[0]);
        for &p in &points[1..] {
            point_bounds.grow(p);
        }
        let extent = point_bounds.extents().max();

        let mut side = voxel_size;
        let mut depth = 0u32;
        while side < extent * 1.0001 {
            side *= 2.0;
            depth += 1;
        }

        let mut tree = Self {
            nodes: vec![Node::new(point_bounds.center(), side * 0.5)],
            leaves: Vec::new(),
            voxel_size,
            depth,
            point_bounds,
        };

        let mut counts: Vec<u32> = Vec::new();
        for (p, n) in points.iter().zip(normals) {
            tree.insert(*p, *n, &mut counts);
        }
        for (leaf, &count) in tree.leaves.iter_mut().zip(&counts) {
            leaf.point /= count as f32;
            let len = leaf.normal.norm();
            if len > 1e-6 {
                leaf.normal /= len;
            }
        }
        tree
    }

    fn insert(&mut self, p: Vector3<f32>, n: Vector3<f32>, counts: &mut Vec<u32>) {
        let mut node_idx = 0usize;
        for _ in 0..self.depth {
            let node = self.nodes[node_idx];
            let mut octant = 0usize;
            let mut child_center = node.center;
            let quarter = node.half * 0.5;
            for i in 0..3 {
                if p[i] > node.center[i] {
                    octant |= 1 << i;
                    child_center[i] += quarter;
                } else {
                    child_center[i] -= quarter;
                }
            }
            let child = self.nodes[node_idx].children[octant];
            node_idx = if child == NO_NODE {
                let idx = self.nodes.len();
                self.nodes.push(Node::new(child_center, quarter));
                self.nodes[node_idx].children[octant] = idx as u32;
                idx
            } else {
                child as usize
            };
        }

        if self.nodes[node_idx].leaf == NO_NODE {
            let id = self.leaves.len() as u32;
            self.nodes[node_idx].leaf = id;
            self.leaves.push(FullLeaf {
                id,
                point: Vector3::zeros(),
                normal: Vector3::zeros(),
                bounds: self.nodes[node_idx].cube(),
            });
            counts.push(0);
        }
        let leaf_id = self.nodes[node_idx].leaf as usize;
        self.leaves[leaf_id].point += p;
        self.leaves[leaf_id].normal += n;
        counts[leaf_id] += 1;
    }

    pub fn full_leaves(&self) -> &[FullLeaf] {
        &self.leaves
    }

    pub fn voxel_size(&self) -> f32 {
        self.voxel_size
    }

    /// Tight bounds of the input points, not of the root cell.
    pub fn bounds(&self) -> Aabb {
        self.point_bounds
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    /// A random full leaf whose cell is crossed by the sphere of `radius`
    /// around `center`, or `None` if the sphere passes through no occupied
    /// cell. The descent visits children in shuffled order, so repeated calls
    /// with the same arguments cover all candidate leaves.
    pub fn random_full_leaf_on_sphere(
        &self,
        center: Vector3<f32>,
        radius: f32,
        rng: &mut impl Rng,
    ) -> Option<&FullLeaf> {
        if self.nodes.is_empty() || !self.nodes[0].cube().intersects_sphere_surface(center, radius)
        {
            return None;
        }
        self.random_descent(0, center, radius, rng)
            .map(|id| &self.leaves[id as usize])
    }

    fn random_descent(
        &self,
        node_idx: usize,
        center: Vector3<f32>,
        radius: f32,
        rng: &mut impl Rng,
    ) -> Option<u32> {
        let node = &self.nodes[node_idx];
        if node.leaf != NO_NODE {
            return Some(node.leaf);
        }
        let mut order: [usize; 8] = [0, 1, 2, 3, 4, 5, 6, 7];
        order.shuffle(rng);
        for octant in order {
            let child = node.children[octant];
            if child == NO_NODE {
                continue;
            }
            let child_node = &self.nodes[child as usize];
            if !child_node.cube().intersects_sphere_surface(center, radius) {
                continue;
            }
            if let Some(leaf) = self.random_descent(child as usize, center, radius, rng) {
                return Some(leaf);
            }
        }
        None
    }

    /// The full leaf whose averaged point is closest to `p`.
    pub fn nearest_full_leaf(&self, p: Vector3<f32>) -> Option<&FullLeaf> {
        if self.nodes.is_empty() {
            return None;
        }
        let mut best = (f32::INFINITY, NO_NODE);
        self.nearest_descent(0, p, &mut best);
        if best.1 == NO_NODE {
            None
        } else {
            Some(&self.leaves[best.1 as usize])
        }
    }

    fn nearest_descent(&self, node_idx: usize, p: Vector3<f32>, best: &mut (f32, u32)) {
        let node = &self.nodes[node_idx];
        if node.leaf != NO_NODE {
            let d = (self.leaves[node.leaf as usize].point - p).norm_squared();
            if d < best.0 {
                *best = (d, node.leaf);
            }
            return;
        }
        let mut order: [(f32, u32); 8] = [(f32::INFINITY, NO_NODE); 8];
        let mut count = 0;
        for &child in &node.children {
            if child == NO_NODE {
                continue;
            }
            order[count] = (self.nodes[child as usize].cube().min_sq_dist(p), child);
            count += 1;
        }
        order[..count].sort_by(|a, b| a.0.total_cmp(&b.0));
        for &(lower_bound, child) in &order[..count] {
            if lower_bound >= best.0 {
                break;
            }
            self.nearest_descent(child as usize, p, best);
        }
    }
}
