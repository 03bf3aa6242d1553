//! Spatial indexing for oriented point clouds: a voxel octree with averaged
//! per-cell samples, a 2.5-D downward projection of the octree, and a
//! bounding-volume hierarchy over axis-aligned boxes. The structures are
//! arena-allocated and link by index, so they are cheap to drop wholesale.

mod aabb;
mod bvh;
mod octree;
mod zproject;

pub use aabb::Aabb;
pub use bvh::Bvh;
pub use octree::{FullLeaf, Octree};
pub use zproject::{Pixel, ZProjection};
