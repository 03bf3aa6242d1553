use crate::octree::Octree;

/// One cell of the 2.5-D projection: the depth interval observed within the
/// cell's vertical column, widened by the build tolerances.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pixel {
    pub id: u32,
    pub z1: f32,
    pub z2: f32,
}

#[derive(Debug, Clone)]
struct PixelData {
    z1: f32,
    z2: f32,
    leaves: Vec<u32>,
}

/// Downward projection of an octree onto an x-y pixel grid with pixel size
/// equal to the octree voxel size. Occupied pixels carry the min/max observed
/// depth and the ids of the octree leaves in their column, ascending.
pub struct ZProjection {
    origin_x: f32,
    origin_y: f32,
    pixel_size: f32,
    width: usize,
    height: usize,
    pixels: Vec<Option<PixelData>>,
}

impl ZProjection {
    pub fn build(octree: &Octree, z_tol_lower: f32, z_tol_upper: f32) -> Self {
        let pixel_size = octree.voxel_size();
        let leaves = octree.full_leaves();
        if leaves.is_empty() {
            return Self {
                origin_x: 0.0,
                origin_y: 0.0,
                pixel_size,
                width: 0,
                height: 0,
                pixels: Vec::new(),
            };
        }

        let mut min_x = f32::INFINITY;
        let mut min_y = f32::INFINITY;
        let mut max_x = f32::NEG_INFINITY;
        let mut max_y = f32::NEG_INFINITY;
        for leaf in leaves {
            min_x = min_x.min(leaf.bounds.min.x);
            min_y = min_y.min(leaf.bounds.min.y);
            max_x = max_x.max(leaf.bounds.max.x);
            max_y = max_y.max(leaf.bounds.max.y);
        }
        let width = ((max_x - min_x) / pixel_size).ceil() as usize;
        let height = ((max_y - min_y) / pixel_size).ceil() as usize;

        let mut proj = Self {
            origin_x: min_x,
            origin_y: min_y,
            pixel_size,
            width,
            height,
            pixels: vec![None; width * height],
        };

        // leaves are iterated in id order, so column lists stay ascending
        for leaf in leaves {
            let ix0 = proj.clamp_x(leaf.bounds.min.x + 1e-6 * pixel_size);
            let ix1 = proj.clamp_x(leaf.bounds.max.x - 1e-6 * pixel_size);
            let iy0 = proj.clamp_y(leaf.bounds.min.y + 1e-6 * pixel_size);
            let iy1 = proj.clamp_y(leaf.bounds.max.y - 1e-6 * pixel_size);
            let z1 = leaf.bounds.min.z - z_tol_lower;
            let z2 = leaf.bounds.max.z + z_tol_upper;
            for iy in iy0..=iy1 {
                for ix in ix0..=ix1 {
                    let cell = &mut proj.pixels[iy * width + ix];
                    match cell {
                        Some(data) => {
                            data.z1 = data.z1.min(z1);
                            data.z2 = data.z2.max(z2);
                            data.leaves.push(leaf.id);
                        }
                        None => {
                            *cell = Some(PixelData {
                                z1,
                                z2,
                                leaves: vec![leaf.id],
                            });
                        }
                    }
                }
            }
        }
        proj
    }

    fn clamp_x(&self, x: f32) -> usize {
        (((x - self.origin_x) / self.pixel_size) as usize).min(self.width.saturating_sub(1))
    }

    fn clamp_y(&self, y: f32) -> usize {
        (((y - self.origin_y) / self.pixel_size) as usize).min(self.height.saturating_sub(1))
    }

    fn index_of(&self, x: f32, y: f32) -> Option<usize> {
        let fx = (x - self.origin_x) / self.pixel_size;
        let fy = (y - self.origin_y) / self.pixel_size;
        if fx < 0.0 || fy < 0.0 {
            return None;
        }
        let ix = fx as usize;
        let iy = fy as usize;
        if ix >= self.width || iy >= self.height {
            return None;
        }
        Some(iy * self.width + ix)
    }

    /// The occupied pixel covering `(x, y)`, if any.
    pub fn pixel_at(&self, x: f32, y: f32) -> Option<Pixel> {
        let idx = self.index_of(x, y)?;
        self.pixels[idx].as_ref().map(|data| Pixel {
            id: idx as u32,
            z1: data.z1,
            z2: data.z2,
        })
    }

    /// Octree leaf ids in the column of `(x, y)`, ascending. Empty when the
    /// pixel is unoccupied or out of the grid.
    pub fn leaves_at(&self, x: f32, y: f32) -> &[u32] {
        self.index_of(x, y)
            .and_then(|idx| self.pixels[idx].as_ref())
            .map(|data| data.leaves.as_slice())
            .unwrap_or(&[])
    }

    pub fn num_pixels(&self) -> usize {
        self.width * self.height
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;

    fn patch_tree() -> Octree {
        let mut points = Vec::new();
        let mut normals = Vec::new();
        for i in 0..11 {
            for j in 0..11 {
                points.push(Vector3::new(i as f32 * 0.01, j as f32 * 0.01, 0.05));
                normals.push(Vector3::new(0.0, 0.0, 1.0));
            }
        }
        Octree::build(&points, &normals, 0.01)
    }

    #[test]
    fn test_empty_projection() {
        let tree = Octree::build(&[], &[], 0.01);
        let proj = ZProjection::build(&tree, 0.015, 0.015);
        assert_eq!(proj.num_pixels(), 0);
        assert!(proj.pixel_at(0.0, 0.0).is_none());
        assert!(proj.leaves_at(0.0, 0.0).is_empty());
    }

    #[test]
    fn test_depth_interval_covers_surface() {
        let tree = patch_tree();
        let proj = ZProjection::build(&tree, 0.015, 0.015);
        for leaf in tree.full_leaves() {
            let px = proj
                .pixel_at(leaf.point.x, leaf.point.y)
                .expect("occupied column");
            assert!(px.z1 <= leaf.point.z && leaf.point.z <= px.z2);
        }
        assert!(proj.pixel_at(-1.0, 0.0).is_none());
        assert!(proj.pixel_at(0.0, 5.0).is_none());
    }

    #[test]
    fn test_column_lists_sorted() {
        let tree = patch_tree();
        let proj = ZProjection::build(&tree, 0.0, 0.0);
        for leaf in tree.full_leaves() {
            let column = proj.leaves_at(leaf.point.x, leaf.point.y);
            assert!(!column.is_empty());
            assert!(column.windows(2).all(|w| w[0] < w[1]));
            assert!(column.contains(&leaf.id));
        }
    }

    #[test]
    fn test_pixel_ids_stable() {
        let tree = patch_tree();
        let a = ZProjection::build(&tree, 0.01, 0.01);
        let b = ZProjection::build(&tree, 0.01, 0.01);
        for leaf in tree.full_leaves() {
            assert_eq!(
                a.pixel_at(leaf.point.x, leaf.point.y),
                b.pixel_at(leaf.point.x, leaf.point.y)
            );
        }
    }
}
