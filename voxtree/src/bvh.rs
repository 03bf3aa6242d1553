use crate::aabb::Aabb;

const NO_NODE: u32 = u32::MAX;

#[derive(Debug, Clone, Copy)]
struct BvhNode {
    aabb: Aabb,
    left: u32,
    right: u32,
    object: u32,
}

/// Bounding-volume hierarchy over a fixed set of boxes, built once by median
/// split on centroids along the widest axis. Nodes live in an arena and link
/// by index; each input box sits in exactly one leaf.
pub struct Bvh {
    nodes: Vec<BvhNode>,
    root: u32,
}

impl Bvh {
    pub fn build(boxes: &[Aabb]) -> Self {
        let mut bvh = Self {
            nodes: Vec::with_capacity(boxes.len().saturating_mul(2)),
            root: NO_NODE,
        };
        if boxes.is_empty() {
            return bvh;
        }
        let mut items: Vec<(u32, Aabb)> = boxes
            .iter()
            .enumerate()
            .map(|(i, b)| (i as u32, *b))
            .collect();
        bvh.root = bvh.build_range(&mut items);
        bvh
    }

    fn build_range(&mut self, items: &mut [(u32, Aabb)]) -> u32 {
        if items.len() == 1 {
            let idx = self.nodes.len() as u32;
            self.nodes.push(BvhNode {
                aabb: items[0].1,
                left: NO_NODE,
                right: NO_NODE,
                object: items[0].0,
            });
            return idx;
        }

        let mut centroid_bounds = Aabb::from_point(items[0].1.center());
        for (_, b) in items.iter().skip(1) {
            centroid_bounds.grow(b.center());
        }
        let axis = centroid_bounds.widest_axis();
        items.sort_by(|a, b| a.1.center()[axis].total_cmp(&b.1.center()[axis]));

        let mid = items.len() / 2;
        let (lo, hi) = items.split_at_mut(mid);
        let left = self.build_range(lo);
        let right = self.build_range(hi);

        let mut aabb = self.nodes[left as usize].aabb;
        aabb.merge(&self.nodes[right as usize].aabb);
        let idx = self.nodes.len() as u32;
        self.nodes.push(BvhNode {
            aabb,
            left,
            right,
            object: NO_NODE,
        });
        idx
    }

    /// Indices of all input boxes overlapping `query`.
    pub fn intersect(&self, query: &Aabb) -> Vec<u32> {
        let mut hits = Vec::new();
        if self.root == NO_NODE {
            return hits;
        }
        let mut stack = vec![self.root];
        while let Some(idx) = stack.pop() {
            let node = &self.nodes[idx as usize];
            if !node.aabb.overlaps(query) {
                continue;
            }
            if node.object != NO_NODE {
                hits.push(node.object);
            } else {
                stack.push(node.left);
                stack.push(node.right);
            }
        }
        hits
    }
}
