use std::collections::BTreeSet;

use fxhash::FxHashSet;
use voxtree::{Aabb, Bvh};

use crate::graph::Graph;
use crate::hypothesis::Hypothesis;
use crate::model::ModelLibrary;

fn count_common(a: &BTreeSet<u32>, b: &BTreeSet<u32>) -> usize {
    a.intersection(b).count()
}

/// Builds the conflict graph over accepted hypotheses: each becomes a box
/// around its transformed model leaves, candidate pairs come from box
/// overlaps in a BVH, and an edge marks two hypotheses explaining more than
/// `intersection_fraction` of either one's pixels in common. Fitness is net
/// novelty: own explained pixels minus the neighbors' totals.
pub(crate) fn build_conflict_graph<U>(
    hypotheses: Vec<Hypothesis>,
    library: &ModelLibrary<U>,
    intersection_fraction: f32,
) -> Graph<Hypothesis> {
    let boxes: Vec<Aabb> = hypotheses
        .iter()
        .map(|hyp| {
            let leaves = library.model(hyp.model).octree().full_leaves();
            let mut bounds = Aabb::from_point(hyp.transform.apply(leaves[0].point));
            for leaf in &leaves[1..] {
                bounds.grow(hyp.transform.apply(leaf.point));
            }
            bounds
        })
        .collect();

    let mut graph = Graph::new(hypotheses);
    let bvh = Bvh::build(&boxes);
    let mut seen: FxHashSet<(u32, u32)> = FxHashSet::default();
    for i in 0..graph.len() {
        for j in bvh.intersect(&boxes[i]) {
            let j = j as usize;
            if i == j {
                continue;
            }
            let pair = (i.min(j) as u32, i.max(j) as u32);
            if !seen.insert(pair) {
                continue;
            }
            let e_i = &graph.payload(i).explained_pixels;
            let e_j = &graph.payload(j).explained_pixels;
            if e_i.is_empty() || e_j.is_empty() {
                continue;
            }
            let common = count_common(e_i, e_j) as f32;
            if common / e_i.len() as f32 > intersection_fraction
                || common / e_j.len() as f32 > intersection_fraction
            {
                graph.add_undirected_edge(i, j);
            }
        }
    }

    for node in 0..graph.len() {
        let own = graph.payload(node).explained_pixels.len() as i64;
        let neighbor_total: i64 = graph
            .neighbors(node)
            .iter()
            .map(|&n| graph.payload(n as usize).explained_pixels.len() as i64)
            .sum();
        graph.set_fitness(node, own - neighbor_total);
    }
    graph
}
