/// Index-based graph used by both hypothesis filters. Node order is the
/// linear id; edges are index lists; fitness and the on/off flag live inline
/// in the node.
pub(crate) struct Graph<T> {
    payloads: Vec<T>,
    fitness: Vec<i64>,
    edges: Vec<Vec<u32>>,
    on: Vec<bool>,
}

impl<T> Graph<T> {
    pub fn new(payloads: Vec<T>) -> Self {
        let n = payloads.len();
        Self {
            payloads,
            fitness: vec![0; n],
            edges: vec![Vec::new(); n],
            on: vec![false; n],
        }
    }

    pub fn len(&self) -> usize {
        self.payloads.len()
    }

    pub fn set_fitness(&mut self, node: usize, fitness: i64) {
        self.fitness[node] = fitness;
    }

    pub fn fitness(&self, node: usize) -> i64 {
        self.fitness[node]
    }

    pub fn add_edge(&mut self, from: usize, to: usize) {
        self.edges[from].push(to as u32);
    }

    pub fn add_undirected_edge(&mut self, a: usize, b: usize) {
        self.edges[a].push(b as u32);
        self.edges[b].push(a as u32);
    }

    pub fn neighbors(&self, node: usize) -> &[u32] {
        &self.edges[node]
    }

    pub fn payload(&self, node: usize) -> &T {
        &self.payloads[node]
    }

    pub fn is_on(&self, node: usize) -> bool {
        self.on[node]
    }

    /// Greedy maximal on/off partition. Nodes are visited by descending
    /// fitness (ties by lower id); an unvisited node switches on and turns
    /// its unvisited neighbors off. The on set is independent, every off
    /// node has an on neighbor at least as fit, and isolated nodes end up on.
    pub fn run_partition(&mut self) {
        let mut order: Vec<usize> = (0..self.len()).collect();
        order.sort_by_key(|&i| (-self.fitness[i], i));

        let mut visited = vec![false; self.len()];
        for node in order {
            if visited[node] {
                continue;
            }
            visited[node] = true;
            self.on[node] = true;
            for &neighbor in &self.edges[node] {
                let neighbor = neighbor as usize;
                if !visited[neighbor] {
                    visited[neighbor] = true;
                    self.on[neighbor] = false;
                }
            }
        }
    }

    /// Payloads of the on nodes, ascending by id.
    pub fn take_on_payloads(self) -> Vec<T> {
        self.payloads
            .into_iter()
            .zip(self.on)
            .filter_map(|(payload, on)| on.then_some(payload))
            .collect()
    }
}
