//! Leiden-style modularity optimization over a weighted undirected graph.
//!
//! One level is:
//! 1. fast local moving: nodes are visited from a queue (seeded shuffle) and
//!    moved to the neighboring community with the best modularity gain;
//! 2. refinement: each community is split into well-connected
//!    sub-communities by greedily merging singletons;
//! 3. aggregation: refined sub-communities become super-nodes, starting in
//!    the community their members were assigned in step 1.
//!
//! Levels repeat until local moving leaves every super-node alone.
//!
//! Gains are expressed in modularity units:
//! `ΔQ(v → C) = w(v, C)/m − γ · k_v · K_C / (2m²)`.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use std::collections::{BTreeMap, VecDeque};

/// Adjacency-list graph. Self-loops are kept apart so aggregation can
/// carry intra-community weight upward.
#[derive(Debug, Clone)]
pub(crate) struct WeightedGraph {
    adjacency: Vec<Vec<(usize, f64)>>,
    self_loops: Vec<f64>,
    degrees: Vec<f64>,
    total_weight: f64,
}

impl WeightedGraph {
    /// Build from an edge list; parallel edges are summed, neighbor order is by index.
    pub(crate) fn from_edges(
        node_count: usize,
        edges: impl IntoIterator<Item = (usize, usize, f64)>,
    ) -> Self {
        let mut merged: Vec<BTreeMap<usize, f64>> = vec![BTreeMap::new(); node_count];
        let mut self_loops = vec![0.0; node_count];
        for (a, b, w) in edges {
            if a == b {
                self_loops[a] += w;
            } else {
                *merged[a].entry(b).or_insert(0.0) += w;
                *merged[b].entry(a).or_insert(0.0) += w;
            }
        }
        let adjacency: Vec<Vec<(usize, f64)>> = merged
            .into_iter()
            .map(|m| m.into_iter().collect())
            .collect();
        Self::from_adjacency(adjacency, self_loops)
    }

    fn from_adjacency(adjacency: Vec<Vec<(usize, f64)>>, self_loops: Vec<f64>) -> Self {
        let degrees: Vec<f64> = adjacency
            .iter()
            .zip(&self_loops)
            .map(|(nbrs, s)| nbrs.iter().map(|(_, w)| w).sum::<f64>() + 2.0 * s)
            .collect();
        let total_weight = degrees.iter().sum::<f64>() / 2.0;
        Self {
            adjacency,
            self_loops,
            degrees,
            total_weight,
        }
    }

    pub(crate) fn node_count(&self) -> usize {
        self.adjacency.len()
    }

    /// Collapse each group of `membership` into one node.
    fn aggregate(&self, membership: &[usize], count: usize) -> WeightedGraph {
        let mut merged: Vec<BTreeMap<usize, f64>> = vec![BTreeMap::new(); count];
        let mut self_loops = vec![0.0; count];
        for (v, nbrs) in self.adjacency.iter().enumerate() {
            let cv = membership[v];
            self_loops[cv] += self.self_loops[v];
            for &(u, w) in nbrs {
                if u < v {
                    continue;
                }
                let cu = membership[u];
                if cu == cv {
                    self_loops[cv] += w;
                } else {
                    *merged[cv].entry(cu).or_insert(0.0) += w;
                    *merged[cu].entry(cv).or_insert(0.0) += w;
                }
            }
        }
        let adjacency = merged
            .into_iter()
            .map(|m| m.into_iter().collect())
            .collect();
        Self::from_adjacency(adjacency, self_loops)
    }
}

/// Tuning knobs for one optimization run.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LeidenParams {
    pub resolution: f64,
    pub epsilon: f64,
    pub max_levels: usize,
}

#[derive(Debug, Clone)]
pub(crate) struct LeidenOutcome {
    /// Community index per input node, `0..count`, numbered by first appearance.
    pub membership: Vec<usize>,
    pub count: usize,
    pub levels: usize,
}

/// Optimize modularity over `graph`.
pub(crate) fn optimize(graph: &WeightedGraph, params: LeidenParams, rng: &mut StdRng) -> LeidenOutcome {
    let n = graph.node_count();
    if n == 0 {
        return LeidenOutcome {
            membership: Vec::new(),
            count: 0,
            levels: 0,
        };
    }
    if graph.total_weight <= 0.0 {
        return LeidenOutcome {
            membership: (0..n).collect(),
            count: n,
            levels: 0,
        };
    }

    let mut current = graph.clone();
    let mut node_to_current: Vec<usize> = (0..n).collect();
    let mut partition: Vec<usize> = (0..n).collect();
    let mut levels = 0;

    loop {
        let moves = move_nodes(&current, &mut partition, params, rng);
        let count = renumber(&mut partition);
        tracing::trace!(level = levels, moves, communities = count, "local moving done");

        if count == current.node_count() || levels >= params.max_levels {
            break;
        }

        let mut refined = refine(&current, &partition, count, params.resolution, rng);
        let refined_count = renumber(&mut refined);
        // Refinement that merged nothing would aggregate to the same graph;
        // aggregate by the unrefined partition instead.
        let (grouping, group_count) = if refined_count < current.node_count() {
            (refined, refined_count)
        } else {
            (partition.clone(), count)
        };

        let aggregate = current.aggregate(&grouping, group_count);
        let mut next = vec![0; group_count];
        for (v, &group) in grouping.iter().enumerate() {
            next[group] = partition[v];
        }
        for slot in node_to_current.iter_mut() {
            *slot = grouping[*slot];
        }

        current = aggregate;
        partition = next;
        levels += 1;
    }

    let mut membership: Vec<usize> = node_to_current.iter().map(|&c| partition[c]).collect();
    let count = renumber(&mut membership);
    LeidenOutcome {
        membership,
        count,
        levels,
    }
}

/// Modularity of `membership` over `graph` at resolution `gamma`.
pub(crate) fn modularity(graph: &WeightedGraph, membership: &[usize], gamma: f64) -> f64 {
    let m = graph.total_weight;
    if m <= 0.0 {
        return 0.0;
    }
    let count = membership.iter().copied().max().map_or(0, |c| c + 1);
    let mut internal = vec![0.0; count];
    let mut totals = vec![0.0; count];
    for (v, nbrs) in graph.adjacency.iter().enumerate() {
        let c = membership[v];
        totals[c] += graph.degrees[v];
        internal[c] += graph.self_loops[v];
        for &(u, w) in nbrs {
            if u > v && membership[u] == c {
                internal[c] += w;
            }
        }
    }
    internal
        .iter()
        .zip(&totals)
        .map(|(l, k)| l / m - gamma * (k / (2.0 * m)).powi(2))
        .sum()
}

// ============================================================================
// Local moving
// ============================================================================

/// Queue-based local moving. Returns the number of moves performed.
fn move_nodes(
    graph: &WeightedGraph,
    membership: &mut [usize],
    params: LeidenParams,
    rng: &mut StdRng,
) -> usize {
    let n = graph.node_count();
    let m = graph.total_weight;
    let two_m = 2.0 * m;

    // Community ids are always < n at every level.
    let mut totals = vec![0.0; n];
    let mut sizes = vec![0usize; n];
    for v in 0..n {
        totals[membership[v]] += graph.degrees[v];
        sizes[membership[v]] += 1;
    }
    let mut empty: Vec<usize> = (0..n).filter(|&c| sizes[c] == 0).collect();

    let mut order: Vec<usize> = (0..n).collect();
    order.shuffle(rng);
    let mut queue: VecDeque<usize> = order.into_iter().collect();
    let mut queued = vec![true; n];

    let mut link = vec![0.0; n];
    let mut touched: Vec<usize> = Vec::new();
    let mut seen = vec![false; n];
    let mut moves = 0;

    while let Some(v) = queue.pop_front() {
        queued[v] = false;
        let current = membership[v];
        let kv = graph.degrees[v];

        for &(u, w) in &graph.adjacency[v] {
            let c = membership[u];
            if !seen[c] {
                seen[c] = true;
                touched.push(c);
            }
            link[c] += w;
        }

        totals[current] -= kv;
        sizes[current] -= 1;

        let gain = |c: usize, link: &[f64], totals: &[f64]| -> f64 {
            (link[c] - params.resolution * kv * totals[c] / two_m) / m
        };

        let stay_gain = gain(current, &link, &totals);
        let mut best = current;
        let mut best_gain = stay_gain;
        for &c in &touched {
            if c == current {
                continue;
            }
            let g = gain(c, &link, &totals);
            if g > best_gain {
                best = c;
                best_gain = g;
            }
        }
        // Moving out alone scores exactly zero.
        if sizes[current] > 0 && 0.0 > best_gain {
            if let Some(&fresh) = empty.last() {
                best = fresh;
                best_gain = 0.0;
            }
        }
        if best_gain <= stay_gain + params.epsilon {
            best = current;
        }

        totals[best] += kv;
        sizes[best] += 1;
        if best != current {
            if empty.last() == Some(&best) {
                empty.pop();
            }
            if sizes[current] == 0 {
                empty.push(current);
            }
            membership[v] = best;
            moves += 1;
            for &(u, _) in &graph.adjacency[v] {
                if !queued[u] && membership[u] != best {
                    queued[u] = true;
                    queue.push_back(u);
                }
            }
        }

        for &c in &touched {
            link[c] = 0.0;
            seen[c] = false;
        }
        touched.clear();
    }

    moves
}

// ============================================================================
// Refinement
// ============================================================================

/// Split every community of `partition` into well-connected sub-communities.
///
/// Only singletons move, only into sub-communities of their own community,
/// and only with non-negative gain; the result is a refinement of `partition`.
fn refine(
    graph: &WeightedGraph,
    partition: &[usize],
    count: usize,
    gamma: f64,
    rng: &mut StdRng,
) -> Vec<usize> {
    let n = graph.node_count();
    let two_m = 2.0 * graph.total_weight;

    let mut community_total = vec![0.0; count];
    for v in 0..n {
        community_total[partition[v]] += graph.degrees[v];
    }

    let mut refined: Vec<usize> = (0..n).collect();
    let mut sub_total = graph.degrees.clone();
    let mut sub_size = vec![1usize; n];
    // Weight from each sub-community to the rest of its community.
    let mut external = vec![0.0; n];
    for v in 0..n {
        external[v] = graph.adjacency[v]
            .iter()
            .filter(|(u, _)| partition[*u] == partition[v])
            .map(|(_, w)| w)
            .sum();
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.shuffle(rng);

    let mut link = vec![0.0; n];
    let mut seen = vec![false; n];
    let mut touched: Vec<usize> = Vec::new();

    for v in order {
        let own = refined[v];
        if sub_size[own] != 1 {
            continue;
        }
        let c = partition[v];
        let kv = graph.degrees[v];
        let kc = community_total[c];
        if external[own] < gamma * kv * (kc - kv) / two_m {
            continue;
        }

        for &(u, w) in &graph.adjacency[v] {
            if partition[u] != c {
                continue;
            }
            let s = refined[u];
            if s == own {
                continue;
            }
            if !seen[s] {
                seen[s] = true;
                touched.push(s);
            }
            link[s] += w;
        }

        let mut best = own;
        let mut best_gain = 0.0;
        for &s in &touched {
            let ks = sub_total[s];
            if external[s] < gamma * ks * (kc - ks) / two_m {
                continue;
            }
            let g = link[s] - gamma * kv * ks / two_m;
            if g > best_gain {
                best = s;
                best_gain = g;
            }
        }

        if best != own {
            external[best] = external[best] + external[own] - 2.0 * link[best];
            sub_total[best] += kv;
            sub_size[best] += 1;
            sub_total[own] = 0.0;
            sub_size[own] = 0;
            external[own] = 0.0;
            refined[v] = best;
        }

        for &s in &touched {
            link[s] = 0.0;
            seen[s] = false;
        }
        touched.clear();
    }

    refined
}

/// Renumber ids to `0..count` in order of first appearance; returns `count`.
fn renumber(membership: &mut [usize]) -> usize {
    let mut map: Vec<Option<usize>> = vec![None; membership.len().max(1)];
    let mut next = 0;
    for slot in membership.iter_mut() {
        if *slot >= map.len() {
            map.resize(*slot + 1, None);
        }
        let id = match map[*slot] {
            Some(id) => id,
            None => {
                map[*slot] = Some(next);
                next += 1;
                next - 1
            }
        };
        *slot = id;
    }
    next
}
