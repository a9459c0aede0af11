use crate::graph::LinkGraph;

#[derive(Debug, Clone, Copy)]
pub struct PageRankConfig {
    pub damping: f64,
    pub max_iterations: u32,
    pub convergence_threshold: f64,
}

impl Default for PageRankConfig {
    fn default() -> Self {
        Self {
            damping: 0.85,
            max_iterations: 100,
            convergence_threshold: 1e-6,
        }
    }
}

/// Standard power iteration over `graph` (§4.7). Sinks (out-degree 0)
/// redistribute their mass uniformly across all nodes each iteration.
/// Returns `url -> score`, normalized so the scores sum to 1.
pub fn compute_pagerank(graph: &LinkGraph, config: PageRankConfig) -> Vec<f64> {
    let n = graph.node_count();
    if n == 0 {
        return Vec::new();
    }
    let n_f64 = n as f64;

    let out_weight: Vec<f64> = graph
        .out_edges
        .iter()
        .map(|edges| edges.iter().map(|e| e.weight).sum())
        .collect();

    let mut scores = vec![1.0 / n_f64; n];

    for _ in 0..config.max_iterations {
        let mut next = vec![(1.0 - config.damping) / n_f64; n];

        let sink_mass: f64 = (0..n).filter(|&i| out_weight[i] == 0.0).map(|i| scores[i]).sum();
        let sink_share = config.damping * sink_mass / n_f64;
        for v in next.iter_mut() {
            *v += sink_share;
        }

        for (i, edges) in graph.out_edges.iter().enumerate() {
            if out_weight[i] == 0.0 {
                continue;
            }
            for edge in edges {
                next[edge.target] += config.damping * scores[i] * (edge.weight / out_weight[i]);
            }
        }

        let max_diff = scores
            .iter()
            .zip(next.iter())
            .map(|(old, new)| (new - old).abs())
            .fold(0.0_f64, f64::max);

        scores = next;
        if max_diff < config.convergence_threshold {
            break;
        }
    }

    let sum: f64 = scores.iter().sum();
    if sum > 0.0 {
        for v in scores.iter_mut() {
            *v /= sum;
        }
    }
    scores
}
