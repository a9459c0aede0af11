use crawlforge_types::Link;
use std::collections::HashMap;

/// Weight of a `nofollow`/`ugc`/`sponsored` edge relative to a normal
/// follow edge's weight of `1.0` (§4.7).
pub const NOFOLLOW_WEIGHT: f64 = 0.1;

/// An outgoing edge: target node index and its PageRank weight.
#[derive(Debug, Clone, Copy)]
pub struct Edge {
    pub target: usize,
    pub weight: f64,
}

/// In-memory directed link graph built from a full scan of `Store::iter_links`.
pub struct LinkGraph {
    pub urls: Vec<String>,
    node_index: HashMap<String, usize>,
    pub out_edges: Vec<Vec<Edge>>,
    /// Every link that touched node `i` as its source, kept for domain
    /// authority and spam scoring (anchor text, nofollow flag).
    pub links_by_source: Vec<Vec<Link>>,
}

impl LinkGraph {
    pub fn node_count(&self) -> usize {
        self.urls.len()
    }

    pub fn index_of(&self, url: &str) -> Option<usize> {
        self.node_index.get(url).copied()
    }

    /// Build a graph from the full set of links, interning each distinct
    /// URL as a node exactly once.
    pub fn build(links: Vec<Link>) -> Self {
        let mut node_index = HashMap::new();
        let mut urls = Vec::new();

        let mut intern = |node_index: &mut HashMap<String, usize>, urls: &mut Vec<String>, url: &str| -> usize {
            if let Some(&i) = node_index.get(url) {
                return i;
            }
            let i = urls.len();
            urls.push(url.to_string());
            node_index.insert(url.to_string(), i);
            i
        };

        for link in &links {
            intern(&mut node_index, &mut urls, &link.source_url);
            intern(&mut node_index, &mut urls, &link.target_url);
        }

        let mut out_edges = vec![Vec::new(); urls.len()];
        let mut links_by_source = vec![Vec::new(); urls.len()];

        for link in links {
            let Some(&src) = node_index.get(&link.source_url) else { continue };
            let Some(&dst) = node_index.get(&link.target_url) else { continue };
            let weight = if link.is_nofollow { NOFOLLOW_WEIGHT } else { 1.0 };
            out_edges[src].push(Edge { target: dst, weight });
            links_by_source[src].push(link);
        }

        Self {
            urls,
            node_index,
            out_edges,
            links_by_source,
        }
    }
}
