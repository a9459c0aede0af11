use crate::graph::LinkGraph;
use chrono::Utc;
use crawlforge_types::DomainScore;
use std::collections::{HashMap, HashSet};
use url::Url;

/// How much each signal contributes to a domain's raw authority score,
/// before calibration into `[0, 100]` (§4.7). Tuned by hand rather than
/// fit to a corpus; an Open Question decision, not a derived constant.
const REFERRING_DOMAINS_WEIGHT: f64 = 35.0;
const MEAN_PAGERANK_WEIGHT: f64 = 4000.0;
const NOFOLLOW_PENALTY_WEIGHT: f64 = 15.0;
const ANCHOR_DIVERSITY_WEIGHT: f64 = 10.0;

/// The scale ceiling: the top-percentile domain in the corpus lands near
/// this value rather than 100, preserving headroom (§4.7).
const SCALE_CEILING: f64 = 95.0;

#[derive(Default)]
struct Accumulator {
    referring_domains: HashSet<String>,
    backlink_count: u64,
    nofollow_count: u64,
    pagerank_sum: f64,
    anchors_seen: Vec<String>,
    unique_anchors: HashSet<String>,
}

/// Registered domain of a URL, or the whole string if it fails to parse
/// as a URL (shouldn't happen for normalized Links, but graph nodes are
/// untrusted strings).
fn domain_of(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| url.to_string())
}

/// Combine referring-domain count, mean referring PageRank, nofollow
/// ratio, and anchor-text diversity into a `[0, 100]` authority score per
/// domain (§4.7). `pagerank` must be indexed the same way as `graph`'s
/// nodes (i.e. the output of [`crate::compute_pagerank`] on the same
/// graph).
pub fn compute_domain_scores(graph: &LinkGraph, pagerank: &[f64]) -> Vec<DomainScore> {
    let mut acc: HashMap<String, Accumulator> = HashMap::new();

    for (src_idx, links) in graph.links_by_source.iter().enumerate() {
        let src_domain = domain_of(&graph.urls[src_idx]);
        for link in links {
            let dst_domain = domain_of(&link.target_url);
            if dst_domain == src_domain {
                // Self-links don't count toward external authority.
                continue;
            }
            let entry = acc.entry(dst_domain).or_default();
            entry.referring_domains.insert(src_domain.clone());
            entry.backlink_count += 1;
            if link.is_nofollow {
                entry.nofollow_count += 1;
            }
            entry.pagerank_sum += pagerank.get(src_idx).copied().unwrap_or(0.0);
            if let Some(anchor) = &link.anchor_text {
                entry.anchors_seen.push(anchor.clone());
                entry.unique_anchors.insert(anchor.clone());
            }
        }
    }

    let mut raw_scores: HashMap<String, f64> = HashMap::new();
    for (domain, a) in &acc {
        let backlinks = a.backlink_count.max(1) as f64;
        let mean_pagerank = a.pagerank_sum / backlinks;
        let nofollow_ratio = a.nofollow_count as f64 / backlinks;
        let anchor_diversity = if a.anchors_seen.is_empty() {
            0.0
        } else {
            (a.unique_anchors.len() as f64 / a.anchors_seen.len() as f64).min(1.0)
        };

        let raw = REFERRING_DOMAINS_WEIGHT * (1.0 + a.referring_domains.len() as f64).ln()
            + MEAN_PAGERANK_WEIGHT * mean_pagerank
            + ANCHOR_DIVERSITY_WEIGHT * anchor_diversity
            - NOFOLLOW_PENALTY_WEIGHT * nofollow_ratio;
        raw_scores.insert(domain.clone(), raw.max(0.0));
    }

    let max_raw = raw_scores.values().copied().fold(0.0_f64, f64::max);
    let now = Utc::now();

    acc.into_iter()
        .map(|(domain, a)| {
            let raw = raw_scores.get(&domain).copied().unwrap_or(0.0);
            let authority_score = if max_raw > 0.0 {
                SCALE_CEILING * (raw / max_raw)
            } else {
                0.0
            };
            DomainScore {
                domain,
                authority_score,
                backlink_count: a.backlink_count,
                referring_domains: a.referring_domains.len() as u64,
                updated_at: now,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pagerank::{compute_pagerank, PageRankConfig};
    use chrono::Utc as ChronoUtc;
    use crawlforge_types::Link;
    use uuid::Uuid;

    fn link(src: &str, dst: &str, anchor: &str, nofollow: bool) -> Link {
        Link {
            source_url: src.to_string(),
            target_url: dst.to_string(),
            anchor_text: Some(anchor.to_string()),
            surrounding_context: None,
            is_nofollow: nofollow,
            discovered_at: ChronoUtc::now(),
            session_id: Uuid::new_v4(),
        }
    }

    #[test]
    fn more_referring_domains_yields_higher_authority() {
        let graph = LinkGraph::build(vec![
            link("https://a.com", "https://popular.com", "click here", false),
            link("https://b.com", "https://popular.com", "read more", false),
            link("https://c.com", "https://popular.com", "official site", false),
            link("https://a.com", "https://lonely.com", "link", false),
        ]);
        let pagerank = compute_pagerank(&graph, PageRankConfig::default());
        let scores = compute_domain_scores(&graph, &pagerank);

        let popular = scores.iter().find(|s| s.domain == "popular.com").unwrap();
        let lonely = scores.iter().find(|s| s.domain == "lonely.com").unwrap();
        assert!(popular.authority_score > lonely.authority_score);
        assert_eq!(popular.referring_domains, 3);
    }

    #[test]
    fn scores_never_exceed_scale_ceiling() {
        let graph = LinkGraph::build(vec![link("https://a.com", "https://b.com", "x", false)]);
        let pagerank = compute_pagerank(&graph, PageRankConfig::default());
        let scores = compute_domain_scores(&graph, &pagerank);
        assert!(scores.iter().all(|s| s.authority_score <= SCALE_CEILING + 1e-9));
    }
}
