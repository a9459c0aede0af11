use crate::authority::compute_domain_scores;
use crate::graph::LinkGraph;
use crate::pagerank::{compute_pagerank, PageRankConfig};
use crate::spam::{is_spam, SpamConfig};
use crawlforge_store::Store;
use crawlforge_types::{PageRankScore, StoreError};
use futures::StreamExt;
use tracing::{info, warn};

/// Counters describing one completed pass, surfaced via the Monitoring
/// API's `/stats` and useful for tests.
#[derive(Debug, Clone, Default)]
pub struct AnalysisSummary {
    pub links_scanned: usize,
    pub nodes: usize,
    pub domains_scored: usize,
    pub spam_flagged: usize,
}

/// Run one full pass (§4.7): stream every Link from `store`, build the
/// in-memory graph, compute PageRank and domain authority, flag spam
/// links, and persist scores via `upsert_domain_scores` /
/// `upsert_pagerank_scores`. Idempotent — rerunning with an unchanged
/// corpus produces the same scores and simply overwrites them.
pub async fn run_pass(
    store: &dyn Store,
    pagerank_config: PageRankConfig,
    spam_config: &SpamConfig,
) -> Result<AnalysisSummary, StoreError> {
    let mut links = Vec::new();
    let mut stream = store.iter_links();
    while let Some(item) = stream.next().await {
        match item {
            Ok(link) => links.push(link),
            Err(err) => {
                warn!(error = %err, "skipping unreadable link during analysis pass");
            }
        }
    }
    drop(stream);

    let links_scanned = links.len();
    let graph = LinkGraph::build(links);
    let nodes = graph.node_count();

    let pagerank = compute_pagerank(&graph, pagerank_config);
    let domain_scores = compute_domain_scores(&graph, &pagerank);
    let domains_scored = domain_scores.len();

    let mut spam_flagged = 0usize;
    for links in &graph.links_by_source {
        let out_degree = links.len();
        for link in links {
            if is_spam(link, out_degree, spam_config) {
                spam_flagged += 1;
                warn!(
                    source = %link.source_url,
                    target = %link.target_url,
                    "link flagged as spam"
                );
            }
        }
    }

    let now = chrono::Utc::now();
    let pagerank_scores: Vec<PageRankScore> = graph
        .urls
        .iter()
        .zip(pagerank.iter())
        .map(|(url, score)| PageRankScore {
            url: url.clone(),
            score: *score,
            updated_at: now,
        })
        .collect();

    store.upsert_pagerank_scores(pagerank_scores).await?;
    store.upsert_domain_scores(domain_scores).await?;

    info!(
        links_scanned,
        nodes, domains_scored, spam_flagged, "analysis pass complete"
    );

    Ok(AnalysisSummary {
        links_scanned,
        nodes,
        domains_scored,
        spam_flagged,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crawlforge_store::memory::InMemoryStore;
    use crawlforge_types::Link;
    use uuid::Uuid;

    fn link(src: &str, dst: &str, anchor: &str) -> Link {
        Link {
            source_url: src.to_string(),
            target_url: dst.to_string(),
            anchor_text: Some(anchor.to_string()),
            surrounding_context: None,
            is_nofollow: false,
            discovered_at: chrono::Utc::now(),
            session_id: Uuid::new_v4(),
        }
    }

    #[tokio::test]
    async fn empty_corpus_produces_empty_summary() {
        let store = InMemoryStore::new();
        let summary = run_pass(&store, PageRankConfig::default(), &SpamConfig::default())
            .await
            .unwrap();
        assert_eq!(summary.links_scanned, 0);
        assert_eq!(summary.nodes, 0);
        assert_eq!(summary.domains_scored, 0);
    }

    #[tokio::test]
    async fn pass_persists_scores_and_is_idempotent() {
        let store = InMemoryStore::new();
        store
            .seed_links(vec![
                link("https://a.com", "https://b.com", "read more"),
                link("https://c.com", "https://b.com", "click here"),
            ])
            .await;

        let first = run_pass(&store, PageRankConfig::default(), &SpamConfig::default())
            .await
            .unwrap();
        let second = run_pass(&store, PageRankConfig::default(), &SpamConfig::default())
            .await
            .unwrap();

        assert_eq!(first.nodes, second.nodes);
        assert_eq!(first.domains_scored, second.domains_scored);

        let scores = store.pagerank_scores_snapshot().await;
        let b_score = scores
            .iter()
            .find(|s| s.url == "https://b.com")
            .expect("b.com scored");
        assert!(b_score.score > 0.0);
    }
}
