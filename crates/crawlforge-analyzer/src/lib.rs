//! # CrawlForge Analyzer
//!
//! The Link-Graph Analyzer (§4.7): builds an in-memory graph from the
//! Store's streamed Links and computes PageRank, domain authority, and
//! spam scores, writing results back via the Store's upsert operations.
//!
//! The teacher has no direct PageRank counterpart; this module follows
//! its general async/`Arc`-state idiom (`riptide-persistence::state`,
//! `riptide-rotation`'s read-the-whole-snapshot-then-compute style) rather
//! than any one teacher file.

mod authority;
mod graph;
mod pagerank;
mod pass;
mod spam;

pub use authority::compute_domain_scores;
pub use graph::LinkGraph;
pub use pagerank::{compute_pagerank, PageRankConfig};
pub use pass::{run_pass, AnalysisSummary};
pub use spam::{spam_score, SpamConfig};
