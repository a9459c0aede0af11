use crawlforge_types::Link;
use once_cell::sync::Lazy;
use regex::Regex;

/// Tunable knobs for the spam heuristic (§4.7). `keywords` is
/// configurable per deployment rather than hardcoded, mirroring the
/// spec's "configurable list" requirement.
#[derive(Debug, Clone)]
pub struct SpamConfig {
    pub keywords: Vec<String>,
    pub threshold: f64,
    /// Anchor texts at or above this length start contributing to the
    /// score (very long anchors are a common link-spam tell).
    pub long_anchor_chars: usize,
}

impl Default for SpamConfig {
    fn default() -> Self {
        Self {
            keywords: DEFAULT_KEYWORDS.iter().map(|s| s.to_string()).collect(),
            threshold: 0.8,
            long_anchor_chars: 60,
        }
    }
}

const DEFAULT_KEYWORDS: &[&str] = &[
    "casino", "viagra", "payday loan", "cheap replica", "free money", "click here",
    "buy now", "work from home", "weight loss", "adult dating",
];

static NON_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\s]").unwrap());

/// Score a single Link in `[0.0, 1.0]`: anchor length, keyword/dictionary
/// matches, and the source page's out-degree as a link-density proxy
/// (the Analyzer only sees `Link` rows via `Store::iter_links`, with no
/// join back to the Extractor's per-page word/link counts, so out-degree
/// of the source node stands in for "link density on the source page").
pub fn spam_score(link: &Link, source_out_degree: usize, config: &SpamConfig) -> f64 {
    let anchor = link.anchor_text.as_deref().unwrap_or("");
    let anchor_lower = anchor.to_lowercase();

    let length_score = if anchor.chars().count() >= config.long_anchor_chars {
        0.3
    } else {
        0.0
    };

    let keyword_hits = config
        .keywords
        .iter()
        .filter(|k| anchor_lower.contains(k.as_str()))
        .count();
    let keyword_score = (keyword_hits as f64 * 0.4).min(0.6);

    // Dictionary match: anchor stripped of punctuation exactly equals a
    // keyword, a stronger signal than a substring hit.
    let stripped = NON_WORD.replace_all(&anchor_lower, "").trim().to_string();
    let dictionary_score = if config
        .keywords
        .iter()
        .any(|k| NON_WORD.replace_all(k, "") == stripped && !stripped.is_empty())
    {
        0.5
    } else {
        0.0
    };

    // Out-degree above 100 on a single page is treated as link-farm density.
    let density_score = (source_out_degree as f64 / 200.0).min(0.3);

    (length_score + keyword_score + dictionary_score + density_score).min(1.0)
}

/// Whether `link` should be flagged as spam (§4.7: "Flag Link when
/// score > threshold").
pub fn is_spam(link: &Link, source_out_degree: usize, config: &SpamConfig) -> bool {
    spam_score(link, source_out_degree, config) > config.threshold
}
