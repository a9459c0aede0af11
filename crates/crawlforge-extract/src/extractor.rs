use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;
use url::Url;

const MAX_TITLE_CHARS: usize = 512;
const MAX_TEXT_BYTES: usize = 1024 * 1024;
const CONTEXT_RADIUS: usize = 64;

/// What the Extractor contributes to a `Page` (§4.5). The Scheduler fills
/// in `url`, `http_status`, `response_time_ms`, `session_id`, `crawled_at`
/// from the surrounding fetch.
#[derive(Debug, Clone)]
pub struct ExtractedPage {
    pub title: Option<String>,
    pub cleaned_text: String,
    pub html_size: usize,
    pub word_count: usize,
    pub content_hash: String,
}

/// What the Extractor contributes to a `Link` (§4.5). The Scheduler fills
/// in `session_id` and `discovered_at`.
#[derive(Debug, Clone)]
pub struct ExtractedLink {
    pub source_url: String,
    pub target_url: String,
    pub anchor_text: Option<String>,
    pub surrounding_context: Option<String>,
    pub is_nofollow: bool,
}

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Parse a fetched body into a `(Page, [Link])` pair per §4.5. Only
/// `text/html` and XHTML variants are parsed; anything else yields an
/// empty-text Page with no links.
pub fn extract(final_url: &Url, body: &[u8], content_type: Option<&str>) -> (ExtractedPage, Vec<ExtractedLink>) {
    if !is_html_content_type(content_type) {
        debug!(url = %final_url, content_type, "skipping extraction for non-html content type");
        return (empty_page(body.len()), Vec::new());
    }

    let text = String::from_utf8_lossy(body);
    let document = Html::parse_document(&text);

    let title = extract_title(&document);
    let cleaned_text = extract_cleaned_text(&document);
    let word_count = cleaned_text.split_whitespace().count();
    let content_hash = crawlforge_types::content_hash(&cleaned_text);
    let links = extract_links(&document, final_url, &cleaned_text);

    (
        ExtractedPage {
            title,
            cleaned_text,
            html_size: body.len(),
            word_count,
            content_hash,
        },
        links,
    )
}

fn empty_page(html_size: usize) -> ExtractedPage {
    ExtractedPage {
        title: None,
        cleaned_text: String::new(),
        html_size,
        word_count: 0,
        content_hash: crawlforge_types::content_hash(""),
    }
}

fn is_html_content_type(content_type: Option<&str>) -> bool {
    match content_type {
        None => true,
        Some(ct) => {
            let ct = ct.to_ascii_lowercase();
            ct.contains("text/html") || ct.contains("application/xhtml+xml")
        }
    }
}

fn selector(css: &str) -> Selector {
    Selector::parse(css).unwrap_or_else(|_| Selector::parse("nonexistent-tag").unwrap())
}

/// First `<title>`, falling back to the first `<h1>`, trimmed to 512 chars.
fn extract_title(doc: &Html) -> Option<String> {
    let title_sel = selector("title");
    let h1_sel = selector("h1");

    let raw = doc
        .select(&title_sel)
        .next()
        .or_else(|| doc.select(&h1_sel).next())
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())?;

    Some(truncate_chars(&raw, MAX_TITLE_CHARS))
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

const STRIPPED_TAGS: &[&str] = &["script", "style", "nav", "footer"];

/// Remove script/style/nav/footer subtrees, collapse whitespace, cap at 1
/// MiB.
fn extract_cleaned_text(doc: &Html) -> String {
    let body_sel = selector("body");
    let root = doc.select(&body_sel).next();

    let mut buf = String::new();
    match root {
        Some(body) => collect_text(body, &mut buf),
        None => collect_text(doc.root_element(), &mut buf),
    }

    let collapsed = WHITESPACE.replace_all(buf.trim(), " ").to_string();
    if collapsed.len() > MAX_TEXT_BYTES {
        truncate_bytes(&collapsed, MAX_TEXT_BYTES)
    } else {
        collapsed
    }
}

fn truncate_bytes(s: &str, max: usize) -> String {
    let mut end = max.min(s.len());
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

fn collect_text(el: ElementRef, buf: &mut String) {
    let tag = el.value().name();
    if STRIPPED_TAGS.contains(&tag) {
        return;
    }
    for child in el.children() {
        if let Some(child_el) = ElementRef::wrap(child) {
            collect_text(child_el, buf);
        } else if let Some(text_node) = child.value().as_text() {
            buf.push_str(text_node);
            buf.push(' ');
        }
    }
}

/// Every `<a href>`, resolved against `final_url`. Non-http(s) schemes and
/// fragment-only targets are dropped; `rel="nofollow"`/`ugc`/`sponsored`
/// marks `is_nofollow`.
fn extract_links(doc: &Html, final_url: &Url, cleaned_text: &str) -> Vec<ExtractedLink> {
    let a_sel = selector("a[href]");
    let mut links = Vec::new();

    for el in doc.select(&a_sel) {
        let Some(href) = el.value().attr("href") else {
            continue;
        };
        let href = href.trim();
        if href.is_empty() || href.starts_with('#') {
            continue;
        }

        let Ok(mut target) = final_url.join(href) else {
            continue;
        };
        if !matches!(target.scheme(), "http" | "https") {
            continue;
        }
        target.set_fragment(None);

        let anchor_text = {
            let text = el.text().collect::<String>().trim().to_string();
            if text.is_empty() { None } else { Some(text) }
        };

        let surrounding_context = anchor_text
            .as_deref()
            .and_then(|anchor| surrounding_context_for(cleaned_text, anchor));

        let is_nofollow = el
            .value()
            .attr("rel")
            .map(|rel| {
                rel.split_ascii_whitespace()
                    .any(|token| matches!(token, "nofollow" | "ugc" | "sponsored"))
            })
            .unwrap_or(false);

        links.push(ExtractedLink {
            source_url: final_url.to_string(),
            target_url: target.to_string(),
            anchor_text,
            surrounding_context,
            is_nofollow,
        });
    }

    links
}

/// Up to 64 chars on each side of `anchor`'s first occurrence in
/// `cleaned_text`.
fn surrounding_context_for(cleaned_text: &str, anchor: &str) -> Option<String> {
    let pos = cleaned_text.find(anchor)?;
    let start = cleaned_text[..pos]
        .char_indices()
        .rev()
        .nth(CONTEXT_RADIUS)
        .map(|(i, _)| i)
        .unwrap_or(0);
    let end_from = pos + anchor.len();
    let end = cleaned_text[end_from..]
        .char_indices()
        .nth(CONTEXT_RADIUS)
        .map(|(i, _)| end_from + i)
        .unwrap_or(cleaned_text.len());
    Some(cleaned_text[start..end].to_string())
}
