//! URL normalization (§3).
//!
//! `normalize` is required to be idempotent: `normalize(normalize(u)) ==
//! normalize(u)` for all `u`. The transformation is built entirely out of
//! operations that are themselves idempotent (lowercasing, a single
//! default-port strip, a single trailing-slash strip, fragment removal) so
//! the property falls out of composition rather than needing a fixed-point
//! loop.

use crate::error::CrawlError;
use url::Url;

/// Normalize an absolute URL string per §3:
/// - lowercase scheme and host
/// - strip default ports (80/http, 443/https)
/// - percent-encoding normalized (delegated to the `url` crate's parser)
/// - fragment removed
/// - trailing slash stripped, except on the root path `/`
/// - query parameter order preserved as written
pub fn normalize_url(input: &str) -> Result<String, CrawlError> {
    let mut url = Url::parse(input).map_err(|e| CrawlError::Internal(format!("invalid url: {e}")))?;

    url.set_fragment(None);

    // `url` lowercases the scheme during parsing; host is lowercased for
    // non-opaque (domain) hosts but we normalize explicitly for safety.
    if let Some(host) = url.host_str() {
        let lower = host.to_ascii_lowercase();
        if lower != host {
            url.set_host(Some(&lower))
                .map_err(|e| CrawlError::Internal(format!("invalid host: {e}")))?;
        }
    }

    strip_default_port(&mut url);
    strip_trailing_slash(&mut url);

    Ok(url.to_string())
}

fn strip_default_port(url: &mut Url) {
    let is_default = match (url.scheme(), url.port()) {
        ("http", Some(80)) => true,
        ("https", Some(443)) => true,
        _ => false,
    };
    if is_default {
        let _ = url.set_port(None);
    }
}

fn strip_trailing_slash(url: &mut Url) {
    let path = url.path();
    if path.len() > 1 && path.ends_with('/') {
        let trimmed = path.trim_end_matches('/').to_string();
        let trimmed = if trimmed.is_empty() {
            "/".to_string()
        } else {
            trimmed
        };
        url.set_path(&trimmed);
    }
}
