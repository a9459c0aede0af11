//! # CrawlForge Extract
//!
//! The Extractor (§4.5): parses a fetched HTML body into a `Page` and its
//! outbound `Link`s. Grounded in the teacher's
//! `riptide-extraction::html_parser::EnhancedHtmlExtractor` (metadata/title
//! extraction shape) and `riptide-extraction::spider::link_extractor`
//! (selector-driven link resolution), both built on `scraper`.

mod extractor;

pub use extractor::{extract, ExtractedPage};
