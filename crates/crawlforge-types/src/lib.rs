//! # CrawlForge Types
//!
//! Shared domain entities and the unified error type for the CrawlForge
//! crawling engine. Every other crate in the workspace depends on this one
//! and nothing else in the opposite direction — it is the bottom of the DAG.

pub mod error;
pub mod normalize;
pub mod types;

pub use error::{CrawlError, Result};
pub use normalize::normalize_url;
pub use types::*;
