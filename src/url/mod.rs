//! URL handling module for Crawl-Ingest
//!
//! This module decides which discovered links belong to a crawl (the scope
//! filter) and derives the dedup key used by the visited set.

mod normalize;
mod scope;

// Re-export main functions
pub use normalize::visit_key;
pub use scope::{check_scope, in_scope, scope_host};
