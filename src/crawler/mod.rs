//! Crawler module for rendering, parsing and traversing pages
//!
//! This module contains the core crawling logic, including:
//! - Remote browser sessions (WebDriver)
//! - HTML parsing, text and link extraction
//! - The depth-first traversal that records and ingests every page

mod fetcher;
mod orchestrator;
mod parser;

pub use fetcher::{BrowserLauncher, BrowserSession, FetchTimeouts, WebDriverLauncher, WebDriverSession};
pub use orchestrator::{CrawlReport, CrawlRun, Crawler};
pub use parser::{extract_links, parse_page, ParsedPage};
