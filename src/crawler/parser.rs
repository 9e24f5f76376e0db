//! HTML parser for extracting links and page text
//!
//! This module handles parsing rendered HTML to extract:
//! - In-scope links to follow (from <a> tags)
//! - Page title
//! - Visible page text for the content pipeline

use crate::url::in_scope;
use scraper::{ElementRef, Html, Node, Selector};
use std::collections::HashSet;
use url::Url;

/// Elements whose text never reaches the content pipeline
const HIDDEN_ELEMENTS: &[&str] = &["script", "style", "noscript", "template", "head"];

/// Extracted information from a rendered page
#[derive(Debug, Clone, Default)]
pub struct ParsedPage {
    /// The page title (from <title> tag)
    pub title: Option<String>,

    /// Visible text, one text node per line
    pub text: String,

    /// In-scope links in first-occurrence order, without duplicates
    pub links: Vec<String>,
}

/// Parses a rendered page once, yielding its title, text and in-scope links
///
/// Malformed markup never errors; the HTML parser recovers and whatever it
/// recovers is used.
///
/// # Arguments
///
/// * `html` - The rendered page source
/// * `anchor` - URL the page was fetched from; relative links resolve against it
///
/// # Returns
///
/// The page title (if any), its visible text and its in-scope links
pub fn parse_page(html: &str, anchor: &str) -> ParsedPage {
    let document = Html::parse_document(html);

    ParsedPage {
        title: extract_title(&document),
        text: extract_text(&document),
        links: collect_links(&document, anchor),
    }
}

/// Returns the in-scope links of a page
///
/// Every `<a href>` is resolved against `anchor`, filtered through
/// [`in_scope`] and deduplicated by exact string equality, keeping the first
/// occurrence.
///
/// # Arguments
///
/// * `html` - The page source
/// * `anchor` - URL whose host bounds the crawl
///
/// # Returns
///
/// Absolute in-scope URLs, possibly empty
///
/// # Example
///
/// ```
/// use crawl_ingest::crawler::extract_links;
///
/// let html = r#"<a href="/docs">Docs</a><a href="https://other.test/">Away</a>"#;
/// let links = extract_links(html, "https://site.test/");
/// assert_eq!(links, vec!["https://site.test/docs".to_string()]);
/// ```
pub fn extract_links(html: &str, anchor: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    collect_links(&document, anchor)
}

/// Extracts the page title from the HTML document
fn extract_title(document: &Html) -> Option<String> {
    let title_selector = Selector::parse("title").ok()?;

    document
        .select(&title_selector)
        .next()
        .map(|element| element.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
}

fn collect_links(document: &Html, anchor: &str) -> Vec<String> {
    let mut links = Vec::new();
    let Ok(a_selector) = Selector::parse("a[href]") else {
        return links;
    };

    // An anchor that does not parse can still be compared, it just never matches
    let base_url = Url::parse(anchor).ok();
    let mut seen = HashSet::new();

    for element in document.select(&a_selector) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        let Some(link) = resolve_link(href, base_url.as_ref()) else {
            continue;
        };
        if !in_scope(&link, anchor) {
            continue;
        }
        if seen.insert(link.clone()) {
            links.push(link);
        }
    }

    links
}

/// Resolves a link href to an absolute URL
///
/// Returns None if the link should be excluded:
/// - javascript:, mailto:, tel: schemes
/// - data: URIs
/// - Fragment-only links
/// - hrefs that cannot be resolved
fn resolve_link(href: &str, base_url: Option<&Url>) -> Option<String> {
    let href = href.trim();

    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let lowered = href.to_ascii_lowercase();
    if ["javascript:", "mailto:", "tel:", "data:"]
        .iter()
        .any(|scheme| lowered.starts_with(scheme))
    {
        return None;
    }

    match base_url {
        Some(base) => base.join(href).ok().map(|u| u.to_string()),
        None => Url::parse(href).ok().map(|u| u.to_string()),
    }
}

fn extract_text(document: &Html) -> String {
    let mut lines = Vec::new();
    collect_text(document.root_element(), &mut lines);
    lines.join("\n")
}

fn collect_text(element: ElementRef<'_>, lines: &mut Vec<String>) {
    if HIDDEN_ELEMENTS.contains(&element.value().name()) {
        return;
    }

    for child in element.children() {
        match child.value() {
            Node::Text(text) => {
                let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
                if !collapsed.is_empty() {
                    lines.push(collapsed);
                }
            }
            Node::Element(_) => {
                if let Some(child_element) = ElementRef::wrap(child) {
                    collect_text(child_element, lines);
                }
            }
            _ => {}
        }
    }
}
