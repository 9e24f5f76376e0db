use url::Url;

/// Derives the dedup key used by the visited set
///
/// # Normalization Steps
///
/// 1. Parse the URL; unparseable input is used verbatim
/// 2. Lowercase the host and drop a default port (done by the parser)
/// 3. Resolve dot segments in the path (done by the parser)
/// 4. Remove the fragment
/// 5. Remove an empty query string (trailing ?)
///
/// Scheme, path case, and query parameter order are preserved: two URLs that
/// differ in any of those are different pages as far as the crawl is concerned.
///
/// # Examples
///
/// ```
/// use crawl_ingest::url::visit_key;
///
/// assert_eq!(visit_key("http://A.TEST:80/x/../y#top"), "http://a.test/y");
/// assert_eq!(visit_key("garbage"), "garbage");
/// ```
pub fn visit_key(raw: &str) -> String {
    let mut url = match Url::parse(raw) {
        Ok(url) => url,
        Err(_) => return raw.to_string(),
    };

    url.set_fragment(None);

    if url.query() == Some("") {
        url.set_query(None);
    }

    url.to_string()
}
