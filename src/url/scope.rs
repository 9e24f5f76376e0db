use crate::ScopeError;
use url::Url;

/// Schemes a crawlable URL may use
const ALLOWED_SCHEMES: &[&str] = &["http", "https", "ftp"];

/// Extracts the scope host from a URL string
///
/// The string must be a well-formed absolute URL:
/// - no whitespace anywhere
/// - scheme `http`, `https` or `ftp`
/// - a host containing at least one dot
/// - no userinfo (`user:pass@`)
///
/// The returned host is lowercase; the URL parser already folds the case of
/// `http`, `https` and `ftp` hosts.
///
/// Port, path, query and fragment are optional and ignored.
///
/// # Examples
///
/// ```
/// use crawl_ingest::url::scope_host;
///
/// assert_eq!(scope_host("https://Docs.Example.com:8443/a?b#c").unwrap(), "docs.example.com");
/// assert!(scope_host("/relative/path").is_err());
/// assert!(scope_host("mailto:someone@example.com").is_err());
/// ```
pub fn scope_host(raw: &str) -> Result<String, ScopeError> {
    if raw.is_empty() || raw.chars().any(char::is_whitespace) {
        return Err(ScopeError::Malformed(raw.to_string()));
    }

    let url = Url::parse(raw).map_err(|e| ScopeError::Parse(format!("{}: {}", raw, e)))?;

    if !ALLOWED_SCHEMES.contains(&url.scheme()) {
        return Err(ScopeError::InvalidScheme(url.scheme().to_string()));
    }

    if !url.username().is_empty() || url.password().is_some() {
        return Err(ScopeError::Malformed(raw.to_string()));
    }

    match url.host_str() {
        Some(host) if host.contains('.') && !host.starts_with('.') && !host.ends_with('.') => {
            Ok(host.to_lowercase())
        }
        _ => Err(ScopeError::MissingDomain(raw.to_string())),
    }
}

/// Checks whether `candidate` is in scope of `anchor`
///
/// Both URLs must be well-formed (see [`scope_host`]) and their hosts must be
/// identical. Schemes and ports are not compared, and subdomains are not
/// folded: `www.example.com` is out of scope for `example.com`.
///
/// # Arguments
///
/// * `candidate` - A discovered link
/// * `anchor` - The URL that bounds the crawl
///
/// # Returns
///
/// * `Ok(())` - Both URLs are well-formed and share a host
/// * `Err(ScopeError)` - Why the candidate is out of scope
pub fn check_scope(candidate: &str, anchor: &str) -> Result<(), ScopeError> {
    let anchor_host = scope_host(anchor)?;
    let candidate_host = scope_host(candidate)?;

    if candidate_host == anchor_host {
        Ok(())
    } else {
        Err(ScopeError::ForeignHost {
            candidate: candidate_host,
            anchor: anchor_host,
        })
    }
}

/// Returns true if `candidate` may be crawled from `anchor`
///
/// # Examples
///
/// ```
/// use crawl_ingest::in_scope;
///
/// assert!(in_scope("http://a.test/b", "http://a.test/"));
/// assert!(!in_scope("http://other.test/", "http://a.test/"));
/// assert!(!in_scope("not a url", "http://a.test/"));
/// ```
pub fn in_scope(candidate: &str, anchor: &str) -> bool {
    check_scope(candidate, anchor).is_ok()
}
