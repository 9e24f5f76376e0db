//! Integration tests for the crawler
//!
//! These tests drive full crawls against an in-memory site served by a fake
//! browser, a recording content pipeline and a SQLite state database on disk.
//! One test runs the real WebDriver client against a wiremock grid.

use async_trait::async_trait;
use crawl_ingest::crawler::{
    BrowserLauncher, BrowserSession, CrawlRun, Crawler, FetchTimeouts, WebDriverLauncher,
};
use crawl_ingest::pipeline::{ContentPipeline, TextSplitter};
use crawl_ingest::storage::{open_storage, shared, with_store, CrawlRecord, SharedStore};
use crawl_ingest::{FailureKind, FetchError, IngestError, RecordStatus};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TENANT: &str = "bot-42";
const SEED: &str = "http://site.test/";

/// A website the fake browser can render
#[derive(Default)]
struct Site {
    pages: HashMap<String, String>,
    failing: Mutex<HashSet<String>>,
    panicking: HashSet<String>,
}

impl Site {
    fn page(mut self, url: &str, body: &str) -> Self {
        self.pages.insert(
            url.to_string(),
            format!("<html><head><title>{}</title></head><body>{}</body></html>", url, body),
        );
        self
    }

    fn failing(self, url: &str) -> Self {
        self.failing.lock().unwrap().insert(url.to_string());
        self
    }

    fn panicking(mut self, url: &str) -> Self {
        self.panicking.insert(url.to_string());
        self
    }

    fn heal(&self, url: &str) {
        self.failing.lock().unwrap().remove(url);
    }
}

struct FakeBrowser {
    site: Arc<Site>,
    refuse_sessions: bool,
    opened: AtomicUsize,
    closed: Arc<AtomicUsize>,
    fetches: Arc<Mutex<Vec<String>>>,
    /// Store the sessions look at before every fetch
    store: Mutex<Option<SharedStore>>,
    /// `(url, whether a PENDING record for it existed when it was fetched)`
    pending_at_fetch: Arc<Mutex<Vec<(String, bool)>>>,
}

impl FakeBrowser {
    fn new(site: Site) -> Self {
        Self {
            site: Arc::new(site),
            refuse_sessions: false,
            opened: AtomicUsize::new(0),
            closed: Arc::new(AtomicUsize::new(0)),
            fetches: Arc::new(Mutex::new(Vec::new())),
            store: Mutex::new(None),
            pending_at_fetch: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn pending_at_fetch(&self) -> Vec<(String, bool)> {
        self.pending_at_fetch.lock().unwrap().clone()
    }

    fn fetches(&self) -> Vec<String> {
        self.fetches.lock().unwrap().clone()
    }

    fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrowserLauncher for FakeBrowser {
    async fn open(&self, _timeouts: &FetchTimeouts) -> Result<Box<dyn BrowserSession>, FetchError> {
        if self.refuse_sessions {
            return Err(FetchError::Transport("grid unavailable".to_string()));
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSession {
            site: self.site.clone(),
            closed: self.closed.clone(),
            fetches: self.fetches.clone(),
            store: self.store.lock().unwrap().clone(),
            pending_at_fetch: self.pending_at_fetch.clone(),
        }))
    }
}

struct FakeSession {
    site: Arc<Site>,
    closed: Arc<AtomicUsize>,
    fetches: Arc<Mutex<Vec<String>>>,
    store: Option<SharedStore>,
    pending_at_fetch: Arc<Mutex<Vec<(String, bool)>>>,
}

#[async_trait]
impl BrowserSession for FakeSession {
    async fn render_page(&mut self, url: &str) -> Result<String, FetchError> {
        self.fetches.lock().unwrap().push(url.to_string());

        if let Some(store) = &self.store {
            let pending = with_store(store, |s| s.get_records_by_status(TENANT, RecordStatus::Pending))
                .unwrap_or_default();
            let registered = pending.iter().any(|record| record.url == url);
            self.pending_at_fetch
                .lock()
                .unwrap()
                .push((url.to_string(), registered));
        }

        if self.site.panicking.contains(url) {
            panic!("renderer crashed on {}", url);
        }
        if self.site.failing.lock().unwrap().contains(url) {
            return Err(FetchError::Timeout {
                url: url.to_string(),
                message: "page load".to_string(),
            });
        }
        self.site
            .pages
            .get(url)
            .cloned()
            .ok_or_else(|| FetchError::Navigation {
                url: url.to_string(),
                message: "404".to_string(),
            })
    }

    async fn close(self: Box<Self>) -> Result<(), FetchError> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Records every ingest call as `(tenant, url, chunk count)`
#[derive(Default)]
struct RecordingPipeline {
    calls: Mutex<Vec<(String, String, usize)>>,
    failing: HashSet<String>,
    panicking: HashSet<String>,
}

impl RecordingPipeline {
    fn ingested_urls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(_, url, _)| url.clone())
            .collect()
    }
}

#[async_trait]
impl ContentPipeline for RecordingPipeline {
    async fn ingest(&self, tenant_id: &str, source_url: &str, chunks: &[String]) -> Result<(), IngestError> {
        if self.panicking.contains(source_url) {
            panic!("embedding client bug");
        }
        self.calls
            .lock()
            .unwrap()
            .push((tenant_id.to_string(), source_url.to_string(), chunks.len()));
        if self.failing.contains(source_url) {
            return Err(IngestError::VectorStore("collection unavailable".to_string()));
        }
        Ok(())
    }
}

struct Harness {
    crawler: Crawler,
    browser: Arc<FakeBrowser>,
    pipeline: Arc<RecordingPipeline>,
    _dir: TempDir,
}

impl Harness {
    fn new(browser: FakeBrowser, pipeline: RecordingPipeline, max_depth: u32) -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let store: SharedStore =
            shared(open_storage(&dir.path().join("state.db")).expect("Failed to open storage"));
        *browser.store.lock().unwrap() = Some(store.clone());
        let browser = Arc::new(browser);
        let pipeline = Arc::new(pipeline);

        let crawler = Crawler::new(
            store,
            browser.clone(),
            pipeline.clone(),
            TextSplitter::new(200, 20).unwrap(),
        )
        .with_max_depth(max_depth);

        Self {
            crawler,
            browser,
            pipeline,
            _dir: dir,
        }
    }

    fn records(&self, status: RecordStatus) -> Vec<CrawlRecord> {
        with_store(self.crawler.store(), |s| s.get_records_by_status(TENANT, status)).unwrap()
    }

    fn record_for(&self, url: &str) -> CrawlRecord {
        RecordStatus::all_statuses()
            .into_iter()
            .flat_map(|status| self.records(status))
            .find(|record| record.url == url)
            .unwrap_or_else(|| panic!("no record for {}", url))
    }

    fn total_records(&self) -> u64 {
        with_store(self.crawler.store(), |s| s.count_by_status(TENANT))
            .unwrap()
            .values()
            .sum()
    }
}

#[tokio::test]
async fn test_crawl_stays_in_scope_and_respects_depth() {
    let site = Site::default()
        .page(SEED, r#"<p>Home</p><a href="/a">A</a><a href="http://other.test/x">Other</a>"#)
        .page("http://site.test/a", r#"<p>Page A</p><a href="/b">B</a>"#)
        .page("http://site.test/b", "<p>Page B</p>")
        .page("http://other.test/x", "<p>Elsewhere</p>");
    let h = Harness::new(FakeBrowser::new(site), RecordingPipeline::default(), 2);

    let report = h.crawler.crawl(SEED, TENANT).await;

    assert!(report.is_clean(), "unexpected report: {:?}", report);
    assert_eq!(report.succeeded, 2);
    assert_eq!(h.browser.fetches(), vec![SEED, "http://site.test/a"]);
    assert_eq!(h.total_records(), 2);
    assert_eq!(h.records(RecordStatus::Success).len(), 2);

    let calls = h.pipeline.calls.lock().unwrap().clone();
    assert!(calls.iter().all(|(tenant, _, chunks)| tenant == TENANT && *chunks > 0));
}

#[tokio::test]
async fn test_record_is_pending_before_every_fetch() {
    let site = Site::default()
        .page(SEED, r#"<a href="/a">A</a><a href="/b">B</a>"#)
        .page("http://site.test/a", r#"<a href="/c">C</a>"#)
        .page("http://site.test/c", "<p>C</p>")
        .failing("http://site.test/b");
    let h = Harness::new(FakeBrowser::new(site), RecordingPipeline::default(), 3);

    h.crawler.crawl(SEED, TENANT).await;

    let checks = h.browser.pending_at_fetch();
    assert_eq!(checks.len(), 4);
    for (url, registered) in checks {
        assert!(registered, "{} was fetched without a PENDING record", url);
    }
}

#[tokio::test]
async fn test_children_are_ingested_before_parent() {
    let site = Site::default()
        .page(SEED, r#"<a href="/a">A</a><a href="/b">B</a>"#)
        .page("http://site.test/a", r#"<a href="/a/deep">Deep</a>"#)
        .page("http://site.test/a/deep", "<p>Deep</p>")
        .page("http://site.test/b", "<p>B</p>");
    let h = Harness::new(FakeBrowser::new(site), RecordingPipeline::default(), 3);

    let report = h.crawler.crawl(SEED, TENANT).await;

    assert_eq!(report.succeeded, 4);
    assert_eq!(
        h.browser.fetches(),
        vec![SEED, "http://site.test/a", "http://site.test/a/deep", "http://site.test/b"]
    );
    assert_eq!(
        h.pipeline.ingested_urls(),
        vec![
            "http://site.test/a/deep",
            "http://site.test/a",
            "http://site.test/b",
            SEED
        ]
    );
}

#[tokio::test]
async fn test_cycles_are_fetched_once() {
    let site = Site::default()
        .page(SEED, r#"<a href="/a">A</a><a href="/#top">Top</a>"#)
        .page("http://site.test/a", r#"<a href="/">Home</a><a href="/a#section">Self</a>"#);
    let h = Harness::new(FakeBrowser::new(site), RecordingPipeline::default(), 10);

    let report = h.crawler.crawl(SEED, TENANT).await;

    assert_eq!(report.succeeded, 2);
    assert_eq!(h.browser.fetches().len(), 2);
    assert_eq!(h.total_records(), 2);
}

#[tokio::test]
async fn test_fetch_failure_is_isolated_to_its_node() {
    let site = Site::default()
        .page(SEED, r#"<a href="/a">A</a><a href="/b">B</a>"#)
        .page("http://site.test/a", "<p>A</p>")
        .page("http://site.test/b", "<p>B</p>")
        .failing("http://site.test/a");
    let h = Harness::new(FakeBrowser::new(site), RecordingPipeline::default(), 2);

    let report = h.crawler.crawl(SEED, TENANT).await;

    assert_eq!(report.succeeded, 2);
    assert_eq!(report.failed, 1);
    assert!(report.aborted.is_none());

    let failed = h.record_for("http://site.test/a");
    assert_eq!(failed.status, RecordStatus::Failed);
    assert_eq!(failed.failure_kind, Some(FailureKind::Fetch));
    assert!(failed.error_detail.unwrap().contains("timed out"));

    assert_eq!(h.record_for("http://site.test/b").status, RecordStatus::Success);
    assert_eq!(h.record_for(SEED).status, RecordStatus::Success);
    assert!(!h.pipeline.ingested_urls().contains(&"http://site.test/a".to_string()));
}

#[tokio::test]
async fn test_pipeline_failure_marks_record_failed() {
    let site = Site::default()
        .page(SEED, r#"<p>Home</p><a href="/a">A</a>"#)
        .page("http://site.test/a", "<p>A</p>");
    let pipeline = RecordingPipeline {
        failing: HashSet::from(["http://site.test/a".to_string()]),
        ..RecordingPipeline::default()
    };
    let h = Harness::new(FakeBrowser::new(site), pipeline, 2);

    let report = h.crawler.crawl(SEED, TENANT).await;

    assert_eq!(report.failed, 1);
    let record = h.record_for("http://site.test/a");
    assert_eq!(record.status, RecordStatus::Failed);
    assert_eq!(record.failure_kind, Some(FailureKind::Ingest));
    assert_eq!(h.record_for(SEED).status, RecordStatus::Success);
}

#[tokio::test]
async fn test_panics_become_unhandled_failures() {
    let site = Site::default()
        .page(SEED, r#"<p>Home</p><a href="/a">A</a><a href="/b">B</a>"#)
        .page("http://site.test/a", "<p>A</p>")
        .page("http://site.test/b", "<p>B</p>")
        .panicking("http://site.test/a");
    let pipeline = RecordingPipeline {
        panicking: HashSet::from(["http://site.test/b".to_string()]),
        ..RecordingPipeline::default()
    };
    let h = Harness::new(FakeBrowser::new(site), pipeline, 2);

    let report = h.crawler.crawl(SEED, TENANT).await;

    assert!(report.aborted.is_none());
    assert_eq!(report.failed, 2);
    assert_eq!(report.succeeded, 1);

    for url in ["http://site.test/a", "http://site.test/b"] {
        let record = h.record_for(url);
        assert_eq!(record.status, RecordStatus::Failed);
        assert_eq!(record.failure_kind, Some(FailureKind::Unhandled));
        assert!(record.error_detail.unwrap().starts_with("panic:"));
    }
    assert_eq!(h.browser.closed(), 1);
}

#[tokio::test]
async fn test_status_transitions_are_monotonic() {
    let site = Site::default().page(SEED, "<p>Home</p>");
    let h = Harness::new(FakeBrowser::new(site), RecordingPipeline::default(), 2);

    h.crawler.crawl(SEED, TENANT).await;

    let record = h.record_for(SEED);
    let transitions = with_store(h.crawler.store(), |s| s.get_transitions(record.id)).unwrap();
    assert_eq!(
        transitions,
        vec![(1, RecordStatus::Pending), (1, RecordStatus::Success)]
    );
    assert_eq!(record.attempts, 1);
}

#[tokio::test]
async fn test_shallow_depth_does_not_recurse() {
    let site = Site::default()
        .page(SEED, r#"<p>Home</p><a href="/a">A</a>"#)
        .page("http://site.test/a", "<p>A</p>");

    let h = Harness::new(FakeBrowser::new(site), RecordingPipeline::default(), 15);
    let mut session = h.browser.open(&FetchTimeouts::default()).await.unwrap();

    let mut run = CrawlRun::new(SEED, TENANT);
    h.crawler.traverse(&mut run, session.as_mut(), SEED, 0).await;
    assert_eq!(run.report().succeeded, 1);
    assert!(run.has_visited(SEED));
    assert!(!run.has_visited("http://site.test/a"));

    let mut run = CrawlRun::new("http://site.test/a", TENANT);
    h.crawler
        .traverse(&mut run, session.as_mut(), "http://site.test/a", 1)
        .await;
    assert_eq!(run.report().succeeded, 1);
    assert_eq!(run.visited_count(), 1);

    session.close().await.unwrap();
    assert_eq!(h.browser.fetches(), vec![SEED, "http://site.test/a"]);
}

#[tokio::test]
async fn test_zero_max_depth_still_ingests_seed() {
    let site = Site::default()
        .page(SEED, r#"<p>Home</p><a href="/a">A</a>"#)
        .page("http://site.test/a", "<p>A</p>");
    let h = Harness::new(FakeBrowser::new(site), RecordingPipeline::default(), 0);

    let report = h.crawler.crawl(SEED, TENANT).await;

    assert_eq!(report.succeeded, 1);
    assert_eq!(h.browser.fetches(), vec![SEED]);
    assert_eq!(h.pipeline.ingested_urls(), vec![SEED]);
}

#[tokio::test]
async fn test_resume_failed_retries_single_record() {
    let site = Site::default()
        .page(SEED, r#"<a href="/a">A</a>"#)
        .page("http://site.test/a", r#"<p>A</p><a href="/c">C</a>"#)
        .page("http://site.test/c", "<p>C</p>")
        .failing("http://site.test/a");
    let h = Harness::new(FakeBrowser::new(site), RecordingPipeline::default(), 5);

    let report = h.crawler.crawl(SEED, TENANT).await;
    assert_eq!(report.failed, 1);
    let failed = h.record_for("http://site.test/a");
    assert_eq!(h.total_records(), 2);

    h.browser.site.heal("http://site.test/a");
    let fetches_before = h.browser.fetches().len();

    let report = h.crawler.resume_failed(failed.id).await;

    assert!(report.is_clean(), "unexpected report: {:?}", report);
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.seed_url, "http://site.test/a");
    assert_eq!(report.tenant_id, TENANT);
    assert_eq!(h.browser.fetches().split_off(fetches_before), vec!["http://site.test/a"]);
    assert_eq!(h.total_records(), 2);

    let record = h.record_for("http://site.test/a");
    assert_eq!(record.id, failed.id);
    assert_eq!(record.status, RecordStatus::Success);
    assert_eq!(record.attempts, 2);
    assert_eq!(record.failure_kind, None);

    let transitions = with_store(h.crawler.store(), |s| s.get_transitions(record.id)).unwrap();
    assert_eq!(
        transitions,
        vec![
            (1, RecordStatus::Pending),
            (1, RecordStatus::Failed),
            (2, RecordStatus::Pending),
            (2, RecordStatus::Success),
        ]
    );
    assert_eq!(h.browser.closed(), 2);
}

#[tokio::test]
async fn test_resume_picks_up_interrupted_record() {
    let site = Site::default().page("http://site.test/a", r#"<p>A</p><a href="/c">C</a>"#);
    let h = Harness::new(FakeBrowser::new(site), RecordingPipeline::default(), 5);

    // A run that died after registering the page but before marking it
    let stranded = with_store(h.crawler.store(), |s| {
        s.create_record(TENANT, "http://site.test/a", RecordStatus::Pending)
    })
    .unwrap();

    let report = h.crawler.resume_failed(stranded.id).await;

    assert!(report.is_clean(), "unexpected report: {:?}", report);
    assert_eq!(h.browser.fetches(), vec!["http://site.test/a"]);
    assert_eq!(
        h.browser.pending_at_fetch(),
        vec![("http://site.test/a".to_string(), true)]
    );
    assert_eq!(h.total_records(), 1);

    let record = h.record_for("http://site.test/a");
    assert_eq!(record.status, RecordStatus::Success);
    assert_eq!(record.attempts, 2);
    let transitions = with_store(h.crawler.store(), |s| s.get_transitions(record.id)).unwrap();
    assert_eq!(
        transitions,
        vec![
            (1, RecordStatus::Pending),
            (2, RecordStatus::Pending),
            (2, RecordStatus::Success),
        ]
    );
}

#[tokio::test]
async fn test_resume_rejects_unknown_and_succeeded_records() {
    let site = Site::default().page(SEED, "<p>Home</p>");
    let h = Harness::new(FakeBrowser::new(site), RecordingPipeline::default(), 2);

    let report = h.crawler.resume_failed(4242).await;
    assert!(report.aborted.unwrap().contains("not found"));
    assert_eq!(h.browser.opened(), 0);

    h.crawler.crawl(SEED, TENANT).await;
    let record = h.record_for(SEED);

    let report = h.crawler.resume_failed(record.id).await;
    assert!(report.aborted.unwrap().contains("already succeeded"));
    assert_eq!(h.browser.opened(), 1);
    assert_eq!(h.record_for(SEED).attempts, 1);
}

#[tokio::test]
async fn test_session_open_failure_aborts_without_records() {
    let mut browser = FakeBrowser::new(Site::default().page(SEED, "<p>Home</p>"));
    browser.refuse_sessions = true;
    let h = Harness::new(browser, RecordingPipeline::default(), 2);

    let report = h.crawler.crawl(SEED, TENANT).await;

    assert!(report.aborted.as_ref().unwrap().contains("grid unavailable"));
    assert_eq!(report.completed(), 0);
    assert_eq!(h.total_records(), 0);
    assert!(h.browser.fetches().is_empty());
}

#[tokio::test]
async fn test_session_closed_after_every_crawl() {
    let site = Site::default()
        .page(SEED, r#"<a href="/a">A</a>"#)
        .failing("http://site.test/a");
    let h = Harness::new(FakeBrowser::new(site), RecordingPipeline::default(), 2);

    h.crawler.crawl(SEED, TENANT).await;
    h.crawler.crawl("http://site.test/missing", TENANT).await;

    assert_eq!(h.browser.opened(), 2);
    assert_eq!(h.browser.closed(), 2);
    assert_eq!(
        h.record_for("http://site.test/missing").failure_kind,
        Some(FailureKind::Fetch)
    );
}

#[tokio::test]
async fn test_crawl_through_webdriver_grid() {
    let grid = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/session"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": { "sessionId": "s-1", "capabilities": { "browserName": "firefox" } }
        })))
        .expect(1)
        .mount(&grid)
        .await;
    for command in ["/session/s-1/timeouts", "/session/s-1/url"] {
        Mock::given(method("POST"))
            .and(path(command))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "value": null })))
            .mount(&grid)
            .await;
    }
    Mock::given(method("GET"))
        .and(path("/session/s-1/source"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": "<html><body><p>Rendered by the grid</p><a href=\"/next\">Next</a></body></html>"
        })))
        .mount(&grid)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/session/s-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "value": null })))
        .expect(1)
        .mount(&grid)
        .await;

    let dir = TempDir::new().unwrap();
    let store = shared(open_storage(&dir.path().join("state.db")).unwrap());
    let pipeline = Arc::new(RecordingPipeline::default());
    let crawler = Crawler::new(
        store,
        Arc::new(WebDriverLauncher::new(grid.uri(), "firefox", true)),
        pipeline.clone(),
        TextSplitter::default(),
    )
    .with_max_depth(1);

    let report = crawler.crawl(SEED, TENANT).await;

    assert!(report.is_clean(), "unexpected report: {:?}", report);
    assert_eq!(report.succeeded, 1);
    assert_eq!(pipeline.ingested_urls(), vec![SEED]);
}
