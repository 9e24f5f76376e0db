//! Crawl orchestration
//!
//! This module contains the depth-first traversal that ties the other parts
//! together:
//! - Visited-set dedup and the depth budget
//! - Registering a PENDING record before every fetch
//! - Fetching, parsing and following in-scope links
//! - Ingesting each page after its children, and marking its record
//! - Isolating failures (errors and panics) to the node they occur in

use crate::config::Config;
use crate::crawler::fetcher::{BrowserLauncher, BrowserSession, FetchTimeouts, WebDriverLauncher};
use crate::crawler::parser::{parse_page, ParsedPage};
use crate::pipeline::{ContentPipeline, EmbeddingPipeline, TextSplitter};
use crate::state::{NodeFailure, RecordStatus};
use crate::storage::{open_storage, shared, with_store, SharedStore};
use crate::url::visit_key;
use crate::FetchError;
use futures::FutureExt;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

/// Outcome of one `crawl` or `resume_failed` invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlReport {
    pub seed_url: String,
    pub tenant_id: String,

    /// Records marked SUCCESS
    pub succeeded: usize,

    /// Records marked FAILED
    pub failed: usize,

    /// Nodes dropped because their record could not be created
    pub skipped: usize,

    /// Nodes whose final status could not be written; their records stay PENDING
    pub left_pending: usize,

    /// Set when the run as a whole could not complete
    pub aborted: Option<String>,
}

impl CrawlReport {
    /// Returns true if every node reached SUCCESS and the run was not aborted
    pub fn is_clean(&self) -> bool {
        self.aborted.is_none() && self.failed == 0 && self.skipped == 0 && self.left_pending == 0
    }

    /// Number of nodes that reached a terminal status
    pub fn completed(&self) -> usize {
        self.succeeded + self.failed
    }
}

/// State owned by one top-level invocation
pub struct CrawlRun {
    tenant_id: String,
    visited: HashSet<String>,
    report: CrawlReport,
}

impl CrawlRun {
    pub fn new(seed_url: &str, tenant_id: &str) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            visited: HashSet::new(),
            report: CrawlReport {
                seed_url: seed_url.to_string(),
                tenant_id: tenant_id.to_string(),
                ..CrawlReport::default()
            },
        }
    }

    pub fn has_visited(&self, url: &str) -> bool {
        self.visited.contains(&visit_key(url))
    }

    pub fn visited_count(&self) -> usize {
        self.visited.len()
    }

    pub fn report(&self) -> &CrawlReport {
        &self.report
    }

    pub fn into_report(self) -> CrawlReport {
        self.report
    }

    fn abort(&mut self, reason: impl Into<String>) {
        self.report.aborted = Some(reason.into());
    }
}

/// Pending work on the traversal stack
enum Frame {
    /// Register, fetch and expand a URL; `record_id` is set when the record already exists
    Visit {
        url: String,
        depth: u32,
        record_id: Option<i64>,
    },
    /// Run the content pipeline for an already fetched page and mark its record
    Ingest {
        record_id: i64,
        url: String,
        text: String,
    },
}

/// Drives crawls for any number of tenants
///
/// Each invocation owns its browser session and visited set; only the state
/// store, launcher and pipeline are shared.
pub struct Crawler {
    store: SharedStore,
    launcher: Arc<dyn BrowserLauncher>,
    pipeline: Arc<dyn ContentPipeline>,
    splitter: TextSplitter,
    max_depth: u32,
    timeouts: FetchTimeouts,
}

impl Crawler {
    pub fn new(
        store: SharedStore,
        launcher: Arc<dyn BrowserLauncher>,
        pipeline: Arc<dyn ContentPipeline>,
        splitter: TextSplitter,
    ) -> Self {
        Self {
            store,
            launcher,
            pipeline,
            splitter,
            max_depth: 15,
            timeouts: FetchTimeouts::default(),
        }
    }

    pub fn with_max_depth(mut self, max_depth: u32) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_timeouts(mut self, timeouts: FetchTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Builds a crawler with the SQLite store, WebDriver browser and
    /// embedding pipeline described by `config`
    pub fn from_config(config: &Config) -> crate::Result<Self> {
        let store = shared(open_storage(Path::new(&config.storage.database_path))?);
        let launcher = Arc::new(WebDriverLauncher::from_config(&config.browser));
        let pipeline = Arc::new(EmbeddingPipeline::from_config(config)?);
        let splitter = TextSplitter::new(config.pipeline.chunk_size, config.pipeline.chunk_overlap)?;

        Ok(Self::new(store, launcher, pipeline, splitter)
            .with_max_depth(config.crawler.max_depth)
            .with_timeouts(FetchTimeouts::from_config(&config.crawler)))
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    /// Crawls `seed_url` for `tenant_id` up to the configured depth
    ///
    /// Never fails: node failures are recorded on their records, and a run
    /// that cannot start or dies part-way is reported through
    /// [`CrawlReport::aborted`]. The browser session is closed on every path.
    pub async fn crawl(&self, seed_url: &str, tenant_id: &str) -> CrawlReport {
        let start_time = Instant::now();
        let mut run = CrawlRun::new(seed_url, tenant_id);

        tracing::info!(
            seed_url,
            tenant_id,
            max_depth = self.max_depth,
            "Starting crawl"
        );

        let mut session = match self.launcher.open(&self.timeouts).await {
            Ok(session) => session,
            Err(e) => {
                tracing::error!(seed_url, tenant_id, error = %e, "Failed to open browser session");
                run.abort(format!("failed to open browser session: {}", e));
                return finish_run(run, start_time);
            }
        };

        let traversal = AssertUnwindSafe(self.traverse(
            &mut run,
            session.as_mut(),
            seed_url,
            self.max_depth,
        ))
        .catch_unwind()
        .await;

        if let Err(panic) = traversal {
            let failure = NodeFailure::from_panic(&*panic);
            tracing::error!(seed_url, tenant_id, error = %failure, "Crawl aborted");
            run.abort(failure.detail);
        }

        close_session(session).await;
        finish_run(run, start_time)
    }

    /// Retries a single record with a fresh session and no link expansion
    ///
    /// The record is reopened as a new attempt rather than duplicated. Unknown
    /// ids and records that already succeeded are reported as aborted without
    /// opening a session.
    pub async fn resume_failed(&self, record_id: i64) -> CrawlReport {
        let start_time = Instant::now();

        let record = match with_store(&self.store, |s| s.get_record_by_id(record_id)) {
            Ok(Some(record)) => record,
            Ok(None) => {
                tracing::warn!(record_id, "Cannot resume unknown record");
                let mut run = CrawlRun::new("", "");
                run.abort(format!("record {} not found", record_id));
                return run.into_report();
            }
            Err(e) => {
                tracing::error!(record_id, error = %e, "Failed to load record");
                let mut run = CrawlRun::new("", "");
                run.abort(format!("failed to load record {}: {}", record_id, e));
                return run.into_report();
            }
        };

        let mut run = CrawlRun::new(&record.url, &record.tenant_id);

        if !record.is_resumable() {
            tracing::info!(record_id, url = %record.url, "Record already succeeded, nothing to resume");
            run.abort(format!("record {} already succeeded", record_id));
            return run.into_report();
        }

        let record = match with_store(&self.store, |s| s.reopen_record(record_id)) {
            Ok(record) => record,
            Err(e) => {
                tracing::error!(record_id, error = %e, "Failed to reopen record");
                run.abort(format!("failed to reopen record {}: {}", record_id, e));
                return run.into_report();
            }
        };

        tracing::info!(
            record_id,
            url = %record.url,
            tenant_id = %record.tenant_id,
            attempt = record.attempts,
            "Resuming record"
        );

        let mut session = match self.launcher.open(&self.timeouts).await {
            Ok(session) => session,
            Err(e) => {
                tracing::error!(record_id, error = %e, "Failed to open browser session");
                run.abort(format!("failed to open browser session: {}", e));
                return finish_run(run, start_time);
            }
        };

        let root = Frame::Visit {
            url: record.url.clone(),
            depth: 1,
            record_id: Some(record.id),
        };
        let traversal = AssertUnwindSafe(self.run_stack(&mut run, session.as_mut(), root))
            .catch_unwind()
            .await;

        if let Err(panic) = traversal {
            let failure = NodeFailure::from_panic(&*panic);
            tracing::error!(record_id, error = %failure, "Resume aborted");
            run.abort(failure.detail);
        }

        close_session(session).await;
        finish_run(run, start_time)
    }

    /// Depth-first traversal from `url` using `session`
    ///
    /// A depth of 0 or 1 fetches and ingests `url` without following its
    /// links. Children are visited, and marked, before their parent is
    /// ingested.
    pub async fn traverse(
        &self,
        run: &mut CrawlRun,
        session: &mut dyn BrowserSession,
        url: &str,
        depth: u32,
    ) {
        let root = Frame::Visit {
            url: url.to_string(),
            depth,
            record_id: None,
        };
        self.run_stack(run, session, root).await;
    }

    async fn run_stack(&self, run: &mut CrawlRun, session: &mut dyn BrowserSession, root: Frame) {
        let mut stack = vec![root];

        while let Some(frame) = stack.pop() {
            match frame {
                Frame::Visit {
                    url,
                    depth,
                    record_id,
                } => {
                    self.visit(run, session, &mut stack, url, depth, record_id)
                        .await;
                }
                Frame::Ingest {
                    record_id,
                    url,
                    text,
                } => {
                    self.ingest(run, record_id, &url, &text).await;

                    let completed = run.report.completed();
                    if completed > 0 && completed % 10 == 0 {
                        tracing::info!(
                            tenant_id = %run.tenant_id,
                            completed,
                            queued = stack.len(),
                            "Crawl progress"
                        );
                    }
                }
            }
        }
    }

    async fn visit(
        &self,
        run: &mut CrawlRun,
        session: &mut dyn BrowserSession,
        stack: &mut Vec<Frame>,
        url: String,
        depth: u32,
        record_id: Option<i64>,
    ) {
        if !run.visited.insert(visit_key(&url)) {
            tracing::trace!(url = %url, "Already visited");
            return;
        }

        let record_id = match record_id {
            Some(id) => id,
            None => {
                let created = with_store(&self.store, |s| {
                    s.create_record(&run.tenant_id, &url, RecordStatus::Pending)
                });
                match created {
                    Ok(record) => record.id,
                    Err(e) => {
                        tracing::error!(url = %url, error = %e, "Failed to register URL, skipping");
                        run.report.skipped += 1;
                        return;
                    }
                }
            }
        };

        tracing::debug!(url = %url, depth, record_id, "Fetching page");

        let fetched = AssertUnwindSafe(async {
            let html = session.render_page(&url).await?;
            Ok::<ParsedPage, FetchError>(parse_page(&html, &url))
        })
        .catch_unwind()
        .await;

        let page = match fetched {
            Ok(Ok(page)) => page,
            Ok(Err(e)) => {
                self.mark(run, record_id, &url, Err(NodeFailure::from(e)));
                return;
            }
            Err(panic) => {
                self.mark(run, record_id, &url, Err(NodeFailure::from_panic(&*panic)));
                return;
            }
        };

        tracing::debug!(
            url = %url,
            title = page.title.as_deref().unwrap_or(""),
            links = page.links.len(),
            "Parsed page"
        );

        stack.push(Frame::Ingest {
            record_id,
            url,
            text: page.text,
        });

        if depth > 1 {
            // Reversed so the first link is popped, and explored, first
            for link in page.links.into_iter().rev() {
                if !run.has_visited(&link) {
                    stack.push(Frame::Visit {
                        url: link,
                        depth: depth - 1,
                        record_id: None,
                    });
                }
            }
        }
    }

    async fn ingest(&self, run: &mut CrawlRun, record_id: i64, url: &str, text: &str) {
        let tenant_id = run.tenant_id.as_str();
        let outcome = AssertUnwindSafe(async {
            let chunks = self.splitter.split_text(text);
            tracing::debug!(url, chunks = chunks.len(), "Ingesting page");
            self.pipeline.ingest(tenant_id, url, &chunks).await
        })
        .catch_unwind()
        .await;

        let result = match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(NodeFailure::from(e)),
            Err(panic) => Err(NodeFailure::from_panic(&*panic)),
        };
        self.mark(run, record_id, url, result);
    }

    /// Writes the terminal status of one node
    ///
    /// A store failure leaves the record PENDING, so it stays eligible for
    /// `resume_failed`.
    fn mark(&self, run: &mut CrawlRun, record_id: i64, url: &str, outcome: Result<(), NodeFailure>) {
        let (status, failure) = match &outcome {
            Ok(()) => (RecordStatus::Success, None),
            Err(failure) => (RecordStatus::Failed, Some(failure)),
        };

        if let Err(e) = with_store(&self.store, |s| s.update_status(record_id, status, failure)) {
            tracing::error!(url, record_id, error = %e, "Failed to record page status");
            run.report.left_pending += 1;
            return;
        }

        match outcome {
            Ok(()) => {
                run.report.succeeded += 1;
                tracing::info!(url, record_id, "Page ingested");
            }
            Err(failure) => {
                run.report.failed += 1;
                tracing::warn!(url, record_id, kind = %failure.kind, error = %failure.detail, "Page failed");
            }
        }
    }
}

async fn close_session(session: Box<dyn BrowserSession>) {
    if let Err(e) = session.close().await {
        tracing::warn!(error = %e, "Failed to close browser session");
    }
}

fn finish_run(run: CrawlRun, start_time: Instant) -> CrawlReport {
    let report = run.into_report();
    tracing::info!(
        seed_url = %report.seed_url,
        tenant_id = %report.tenant_id,
        succeeded = report.succeeded,
        failed = report.failed,
        skipped = report.skipped,
        left_pending = report.left_pending,
        aborted = report.aborted.as_deref().unwrap_or(""),
        elapsed = ?start_time.elapsed(),
        "Crawl finished"
    );
    report
}
