//! Task queue boundary
//!
//! Crawl and resume requests arrive as [`CrawlTask`] payloads and are executed
//! by a fixed pool of workers. Submitting is fire-and-forget: the caller learns
//! the outcome from the records in the state store, or from the reports the
//! pool hands back on shutdown.

use crate::crawler::{CrawlReport, Crawler};
use crate::CrawlError;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// A unit of work for the worker pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CrawlTask {
    /// Crawl a site from `url` on behalf of `tenant_id`
    Crawl { url: String, tenant_id: String },

    /// Retry one record without following its links
    ResumeFailed { record_id: i64 },
}

impl CrawlTask {
    pub fn crawl(url: impl Into<String>, tenant_id: impl Into<String>) -> Self {
        Self::Crawl {
            url: url.into(),
            tenant_id: tenant_id.into(),
        }
    }

    pub fn resume_failed(record_id: i64) -> Self {
        Self::ResumeFailed { record_id }
    }

    /// Executes the task to completion
    pub async fn run(&self, crawler: &Crawler) -> CrawlReport {
        match self {
            Self::Crawl { url, tenant_id } => crawler.crawl(url, tenant_id).await,
            Self::ResumeFailed { record_id } => crawler.resume_failed(*record_id).await,
        }
    }
}

/// Fixed-size pool of crawl workers over a bounded queue
pub struct WorkerPool {
    sender: Option<mpsc::Sender<CrawlTask>>,
    workers: Vec<JoinHandle<()>>,
    reports: Arc<Mutex<Vec<CrawlReport>>>,
}

impl WorkerPool {
    /// Starts `workers` workers sharing one queue of `queue_capacity` tasks
    pub fn start(crawler: Arc<Crawler>, workers: usize, queue_capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(queue_capacity.max(1));
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let reports = Arc::new(Mutex::new(Vec::new()));

        let workers = (0..workers.max(1))
            .map(|worker_id| {
                tokio::spawn(worker_loop(
                    worker_id,
                    crawler.clone(),
                    receiver.clone(),
                    reports.clone(),
                ))
            })
            .collect();

        Self {
            sender: Some(sender),
            workers,
            reports,
        }
    }

    /// Queues a task, waiting for room if the queue is full
    pub async fn submit(&self, task: CrawlTask) -> Result<(), CrawlError> {
        let sender = self.sender.as_ref().ok_or(CrawlError::QueueClosed)?;
        tracing::debug!(task = ?task, "Submitting task");
        sender.send(task).await.map_err(|_| CrawlError::QueueClosed)
    }

    /// Closes the queue, waits for queued tasks to finish and returns their reports
    ///
    /// Tasks that panicked have no report.
    pub async fn shutdown(mut self) -> Vec<CrawlReport> {
        drop(self.sender.take());

        for worker in self.workers.drain(..) {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "Worker exited abnormally");
            }
        }

        match self.reports.lock() {
            Ok(mut reports) => std::mem::take(&mut *reports),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    crawler: Arc<Crawler>,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<CrawlTask>>>,
    reports: Arc<Mutex<Vec<CrawlReport>>>,
) {
    loop {
        let task = {
            let mut receiver = receiver.lock().await;
            receiver.recv().await
        };
        let Some(task) = task else {
            break;
        };

        tracing::debug!(worker_id, task = ?task, "Worker picked up task");

        let crawler = crawler.clone();
        let handle = tokio::spawn(async move { task.run(&crawler).await });

        match handle.await {
            Ok(report) => {
                if let Ok(mut reports) = reports.lock() {
                    reports.push(report);
                }
            }
            Err(e) => {
                tracing::error!(worker_id, error = %e, "Crawl task panicked");
            }
        }
    }

    tracing::debug!(worker_id, "Worker stopped");
}
