//! Retrieval Orchestrator
//!
//! Fetches, classifies and writes one record per collected identifier.
//!
//! # Architecture
//! - **Phase 1**: `workers` concurrent tasks via `futures::stream::buffer_unordered`,
//!   each identifier handed to whichever task frees up first
//! - **Phase 2**: identifiers that exhausted their retries in phase 1 get
//!   exactly one more (internally retried) attempt, sequentially
//! - **Writer**: a single spawned task owns the sink and drains an mpsc
//!   channel, so appends never overlap
//!
//! # State Machine
//! ```text
//! Pending ──► Success
//!    │
//!    └──► RetryExhausted ──► Success
//!                       └──► PermanentlyFailed
//! ```
//! `Success` and `PermanentlyFailed` are terminal; there is no phase 3.

use crate::classify::classify;
use crate::collector::QueryMatches;
use crate::retry::{retry_with_delay, RetryExhausted, RetryPolicy};
use crate::sink::{CorpusRecord, RecordSink};
use crate::sources::{AnnotationSource, ArticleSource, SourceError};
use crate::taxonomy::Taxonomy;
use futures::future;
use futures::stream::{self, StreamExt};
use mtc_common::{Error, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Progress is logged every this many completed identifiers
const PROGRESS_INTERVAL: usize = 10;

/// Per-identifier retrieval state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RetrievalState {
    Pending,
    Success,
    RetryExhausted,
    PermanentlyFailed,
}

impl RetrievalState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::PermanentlyFailed)
    }
}

/// Pool sizing and per-record retry policy
#[derive(Debug, Clone, Copy)]
pub struct OrchestratorConfig {
    pub workers: usize,
    pub retry: RetryPolicy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            retry: RetryPolicy::default(),
        }
    }
}

/// Outcome of a complete retrieval run
#[derive(Debug, Clone, Default)]
pub struct RetrievalReport {
    pub total: usize,
    pub succeeded_first_pass: usize,
    pub recovered: usize,
    /// Phase-2 input, in the order it was retried
    pub retried: Vec<String>,
    pub permanently_failed: Vec<String>,
    /// Rows the writer appended
    pub written: usize,
    /// Final state of every identifier
    pub states: HashMap<String, RetrievalState>,
}

impl RetrievalReport {
    pub fn succeeded(&self) -> usize {
        self.succeeded_first_pass + self.recovered
    }
}

/// Bounded worker pool over the article and annotation sources
pub struct RetrievalOrchestrator {
    articles: Arc<dyn ArticleSource>,
    annotations: Arc<dyn AnnotationSource>,
    taxonomy: Arc<Taxonomy>,
    config: OrchestratorConfig,
}

impl RetrievalOrchestrator {
    pub fn new(
        articles: Arc<dyn ArticleSource>,
        annotations: Arc<dyn AnnotationSource>,
        taxonomy: Arc<Taxonomy>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            articles,
            annotations,
            taxonomy,
            config,
        }
    }

    /// Retrieve and classify one identifier
    ///
    /// Article and annotation fetches share one record-level retry: either
    /// failing restarts both on the next attempt. The record is only built
    /// once both have succeeded.
    pub async fn fetch_record(
        &self,
        id: &str,
        matches: &QueryMatches,
    ) -> std::result::Result<CorpusRecord, RetryExhausted<SourceError>> {
        let operation = format!("fetch record {}", id);
        let articles = &self.articles;
        let annotations = &self.annotations;

        let (article, annotation_names) = retry_with_delay(&operation, &self.config.retry, move || async move {
            let article = articles.fetch_article(id).await?;
            let names = annotations.fetch_annotations(id).await?;
            Ok::<_, SourceError>((article, names))
        })
        .await?;

        let known = annotation_names
            .iter()
            .filter(|name| self.taxonomy.contains(name));
        let classification = classify(&self.taxonomy, known);

        debug!(
            id = %id,
            annotations = annotation_names.len(),
            level1 = classification.level1.len(),
            "Record retrieved"
        );

        Ok(CorpusRecord {
            matched_queries: matches.sorted_queries_for(id),
            id: id.to_string(),
            title: article.title,
            abstract_text: article.abstract_text,
            authors: article.authors,
            annotation_names,
            classification,
        })
    }

    /// Retrieve every identifier in `matches` and append records to `sink`
    ///
    /// Returns once both phases have finished and the writer has flushed.
    /// A sink failure stops new fetches immediately; in-flight fetches drain,
    /// phase 2 is skipped, and the sink's error is returned.
    pub async fn run<S>(&self, matches: Arc<QueryMatches>, sink: S) -> Result<RetrievalReport>
    where
        S: RecordSink + 'static,
    {
        let ids: Vec<String> = matches.ids().cloned().collect();
        let total = ids.len();
        let workers = self.config.workers.max(1);

        info!(total, workers, "Phase 1: concurrent retrieval");

        let (record_tx, record_rx) = mpsc::channel::<CorpusRecord>(workers * 2);
        let writer = tokio::spawn(write_records(sink, record_rx));

        let failures: Mutex<Vec<String>> = Mutex::new(Vec::new());
        let completed = AtomicUsize::new(0);

        // Phase 1: first-available scheduling over a static work set
        let matches_ref: &QueryMatches = &matches;
        let record_tx_ref = &record_tx;
        let failures_ref = &failures;
        let completed_ref = &completed;

        let phase1: Vec<(String, RetrievalState)> = stream::iter(ids)
            .take_while(move |_| future::ready(!record_tx_ref.is_closed()))
            .map(move |id| {
                let (matches, record_tx, failures, completed) =
                    (matches_ref, record_tx_ref, failures_ref, completed_ref);

                async move {
                    let state = match self.fetch_record(&id, matches).await {
                        Ok(record) => {
                            if send_record(record_tx, record).await {
                                RetrievalState::Success
                            } else {
                                // Writer is gone; the record was never written
                                RetrievalState::Pending
                            }
                        }
                        Err(e) => {
                            warn!(id = %id, error = %e, "Retrieval exhausted retries, deferring");
                            failures.lock().await.push(id.clone());
                            RetrievalState::RetryExhausted
                        }
                    };

                    let current = completed.fetch_add(1, Ordering::Relaxed) + 1;
                    if current % PROGRESS_INTERVAL == 0 || current == total {
                        info!(progress = %format!("{}/{}", current, total), "Retrieval progress");
                    }

                    (id, state)
                }
            })
            .buffer_unordered(workers)
            .collect()
            .await;

        let mut report = RetrievalReport {
            total,
            ..Default::default()
        };
        for (id, state) in phase1 {
            if state == RetrievalState::Success {
                report.succeeded_first_pass += 1;
            }
            report.states.insert(id, state);
        }

        if record_tx.is_closed() {
            drop(record_tx);
            return Err(abandon(writer, &report).await);
        }

        // Phase 2: one deferred attempt per retry-exhausted identifier
        let retry_queue = std::mem::take(&mut *failures.lock().await);
        if !retry_queue.is_empty() {
            info!(count = retry_queue.len(), "Phase 2: retrying failed identifiers");
        }

        for id in retry_queue {
            if record_tx.is_closed() {
                break;
            }
            let state = match self.fetch_record(&id, &matches).await {
                Ok(record) => {
                    if send_record(&record_tx, record).await {
                        report.recovered += 1;
                        RetrievalState::Success
                    } else {
                        RetrievalState::Pending
                    }
                }
                Err(e) => {
                    error!(id = %id, error = %e, "Retrieval permanently failed");
                    report.permanently_failed.push(id.clone());
                    RetrievalState::PermanentlyFailed
                }
            };
            report.states.insert(id.clone(), state);
            report.retried.push(id);
        }

        if record_tx.is_closed() {
            drop(record_tx);
            return Err(abandon(writer, &report).await);
        }

        // Closing the channel lets the writer flush and exit
        drop(record_tx);
        report.written = writer
            .await
            .map_err(|e| Error::Internal(format!("Writer task failed: {}", e)))??;

        info!(
            total,
            succeeded = report.succeeded(),
            recovered = report.recovered,
            permanently_failed = report.permanently_failed.len(),
            written = report.written,
            "Retrieval complete"
        );
        if !report.permanently_failed.is_empty() {
            warn!(
                ids = %report.permanently_failed.join(", "),
                "Failed to fetch the following identifiers on retry"
            );
        }

        Ok(report)
    }
}

/// Hand a record to the writer; `false` once the writer has stopped
async fn send_record(record_tx: &mpsc::Sender<CorpusRecord>, record: CorpusRecord) -> bool {
    let id = record.id.clone();
    match record_tx.send(record).await {
        Ok(()) => true,
        Err(_) => {
            error!(id = %id, "Writer stopped, record dropped");
            false
        }
    }
}

/// Collect the writer's failure after it stopped mid-run
async fn abandon(writer: JoinHandle<Result<usize>>, report: &RetrievalReport) -> Error {
    let retrieved = report
        .states
        .values()
        .filter(|s| **s == RetrievalState::Success)
        .count();
    error!(
        total = report.total,
        retrieved,
        "Writer stopped, abandoning retrieval"
    );

    match writer.await {
        Ok(Err(e)) => e,
        Ok(Ok(written)) => Error::Internal(format!("Writer stopped early after {} records", written)),
        Err(e) => Error::Internal(format!("Writer task failed: {}", e)),
    }
}

/// Single writer: the only code that touches the sink
async fn write_records<S: RecordSink>(mut sink: S, mut records: mpsc::Receiver<CorpusRecord>) -> Result<usize> {
    let mut written = 0;
    while let Some(record) = records.recv().await {
        if let Err(e) = sink.append(&record) {
            error!(id = %record.id, error = %e, "Sink append failed, stopping writer");
            return Err(e);
        }
        written += 1;
    }
    sink.finish()?;
    debug!(written, "Writer finished");
    Ok(written)
}
