use std::collections::HashSet;
use std::thread;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::booru::{ApiSource, BooruClient};
use crate::cancel::CancellationToken;
use crate::config::RunOptions;
use crate::domain::{DedupKey, ScheduleMode, TagTask};
use crate::error::HarvestError;
use crate::materialize::{MaterializeOutcome, Materializer};
use crate::state::{DedupIndex, ErrorState};
use crate::store::OutputStore;
use crate::tags::TagSource;
use crate::walker::PageWalker;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LineStatus {
    QuotaReached,
    Exhausted,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
pub struct LineReport {
    pub line_number: u64,
    pub query: String,
    pub status: LineStatus,
    pub pages: u32,
    pub accepted: usize,
    pub downloaded: usize,
    pub deduplicated: usize,
    pub skipped: usize,
    pub no_variant: usize,
    pub error: Option<String>,
}

impl LineReport {
    fn new(task: &TagTask) -> Self {
        Self {
            line_number: task.line_number,
            query: task.query.clone(),
            status: LineStatus::Exhausted,
            pages: 0,
            accepted: 0,
            downloaded: 0,
            deduplicated: 0,
            skipped: 0,
            no_variant: 0,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    Completed,
    /// Earliest failing line; the next attempt resumes here.
    FailedAt(u64),
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct BatchSummary {
    pub outcome: BatchOutcome,
    pub failing_lines: Vec<u64>,
    pub lines: Vec<LineReport>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    Cancelled,
    GaveUp,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub attempts: u32,
    pub resume_lines: Vec<u64>,
    pub lines_processed: usize,
    pub accepted: usize,
    pub downloaded: usize,
    pub deduplicated: usize,
    pub skipped: usize,
    pub started_at: String,
    pub finished_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanResult {
    pub records: usize,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub line: Option<u64>,
    pub message: String,
}

impl ProgressEvent {
    pub fn run(message: impl Into<String>) -> Self {
        Self {
            line: None,
            message: message.into(),
        }
    }

    pub fn line(line: u64, message: impl Into<String>) -> Self {
        Self {
            line: Some(line),
            message: message.into(),
        }
    }
}

/// Receives progress as it happens. Shared by every worker of a window.
pub trait ProgressSink: Sync {
    fn event(&self, event: ProgressEvent);
}

pub struct App<C: BooruClient, S: OutputStore> {
    client: C,
    store: S,
    tags: TagSource,
    source: ApiSource,
    options: RunOptions,
    cancel: CancellationToken,
}

impl<C: BooruClient, S: OutputStore> App<C, S> {
    pub fn new(
        client: C,
        store: S,
        tags: TagSource,
        source: ApiSource,
        options: RunOptions,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            store,
            tags,
            source,
            options,
            cancel,
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Keys already materialized. Unreadable stores are fatal.
    pub fn scan(&self) -> Result<HashSet<DedupKey>, HarvestError> {
        self.store.ensure_layout()?;
        self.store.scan()
    }

    /// Runs attempts until one completes, the input is exhausted, the user
    /// interrupts, or `max_resume_attempts` failing attempts have been made.
    /// Each attempt re-reads the tag file and re-scans the store.
    pub fn run(&self, sink: &dyn ProgressSink) -> Result<RunReport, HarvestError> {
        let mut report = RunReport {
            outcome: RunOutcome::Completed,
            attempts: 0,
            resume_lines: Vec::new(),
            lines_processed: 0,
            accepted: 0,
            downloaded: 0,
            deduplicated: 0,
            skipped: 0,
            started_at: iso_timestamp(),
            finished_at: String::new(),
        };
        let mut start_line = self.options.start_line;

        report.outcome = loop {
            if self.cancel.is_cancelled() {
                break RunOutcome::Cancelled;
            }
            let total = self.tags.line_count()?;
            if start_line > total {
                info!(start_line, total, "nothing left to process");
                break RunOutcome::Completed;
            }

            report.attempts += 1;
            let known = self.scan()?;
            sink.event(ProgressEvent::run(format!(
                "attempt {} from line {start_line}/{total}; {} records already stored",
                report.attempts,
                known.len()
            )));
            let tasks = self.tags.read_from(start_line)?;
            let dedup = DedupIndex::new(known);
            let summary = self.run_batches(&tasks, &dedup, sink);

            for line in &summary.lines {
                report.lines_processed += 1;
                report.accepted += line.accepted;
                report.downloaded += line.downloaded;
                report.deduplicated += line.deduplicated;
                report.skipped += line.skipped;
            }

            match summary.outcome {
                BatchOutcome::Completed => break RunOutcome::Completed,
                BatchOutcome::Cancelled => break RunOutcome::Cancelled,
                BatchOutcome::FailedAt(line) => {
                    report.resume_lines.push(line);
                    let failed_attempts = report.resume_lines.len() as u32;
                    if self
                        .options
                        .max_resume_attempts
                        .is_some_and(|max| failed_attempts >= max)
                    {
                        warn!(line, failed_attempts, "giving up");
                        break RunOutcome::GaveUp;
                    }
                    sink.event(ProgressEvent::run(format!(
                        "failing lines {:?}; restarting at line {line}",
                        summary.failing_lines
                    )));
                    start_line = line;
                }
            }
        };

        report.finished_at = iso_timestamp();
        sink.event(ProgressEvent::run(format!(
            "finished: {:?} after {} attempt(s), {} downloaded",
            report.outcome, report.attempts, report.downloaded
        )));
        Ok(report)
    }

    /// Processes `tasks` in windows of `batch_width`. Stops at the first
    /// window that recorded a failure and reports its earliest failing line.
    ///
    /// Concurrent windows always run every task to a terminal state before
    /// ErrorState is read; a failure in one task does not cancel its siblings.
    pub fn run_batches(
        &self,
        tasks: &[TagTask],
        dedup: &DedupIndex,
        sink: &dyn ProgressSink,
    ) -> BatchSummary {
        let errors = ErrorState::new();
        let mut lines = Vec::with_capacity(tasks.len());
        let width = self.options.batch_width.max(1);

        for (index, window) in tasks.chunks(width).enumerate() {
            debug!(window = index + 1, size = window.len(), "starting window");
            match self.options.mode {
                ScheduleMode::Sequential => {
                    for task in window {
                        lines.push(self.process_line(task, dedup, &errors, sink));
                        if errors.is_failed() || self.cancel.is_cancelled() {
                            break;
                        }
                    }
                }
                ScheduleMode::Concurrent => {
                    lines.extend(self.run_window_concurrently(window, dedup, &errors, sink));
                }
            }

            if self.cancel.is_cancelled() {
                return BatchSummary {
                    outcome: BatchOutcome::Cancelled,
                    failing_lines: errors.lines(),
                    lines,
                };
            }
            if let Some(line) = errors.earliest() {
                warn!(failing = ?errors.lines(), "window failed; halting at line {line}");
                return BatchSummary {
                    outcome: BatchOutcome::FailedAt(line),
                    failing_lines: errors.lines(),
                    lines,
                };
            }
        }

        BatchSummary {
            outcome: BatchOutcome::Completed,
            failing_lines: Vec::new(),
            lines,
        }
    }

    fn run_window_concurrently(
        &self,
        window: &[TagTask],
        dedup: &DedupIndex,
        errors: &ErrorState,
        sink: &dyn ProgressSink,
    ) -> Vec<LineReport> {
        thread::scope(|scope| {
            let handles: Vec<_> = window
                .iter()
                .map(|task| {
                    let handle =
                        scope.spawn(move || self.process_line(task, dedup, errors, sink));
                    (task, handle)
                })
                .collect();
            handles
                .into_iter()
                .map(|(task, handle)| {
                    handle.join().unwrap_or_else(|_| {
                        warn!(line = task.line_number, "worker panicked");
                        errors.record(task.line_number);
                        let mut report = LineReport::new(task);
                        report.status = LineStatus::Failed;
                        report.error = Some("worker panicked".to_string());
                        report
                    })
                })
                .collect()
        })
    }

    /// Walks one tag's pages until the quota is met, the results run out, or
    /// an item or page fails. Failures are recorded in `errors`, never returned.
    pub fn process_line(
        &self,
        task: &TagTask,
        dedup: &DedupIndex,
        errors: &ErrorState,
        sink: &dyn ProgressSink,
    ) -> LineReport {
        let line = task.line_number;
        let mut report = LineReport::new(task);
        sink.event(ProgressEvent::line(line, format!("processing {}", task.query)));

        let materializer = Materializer {
            client: &self.client,
            store: &self.store,
            retry: self.options.retry,
            cancel: &self.cancel,
        };
        let mut walker = PageWalker::new(
            &self.client,
            task.api_query(),
            self.options.max_pages,
            &self.cancel,
        );

        let status = loop {
            if report.accepted >= self.options.quota {
                break LineStatus::QuotaReached;
            }
            let record = match walker.next() {
                None => break LineStatus::Exhausted,
                Some(Ok(record)) => record,
                Some(Err(HarvestError::Cancelled)) => break LineStatus::Cancelled,
                Some(Err(err)) => {
                    warn!(line, query = %task.query, error = %err, "page request failed");
                    errors.record(line);
                    report.error = Some(err.to_string());
                    break LineStatus::Failed;
                }
            };

            let Some(candidate) = self.source.candidate(&record, &self.options.variants) else {
                debug!(line, "record has no eligible variant");
                report.no_variant += 1;
                continue;
            };

            // Claiming the key keeps a sibling task in the same window from
            // materializing it a second time.
            if !dedup.insert(candidate.key.clone()) {
                debug!(line, key = %candidate.key, "already stored");
                report.deduplicated += 1;
                report.accepted += 1;
                continue;
            }

            let outcome = materializer.materialize(task, &candidate);
            if !matches!(outcome, MaterializeOutcome::Stored { .. }) {
                dedup.remove(&candidate.key);
            }
            match outcome {
                MaterializeOutcome::Stored { .. } => {
                    report.downloaded += 1;
                    report.accepted += 1;
                }
                MaterializeOutcome::Skipped(_) => report.skipped += 1,
                MaterializeOutcome::Cancelled => break LineStatus::Cancelled,
                MaterializeOutcome::Failed(err) => {
                    errors.record(line);
                    report.error = Some(err.to_string());
                    break LineStatus::Failed;
                }
            }
        };

        report.pages = walker.pages_fetched();
        report.status = status;
        let message = match status {
            LineStatus::Failed => format!(
                "failed: {}",
                report.error.as_deref().unwrap_or("unknown error")
            ),
            _ => format!(
                "{:?}: {} accepted ({} new, {} already stored) over {} page(s)",
                status, report.accepted, report.downloaded, report.deduplicated, report.pages
            ),
        };
        sink.event(ProgressEvent::line(line, message));
        report
    }
}

fn iso_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}
