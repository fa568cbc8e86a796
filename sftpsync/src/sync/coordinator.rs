use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use sftpsync_core::RemoteStore;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use super::error::SyncError;
use super::processor::{FolderFailure, FolderOutcome, FolderProcessor};
use super::summary::{COMPLETED_LINE, RunSummary};
use super::walker::DirectoryWalker;

#[derive(Debug)]
pub enum AbortReason {
    Fatal(SyncError),
    Interrupted,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::Fatal(err) => write!(f, "{err}"),
            AbortReason::Interrupted => f.write_str("interrumpido por el usuario"),
        }
    }
}

#[derive(Debug)]
pub enum RunStatus {
    Completed,
    Aborted(AbortReason),
}

#[derive(Debug)]
pub struct RunReport {
    pub summary: RunSummary,
    pub failures: Vec<(PathBuf, FolderFailure)>,
    pub status: RunStatus,
}

impl RunReport {
    pub fn is_aborted(&self) -> bool {
        matches!(self.status, RunStatus::Aborted(_))
    }

    pub fn exit_code(&self) -> u8 {
        if self.is_aborted() { 2 } else { 0 }
    }

    /// Summary block followed by the closing line for the run status.
    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines = self.summary.report_lines();
        lines.push(match &self.status {
            RunStatus::Completed => COMPLETED_LINE.to_string(),
            RunStatus::Aborted(reason) => format!("=== Proceso abortado: {reason} ==="),
        });
        lines
    }
}

/// Walks the local tree and feeds leaf folders to at most `workers`
/// concurrent processors. All outcomes are folded into the summary here.
pub struct Coordinator<S> {
    processor: Arc<FolderProcessor<S>>,
    local_root: PathBuf,
    workers: usize,
    shutdown: CancellationToken,
}

impl<S: RemoteStore + 'static> Coordinator<S> {
    pub fn new(
        processor: FolderProcessor<S>,
        local_root: impl Into<PathBuf>,
        workers: usize,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            processor: Arc::new(processor),
            local_root: local_root.into(),
            workers: workers.max(1),
            shutdown,
        }
    }

    /// Runs one reconciliation pass. `Err` means nothing could be processed
    /// at all; fatal errors met midway end up in [`RunStatus::Aborted`].
    pub async fn run(&self) -> Result<RunReport, SyncError> {
        let started = Instant::now();
        let walker = DirectoryWalker::new(&self.local_root)?;
        tracing::info!(
            root = %self.local_root.display(),
            workers = self.workers,
            "starting reconciliation"
        );

        let stop = self.shutdown.child_token();
        let (tx, mut rx) = mpsc::channel(self.workers * 2);
        let producer = spawn_leaf_producer(walker, tx, stop.clone());

        let mut in_flight: JoinSet<(PathBuf, Result<FolderOutcome, SyncError>)> =
            JoinSet::new();
        let mut summary = RunSummary::default();
        let mut failures = Vec::new();
        let mut abort: Option<AbortReason> = None;
        let mut accepting = true;

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled(), if accepting => {
                    tracing::warn!(in_flight = in_flight.len(), "interrupted, waiting for folders in progress");
                    abort.get_or_insert(AbortReason::Interrupted);
                    accepting = false;
                    stop.cancel();
                }
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    match joined {
                        Ok((_, Ok(outcome))) => {
                            record_outcome(&mut summary, &mut failures, outcome);
                        }
                        Ok((leaf, Err(err))) => {
                            tracing::error!(
                                folder = %leaf.display(),
                                kind = %err.kind(),
                                error = %err,
                                "fatal error, stopping run"
                            );
                            if abort.is_none() {
                                abort = Some(AbortReason::Fatal(err));
                            }
                            accepting = false;
                            stop.cancel();
                        }
                        Err(err) => {
                            tracing::error!(error = %err, "folder worker failed");
                            summary.record_lost();
                        }
                    }
                }
                leaf = rx.recv(), if accepting && in_flight.len() < self.workers => {
                    match leaf {
                        Some(leaf) => {
                            let processor = Arc::clone(&self.processor);
                            in_flight.spawn(async move {
                                let result = processor.process(&leaf).await;
                                (leaf, result)
                            });
                        }
                        None => accepting = false,
                    }
                }
                else => break,
            }
        }

        drop(rx);
        match producer.await {
            Ok(sent) => tracing::debug!(sent, "leaf walk finished"),
            Err(err) => tracing::error!(error = %err, "leaf walk failed"),
        }

        summary.elapsed = started.elapsed();
        let status = match abort {
            None => RunStatus::Completed,
            Some(reason) => RunStatus::Aborted(reason),
        };
        Ok(RunReport {
            summary,
            failures,
            status,
        })
    }
}

fn record_outcome(
    summary: &mut RunSummary,
    failures: &mut Vec<(PathBuf, FolderFailure)>,
    outcome: FolderOutcome,
) {
    summary.record(&outcome);
    if let Some(failure) = outcome.error {
        failures.push((outcome.folder, failure));
    }
}

/// Walks on a blocking thread and hands leaves over one at a time, so the
/// walk never runs far ahead of the workers.
fn spawn_leaf_producer(
    walker: DirectoryWalker,
    tx: mpsc::Sender<PathBuf>,
    stop: CancellationToken,
) -> JoinHandle<usize> {
    tokio::task::spawn_blocking(move || {
        let mut sent = 0usize;
        for leaf in walker.leaves() {
            if stop.is_cancelled() || tx.blocking_send(leaf).is_err() {
                break;
            }
            sent += 1;
        }
        sent
    })
}

#[cfg(test)]
#[path = "coordinator_tests.rs"]
mod tests;
