//! Best-effort background re-verification of pending claims.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use raffle_store::{ClaimCursor, RaffleStore};
use raffle_types::Entry;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::SweepConfig;
use crate::error::ServerResult;
use crate::pipeline::{ConfirmationPipeline, PipelineOutcome, PipelineResult};

/// Counts from one sweep pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub examined: usize,
    pub confirmed: usize,
    pub rejected: usize,
    pub abandoned: usize,
    pub pending: usize,
    pub busy: usize,
    pub failed: usize,
}

pub struct Sweeper {
    pipeline: Arc<ConfirmationPipeline>,
    config: SweepConfig,
    /// Where the next pass resumes; `None` starts from the oldest claim.
    cursor: Mutex<Option<ClaimCursor>>,
}

impl Sweeper {
    pub fn new(pipeline: Arc<ConfirmationPipeline>, config: SweepConfig) -> Self {
        Self {
            pipeline,
            config,
            cursor: Mutex::new(None),
        }
    }

    /// Re-run the pipeline for up to `batch_size` pending claims.
    ///
    /// Passes walk the backlog in claim-time order and wrap around, so a
    /// full batch of undecidable claims does not hide the ones behind it.
    /// Every claim is checked against the ledger first; only a claim that
    /// is still undecided and older than the abandonment cutoff is rejected.
    pub async fn run_once(&self, now: DateTime<Utc>) -> ServerResult<SweepReport> {
        let batch = self.next_batch().await?;
        let cutoff = self.abandon_cutoff(now);
        let mut report = SweepReport::default();

        for entry in batch {
            report.examined += 1;
            let result = self.pipeline.process(entry.id, None, now).await;
            let still_pending = matches!(result, Ok(PipelineOutcome::Pending { .. }));
            match cutoff {
                Some(cutoff) if still_pending && entry.claimed_since() < cutoff => {
                    let result = self.pipeline.abandon(entry.id, cutoff).await;
                    tally(&mut report, &entry, result, true);
                }
                _ => tally(&mut report, &entry, result, false),
            }
        }
        Ok(report)
    }

    async fn next_batch(&self) -> ServerResult<Vec<Entry>> {
        let store = self.pipeline.store();
        let limit = self.config.batch_size;
        let mut cursor = self.cursor.lock().await;

        let mut batch = store.pending_claims(*cursor, limit).await?;
        if batch.is_empty() && cursor.is_some() {
            batch = store.pending_claims(None, limit).await?;
        }
        *cursor = if batch.len() < limit {
            None
        } else {
            batch.last().map(ClaimCursor::of)
        };
        Ok(batch)
    }

    /// Claims made before this instant may be abandoned. The window is never
    /// shorter than the verifier's transaction age limit.
    fn abandon_cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let abandon_after = self.config.abandon_after()?;
        let tx_age = Duration::from_std(self.pipeline.verifier().config().max_transaction_age()).ok()?;
        now.checked_sub_signed(abandon_after.max(tx_age))
    }

    /// Run passes every `interval_secs` until the task is aborted.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.config.interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(interval_secs = self.config.interval_secs, "pending-claim sweep started");
            loop {
                ticker.tick().await;
                match self.run_once(Utc::now()).await {
                    Ok(report) if report.examined > 0 => info!(?report, "sweep pass"),
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "sweep pass failed"),
                }
            }
        })
    }
}

fn tally(report: &mut SweepReport, entry: &Entry, result: PipelineResult<PipelineOutcome>, abandoning: bool) {
    match result {
        Ok(PipelineOutcome::Confirmed { .. }) => report.confirmed += 1,
        Ok(PipelineOutcome::Rejected { .. }) if abandoning => report.abandoned += 1,
        Ok(PipelineOutcome::Rejected { .. }) => report.rejected += 1,
        Ok(PipelineOutcome::Pending { .. }) => report.pending += 1,
        Ok(PipelineOutcome::Busy) => report.busy += 1,
        Err(e) => {
            debug!(entry_id = %entry.id, error = %e, "sweep could not settle entry");
            report.failed += 1;
        }
    }
}
