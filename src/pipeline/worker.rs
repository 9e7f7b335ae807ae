//! Bounded-concurrency stage worker framework.
//!
//! A `StageWorker` runs one external-capability call per lead under a
//! semaphore-bounded pool, with a per-capability rate-limit floor, per-call
//! timeouts, retries with exponential backoff and a stage-level wall-clock
//! budget. A single lead's failure never aborts its siblings; the worker
//! errors only when the capability rejects every call outright.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::capabilities::CapabilityError;
use crate::leads::types::Lead;
use crate::registry::CancelToken;

/// Errors raised by a stage worker.
///
/// Partial failure is reported through the stage report, never raised; the
/// only error is total unavailability of the backing capability.
#[derive(Debug, Error)]
pub enum StageError {
    /// Every dispatched call was rejected by the capability.
    #[error("capability unavailable: {0}")]
    Unavailable(String),
}

/// Configuration for one stage worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum simultaneous in-flight calls.
    pub concurrency: usize,
    /// Minimum delay between consecutive calls, independent of pool size.
    pub min_call_interval: Duration,
    /// Timeout for a single call.
    pub call_timeout: Duration,
    /// Wall-clock budget for the whole stage; leads not yet dispatched when
    /// it elapses are failed rather than hanging the run.
    pub stage_budget: Duration,
    /// Attempts per lead before the failure is permanent.
    pub max_attempts: u32,
    /// Base delay for exponential backoff between attempts.
    pub retry_base_delay: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 10,
            min_call_interval: Duration::from_millis(100),
            call_timeout: Duration::from_secs(30),
            stage_budget: Duration::from_secs(300),
            max_attempts: 3,
            retry_base_delay: Duration::from_secs(1),
        }
    }
}

/// Counts returned to the orchestrator for progress accounting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageSummary {
    /// Leads actually dispatched to the capability.
    pub processed: u32,
    /// Leads the stage succeeded for.
    pub succeeded: u32,
    /// Leads the stage failed for permanently.
    pub failed: u32,
    /// Leads never dispatched (cancellation or budget exhaustion).
    pub skipped: u32,
}

/// Result of one lead's trip through the stage.
#[derive(Debug)]
pub enum ItemOutcome {
    /// The call succeeded; carries the updated lead.
    Succeeded(Lead),
    /// Permanent failure after the attempt budget.
    Failed {
        /// The unmodified lead.
        lead: Lead,
        /// What went wrong.
        error: String,
    },
    /// The capability rejected the call outright (auth, service down).
    Unavailable {
        /// The unmodified lead.
        lead: Lead,
        /// What the capability reported.
        error: String,
    },
    /// Never dispatched.
    Skipped {
        /// The unmodified lead.
        lead: Lead,
        /// Why dispatch did not happen.
        reason: String,
    },
}

/// Full report for one stage execution.
#[derive(Debug)]
pub struct StageReport {
    /// Per-lead outcomes, in completion order.
    pub outcomes: Vec<ItemOutcome>,
    /// Aggregated counts.
    pub summary: StageSummary,
    /// Whether the run was cancelled while this stage executed.
    pub cancelled: bool,
}

/// Enforces a minimum interval between calls to one capability.
///
/// The floor applies across the whole pool: ten concurrent workers still
/// issue at most one call per interval.
pub struct RateLimiter {
    min_interval: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// Creates a limiter with the given floor. A zero interval disables it.
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_call: Mutex::new(None),
        }
    }

    /// Waits until the next call is allowed, then claims the slot.
    pub async fn acquire(&self) {
        if self.min_interval.is_zero() {
            return;
        }
        let mut last = self.last_call.lock().await;
        let now = Instant::now();
        let ready_at = match *last {
            Some(prev) => prev + self.min_interval,
            None => now,
        };
        if ready_at > now {
            tokio::time::sleep(ready_at - now).await;
        }
        *last = Some(Instant::now());
    }
}

/// Runs one stage over a batch of leads with bounded concurrency.
pub struct StageWorker {
    config: WorkerConfig,
}

impl StageWorker {
    /// Creates a worker with the given configuration.
    pub fn new(config: WorkerConfig) -> Self {
        Self { config }
    }

    /// Processes `leads` by calling `op` once per lead (plus retries).
    ///
    /// `op` receives an owned copy of the lead and returns the updated lead
    /// on success. Cancellation stops further dispatch; in-flight calls
    /// drain.
    ///
    /// # Errors
    ///
    /// Returns `StageError::Unavailable` when every dispatched call was
    /// rejected by the capability (e.g. authentication failed for all),
    /// which the orchestrator treats as "stage skipped".
    pub async fn run<F, Fut>(
        &self,
        leads: Vec<Lead>,
        cancel: &CancelToken,
        op: F,
    ) -> Result<StageReport, StageError>
    where
        F: Fn(Lead) -> Fut,
        Fut: Future<Output = Result<Lead, CapabilityError>>,
    {
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let limiter = RateLimiter::new(self.config.min_call_interval);
        let deadline = Instant::now() + self.config.stage_budget;

        let op = &op;
        let limiter = &limiter;
        let futures: Vec<_> = leads
            .into_iter()
            .map(|lead| {
                let semaphore = Arc::clone(&semaphore);
                async move {
                    let _permit = semaphore
                        .acquire()
                        .await
                        .expect("stage semaphore never closed");

                    if cancel.is_cancelled() {
                        return ItemOutcome::Skipped {
                            lead,
                            reason: "run cancelled".to_string(),
                        };
                    }
                    if Instant::now() >= deadline {
                        return ItemOutcome::Failed {
                            lead,
                            error: "stage budget exhausted before dispatch".to_string(),
                        };
                    }

                    self.process_lead(lead, limiter, op).await
                }
            })
            .collect();

        let outcomes = futures::future::join_all(futures).await;

        let mut summary = StageSummary::default();
        let mut unavailable = 0u32;
        let mut unavailable_reason = None;
        for outcome in &outcomes {
            match outcome {
                ItemOutcome::Succeeded(_) => {
                    summary.processed += 1;
                    summary.succeeded += 1;
                }
                ItemOutcome::Failed { .. } => {
                    summary.processed += 1;
                    summary.failed += 1;
                }
                ItemOutcome::Unavailable { error, .. } => {
                    summary.processed += 1;
                    summary.failed += 1;
                    unavailable += 1;
                    if unavailable_reason.is_none() {
                        unavailable_reason = Some(error.clone());
                    }
                }
                ItemOutcome::Skipped { .. } => {
                    summary.skipped += 1;
                }
            }
        }

        // Every dispatched call bounced off the capability: the service is
        // down, not the leads.
        if unavailable > 0 && unavailable == summary.processed {
            return Err(StageError::Unavailable(
                unavailable_reason.unwrap_or_else(|| "all calls rejected".to_string()),
            ));
        }

        Ok(StageReport {
            outcomes,
            summary,
            cancelled: cancel.is_cancelled(),
        })
    }

    /// Runs the attempt loop for a single lead.
    async fn process_lead<F, Fut>(
        &self,
        lead: Lead,
        limiter: &RateLimiter,
        op: &F,
    ) -> ItemOutcome
    where
        F: Fn(Lead) -> Fut,
        Fut: Future<Output = Result<Lead, CapabilityError>>,
    {
        let lead_id = lead.id;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            limiter.acquire().await;

            match tokio::time::timeout(self.config.call_timeout, op(lead.clone())).await {
                Ok(Ok(updated)) => {
                    debug!(lead_id = %lead_id, attempt, "Stage call succeeded");
                    return ItemOutcome::Succeeded(updated);
                }
                Ok(Err(e)) if e.is_unavailable() => {
                    warn!(lead_id = %lead_id, error = %e, "Capability rejected call");
                    return ItemOutcome::Unavailable {
                        lead,
                        error: e.to_string(),
                    };
                }
                Ok(Err(e)) => {
                    if attempt >= self.config.max_attempts || !e.is_retryable() {
                        warn!(lead_id = %lead_id, attempt, error = %e, "Stage call failed permanently");
                        return ItemOutcome::Failed {
                            lead,
                            error: e.to_string(),
                        };
                    }
                    debug!(lead_id = %lead_id, attempt, error = %e, "Retrying stage call");
                    tokio::time::sleep(self.backoff(attempt)).await;
                }
                Err(_) => {
                    if attempt >= self.config.max_attempts {
                        warn!(lead_id = %lead_id, attempt, "Stage call timed out permanently");
                        return ItemOutcome::Failed {
                            lead,
                            error: format!(
                                "call timed out after {:?} ({} attempts)",
                                self.config.call_timeout, attempt
                            ),
                        };
                    }
                    debug!(lead_id = %lead_id, attempt, "Stage call timed out, retrying");
                    tokio::time::sleep(self.backoff(attempt)).await;
                }
            }
        }
    }

    /// Exponential backoff delay for the given attempt number.
    fn backoff(&self, attempt: u32) -> Duration {
        self.config.retry_base_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::places::PlaceRecord;
    use std::sync::atomic::{AtomicU32, Ordering};
    use uuid::Uuid;

    fn make_leads(n: usize) -> Vec<Lead> {
        (0..n)
            .map(|i| {
                Lead::from_place(
                    Uuid::new_v4(),
                    PlaceRecord {
                        place_id: format!("p{}", i),
                        name: format!("Biz {}", i),
                        address: None,
                        city: None,
                        state: None,
                        postal_code: None,
                        country: None,
                        phone: None,
                        email: None,
                        website: None,
                        category: None,
                        rating: None,
                        reviews_count: None,
                        latitude: None,
                        longitude: None,
                    },
                )
            })
            .collect()
    }

    fn fast_config() -> WorkerConfig {
        WorkerConfig {
            concurrency: 4,
            min_call_interval: Duration::ZERO,
            call_timeout: Duration::from_millis(200),
            stage_budget: Duration::from_secs(30),
            max_attempts: 3,
            retry_base_delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn all_leads_succeed() {
        let worker = StageWorker::new(fast_config());
        let report = worker
            .run(make_leads(5), &CancelToken::new(), |lead| async move {
                Ok(lead)
            })
            .await
            .unwrap();

        assert_eq!(report.summary.processed, 5);
        assert_eq!(report.summary.succeeded, 5);
        assert_eq!(report.summary.failed, 0);
        assert!(!report.cancelled);
    }

    #[tokio::test]
    async fn flaky_call_retries_then_succeeds() {
        let attempts = Arc::new(AtomicU32::new(0));
        let worker = StageWorker::new(fast_config());

        let op = {
            let attempts = Arc::clone(&attempts);
            move |lead: Lead| {
                let attempts = Arc::clone(&attempts);
                async move {
                    if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(CapabilityError::Http("connection reset".to_string()))
                    } else {
                        Ok(lead)
                    }
                }
            }
        };

        let report = worker.run(make_leads(1), &CancelToken::new(), op).await.unwrap();
        assert_eq!(report.summary.succeeded, 1);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_failure_after_attempt_budget() {
        let attempts = Arc::new(AtomicU32::new(0));
        let worker = StageWorker::new(fast_config());

        let op = {
            let attempts = Arc::clone(&attempts);
            move |_lead: Lead| {
                let attempts = Arc::clone(&attempts);
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err::<Lead, _>(CapabilityError::Http("still broken".to_string()))
                }
            }
        };

        let report = worker.run(make_leads(1), &CancelToken::new(), op).await.unwrap();
        assert_eq!(report.summary.failed, 1);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert!(matches!(report.outcomes[0], ItemOutcome::Failed { .. }));
    }

    #[tokio::test]
    async fn non_retryable_error_fails_fast() {
        let attempts = Arc::new(AtomicU32::new(0));
        let worker = StageWorker::new(fast_config());

        let op = {
            let attempts = Arc::clone(&attempts);
            move |_lead: Lead| {
                let attempts = Arc::clone(&attempts);
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err::<Lead, _>(CapabilityError::InvalidResponse("garbage".to_string()))
                }
            }
        };

        let report = worker.run(make_leads(1), &CancelToken::new(), op).await.unwrap();
        assert_eq!(report.summary.failed, 1);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn total_unavailability_raises() {
        let worker = StageWorker::new(fast_config());
        let result = worker
            .run(make_leads(3), &CancelToken::new(), |_lead| async move {
                Err::<Lead, _>(CapabilityError::AuthRejected("bad key".to_string()))
            })
            .await;

        assert!(matches!(result, Err(StageError::Unavailable(_))));
    }

    #[tokio::test]
    async fn partial_unavailability_degrades_to_failures() {
        let worker = StageWorker::new(fast_config());
        let report = worker
            .run(make_leads(2), &CancelToken::new(), |lead| async move {
                if lead.place_id == "p0" {
                    Ok(lead)
                } else {
                    Err(CapabilityError::AuthRejected("flapping".to_string()))
                }
            })
            .await
            .unwrap();

        assert_eq!(report.summary.succeeded, 1);
        assert_eq!(report.summary.failed, 1);
    }

    #[tokio::test]
    async fn cancellation_skips_undispatched_leads() {
        let worker = StageWorker::new(fast_config());
        let cancel = CancelToken::new();
        cancel.cancel();

        let report = worker
            .run(make_leads(4), &cancel, |lead| async move { Ok(lead) })
            .await
            .unwrap();

        assert_eq!(report.summary.skipped, 4);
        assert_eq!(report.summary.processed, 0);
        assert!(report.cancelled);
        assert!(report
            .outcomes
            .iter()
            .all(|o| matches!(o, ItemOutcome::Skipped { .. })));
    }

    #[tokio::test]
    async fn exhausted_budget_fails_undispatched_leads() {
        let config = WorkerConfig {
            stage_budget: Duration::ZERO,
            ..fast_config()
        };
        let worker = StageWorker::new(config);

        let report = worker
            .run(make_leads(3), &CancelToken::new(), |lead| async move {
                Ok(lead)
            })
            .await
            .unwrap();

        assert_eq!(report.summary.failed, 3);
        assert!(report.outcomes.iter().all(|o| matches!(
            o,
            ItemOutcome::Failed { error, .. } if error.contains("budget")
        )));
    }

    #[tokio::test]
    async fn call_timeout_is_enforced() {
        let config = WorkerConfig {
            call_timeout: Duration::from_millis(20),
            max_attempts: 1,
            ..fast_config()
        };
        let worker = StageWorker::new(config);

        let report = worker
            .run(make_leads(1), &CancelToken::new(), |lead| async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(lead)
            })
            .await
            .unwrap();

        assert_eq!(report.summary.failed, 1);
        assert!(matches!(
            &report.outcomes[0],
            ItemOutcome::Failed { error, .. } if error.contains("timed out")
        ));
    }

    #[tokio::test]
    async fn rate_limiter_enforces_floor() {
        let limiter = RateLimiter::new(Duration::from_millis(30));
        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        limiter.acquire().await;
        // Three calls need at least two full intervals.
        assert!(start.elapsed() >= Duration::from_millis(60));
    }

    #[tokio::test]
    async fn zero_interval_limiter_is_free() {
        let limiter = RateLimiter::new(Duration::ZERO);
        let start = Instant::now();
        for _ in 0..100 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let active = Arc::new(AtomicU32::new(0));
        let peak = Arc::new(AtomicU32::new(0));
        let config = WorkerConfig {
            concurrency: 2,
            ..fast_config()
        };
        let worker = StageWorker::new(config);

        let op = {
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            move |lead: Lead| {
                let active = Arc::clone(&active);
                let peak = Arc::clone(&peak);
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok(lead)
                }
            }
        };

        let report = worker.run(make_leads(8), &CancelToken::new(), op).await.unwrap();
        assert_eq!(report.summary.succeeded, 8);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }
}
