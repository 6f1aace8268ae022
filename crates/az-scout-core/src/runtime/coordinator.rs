// crates/az-scout-core/src/runtime/coordinator.rs
// ============================================================================
// Module: Scan Coordinator
// Description: Bounded-concurrency fan-out of capacity probes over scan units.
// Purpose: Merge per-unit results in submission order with partial-failure semantics.
// Dependencies: crate::{core, interfaces, runtime::broker}, tokio, tokio-util, tracing
// ============================================================================

//! ## Overview
//! A scan validates and deduplicates its targets, acquires one token up front
//! so identity failures abort before any probe runs, and then starts
//! `min(max_concurrency, unique_units)` workers. Workers pull unit indices
//! from a shared counter, probe with the up-front token, and report
//! `(index, result)` over a channel. A worker goes back to the broker only
//! once its token has expired.
//!
//! Unit failures stay inside their unit. Consent, caller, and configuration
//! token failures are request-scoped and abort the whole scan; transient
//! token failures are reported on the affected units only. Cancellation,
//! from the caller or the configured deadline, stops waiting after a short
//! grace period and reports every unresolved unit as cancelled.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::core::AccessToken;
use crate::core::AggregateResponse;
use crate::core::Audience;
use crate::core::CallerAssertion;
use crate::core::FailureKind;
use crate::core::Principal;
use crate::core::ScanOptions;
use crate::core::ScanResult;
use crate::core::ScanTarget;
use crate::core::ScanUnitReport;
use crate::core::SubscriptionInfo;
use crate::interfaces::ProbeError;
use crate::interfaces::ResourceProbe;
use crate::interfaces::TokenError;
use crate::runtime::broker::TokenBroker;

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Scan coordinator limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanCoordinatorConfig {
    /// Maximum concurrent probes per scan.
    pub max_concurrency: usize,
    /// Maximum submitted targets per scan.
    pub max_targets: usize,
    /// Optional wall-clock budget for a scan.
    pub scan_deadline: Option<Duration>,
    /// How long to keep collecting results after cancellation.
    pub cancel_grace: Duration,
    /// Audience of the control-plane token.
    pub audience: Audience,
}

impl Default for ScanCoordinatorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 8,
            max_targets: 512,
            scan_deadline: Some(Duration::from_secs(120)),
            cancel_grace: Duration::from_millis(250),
            audience: Audience::arm(),
        }
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Request-scoped scan failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScanError {
    /// No targets were submitted.
    #[error("scan requires at least one target")]
    EmptyTargets,
    /// Too many targets were submitted.
    #[error("scan has {count} targets; maximum is {max}")]
    TooManyTargets {
        /// Submitted target count.
        count: usize,
        /// Configured maximum.
        max: usize,
    },
    /// A target has an empty subscription or region.
    #[error("invalid scan target: {0}")]
    InvalidTarget(String),
    /// Token acquisition failed for the request.
    #[error(transparent)]
    Token(#[from] TokenError),
    /// A request-scoped control-plane call failed.
    #[error(transparent)]
    Probe(#[from] ProbeError),
}

// ============================================================================
// SECTION: Coordinator
// ============================================================================

/// Message sent from workers to the collector.
enum WorkerEvent {
    /// A unit resolved.
    Unit {
        /// Index into the deduplicated unit list.
        index: usize,
        /// The unit's result.
        result: ScanResult,
    },
    /// A request-scoped token failure occurred.
    Abort(TokenError),
}

/// Outcome of the collection loop.
enum Collected {
    /// All workers finished or the scan was interrupted.
    Done {
        /// True when cancellation or the deadline ended collection.
        interrupted: bool,
    },
    /// A worker reported a request-scoped failure.
    Aborted(TokenError),
}

/// Fan-out coordinator for capacity scans.
pub struct ScanCoordinator {
    /// Token broker shared across requests.
    broker: Arc<TokenBroker>,
    /// Control-plane probe.
    probe: Arc<dyn ResourceProbe>,
    /// Limits.
    config: ScanCoordinatorConfig,
}

impl ScanCoordinator {
    /// Creates a coordinator.
    #[must_use]
    pub fn new(
        broker: Arc<TokenBroker>,
        probe: Arc<dyn ResourceProbe>,
        config: ScanCoordinatorConfig,
    ) -> Self {
        Self {
            broker,
            probe,
            config,
        }
    }

    /// Returns the shared broker.
    #[must_use]
    pub const fn broker(&self) -> &Arc<TokenBroker> {
        &self.broker
    }

    /// Returns the coordinator limits.
    #[must_use]
    pub const fn config(&self) -> &ScanCoordinatorConfig {
        &self.config
    }

    /// Scans `targets` on behalf of `principal`.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError`] for invalid target lists and request-scoped token
    /// failures. Unit failures are reported inside the aggregate.
    pub async fn scan(
        &self,
        principal: &Principal,
        assertion: Option<&CallerAssertion>,
        targets: &[ScanTarget],
        options: ScanOptions,
        cancel: &CancellationToken,
    ) -> Result<AggregateResponse, ScanError> {
        self.validate(targets)?;
        let (units, slot_of) = dedupe(targets);
        let span = tracing::info_span!(
            "scan",
            principal = principal.kind().label(),
            targets = targets.len(),
            units = units.len()
        );
        let slots = self
            .run_units(principal, assertion, units, options, cancel)
            .instrument(span)
            .await?;

        let reports = targets
            .iter()
            .zip(slot_of)
            .map(|(target, slot)| ScanUnitReport {
                target: target.clone(),
                result: slots[slot].clone(),
            })
            .collect();
        Ok(AggregateResponse::from_reports(reports))
    }

    /// Lists subscriptions visible to the principal's control-plane identity.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError`] when token acquisition or the listing fails.
    pub async fn list_subscriptions(
        &self,
        principal: &Principal,
        assertion: Option<&CallerAssertion>,
        cancel: &CancellationToken,
    ) -> Result<Vec<SubscriptionInfo>, ScanError> {
        let token =
            self.broker.acquire(principal, assertion, &self.config.audience, None, cancel).await?;
        Ok(self.probe.list_subscriptions(&token, cancel).await?)
    }

    /// Rejects empty, oversized, or malformed target lists.
    fn validate(&self, targets: &[ScanTarget]) -> Result<(), ScanError> {
        if targets.is_empty() {
            return Err(ScanError::EmptyTargets);
        }
        if targets.len() > self.config.max_targets {
            return Err(ScanError::TooManyTargets {
                count: targets.len(),
                max: self.config.max_targets,
            });
        }
        if let Some(target) = targets
            .iter()
            .find(|t| t.subscription_id.as_str().trim().is_empty() || t.region.as_str().is_empty())
        {
            return Err(ScanError::InvalidTarget(format!(
                "subscription and region are required (got '{target}')"
            )));
        }
        Ok(())
    }

    /// Runs the worker pool and returns one result per unique unit.
    async fn run_units(
        &self,
        principal: &Principal,
        assertion: Option<&CallerAssertion>,
        units: Vec<ScanTarget>,
        options: ScanOptions,
        cancel: &CancellationToken,
    ) -> Result<Vec<ScanResult>, ScanError> {
        let deadline = self.config.scan_deadline.map(|budget| Instant::now() + budget);
        let scan_cancel = cancel.child_token();

        let upfront = tokio::select! {
            biased;
            () = scan_cancel.cancelled() => None,
            () = deadline_elapsed(deadline) => None,
            token = self.broker.acquire(
                principal,
                assertion,
                &self.config.audience,
                None,
                &scan_cancel,
            ) => Some(token),
        };
        let token = match upfront {
            Some(Ok(token)) => token,
            Some(Err(err)) if err.is_request_scoped() => {
                tracing::info!(error = err.label(), "scan aborted before probing");
                return Err(ScanError::Token(err));
            }
            Some(Err(err)) => {
                tracing::warn!(error = err.label(), "token unavailable; no units probed");
                return Ok(vec![token_failure(&err); units.len()]);
            }
            None => {
                tracing::info!("scan cancelled before probing");
                return Ok(vec![ScanResult::cancelled(); units.len()]);
            }
        };

        let unit_count = units.len();
        let worker_count = self.config.max_concurrency.max(1).min(unit_count);
        let units = Arc::new(units);
        let next = Arc::new(AtomicUsize::new(0));
        let (tx, mut rx) = mpsc::channel(unit_count);
        let mut workers = JoinSet::new();
        for _ in 0..worker_count {
            let worker = UnitWorker {
                broker: Arc::clone(&self.broker),
                probe: Arc::clone(&self.probe),
                principal: principal.clone(),
                assertion: assertion.cloned(),
                audience: self.config.audience.clone(),
                token: token.clone(),
                units: Arc::clone(&units),
                next: Arc::clone(&next),
                options,
                cancel: scan_cancel.clone(),
                tx: tx.clone(),
            };
            workers.spawn(worker.run().in_current_span());
        }
        drop(tx);

        let mut slots: Vec<Option<ScanResult>> = vec![None; unit_count];
        let collected = collect(&mut rx, &mut slots, &scan_cancel, deadline).await;
        scan_cancel.cancel();
        let interrupted = match collected {
            Collected::Aborted(err) => {
                workers.abort_all();
                tracing::warn!(error = err.label(), "scan aborted by token failure");
                return Err(ScanError::Token(err));
            }
            Collected::Done {
                interrupted,
            } => interrupted,
        };
        if interrupted {
            drain_within_grace(&mut rx, &mut slots, self.config.cancel_grace).await;
        }
        workers.abort_all();

        let resolved = slots.iter().filter(|slot| slot.is_some()).count();
        tracing::info!(resolved, unresolved = unit_count - resolved, interrupted, "scan finished");
        Ok(slots
            .into_iter()
            .map(|slot| {
                slot.unwrap_or_else(|| {
                    if interrupted {
                        ScanResult::cancelled()
                    } else {
                        ScanResult::failure(FailureKind::Transient, "unit worker terminated")
                    }
                })
            })
            .collect())
    }
}

// ============================================================================
// SECTION: Workers
// ============================================================================

/// State owned by one worker task.
struct UnitWorker {
    /// Shared broker.
    broker: Arc<TokenBroker>,
    /// Shared probe.
    probe: Arc<dyn ResourceProbe>,
    /// Request principal.
    principal: Principal,
    /// Request assertion.
    assertion: Option<CallerAssertion>,
    /// Token audience.
    audience: Audience,
    /// Token used for probes until it expires.
    token: AccessToken,
    /// Deduplicated units.
    units: Arc<Vec<ScanTarget>>,
    /// Next unit index to claim.
    next: Arc<AtomicUsize>,
    /// Probe options.
    options: ScanOptions,
    /// Scan-scoped cancellation.
    cancel: CancellationToken,
    /// Result channel.
    tx: mpsc::Sender<WorkerEvent>,
}

impl UnitWorker {
    /// Claims and probes units until none remain or the scan stops.
    async fn run(mut self) {
        loop {
            if self.cancel.is_cancelled() {
                return;
            }
            let index = self.next.fetch_add(1, Ordering::Relaxed);
            let Some(target) = self.units.get(index).cloned() else {
                return;
            };
            let result = match self.refresh_token().await {
                Ok(()) => self.probe_unit(&target).await,
                Err(err) if err.is_request_scoped() => {
                    let _ = self.tx.send(WorkerEvent::Abort(err)).await;
                    return;
                }
                Err(_) if self.cancel.is_cancelled() => ScanResult::cancelled(),
                Err(err) => {
                    tracing::debug!(unit = %target, error = err.label(), "token unavailable for unit");
                    token_failure(&err)
                }
            };
            if self
                .tx
                .send(WorkerEvent::Unit {
                    index,
                    result,
                })
                .await
                .is_err()
            {
                return;
            }
        }
    }

    /// Replaces the held token once it has expired.
    async fn refresh_token(&mut self) -> Result<(), TokenError> {
        if OffsetDateTime::now_utc() < self.token.expires_at() {
            return Ok(());
        }
        self.token = self
            .broker
            .acquire(&self.principal, self.assertion.as_ref(), &self.audience, None, &self.cancel)
            .await?;
        Ok(())
    }

    /// Probes one unit with the held token.
    async fn probe_unit(&self, target: &ScanTarget) -> ScanResult {
        match self.probe.probe(target, &self.token, &self.options, &self.cancel).await {
            Ok(capacity) => ScanResult::Success(capacity),
            Err(err) => {
                tracing::debug!(
                    unit = %target,
                    failure = err.failure_kind().label(),
                    "scan unit failed"
                );
                ScanResult::from(err)
            }
        }
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Unit result for a token failure that does not abort the scan.
fn token_failure(err: &TokenError) -> ScanResult {
    ScanResult::failure(FailureKind::Transient, err.to_string())
}

/// Deduplicates targets, keeping first occurrences.
///
/// Returns the unique units and, for each submitted target, its unit index.
fn dedupe(targets: &[ScanTarget]) -> (Vec<ScanTarget>, Vec<usize>) {
    let mut seen: HashMap<&ScanTarget, usize> = HashMap::with_capacity(targets.len());
    let mut units = Vec::new();
    let mut slot_of = Vec::with_capacity(targets.len());
    for target in targets {
        let slot = *seen.entry(target).or_insert_with(|| {
            units.push(target.clone());
            units.len() - 1
        });
        slot_of.push(slot);
    }
    (units, slot_of)
}

/// Resolves when `deadline` passes; never resolves without one.
async fn deadline_elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Records a unit result, keeping the first report for a slot.
fn record(slots: &mut [Option<ScanResult>], index: usize, result: ScanResult) -> bool {
    match slots.get_mut(index) {
        Some(slot @ None) => {
            *slot = Some(result);
            true
        }
        _ => false,
    }
}

/// Collects worker events until all units resolve, workers exit, or the scan
/// is interrupted.
async fn collect(
    rx: &mut mpsc::Receiver<WorkerEvent>,
    slots: &mut [Option<ScanResult>],
    cancel: &CancellationToken,
    deadline: Option<Instant>,
) -> Collected {
    let mut remaining = slots.iter().filter(|slot| slot.is_none()).count();
    let expiry = deadline_elapsed(deadline);
    tokio::pin!(expiry);
    while remaining > 0 {
        tokio::select! {
            event = rx.recv() => match event {
                Some(WorkerEvent::Unit { index, result }) => {
                    if record(slots, index, result) {
                        remaining -= 1;
                    }
                }
                Some(WorkerEvent::Abort(err)) => return Collected::Aborted(err),
                None => break,
            },
            () = cancel.cancelled() => {
                tracing::info!(remaining, "scan cancelled by caller");
                return Collected::Done { interrupted: true };
            }
            () = &mut expiry => {
                tracing::info!(remaining, "scan deadline elapsed");
                return Collected::Done { interrupted: true };
            }
        }
    }
    Collected::Done {
        interrupted: false,
    }
}

/// Accepts results that arrive within the grace period after cancellation.
async fn drain_within_grace(
    rx: &mut mpsc::Receiver<WorkerEvent>,
    slots: &mut [Option<ScanResult>],
    grace: Duration,
) {
    let timer = tokio::time::sleep(grace);
    tokio::pin!(timer);
    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Some(WorkerEvent::Unit { index, result }) => {
                    if !matches!(result.failure_kind(), Some(FailureKind::Cancelled)) {
                        record(slots, index, result);
                    }
                }
                Some(WorkerEvent::Abort(_)) => {}
                None => return,
            },
            () = &mut timer => return,
        }
    }
}
