//! Bounded-parallel execution of per-entity units of work.
//!
//! Each unit owns one product, account or sale. Failures are collected into
//! the report rather than aborting the batch unless fail-fast is set.

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Arc;

use ledger_shared::{DriftEntry, EntityRef, Violation};
use serde::Serialize;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{AppError, AppResult};

/// How a batch schedules its units
#[derive(Debug, Clone, Copy)]
pub struct BatchOptions {
    pub dry_run: bool,
    pub fail_fast: bool,
    pub max_parallel: usize,
}

impl BatchOptions {
    pub fn from_config(engine: &EngineConfig, dry_run: bool, fail_fast: bool) -> Self {
        Self {
            dry_run,
            fail_fast: fail_fast || engine.fail_fast,
            max_parallel: engine.max_parallel_units.max(1),
        }
    }

    pub fn mode(&self) -> BatchMode {
        if self.dry_run {
            BatchMode::DryRun
        } else {
            BatchMode::Apply
        }
    }
}

/// Cooperative cancellation shared between the signal handler and a batch
#[derive(Debug, Clone)]
pub struct CancelFlag {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for CancelFlag {
    fn default() -> Self {
        Self {
            tx: Arc::new(watch::Sender::new(false)),
        }
    }
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once `cancel` has been called
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in self, so wait_for cannot observe a closed channel.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

/// Result of one successful unit
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct UnitReport {
    pub entity: EntityRef,
    pub drift: Vec<DriftEntry>,
    pub violations: Vec<Violation>,
    /// Whether derived rows were written by this unit
    pub applied: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

impl UnitReport {
    pub fn new(entity: EntityRef) -> Self {
        Self {
            entity,
            drift: Vec::new(),
            violations: Vec::new(),
            applied: false,
            digest: None,
        }
    }
}

/// What a batch did, in entity order
#[derive(Debug)]
pub struct BatchRun {
    pub outcomes: Vec<(EntityRef, AppResult<UnitReport>)>,
    /// Units never started because of fail-fast or cancellation
    pub skipped: usize,
    pub cancelled: bool,
}

impl BatchRun {
    pub fn from_outcomes(mut outcomes: Vec<(EntityRef, AppResult<UnitReport>)>) -> Self {
        outcomes.sort_by_key(|(entity, _)| *entity);
        Self {
            outcomes,
            skipped: 0,
            cancelled: false,
        }
    }

    /// Fold another batch's outcomes into this one
    pub fn merge(&mut self, other: BatchRun) {
        self.outcomes.extend(other.outcomes);
        self.outcomes.sort_by_key(|(entity, _)| *entity);
        self.skipped += other.skipped;
        self.cancelled |= other.cancelled;
    }
}

/// Run `work` once per entity with at most `max_parallel` units in flight.
///
/// A cancellation stops scheduling and aborts in-flight units; dropping a
/// unit's future rolls back its open transaction.
pub async fn run_units<F, Fut>(
    entities: Vec<EntityRef>,
    options: &BatchOptions,
    cancel: &CancelFlag,
    work: F,
) -> BatchRun
where
    F: Fn(EntityRef) -> Fut,
    Fut: Future<Output = AppResult<UnitReport>> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(options.max_parallel.max(1)));
    let mut set = JoinSet::new();
    let mut pending = BTreeSet::new();
    let mut outcomes = Vec::with_capacity(entities.len());
    let mut failed = false;
    let mut cancelled = false;
    let total = entities.len();

    let mut record = |entity: EntityRef, result: AppResult<UnitReport>, failed: &mut bool| {
        if let Err(err) = &result {
            tracing::error!(%entity, code = err.code(), error = %err, "unit failed");
            *failed = true;
        }
        outcomes.push((entity, result));
    };

    for entity in entities {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                cancelled = true;
                break;
            }
            permit = semaphore.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        while let Some(joined) = set.try_join_next() {
            if let Ok((done, result)) = joined {
                pending.remove(&done);
                record(done, result, &mut failed);
            }
        }
        if failed && options.fail_fast {
            tracing::warn!("fail-fast: not scheduling further units");
            break;
        }

        let unit = work(entity);
        pending.insert(entity);
        set.spawn(async move {
            let _permit = permit;
            (entity, unit.await)
        });
    }

    while !set.is_empty() {
        tokio::select! {
            joined = set.join_next() => match joined {
                Some(Ok((done, result))) => {
                    pending.remove(&done);
                    record(done, result, &mut failed);
                }
                Some(Err(err)) if err.is_panic() => {
                    tracing::error!(error = %err, "unit panicked");
                }
                Some(Err(_)) => {}
                None => break,
            },
            _ = cancel.cancelled(), if !cancelled => {
                tracing::warn!(in_flight = set.len(), "cancelling in-flight units");
                cancelled = true;
                set.abort_all();
            }
        }
    }

    // Units that never reported back were aborted or panicked.
    for entity in pending {
        let err = if cancelled {
            AppError::Cancelled(entity)
        } else {
            AppError::Internal(format!("unit for {} panicked", entity))
        };
        record(entity, Err(err), &mut failed);
    }

    let mut run = BatchRun::from_outcomes(outcomes);
    run.skipped = total - run.outcomes.len();
    run.cancelled = cancelled;
    run
}

/// Whether a batch only reported or also wrote corrections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchMode {
    DryRun,
    Apply,
}

/// A failed unit as it appears in the report
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct UnitFailure {
    pub entity: EntityRef,
    pub code: String,
    pub message: String,
}

/// Machine-readable summary printed by every batch command
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub run_id: Uuid,
    pub command: String,
    pub mode: BatchMode,
    pub checked: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub corrected: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub found: Option<usize>,
    pub errors: usize,
    pub skipped: usize,
    pub cancelled: bool,
    pub failures: Vec<UnitFailure>,
    pub drift: Vec<DriftEntry>,
    pub violations: Vec<Violation>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub digests: BTreeMap<String, String>,
}

impl BatchReport {
    pub fn new(command: impl Into<String>, mode: BatchMode, run: BatchRun) -> Self {
        let mut report = Self {
            run_id: Uuid::new_v4(),
            command: command.into(),
            mode,
            checked: run.outcomes.len(),
            corrected: None,
            found: None,
            errors: 0,
            skipped: run.skipped,
            cancelled: run.cancelled,
            failures: Vec::new(),
            drift: Vec::new(),
            violations: Vec::new(),
            digests: BTreeMap::new(),
        };

        let mut with_drift = 0;
        let mut applied = 0;

        for (entity, outcome) in run.outcomes {
            match outcome {
                Ok(unit) => {
                    if !unit.drift.is_empty() {
                        with_drift += 1;
                    }
                    if unit.applied {
                        applied += 1;
                    }
                    if let Some(digest) = unit.digest {
                        report.digests.insert(entity.to_string(), digest);
                    }
                    report.drift.extend(unit.drift);
                    report.violations.extend(unit.violations);
                }
                Err(err) => {
                    report.errors += 1;
                    report.failures.push(UnitFailure {
                        entity,
                        code: err.code().to_string(),
                        message: err.to_string(),
                    });
                }
            }
        }

        match mode {
            BatchMode::DryRun => report.found = Some(with_drift),
            BatchMode::Apply => report.corrected = Some(applied),
        }
        report
    }

    /// `0` when clean, `1` on any error, cancellation or dry-run drift
    pub fn exit_code(&self) -> u8 {
        let drift_found = self.mode == BatchMode::DryRun && self.found.unwrap_or(0) > 0;
        if self.errors > 0 || self.cancelled || drift_found {
            1
        } else {
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_shared::DriftField;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn options(max_parallel: usize, fail_fast: bool) -> BatchOptions {
        BatchOptions {
            dry_run: true,
            fail_fast,
            max_parallel,
        }
    }

    fn drifted(entity: EntityRef) -> UnitReport {
        let mut unit = UnitReport::new(entity);
        unit.drift.push(DriftEntry::value(
            entity,
            None,
            DriftField::AvailableQuantity,
            "5",
            "4",
        ));
        unit
    }

    #[tokio::test]
    async fn test_outcomes_are_sorted_by_entity() {
        let entities = vec![
            EntityRef::product(3),
            EntityRef::product(1),
            EntityRef::product(2),
        ];
        let run = run_units(entities, &options(3, false), &CancelFlag::new(), |entity| async move {
            tokio::time::sleep(Duration::from_millis(10 * (4 - entity.id as u64))).await;
            Ok(UnitReport::new(entity))
        })
        .await;

        let ids: Vec<i64> = run.outcomes.iter().map(|(e, _)| e.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(run.skipped, 0);
        assert!(!run.cancelled);
    }

    #[tokio::test]
    async fn test_parallelism_is_bounded() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let entities = (1..=8).map(EntityRef::product).collect();

        let run = run_units(entities, &options(2, false), &CancelFlag::new(), |entity| {
            let running = running.clone();
            let peak = peak.clone();
            async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(UnitReport::new(entity))
            }
        })
        .await;

        assert_eq!(run.outcomes.len(), 8);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_failures_do_not_abort_batch() {
        let entities = (1..=4).map(EntityRef::product).collect();
        let run = run_units(entities, &options(1, false), &CancelFlag::new(), |entity| async move {
            if entity.id == 2 {
                Err(AppError::NotFound(format!("Product {}", entity.id)))
            } else {
                Ok(UnitReport::new(entity))
            }
        })
        .await;

        let report = BatchReport::new("drift stock", BatchMode::DryRun, run);
        assert_eq!(report.checked, 4);
        assert_eq!(report.errors, 1);
        assert_eq!(report.failures[0].code, "NOT_FOUND");
        assert_eq!(report.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_fail_fast_stops_scheduling() {
        let entities = (1..=5).map(EntityRef::product).collect();
        let run = run_units(entities, &options(1, true), &CancelFlag::new(), |entity| async move {
            if entity.id == 1 {
                Err(AppError::Internal("boom".to_string()))
            } else {
                Ok(UnitReport::new(entity))
            }
        })
        .await;

        assert!(run.skipped > 0);
        assert!(run.outcomes.iter().any(|(e, r)| e.id == 1 && r.is_err()));
    }

    #[tokio::test]
    async fn test_cancel_before_start_runs_nothing() {
        let cancel = CancelFlag::new();
        cancel.cancel();

        let entities = (1..=3).map(EntityRef::bank_account).collect();
        let run = run_units(entities, &options(2, false), &cancel, |entity| async move {
            Ok(UnitReport::new(entity))
        })
        .await;

        assert!(run.cancelled);
        assert_eq!(run.skipped, 3);
        let report = BatchReport::new("rebuild bank", BatchMode::Apply, run);
        assert_eq!(report.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_cancel_aborts_in_flight_units() {
        let cancel = CancelFlag::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let entities = vec![EntityRef::product(1)];
        let run = run_units(entities, &options(1, false), &cancel, |entity| async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(UnitReport::new(entity))
        })
        .await;

        assert!(run.cancelled);
        assert!(matches!(run.outcomes[0].1, Err(AppError::Cancelled(_))));
    }

    #[test]
    fn test_dry_run_report_counts_found() {
        let run = BatchRun::from_outcomes(vec![
            (EntityRef::product(2), Ok(drifted(EntityRef::product(2)))),
            (EntityRef::product(1), Ok(UnitReport::new(EntityRef::product(1)))),
        ]);
        let report = BatchReport::new("drift stock", BatchMode::DryRun, run);

        assert_eq!(report.found, Some(1));
        assert_eq!(report.corrected, None);
        assert_eq!(report.drift.len(), 1);
        assert_eq!(report.exit_code(), 1);
    }

    #[test]
    fn test_apply_report_counts_corrected() {
        let mut unit = drifted(EntityRef::bank_account(1));
        unit.applied = true;
        unit.digest = Some("abc".to_string());
        let run = BatchRun::from_outcomes(vec![(EntityRef::bank_account(1), Ok(unit))]);
        let report = BatchReport::new("drift bank", BatchMode::Apply, run);

        assert_eq!(report.corrected, Some(1));
        assert_eq!(report.digests.get("bank_account:1").map(String::as_str), Some("abc"));
        assert_eq!(report.exit_code(), 0);

        let json = serde_json::to_value(&report).unwrap();
        assert!(json.get("found").is_none());
        assert_eq!(json["corrected"], 1);
    }
}
