//! Batch execution tests
//!
//! Properties tested:
//! - Overlapping batches never run two units for the same entity at once
//! - A held entity lock blocks only that entity
//! - Batch options honour engine configuration
//! - Reports serialize failures, drift and digests in entity order

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ledger_engine::batch::{run_units, BatchMode, BatchOptions, BatchReport, CancelFlag, UnitReport};
use ledger_engine::config::EngineConfig;
use ledger_engine::error::AppError;
use ledger_engine::locks::EntityLocks;
use ledger_shared::{DriftEntry, DriftField, EntityRef};

fn products(ids: std::ops::RangeInclusive<i64>) -> Vec<EntityRef> {
    ids.map(EntityRef::product).collect()
}

/// Tracks concurrent holders per entity and the worst case seen
#[derive(Clone, Default)]
struct Occupancy {
    inner: Arc<Mutex<(HashMap<EntityRef, usize>, usize)>>,
}

impl Occupancy {
    fn enter(&self, entity: EntityRef) {
        let mut state = self.inner.lock().unwrap();
        let current = state.0.entry(entity).or_default();
        *current += 1;
        let current = *current;
        state.1 = state.1.max(current);
    }

    fn leave(&self, entity: EntityRef) {
        let mut state = self.inner.lock().unwrap();
        if let Some(current) = state.0.get_mut(&entity) {
            *current -= 1;
        }
    }

    fn peak(&self) -> usize {
        self.inner.lock().unwrap().1
    }
}

// ============================================================================
// Locking across batches
// ============================================================================

#[tokio::test]
async fn test_overlapping_batches_serialize_per_entity() {
    let locks = EntityLocks::new();
    let occupancy = Occupancy::default();
    let cancel = CancelFlag::new();
    let options = BatchOptions {
        dry_run: false,
        fail_fast: false,
        max_parallel: 4,
    };

    let batch = |entities: Vec<EntityRef>| {
        let locks = locks.clone();
        let occupancy = occupancy.clone();
        let cancel = cancel.clone();
        async move {
            run_units(entities, &options, &cancel, |entity| {
                let locks = locks.clone();
                let occupancy = occupancy.clone();
                async move {
                    let _guard = locks.acquire(entity).await;
                    occupancy.enter(entity);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    occupancy.leave(entity);
                    Ok(UnitReport::new(entity))
                }
            })
            .await
        }
    };

    let (first, second) = tokio::join!(batch(products(1..=6)), batch(products(4..=9)));

    assert_eq!(first.outcomes.len(), 6);
    assert_eq!(second.outcomes.len(), 6);
    assert!(first.outcomes.iter().chain(&second.outcomes).all(|(_, r)| r.is_ok()));
    assert_eq!(occupancy.peak(), 1);
}

#[test]
fn test_held_entity_lock_blocks_only_that_entity() {
    let locks = EntityLocks::new();
    let guard = tokio_test::block_on(locks.acquire(EntityRef::product(1)));

    let mut contender = tokio_test::task::spawn(locks.acquire(EntityRef::product(1)));
    tokio_test::assert_pending!(contender.poll());

    let mut other = tokio_test::task::spawn(locks.acquire(EntityRef::bank_account(1)));
    let _other_guard = tokio_test::assert_ready!(other.poll());

    drop(guard);
    assert!(contender.is_woken());
    let acquired = tokio_test::assert_ready!(contender.poll());
    assert_eq!(acquired.entity, EntityRef::product(1));
}

#[tokio::test]
async fn test_cancel_flag_reaches_every_clone() {
    let cancel = CancelFlag::new();
    let observer = cancel.clone();

    let waiter = tokio::spawn(async move {
        observer.cancelled().await;
        observer.is_cancelled()
    });

    cancel.cancel();
    assert!(waiter.await.unwrap());
}

// ============================================================================
// Options
// ============================================================================

#[test]
fn test_options_follow_engine_config() {
    let engine = EngineConfig {
        max_parallel_units: 0,
        fail_fast: true,
        ..EngineConfig::default()
    };

    let options = BatchOptions::from_config(&engine, true, false);
    assert_eq!(options.max_parallel, 1);
    assert!(options.fail_fast);
    assert_eq!(options.mode(), BatchMode::DryRun);

    let options = BatchOptions::from_config(&EngineConfig::default(), false, true);
    assert_eq!(options.max_parallel, 4);
    assert!(options.fail_fast);
    assert_eq!(options.mode(), BatchMode::Apply);
}

// ============================================================================
// Reports
// ============================================================================

#[tokio::test]
async fn test_report_json_shape() {
    let options = BatchOptions {
        dry_run: true,
        fail_fast: false,
        max_parallel: 2,
    };
    let entities = vec![EntityRef::bank_account(2), EntityRef::product(5), EntityRef::product(3)];

    let run = run_units(entities, &options, &CancelFlag::new(), |entity| async move {
        match entity {
            e if e == EntityRef::product(5) => Err(AppError::NotFound(format!("{}", e))),
            e if e == EntityRef::bank_account(2) => {
                let mut unit = UnitReport::new(e);
                unit.drift.push(DriftEntry::value(e, Some("tx:7".to_string()), DriftField::RunningBalance, "10.00", "12.00"));
                unit.digest = Some("abc=".to_string());
                Ok(unit)
            }
            e => Ok(UnitReport::new(e)),
        }
    })
    .await;

    let report = BatchReport::new("drift all", options.mode(), run);
    let json = serde_json::to_value(&report).unwrap();

    assert_eq!(json["command"], "drift all");
    assert_eq!(json["mode"], "dry_run");
    assert_eq!(json["checked"], 3);
    assert_eq!(json["found"], 1);
    assert_eq!(json["errors"], 1);
    assert_eq!(json["cancelled"], false);
    assert_eq!(json["failures"][0]["code"], "NOT_FOUND");
    assert_eq!(json["drift"].as_array().unwrap().len(), 1);
    assert_eq!(json["digests"].as_object().unwrap().len(), 1);
    assert!(json.get("corrected").is_none());
    assert_eq!(report.exit_code(), 1);
}

#[tokio::test]
async fn test_clean_apply_exits_zero() {
    let options = BatchOptions {
        dry_run: false,
        fail_fast: false,
        max_parallel: 2,
    };

    let run = run_units(products(1..=3), &options, &CancelFlag::new(), |entity| async move {
        let mut unit = UnitReport::new(entity);
        unit.applied = true;
        Ok(unit)
    })
    .await;

    let report = BatchReport::new("rebuild stock", options.mode(), run);
    assert_eq!(report.corrected, Some(3));
    assert_eq!(report.found, None);
    assert_eq!(report.exit_code(), 0);
}
