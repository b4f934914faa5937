//! Ledger engine command line
//!
//! Batch rebuilds, drift detection and read-only valuation queries. Every
//! command prints one JSON document on stdout; logs go to stderr.

use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use ledger_engine::batch::{run_units, BatchOptions, BatchReport, BatchRun, CancelFlag, UnitReport};
use ledger_engine::error::{AppError, ErrorDetail};
use ledger_engine::locks::EntityLocks;
use ledger_engine::services::{
    event_store, ConsistencyService, DriftMode, LedgerRebuilder, QueryService,
    ReconciliationService,
};
use ledger_engine::{db, telemetry, Config};
use ledger_shared::{EntityRef, ReplayWindow};
use serde::Serialize;
use sqlx::PgPool;

#[derive(Parser)]
#[command(name = "ledger-engine")]
#[command(about = "Retail ledger reconciliation and valuation engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay raw events and rewrite derived ledger rows
    Rebuild {
        #[arg(value_enum)]
        ledger: LedgerKind,

        /// Single product or bank account id
        #[arg(long, conflicts_with = "all", required_unless_present = "all")]
        id: Option<i64>,

        /// Every product or bank account
        #[arg(long, default_value_t = false)]
        all: bool,

        /// First date to replay (YYYY-MM-DD)
        #[arg(long)]
        from: Option<NaiveDate>,

        /// Last date to replay, stock only (YYYY-MM-DD)
        #[arg(long)]
        to: Option<NaiveDate>,

        /// Stop scheduling units after the first failure
        #[arg(long, default_value_t = false)]
        fail_fast: bool,
    },

    /// Compare stored derived values with a full replay
    Drift {
        #[arg(value_enum)]
        scope: DriftScope,

        /// Limit to one product, account or sale
        #[arg(long)]
        id: Option<i64>,

        /// Report only; exit 1 when drift is found
        #[arg(long, default_value_t = false)]
        dry_run: bool,

        /// Stop scheduling units after the first failure
        #[arg(long, default_value_t = false)]
        fail_fast: bool,

        /// Also rewrite overpaid sales (reported for review otherwise)
        #[arg(long, default_value_t = false)]
        correct_overpayments: bool,
    },

    /// Valuation of a product over an inclusive date window
    Valuate {
        #[arg(long)]
        product: i64,

        #[arg(long)]
        start: NaiveDate,

        #[arg(long)]
        end: NaiveDate,
    },

    /// Running balance of an account at the end of a date
    Balance {
        #[arg(long)]
        account: i64,

        #[arg(long)]
        as_of: NaiveDate,
    },

    /// Stock value across all products (defaults to today)
    StockValue {
        #[arg(long)]
        as_of: Option<NaiveDate>,
    },

    /// Apply database migrations
    Migrate,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LedgerKind {
    Stock,
    Bank,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum DriftScope {
    Stock,
    Bank,
    Sales,
    All,
}

#[derive(Serialize)]
struct ErrorOutput {
    error: ErrorDetail,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            tracing::error!(error = %err, "command failed");
            let error = match err.downcast_ref::<AppError>() {
                Some(app) => app.detail(),
                None => ErrorDetail {
                    code: "INTERNAL_ERROR".to_string(),
                    message: format!("{:#}", err),
                },
            };
            if let Err(print_err) = print_json(&ErrorOutput { error }) {
                eprintln!("{:#}", print_err);
            }
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli) -> Result<u8> {
    let config = Config::load().context("loading configuration")?;
    telemetry::init_tracing(&config.logging);

    tracing::info!(environment = %config.environment, "starting ledger engine");

    let pool = db::connect(&config.database).await?;
    if config.is_development() || matches!(cli.cmd, Commands::Migrate) {
        db::run_migrations(&pool).await?;
    }

    let cancel = CancelFlag::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received, cancelling batch");
                cancel.cancel();
            }
        });
    }

    let locks = EntityLocks::new();
    let query = QueryService::new(pool.clone());

    match cli.cmd {
        Commands::Rebuild {
            ledger,
            id,
            all,
            from,
            to,
            fail_fast,
        } => {
            if ledger == LedgerKind::Bank && to.is_some() {
                bail!("--to applies to stock rebuilds only");
            }
            if let (Some(from), Some(to)) = (from, to) {
                if from > to {
                    bail!("--from {} is after --to {}", from, to);
                }
            }

            let options = BatchOptions::from_config(&config.engine, false, fail_fast);
            let rebuilder = LedgerRebuilder::new(pool.clone(), locks.clone());
            let window = ReplayWindow { from, to };

            let run = match ledger {
                LedgerKind::Stock => {
                    let ids = scope_ids(&pool, id, all, Entities::Products).await?;
                    let entities = ids.into_iter().map(EntityRef::product).collect();
                    run_units(entities, &options, &cancel, |entity| {
                        let rebuilder = rebuilder.clone();
                        async move {
                            let outcome = rebuilder.rebuild_product_ledger(entity.id, window).await?;
                            Ok(rebuilt(entity, outcome.digest, outcome.violations))
                        }
                    })
                    .await
                }
                LedgerKind::Bank => {
                    let ids = scope_ids(&pool, id, all, Entities::Accounts).await?;
                    let entities = ids.into_iter().map(EntityRef::bank_account).collect();
                    run_units(entities, &options, &cancel, |entity| {
                        let rebuilder = rebuilder.clone();
                        async move {
                            let outcome = rebuilder.rebuild_bank_ledger(entity.id, from).await?;
                            Ok(rebuilt(entity, outcome.digest, outcome.violations))
                        }
                    })
                    .await
                }
            };

            let command = match ledger {
                LedgerKind::Stock => "rebuild stock",
                LedgerKind::Bank => "rebuild bank",
            };
            finish(BatchReport::new(command, options.mode(), run))
        }

        Commands::Drift {
            scope,
            id,
            dry_run,
            fail_fast,
            correct_overpayments,
        } => {
            if scope == DriftScope::All && id.is_some() {
                bail!("--id cannot be combined with the `all` scope");
            }

            let options = BatchOptions::from_config(&config.engine, dry_run, fail_fast);
            let mode = if dry_run { DriftMode::DryRun } else { DriftMode::Apply };
            let reconciliation =
                ReconciliationService::new(pool.clone(), locks.clone(), config.engine.money_tolerance);
            let mut run = BatchRun::from_outcomes(Vec::new());

            if matches!(scope, DriftScope::Stock | DriftScope::All) {
                let ids = scope_ids(&pool, id, id.is_none(), Entities::Products).await?;
                let entities = ids.into_iter().map(EntityRef::product).collect();
                run.merge(
                    run_units(entities, &options, &cancel, |entity| {
                        let reconciliation = reconciliation.clone();
                        async move { reconciliation.reconcile_product(entity.id, mode).await }
                    })
                    .await,
                );
            }

            if matches!(scope, DriftScope::Bank | DriftScope::All) && !stop_early(&run, &options, &cancel) {
                let ids = scope_ids(&pool, id, id.is_none(), Entities::Accounts).await?;
                let entities = ids.into_iter().map(EntityRef::bank_account).collect();
                run.merge(
                    run_units(entities, &options, &cancel, |entity| {
                        let reconciliation = reconciliation.clone();
                        async move { reconciliation.reconcile_account(entity.id, mode).await }
                    })
                    .await,
                );
            }

            if matches!(scope, DriftScope::Sales | DriftScope::All) && !stop_early(&run, &options, &cancel) {
                let consistency = ConsistencyService::new(pool.clone(), config.engine.money_tolerance);
                match consistency.check_sales(id, mode, correct_overpayments).await {
                    Ok(sales) => run.merge(sales),
                    Err(err) => {
                        tracing::error!(code = err.code(), error = %err, "sale sweep failed");
                        let entity = EntityRef::sale(id.unwrap_or(0));
                        run.merge(BatchRun::from_outcomes(vec![(entity, Err(err))]));
                    }
                }
            }
            run.cancelled |= cancel.is_cancelled();

            let command = match scope {
                DriftScope::Stock => "drift stock",
                DriftScope::Bank => "drift bank",
                DriftScope::Sales => "drift sales",
                DriftScope::All => "drift all",
            };
            finish(BatchReport::new(command, options.mode(), run))
        }

        Commands::Valuate {
            product,
            start,
            end,
        } => {
            print_json(&query.valuation(product, start, end).await?)?;
            Ok(0)
        }

        Commands::Balance { account, as_of } => {
            print_json(&query.running_balance_as_of(account, as_of).await?)?;
            Ok(0)
        }

        Commands::StockValue { as_of } => {
            let as_of = as_of.unwrap_or_else(|| Utc::now().date_naive());
            print_json(&query.stock_value(as_of).await?)?;
            Ok(0)
        }

        Commands::Migrate => {
            print_json(&serde_json::json!({ "migrated": true }))?;
            Ok(0)
        }
    }
}

#[derive(Clone, Copy)]
enum Entities {
    Products,
    Accounts,
}

/// Ids named on the command line, or every id of the kind
async fn scope_ids(pool: &PgPool, id: Option<i64>, all: bool, kind: Entities) -> Result<Vec<i64>> {
    match (id, all) {
        (Some(id), _) => Ok(vec![id]),
        (None, true) => {
            let mut conn = pool.acquire().await?;
            let ids = match kind {
                Entities::Products => event_store::product_ids(&mut conn).await?,
                Entities::Accounts => event_store::account_ids(&mut conn).await?,
            };
            Ok(ids)
        }
        (None, false) => bail!("either --id or --all is required"),
    }
}

fn rebuilt(entity: EntityRef, digest: String, violations: Vec<ledger_shared::Violation>) -> UnitReport {
    let mut unit = UnitReport::new(entity);
    unit.applied = true;
    unit.digest = Some(digest);
    unit.violations = violations;
    unit
}

fn stop_early(run: &BatchRun, options: &BatchOptions, cancel: &CancelFlag) -> bool {
    let failed = run.outcomes.iter().any(|(_, outcome)| outcome.is_err());
    cancel.is_cancelled() || (options.fail_fast && failed)
}

fn finish(report: BatchReport) -> Result<u8> {
    tracing::info!(
        run_id = %report.run_id,
        command = %report.command,
        checked = report.checked,
        errors = report.errors,
        "batch finished"
    );
    print_json(&report)?;
    Ok(report.exit_code())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
