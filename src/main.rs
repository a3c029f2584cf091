//! Binary entrypoint: wires every component and drives the graceful
//! shutdown sequence from spec.md §5. No HTTP router here — that surface
//! is out of scope (spec §1) — this only proves the core runs standalone.

use std::sync::Arc;
use std::time::Duration;

use crash_core::config::Config;
use crash_core::engine::{EngineConfig, RoundEngine};
use crash_core::ledger::schema::init_schema;
use crash_core::ledger::{Ledger, PostgresLedger};
use crash_core::logging;
use crash_core::money::Money;
use crash_core::rate_limiter::RateLimiter;
use crash_core::reconciler::gateway::HttpPaymentGateway;
use crash_core::reconciler::{PaymentReconciler, ReconcilerConfig};
use crash_core::seed_store::{PostgresSeedStore, SeedStore};
use crash_core::BetCoordinator;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    let config = Config::load()?;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(20)
        .acquire_timeout(Duration::from_millis(config.db_connection_timeout_ms))
        .idle_timeout(Duration::from_millis(config.db_idle_timeout_ms))
        .connect(&config.database_url)
        .await?;
    init_schema(&pool).await?;

    let seed_store = Arc::new(PostgresSeedStore::new(pool.clone(), config.seed_master.clone()));
    seed_store.ensure_next().await.ok();

    let engine_config = EngineConfig {
        inter_round_gap: Duration::from_millis(config.inter_round_gap_ms),
        allow_degraded_rounds: config.allow_degraded_rounds,
        settlement_window_seconds: config.settlement_window_seconds,
    };
    let (engine_handle, mut lifecycle_rx) = RoundEngine::spawn(seed_store, engine_config);

    let ledger = Arc::new(PostgresLedger::new(pool.clone(), config.max_round_age_seconds));

    let lifecycle_ledger = ledger.clone();
    tokio::spawn(async move {
        use crash_core::engine::LifecycleEvent;
        loop {
            match lifecycle_rx.recv().await {
                Ok(LifecycleEvent::Started(e)) => {
                    if let Err(err) = lifecycle_ledger
                        .persist_round_start(crash_core::ledger::RoundMeta {
                            round_id: e.round_id,
                            commit_idx: e.commit_idx,
                            server_seed_hash: e.server_seed_hash,
                            crash_point: e.crash_point,
                            started_at: e.started_at,
                            settlement_window_seconds: e.settlement_window_seconds,
                        })
                        .await
                    {
                        tracing::error!(error = %err, "failed to persist round start");
                    }
                }
                Ok(LifecycleEvent::Crashed(e)) => {
                    if let Err(err) = lifecycle_ledger
                        .persist_round_crash(
                            crash_core::ledger::RoundMeta {
                                round_id: e.round_id,
                                commit_idx: e.commit_idx,
                                server_seed_hash: e.server_seed_hash,
                                crash_point: e.crash_point,
                                started_at: e.started_at,
                                settlement_window_seconds: e.settlement_window_seconds,
                            },
                            e.server_seed,
                        )
                        .await
                    {
                        tracing::error!(error = %err, "failed to persist round crash");
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "lifecycle event receiver lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let (mut broadcaster, _tick_rx) = crash_core::broadcaster::TickBroadcaster::start(
        engine_handle.clone(),
        Duration::from_millis(config.broadcast_interval_ms),
    );

    // Not driven by anything yet: the HTTP surface that would call it is
    // out of scope (spec §1). Constructed here so the whole dependency
    // graph is proven wireable end to end.
    let _coordinator = Arc::new(BetCoordinator::new(
        ledger.clone(),
        engine_handle.clone(),
        Money::new(config.min_bet_amount),
        Money::new(config.max_bet_amount),
        Duration::from_millis(config.cashout_min_interval_ms),
        Duration::from_millis(config.cashout_prune_age_ms),
        config.max_cashout_entries,
    ));

    let http_client = reqwest::Client::builder()
        .timeout(Duration::from_millis(config.request_timeout_ms))
        .build()?;
    let gateway = Arc::new(HttpPaymentGateway::new(
        http_client,
        config.deposit_gateway_base_url.clone(),
        config.withdraw_gateway_base_url.clone(),
    ));
    let reconciler = Arc::new(PaymentReconciler::new(
        ledger.clone(),
        gateway,
        ReconcilerConfig {
            poll_attempts: config.payment_poll_attempts,
            poll_interval: Duration::from_millis(config.payment_poll_interval_ms),
            max_concurrent_jobs: 32,
        },
    ));
    match reconciler.resume_pending().await {
        Ok(resumed) => tracing::info!(resumed, "resumed in-flight payment intents"),
        Err(e) => tracing::error!(error = %e, "failed to resume pending payment intents"),
    }

    let auth_limiter = Arc::new(RateLimiter::new(
        Duration::from_secs(60),
        10,
        Duration::from_secs(3600),
        100_000,
    ));
    {
        let auth_limiter = auth_limiter.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(60));
            loop {
                ticker.tick().await;
                auth_limiter.prune();
            }
        });
    }

    tracing::info!("crash-core is running; awaiting shutdown signal");
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received, draining");

    broadcaster.stop();
    engine_handle.dispose().await;
    pool.close().await;

    Ok(())
}
