//! C2 — Round engine.
//!
//! §9's "global mutable engine → single owner with message-passing API"
//! redesign flag: the teacher's "one `current_round` PDA mutated by
//! whichever instruction runs" becomes one task owning `ActiveRound`,
//! processing `join`/`cashout`/timer-fired messages from a mailbox in
//! order — the single-writer requirement from spec §5 falls out of there
//! being exactly one reader of the mailbox.

pub mod crash_point;
pub mod events;
pub mod round;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::{broadcast, mpsc, oneshot};
use uuid::Uuid;

use crate::domain::{CashoutOutcome, RoundStatusSnapshot};
use crate::error::{CoreError, CoreResult};
use crate::money::Money;
use crate::seed_store::SeedStore;

pub use events::{LifecycleEvent, RoundCrashed, RoundStarted, Tick};
pub use round::{ActiveRound, CashoutError, JoinError};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub inter_round_gap: Duration,
    pub allow_degraded_rounds: bool,
    pub settlement_window_seconds: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            inter_round_gap: Duration::from_millis(5_000),
            allow_degraded_rounds: false,
            settlement_window_seconds: 300,
        }
    }
}

enum Command {
    Join {
        player_id: Uuid,
        bet_amount: Money,
        respond: oneshot::Sender<Result<JoinAck, JoinError>>,
    },
    Cashout {
        player_id: Uuid,
        respond: oneshot::Sender<Result<CashoutOutcome, CashoutError>>,
    },
    CancelJoin {
        player_id: Uuid,
        round_id: Uuid,
        respond: oneshot::Sender<()>,
    },
    Status {
        respond: oneshot::Sender<RoundStatusSnapshot>,
    },
    CrashTimerFired {
        round_id: Uuid,
    },
    CreateNextRound,
    Dispose,
}

#[derive(Debug, Clone)]
pub struct JoinAck {
    pub round_id: Uuid,
    pub server_seed_hash: Vec<u8>,
    pub commit_idx: Option<i64>,
    pub started_at: chrono::DateTime<Utc>,
}

/// Cloneable front door to the engine actor.
#[derive(Clone)]
pub struct EngineHandle {
    commands: mpsc::Sender<Command>,
}

impl EngineHandle {
    pub async fn join(&self, player_id: Uuid, bet_amount: Money) -> CoreResult<JoinAck> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Join {
                player_id,
                bet_amount,
                respond: tx,
            })
            .await
            .map_err(|_| CoreError::Internal("engine actor is gone".into()))?;
        rx.await
            .map_err(|_| CoreError::Internal("engine actor dropped the response".into()))?
            .map_err(|e| match e {
                JoinError::NotRunning => CoreError::RoundStale,
                JoinError::AlreadyJoined => CoreError::Conflict("already joined this round".into()),
            })
    }

    pub async fn cashout(&self, player_id: Uuid) -> CoreResult<CashoutOutcome> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Cashout { player_id, respond: tx })
            .await
            .map_err(|_| CoreError::Internal("engine actor is gone".into()))?;
        rx.await
            .map_err(|_| CoreError::Internal("engine actor dropped the response".into()))?
            .map_err(|e| match e {
                CashoutError::NotInRound => CoreError::Validation("no active bet in this round".into()),
                CashoutError::AlreadyCashedOut => {
                    CoreError::Conflict("already cashed out".into())
                }
            })
    }

    /// Compensates a join the ledger later rejected. A no-op if the round
    /// has since rotated (`round_id` mismatch) or the player already left.
    pub async fn cancel_join(&self, player_id: Uuid, round_id: Uuid) -> CoreResult<()> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::CancelJoin {
                player_id,
                round_id,
                respond: tx,
            })
            .await
            .map_err(|_| CoreError::Internal("engine actor is gone".into()))?;
        rx.await
            .map_err(|_| CoreError::Internal("engine actor dropped the response".into()))
    }

    pub async fn status(&self) -> CoreResult<RoundStatusSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Status { respond: tx })
            .await
            .map_err(|_| CoreError::Internal("engine actor is gone".into()))?;
        rx.await
            .map_err(|_| CoreError::Internal("engine actor dropped the response".into()))
    }

    pub async fn dispose(&self) {
        let _ = self.commands.send(Command::Dispose).await;
    }
}

/// Owns the engine's single writer task. `spawn` returns the handle callers
/// use and a broadcast receiver-factory for lifecycle events; construct one
/// per process per spec.md §1's "single-process authoritative" Non-goal.
pub struct RoundEngine;

impl RoundEngine {
    pub fn spawn(
        seed_store: Arc<dyn SeedStore>,
        config: EngineConfig,
    ) -> (EngineHandle, broadcast::Receiver<LifecycleEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(256);
        let (lifecycle_tx, lifecycle_rx) = broadcast::channel(64);

        tokio::spawn(run_actor(cmd_rx, cmd_tx.clone(), seed_store, config, lifecycle_tx));

        (EngineHandle { commands: cmd_tx }, lifecycle_rx)
    }
}

async fn run_actor(
    mut commands: mpsc::Receiver<Command>,
    self_tx: mpsc::Sender<Command>,
    seed_store: Arc<dyn SeedStore>,
    config: EngineConfig,
    lifecycle_tx: broadcast::Sender<LifecycleEvent>,
) {
    let mut current: Option<ActiveRound> = None;

    if let Err(e) = create_round(&mut current, &seed_store, &config, &lifecycle_tx, &self_tx).await {
        tracing::error!(error = %e, "failed to create the initial round; waiting for a retry nudge");
    }

    while let Some(cmd) = commands.recv().await {
        match cmd {
            Command::Join {
                player_id,
                bet_amount,
                respond,
            } => {
                let result = match &mut current {
                    Some(round) => round.join(player_id, bet_amount).map(|_| JoinAck {
                        round_id: round.round_id,
                        server_seed_hash: round.server_seed_hash.clone(),
                        commit_idx: round.commit_idx,
                        started_at: round.started_at,
                    }),
                    None => Err(JoinError::NotRunning),
                };
                let _ = respond.send(result);
            }
            Command::Cashout { player_id, respond } => {
                let result = match &mut current {
                    Some(round) => {
                        let outcome = round.cashout(player_id);
                        if round.has_crashed() {
                            finish_round(&mut current, &lifecycle_tx, &self_tx, &config).await;
                        }
                        outcome
                    }
                    None => Err(CashoutError::NotInRound),
                };
                let _ = respond.send(result);
            }
            Command::CancelJoin {
                player_id,
                round_id,
                respond,
            } => {
                if let Some(round) = &mut current {
                    if round.round_id == round_id {
                        round.leave(player_id);
                    }
                }
                let _ = respond.send(());
            }
            Command::Status { respond } => {
                let snapshot = match &current {
                    Some(round) => RoundStatusSnapshot {
                        round_id: Some(round.round_id),
                        status: Some(round.status),
                        multiplier: round.multiplier_now().min(round.crash_point),
                        started_at: Some(round.started_at),
                        commit_idx: round.commit_idx,
                        server_seed_hash: Some(round.server_seed_hash.clone()),
                    },
                    None => RoundStatusSnapshot {
                        round_id: None,
                        status: None,
                        multiplier: Decimal::ONE,
                        started_at: None,
                        commit_idx: None,
                        server_seed_hash: None,
                    },
                };
                let _ = respond.send(snapshot);
            }
            Command::CrashTimerFired { round_id } => {
                let should_finish = matches!(&current, Some(r) if r.round_id == round_id);
                if should_finish {
                    finish_round(&mut current, &lifecycle_tx, &self_tx, &config).await;
                }
            }
            Command::CreateNextRound => {
                if let Err(e) =
                    create_round(&mut current, &seed_store, &config, &lifecycle_tx, &self_tx).await
                {
                    tracing::error!(error = %e, "failed to create the next round; the next timer or an external nudge can retry");
                }
            }
            Command::Dispose => {
                if let Some(round) = current.as_mut() {
                    round.forget_seed();
                }
                current = None;
                break;
            }
        }
    }
}

async fn create_round(
    current: &mut Option<ActiveRound>,
    seed_store: &Arc<dyn SeedStore>,
    config: &EngineConfig,
    lifecycle_tx: &broadcast::Sender<LifecycleEvent>,
    self_tx: &mpsc::Sender<Command>,
) -> CoreResult<()> {
    let commit = seed_store.latest().await?;

    let (seed, commit_idx, server_seed_hash) = match commit {
        Some(commit) => {
            let seed = seed_store.seed_for(commit.idx).await?;
            (seed, Some(commit.idx), commit.seed_hash)
        }
        None if config.allow_degraded_rounds => {
            tracing::warn!(degraded_fairness = true, "starting a round with no seed commitment");
            let ephemeral = seed_store.ensure_next().await?;
            let seed = seed_store.seed_for(ephemeral.idx).await.unwrap_or_else(|_| {
                crate::seed_store::hash_seed(Uuid::new_v4().as_bytes())
            });
            (seed, None, crate::seed_store::hash_seed(&seed))
        }
        None => {
            return Err(CoreError::Internal(
                "refusing to start a round without a seed commitment".into(),
            ))
        }
    };

    let round_id = Uuid::new_v4();
    let started_at = Utc::now();
    let round = ActiveRound::new(round_id, commit_idx, seed, server_seed_hash.clone(), started_at);
    let crash_point = round.crash_point;
    let delay_ms = round.crash_delay_ms();

    let started_event = RoundStarted {
        round_id,
        commit_idx,
        server_seed_hash,
        crash_point,
        started_at,
        settlement_window_seconds: config.settlement_window_seconds,
    };

    *current = Some(round);

    let _ = lifecycle_tx.send(LifecycleEvent::Started(started_event));

    let timer_tx = self_tx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        let _ = timer_tx.send(Command::CrashTimerFired { round_id }).await;
    });

    // Always pre-prime the next commitment (spec §4.1: C1 primes C2 before
    // each round), regardless of whether this round used one.
    if let Err(e) = seed_store.ensure_next().await {
        tracing::warn!(error = %e, "failed to pre-prime the next seed commitment");
    }

    Ok(())
}

/// Idempotent: a concurrent cashout call and the crash timer can both race
/// to call this; the second call observes `mark_crashed` return `false`
/// and becomes a no-op (spec §4.2: "markCrashed... idempotent").
async fn finish_round(
    current: &mut Option<ActiveRound>,
    lifecycle_tx: &broadcast::Sender<LifecycleEvent>,
    self_tx: &mpsc::Sender<Command>,
    config: &EngineConfig,
) {
    let Some(round) = current.as_mut() else { return };
    if !round.mark_crashed() {
        return;
    }

    let ended_at = Utc::now();
    let event = RoundCrashed {
        round_id: round.round_id,
        crash_point: round.crash_point,
        server_seed_hash: round.server_seed_hash.clone(),
        server_seed: round.seed.clone(),
        commit_idx: round.commit_idx,
        started_at: round.started_at,
        ended_at,
        settlement_window_seconds: config.settlement_window_seconds,
    };
    let _ = lifecycle_tx.send(LifecycleEvent::Crashed(event));

    let gap = config.inter_round_gap;
    let next_tx = self_tx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(gap).await;
        let _ = next_tx.send(Command::CreateNextRound).await;
    });
}
