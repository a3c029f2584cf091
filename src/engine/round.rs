//! The in-memory round state machine (spec.md §4.2).
//!
//! Generalizes the teacher's `RoundState`/`RoundParticipant` account
//! structs and `start_round_handler`/`join_handler`/`cashout_handler`/
//! `resolve_handler` functions into plain methods on an owned struct; the
//! "PDA + CPI transfer" shape becomes "mutate a map entry", the actual
//! money movement having moved to the ledger (C4) in the off-chain design.

use std::collections::HashMap;
use std::time::Instant;

use chrono::{DateTime, Utc};
use rust_decimal::prelude::*;
use uuid::Uuid;

use crate::domain::{CashoutOutcome, RoundStatus};
use crate::money::Money;

use super::crash_point::{derive_crash_point, DEFAULT_CLIENT_SEED};

#[derive(Debug, Clone)]
pub struct Player {
    pub bet_amount: Money,
    pub cashed_out: bool,
}

/// One round's full in-memory state. `seed` is zeroed on dispose and never
/// serialized — it is revealed exactly once, inside `RoundCrashed`.
pub struct ActiveRound {
    pub round_id: Uuid,
    pub commit_idx: Option<i64>,
    pub seed: Vec<u8>,
    pub server_seed_hash: Vec<u8>,
    pub crash_point: Decimal,
    pub started_at: DateTime<Utc>,
    /// Monotonic clock anchor for `m(t)`; wall-clock `started_at` is kept
    /// only for persistence and reveal.
    started_instant: Instant,
    pub status: RoundStatus,
    pub players: HashMap<Uuid, Player>,
}

impl ActiveRound {
    pub fn new(
        round_id: Uuid,
        commit_idx: Option<i64>,
        seed: Vec<u8>,
        server_seed_hash: Vec<u8>,
        started_at: DateTime<Utc>,
    ) -> Self {
        let crash_point = derive_crash_point(&seed, DEFAULT_CLIENT_SEED);
        Self {
            round_id,
            commit_idx,
            seed,
            server_seed_hash,
            crash_point,
            started_at,
            started_instant: Instant::now(),
            status: RoundStatus::Running,
            players: HashMap::new(),
        }
    }

    /// `delay_ms = max(100, floor((crash_point - 1) * 1000))` — spec §4.2
    /// step 4. Consistent by construction with `multiplier_at`: the round
    /// reaches `crash_point` exactly at this delay (§9's open question on
    /// formula consistency).
    pub fn crash_delay_ms(&self) -> u64 {
        let ms = ((self.crash_point - Decimal::ONE) * Decimal::from(1000))
            .floor()
            .to_u64()
            .unwrap_or(0);
        ms.max(100)
    }

    /// `m(t) = 1 + (t - t0)/1000` — growth of 1.00x per second.
    pub fn multiplier_now(&self) -> Decimal {
        let elapsed_ms = self.started_instant.elapsed().as_millis() as i64;
        Decimal::ONE + Decimal::new(elapsed_ms, 3)
    }

    pub fn has_crashed(&self) -> bool {
        self.status == RoundStatus::Crashed || self.multiplier_now() >= self.crash_point
    }

    pub fn join(&mut self, player_id: Uuid, bet_amount: Money) -> Result<(), JoinError> {
        if self.status != RoundStatus::Running {
            return Err(JoinError::NotRunning);
        }
        if self.players.contains_key(&player_id) {
            return Err(JoinError::AlreadyJoined);
        }
        self.players.insert(
            player_id,
            Player {
                bet_amount,
                cashed_out: false,
            },
        );
        Ok(())
    }

    pub fn cashout(&mut self, player_id: Uuid) -> Result<CashoutOutcome, CashoutError> {
        let multiplier_now = self.multiplier_now();
        let crashed = self.status != RoundStatus::Running || multiplier_now >= self.crash_point;

        let player = self
            .players
            .get_mut(&player_id)
            .ok_or(CashoutError::NotInRound)?;
        if player.cashed_out {
            return Err(CashoutError::AlreadyCashedOut);
        }

        if crashed {
            // Status transition is left to the caller's `mark_crashed`
            // (via `finish_round`) so a cashout racing the crash timer
            // never short-circuits round teardown.
            return Ok(CashoutOutcome {
                round_id: self.round_id,
                win: false,
                multiplier: self.crash_point,
                payout: Money::ZERO,
            });
        }

        let multiplier = multiplier_now.round_dp(2);
        let payout = player
            .bet_amount
            .checked_mul_multiplier(multiplier)
            .unwrap_or(Money::ZERO);
        player.cashed_out = true;

        Ok(CashoutOutcome {
            round_id: self.round_id,
            win: true,
            multiplier,
            payout,
        })
    }

    /// Removes a player's join, e.g. to compensate a ledger rejection that
    /// arrives after the engine already accepted the bet in-process.
    pub fn leave(&mut self, player_id: Uuid) -> bool {
        self.players.remove(&player_id).is_some()
    }

    /// Idempotent: returns whether this call actually transitioned the
    /// round (false if it was already crashed).
    pub fn mark_crashed(&mut self) -> bool {
        if self.status == RoundStatus::Crashed {
            return false;
        }
        self.status = RoundStatus::Crashed;
        true
    }

    /// Zeroes the seed in memory; called from `dispose` (spec §4.2).
    pub fn forget_seed(&mut self) {
        self.seed.iter_mut().for_each(|b| *b = 0);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum JoinError {
    #[error("round is not running")]
    NotRunning,
    #[error("player already joined this round")]
    AlreadyJoined,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CashoutError {
    #[error("player not in this round")]
    NotInRound,
    #[error("player already cashed out")]
    AlreadyCashedOut,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::thread::sleep;
    use std::time::Duration;

    fn round_with_crash(crash_point_seed: &[u8]) -> ActiveRound {
        ActiveRound::new(
            Uuid::new_v4(),
            Some(0),
            crash_point_seed.to_vec(),
            vec![0u8; 32],
            Utc::now(),
        )
    }

    #[test]
    fn join_rejects_duplicate_player() {
        let mut round = round_with_crash(b"seed-a");
        let player = Uuid::new_v4();
        round.join(player, Money::from_i64_cents(1000)).unwrap();
        assert_eq!(round.join(player, Money::from_i64_cents(1000)), Err(JoinError::AlreadyJoined));
    }

    #[test]
    fn multiplier_is_monotone_and_never_exceeds_crash_point() {
        let round = round_with_crash(b"monotone-seed");
        let mut last = round.multiplier_now();
        for _ in 0..5 {
            sleep(Duration::from_millis(20));
            let now = round.multiplier_now();
            assert!(now >= last);
            last = now;
        }
    }

    #[test]
    fn cashout_after_crash_reports_loss() {
        // Force an immediate crash by using a round whose crash point is
        // reached well before any sleep below.
        let mut round = round_with_crash(b"seed-that-crashes-fast");
        round.crash_point = dec!(1.00);
        let player = Uuid::new_v4();
        round.join(player, Money::from_i64_cents(1000)).unwrap();
        sleep(Duration::from_millis(10));
        let outcome = round.cashout(player).unwrap();
        assert!(!outcome.win);
        assert_eq!(outcome.payout, Money::ZERO);
    }

    #[test]
    fn cashout_is_rejected_after_first_success() {
        let mut round = round_with_crash(b"seed-two");
        round.crash_point = dec!(5.00);
        let player = Uuid::new_v4();
        round.join(player, Money::from_i64_cents(1000)).unwrap();
        round.cashout(player).unwrap();
        assert_eq!(round.cashout(player), Err(CashoutError::AlreadyCashedOut));
    }
}
