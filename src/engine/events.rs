//! Engine lifecycle events.
//!
//! §9's "event emitter → typed channels" redesign flag: the teacher's
//! `#[event] pub struct RoundStarted { .. }` / `emit!(..)` pairs become
//! plain structs carried over channels. Lifecycle events
//! (`RoundStarted`/`RoundCrashed`) are buffered and delivered reliably;
//! ticks are lossy (spec §4.3, §9).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::RoundStatus;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundStarted {
    pub round_id: Uuid,
    pub commit_idx: Option<i64>,
    pub server_seed_hash: Vec<u8>,
    pub crash_point: Decimal,
    pub started_at: DateTime<Utc>,
    pub settlement_window_seconds: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundCrashed {
    pub round_id: Uuid,
    pub crash_point: Decimal,
    pub server_seed_hash: Vec<u8>,
    pub server_seed: Vec<u8>,
    pub commit_idx: Option<i64>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub settlement_window_seconds: i64,
}

/// C3's input: the engine's public status, sampled on a fixed cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tick {
    pub round_id: Option<Uuid>,
    pub status: Option<RoundStatus>,
    pub multiplier: Decimal,
    pub started_at: Option<DateTime<Utc>>,
    pub commit_idx: Option<i64>,
    pub server_seed_hash: Option<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    Started(RoundStarted),
    Crashed(RoundCrashed),
}
