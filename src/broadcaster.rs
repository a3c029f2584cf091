//! C3 — Tick broadcaster.
//!
//! Pulls the engine's public status on a fixed cadence and republishes it
//! on a `tokio::sync::broadcast` channel, which is lossy by construction
//! for a lagging subscriber — exactly the "ticks are lossy, lifecycle
//! events are reliable" split spec.md §9 calls for. Never keeps the
//! process alive: `start()` spawns a task the caller owns a `JoinHandle`
//! for, and `stop()` aborts it (spec §4.3, §5 shutdown sequence).

use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::engine::{events::Tick, EngineHandle};

pub struct TickBroadcaster {
    handle: Option<JoinHandle<()>>,
}

impl TickBroadcaster {
    pub fn start(
        engine: EngineHandle,
        interval: Duration,
    ) -> (Self, broadcast::Receiver<Tick>) {
        let (tx, rx) = broadcast::channel(16);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let Ok(snapshot) = engine.status().await else {
                    // Engine actor is gone; nothing left to broadcast.
                    break;
                };
                let tick = Tick {
                    round_id: snapshot.round_id,
                    status: snapshot.status,
                    multiplier: snapshot.multiplier,
                    started_at: snapshot.started_at,
                    commit_idx: snapshot.commit_idx,
                    server_seed_hash: snapshot.server_seed_hash,
                };
                // `send` only errors when there are no subscribers; the
                // broadcaster must survive their absence (spec §4.3).
                let _ = tx.send(tick);
            }
        });

        (Self { handle: Some(handle) }, rx)
    }

    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for TickBroadcaster {
    fn drop(&mut self) {
        self.stop();
    }
}
