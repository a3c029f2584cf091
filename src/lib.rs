//! Provably-fair crash game core: round engine, ledger, and payment
//! reconciliation, independent of any HTTP transport.

pub mod broadcaster;
pub mod cache;
pub mod config;
pub mod coordinator;
pub mod domain;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod logging;
pub mod money;
pub mod rate_limiter;
pub mod reconciler;
pub mod seed_store;

pub use coordinator::BetCoordinator;
pub use error::{CoreError, CoreResult};
pub use money::Money;
