//! Tracing setup.
//!
//! Ambient observability carried regardless of spec.md's "metrics export"
//! Non-goal — structured logging is infrastructure, not the feature the
//! Non-goals name. Mirrors `gjwang-zero_x_infinity`'s `tracing-subscriber`
//! `env-filter` + `json` pairing.

use tracing_subscriber::{fmt, EnvFilter};

pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = fmt().with_env_filter(filter);

    if cfg!(debug_assertions) {
        builder.pretty().init();
    } else {
        builder.json().init();
    }
}
