//! Optional `log` output for binaries and tests embedding this crate.
//!
//! The crate itself never calls this; a consuming program opts in with one
//! call if it wants the crate's `log::{info,warn,error}` calls surfaced.

/// Install an `env_logger` subscriber reading `RUST_LOG` (default `info`).
///
/// Safe to call more than once; subsequent calls are no-ops per
/// `env_logger`'s own `try_init` semantics.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .is_test(cfg!(test))
        .try_init();
}
