//! Connection pool for Deepgram real-time speech-to-text WebSocket sessions.
//!
//! The pool maintains a fleet of pre-warmed, keep-alive'd [`Session`]s,
//! hands them out under a deadline via [`Pool::acquire`], recycles them on
//! release, and retires them on idleness or transport failure. See
//! [`Pool`] for the main entry point.

pub mod config;
pub mod error;
pub mod metrics;
pub mod options;
pub mod pool;
pub mod pooled_session;
pub mod session;

pub mod logging;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use config::PoolConfig;
pub use error::{DeepgramPoolError, Result};
pub use logging::init_logging;
pub use metrics::{Metrics, MetricsSnapshot, RunningStatSnapshot};
pub use options::AudioStreamOptions;
pub use pool::Pool;
pub use pooled_session::{PooledSession, SessionState};
pub use session::events::{
    Alternative, Channel, ControlMessage, EventMetadata, ModelInfo, TranscriptEvent,
    TranscriptMessage, Word,
};
pub use session::{Callbacks, Session};
