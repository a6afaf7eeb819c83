//! A [`crate::session::Session`] wrapped with a pool-friendly life cycle:
//! IDLE/ACTIVE/CLOSED state, a keep-alive timer, and an idle-timeout timer
//! (C2).

use crate::error::{DeepgramPoolError, Result};
use crate::metrics::Metrics;
use crate::session::events::ControlMessage;
use crate::session::{Callbacks, Session};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

const STATE_IDLE: u8 = 0;
const STATE_ACTIVE: u8 = 1;
const STATE_CLOSED: u8 = 2;

/// The pool lifecycle state of a [`PooledSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Active,
    Closed,
}

impl From<u8> for SessionState {
    fn from(value: u8) -> Self {
        match value {
            STATE_IDLE => SessionState::Idle,
            STATE_ACTIVE => SessionState::Active,
            _ => SessionState::Closed,
        }
    }
}

/// A [`Session`] plus pool lifecycle and timers.
///
/// Once `state` reaches [`SessionState::Closed`] it is terminal: `activate`,
/// `release`, and `send_audio` all raise [`DeepgramPoolError::IllegalState`]
/// thereafter, and both timer tasks have already been cancelled.
pub struct PooledSession {
    id: usize,
    session: Arc<Session>,
    metrics: Arc<Metrics>,
    scheduler: Handle,
    state: AtomicU8,
    epoch: Instant,
    last_activity_millis: AtomicU64,
    activated_at_millis: AtomicU64,
    first_transcript_pending: AtomicBool,
    idle_timeout: Duration,
    keep_alive_handle: StdMutex<Option<JoinHandle<()>>>,
    idle_check_handle: StdMutex<Option<JoinHandle<()>>>,
    user_callbacks: Arc<RwLock<Callbacks>>,
}

impl std::fmt::Debug for PooledSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledSession")
            .field("id", &self.id)
            .field("state", &SessionState::from(self.state.load(Ordering::Relaxed)))
            .finish_non_exhaustive()
    }
}

impl PooledSession {
    /// Construct a `PooledSession` around `session`, installing lifecycle
    /// callbacks and scheduling the keep-alive and idle-check timers onto
    /// `scheduler` (the owning [`crate::pool::Pool`]'s dedicated runtime
    /// handle, not the ambient one).
    pub fn new(
        id: usize,
        session: Session,
        metrics: Arc<Metrics>,
        scheduler: Handle,
        keep_alive_interval: Duration,
        idle_timeout: Duration,
    ) -> Arc<Self> {
        let session = Arc::new(session);
        let epoch = Instant::now();

        let pooled = Arc::new(Self {
            id,
            session: Arc::clone(&session),
            metrics: Arc::clone(&metrics),
            scheduler: scheduler.clone(),
            state: AtomicU8::new(STATE_IDLE),
            epoch,
            last_activity_millis: AtomicU64::new(0),
            activated_at_millis: AtomicU64::new(0),
            first_transcript_pending: AtomicBool::new(false),
            idle_timeout,
            keep_alive_handle: StdMutex::new(None),
            idle_check_handle: StdMutex::new(None),
            user_callbacks: Arc::new(RwLock::new(Callbacks::default())),
        });

        install_wrapper_callbacks(&pooled);

        let keep_alive = {
            let pooled = Arc::clone(&pooled);
            scheduler.spawn(async move {
                let mut interval = tokio::time::interval(keep_alive_interval);
                interval.tick().await; // first tick fires immediately
                loop {
                    interval.tick().await;
                    if pooled.state() == SessionState::Closed {
                        break;
                    }
                    match pooled
                        .session
                        .send_control(&ControlMessage::keep_alive())
                        .await
                    {
                        Ok(()) => pooled.metrics.record_keep_alive_sent(),
                        Err(e) => {
                            log::error!("keep-alive send failed for session {}: {e}", pooled.id);
                            pooled.metrics.record_connection_error();
                            pooled.close().await;
                            break;
                        }
                    }
                }
            })
        };

        let idle_check = {
            let pooled = Arc::clone(&pooled);
            scheduler.spawn(async move {
                let mut interval = tokio::time::interval(idle_timeout.max(Duration::from_millis(1)));
                interval.tick().await;
                loop {
                    interval.tick().await;
                    if pooled.state() == SessionState::Closed {
                        break;
                    }
                    if pooled.state() == SessionState::Idle
                        && pooled.idle_elapsed() >= pooled.idle_timeout
                    {
                        pooled.metrics.record_timeout_closure();
                        pooled.close().await;
                        break;
                    }
                }
            })
        };

        *pooled.keep_alive_handle.lock().expect("poisoned") = Some(keep_alive);
        *pooled.idle_check_handle.lock().expect("poisoned") = Some(idle_check);

        pooled
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state.load(Ordering::SeqCst).into()
    }

    /// Direct access to the underlying session, for advanced callers that
    /// want to wire callbacks themselves (bypassing lifecycle bookkeeping).
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Replace the caller-visible callbacks. Lifecycle bookkeeping (closing
    /// on transport error, metrics) is installed separately and always runs.
    pub fn set_callbacks(&self, callbacks: Callbacks) {
        *self.user_callbacks.write().expect("poisoned") = callbacks;
    }

    fn now_millis(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    fn touch(&self) {
        self.last_activity_millis
            .store(self.now_millis(), Ordering::SeqCst);
    }

    fn idle_elapsed(&self) -> Duration {
        let last = self.last_activity_millis.load(Ordering::SeqCst);
        Duration::from_millis(self.now_millis().saturating_sub(last))
    }

    /// Record the elapsed time since the most recent `activate()` as a
    /// usage-time observation.
    fn record_usage_time(&self) {
        let start = self.activated_at_millis.load(Ordering::SeqCst);
        self.metrics
            .record_usage_time(self.now_millis().saturating_sub(start));
    }

    /// CAS IDLE -> ACTIVE. If the session hasn't connected yet, kicks off a
    /// non-blocking connect.
    pub fn activate(&self) -> Result<()> {
        self.state
            .compare_exchange(STATE_IDLE, STATE_ACTIVE, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| {
                DeepgramPoolError::IllegalState(
                    "activate called on a session that is not idle".to_string(),
                )
            })?;

        self.touch();
        self.activated_at_millis
            .store(self.now_millis(), Ordering::SeqCst);
        self.first_transcript_pending.store(true, Ordering::SeqCst);
        self.metrics.record_acquire();

        if !self.session.is_connected() {
            let session = Arc::clone(&self.session);
            self.scheduler.spawn(async move {
                if let Err(e) = session.connect().await {
                    log::error!("background connect failed: {e}");
                }
            });
        }

        Ok(())
    }

    /// CAS ACTIVE -> IDLE.
    pub fn release(&self) -> Result<()> {
        self.state
            .compare_exchange(STATE_ACTIVE, STATE_IDLE, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| {
                DeepgramPoolError::IllegalState(
                    "release called on a session that is not active".to_string(),
                )
            })?;

        self.touch();
        self.metrics.record_release();
        self.record_usage_time();
        Ok(())
    }

    /// Send audio; requires ACTIVE state and an already-connected session.
    pub async fn send_audio(&self, bytes: &[u8]) -> Result<()> {
        if self.state() != SessionState::Active || !self.session.is_connected() {
            return Err(DeepgramPoolError::IllegalState(
                "send_audio requires an active, connected session".to_string(),
            ));
        }

        self.session.send_audio(bytes).await?;
        self.touch();
        Ok(())
    }

    /// Idempotently transition to CLOSED: cancels both timers and
    /// disconnects the underlying session exactly once.
    pub async fn close(&self) {
        let previous = self.state.swap(STATE_CLOSED, Ordering::SeqCst);
        if previous == STATE_CLOSED {
            return;
        }
        if previous == STATE_ACTIVE {
            self.record_usage_time();
        }

        if let Some(handle) = self.keep_alive_handle.lock().expect("poisoned").take() {
            handle.abort();
        }
        if let Some(handle) = self.idle_check_handle.lock().expect("poisoned").take() {
            handle.abort();
        }

        self.session.disconnect().await;
        self.metrics.record_close();
    }
}

/// Install the internal Session callbacks that keep the state machine and
/// metrics in sync, forwarding to whatever the caller registered via
/// [`PooledSession::set_callbacks`].
fn install_wrapper_callbacks(pooled: &Arc<PooledSession>) {
    let on_open_target = Arc::clone(pooled);
    let on_raw_text_target = Arc::clone(pooled);
    let on_transcript_target = Arc::clone(pooled);
    let on_error_target = Arc::clone(pooled);
    let on_close_target = Arc::clone(pooled);

    pooled.session.set_callbacks(Callbacks {
        on_open: Some(Arc::new(move || {
            if let Some(cb) = on_open_target
                .user_callbacks
                .read()
                .expect("poisoned")
                .on_open
                .clone()
            {
                cb();
            }
        })),
        on_raw_text: Some(Arc::new(move |text: &str| {
            if let Some(cb) = on_raw_text_target
                .user_callbacks
                .read()
                .expect("poisoned")
                .on_raw_text
                .clone()
            {
                cb(text);
            }
        })),
        on_transcript: Some(Arc::new(move |message| {
            if on_transcript_target
                .first_transcript_pending
                .swap(false, Ordering::SeqCst)
            {
                let start = on_transcript_target
                    .activated_at_millis
                    .load(Ordering::SeqCst);
                on_transcript_target
                    .metrics
                    .record_time_to_first_transcript(on_transcript_target.now_millis().saturating_sub(start));
            }
            if let Some(cb) = on_transcript_target
                .user_callbacks
                .read()
                .expect("poisoned")
                .on_transcript
                .clone()
            {
                cb(message);
            }
        })),
        on_error: Some(Arc::new(move |message: &str| {
            on_error_target.metrics.record_connection_error();
            let target = Arc::clone(&on_error_target);
            on_error_target.scheduler.spawn(async move { target.close().await });
            if let Some(cb) = on_error_target
                .user_callbacks
                .read()
                .expect("poisoned")
                .on_error
                .clone()
            {
                cb(message);
            }
        })),
        on_close: Some(Arc::new(move |code: u16| {
            let target = Arc::clone(&on_close_target);
            on_close_target.scheduler.spawn(async move { target.close().await });
            if let Some(cb) = on_close_target
                .user_callbacks
                .read()
                .expect("poisoned")
                .on_close
                .clone()
            {
                cb(code);
            }
        })),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::LoopbackServer;

    fn new_pooled(id: usize, idle_timeout: Duration) -> Arc<PooledSession> {
        let session = Session::new("wss://example.invalid/v1/listen", "secret");
        PooledSession::new(
            id,
            session,
            Arc::new(Metrics::new()),
            Handle::current(),
            Duration::from_secs(3600),
            idle_timeout,
        )
    }

    #[tokio::test]
    async fn starts_idle() {
        let pooled = new_pooled(1, Duration::from_secs(3600));
        assert_eq!(pooled.state(), SessionState::Idle);
        pooled.close().await;
    }

    #[tokio::test]
    async fn activate_then_release_round_trips_state() {
        let pooled = new_pooled(2, Duration::from_secs(3600));
        pooled.activate().unwrap();
        assert_eq!(pooled.state(), SessionState::Active);
        pooled.release().unwrap();
        assert_eq!(pooled.state(), SessionState::Idle);
        pooled.close().await;
    }

    #[tokio::test]
    async fn activate_twice_is_illegal_state() {
        let pooled = new_pooled(3, Duration::from_secs(3600));
        pooled.activate().unwrap();
        assert!(matches!(
            pooled.activate(),
            Err(DeepgramPoolError::IllegalState(_))
        ));
        pooled.close().await;
    }

    #[tokio::test]
    async fn release_without_activate_is_illegal_state() {
        let pooled = new_pooled(4, Duration::from_secs(3600));
        assert!(matches!(
            pooled.release(),
            Err(DeepgramPoolError::IllegalState(_))
        ));
        pooled.close().await;
    }

    #[tokio::test]
    async fn closed_session_rejects_all_operations() {
        let pooled = new_pooled(5, Duration::from_secs(3600));
        pooled.close().await;
        assert_eq!(pooled.state(), SessionState::Closed);
        assert!(matches!(
            pooled.activate(),
            Err(DeepgramPoolError::IllegalState(_))
        ));
        assert!(matches!(
            pooled.release(),
            Err(DeepgramPoolError::IllegalState(_))
        ));
        assert!(matches!(
            pooled.send_audio(b"hi").await,
            Err(DeepgramPoolError::IllegalState(_))
        ));
        // idempotent
        pooled.close().await;
        assert_eq!(pooled.state(), SessionState::Closed);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn idle_timeout_closes_the_session() {
        let pooled = new_pooled(6, Duration::from_millis(30));
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(pooled.state(), SessionState::Closed);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn keep_alive_emission_increments_metrics() {
        let server = LoopbackServer::start(vec![]).await;
        let session = Session::new(server.ws_url(), "secret");
        session.connect().await.unwrap();

        let metrics = Arc::new(Metrics::new());
        let pooled = PooledSession::new(
            7,
            session,
            Arc::clone(&metrics),
            Handle::current(),
            Duration::from_millis(30),
            Duration::from_secs(3600),
        );

        tokio::time::sleep(Duration::from_millis(130)).await;
        assert!(metrics.snapshot().total_keep_alives_sent >= 3);

        let received = server.received_text_frames();
        let keep_alives = received
            .iter()
            .filter(|text| text.as_str() == r#"{"type":"KeepAlive"}"#)
            .count();
        assert!(keep_alives >= 3);

        pooled.close().await;
        server.stop().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn activation_records_time_to_first_transcript_and_usage_time() {
        let frame = r#"{"channel":{"alternatives":[{"transcript":"hi","confidence":0.9,"words":[]}]}}"#;
        let server = LoopbackServer::start(vec![crate::testing::ScriptedFrame::Text(
            frame.to_string(),
        )])
        .await;
        let session = Session::new(server.ws_url(), "secret");

        let metrics = Arc::new(Metrics::new());
        let pooled = PooledSession::new(
            8,
            session,
            Arc::clone(&metrics),
            Handle::current(),
            Duration::from_secs(3600),
            Duration::from_secs(3600),
        );

        pooled.activate().unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        pooled.release().unwrap();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.time_to_first_transcript.count, 1);
        assert_eq!(snapshot.usage_time.count, 1);

        pooled.close().await;
        server.stop().await;
    }
}
