//! Bounded pool of [`PooledSession`]s with deadline-driven acquire (C4).

use crate::config::PoolConfig;
use crate::error::{DeepgramPoolError, Result};
use crate::metrics::Metrics;
use crate::options::AudioStreamOptions;
use crate::pooled_session::{PooledSession, SessionState};
use crate::session::Session;
use crossbeam_queue::SegQueue;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc as std_mpsc, Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::oneshot;

const ACQUIRE_POLL_INTERVAL: Duration = Duration::from_millis(100);
const SCHEDULER_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Owns a bounded set of [`PooledSession`]s behind an idle FIFO and an
/// active set, both lock-free concurrent collections rather than a single
/// guarded pool struct.
pub struct Pool {
    url: String,
    credential: String,
    config: PoolConfig,
    options: AudioStreamOptions,
    metrics: Arc<Metrics>,
    idle: SegQueue<Arc<PooledSession>>,
    active: DashMap<usize, Arc<PooledSession>>,
    next_id: AtomicUsize,
    /// Slots claimed by an in-flight `create_session()` call that hasn't yet
    /// landed in `idle`/`active`. Folded into the capacity check in
    /// `acquire()` so two concurrent callers can't both observe spare
    /// capacity and synthesize past `max_size`.
    reserved: AtomicUsize,
    shutdown: AtomicBool,
    /// Dedicated single-threaded runtime handle every `PooledSession`'s
    /// keep-alive and idle-check timers are spawned onto, owned by this pool
    /// rather than borrowed from whatever ambient runtime happens to be
    /// current. `scheduler_thread`/`scheduler_stop` let `close()` shut it
    /// down explicitly instead of leaning on `Drop`.
    scheduler: Handle,
    scheduler_thread: StdMutex<Option<std::thread::JoinHandle<()>>>,
    scheduler_stop: StdMutex<Option<oneshot::Sender<()>>>,
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool").field("url", &self.url).finish_non_exhaustive()
    }
}

impl Pool {
    /// Validate `url`/`credential`, then eagerly (best-effort) create
    /// `config.initial_size()` sessions. A session that fails to connect
    /// during warm-up is recorded as a connection error but does not abort
    /// construction.
    pub async fn new(
        url: impl Into<String>,
        credential: impl Into<String>,
        config: PoolConfig,
        options: AudioStreamOptions,
    ) -> Result<Arc<Self>> {
        let url = url.into();
        let credential = credential.into();

        if url.is_empty() {
            return Err(DeepgramPoolError::InvalidArgument(
                "url must not be empty".to_string(),
            ));
        }
        if credential.is_empty() {
            return Err(DeepgramPoolError::InvalidArgument(
                "credential must not be empty".to_string(),
            ));
        }

        let (scheduler, scheduler_thread, scheduler_stop) = tokio::task::spawn_blocking(spawn_scheduler)
            .await
            .map_err(|e| {
                DeepgramPoolError::Transport(format!("failed to initialize pool scheduler: {e}"))
            })??;

        let pool = Arc::new(Self {
            url,
            credential,
            config: config.clone(),
            options,
            metrics: Arc::new(Metrics::new()),
            idle: SegQueue::new(),
            active: DashMap::new(),
            next_id: AtomicUsize::new(0),
            reserved: AtomicUsize::new(0),
            shutdown: AtomicBool::new(false),
            scheduler,
            scheduler_thread: StdMutex::new(Some(scheduler_thread)),
            scheduler_stop: StdMutex::new(Some(scheduler_stop)),
        });

        for _ in 0..config.initial_size() {
            match pool.create_session().await {
                Ok(session) => pool.idle.push(session),
                Err(e) => {
                    log::error!("failed to pre-warm a session: {e}");
                    pool.metrics.record_connection_error();
                }
            }
        }

        Ok(pool)
    }

    /// Build, connect (with retry), and wrap a fresh `Session`.
    ///
    /// Every newly created session is recorded as created-then-idle: the
    /// caller either pushes it onto the idle queue (warm-up) or activates it
    /// immediately (synthesized mid-`acquire`), in which case the gauge
    /// delta from `activate()` brings it to active the same way a
    /// previously-idle session would.
    async fn create_session(&self) -> Result<Arc<PooledSession>> {
        let session = Session::new(self.url.clone(), self.credential.clone());
        session.set_options(&self.options)?;
        self.connect_with_retry(&session).await?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let pooled = PooledSession::new(
            id,
            session,
            Arc::clone(&self.metrics),
            self.scheduler.clone(),
            self.config.keep_alive_interval(),
            self.config.connection_timeout(),
        );

        self.metrics.record_create_connection();
        self.metrics.record_release();

        Ok(pooled)
    }

    async fn connect_with_retry(&self, session: &Session) -> Result<()> {
        let mut attempts = 0u32;
        loop {
            let outcome = tokio::time::timeout(self.config.acquire_timeout(), session.connect()).await;
            let error = match outcome {
                Ok(Ok(())) => return Ok(()),
                Ok(Err(e)) => e,
                Err(_) => DeepgramPoolError::Timeout(self.config.acquire_timeout()),
            };

            attempts += 1;
            if attempts > self.config.max_retries() {
                log::error!("connect failed after {attempts} attempt(s): {error}");
                self.metrics.record_connection_error();
                return Err(error);
            }
            log::warn!("connect attempt {attempts} failed, retrying: {error}");
            tokio::time::sleep(self.config.retry_delay()).await;
        }
    }

    /// Atomically claim one unit of capacity if `total_connections() +
    /// reserved < max_size`. The caller must release the slot (via
    /// `release_slot`) once the session it created lands in `idle`/`active`
    /// or the creation attempt fails — whichever comes first.
    fn try_reserve_slot(&self) -> bool {
        self.reserved
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |reserved| {
                if self.total_connections() + reserved < self.config.max_size() {
                    Some(reserved + 1)
                } else {
                    None
                }
            })
            .is_ok()
    }

    fn release_slot(&self) {
        self.reserved.fetch_sub(1, Ordering::SeqCst);
    }

    /// Deadline-driven poll loop: pop idle, skip closed, synthesize under
    /// the cap, or sleep and retry, until `acquire_timeout` elapses.
    pub async fn acquire(&self) -> Result<Arc<PooledSession>> {
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(DeepgramPoolError::IllegalState(
                "pool is shut down".to_string(),
            ));
        }

        let start = Instant::now();
        let acquire_timeout = self.config.acquire_timeout();

        let (candidate, reserved_slot) = loop {
            let remaining = acquire_timeout.saturating_sub(start.elapsed());
            if remaining.is_zero() {
                break (None, false);
            }

            if let Some(session) = self.idle.pop() {
                if session.state() == SessionState::Closed {
                    continue;
                }
                break (Some(session), false);
            }

            if self.try_reserve_slot() {
                match self.create_session().await {
                    Ok(session) => break (Some(session), true),
                    Err(e) => {
                        self.release_slot();
                        log::error!("failed to synthesize a session during acquire: {e}");
                    }
                }
            }

            tokio::time::sleep(ACQUIRE_POLL_INTERVAL.min(remaining)).await;
        };

        let candidate = match candidate {
            Some(candidate) => candidate,
            None => {
                self.metrics.record_acquisition_timeout();
                return Err(DeepgramPoolError::Timeout(acquire_timeout));
            }
        };

        if let Err(e) = candidate.activate() {
            self.idle.push(candidate);
            if reserved_slot {
                self.release_slot();
            }
            return Err(e);
        }

        self.active.insert(candidate.id(), Arc::clone(&candidate));
        if reserved_slot {
            self.release_slot();
        }
        self.metrics
            .record_acquisition_time(start.elapsed().as_millis() as u64);
        Ok(candidate)
    }

    /// Remove `session` from the active set and return it to idle, closing
    /// it instead if the underlying release fails.
    pub async fn release(&self, session: Arc<PooledSession>) -> Result<()> {
        if self.active.remove(&session.id()).is_none() {
            return Err(DeepgramPoolError::IllegalState(
                "session is not in the active set".to_string(),
            ));
        }

        match session.release() {
            Ok(()) => {
                self.idle.push(session);
                Ok(())
            }
            Err(e) => {
                log::error!("release failed, closing session instead: {e}");
                session.close().await;
                Err(e)
            }
        }
    }

    /// One-shot shutdown: a second call raises `IllegalState`. Closes every
    /// idle and active session, then stops the pool's dedicated scheduler
    /// (graceful, with a grace period, forcing it down after).
    pub async fn close(&self) -> Result<()> {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return Err(DeepgramPoolError::IllegalState(
                "pool is already closed".to_string(),
            ));
        }

        while let Some(session) = self.idle.pop() {
            session.close().await;
        }

        let active_ids: Vec<usize> = self.active.iter().map(|entry| *entry.key()).collect();
        for id in active_ids {
            if let Some((_, session)) = self.active.remove(&id) {
                session.close().await;
            }
        }

        self.stop_scheduler().await;

        Ok(())
    }

    /// Signal the scheduler thread to stop and wait up to
    /// `SCHEDULER_SHUTDOWN_GRACE` for it to join; past the grace period the
    /// thread is abandoned (its runtime is dropped, force-cancelling
    /// whatever is left on it) rather than blocking `close()` indefinitely.
    async fn stop_scheduler(&self) {
        if let Some(stop) = self.scheduler_stop.lock().expect("poisoned").take() {
            let _ = stop.send(());
        }

        let thread = self.scheduler_thread.lock().expect("poisoned").take();
        let Some(thread) = thread else {
            return;
        };

        let joined = tokio::time::timeout(
            SCHEDULER_SHUTDOWN_GRACE,
            tokio::task::spawn_blocking(move || thread.join()),
        )
        .await;

        match joined {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(_))) => log::error!("pool scheduler thread panicked"),
            Ok(Err(e)) => log::error!("failed to join pool scheduler thread: {e}"),
            Err(_) => {
                log::warn!("pool scheduler did not stop within the grace period; abandoning it")
            }
        }
    }

    pub fn idle_count(&self) -> usize {
        self.idle.len()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn total_connections(&self) -> usize {
        self.idle_count() + self.active_count()
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }
}

/// Build and drive a dedicated single-threaded Tokio runtime on its own OS
/// thread, returning a `Handle` usable from anywhere plus the join handle
/// and stop signal `Pool::close` needs to shut it down later. A
/// `current_thread` runtime only makes progress while something is blocked
/// on it, so the thread's whole job is to `block_on` a future that resolves
/// when told to stop.
fn spawn_scheduler() -> Result<(Handle, std::thread::JoinHandle<()>, oneshot::Sender<()>)> {
    let (handle_tx, handle_rx) = std_mpsc::channel();
    let (stop_tx, stop_rx) = oneshot::channel();

    let thread = std::thread::Builder::new()
        .name("deepgram-pool-scheduler".to_string())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(e) => {
                    let _ = handle_tx.send(Err(e));
                    return;
                }
            };
            let _ = handle_tx.send(Ok(runtime.handle().clone()));
            runtime.block_on(async {
                let _ = stop_rx.await;
            });
            // `runtime` drops here, force-cancelling anything still queued.
        })
        .map_err(|e| {
            DeepgramPoolError::Transport(format!("failed to spawn pool scheduler thread: {e}"))
        })?;

    let handle = handle_rx
        .recv()
        .map_err(|_| {
            DeepgramPoolError::Transport(
                "pool scheduler thread exited before starting".to_string(),
            )
        })?
        .map_err(|e| {
            DeepgramPoolError::Transport(format!("failed to build pool scheduler runtime: {e}"))
        })?;

    Ok((handle, thread, stop_tx))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_warm_up_config() -> PoolConfig {
        PoolConfig::default()
            .with_initial_size(0)
            .unwrap()
            .with_max_size(0)
            .unwrap()
    }

    #[tokio::test]
    async fn rejects_empty_url() {
        let err = Pool::new("", "key", no_warm_up_config(), AudioStreamOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DeepgramPoolError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn rejects_empty_credential() {
        let err = Pool::new("wss://example.invalid", "", no_warm_up_config(), AudioStreamOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DeepgramPoolError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn starts_with_no_connections_when_initial_size_is_zero() {
        let pool = Pool::new(
            "wss://example.invalid",
            "key",
            no_warm_up_config(),
            AudioStreamOptions::new(),
        )
        .await
        .unwrap();
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(pool.active_count(), 0);
        assert_eq!(pool.total_connections(), 0);
    }

    #[tokio::test]
    async fn acquire_after_shutdown_is_illegal_state() {
        let pool = Pool::new(
            "wss://example.invalid",
            "key",
            no_warm_up_config(),
            AudioStreamOptions::new(),
        )
        .await
        .unwrap();
        pool.close().await.unwrap();
        assert!(matches!(
            pool.acquire().await,
            Err(DeepgramPoolError::IllegalState(_))
        ));
    }

    #[tokio::test]
    async fn double_close_is_illegal_state() {
        let pool = Pool::new(
            "wss://example.invalid",
            "key",
            no_warm_up_config(),
            AudioStreamOptions::new(),
        )
        .await
        .unwrap();
        pool.close().await.unwrap();
        assert!(matches!(
            pool.close().await,
            Err(DeepgramPoolError::IllegalState(_))
        ));
    }

    #[tokio::test]
    async fn release_of_unknown_session_is_illegal_state() {
        let pool = Pool::new(
            "wss://example.invalid",
            "key",
            no_warm_up_config(),
            AudioStreamOptions::new(),
        )
        .await
        .unwrap();
        let stray = PooledSession::new(
            999,
            Session::new("wss://example.invalid", "key"),
            Arc::new(Metrics::new()),
            Handle::current(),
            Duration::from_secs(3600),
            Duration::from_secs(3600),
        );
        assert!(matches!(
            pool.release(stray).await,
            Err(DeepgramPoolError::IllegalState(_))
        ));
        pool.close().await.unwrap();
    }

    #[tokio::test]
    async fn slot_reservation_rejects_once_at_capacity() {
        let config = PoolConfig::default()
            .with_initial_size(0)
            .unwrap()
            .with_max_size(1)
            .unwrap();
        let pool = Pool::new("wss://example.invalid", "key", config, AudioStreamOptions::new())
            .await
            .unwrap();

        assert!(pool.try_reserve_slot());
        // A second concurrent claimant sees total_connections() (0) plus the
        // first claimant's reservation (1) already at max_size and is
        // rejected, closing the race this guards against.
        assert!(!pool.try_reserve_slot());

        pool.release_slot();
        assert!(pool.try_reserve_slot());

        pool.close().await.unwrap();
    }
}
