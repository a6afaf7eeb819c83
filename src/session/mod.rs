//! One bidirectional Deepgram live-transcription session over a WebSocket (C1).
//!
//! Framing, the `Authorization` header, and URL query assembly live here;
//! the pool's guarantees build on top of this type's connect/disconnect
//! state model.

pub mod events;

use crate::error::{DeepgramPoolError, Result};
use crate::options::AudioStreamOptions;
use events::{ControlMessage, TranscriptEvent, TranscriptMessage};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::http::Request;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

const PROTOCOL_PING_INTERVAL: Duration = Duration::from_secs(30);
const ABNORMAL_CLOSE_CODE: u16 = 1006;

/// Optional lifecycle callbacks. Each is independently optional; missing
/// capabilities are silently skipped. `set_callbacks` replaces the whole set
/// rather than appending to it.
#[derive(Clone, Default)]
pub struct Callbacks {
    pub on_open: Option<Arc<dyn Fn() + Send + Sync>>,
    pub on_raw_text: Option<Arc<dyn Fn(&str) + Send + Sync>>,
    pub on_transcript: Option<Arc<dyn Fn(TranscriptMessage) + Send + Sync>>,
    pub on_error: Option<Arc<dyn Fn(&str) + Send + Sync>>,
    pub on_close: Option<Arc<dyn Fn(u16) + Send + Sync>>,
}

/// One live (or not-yet-connected) WebSocket session to the transcription
/// service.
pub struct Session {
    url: RwLock<String>,
    credential: String,
    callbacks: Arc<RwLock<Callbacks>>,
    connected: Arc<AtomicBool>,
    connect_attempted: AtomicBool,
    closed_once: Arc<AtomicBool>,
    client_close_code: Arc<AtomicU32>,
    write: Arc<AsyncMutex<Option<WsSink>>>,
    reader_task: AsyncMutex<Option<JoinHandle<()>>>,
    ping_task: AsyncMutex<Option<JoinHandle<()>>>,
    start_timestamp: Instant,
}

const NO_CLIENT_CLOSE_CODE: u32 = u32::MAX;

impl Session {
    /// Create a new, disconnected session for `url` authenticated with
    /// `credential` (sent as `Authorization: Token <credential>`).
    pub fn new(url: impl Into<String>, credential: impl Into<String>) -> Self {
        Self {
            url: RwLock::new(url.into()),
            credential: credential.into(),
            callbacks: Arc::new(RwLock::new(Callbacks::default())),
            connected: Arc::new(AtomicBool::new(false)),
            connect_attempted: AtomicBool::new(false),
            closed_once: Arc::new(AtomicBool::new(false)),
            client_close_code: Arc::new(AtomicU32::new(NO_CLIENT_CLOSE_CODE)),
            write: Arc::new(AsyncMutex::new(None)),
            reader_task: AsyncMutex::new(None),
            ping_task: AsyncMutex::new(None),
            start_timestamp: Instant::now(),
        }
    }

    /// Append `options`'s serialized query to the stored URL.
    pub fn set_options(&self, options: &AudioStreamOptions) -> Result<()> {
        let mut url = self.url.write().expect("url lock poisoned");
        *url = options.append_to_url(&url)?;
        Ok(())
    }

    /// Replace the registered callbacks wholesale.
    pub fn set_callbacks(&self, callbacks: Callbacks) {
        *self.callbacks.write().expect("callbacks lock poisoned") = callbacks;
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn start_timestamp(&self) -> Instant {
        self.start_timestamp
    }

    /// Open the TCP+TLS+WebSocket handshake. Fires `on_open` before the
    /// returned future resolves; no inbound frame is delivered before that.
    pub async fn connect(&self) -> Result<()> {
        if self.connect_attempted.swap(true, Ordering::SeqCst) {
            log::debug!("connect() called more than once; only the first attempt is meaningful");
        }

        let url = self.url.read().expect("url lock poisoned").clone();
        log::info!("connecting to {url}");

        let request = Request::builder()
            .uri(&url)
            .header("Authorization", format!("Token {}", self.credential))
            .body(())
            .map_err(|e| DeepgramPoolError::Transport(format!("failed to build request: {e}")))?;

        let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| DeepgramPoolError::Transport(format!("handshake failed: {e}")))?;

        let (write, mut read) = ws_stream.split();
        *self.write.lock().await = Some(write);
        self.connected.store(true, Ordering::SeqCst);

        if let Some(cb) = self.callbacks.read().expect("callbacks lock poisoned").on_open.clone() {
            cb();
        }

        let callbacks = Arc::clone(&self.callbacks);
        let connected = Arc::clone(&self.connected);
        let closed_once = Arc::clone(&self.closed_once);
        let client_close_code = Arc::clone(&self.client_close_code);
        let write_for_close_ack = Arc::clone(&self.write);

        let reader = tokio::spawn(async move {
            while let Some(message) = read.next().await {
                match message {
                    Ok(Message::Text(text)) => {
                        dispatch_text(&callbacks, &text);
                    }
                    Ok(Message::Close(frame)) => {
                        let server_code = frame.map(|f| f.code.into());
                        let _ = write_for_close_ack.lock().await.take();
                        finish_close(
                            &callbacks,
                            &connected,
                            &closed_once,
                            &client_close_code,
                            server_code,
                        );
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        log::error!("websocket read error: {e}");
                        if let Some(cb) = callbacks
                            .read()
                            .expect("callbacks lock poisoned")
                            .on_error
                            .clone()
                        {
                            cb(&e.to_string());
                        }
                        finish_close(
                            &callbacks,
                            &connected,
                            &closed_once,
                            &client_close_code,
                            None,
                        );
                        break;
                    }
                }
            }
        });
        *self.reader_task.lock().await = Some(reader);

        let ping_write = Arc::clone(&self.write);
        let ping_connected = Arc::clone(&self.connected);
        let ping_callbacks = Arc::clone(&self.callbacks);
        let ping = tokio::spawn(async move {
            let mut interval = tokio::time::interval(PROTOCOL_PING_INTERVAL);
            interval.tick().await; // first tick fires immediately; skip it
            loop {
                interval.tick().await;
                if !ping_connected.load(Ordering::SeqCst) {
                    break;
                }
                let mut guard = ping_write.lock().await;
                if let Some(sink) = guard.as_mut() {
                    if let Err(e) = sink.send(Message::Ping(Vec::new())).await {
                        log::error!("protocol ping failed: {e}");
                        if let Some(cb) = ping_callbacks
                            .read()
                            .expect("callbacks lock poisoned")
                            .on_error
                            .clone()
                        {
                            cb(&e.to_string());
                        }
                        break;
                    }
                } else {
                    break;
                }
            }
        });
        *self.ping_task.lock().await = Some(ping);

        Ok(())
    }

    /// Enqueue a binary audio frame. Non-blocking: the send is a single
    /// mutex-guarded push onto the socket's write half.
    pub async fn send_audio(&self, bytes: &[u8]) -> Result<()> {
        if !self.is_connected() {
            return Err(DeepgramPoolError::IllegalState(
                "session is not connected".to_string(),
            ));
        }
        if bytes.is_empty() {
            return Err(DeepgramPoolError::InvalidArgument(
                "audio payload must not be empty".to_string(),
            ));
        }

        let mut guard = self.write.lock().await;
        let sink = guard.as_mut().ok_or_else(|| {
            DeepgramPoolError::IllegalState("session is not connected".to_string())
        })?;
        sink.send(Message::Binary(bytes.to_vec()))
            .await
            .map_err(|e| DeepgramPoolError::Transport(e.to_string()))
    }

    /// Serialize `message` to JSON and send it as a text control frame.
    pub async fn send_control(&self, message: &ControlMessage) -> Result<()> {
        if !self.is_connected() {
            return Err(DeepgramPoolError::IllegalState(
                "session is not connected".to_string(),
            ));
        }

        let json = serde_json::to_string(message)?;
        let mut guard = self.write.lock().await;
        let sink = guard.as_mut().ok_or_else(|| {
            DeepgramPoolError::IllegalState("session is not connected".to_string())
        })?;
        sink.send(Message::Text(json))
            .await
            .map_err(|e| DeepgramPoolError::Transport(e.to_string()))
    }

    /// Idempotently close the connection. Fires `on_close` exactly once.
    pub async fn disconnect(&self) {
        const CLIENT_NORMAL_CLOSE: u16 = 1000;
        self.client_close_code
            .store(CLIENT_NORMAL_CLOSE as u32, Ordering::SeqCst);

        if let Some(mut sink) = self.write.lock().await.take() {
            let _ = sink.send(Message::Close(None)).await;
            let _ = sink.close().await;
        }

        if let Some(task) = self.ping_task.lock().await.take() {
            task.abort();
        }
        if let Some(task) = self.reader_task.lock().await.take() {
            task.abort();
        }

        finish_close(
            &self.callbacks,
            &self.connected,
            &self.closed_once,
            &self.client_close_code,
            None,
        );
    }
}

fn dispatch_text(callbacks: &Arc<RwLock<Callbacks>>, text: &str) {
    let cbs = callbacks.read().expect("callbacks lock poisoned").clone();

    if let Some(on_raw_text) = &cbs.on_raw_text {
        on_raw_text(text);
    }

    match serde_json::from_str::<TranscriptEvent>(text) {
        Ok(event) => {
            if let Some(message) = event.to_message() {
                if let Some(on_transcript) = &cbs.on_transcript {
                    on_transcript(message);
                }
            }
        }
        Err(e) => {
            if let Some(on_error) = &cbs.on_error {
                on_error(&format!("failed to parse transcript event: {e}"));
            }
        }
    }
}

fn finish_close(
    callbacks: &Arc<RwLock<Callbacks>>,
    connected: &Arc<AtomicBool>,
    closed_once: &Arc<AtomicBool>,
    client_close_code: &Arc<AtomicU32>,
    server_code: Option<u16>,
) {
    if closed_once.swap(true, Ordering::SeqCst) {
        return;
    }
    connected.store(false, Ordering::SeqCst);

    let client_code = client_close_code.load(Ordering::SeqCst);
    let code = server_code.unwrap_or(if client_code == NO_CLIENT_CLOSE_CODE {
        ABNORMAL_CLOSE_CODE
    } else {
        client_code as u16
    });

    if let Some(cb) = callbacks
        .read()
        .expect("callbacks lock poisoned")
        .on_close
        .clone()
    {
        cb(code);
    }
}
