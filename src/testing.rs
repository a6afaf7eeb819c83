//! Loopback WebSocket server used by the integration test suite so it never
//! needs a network connection or a real Deepgram credential.
#![doc(hidden)]

use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

/// A script the loopback server plays back to exactly one connecting client.
#[derive(Clone, Debug)]
pub enum ScriptedFrame {
    Text(String),
    Close,
}

/// A running loopback server plus a handle to stop it.
pub struct LoopbackServer {
    pub addr: SocketAddr,
    handle: JoinHandle<()>,
    shutdown: mpsc::Sender<()>,
    received: Arc<Mutex<Vec<String>>>,
}

impl LoopbackServer {
    /// Bind to `127.0.0.1:0` and accept exactly one connection, replaying
    /// `script` as text frames (with a short delay between each) and then
    /// either closing or idling depending on the trailing `ScriptedFrame`.
    pub async fn start(script: Vec<ScriptedFrame>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind loopback listener");
        let addr = listener.local_addr().expect("listener has no local addr");
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let received = Arc::new(Mutex::new(Vec::new()));
        let received_task = Arc::clone(&received);

        let handle = tokio::spawn(async move {
            tokio::select! {
                accepted = listener.accept() => {
                    if let Ok((stream, _)) = accepted {
                        if let Ok(ws) = tokio_tungstenite::accept_async(stream).await {
                            let (mut write, mut read) = ws.split();
                            for frame in &script {
                                match frame {
                                    ScriptedFrame::Text(text) => {
                                        if write.send(Message::Text(text.clone())).await.is_err() {
                                            return;
                                        }
                                        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                                    }
                                    ScriptedFrame::Close => {
                                        let _ = write.send(Message::Close(None)).await;
                                        return;
                                    }
                                }
                            }
                            // keep draining inbound frames (audio/control), recording text
                            // frames so tests can assert on what the client actually sent
                            loop {
                                tokio::select! {
                                    _ = shutdown_rx.recv() => return,
                                    msg = read.next() => {
                                        match msg {
                                            Some(Ok(Message::Text(text))) => {
                                                received_task.lock().expect("poisoned").push(text);
                                            }
                                            Some(Ok(_)) => continue,
                                            _ => return,
                                        }
                                    }
                                }
                            }
                        }
                    }
                }
                _ = shutdown_rx.recv() => {}
            }
        });

        Self {
            addr,
            handle,
            shutdown: shutdown_tx,
            received,
        }
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/v1/listen", self.addr)
    }

    /// Text frames the server has received from the client so far, in order.
    pub fn received_text_frames(&self) -> Vec<String> {
        self.received.lock().expect("poisoned").clone()
    }

    pub async fn stop(self) {
        let _ = self.shutdown.send(()).await;
        let _ = self.handle.await;
    }
}
