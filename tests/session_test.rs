use deepgram_pool::testing::{LoopbackServer, ScriptedFrame};
use deepgram_pool::{Callbacks, Session, TranscriptMessage};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[tokio::test]
async fn connect_fires_on_open_before_resolving() {
    let server = LoopbackServer::start(vec![]).await;
    let session = Session::new(server.ws_url(), "test-credential");

    let opened = Arc::new(AtomicBool::new(false));
    let opened2 = Arc::clone(&opened);
    session.set_callbacks(Callbacks {
        on_open: Some(Arc::new(move || opened2.store(true, Ordering::SeqCst))),
        ..Default::default()
    });

    session.connect().await.unwrap();
    assert!(opened.load(Ordering::SeqCst));
    assert!(session.is_connected());

    session.disconnect().await;
    server.stop().await;
}

#[tokio::test]
async fn inbound_transcript_frame_reaches_on_transcript() {
    let frame = r#"{"type":"Results","is_final":true,"start":0.0,"duration":1.0,
        "channel":{"alternatives":[{"transcript":"hello there","confidence":0.9,"words":[]}]}}"#;
    let server = LoopbackServer::start(vec![ScriptedFrame::Text(frame.to_string())]).await;
    let session = Session::new(server.ws_url(), "test-credential");

    let received: Arc<Mutex<Option<TranscriptMessage>>> = Arc::new(Mutex::new(None));
    let received2 = Arc::clone(&received);
    session.set_callbacks(Callbacks {
        on_transcript: Some(Arc::new(move |msg: TranscriptMessage| {
            *received2.lock().unwrap() = Some(msg);
        })),
        ..Default::default()
    });

    session.connect().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let message = received.lock().unwrap().clone().expect("transcript delivered");
    assert_eq!(message.transcript, "hello there");
    assert!(message.is_final);

    session.disconnect().await;
    server.stop().await;
}

#[tokio::test]
async fn disconnect_fires_on_close_exactly_once() {
    let server = LoopbackServer::start(vec![]).await;
    let session = Session::new(server.ws_url(), "test-credential");

    let close_count = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let close_count2 = Arc::clone(&close_count);
    session.set_callbacks(Callbacks {
        on_close: Some(Arc::new(move |_code: u16| {
            close_count2.fetch_add(1, Ordering::SeqCst);
        })),
        ..Default::default()
    });

    session.connect().await.unwrap();
    session.disconnect().await;
    session.disconnect().await;

    assert_eq!(close_count.load(Ordering::SeqCst), 1);
    assert!(!session.is_connected());

    server.stop().await;
}
