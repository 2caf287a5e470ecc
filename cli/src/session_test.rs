use super::*;

use tokio::net::TcpListener;
use tokio_tungstenite::accept_async;

#[derive(Default)]
struct Collected(Vec<Vec<u8>>);

impl FrameSink for Collected {
    fn accept(&mut self, jpeg: Vec<u8>) {
        self.0.push(jpeg);
    }
}

fn numbered_frames(count: u8) -> Vec<Result<JpegFrame, CliError>> {
    (0..count)
        .map(|n| Ok(JpegFrame::new(vec![0xFF, 0xD8, n]).expect("valid jpeg header")))
        .collect()
}

fn options(url: String) -> SessionOptions {
    SessionOptions {
        url,
        cadence: Cadence::new(100, 1),
        policy: ReconnectPolicy { initial_delay_ms: 10, max_delay_ms: 20, max_attempts: 2 },
    }
}

/// Accept one client, send a keepalive ping, then echo every binary message.
async fn spawn_echo_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.expect("accept");
        let mut ws = accept_async(tcp).await.expect("handshake");
        ws.send(Message::Text(r#"{"type": "ping"}"#.into())).await.expect("send ping");
        while let Some(Ok(msg)) = ws.next().await {
            if let Message::Binary(bytes) = msg {
                ws.send(Message::Binary(bytes)).await.expect("echo");
            }
        }
    });
    format!("ws://{addr}/ws/video")
}

#[tokio::test]
async fn echoed_frames_reach_the_sink_in_order() {
    let url = spawn_echo_server().await;
    let mut sink = Collected::default();

    let summary = run(options(url), numbered_frames(3).into_iter(), &mut sink).await.expect("session");

    assert_eq!(summary.end, SessionEnd::Closed);
    assert_eq!(summary.stats.sent, 3);
    assert_eq!(sink.0, vec![vec![0xFF, 0xD8, 0], vec![0xFF, 0xD8, 1], vec![0xFF, 0xD8, 2]]);
}

#[tokio::test]
async fn frame_skip_thins_uploads() {
    let url = spawn_echo_server().await;
    let mut sink = Collected::default();
    let mut opts = options(url);
    opts.cadence = Cadence::new(100, 2);

    let summary = run(opts, numbered_frames(4).into_iter(), &mut sink).await.expect("session");

    assert_eq!(summary.stats.sent, 2);
    assert_eq!(summary.stats.skipped, 2);
    assert_eq!(sink.0, vec![vec![0xFF, 0xD8, 0], vec![0xFF, 0xD8, 2]]);
}

#[tokio::test]
async fn unreachable_server_gives_up_after_policy_budget() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);
    let mut sink = Collected::default();

    let summary = run(options(format!("ws://{addr}/ws/video")), numbered_frames(2).into_iter(), &mut sink)
        .await
        .expect("session");

    assert_eq!(summary.end, SessionEnd::GaveUp { attempts: 2 });
    assert_eq!(summary.stats, StreamStats::default());
    assert!(sink.0.is_empty());
}

#[tokio::test]
async fn server_normal_closure_does_not_reconnect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.expect("accept");
        let mut ws = accept_async(tcp).await.expect("handshake");
        let frame = CloseFrame { code: CloseCode::Normal, reason: "done".into() };
        ws.close(Some(frame)).await.expect("close");
        while ws.next().await.is_some() {}
    });
    let mut sink = Collected::default();
    let endless = std::iter::repeat_with(|| JpegFrame::new(vec![0xFF, 0xD8]).map_err(|source| {
        CliError::Frame { path: "endless".into(), source }
    }));

    let summary = tokio::time::timeout(
        Duration::from_secs(5),
        run(options(format!("ws://{addr}/ws/video")), endless, &mut sink),
    )
    .await
    .expect("session ended")
    .expect("session");

    assert_eq!(summary.end, SessionEnd::Closed);
}

#[tokio::test]
async fn reconnects_mid_stream_and_each_open_restores_the_budget() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        // Two connections die abruptly after one frame each, the third echoes.
        for _ in 0..2 {
            let (tcp, _) = listener.accept().await.expect("accept");
            let mut ws = accept_async(tcp).await.expect("handshake");
            ws.next().await.expect("one frame").expect("frame");
            drop(ws);
        }
        let (tcp, _) = listener.accept().await.expect("accept");
        let mut ws = accept_async(tcp).await.expect("handshake");
        while let Some(Ok(msg)) = ws.next().await {
            if let Message::Binary(bytes) = msg {
                ws.send(Message::Binary(bytes)).await.expect("echo");
            }
        }
    });
    let mut sink = Collected::default();
    // One attempt per outage: a second drop only recovers if the open reset it.
    let opts = SessionOptions {
        url: format!("ws://{addr}/ws/video"),
        cadence: Cadence::new(100, 1),
        policy: ReconnectPolicy { initial_delay_ms: 50, max_delay_ms: 50, max_attempts: 1 },
    };

    let summary = tokio::time::timeout(Duration::from_secs(10), run(opts, numbered_frames(60).into_iter(), &mut sink))
        .await
        .expect("session ended")
        .expect("session");

    assert_eq!(summary.end, SessionEnd::Closed);
    let stats = summary.stats;
    assert_eq!(stats.ticks, 60);
    assert_eq!(stats.sent + stats.dropped, stats.ticks);
    assert!(stats.dropped >= 1, "ticks during the outages are dropped: {stats:?}");

    assert!(!sink.0.is_empty());
    let echoed = u64::try_from(sink.0.len()).expect("count");
    assert!(echoed <= stats.sent - 2, "frames read by dropped connections never echo");
    let tails = sink.0.iter().map(|frame| frame[2]).collect::<Vec<_>>();
    assert!(tails.windows(2).all(|pair| pair[0] < pair[1]), "echoes arrive in order: {tails:?}");
}
