//! Integration tests: hub and receiver lifecycles over real TCP on
//! localhost, including peer failure, relay modes and the port scan.

use std::net::TcpListener as StdListener;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use netshare_core::{
    BroadcastHub, Endpoint, Frame, FrameCodec, FrameReceiver, HubConfig, HubStatus,
    NetshareError, PeerConnection, ReceiverConfig, RelayMode, StopReason,
};

const WAIT: Duration = Duration::from_secs(5);

// ── Helpers ──────────────────────────────────────────────────────

/// Hub on 127.0.0.1 with an OS-assigned port.
fn local_hub(config: HubConfig) -> BroadcastHub {
    BroadcastHub::new(config.bind_host("127.0.0.1").port_range(0, 0))
}

async fn client(port: u16) -> PeerConnection {
    PeerConnection::connect(
        &Endpoint::new("127.0.0.1", port),
        WAIT,
        FrameCodec::new(),
        true,
    )
    .await
    .unwrap()
}

/// Poll `cond` until it holds, panicking after [`WAIT`].
async fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
}

async fn read_payload(conn: &PeerConnection) -> Vec<u8> {
    tokio::time::timeout(WAIT, conn.read_frame())
        .await
        .expect("timeout")
        .unwrap()
        .payload()
        .to_vec()
}

/// Assert nothing arrives on `conn` for a short while.
async fn assert_silent(conn: &PeerConnection) {
    let r = tokio::time::timeout(Duration::from_millis(200), conn.read_frame()).await;
    assert!(r.is_err(), "unexpected frame: {:?}", r);
}

/// Find a base port with `base..=base+3` free and hold the first three.
fn hold_three_consecutive() -> (u16, Vec<StdListener>) {
    for _ in 0..100 {
        let first = StdListener::bind("127.0.0.1:0").unwrap();
        let base = first.local_addr().unwrap().port();
        if base > u16::MAX - 4 {
            continue;
        }
        let rest: Vec<StdListener> = (1..=2)
            .filter_map(|i| StdListener::bind(("127.0.0.1", base + i)).ok())
            .collect();
        let fourth_free = StdListener::bind(("127.0.0.1", base + 3)).is_ok();
        if rest.len() == 2 && fourth_free {
            let mut held = vec![first];
            held.extend(rest);
            return (base, held);
        }
    }
    panic!("no run of four free ports found");
}

// ── Port scan and lifecycle ──────────────────────────────────────

#[tokio::test]
async fn port_scan_skips_taken_ports() {
    let (base, _held) = hold_three_consecutive();
    let hub = BroadcastHub::new(
        HubConfig::default()
            .bind_host("127.0.0.1")
            .port_range(base, base + 10),
    );

    let port = hub.start().await.unwrap();
    assert_eq!(port, base + 3);
    assert_eq!(hub.port(), Some(base + 3));
    assert_eq!(
        *hub.status().borrow(),
        HubStatus::Listening {
            port: base + 3,
            peers: 0
        }
    );
    hub.stop().await;
}

#[tokio::test]
async fn stop_unblocks_accept_and_restart_scans_again() {
    let hub = local_hub(HubConfig::default());
    let first = hub.start().await.unwrap();

    tokio::time::timeout(WAIT, hub.stop())
        .await
        .expect("stop hung with accept pending");
    assert!(!hub.is_running());
    assert_eq!(*hub.status().borrow(), HubStatus::Stopped);

    // The old listener is gone.
    let refused = tokio::net::TcpStream::connect(("127.0.0.1", first)).await;
    assert!(refused.is_err());

    let second = hub.start().await.unwrap();
    assert!(hub.is_running());
    assert_ne!(second, 0);
    hub.stop().await;
}

#[tokio::test]
async fn stop_closes_connected_peers() {
    let hub = local_hub(HubConfig::default());
    let port = hub.start().await.unwrap();
    let conn = client(port).await;
    wait_until("peer registration", || hub.peer_count() == 1).await;

    tokio::time::timeout(WAIT, hub.stop()).await.unwrap();
    let err = tokio::time::timeout(WAIT, conn.read_frame())
        .await
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, NetshareError::EndOfStream) || err.is_disconnect());
    assert_eq!(hub.peer_count(), 0);
}

// ── Broadcast ────────────────────────────────────────────────────

#[tokio::test]
async fn receiver_sees_frames_in_submission_order() {
    let hub = local_hub(HubConfig::default());
    let port = hub.start().await.unwrap();

    let seen = Arc::new(parking_lot::Mutex::new(Vec::<Vec<u8>>::new()));
    let sink_seen = Arc::clone(&seen);
    let receiver = FrameReceiver::new(ReceiverConfig::default(), move |frame: Frame| {
        sink_seen.lock().push(frame.payload().to_vec())
    });
    receiver
        .start(&Endpoint::new("127.0.0.1", port))
        .await
        .unwrap();
    wait_until("peer registration", || hub.peer_count() == 1).await;

    let a: Vec<u8> = (0..200_000u32).map(|i| (i % 253) as u8).collect();
    let b = b"second frame".to_vec();
    hub.submit_frame(a.clone());
    hub.submit_frame(b.clone());

    wait_until("two frames", || seen.lock().len() == 2).await;
    assert_eq!(*seen.lock(), vec![a, b]);

    hub.stop().await;
    let reason = tokio::time::timeout(WAIT, receiver.wait_stopped())
        .await
        .unwrap();
    assert_eq!(reason, StopReason::EndOfStream);
}

/// A connected socket that never reads, so hub writes to it stall once
/// the kernel buffers fill.
async fn stalled_peer(port: u16) -> tokio::net::TcpStream {
    tokio::net::TcpStream::connect(("127.0.0.1", port))
        .await
        .unwrap()
}

const LARGE_FRAME: usize = 4 * 1024 * 1024;

#[tokio::test]
async fn stalled_peer_is_dropped_while_others_get_every_frame() {
    let hub = local_hub(HubConfig::default().write_timeout(Duration::from_millis(500)));
    let port = hub.start().await.unwrap();

    let healthy_a = Arc::new(client(port).await);
    let _stalled = stalled_peer(port).await;
    let healthy_b = Arc::new(client(port).await);
    wait_until("three peers", || hub.peer_count() == 3).await;

    let readers: Vec<_> = [&healthy_a, &healthy_b]
        .into_iter()
        .map(|conn| {
            let conn = Arc::clone(conn);
            tokio::spawn(async move {
                let mut seen = Vec::new();
                for _ in 0..8 {
                    let frame = tokio::time::timeout(Duration::from_secs(20), conn.read_frame())
                        .await
                        .expect("timeout")
                        .unwrap();
                    let payload = frame.payload();
                    assert_eq!(payload.len(), LARGE_FRAME);
                    let marker = payload[0];
                    assert!(payload.iter().all(|b| *b == marker));
                    seen.push(marker);
                }
                seen
            })
        })
        .collect();

    for n in 0..8u8 {
        hub.submit_frame(vec![n; LARGE_FRAME]);
    }

    for reader in readers {
        assert_eq!(reader.await.unwrap(), (0..8u8).collect::<Vec<_>>());
    }
    wait_until("stalled peer removal", || hub.peer_count() == 2).await;
    assert_eq!(hub.stats().peers_dropped, 1);
    assert!(hub.is_running());
    hub.stop().await;
}

#[tokio::test]
async fn stop_does_not_wait_for_a_stalled_write() {
    let write_timeout = Duration::from_secs(10);
    let hub = local_hub(HubConfig::default().write_timeout(write_timeout));
    let port = hub.start().await.unwrap();

    let _stalled = stalled_peer(port).await;
    wait_until("peer registration", || hub.peer_count() == 1).await;

    let large = Bytes::from(vec![0xAB; LARGE_FRAME]);
    for _ in 0..10 {
        hub.submit_frame(large.clone());
    }
    wait_until("broadcast started", || hub.stats().frames_broadcast >= 1).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = std::time::Instant::now();
    tokio::time::timeout(WAIT, hub.stop())
        .await
        .expect("stop waited on the stalled write");
    let elapsed = started.elapsed();
    assert!(elapsed < Duration::from_secs(2), "stop took {elapsed:?}");

    // Closed by the shutdown, not dropped as a failed peer.
    assert_eq!(hub.stats().peers_dropped, 0);
    assert!(!hub.is_running());
}

#[tokio::test]
async fn disconnected_peer_does_not_affect_others() {
    let hub = local_hub(HubConfig::default().write_timeout(Duration::from_millis(500)));
    let port = hub.start().await.unwrap();

    let survivor_a = client(port).await;
    let doomed = client(port).await;
    let survivor_b = client(port).await;
    wait_until("three peers", || hub.peer_count() == 3).await;

    drop(doomed);
    for n in 0..20u8 {
        hub.submit_frame(vec![n; 1024]);
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    wait_until("failed peer removal", || hub.peer_count() == 2).await;

    for conn in [&survivor_a, &survivor_b] {
        for n in 0..20u8 {
            assert_eq!(read_payload(conn).await, vec![n; 1024]);
        }
    }

    hub.submit_frame(&b"after"[..]);
    assert_eq!(read_payload(&survivor_a).await, b"after");
    assert_eq!(read_payload(&survivor_b).await, b"after");
    assert_eq!(hub.stats().peers_dropped, 1);
    hub.stop().await;
}

#[tokio::test]
async fn status_tracks_peer_count() {
    let hub = local_hub(HubConfig::default());
    let port = hub.start().await.unwrap();
    let mut status = hub.status();

    let conn = client(port).await;
    let ready = tokio::time::timeout(
        WAIT,
        status.wait_for(|s| matches!(s, HubStatus::Listening { peers: 1, .. })),
    )
    .await
    .expect("status never reported the peer");
    assert!(ready.is_ok());
    drop(ready);

    conn.close();
    drop(conn);
    tokio::time::timeout(
        WAIT,
        status.wait_for(|s| matches!(s, HubStatus::Listening { peers: 0, .. })),
    )
    .await
    .expect("status never reported the disconnect")
    .unwrap();
    hub.stop().await;
}

// ── Admission ────────────────────────────────────────────────────

#[tokio::test]
async fn max_peers_rejects_extra_connections() {
    let hub = local_hub(HubConfig::default().max_peers(1));
    let port = hub.start().await.unwrap();

    let _first = client(port).await;
    wait_until("first peer", || hub.peer_count() == 1).await;

    let second = client(port).await;
    let err = tokio::time::timeout(WAIT, second.read_frame())
        .await
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, NetshareError::EndOfStream) || err.is_disconnect());
    assert_eq!(hub.peer_count(), 1);
    assert_eq!(hub.stats().peers_rejected, 1);
    hub.stop().await;
}

#[tokio::test]
async fn keepalives_from_peers_are_counted() {
    let hub = local_hub(HubConfig::default().relay(RelayMode::Buffered));
    let port = hub.start().await.unwrap();
    let uploader = client(port).await;
    let watcher = client(port).await;
    wait_until("two peers", || hub.peer_count() == 2).await;

    uploader.write_frame(&Frame::keepalive()).await.unwrap();
    wait_until("keepalive", || hub.stats().keepalives == 1).await;
    assert_silent(&watcher).await;
    hub.stop().await;
}

// ── Relay ────────────────────────────────────────────────────────

#[tokio::test]
async fn relay_disabled_discards_uploads() {
    let hub = local_hub(HubConfig::default());
    let port = hub.start().await.unwrap();
    let uploader = client(port).await;
    let watcher = client(port).await;
    wait_until("two peers", || hub.peer_count() == 2).await;

    uploader.write_frame(&Frame::from(&b"up"[..])).await.unwrap();
    assert_silent(&watcher).await;

    hub.submit_frame(&b"down"[..]);
    assert_eq!(read_payload(&watcher).await, b"down");
    assert_eq!(read_payload(&uploader).await, b"down");
    assert_eq!(hub.stats().frames_relayed, 0);
    hub.stop().await;
}

#[tokio::test]
async fn buffered_relay_skips_origin() {
    let hub = local_hub(HubConfig::default().relay(RelayMode::Buffered));
    let port = hub.start().await.unwrap();
    let uploader = client(port).await;
    let watcher = client(port).await;
    wait_until("two peers", || hub.peer_count() == 2).await;

    uploader.write_frame(&Frame::from(&b"up"[..])).await.unwrap();
    assert_eq!(read_payload(&watcher).await, b"up");
    assert_silent(&uploader).await;
    assert_eq!(hub.stats().frames_relayed, 1);
    hub.stop().await;
}

#[tokio::test]
async fn direct_relay_skips_origin() {
    let hub = local_hub(HubConfig::default().relay(RelayMode::Direct));
    let port = hub.start().await.unwrap();
    let uploader = client(port).await;
    let watcher_a = client(port).await;
    let watcher_b = client(port).await;
    wait_until("three peers", || hub.peer_count() == 3).await;

    uploader.write_frame(&Frame::from(&b"direct"[..])).await.unwrap();
    assert_eq!(read_payload(&watcher_a).await, b"direct");
    assert_eq!(read_payload(&watcher_b).await, b"direct");
    assert_silent(&uploader).await;

    // Nothing went through the buffer.
    assert_eq!(hub.stats().frames_broadcast, 0);
    hub.stop().await;
}

// ── Receiver ─────────────────────────────────────────────────────

#[tokio::test]
async fn receiver_stop_while_hub_idle() {
    let hub = local_hub(HubConfig::default());
    let port = hub.start().await.unwrap();
    let receiver = FrameReceiver::new(ReceiverConfig::default(), |_f: Frame| {});
    receiver
        .start(&Endpoint::new("127.0.0.1", port))
        .await
        .unwrap();

    tokio::time::timeout(WAIT, receiver.stop())
        .await
        .expect("receiver stop hung");
    assert_eq!(receiver.wait_stopped().await, StopReason::Requested);
    wait_until("hub notices disconnect", || hub.peer_count() == 0).await;
    hub.stop().await;
}
