//! One live TCP connection speaking the frame protocol.
//!
//! The socket is split into owned halves so a read loop and a writer can
//! make progress independently. Each half sits behind its own async mutex:
//! at most one writer and one reader at a time.
//!
//! [`close`](PeerConnection::close) cancels the connection's token. Any
//! read or write in flight returns [`NetshareError::Cancelled`] right away
//! and drops its socket half, so nothing stays parked on a dead socket
//! waiting for the next frame.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::codec::FrameCodec;
use crate::error::{NetshareError, Result};
use crate::frame::{Frame, PeerId};
use crate::network::endpoint::Endpoint;

type Reader = FramedRead<OwnedReadHalf, FrameCodec>;
type Writer = FramedWrite<OwnedWriteHalf, FrameCodec>;

/// A framed, cancellable TCP connection to one peer.
#[derive(Debug)]
pub struct PeerConnection {
    id: PeerId,
    remote_addr: SocketAddr,
    reader: Mutex<Option<Reader>>,
    writer: Mutex<Option<Writer>>,
    cancel: CancellationToken,
    alive: AtomicBool,
    last_error: parking_lot::Mutex<Option<String>>,
}

impl PeerConnection {
    /// Wrap an accepted or connected stream.
    pub fn new(id: PeerId, stream: TcpStream, remote_addr: SocketAddr, codec: FrameCodec) -> Self {
        let (read_half, write_half) = stream.into_split();
        Self {
            id,
            remote_addr,
            reader: Mutex::new(Some(FramedRead::new(read_half, codec))),
            writer: Mutex::new(Some(FramedWrite::new(write_half, codec))),
            cancel: CancellationToken::new(),
            alive: AtomicBool::new(true),
            last_error: parking_lot::Mutex::new(None),
        }
    }

    /// Open a client connection to `endpoint`.
    pub async fn connect(
        endpoint: &Endpoint,
        timeout: Duration,
        codec: FrameCodec,
        nodelay: bool,
    ) -> Result<Self> {
        let connect = TcpStream::connect((endpoint.host(), endpoint.port()));
        let stream = tokio::time::timeout(timeout, connect)
            .await
            .map_err(|_| NetshareError::ConnectTimeout {
                endpoint: endpoint.to_string(),
                timeout,
            })?
            .map_err(|source| NetshareError::Connect {
                endpoint: endpoint.to_string(),
                source,
            })?;

        if nodelay {
            stream.set_nodelay(true)?;
        }
        let remote_addr = stream.peer_addr()?;
        Ok(Self::new(PeerId(0), stream, remote_addr, codec))
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// `false` once the connection failed or was closed.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst) && !self.cancel.is_cancelled()
    }

    /// Text of the failure that tore this connection down, if any.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    /// Write one length-prefixed frame and flush.
    ///
    /// Any failure is final: the connection is closed and every later
    /// call fails.
    pub async fn write_frame(&self, frame: &Frame) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(NetshareError::Cancelled);
        }

        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(NetshareError::Cancelled),
            r = self.write_locked(frame.clone()) => r,
        };

        if let Err(e) = &result {
            if e.is_cancelled() {
                // A write interrupted mid-frame leaves the stream unusable.
                if let Ok(mut writer) = self.writer.try_lock() {
                    writer.take();
                }
            } else {
                self.fail(e);
            }
        }
        result
    }

    /// [`write_frame`](Self::write_frame) bounded by `timeout`. A peer
    /// that cannot absorb a frame in time is treated as failed.
    pub async fn write_frame_timeout(&self, frame: &Frame, timeout: Duration) -> Result<()> {
        match tokio::time::timeout(timeout, self.write_frame(frame)).await {
            Ok(result) => result,
            Err(_) => {
                let err = NetshareError::Timeout(timeout);
                self.fail(&err);
                Err(err)
            }
        }
    }

    /// Block until a complete frame arrives.
    ///
    /// Zero-length keepalives are returned as empty frames; callers
    /// decide whether to skip them.
    pub async fn read_frame(&self) -> Result<Frame> {
        let mut guard = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(NetshareError::Cancelled),
            g = self.reader.lock() => g,
        };
        let Some(reader) = guard.as_mut() else {
            return Err(NetshareError::Cancelled);
        };

        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(NetshareError::Cancelled),
            next = reader.next() => match next {
                Some(Ok(frame)) => Ok(frame),
                Some(Err(NetshareError::Io(source))) => Err(NetshareError::PeerRead {
                    peer: self.id,
                    source,
                }),
                Some(Err(e)) => Err(e),
                None => Err(NetshareError::EndOfStream),
            },
        };

        match result {
            Ok(frame) => {
                trace!(peer = %self.id, len = frame.len(), "frame read");
                Ok(frame)
            }
            Err(e) => {
                guard.take();
                drop(guard);
                if !e.is_cancelled() {
                    self.fail(&e);
                }
                Err(e)
            }
        }
    }

    /// Release the socket. Safe to call any number of times.
    pub fn close(&self) {
        let first = self.alive.swap(false, Ordering::SeqCst);
        self.cancel.cancel();

        // Halves currently held by an in-flight call are dropped by that
        // call once it observes the cancellation.
        if let Ok(mut reader) = self.reader.try_lock() {
            reader.take();
        }
        if let Ok(mut writer) = self.writer.try_lock() {
            writer.take();
        }

        if first {
            debug!(peer = %self.id, addr = %self.remote_addr, "connection closed");
        }
    }

    // ── Internal ─────────────────────────────────────────────────

    async fn write_locked(&self, frame: Frame) -> Result<()> {
        let mut guard = self.writer.lock().await;
        let Some(writer) = guard.as_mut() else {
            return Err(NetshareError::Cancelled);
        };

        let len = frame.len();
        match writer.send(frame).await {
            Ok(()) => {
                trace!(peer = %self.id, len, "frame written");
                Ok(())
            }
            Err(e) => {
                guard.take();
                Err(match e {
                    NetshareError::Io(source) => NetshareError::PeerWrite {
                        peer: self.id,
                        source,
                    },
                    other => other,
                })
            }
        }
    }

    fn fail(&self, err: &NetshareError) {
        *self.last_error.lock() = Some(err.to_string());
        self.close();
    }
}

impl Drop for PeerConnection {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn pair() -> (PeerConnection, PeerConnection) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = tokio::spawn(async move {
            PeerConnection::connect(
                &Endpoint::from(addr),
                Duration::from_secs(5),
                FrameCodec::new(),
                true,
            )
            .await
            .unwrap()
        });
        let (stream, peer_addr) = listener.accept().await.unwrap();
        let server = PeerConnection::new(PeerId(1), stream, peer_addr, FrameCodec::new());
        (server, client.await.unwrap())
    }

    #[tokio::test]
    async fn round_trip_empty_small_and_large() {
        let (server, client) = pair().await;
        let large: Vec<u8> = (0..(3 * 1024 * 1024 + 17)).map(|i| (i % 251) as u8).collect();
        let payloads = vec![Vec::new(), b"hello".to_vec(), large];

        let expected = payloads.clone();
        let writer = tokio::spawn(async move {
            for p in payloads {
                server.write_frame(&Frame::from(p)).await.unwrap();
            }
            server
        });

        for want in expected {
            let got = client.read_frame().await.unwrap();
            assert_eq!(got.len(), want.len());
            assert_eq!(got.payload().as_ref(), want.as_slice());
        }
        drop(writer.await.unwrap());
    }

    #[tokio::test]
    async fn read_reports_end_of_stream() {
        let (server, client) = pair().await;
        server.close();
        let err = client.read_frame().await.unwrap_err();
        assert!(matches!(err, NetshareError::EndOfStream));
        assert!(!client.is_alive());
        assert!(client.last_error().is_some());
    }

    #[tokio::test]
    async fn close_unblocks_pending_read() {
        let (_server, client) = pair().await;
        let client = Arc::new(client);

        let reader = Arc::clone(&client);
        let pending = tokio::spawn(async move { reader.read_frame().await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        client.close();

        let result = tokio::time::timeout(Duration::from_secs(2), pending)
            .await
            .expect("read stayed blocked after close")
            .unwrap();
        assert!(matches!(result, Err(NetshareError::Cancelled)));
    }

    #[tokio::test]
    async fn close_is_idempotent_and_blocks_writes() {
        let (server, _client) = pair().await;
        server.close();
        server.close();
        assert!(!server.is_alive());
        let err = server.write_frame(&Frame::from(vec![1u8])).await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn write_to_vanished_peer_fails_and_closes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let raw = tokio::spawn(async move { TcpStream::connect(addr).await.unwrap() });
        let (stream, peer_addr) = listener.accept().await.unwrap();
        let server = PeerConnection::new(PeerId(5), stream, peer_addr, FrameCodec::new());
        drop(raw.await.unwrap());

        // The first writes may land in the kernel buffer before the RST
        // comes back; keep writing until the failure surfaces.
        let frame = Frame::from(vec![0u8; 64 * 1024]);
        let mut failed = false;
        for _ in 0..200 {
            if server.write_frame(&frame).await.is_err() {
                failed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(failed);
        assert!(!server.is_alive());
    }

    #[tokio::test]
    async fn wire_bytes_match_protocol() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let raw = tokio::spawn(async move { TcpStream::connect(addr).await.unwrap() });
        let (stream, peer_addr) = listener.accept().await.unwrap();
        let server = PeerConnection::new(PeerId(2), stream, peer_addr, FrameCodec::new());
        let mut raw = raw.await.unwrap();

        server.write_frame(&Frame::from(&b"ab"[..])).await.unwrap();
        let mut buf = [0u8; 6];
        raw.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, [0, 0, 0, 2, b'a', b'b']);

        raw.write_all(&[0, 0, 0, 0, 0, 0, 0, 1, b'z']).await.unwrap();
        assert!(server.read_frame().await.unwrap().is_empty());
        assert_eq!(server.read_frame().await.unwrap().payload().as_ref(), b"z");
    }
}
