//! Frame and peer identity types.
//!
//! A [`Frame`] is one opaque encoded image. The hub never looks inside the
//! payload; it only moves it around. Cloning is cheap because the payload
//! is a reference-counted [`Bytes`].

use bytes::Bytes;

// ── PeerId ───────────────────────────────────────────────────────

/// Identifier of one connected peer within a hub session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub u64);

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "peer#{}", self.0)
    }
}

// ── Frame ────────────────────────────────────────────────────────

/// One encoded image payload.
///
/// `origin` is local bookkeeping and is never written to the wire: when a
/// frame was uploaded by a peer in relay mode it names that peer, so the
/// broadcaster can skip echoing it back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    payload: Bytes,
    origin: Option<PeerId>,
}

impl Frame {
    /// A frame produced locally (capture pipeline, file replay, ...).
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            origin: None,
        }
    }

    /// A frame uploaded by `peer`.
    pub fn from_peer(peer: PeerId, payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            origin: Some(peer),
        }
    }

    /// Zero-length frame, used as a keepalive on the wire.
    pub fn keepalive() -> Self {
        Self::new(Bytes::new())
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// `true` for keepalive frames.
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// The peer this frame was relayed from, if any.
    pub fn origin(&self) -> Option<PeerId> {
        self.origin
    }
}

impl From<Vec<u8>> for Frame {
    fn from(v: Vec<u8>) -> Self {
        Self::new(v)
    }
}

impl From<Bytes> for Frame {
    fn from(b: Bytes) -> Self {
        Self::new(b)
    }
}

impl From<&'static [u8]> for Frame {
    fn from(s: &'static [u8]) -> Self {
        Self::new(Bytes::from_static(s))
    }
}
