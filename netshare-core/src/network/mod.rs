//! TCP plumbing: endpoints, per-socket peer connections and the registry
//! of live peers owned by a hub session.

pub mod endpoint;
pub mod peer;
pub mod registry;

pub use endpoint::Endpoint;
pub use peer::PeerConnection;
pub use registry::PeerRegistry;
