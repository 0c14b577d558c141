//! # netshare-hub
//!
//! Server side of netshare: runs a [`BroadcastHub`](netshare_core::BroadcastHub)
//! on the first free port of a range and feeds it frames.
//!
//! ## Producers
//!
//! - **Directory replay**: [`DirectorySource`](source::DirectorySource)
//!   streams image files from a directory at a fixed rate.
//! - **None**: without a source the hub only relays what peers upload
//!   (when relay is enabled) or idles.

pub mod config;
pub mod source;
