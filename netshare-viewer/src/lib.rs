//! # netshare-viewer
//!
//! Client side of netshare: connects a
//! [`FrameReceiver`](netshare_core::FrameReceiver) to a hub and stores
//! each received frame as a file, either overwriting a single
//! `latest.<ext>` or keeping a numbered sequence.

pub mod config;
pub mod output;
