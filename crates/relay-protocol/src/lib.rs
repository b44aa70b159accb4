//! Wire protocol for the realtime gateway.
//!
//! One WebSocket connection per authenticated session, JSON frames, UTF-8.
//! Inbound frames are chat messages, receipt updates, and heartbeats;
//! outbound frames are full messages, acks, and errors.

pub mod frames;

pub use frames::{AckFrame, ChatFrame, ClientFrame, ErrorFrame, ReceiptFrame};
