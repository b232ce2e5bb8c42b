//! # Protocol Module
//!
//! Wire format of the two packet kinds.
//!
//! ## Packet Layout
//!
//! ```text
//! Snapshot (server -> client):
//! ┌─────────────┬──────────────────┬──────────────────────────────┐
//! │ FrameHeader │ despawn notices  │ ghost records (group-atomic) │
//! │ (12 bytes)  │ (ref varints)    │ (record header + payload)    │
//! └─────────────┴──────────────────┴──────────────────────────────┘
//!
//! Commands (client -> server):
//! ┌───────────────┬───────────────────────────────────────────────┐
//! │ CommandHeader │ per target: ref, count, (tick, command) * n   │
//! │ (16 bytes)    │                                               │
//! └───────────────┴───────────────────────────────────────────────┘
//! ```

mod packets;
mod serialization;

pub use packets::{AckTracker, CommandHeader, FrameHeader, PacketKind};
pub use serialization::{
    packet_kind, read_ghost_ref, write_ghost_ref, FrameReader, RecordHeader,
};
