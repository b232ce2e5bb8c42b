//! # Commands
//!
//! Tick-indexed input buffers and their redundant transmission.
//!
//! ```text
//! client tick:   96  97  98  99  100
//! packet @100:          [98][99][100]     (redundancy W = 3)
//! packet @101:              [99][100][101]
//! ```
//!
//! A lost packet costs nothing as long as one of the next W arrives; the
//! receiving side keeps the first copy of each tick it sees.

mod buffer;
mod receiver;
mod sender;

pub use buffer::{CommandBuffer, CommandEntry};
pub use receiver::{decode_command_packet, CommandPacket, CommandReceiver};
pub use sender::{CommandSender, CommandTarget};

use bytemuck::Pod;

/// A per-tick input that can cross threads and the wire.
pub trait Command: Pod + Send + Sync {}

impl<T: Pod + Send + Sync> Command for T {}
