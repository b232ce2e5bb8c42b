//! # Memory Management
//!
//! Client-local entity ids and the shared arena that holds ghost groups.
//!
//! ## Design Philosophy
//!
//! - Entity ids are generational, so a stale id never aliases a new entity
//! - Group children live in one contiguous span of an arena, addressed by
//!   index, never by pointer

mod arena;
mod entity;

pub use arena::{GroupArena, GroupSpan};
pub use entity::{EntityAllocator, LocalEntity};
