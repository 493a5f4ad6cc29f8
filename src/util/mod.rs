//! Internal utilities.

mod arena;

pub use arena::ArenaIndex;
