//! Core types.

mod id;

pub use id::TaskId;
