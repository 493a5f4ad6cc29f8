//! Task context and cancellation.

#[allow(clippy::module_inception)]
mod cx;

pub use cx::{Cancelled, Cx};
