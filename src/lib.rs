//! Coop-rwlock: a cancel-aware cooperative read-write lock with writer
//! self-upgrade.
//!
//! # Overview
//!
//! [`RwLock`] grants shared access to many readers or exclusive access to
//! one writer. The writer may additionally take nested read grants on
//! itself (self-upgrade) without suspending; nested grants must be
//! released before the write grant. Read-to-write upgrade is rejected.
//!
//! Grants are permissions tracked per task identity, not values: every
//! operation takes the acquiring task's [`Cx`], so the lock works under
//! any cooperative scheduler that hands each task its own context.
//!
//! # Core Guarantees
//!
//! - **Mutual exclusion**: an active writer excludes all other tasks
//! - **Fairness yield**: by default every successful acquire performs one
//!   forced cooperative yield before resolving; [`RwLock::fast`] skips it
//! - **Cancel-correctness**: cancellation while waiting leaves the lock
//!   state exactly as if the attempt was never made
//! - **Release discipline**: releasing an un-acquired grant, or a write
//!   grant with nested reads outstanding, is an error that leaves the
//!   state unchanged
//!
//! # Module Structure
//!
//! - [`types`]: Core types (task identifiers)
//! - [`cx`]: Task context and cancellation
//! - [`sync`]: The lock itself (handles, futures, guards)
//! - [`util`]: Internal utilities (arena indices)
//!
//! # Example
//!
//! ```
//! use coop_rwlock::{Cx, RwLock, TaskId};
//! use std::future::Future;
//! use std::pin::pin;
//! use std::task::{Context, Poll, Waker};
//!
//! fn block_on<T>(future: impl Future<Output = T>) -> T {
//!     let waker = Waker::noop();
//!     let mut cx = Context::from_waker(waker);
//!     let mut future = pin!(future);
//!     loop {
//!         if let Poll::Ready(v) = future.as_mut().poll(&mut cx) {
//!             return v;
//!         }
//!     }
//! }
//!
//! let lock = RwLock::new();
//! let cx = Cx::new(TaskId::new_ephemeral());
//!
//! let guard = block_on(lock.writer().lock(&cx)).unwrap();
//! // The writer can still read on itself:
//! let nested = block_on(lock.reader().lock(&cx)).unwrap();
//! drop(nested); // nested read grants go first
//! drop(guard);  // then the write grant
//! assert!(!lock.writer().locked());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::module_inception)]
#![allow(clippy::doc_markdown)]

pub mod cx;
pub mod sync;
pub mod test_utils;
pub mod types;
pub mod util;

// Re-exports for convenient access to core types
pub use cx::{Cancelled, Cx};
pub use sync::{
    AcquireError, AcquireReadFuture, AcquireWriteFuture, ReadGuard, ReadGuardFuture, ReaderLock,
    ReleaseError, RwLock, WriteGuard, WriteGuardFuture, WriterLock,
};
pub use types::TaskId;
