//! Cooperative synchronization primitives.
//!
//! - [`RwLock`]: cancel-aware read-write lock with writer self-upgrade

mod rwlock;

pub use rwlock::{
    AcquireError, AcquireReadFuture, AcquireWriteFuture, ReadGuard, ReadGuardFuture, ReaderLock,
    ReleaseError, RwLock, WriteGuard, WriteGuardFuture, WriterLock,
};
