//! Cancel-aware cooperative read-write lock with writer self-upgrade.
//!
//! This lock allows multiple readers or a single writer. The writer may
//! additionally take nested read grants on itself (**self-upgrade**)
//! without suspending; all nested grants must be released before the
//! write grant itself can be released.
//!
//! Acquisition is cancel-safe:
//! - Cancellation while waiting resolves to an error without acquiring,
//!   and leaves the lock state exactly as if the attempt was never made.
//! - Cancellation between the grant and the fairness yield releases the
//!   grant before the error is reported.
//! - Once a scoped guard is held, it always releases on drop.
//!
//! # Fairness
//!
//! By default every successful acquire is followed by one forced
//! cooperative yield before the future resolves, so other runnable tasks
//! get a scheduling opportunity even when the holder's critical section
//! never suspends. [`RwLock::fast`] skips that yield, trading the
//! fairness guarantee for lower acquire latency; fast-path callers are
//! responsible for yielding inside long critical sections themselves.
//!
//! Releases wake *every* eligible waiter; woken acquires re-check the
//! state and re-park if they lost the race. No FIFO order is promised,
//! but a queued writer blocks new readers (only the writer's own
//! self-upgrade bypasses this), so overlapping read traffic cannot
//! starve a waiting writer.
//!
//! # Example
//!
//! ```ignore
//! use coop_rwlock::{Cx, RwLock, TaskId};
//!
//! let lock = RwLock::new();
//! let cx = Cx::new(TaskId::new_ephemeral());
//!
//! let guard = lock.writer().lock(&cx).await?;
//! // the writer may still read on itself:
//! let nested = lock.reader().lock(&cx).await?;
//! drop(nested);   // nested read grants go first
//! drop(guard);    // then the write grant
//! ```

use parking_lot::Mutex as ParkingMutex;
use smallvec::SmallVec;
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use crate::cx::Cx;
use crate::types::TaskId;

/// Error returned when acquiring a read or write grant fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireError {
    /// Cancelled while waiting (or during the fairness yield).
    Cancelled,
    /// The task already holds this grant; grants are not reentrant.
    AlreadyHeld,
    /// The task holds a read grant and attempted to acquire write.
    /// Read-to-write upgrade is not supported.
    InvalidUpgrade,
}

impl fmt::Display for AcquireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled => write!(f, "rwlock acquisition cancelled"),
            Self::AlreadyHeld => write!(f, "rwlock grant already held by this task"),
            Self::InvalidUpgrade => {
                write!(f, "cannot upgrade rwlock from read to write")
            }
        }
    }
}

impl std::error::Error for AcquireError {}

/// Error returned when releasing a grant fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseError {
    /// The calling task does not hold the grant it tried to release.
    NotHeld,
    /// The writer still holds nested read grants; those must be released
    /// before the write grant. The lock state is unchanged.
    UpgradeHeld,
}

impl fmt::Display for ReleaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotHeld => write!(f, "cannot release an un-acquired rwlock"),
            Self::UpgradeHeld => {
                write!(f, "write grant released before its nested read grants")
            }
        }
    }
}

impl std::error::Error for ReleaseError {}

#[derive(Debug, Clone)]
struct Waiter {
    waker: Waker,
    id: u64,
}

/// Shared lock state. Mutated only under the state mutex; a release
/// collects wakers here and fires them after the mutex is dropped.
#[derive(Debug, Default)]
struct LockState {
    /// One entry per held read grant, including the writer's nested
    /// grants. Grant holders are few, so a linear scan is fine.
    reader_owners: SmallVec<[TaskId; 4]>,
    writer_active: bool,
    writer_owner: Option<TaskId>,
    /// Nested read grants the current writer holds on itself.
    /// Zero whenever `writer_active` is false.
    upgrade_depth: usize,
    reader_waiters: VecDeque<Waiter>,
    writer_waiters: VecDeque<Waiter>,
    next_waiter_id: u64,
}

impl LockState {
    fn register_waiter(queue_front: bool, queue: &mut VecDeque<Waiter>, id: u64, waker: Waker) {
        let waiter = Waiter { waker, id };
        if queue_front {
            queue.push_front(waiter);
        } else {
            queue.push_back(waiter);
        }
    }

    #[cfg(debug_assertions)]
    fn assert_invariants(&self) {
        debug_assert!(self.reader_owners.len() >= self.upgrade_depth);
        debug_assert!(self.writer_active || self.upgrade_depth == 0);
        debug_assert_eq!(self.writer_active, self.writer_owner.is_some());
        if let Some(owner) = self.writer_owner {
            debug_assert!(self.reader_owners.iter().all(|t| *t == owner));
        }
    }

    #[cfg(not(debug_assertions))]
    fn assert_invariants(&self) {}
}

#[derive(Debug)]
struct RwLockCore {
    state: ParkingMutex<LockState>,
    fast: bool,
}

type WakerBatch = SmallVec<[Waker; 4]>;

impl RwLockCore {
    // Wakes leave the queue entries in place; each entry is removed only
    // by its owning future (grant, usage error, cancellation, or drop).
    // Queue emptiness is therefore an accurate "no writer waiting"
    // predicate for read admission.
    fn collect_writer_wakers(state: &LockState) -> WakerBatch {
        state.writer_waiters.iter().map(|w| w.waker.clone()).collect()
    }

    fn collect_reader_wakers(state: &LockState) -> WakerBatch {
        state.reader_waiters.iter().map(|w| w.waker.clone()).collect()
    }

    fn remove_reader_waiter(&self, id: u64) {
        let mut state = self.state.lock();
        state.reader_waiters.retain(|w| w.id != id);
    }

    fn remove_writer_waiter(&self, id: u64) {
        let wakers = {
            let mut state = self.state.lock();
            state.writer_waiters.retain(|w| w.id != id);
            // New readers are refused while a writer is queued; the last
            // queued writer leaving without activating must let them in.
            if state.writer_waiters.is_empty() && !state.writer_active {
                Self::collect_reader_wakers(&state)
            } else {
                WakerBatch::new()
            }
        };
        for waker in wakers {
            waker.wake();
        }
    }

    fn read_locked(&self) -> bool {
        !self.state.lock().reader_owners.is_empty()
    }

    fn write_locked(&self) -> bool {
        self.state.lock().writer_active
    }

    /// Releases one read grant held by `task`.
    fn release_read(&self, task: TaskId) -> Result<(), ReleaseError> {
        let wakers = {
            let mut state = self.state.lock();
            let Some(pos) = state.reader_owners.iter().position(|t| *t == task) else {
                return Err(ReleaseError::NotHeld);
            };
            state.reader_owners.remove(pos);
            if state.writer_owner == Some(task) && state.upgrade_depth > 0 {
                state.upgrade_depth -= 1;
                tracing::trace!(
                    task = %task,
                    depth = state.upgrade_depth,
                    "nested read grant released"
                );
            }
            state.assert_invariants();
            // Writers wait for the reader count to reach zero. While the
            // writer itself is still active (upgrade release) nothing can
            // proceed, so there is no one worth waking.
            if state.reader_owners.is_empty() && !state.writer_active {
                Self::collect_writer_wakers(&state)
            } else {
                WakerBatch::new()
            }
        };
        for waker in wakers {
            waker.wake();
        }
        Ok(())
    }

    /// Releases the write grant held by `task`.
    fn release_write(&self, task: TaskId) -> Result<(), ReleaseError> {
        let wakers = {
            let mut state = self.state.lock();
            if !state.writer_active || state.writer_owner != Some(task) {
                return Err(ReleaseError::NotHeld);
            }
            if state.upgrade_depth > 0 {
                // Release order for an upgraded writer is strict: nested
                // read grants first, the write grant last.
                return Err(ReleaseError::UpgradeHeld);
            }
            state.writer_active = false;
            state.writer_owner = None;
            state.assert_invariants();
            tracing::trace!(task = %task, "write grant released");
            // Wake both classes: waking only one would starve the other
            // or needlessly serialize independent readers. Queued writers
            // still win the race, since readers re-park while the writer
            // queue is non-empty.
            let mut wakers = Self::collect_writer_wakers(&state);
            wakers.extend(Self::collect_reader_wakers(&state));
            wakers
        };
        for waker in wakers {
            waker.wake();
        }
        Ok(())
    }

    #[cfg(test)]
    fn debug_state(&self) -> StateSnapshot {
        let state = self.state.lock();
        StateSnapshot {
            readers: state.reader_owners.len(),
            writer_active: state.writer_active,
            writer_owner: state.writer_owner,
            upgrade_depth: state.upgrade_depth,
            reader_waiters: state.reader_waiters.len(),
            writer_waiters: state.writer_waiters.len(),
        }
    }
}

#[cfg(test)]
#[derive(Debug, Clone, PartialEq, Eq)]
struct StateSnapshot {
    readers: usize,
    writer_active: bool,
    writer_owner: Option<TaskId>,
    upgrade_depth: usize,
    reader_waiters: usize,
    writer_waiters: usize,
}

/// A cooperative read-write lock with writer self-upgrade.
///
/// Constructed fair by default: every successful acquire performs one
/// forced cooperative yield before resolving. [`RwLock::fast`] skips the
/// yield. Access goes through the [`ReaderLock`] and [`WriterLock`]
/// handles returned by [`reader`](Self::reader) / [`writer`](Self::writer)
/// (with `reader_lock` / `writer_lock` as stable aliases).
///
/// The lock guards a critical section, not a value: grants are permissions
/// tracked per task identity, so the acquiring task's [`Cx`] must be
/// threaded through every operation.
#[derive(Clone)]
pub struct RwLock {
    core: Arc<RwLockCore>,
}

impl RwLock {
    /// Creates a fair lock (forced yield after every acquire).
    #[must_use]
    pub fn new() -> Self {
        Self::with_fast(false)
    }

    /// Creates a fast-path lock: the fairness yield after acquisition is
    /// skipped. Meaningful only under a cooperative scheduler: callers
    /// whose critical sections never suspend can starve waiters.
    #[must_use]
    pub fn fast() -> Self {
        Self::with_fast(true)
    }

    fn with_fast(fast: bool) -> Self {
        Self {
            core: Arc::new(RwLockCore {
                state: ParkingMutex::new(LockState::default()),
                fast,
            }),
        }
    }

    /// Returns true if the fairness yield is skipped.
    #[must_use]
    pub fn is_fast(&self) -> bool {
        self.core.fast
    }

    /// The handle used for read (shared) access.
    #[must_use]
    pub fn reader(&self) -> ReaderLock {
        ReaderLock {
            core: Arc::clone(&self.core),
        }
    }

    /// Stable alias for [`reader`](Self::reader).
    #[must_use]
    pub fn reader_lock(&self) -> ReaderLock {
        self.reader()
    }

    /// The handle used for write (exclusive) access.
    #[must_use]
    pub fn writer(&self) -> WriterLock {
        WriterLock {
            core: Arc::clone(&self.core),
        }
    }

    /// Stable alias for [`writer`](Self::writer).
    #[must_use]
    pub fn writer_lock(&self) -> WriterLock {
        self.writer()
    }

    #[cfg(test)]
    fn debug_state(&self) -> StateSnapshot {
        self.core.debug_state()
    }
}

impl Default for RwLock {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RwLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.core.state.lock();
        f.debug_struct("RwLock")
            .field("readers", &state.reader_owners.len())
            .field("writer_active", &state.writer_active)
            .field("fast", &self.core.fast)
            .finish_non_exhaustive()
    }
}

/// Handle for read (shared) access. Cheaply clonable; all clones refer to
/// the same underlying lock.
#[derive(Clone)]
pub struct ReaderLock {
    core: Arc<RwLockCore>,
}

impl ReaderLock {
    /// Acquires a read grant for the task of `cx`, waiting while a
    /// writer is active or queued. A task already holding the write
    /// grant acquires a
    /// nested read grant on itself without suspending.
    ///
    /// The grant is tracked against the task identity, not the returned
    /// future; pair with [`release`](Self::release), or prefer
    /// [`lock`](Self::lock) for guaranteed release.
    pub fn acquire<'a, 'b>(&'a self, cx: &'b Cx) -> AcquireReadFuture<'a, 'b> {
        AcquireReadFuture {
            lock: self,
            cx,
            phase: AcquirePhase::Start,
        }
    }

    /// Releases one read grant held by the task of `cx`. Never suspends.
    ///
    /// # Errors
    ///
    /// [`ReleaseError::NotHeld`] if the task holds no read grant.
    pub fn release(&self, cx: &Cx) -> Result<(), ReleaseError> {
        self.core.release_read(cx.task_id())
    }

    /// Returns true if any task currently holds a read grant.
    ///
    /// Best-effort snapshot: the state may change concurrently.
    #[must_use]
    pub fn locked(&self) -> bool {
        self.core.read_locked()
    }

    /// Scoped acquisition: resolves to a [`ReadGuard`] that releases the
    /// grant exactly once when dropped, on every exit path.
    pub fn lock<'a, 'b>(&'a self, cx: &'b Cx) -> ReadGuardFuture<'a, 'b> {
        ReadGuardFuture {
            inner: self.acquire(cx),
        }
    }
}

impl fmt::Debug for ReaderLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReaderLock")
            .field("locked", &self.locked())
            .finish()
    }
}

/// Handle for write (exclusive) access. Cheaply clonable; all clones
/// refer to the same underlying lock.
#[derive(Clone)]
pub struct WriterLock {
    core: Arc<RwLockCore>,
}

impl WriterLock {
    /// Acquires the write grant for the task of `cx`, waiting while a
    /// writer is active or any read grant is held.
    ///
    /// The grant is tracked against the task identity, not the returned
    /// future; pair with [`release`](Self::release), or prefer
    /// [`lock`](Self::lock) for guaranteed release.
    pub fn acquire<'a, 'b>(&'a self, cx: &'b Cx) -> AcquireWriteFuture<'a, 'b> {
        AcquireWriteFuture {
            lock: self,
            cx,
            phase: AcquirePhase::Start,
        }
    }

    /// Releases the write grant held by the task of `cx`. Never suspends.
    ///
    /// # Errors
    ///
    /// [`ReleaseError::NotHeld`] if the task does not hold the write
    /// grant; [`ReleaseError::UpgradeHeld`] if nested read grants are
    /// still outstanding (release those first; the state is unchanged).
    pub fn release(&self, cx: &Cx) -> Result<(), ReleaseError> {
        self.core.release_write(cx.task_id())
    }

    /// Returns true if a task currently holds the write grant.
    ///
    /// Best-effort snapshot: the state may change concurrently.
    #[must_use]
    pub fn locked(&self) -> bool {
        self.core.write_locked()
    }

    /// Scoped acquisition: resolves to a [`WriteGuard`] that releases
    /// the grant exactly once when dropped, on every exit path.
    pub fn lock<'a, 'b>(&'a self, cx: &'b Cx) -> WriteGuardFuture<'a, 'b> {
        WriteGuardFuture {
            inner: self.acquire(cx),
        }
    }
}

impl fmt::Debug for WriterLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriterLock")
            .field("locked", &self.locked())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AcquirePhase {
    Start,
    /// Parked in a waiter queue under this id.
    Waiting(u64),
    /// Grant taken; one forced yield outstanding before resolution.
    Yielding,
    Done,
}

/// Future returned by [`ReaderLock::acquire`].
#[must_use = "futures do nothing unless polled"]
pub struct AcquireReadFuture<'a, 'b> {
    lock: &'a ReaderLock,
    cx: &'b Cx,
    phase: AcquirePhase,
}

impl Future for AcquireReadFuture<'_, '_> {
    type Output = Result<(), AcquireError>;

    fn poll(self: Pin<&mut Self>, context: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let lock = this.lock;
        let me = this.cx.task_id();

        match this.phase {
            AcquirePhase::Done => panic!("AcquireReadFuture polled after completion"),
            AcquirePhase::Yielding => {
                if this.cx.checkpoint().is_err() {
                    // Cancelled between the grant and the fairness yield:
                    // undo the grant so state reads as if the acquire
                    // never happened.
                    let released = lock.core.release_read(me);
                    debug_assert!(released.is_ok());
                    this.phase = AcquirePhase::Done;
                    return Poll::Ready(Err(AcquireError::Cancelled));
                }
                this.phase = AcquirePhase::Done;
                Poll::Ready(Ok(()))
            }
            AcquirePhase::Start | AcquirePhase::Waiting(_) => {
                if this.cx.checkpoint().is_err() {
                    if let AcquirePhase::Waiting(id) = this.phase {
                        lock.core.remove_reader_waiter(id);
                    }
                    this.phase = AcquirePhase::Done;
                    return Poll::Ready(Err(AcquireError::Cancelled));
                }

                let mut state = lock.core.state.lock();

                // Self-upgrade: the writer takes a nested read grant on
                // itself, immediately and without the fairness yield.
                if state.writer_active && state.writer_owner == Some(me) {
                    state.reader_owners.push(me);
                    state.upgrade_depth += 1;
                    state.assert_invariants();
                    tracing::trace!(
                        task = %me,
                        depth = state.upgrade_depth,
                        "self-upgrade read grant acquired"
                    );
                    drop(state);
                    this.phase = AcquirePhase::Done;
                    return Poll::Ready(Ok(()));
                }

                if state.reader_owners.contains(&me) {
                    if let AcquirePhase::Waiting(id) = this.phase {
                        state.reader_waiters.retain(|w| w.id != id);
                    }
                    drop(state);
                    this.phase = AcquirePhase::Done;
                    return Poll::Ready(Err(AcquireError::AlreadyHeld));
                }

                // Exclusive bias: a queued writer blocks new readers, so
                // overlapping read pressure cannot starve it.
                if !state.writer_active && state.writer_waiters.is_empty() {
                    state.reader_owners.push(me);
                    if let AcquirePhase::Waiting(id) = this.phase {
                        state.reader_waiters.retain(|w| w.id != id);
                    }
                    state.assert_invariants();
                    drop(state);
                    if lock.core.fast {
                        this.phase = AcquirePhase::Done;
                        return Poll::Ready(Ok(()));
                    }
                    // Forced yield: give other runnable tasks a turn
                    // before the critical section starts.
                    this.phase = AcquirePhase::Yielding;
                    context.waker().wake_by_ref();
                    return Poll::Pending;
                }

                // A writer is active or queued: park until the write
                // side clears.
                let next_phase = match this.phase {
                    AcquirePhase::Waiting(id) => {
                        if let Some(existing) =
                            state.reader_waiters.iter_mut().find(|w| w.id == id)
                        {
                            if !existing.waker.will_wake(context.waker()) {
                                existing.waker.clone_from(context.waker());
                            }
                            this.phase
                        } else {
                            // Entry gone; re-register at the front so
                            // the earlier arrival keeps its turn.
                            let new_id = state.next_waiter_id;
                            state.next_waiter_id += 1;
                            LockState::register_waiter(
                                true,
                                &mut state.reader_waiters,
                                new_id,
                                context.waker().clone(),
                            );
                            AcquirePhase::Waiting(new_id)
                        }
                    }
                    _ => {
                        let id = state.next_waiter_id;
                        state.next_waiter_id += 1;
                        LockState::register_waiter(
                            false,
                            &mut state.reader_waiters,
                            id,
                            context.waker().clone(),
                        );
                        AcquirePhase::Waiting(id)
                    }
                };
                drop(state);
                this.phase = next_phase;
                Poll::Pending
            }
        }
    }
}

impl Drop for AcquireReadFuture<'_, '_> {
    fn drop(&mut self) {
        match self.phase {
            AcquirePhase::Waiting(id) => self.lock.core.remove_reader_waiter(id),
            AcquirePhase::Yielding => {
                // Dropped mid-yield: the grant was taken but never
                // reported, so give it back.
                let released = self.lock.core.release_read(self.cx.task_id());
                debug_assert!(released.is_ok());
            }
            AcquirePhase::Start | AcquirePhase::Done => {}
        }
    }
}

/// Future returned by [`WriterLock::acquire`].
#[must_use = "futures do nothing unless polled"]
pub struct AcquireWriteFuture<'a, 'b> {
    lock: &'a WriterLock,
    cx: &'b Cx,
    phase: AcquirePhase,
}

impl Future for AcquireWriteFuture<'_, '_> {
    type Output = Result<(), AcquireError>;

    fn poll(self: Pin<&mut Self>, context: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let lock = this.lock;
        let me = this.cx.task_id();

        match this.phase {
            AcquirePhase::Done => panic!("AcquireWriteFuture polled after completion"),
            AcquirePhase::Yielding => {
                if this.cx.checkpoint().is_err() {
                    let released = lock.core.release_write(me);
                    debug_assert!(released.is_ok());
                    this.phase = AcquirePhase::Done;
                    return Poll::Ready(Err(AcquireError::Cancelled));
                }
                this.phase = AcquirePhase::Done;
                Poll::Ready(Ok(()))
            }
            AcquirePhase::Start | AcquirePhase::Waiting(_) => {
                if this.cx.checkpoint().is_err() {
                    if let AcquirePhase::Waiting(id) = this.phase {
                        lock.core.remove_writer_waiter(id);
                    }
                    this.phase = AcquirePhase::Done;
                    return Poll::Ready(Err(AcquireError::Cancelled));
                }

                let mut state = lock.core.state.lock();

                if state.writer_active && state.writer_owner == Some(me) {
                    // No Write -> Write transition: the write grant is
                    // not reentrant.
                    if let AcquirePhase::Waiting(id) = this.phase {
                        state.writer_waiters.retain(|w| w.id != id);
                    }
                    drop(state);
                    this.phase = AcquirePhase::Done;
                    return Poll::Ready(Err(AcquireError::AlreadyHeld));
                }

                if state.reader_owners.contains(&me) {
                    let mut wakers = WakerBatch::new();
                    if let AcquirePhase::Waiting(id) = this.phase {
                        state.writer_waiters.retain(|w| w.id != id);
                        if state.writer_waiters.is_empty() && !state.writer_active {
                            wakers = RwLockCore::collect_reader_wakers(&state);
                        }
                    }
                    drop(state);
                    this.phase = AcquirePhase::Done;
                    for waker in wakers {
                        waker.wake();
                    }
                    return Poll::Ready(Err(AcquireError::InvalidUpgrade));
                }

                if !state.writer_active && state.reader_owners.is_empty() {
                    state.writer_active = true;
                    state.writer_owner = Some(me);
                    if let AcquirePhase::Waiting(id) = this.phase {
                        state.writer_waiters.retain(|w| w.id != id);
                    }
                    state.assert_invariants();
                    tracing::trace!(task = %me, "write grant acquired");
                    drop(state);
                    if lock.core.fast {
                        this.phase = AcquirePhase::Done;
                        return Poll::Ready(Ok(()));
                    }
                    this.phase = AcquirePhase::Yielding;
                    context.waker().wake_by_ref();
                    return Poll::Pending;
                }

                // Readers or another writer hold the lock: park.
                let next_phase = match this.phase {
                    AcquirePhase::Waiting(id) => {
                        if let Some(existing) =
                            state.writer_waiters.iter_mut().find(|w| w.id == id)
                        {
                            if !existing.waker.will_wake(context.waker()) {
                                existing.waker.clone_from(context.waker());
                            }
                            this.phase
                        } else {
                            let new_id = state.next_waiter_id;
                            state.next_waiter_id += 1;
                            LockState::register_waiter(
                                true,
                                &mut state.writer_waiters,
                                new_id,
                                context.waker().clone(),
                            );
                            AcquirePhase::Waiting(new_id)
                        }
                    }
                    _ => {
                        let id = state.next_waiter_id;
                        state.next_waiter_id += 1;
                        LockState::register_waiter(
                            false,
                            &mut state.writer_waiters,
                            id,
                            context.waker().clone(),
                        );
                        AcquirePhase::Waiting(id)
                    }
                };
                drop(state);
                this.phase = next_phase;
                Poll::Pending
            }
        }
    }
}

impl Drop for AcquireWriteFuture<'_, '_> {
    fn drop(&mut self) {
        match self.phase {
            AcquirePhase::Waiting(id) => self.lock.core.remove_writer_waiter(id),
            AcquirePhase::Yielding => {
                let released = self.lock.core.release_write(self.cx.task_id());
                debug_assert!(released.is_ok());
            }
            AcquirePhase::Start | AcquirePhase::Done => {}
        }
    }
}

/// Future returned by [`ReaderLock::lock`].
#[must_use = "futures do nothing unless polled"]
pub struct ReadGuardFuture<'a, 'b> {
    inner: AcquireReadFuture<'a, 'b>,
}

impl Future for ReadGuardFuture<'_, '_> {
    type Output = Result<ReadGuard, AcquireError>;

    fn poll(self: Pin<&mut Self>, context: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let task = this.inner.cx.task_id();
        match Pin::new(&mut this.inner).poll(context) {
            Poll::Ready(Ok(())) => Poll::Ready(Ok(ReadGuard {
                core: Arc::clone(&this.inner.lock.core),
                task,
            })),
            Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Future returned by [`WriterLock::lock`].
#[must_use = "futures do nothing unless polled"]
pub struct WriteGuardFuture<'a, 'b> {
    inner: AcquireWriteFuture<'a, 'b>,
}

impl Future for WriteGuardFuture<'_, '_> {
    type Output = Result<WriteGuard, AcquireError>;

    fn poll(self: Pin<&mut Self>, context: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let task = this.inner.cx.task_id();
        match Pin::new(&mut this.inner).poll(context) {
            Poll::Ready(Ok(())) => Poll::Ready(Ok(WriteGuard {
                core: Arc::clone(&this.inner.lock.core),
                task,
            })),
            Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Scoped read grant; releases exactly once on drop.
#[must_use = "grant is released immediately if the guard is not held"]
pub struct ReadGuard {
    core: Arc<RwLockCore>,
    task: TaskId,
}

impl ReadGuard {
    /// The task holding this grant.
    #[must_use]
    pub const fn task_id(&self) -> TaskId {
        self.task
    }
}

impl fmt::Debug for ReadGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadGuard").field("task", &self.task).finish()
    }
}

impl Drop for ReadGuard {
    fn drop(&mut self) {
        if self.core.release_read(self.task).is_err() {
            // Only reachable when the holder also called release()
            // manually; Drop cannot propagate, so report it here.
            tracing::warn!(task = %self.task, "read guard dropped but grant was already released");
        }
    }
}

/// Scoped write grant; releases exactly once on drop.
///
/// If nested read grants from a self-upgrade are still alive when this
/// guard drops, the release fails ([`ReleaseError::UpgradeHeld`]) and the
/// lock stays write-held. Drop the nested [`ReadGuard`]s first.
#[must_use = "grant is released immediately if the guard is not held"]
pub struct WriteGuard {
    core: Arc<RwLockCore>,
    task: TaskId,
}

impl WriteGuard {
    /// The task holding this grant.
    #[must_use]
    pub const fn task_id(&self) -> TaskId {
        self.task
    }
}

impl fmt::Debug for WriteGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteGuard").field("task", &self.task).finish()
    }
}

impl Drop for WriteGuard {
    fn drop(&mut self) {
        if let Err(e) = self.core.release_write(self.task) {
            tracing::warn!(task = %self.task, error = %e, "write guard failed to release");
        }
    }
}
