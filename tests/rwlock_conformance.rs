//! RwLock Conformance Test Suite
//!
//! End-to-end tests for the cooperative read-write lock, driven through
//! `block_on` with real threads contending for grants.
//!
//! Test Coverage:
//! - RWL-001: Basic Read Sharing and Release
//! - RWL-002: Writer Mutual Exclusion Under Contention
//! - RWL-003: Reader/Writer Invariant Under Mixed Load
//! - RWL-004: Writer Self-Upgrade With a Parked Reader
//! - RWL-005: Writer Liveness Under Sequential Reader Turnover
//! - RWL-006: Cross-Thread Cancellation of a Parked Acquire
//! - RWL-007: Release Discipline Across Tasks
//! - RWL-008: Queued Writer Blocks Overlapping Readers

// Allow significant_drop_tightening in tests - the scoped blocks are for clarity
#![allow(clippy::significant_drop_tightening)]

use coop_rwlock::test_utils::init_test_logging;
use coop_rwlock::{assert_with_log, test_complete, test_phase};
use coop_rwlock::{AcquireError, Cx, ReleaseError, RwLock, TaskId};
use futures_lite::future::block_on;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

fn init_test(test_name: &str) {
    init_test_logging();
    test_phase!(test_name);
}

fn task_cx() -> Cx {
    Cx::new(TaskId::new_ephemeral())
}

/// RWL-001: Basic Read Sharing and Release
///
/// Verifies that several tasks hold read grants at once, that locked()
/// tracks them, and that the handle aliases observe the same lock.
#[test]
fn rwl_001_basic_read_sharing() {
    init_test("rwl_001_basic_read_sharing");
    let lock = RwLock::new();
    let reader = lock.reader_lock();

    let cxs: Vec<Cx> = (0..3).map(|_| task_cx()).collect();
    for cx in &cxs {
        block_on(reader.acquire(cx)).expect("read acquire should succeed");
    }
    assert_with_log!(reader.locked(), "read side held", true, reader.locked());
    let writer_free = !lock.writer_lock().locked();
    assert_with_log!(writer_free, "write side free", true, writer_free);

    for cx in &cxs {
        reader.release(cx).expect("read release should succeed");
    }
    assert_with_log!(!reader.locked(), "all grants released", false, reader.locked());
    test_complete!("rwl_001_basic_read_sharing");
}

/// RWL-002: Writer Mutual Exclusion Under Contention
///
/// Several threads take the write grant in turn; at most one may ever be
/// inside the critical section.
#[test]
fn rwl_002_writer_mutual_exclusion() {
    init_test("rwl_002_writer_mutual_exclusion");
    let lock = Arc::new(RwLock::new());
    let inside = Arc::new(AtomicUsize::new(0));
    let entries = Arc::new(AtomicUsize::new(0));
    let num_threads = 4;
    let iterations = 50;

    let handles: Vec<_> = (0..num_threads)
        .map(|_| {
            let lock = Arc::clone(&lock);
            let inside = Arc::clone(&inside);
            let entries = Arc::clone(&entries);
            thread::spawn(move || {
                let cx = task_cx();
                let writer = lock.writer();
                for _ in 0..iterations {
                    let guard = block_on(writer.lock(&cx)).expect("write lock should succeed");
                    let others = inside.fetch_add(1, Ordering::SeqCst);
                    assert_eq!(others, 0, "another writer inside the critical section");
                    entries.fetch_add(1, Ordering::SeqCst);
                    inside.fetch_sub(1, Ordering::SeqCst);
                    drop(guard);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("writer thread should complete");
    }

    let total = entries.load(Ordering::SeqCst);
    let expected = num_threads * iterations;
    assert_with_log!(total == expected, "every entry counted", expected, total);
    test_complete!("rwl_002_writer_mutual_exclusion");
}

/// RWL-003: Reader/Writer Invariant Under Mixed Load
///
/// Reader and writer threads contend; a writer must never observe a
/// reader inside, and readers must never observe an active writer.
#[test]
fn rwl_003_mixed_load_invariant() {
    init_test("rwl_003_mixed_load_invariant");
    let lock = Arc::new(RwLock::new());
    let readers_inside = Arc::new(AtomicUsize::new(0));
    let writer_inside = Arc::new(AtomicBool::new(false));
    let iterations = 50;

    let mut handles = Vec::new();
    for _ in 0..3 {
        let lock = Arc::clone(&lock);
        let readers_inside = Arc::clone(&readers_inside);
        let writer_inside = Arc::clone(&writer_inside);
        handles.push(thread::spawn(move || {
            let cx = task_cx();
            let reader = lock.reader();
            for _ in 0..iterations {
                let guard = block_on(reader.lock(&cx)).expect("read lock should succeed");
                readers_inside.fetch_add(1, Ordering::SeqCst);
                assert!(
                    !writer_inside.load(Ordering::SeqCst),
                    "writer active while a read grant is held"
                );
                readers_inside.fetch_sub(1, Ordering::SeqCst);
                drop(guard);
            }
        }));
    }
    for _ in 0..2 {
        let lock = Arc::clone(&lock);
        let readers_inside = Arc::clone(&readers_inside);
        let writer_inside = Arc::clone(&writer_inside);
        handles.push(thread::spawn(move || {
            let cx = task_cx();
            let writer = lock.writer();
            for _ in 0..iterations {
                let guard = block_on(writer.lock(&cx)).expect("write lock should succeed");
                assert!(
                    !writer_inside.swap(true, Ordering::SeqCst),
                    "two writers active at once"
                );
                assert_eq!(
                    readers_inside.load(Ordering::SeqCst),
                    0,
                    "reader inside while the writer is active"
                );
                writer_inside.store(false, Ordering::SeqCst);
                drop(guard);
            }
        }));
    }

    for handle in handles {
        handle.join().expect("thread should complete");
    }
    test_complete!("rwl_003_mixed_load_invariant");
}

/// RWL-004: Writer Self-Upgrade With a Parked Reader
///
/// While task A holds the write grant and task B is parked on read, A
/// takes and releases a nested read grant on itself. B acquires only
/// after A fully releases, and premature write release is rejected.
#[test]
fn rwl_004_self_upgrade_with_parked_reader() {
    init_test("rwl_004_self_upgrade_with_parked_reader");
    let lock = Arc::new(RwLock::new());
    let cx_a = task_cx();
    let (started_tx, started_rx) = mpsc::channel();
    let (done_tx, done_rx) = mpsc::channel();

    block_on(lock.writer().acquire(&cx_a)).expect("A write acquire");

    let reader_thread = {
        let lock = Arc::clone(&lock);
        thread::spawn(move || {
            let cx_b = task_cx();
            let reader = lock.reader();
            started_tx.send(()).expect("send started");
            block_on(reader.acquire(&cx_b)).expect("B read acquire");
            done_tx.send(()).expect("send done");
            reader.release(&cx_b).expect("B read release");
        })
    };

    started_rx.recv().expect("reader thread started");
    // Give B a moment to park behind the writer.
    thread::sleep(Duration::from_millis(20));
    assert!(
        done_rx.try_recv().is_err(),
        "reader acquired while the writer is active"
    );

    // A upgrades on itself; B stays parked throughout.
    block_on(lock.reader().acquire(&cx_a)).expect("A self-upgrade");
    let premature = lock.writer().release(&cx_a).unwrap_err();
    assert_with_log!(
        premature == ReleaseError::UpgradeHeld,
        "write release rejected while upgraded",
        ReleaseError::UpgradeHeld,
        premature
    );
    assert!(done_rx.try_recv().is_err(), "reader acquired mid-upgrade");

    lock.reader().release(&cx_a).expect("A nested read release");
    lock.writer().release(&cx_a).expect("A write release");

    done_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("parked reader should acquire after the writer releases");
    reader_thread.join().expect("reader thread should complete");
    test_complete!("rwl_004_self_upgrade_with_parked_reader");
}

/// RWL-005: Writer Liveness Under Sequential Reader Turnover
///
/// A parked writer must acquire within a bounded number of sequential
/// reader acquire/release cycles. Overlapping read pressure is covered
/// by RWL-008.
#[test]
fn rwl_005_writer_liveness() {
    init_test("rwl_005_writer_liveness");
    let lock = Arc::new(RwLock::new());
    let acquired = Arc::new(AtomicBool::new(false));

    let cx_r = task_cx();
    block_on(lock.reader().acquire(&cx_r)).expect("initial read");

    let writer_thread = {
        let lock = Arc::clone(&lock);
        let acquired = Arc::clone(&acquired);
        thread::spawn(move || {
            let cx_w = task_cx();
            let writer = lock.writer();
            block_on(writer.acquire(&cx_w)).expect("writer acquire");
            acquired.store(true, Ordering::SeqCst);
            writer.release(&cx_w).expect("writer release");
        })
    };

    // Hand the lock back and churn short-lived readers until the writer
    // gets through.
    lock.reader().release(&cx_r).expect("initial release");
    let mut cycles = 0usize;
    while !acquired.load(Ordering::SeqCst) {
        cycles += 1;
        assert!(cycles < 10_000, "writer starved by reader turnover");
        let cx = task_cx();
        if block_on(lock.reader().acquire(&cx)).is_ok() {
            lock.reader().release(&cx).expect("churn release");
        }
        thread::yield_now();
    }

    writer_thread.join().expect("writer thread should complete");
    test_complete!("rwl_005_writer_liveness", cycles = cycles);
}

/// RWL-006: Cross-Thread Cancellation of a Parked Acquire
///
/// A writer parked behind a reader is cancelled from another thread.
/// Once it is next woken it resolves to Cancelled without acquiring,
/// and the lock remains usable.
#[test]
fn rwl_006_cancellation_of_parked_acquire() {
    init_test("rwl_006_cancellation_of_parked_acquire");
    let lock = Arc::new(RwLock::new());
    let cx_r = task_cx();
    let cx_w = task_cx();
    block_on(lock.reader().acquire(&cx_r)).expect("read acquire");

    let writer_thread = {
        let lock = Arc::clone(&lock);
        let cx_w = cx_w.clone();
        thread::spawn(move || block_on(lock.writer().acquire(&cx_w)))
    };

    // Let the writer park, then cancel it and wake it by releasing.
    thread::sleep(Duration::from_millis(20));
    cx_w.set_cancel_requested(true);
    lock.reader().release(&cx_r).expect("read release");

    let outcome = writer_thread.join().expect("writer thread should complete");
    assert_with_log!(
        outcome == Err(AcquireError::Cancelled),
        "parked writer observed cancellation",
        Err::<(), _>(AcquireError::Cancelled),
        outcome
    );

    // The cancelled attempt left no residue behind.
    let writer_free = !lock.writer().locked();
    assert_with_log!(writer_free, "write side free", true, writer_free);
    let cx = task_cx();
    block_on(lock.writer().acquire(&cx)).expect("lock still usable");
    lock.writer().release(&cx).expect("release");
    test_complete!("rwl_006_cancellation_of_parked_acquire");
}

/// RWL-007: Release Discipline Across Tasks
///
/// A task may only release grants it holds; upgrade from read to write
/// is rejected; a nested upgrade must unwind before the write release.
#[test]
fn rwl_007_release_discipline() {
    init_test("rwl_007_release_discipline");
    let lock = RwLock::new();
    let cx_a = task_cx();
    let cx_b = task_cx();

    assert_eq!(lock.reader().release(&cx_a), Err(ReleaseError::NotHeld));
    assert_eq!(lock.writer().release(&cx_a), Err(ReleaseError::NotHeld));

    block_on(lock.reader().acquire(&cx_a)).expect("A read");
    // B holds nothing; it cannot release A's grant.
    assert_eq!(lock.reader().release(&cx_b), Err(ReleaseError::NotHeld));
    // A holds read; write acquisition is an upgrade and is rejected.
    let err = block_on(lock.writer().acquire(&cx_a)).unwrap_err();
    assert_with_log!(
        err == AcquireError::InvalidUpgrade,
        "read->write upgrade rejected",
        AcquireError::InvalidUpgrade,
        err
    );
    lock.reader().release(&cx_a).expect("A release");

    // Self-upgrade unwinds in order: nested reads first, write last.
    block_on(lock.writer().acquire(&cx_a)).expect("A write");
    block_on(lock.reader().acquire(&cx_a)).expect("A upgrade");
    assert_eq!(lock.writer().release(&cx_a), Err(ReleaseError::UpgradeHeld));
    lock.reader().release(&cx_a).expect("nested release");
    lock.writer().release(&cx_a).expect("write release");
    test_complete!("rwl_007_release_discipline");
}

/// RWL-008: Queued Writer Blocks Overlapping Readers
///
/// A reader that arrives while a writer is queued must park instead of
/// overlapping with the current read holders, so the writer acquires as
/// soon as the pre-queue grants are released; the late reader follows
/// once the writer is done.
#[test]
fn rwl_008_queued_writer_blocks_overlapping_readers() {
    init_test("rwl_008_queued_writer_blocks_overlapping_readers");
    let lock = Arc::new(RwLock::new());
    let cx_a = task_cx();
    block_on(lock.reader().acquire(&cx_a)).expect("A read acquire");

    let (w_tx, w_rx) = mpsc::channel();
    let writer_thread = {
        let lock = Arc::clone(&lock);
        thread::spawn(move || {
            let cx = task_cx();
            let writer = lock.writer();
            block_on(writer.acquire(&cx)).expect("writer acquire");
            w_tx.send(()).expect("send writer acquired");
            writer.release(&cx).expect("writer release");
        })
    };
    // Let the writer park behind A's read grant.
    thread::sleep(Duration::from_millis(50));

    let (b_tx, b_rx) = mpsc::channel();
    let reader_thread = {
        let lock = Arc::clone(&lock);
        thread::spawn(move || {
            let cx = task_cx();
            let reader = lock.reader();
            block_on(reader.acquire(&cx)).expect("B read acquire");
            b_tx.send(()).expect("send reader acquired");
            reader.release(&cx).expect("B read release");
        })
    };
    thread::sleep(Duration::from_millis(50));

    // B arrived while the writer was queued: it must not overlap with A,
    // and the writer is still held out by A's grant.
    assert!(
        b_rx.try_recv().is_err(),
        "late reader admitted past a queued writer"
    );
    assert!(
        w_rx.try_recv().is_err(),
        "writer acquired while a read grant was held"
    );

    lock.reader().release(&cx_a).expect("A release");
    w_rx.recv_timeout(Duration::from_secs(5))
        .expect("writer should acquire once the pre-queue reader leaves");
    b_rx.recv_timeout(Duration::from_secs(5))
        .expect("late reader should acquire after the writer releases");

    writer_thread.join().expect("writer thread should complete");
    reader_thread.join().expect("reader thread should complete");
    test_complete!("rwl_008_queued_writer_blocks_overlapping_readers");
}
