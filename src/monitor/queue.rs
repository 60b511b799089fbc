//! Scan Request Queue
//!
//! The inter-thread boundary between the notification side and the
//! worker pool: a binary heap ordered by (priority DESC, enqueue
//! sequence ASC) behind a mutex and condition variable. Closing the
//! queue wakes every blocked worker.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

/// One file awaiting a real-time scan.
#[derive(Debug, Clone)]
pub struct ScanRequest {
    pub path: PathBuf,
    pub priority: u8,
    pub enqueued_at: Instant,
    seq: u64,
}

impl PartialEq for ScanRequest {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for ScanRequest {}

impl PartialOrd for ScanRequest {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScanRequest {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Max-heap: higher priority wins; within a class, the earlier
        // sequence number wins to keep dispatch fair.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct QueueInner {
    heap: BinaryHeap<ScanRequest>,
    closed: bool,
}

#[derive(Default)]
pub struct ScanQueue {
    inner: Mutex<QueueInner>,
    ready: Condvar,
    next_seq: AtomicU64,
}

impl ScanQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a request. Returns false once the queue is closed.
    pub fn push(&self, path: PathBuf, priority: u8) -> bool {
        let mut inner = self.inner.lock();
        if inner.closed {
            return false;
        }
        inner.heap.push(ScanRequest {
            path,
            priority,
            enqueued_at: Instant::now(),
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
        });
        drop(inner);
        self.ready.notify_one();
        true
    }

    /// Block until a request is available or the queue closes.
    /// `None` means shutdown.
    pub fn pop(&self) -> Option<ScanRequest> {
        let mut inner = self.inner.lock();
        loop {
            if let Some(request) = inner.heap.pop() {
                return Some(request);
            }
            if inner.closed {
                return None;
            }
            self.ready.wait(&mut inner);
        }
    }

    /// Non-blocking variant used by drain loops and tests.
    pub fn try_pop(&self) -> Option<ScanRequest> {
        self.inner.lock().heap.pop()
    }

    /// Close the queue and wake every waiting worker. Requests still
    /// queued are dropped; no new pushes are accepted.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        inner.heap.clear();
        drop(inner);
        self.ready.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    pub fn len(&self) -> usize {
        self.inner.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().heap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn pops_by_priority_then_fifo() {
        let queue = ScanQueue::new();
        queue.push(PathBuf::from("a.txt"), 1);
        queue.push(PathBuf::from("b.exe"), 10);
        queue.push(PathBuf::from("c.ps1"), 7);

        assert_eq!(queue.try_pop().unwrap().path, PathBuf::from("b.exe"));
        assert_eq!(queue.try_pop().unwrap().path, PathBuf::from("c.ps1"));
        assert_eq!(queue.try_pop().unwrap().path, PathBuf::from("a.txt"));
        assert!(queue.try_pop().is_none());
    }

    #[test]
    fn equal_priority_preserves_enqueue_order() {
        let queue = ScanQueue::new();
        for name in ["first.exe", "second.exe", "third.exe"] {
            queue.push(PathBuf::from(name), 10);
        }
        assert_eq!(queue.try_pop().unwrap().path, PathBuf::from("first.exe"));
        assert_eq!(queue.try_pop().unwrap().path, PathBuf::from("second.exe"));
        assert_eq!(queue.try_pop().unwrap().path, PathBuf::from("third.exe"));
    }

    #[test]
    fn close_rejects_new_pushes() {
        let queue = ScanQueue::new();
        assert!(queue.push(PathBuf::from("x"), 1));
        queue.close();
        assert!(!queue.push(PathBuf::from("y"), 1));
        assert!(queue.is_closed());
        assert!(queue.is_empty());
    }

    #[test]
    fn close_wakes_blocked_workers() {
        let queue = Arc::new(ScanQueue::new());
        let worker = {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || queue.pop())
        };

        std::thread::sleep(Duration::from_millis(50));
        queue.close();
        assert!(worker.join().unwrap().is_none());
    }

    #[test]
    fn pop_blocks_until_push() {
        let queue = Arc::new(ScanQueue::new());
        let worker = {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || queue.pop())
        };

        std::thread::sleep(Duration::from_millis(50));
        queue.push(PathBuf::from("late.exe"), 10);
        let popped = worker.join().unwrap().unwrap();
        assert_eq!(popped.path, PathBuf::from("late.exe"));
    }
}
