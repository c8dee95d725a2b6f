//! Reference-counted tree snapshots
//!
//! Readers retain the published snapshot before use and release it
//! after; the tree and every on-disk pack or filter version it
//! references stay stable in between. Writers build a private tree
//! clone and publish it with an atomic swap; the replaced snapshot runs
//! its cleanup exactly once when its last reference drops, which
//! retires the epoch on disk and may trigger garbage collection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::tree::Tree;

type Cleanup = Box<dyn FnOnce(u32) + Send>;

/// One immutable published tree version
pub struct Snapshot {
    pub tree: Tree,
    pub epoch: u32,
    refs: AtomicU64,
    cleanup: Mutex<Option<Cleanup>>,
}

impl Snapshot {
    /// New snapshot holding one reference for its publisher
    pub fn new(tree: Tree, epoch: u32) -> Self {
        Self {
            tree,
            epoch,
            refs: AtomicU64::new(1),
            cleanup: Mutex::new(None),
        }
    }

    pub fn with_cleanup(tree: Tree, epoch: u32, cleanup: Cleanup) -> Self {
        Self {
            cleanup: Mutex::new(Some(cleanup)),
            ..Self::new(tree, epoch)
        }
    }

    /// Acquire one reference. A count of zero signals a replacement in
    /// progress, so retry until the new count is visible.
    pub fn retain(&self) {
        loop {
            let cur = self.refs.load(Ordering::Acquire);
            if cur == 0 {
                std::hint::spin_loop();
                continue;
            }
            if self
                .refs
                .compare_exchange_weak(cur, cur + 1, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return;
            }
        }
    }

    /// Drop one reference, running cleanup on the last
    pub fn release(&self) {
        if self.refs.fetch_sub(1, Ordering::AcqRel) == 1 {
            if let Some(f) = self.cleanup.lock().take() {
                f(self.epoch);
            }
        }
    }

    #[cfg(test)]
    fn ref_count(&self) -> u64 {
        self.refs.load(Ordering::Acquire)
    }
}

/// The published snapshot pointer, the only shared mutable cell
pub struct SnapshotCell {
    cur: Mutex<Arc<Snapshot>>,
}

impl SnapshotCell {
    pub fn new(snap: Arc<Snapshot>) -> Self {
        Self {
            cur: Mutex::new(snap),
        }
    }

    /// Retain and return the current snapshot
    pub fn get(&self) -> Arc<Snapshot> {
        let guard = self.cur.lock();
        guard.retain();
        guard.clone()
    }

    /// Peek without retaining, for the writer's own bookkeeping
    pub fn current_epoch(&self) -> u32 {
        self.cur.lock().epoch
    }

    /// Swap in a new snapshot and release the publisher's reference on
    /// the old one
    pub fn update(&self, snap: Arc<Snapshot>) {
        let old = {
            let mut guard = self.cur.lock();
            std::mem::replace(&mut *guard, snap)
        };
        old.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_cleanup_runs_once_on_last_release() {
        let ran = Arc::new(AtomicUsize::new(0));
        let ran2 = ran.clone();
        let snap = Snapshot::with_cleanup(
            Tree::new(),
            3,
            Box::new(move |epoch| {
                assert_eq!(epoch, 3);
                ran2.fetch_add(1, Ordering::SeqCst);
            }),
        );
        snap.retain();
        snap.release();
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        snap.release();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cell_update_releases_old() {
        let ran = Arc::new(AtomicUsize::new(0));
        let ran2 = ran.clone();
        let cell = SnapshotCell::new(Arc::new(Snapshot::with_cleanup(
            Tree::new(),
            1,
            Box::new(move |_| {
                ran2.fetch_add(1, Ordering::SeqCst);
            }),
        )));

        // a reader pins the old snapshot across the swap
        let reader = cell.get();
        cell.update(Arc::new(Snapshot::new(Tree::new(), 2)));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(cell.current_epoch(), 2);

        reader.release();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_concurrent_retain_release() {
        let snap = Arc::new(Snapshot::new(Tree::new(), 1));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let s = snap.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..1000 {
                    s.retain();
                    s.release();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(snap.ref_count(), 1);
    }
}
