use std::mem;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

/// Filesystem-level lock that a wrapper lends to the files it opens, so file
/// operations can coordinate with structural changes to the filesystem.
pub(crate) trait Locker: Send + Sync {
    fn rlock(&self);

    /// # Safety
    /// The caller must hold a shared lock taken with `rlock`.
    unsafe fn runlock(&self);

    // Files only ever take their parent in shared mode.
    fn lock(&self);

    /// # Safety
    /// The caller must hold the exclusive lock taken with `lock`.
    unsafe fn unlock(&self);
}

impl<T: Send + Sync> Locker for RwLock<T> {
    fn rlock(&self) {
        mem::forget(self.read());
    }

    unsafe fn runlock(&self) {
        self.force_unlock_read();
    }

    fn lock(&self) {
        mem::forget(self.write());
    }

    unsafe fn unlock(&self) {
        self.force_unlock_write();
    }
}

/// Shared hold on a parent filesystem lock, released on drop.
pub(crate) struct ParentReadGuard {
    parent: Arc<dyn Locker>,
}

impl ParentReadGuard {
    /// Takes the parent's lock in shared mode. Returns `None` when the parent
    /// filesystem has already been dropped.
    pub(crate) fn acquire(parent: &Weak<dyn Locker>) -> Option<Self> {
        let parent = parent.upgrade()?;
        parent.rlock();
        Some(ParentReadGuard { parent })
    }
}

impl Drop for ParentReadGuard {
    fn drop(&mut self) {
        // SAFETY: a guard only exists after `rlock` returned on this locker.
        unsafe { self.parent.runlock() }
    }
}
