use core::{
    cell::UnsafeCell,
    hint::spin_loop,
    ops::{Deref, DerefMut},
    sync::atomic::{AtomicUsize, Ordering},
};

/// Holder value of an unlocked lock.
const UNLOCKED: usize = usize::MAX;

/// Holder recorded by [`SpinLock::lock`] when the caller did not name a CPU.
pub const ANONYMOUS_HOLDER: usize = usize::MAX - 1;

pub struct SpinLock<T> {
    /// lock state
    /// * `UNLOCKED`: free
    /// * anything else: id of the CPU holding it
    holder: AtomicUsize,
    inner: UnsafeCell<T>,
}

// Safety: mutual exclusion; only T: Send may cross threads.
unsafe impl<T: Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    pub const fn new(inner: T) -> Self {
        Self {
            holder: AtomicUsize::new(UNLOCKED),
            inner: UnsafeCell::new(inner),
        }
    }

    #[inline]
    fn try_acquire(&self, cpu: usize) -> bool {
        self.holder
            .compare_exchange(UNLOCKED, cpu, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Try once as `cpu`; returns immediately.
    #[inline]
    pub fn try_lock_as(&self, cpu: usize) -> Option<SpinLockGuard<'_, T>> {
        debug_assert_ne!(cpu, UNLOCKED);
        if self.try_acquire(cpu) {
            Some(SpinLockGuard { lock: self })
        } else {
            None
        }
    }

    /// Try once; returns immediately.
    #[inline]
    pub fn try_lock(&self) -> Option<SpinLockGuard<'_, T>> {
        self.try_lock_as(ANONYMOUS_HOLDER)
    }

    /// Spin until acquired (TATAS) on behalf of `cpu`, then return a guard.
    ///
    /// # Panics
    /// If `cpu` already holds this lock; spinning would never end.
    #[inline]
    pub fn lock_as(&self, cpu: usize) -> SpinLockGuard<'_, T> {
        debug_assert_ne!(cpu, UNLOCKED);
        if cpu != ANONYMOUS_HOLDER && self.is_held_by(cpu) {
            panic!("spin lock re-acquired by its holder (cpu {cpu})");
        }

        // Fast path: take the lock if it looks free.
        while !self.try_acquire(cpu) {
            // Contended path: spin on a read, then retry CAS.
            while self.holder.load(Ordering::Relaxed) != UNLOCKED {
                spin_loop();
            }
        }
        SpinLockGuard { lock: self }
    }

    /// Spin until acquired without naming a CPU.
    #[inline]
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        self.lock_as(ANONYMOUS_HOLDER)
    }

    /// Whether the lock is currently held on behalf of `cpu`.
    ///
    /// Only meaningful when asked by `cpu` itself: no other CPU can take or
    /// release the lock in its name.
    #[inline]
    pub fn is_held_by(&self, cpu: usize) -> bool {
        self.holder.load(Ordering::Relaxed) == cpu
    }

    #[inline]
    pub fn is_locked(&self) -> bool {
        self.holder.load(Ordering::Relaxed) != UNLOCKED
    }

    /// Closure convenience, built on the guard.
    #[inline]
    pub fn with_lock<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut g = self.lock();
        f(&mut g)
    }

    /// Mutable access when you have `&mut self` (no contention possible).
    #[inline]
    pub const fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }

    #[inline]
    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }
}

pub struct SpinLockGuard<'a, T> {
    lock: &'a SpinLock<T>,
}

impl<T> Deref for SpinLockGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.inner.get() }
    }
}

impl<T> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.inner.get() }
    }
}

impl<T> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        // Release publishes the critical section.
        self.lock.holder.store(UNLOCKED, Ordering::Release);
    }
}
