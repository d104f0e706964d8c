//! Per-context ownership lock.
//!
//! A context may be current on at most one thread. [`ContextLock`] records
//! which thread that is and decides what happens to everybody else: in
//! fail-fast mode a contended `lock()` returns an error naming the owner, in
//! blocking mode the caller parks in a FIFO queue and is handed ownership
//! directly when it reaches the front.
//!
//! The lock is deliberately not re-entrant. Re-entrancy is handled one level
//! up by the context's "already current on this thread" check, so a second
//! `lock()` from the owning thread is always a bug and is reported as one.

use common::{thread_label, GlError, GlResult};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, ThreadId};

/// A thread that owns or waits for the lock.
#[derive(Clone, Debug)]
struct Holder {
    id: ThreadId,
    label: String,
}

impl Holder {
    fn current() -> Self {
        Self {
            id: thread::current().id(),
            label: thread_label(),
        }
    }
}

#[derive(Debug, Default)]
struct LockState {
    owner: Option<Holder>,
    /// Parked threads, longest-waiting first.
    waiters: VecDeque<Holder>,
}

/// Fail-fast or blocking ownership lock bound to one context.
#[derive(Debug)]
pub struct ContextLock {
    state: Mutex<LockState>,
    handed_off: Condvar,
    fail_fast: AtomicBool,
}

impl ContextLock {
    pub fn new(fail_fast: bool) -> Self {
        Self {
            state: Mutex::new(LockState::default()),
            handed_off: Condvar::new(),
            fail_fast: AtomicBool::new(fail_fast),
        }
    }

    /// Claim the lock for the calling thread, honouring the fail-fast mode.
    pub fn lock(&self) -> GlResult<()> {
        self.acquire(self.is_fail_fast())
    }

    /// Claim the lock, parking even when fail-fast is enabled.
    pub fn lock_blocking(&self) -> GlResult<()> {
        self.acquire(false)
    }

    fn acquire(&self, fail_fast: bool) -> GlResult<()> {
        let me = Holder::current();
        let mut state = self.state.lock();

        let Some(owner) = state.owner.as_ref() else {
            state.owner = Some(me);
            return Ok(());
        };
        if owner.id == me.id {
            return Err(GlError::illegal_state(format!(
                "context lock already held by the calling thread {}",
                owner.label
            )));
        }
        if fail_fast {
            tracing::warn!(owner = %owner.label, caller = %me.label, "context lock contended");
            return Err(GlError::LockContention {
                owner: owner.label.clone(),
                caller: me.label,
            });
        }
        tracing::trace!(owner = %owner.label, caller = %me.label, "waiting for context lock");

        let id = me.id;
        state.waiters.push_back(me);
        while !state.owner.as_ref().is_some_and(|owner| owner.id == id) {
            self.handed_off.wait(&mut state);
        }
        Ok(())
    }

    /// Release the lock and hand it to the longest-waiting thread, if any.
    pub fn unlock(&self) -> GlResult<()> {
        let me = thread::current().id();
        let mut state = self.state.lock();

        match &state.owner {
            Some(owner) if owner.id == me => {}
            Some(owner) => {
                return Err(GlError::NotOwner {
                    owner: owner.label.clone(),
                    caller: thread_label(),
                })
            }
            None => {
                return Err(GlError::NotOwner {
                    owner: "nobody".to_string(),
                    caller: thread_label(),
                })
            }
        }

        state.owner = state.waiters.pop_front();
        if state.owner.is_some() {
            self.handed_off.notify_all();
        }
        Ok(())
    }

    /// Whether any thread owns the lock.
    pub fn is_held(&self) -> bool {
        self.state.lock().owner.is_some()
    }

    pub fn is_owned_by_current_thread(&self) -> bool {
        let me = thread::current().id();
        self.state.lock().owner.as_ref().is_some_and(|owner| owner.id == me)
    }

    /// Diagnostic name of the owning thread.
    pub fn owner_name(&self) -> Option<String> {
        self.state.lock().owner.as_ref().map(|owner| owner.label.clone())
    }

    /// Number of threads parked in `lock()`.
    pub fn waiting_threads(&self) -> usize {
        self.state.lock().waiters.len()
    }

    pub fn has_waiting_threads(&self) -> bool {
        self.waiting_threads() > 0
    }

    /// Takes effect on the next contended `lock()`.
    pub fn set_fail_fast(&self, enabled: bool) {
        self.fail_fast.store(enabled, Ordering::Release);
    }

    pub fn is_fail_fast(&self) -> bool {
        self.fail_fast.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::time::Duration;

    fn wait_for_waiters(lock: &ContextLock, count: usize) {
        while lock.waiting_threads() < count {
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_lock_unlock() {
        let lock = ContextLock::new(true);
        assert!(!lock.is_held());

        lock.lock().unwrap();
        assert!(lock.is_held());
        assert!(lock.is_owned_by_current_thread());

        lock.unlock().unwrap();
        assert!(!lock.is_held());
    }

    #[test]
    fn test_relock_same_thread_is_illegal() {
        let lock = ContextLock::new(false);
        lock.lock().unwrap();

        let err = lock.lock().unwrap_err();
        assert!(matches!(err, GlError::IllegalState(_)));
        assert!(lock.is_owned_by_current_thread());
    }

    #[test]
    fn test_unlock_by_non_owner() {
        let lock = Arc::new(ContextLock::new(true));
        lock.lock().unwrap();

        let other = lock.clone();
        let err = thread::spawn(move || other.unlock()).join().unwrap().unwrap_err();
        assert!(matches!(err, GlError::NotOwner { .. }));
        assert!(lock.is_owned_by_current_thread());

        let unowned = ContextLock::new(true);
        assert!(matches!(unowned.unlock(), Err(GlError::NotOwner { .. })));
    }

    #[test]
    fn test_fail_fast_contention() {
        let lock = Arc::new(ContextLock::new(true));
        lock.lock().unwrap();

        let other = lock.clone();
        let err = thread::Builder::new()
            .name("contender".to_string())
            .spawn(move || other.lock())
            .unwrap()
            .join()
            .unwrap()
            .unwrap_err();

        match err {
            GlError::LockContention { caller, .. } => assert!(caller.starts_with("contender")),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(lock.is_owned_by_current_thread());
        assert_eq!(lock.waiting_threads(), 0);
    }

    #[test]
    fn test_lock_blocking_ignores_fail_fast() {
        let lock = Arc::new(ContextLock::new(true));
        lock.lock().unwrap();

        let other = lock.clone();
        let waiter = thread::spawn(move || {
            other.lock_blocking().unwrap();
            other.unlock().unwrap();
        });

        wait_for_waiters(&lock, 1);
        lock.unlock().unwrap();
        waiter.join().unwrap();
        assert!(!lock.is_held());
    }

    #[test]
    fn test_fifo_hand_off() {
        let lock = Arc::new(ContextLock::new(false));
        let order = Arc::new(Mutex::new(Vec::new()));
        lock.lock().unwrap();

        let mut handles = Vec::new();
        for id in 0..3 {
            let lock_clone = lock.clone();
            let order_clone = order.clone();
            handles.push(thread::spawn(move || {
                lock_clone.lock().unwrap();
                order_clone.lock().push(id);
                lock_clone.unlock().unwrap();
            }));
            wait_for_waiters(&lock, id + 1);
        }

        lock.unlock().unwrap();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn test_mutual_exclusion() {
        let lock = Arc::new(ContextLock::new(false));
        let inside = Arc::new(AtomicUsize::new(0));
        let acquisitions = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let lock = lock.clone();
                let inside = inside.clone();
                let acquisitions = acquisitions.clone();
                thread::spawn(move || {
                    for _ in 0..200 {
                        lock.lock().unwrap();
                        assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                        inside.fetch_sub(1, Ordering::SeqCst);
                        acquisitions.fetch_add(1, Ordering::SeqCst);
                        lock.unlock().unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(acquisitions.load(Ordering::SeqCst), 8 * 200);
        assert!(!lock.is_held());
    }

    #[test]
    fn test_mode_switch_applies_to_next_lock() {
        let lock = Arc::new(ContextLock::new(true));
        lock.lock().unwrap();
        lock.set_fail_fast(false);
        assert!(!lock.is_fail_fast());

        let other = lock.clone();
        let waiter = thread::spawn(move || {
            other.lock().unwrap();
            other.unlock().unwrap();
        });

        wait_for_waiters(&lock, 1);
        assert_eq!(lock.owner_name().map(|n| n.is_empty()), Some(false));
        lock.unlock().unwrap();
        waiter.join().unwrap();
    }
}
