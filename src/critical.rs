// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Sharing state between foreground code and the USB interrupt.
//!
//! There is exactly one source of concurrency: the USB completion interrupt
//! preempting foreground code. Masking that one interrupt is therefore enough
//! to get exclusive access to anything the interrupt handler touches, without
//! holding off unrelated interrupts.
//!
//! `CriticalSection` is a scoped guard that masks the interrupt and restores
//! the previous mask state when dropped, on every exit path. `IrqMutex` owns
//! the shared value and only hands out `&mut` to it while such a guard is
//! alive.

use core::cell::UnsafeCell;
use core::sync::atomic::{compiler_fence, AtomicBool, Ordering};

/// Masks and unmasks the USB interrupt.
pub trait InterruptMask {
    /// Masks the interrupt, returning whether it was enabled beforehand.
    fn mask(&self) -> bool;

    /// Undoes a `mask`. `was_enabled` is the value `mask` returned, so nested
    /// sections leave the interrupt masked until the outermost one ends.
    fn restore(&self, was_enabled: bool);
}

/// The USB interrupt is masked for as long as this exists.
pub struct CriticalSection<'a, M: InterruptMask + ?Sized> {
    mask: &'a M,
    was_enabled: bool,
}

impl<'a, M: InterruptMask + ?Sized> CriticalSection<'a, M> {
    pub fn enter(mask: &'a M) -> Self {
        let was_enabled = mask.mask();
        // Keep accesses to the shared state from being hoisted above this.
        compiler_fence(Ordering::SeqCst);
        Self { mask, was_enabled }
    }
}

impl<M: InterruptMask + ?Sized> Drop for CriticalSection<'_, M> {
    fn drop(&mut self) {
        compiler_fence(Ordering::SeqCst);
        self.mask.restore(self.was_enabled);
    }
}

/// A value shared between foreground code and the USB interrupt handler.
///
/// Can be created empty in a `static` and filled in once the hardware is up.
pub struct IrqMutex<T, M: InterruptMask> {
    mask: M,
    busy: AtomicBool,
    value: UnsafeCell<Option<T>>,
}

// Safety: all access to `value` goes through `lock`/`try_lock`, which mask
// the only interrupt that can preempt the holder, and refuse re-entry from
// the same context.
unsafe impl<T: Send, M: InterruptMask + Sync> Sync for IrqMutex<T, M> {}

impl<T, M: InterruptMask> IrqMutex<T, M> {
    /// An empty mutex. `lock` panics until `init` is called.
    pub const fn new(mask: M) -> Self {
        Self {
            mask,
            busy: AtomicBool::new(false),
            value: UnsafeCell::new(None),
        }
    }

    pub fn with_value(mask: M, value: T) -> Self {
        Self {
            mask,
            busy: AtomicBool::new(false),
            value: UnsafeCell::new(Some(value)),
        }
    }

    /// Installs the shared value, returning any previous one.
    pub fn init(&self, value: T) -> Option<T> {
        self.with_slot(|slot| slot.replace(value))
    }

    pub fn is_initialized(&self) -> bool {
        self.with_slot(|slot| slot.is_some())
    }

    /// Runs `f` with exclusive access to the value, with the USB interrupt
    /// masked for exactly that long.
    ///
    /// # Panics
    ///
    /// If the mutex is empty, or if `f` tries to lock it again.
    pub fn lock<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        self.with_slot(|slot| match slot.as_mut() {
            Some(value) => f(value),
            None => panic!("IrqMutex locked before init"),
        })
    }

    /// Like `lock`, but returns `None` if the mutex is still empty. Handy in
    /// interrupt handlers that can fire before setup finishes.
    pub fn try_lock<R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        self.with_slot(|slot| slot.as_mut().map(f))
    }

    /// Direct access when nobody else can hold a reference.
    pub fn get_mut(&mut self) -> Option<&mut T> {
        self.value.get_mut().as_mut()
    }

    pub fn into_inner(self) -> Option<T> {
        self.value.into_inner()
    }

    fn with_slot<R>(&self, f: impl FnOnce(&mut Option<T>) -> R) -> R {
        let _cs = CriticalSection::enter(&self.mask);
        // Only foreground code can observe `busy` set here: the interrupt
        // can't run while the section above is held.
        assert!(!self.busy.load(Ordering::Relaxed), "IrqMutex re-entered");
        self.busy.store(true, Ordering::Relaxed);
        let _release = Release(&self.busy);
        // Safety: the interrupt is masked and `busy` rules out a second
        // reference from this context, so this is the only reference.
        let slot = unsafe { &mut *self.value.get() };
        f(slot)
    }
}

struct Release<'a>(&'a AtomicBool);

impl Drop for Release<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Relaxed);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use core::cell::Cell;

    /// Counts mask/restore pairs and tracks the simulated enable bit.
    #[derive(Default)]
    pub struct CountingMask {
        pub enabled: Cell<bool>,
        pub masks: Cell<u32>,
    }

    impl InterruptMask for CountingMask {
        fn mask(&self) -> bool {
            self.masks.set(self.masks.get() + 1);
            self.enabled.replace(false)
        }

        fn restore(&self, was_enabled: bool) {
            self.enabled.set(was_enabled);
        }
    }

    fn enabled_mask() -> CountingMask {
        let m = CountingMask::default();
        m.enabled.set(true);
        m
    }

    #[test]
    fn guard_restores_on_drop() {
        let m = enabled_mask();
        {
            let _cs = CriticalSection::enter(&m);
            assert!(!m.enabled.get());
            {
                let _inner = CriticalSection::enter(&m);
                assert!(!m.enabled.get());
            }
            // Inner restore must not re-enable while the outer is held.
            assert!(!m.enabled.get());
        }
        assert!(m.enabled.get());
    }

    #[test]
    fn guard_restores_on_early_return() {
        fn bail(m: &CountingMask) -> Option<()> {
            let _cs = CriticalSection::enter(m);
            None?;
            Some(())
        }
        let m = enabled_mask();
        assert!(bail(&m).is_none());
        assert!(m.enabled.get());
    }

    #[test]
    fn lock_masks_for_the_duration() {
        let mutex = IrqMutex::with_value(enabled_mask(), 5u32);
        let seen = mutex.lock(|v| {
            *v += 1;
            *v
        });
        assert_eq!(seen, 6);
        assert!(mutex.mask.enabled.get());
        assert_eq!(mutex.mask.masks.get(), 1);
    }

    #[test]
    fn empty_mutex() {
        let mutex: IrqMutex<u8, _> = IrqMutex::new(enabled_mask());
        assert!(!mutex.is_initialized());
        assert_eq!(mutex.try_lock(|v| *v), None);
        assert_eq!(mutex.init(3), None);
        assert_eq!(mutex.try_lock(|v| *v), Some(3));
    }

    #[test]
    #[should_panic(expected = "re-entered")]
    fn reentry_panics() {
        let mutex = IrqMutex::with_value(enabled_mask(), 0u8);
        mutex.lock(|_| mutex.lock(|_| ()));
    }
}
