//! Small synchronization helpers shared by the tasks.
//!
//! Everything here builds on a critical section, so all of it is safe to
//! touch from interrupt handlers as well as tasks.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::signal::Signal;
use embassy_time::{with_timeout, Duration};
use portable_atomic::{AtomicU32, Ordering};

/// Shared mutable value guarded by a critical section. Accesses are O(1)
/// copies, so holding the section is always brief.
pub struct SharedCell<T> {
    inner: Mutex<CriticalSectionRawMutex, RefCell<T>>,
}

impl<T> SharedCell<T> {
    pub const fn new(value: T) -> Self {
        Self { inner: Mutex::new(RefCell::new(value)) }
    }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.inner.lock(|cell| f(&cell.borrow()))
    }

    pub fn with_mut<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        self.inner.lock(|cell| f(&mut cell.borrow_mut()))
    }
}

impl<T: Copy> SharedCell<T> {
    pub fn get(&self) -> T {
        self.with(|v| *v)
    }

    pub fn set(&self, value: T) {
        self.with_mut(|v| *v = value);
    }
}

/// Bit-set notification word with a wakeup signal, the moral equivalent
/// of an RTOS task notification used in set-bits mode. Senders OR bits
/// in; the single receiving task accumulates them across waits and clears
/// what it has consumed.
pub struct Notifier {
    bits: AtomicU32,
    signal: Signal<CriticalSectionRawMutex, ()>,
}

impl Notifier {
    pub const fn new() -> Self {
        Self { bits: AtomicU32::new(0), signal: Signal::new() }
    }

    /// ORs `bits` into the word and wakes the receiver.
    pub fn notify(&self, bits: u32) {
        self.bits.fetch_or(bits, Ordering::Release);
        self.signal.signal(());
    }

    /// Currently accumulated bits, without consuming anything.
    pub fn value(&self) -> u32 {
        self.bits.load(Ordering::Acquire)
    }

    /// Clears `mask` and reports which of those bits were set.
    pub fn take(&self, mask: u32) -> u32 {
        self.bits.fetch_and(!mask, Ordering::AcqRel) & mask
    }

    /// Clears the whole word and any pending wakeup.
    pub fn clear(&self) {
        self.bits.store(0, Ordering::Release);
        self.signal.reset();
    }

    /// Waits until at least one bit of `mask` is set, then consumes
    /// exactly those bits.
    pub async fn wait_for(&self, mask: u32) -> u32 {
        loop {
            let taken = self.take(mask);
            if taken != 0 {
                return taken;
            }
            self.signal.wait().await;
        }
    }

    /// Bounded check for `mask`, consuming the bits when present. Used
    /// where the original polled its notification word with a short
    /// timeout between work cycles.
    pub async fn poll(&self, mask: u32, timeout: Duration) -> bool {
        if self.value() & mask == 0 {
            let _ = with_timeout(timeout, self.signal.wait()).await;
        }
        self.take(mask) != 0
    }

    /// Waits for a wakeup without consuming bits; the caller inspects
    /// [`Notifier::value`] itself. Returns false on timeout.
    pub async fn wait_signal(&self, timeout: Duration) -> bool {
        with_timeout(timeout, self.signal.wait()).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_futures::block_on;

    #[test]
    fn shared_cell_copies_in_and_out() {
        let cell = SharedCell::new(5u32);
        assert_eq!(cell.get(), 5);
        cell.set(7);
        assert_eq!(cell.with(|v| *v + 1), 8);
        cell.with_mut(|v| *v *= 2);
        assert_eq!(cell.get(), 14);
    }

    #[test]
    fn notifier_accumulates_bits_across_notifies() {
        let notifier = Notifier::new();
        notifier.notify(0b010);
        notifier.notify(0b100);
        assert_eq!(notifier.value(), 0b110);
    }

    #[test]
    fn take_only_clears_requested_bits() {
        let notifier = Notifier::new();
        notifier.notify(0b011);
        assert_eq!(notifier.take(0b001), 0b001);
        assert_eq!(notifier.value(), 0b010);
        assert_eq!(notifier.take(0b001), 0);
    }

    #[test]
    fn wait_for_returns_already_set_bits() {
        let notifier = Notifier::new();
        notifier.notify(0b100);
        assert_eq!(block_on(notifier.wait_for(0b100)), 0b100);
    }

    #[test]
    fn poll_times_out_without_bits() {
        let notifier = Notifier::new();
        assert!(!block_on(notifier.poll(0b1, Duration::from_millis(1))));
        notifier.notify(0b1);
        assert!(block_on(notifier.poll(0b1, Duration::from_millis(1))));
    }
}
