//! Real-time-safe event logging.
//!
//! The `log` facade can allocate and lock, so the processing path never
//! calls it. `aec_log!` formats into a fixed-size event on the caller's stack
//! and hands it to a bounded lock-free queue. Several engines may run on
//! different audio threads, so the queue takes any number of producers. A
//! non-realtime thread calls `drain()` to forward queued events to
//! `log::debug!`.
//!
//! Without the `debug` feature the macro and `drain()` are no-ops.

use std::fmt;

#[cfg(feature = "debug")]
mod queue {
    use std::cell::UnsafeCell;
    use std::fmt::{self, Write};
    use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
    use std::sync::OnceLock;

    const QUEUE_DEPTH: usize = 256;
    pub(super) const TEXT_MAX: usize = 200;

    /// One formatted message. Text past `TEXT_MAX` bytes is cut on a char
    /// boundary.
    #[derive(Clone, Copy)]
    pub(super) struct Event {
        text: [u8; TEXT_MAX],
        len: usize,
    }

    impl Event {
        const EMPTY: Event = Event {
            text: [0; TEXT_MAX],
            len: 0,
        };

        pub(super) fn format(args: fmt::Arguments) -> Self {
            let mut event = Self::EMPTY;
            let _ = event.write_fmt(args);
            event
        }

        pub(super) fn as_str(&self) -> &str {
            std::str::from_utf8(&self.text[..self.len]).unwrap_or("<invalid utf-8>")
        }
    }

    impl Write for Event {
        fn write_str(&mut self, s: &str) -> fmt::Result {
            let mut n = s.len().min(TEXT_MAX - self.len);
            while !s.is_char_boundary(n) {
                n -= 1;
            }
            self.text[self.len..self.len + n].copy_from_slice(&s.as_bytes()[..n]);
            self.len += n;
            Ok(())
        }
    }

    struct Slot {
        /// `pos` while free for the writer of position `pos`,
        /// `pos + 1` once that writer's event is in place.
        stamp: AtomicUsize,
        event: UnsafeCell<Event>,
    }

    /// Bounded queue with sequence-stamped slots. Writers and readers each
    /// claim a position with a CAS, so any thread may push or pop.
    pub(super) struct EventQueue {
        slots: Box<[Slot]>,
        mask: usize,
        enqueue_pos: AtomicUsize,
        dequeue_pos: AtomicUsize,
        dropped: AtomicU64,
    }

    // A slot's event is only touched by the thread that claimed its position,
    // and handed over through the slot stamp.
    unsafe impl Sync for EventQueue {}

    impl EventQueue {
        /// Depth is rounded up to a power of two, at least 2.
        pub(super) fn with_depth(depth: usize) -> Self {
            let depth = depth.max(2).next_power_of_two();
            let slots: Vec<Slot> = (0..depth)
                .map(|i| Slot {
                    stamp: AtomicUsize::new(i),
                    event: UnsafeCell::new(Event::EMPTY),
                })
                .collect();
            Self {
                slots: slots.into_boxed_slice(),
                mask: depth - 1,
                enqueue_pos: AtomicUsize::new(0),
                dequeue_pos: AtomicUsize::new(0),
                dropped: AtomicU64::new(0),
            }
        }

        /// Queue a copy of `event`. A full queue drops it and returns false.
        pub(super) fn push(&self, event: &Event) -> bool {
            let mut pos = self.enqueue_pos.load(Ordering::Relaxed);
            loop {
                let slot = &self.slots[pos & self.mask];
                let stamp = slot.stamp.load(Ordering::Acquire);
                let lead = stamp.wrapping_sub(pos) as isize;

                if lead == 0 {
                    match self.enqueue_pos.compare_exchange_weak(
                        pos,
                        pos.wrapping_add(1),
                        Ordering::Relaxed,
                        Ordering::Relaxed,
                    ) {
                        Ok(_) => {
                            // SAFETY: the CAS made this thread the only writer of
                            // `pos`; readers wait for the stamp below.
                            unsafe { *slot.event.get() = *event };
                            slot.stamp.store(pos.wrapping_add(1), Ordering::Release);
                            return true;
                        }
                        Err(current) => pos = current,
                    }
                } else if lead < 0 {
                    // Slot still holds the event from one lap ago
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    return false;
                } else {
                    pos = self.enqueue_pos.load(Ordering::Relaxed);
                }
            }
        }

        pub(super) fn pop(&self) -> Option<Event> {
            let mut pos = self.dequeue_pos.load(Ordering::Relaxed);
            loop {
                let slot = &self.slots[pos & self.mask];
                let stamp = slot.stamp.load(Ordering::Acquire);
                let lead = stamp.wrapping_sub(pos.wrapping_add(1)) as isize;

                if lead == 0 {
                    match self.dequeue_pos.compare_exchange_weak(
                        pos,
                        pos.wrapping_add(1),
                        Ordering::Relaxed,
                        Ordering::Relaxed,
                    ) {
                        Ok(_) => {
                            // SAFETY: the stamp says the writer finished and the
                            // CAS made this thread the only reader of `pos`.
                            let event = unsafe { *slot.event.get() };
                            slot.stamp
                                .store(pos.wrapping_add(self.slots.len()), Ordering::Release);
                            return Some(event);
                        }
                        Err(current) => pos = current,
                    }
                } else if lead < 0 {
                    return None;
                } else {
                    pos = self.dequeue_pos.load(Ordering::Relaxed);
                }
            }
        }

        pub(super) fn take_dropped(&self) -> u64 {
            self.dropped.swap(0, Ordering::Relaxed)
        }
    }

    static QUEUE: OnceLock<EventQueue> = OnceLock::new();
    static ENABLED: AtomicBool = AtomicBool::new(false);

    pub(super) fn init() {
        QUEUE.get_or_init(|| EventQueue::with_depth(QUEUE_DEPTH));
        ENABLED.store(true, Ordering::Release);
    }

    pub(super) fn record(args: fmt::Arguments) {
        if !ENABLED.load(Ordering::Acquire) {
            return;
        }
        if let Some(queue) = QUEUE.get() {
            queue.push(&Event::format(args));
        }
    }

    pub(super) fn drain() -> usize {
        let queue = match QUEUE.get() {
            Some(q) => q,
            None => return 0,
        };

        let mut n = 0;
        while let Some(event) = queue.pop() {
            log::debug!(target: "duplex_aec::rt", "{}", event.as_str());
            n += 1;
        }
        let dropped = queue.take_dropped();
        if dropped > 0 {
            log::warn!(target: "duplex_aec::rt", "{} real-time events dropped, queue full", dropped);
        }
        n
    }

}

/// Allocate the shared event queue. Engines call this at construction, off
/// the processing thread.
#[cfg(feature = "debug")]
pub fn init() {
    queue::init();
}

#[cfg(not(feature = "debug"))]
pub fn init() {}

#[cfg(feature = "debug")]
#[doc(hidden)]
pub fn aec_log_inner(args: fmt::Arguments) {
    queue::record(args);
}

#[cfg(not(feature = "debug"))]
#[doc(hidden)]
pub fn aec_log_inner(_args: fmt::Arguments) {}

/// Forward queued real-time events to the `log` facade. Returns the number
/// forwarded.
#[cfg(feature = "debug")]
pub fn drain() -> usize {
    queue::drain()
}

#[cfg(not(feature = "debug"))]
pub fn drain() -> usize {
    0
}

#[macro_export]
macro_rules! aec_log {
    ($($arg:tt)*) => {
        $crate::debug::aec_log_inner(format_args!($($arg)*))
    };
}
