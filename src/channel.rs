//!# Bounded channel
//!
//! Hands items from the interrupt context to the host. Both ends take `&self`,
//! the queue is only touched inside a critical section.
use core::cell::RefCell;
use critical_section::Mutex;
use heapless::Deque;

pub struct Channel<T, const N: usize> {
    queue: Mutex<RefCell<Deque<T, N>>>,
}

impl<T, const N: usize> Channel<T, N> {
    pub const fn new() -> Self {
        Self {
            queue: Mutex::new(RefCell::new(Deque::new())),
        }
    }

    /// Enqueues the item, hands it back if the channel is full
    pub fn send(&self, item: T) -> Result<(), T> {
        critical_section::with(|cs| self.queue.borrow_ref_mut(cs).push_back(item))
    }

    pub fn recv(&self) -> Option<T> {
        critical_section::with(|cs| self.queue.borrow_ref_mut(cs).pop_front())
    }

    pub fn len(&self) -> usize {
        critical_section::with(|cs| self.queue.borrow_ref(cs).len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        critical_section::with(|cs| self.queue.borrow_ref_mut(cs).clear())
    }
}

impl<T, const N: usize> Default for Channel<T, N> {
    fn default() -> Self {
        Self::new()
    }
}
