//! Byte ring between the UART receive interrupt and task context.
//!
//! Every access runs inside a critical section, so the producer side may be called from the
//! interrupt handler while a task drains the consumer side. This is independent from the
//! async task-level locks used for shared controller state.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;

/// Returned by [`ByteQueue::write_from_interrupt`] when the byte was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct QueueFull;

/// Returned by [`ByteQueue::read`] when no byte is pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct QueueEmpty;

struct Ring<const N: usize> {
    buf: [u8; N],
    head: usize,
    tail: usize,
    len: usize,
}

impl<const N: usize> Ring<N> {
    fn push(&mut self, byte: u8) -> Result<(), QueueFull> {
        if self.len == N {
            return Err(QueueFull);
        }
        self.buf[self.tail] = byte;
        self.tail = (self.tail + 1) % N;
        self.len += 1;
        Ok(())
    }

    fn pop(&mut self) -> Option<u8> {
        if self.len == 0 {
            return None;
        }
        let byte = self.buf[self.head];
        self.head = (self.head + 1) % N;
        self.len -= 1;
        Some(byte)
    }
}

/// Fixed-capacity single-producer/single-consumer byte queue.
pub struct ByteQueue<const N: usize> {
    ring: Mutex<CriticalSectionRawMutex, RefCell<Ring<N>>>,
}

impl<const N: usize> ByteQueue<N> {
    pub const fn new() -> Self {
        Self {
            ring: Mutex::new(RefCell::new(Ring {
                buf: [0; N],
                head: 0,
                tail: 0,
                len: 0,
            })),
        }
    }

    /// Appends one byte; when the queue is full the new byte is dropped.
    pub fn write_from_interrupt(&self, byte: u8) -> Result<(), QueueFull> {
        self.ring.lock(|ring| ring.borrow_mut().push(byte))
    }

    /// Takes the oldest byte without waiting.
    pub fn read(&self) -> Result<u8, QueueEmpty> {
        self.ring.lock(|ring| ring.borrow_mut().pop()).ok_or(QueueEmpty)
    }

    /// Moves up to `out.len()` bytes into `out` in one critical section and returns how many
    /// were copied.
    pub fn read_many(&self, out: &mut [u8]) -> usize {
        self.ring.lock(|ring| {
            let mut ring = ring.borrow_mut();
            let mut count = 0;
            for slot in out.iter_mut() {
                match ring.pop() {
                    Some(byte) => *slot = byte,
                    None => break,
                }
                count += 1;
            }
            count
        })
    }

    pub fn len(&self) -> usize {
        self.ring.lock(|ring| ring.borrow().len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub const fn capacity(&self) -> usize {
        N
    }
}

impl<const N: usize> Default for ByteQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}
