//! Fixed-capacity ring buffer shared between the capture and router threads

use crate::error::{Result, StreamerError};
use parking_lot::Mutex;

/// Thread-safe circular FIFO with overwrite-on-overflow and zero-fill-on-underflow
///
/// Writers never wait: when a write does not fit, the oldest elements are
/// discarded. Readers never wait either: a read larger than the stored data
/// gets the stored elements followed by `T::default()` padding.
///
/// Every operation takes the single internal lock, so one producer and one
/// consumer (or more) can share an instance through an `Arc`.
pub struct RingBuffer<T> {
    inner: Mutex<Inner<T>>,
    capacity: usize,
}

struct Inner<T> {
    data: Box<[T]>,
    start: usize,
    end: usize,
    /// Distinguishes "full" from "empty" when `start == end`
    has_data: bool,
}

impl<T> Inner<T> {
    fn len(&self) -> usize {
        let capacity = self.data.len();
        if self.end > self.start {
            self.end - self.start
        } else if self.end < self.start {
            self.end + capacity - self.start
        } else if self.has_data {
            capacity
        } else {
            0
        }
    }
}

impl<T: Copy + Default> RingBuffer<T> {
    /// Create an empty ring buffer holding up to `capacity` elements
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(StreamerError::InvalidConfig(
                "ring buffer capacity must be non-zero".to_string(),
            ));
        }

        Ok(Self {
            inner: Mutex::new(Inner {
                data: vec![T::default(); capacity].into_boxed_slice(),
                start: 0,
                end: 0,
                has_data: false,
            }),
            capacity,
        })
    }

    /// Maximum number of elements the buffer can hold
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of elements currently stored
    pub fn current_length(&self) -> usize {
        self.inner.lock().len()
    }

    /// Check if nothing is stored
    pub fn is_empty(&self) -> bool {
        self.current_length() == 0
    }

    /// Append all of `source`, discarding the oldest data if it does not fit
    ///
    /// Returns the number of old elements that were dropped to make room.
    /// A source longer than the whole buffer is rejected.
    pub fn copy_from(&self, source: &[T]) -> Result<usize> {
        let length = source.len();
        if length > self.capacity {
            return Err(StreamerError::CapacityExceeded {
                requested: length,
                capacity: self.capacity,
            });
        }
        if length == 0 {
            return Ok(0);
        }

        let capacity = self.capacity;
        let mut inner = self.inner.lock();

        let overflow = (inner.len() + length).saturating_sub(capacity);

        let end = inner.end;
        if end + length > capacity {
            let head = capacity - end;
            inner.data[end..].copy_from_slice(&source[..head]);
            inner.data[..length - head].copy_from_slice(&source[head..]);
            inner.end = length - head;
        } else {
            inner.data[end..end + length].copy_from_slice(source);
            inner.end = (end + length) % capacity;
        }

        inner.start = (inner.start + overflow) % capacity;
        inner.has_data = true;

        Ok(overflow)
    }

    /// Remove up to `destination.len()` elements from the front into `destination`
    ///
    /// Returns the number of stored elements copied. Any shortfall is
    /// zero-filled at the tail of `destination` and leaves the buffer empty.
    pub fn copy_to(&self, destination: &mut [T]) -> usize {
        let length = destination.len();
        if length == 0 {
            return 0;
        }

        let capacity = self.capacity;
        let mut inner = self.inner.lock();

        let take = length.min(inner.len());
        let start = inner.start;

        if take > 0 {
            if start + take > capacity {
                let head = capacity - start;
                destination[..head].copy_from_slice(&inner.data[start..]);
                destination[head..take].copy_from_slice(&inner.data[..take - head]);
                inner.start = take - head;
            } else {
                destination[..take].copy_from_slice(&inner.data[start..start + take]);
                inner.start = (start + take) % capacity;
            }
        }

        if take < length {
            destination[take..].fill(T::default());
            inner.has_data = false;
        } else if inner.start == inner.end {
            inner.has_data = false;
        }

        take
    }

    /// Remove `length` elements into `destination[offset..offset + length]`
    ///
    /// Same underflow behavior as [`RingBuffer::copy_to`]. A range that runs
    /// past the end of `destination` is clamped to it.
    pub fn copy_to_offset(&self, destination: &mut [T], offset: usize, length: usize) -> usize {
        let start = offset.min(destination.len());
        let end = offset.saturating_add(length).min(destination.len());
        self.copy_to(&mut destination[start..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_basic_write_read() {
        let buffer = RingBuffer::<u8>::new(16).unwrap();

        buffer.copy_from(&[1, 2, 3, 4, 5]).unwrap();
        assert_eq!(buffer.current_length(), 5);

        let mut out = [0u8; 5];
        assert_eq!(buffer.copy_to(&mut out), 5);
        assert_eq!(out, [1, 2, 3, 4, 5]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_wrap_around() {
        let buffer = RingBuffer::<u8>::new(8).unwrap();

        buffer.copy_from(&[1, 2, 3, 4, 5, 6]).unwrap();

        let mut out = [0u8; 4];
        buffer.copy_to(&mut out);
        assert_eq!(out, [1, 2, 3, 4]);

        // Wraps across the end of the backing array
        buffer.copy_from(&[7, 8, 9, 10]).unwrap();
        assert_eq!(buffer.current_length(), 6);

        let mut out = [0u8; 6];
        assert_eq!(buffer.copy_to(&mut out), 6);
        assert_eq!(out, [5, 6, 7, 8, 9, 10]);
    }

    #[test]
    fn test_overflow_keeps_last_capacity_elements() {
        let capacity = 8;
        for extra in 1..=8usize {
            let buffer = RingBuffer::<u16>::new(capacity).unwrap();
            let data: Vec<u16> = (1..=(capacity + extra) as u16).collect();

            // Two writes so the overflow path sees a non-empty buffer
            let split = data.len() - capacity.min(data.len() / 2 + 1);
            buffer.copy_from(&data[..split]).unwrap();
            let dropped = buffer.copy_from(&data[split..]).unwrap();
            assert_eq!(dropped, extra);
            assert_eq!(buffer.current_length(), capacity);

            let mut out = vec![0u16; capacity];
            assert_eq!(buffer.copy_to(&mut out), capacity);
            assert_eq!(out, data[extra..].to_vec());
        }
    }

    #[test]
    fn test_exactly_full_is_not_empty() {
        let buffer = RingBuffer::<u8>::new(4).unwrap();
        assert_eq!(buffer.copy_from(&[1, 2, 3, 4]).unwrap(), 0);
        assert_eq!(buffer.current_length(), 4);

        let mut out = [0u8; 4];
        buffer.copy_to(&mut out);
        assert_eq!(out, [1, 2, 3, 4]);
        assert_eq!(buffer.current_length(), 0);
    }

    #[test]
    fn test_underflow_zero_fills() {
        let buffer = RingBuffer::<i16>::new(8).unwrap();
        buffer.copy_from(&[7, -7, 9]).unwrap();

        let mut out = [1i16; 6];
        assert_eq!(buffer.copy_to(&mut out), 3);
        assert_eq!(out, [7, -7, 9, 0, 0, 0]);
        assert_eq!(buffer.current_length(), 0);

        // Empty buffer reads as silence
        let mut out = [5i16; 2];
        assert_eq!(buffer.copy_to(&mut out), 0);
        assert_eq!(out, [0, 0]);
        assert_eq!(buffer.current_length(), 0);
    }

    #[test]
    fn test_copy_to_offset() {
        let buffer = RingBuffer::<u8>::new(8).unwrap();
        buffer.copy_from(&[0xAA, 0xBB]).unwrap();

        let mut out = [0xFFu8; 6];
        assert_eq!(buffer.copy_to_offset(&mut out, 2, 3), 2);
        assert_eq!(out, [0xFF, 0xFF, 0xAA, 0xBB, 0x00, 0xFF]);
    }

    #[test]
    fn test_copy_to_offset_clamps_range() {
        let buffer = RingBuffer::<u8>::new(8).unwrap();
        buffer.copy_from(&[1, 2, 3, 4]).unwrap();

        let mut out = [0u8; 4];
        assert_eq!(buffer.copy_to_offset(&mut out, 2, 5), 2);
        assert_eq!(out, [0, 0, 1, 2]);
        assert_eq!(buffer.current_length(), 2);

        assert_eq!(buffer.copy_to_offset(&mut out, 9, 2), 0);
        assert_eq!(buffer.copy_to_offset(&mut out, usize::MAX, 2), 0);
        assert_eq!(buffer.current_length(), 2);
    }

    #[test]
    fn test_oversized_write_rejected() {
        let buffer = RingBuffer::<u8>::new(4).unwrap();
        buffer.copy_from(&[1, 2]).unwrap();

        let err = buffer.copy_from(&[0; 5]).unwrap_err();
        assert!(matches!(
            err,
            StreamerError::CapacityExceeded {
                requested: 5,
                capacity: 4
            }
        ));
        // Untouched by the failed write
        assert_eq!(buffer.current_length(), 2);
    }

    #[test]
    fn test_zero_length_operations_keep_state() {
        let buffer = RingBuffer::<u8>::new(4).unwrap();
        buffer.copy_from(&[]).unwrap();
        assert_eq!(buffer.current_length(), 0);

        buffer.copy_from(&[1, 2, 3, 4]).unwrap();
        assert_eq!(buffer.copy_to(&mut []), 0);
        assert_eq!(buffer.current_length(), 4);
    }

    #[test]
    fn test_length_never_exceeds_capacity() {
        let buffer = RingBuffer::<u8>::new(13).unwrap();
        let mut out = [0u8; 5];

        for round in 0..200usize {
            let len = (round * 7) % 14;
            buffer.copy_from(&vec![round as u8; len]).unwrap();
            assert!(buffer.current_length() <= buffer.capacity());

            if round % 3 == 0 {
                buffer.copy_to(&mut out[..round % 6]);
                assert!(buffer.current_length() <= buffer.capacity());
            }
        }
    }

    #[test]
    fn test_concurrent_producer_consumer_preserves_order() {
        let buffer = Arc::new(RingBuffer::<u32>::new(4096).unwrap());
        let total = 20_000u32;

        let producer_buffer = buffer.clone();
        let producer = thread::spawn(move || {
            let mut next = 0u32;
            while next < total {
                let chunk: Vec<u32> = (next..(next + 16).min(total)).collect();
                // Never overflows: consumer keeps up long before 4096
                while producer_buffer.current_length() + chunk.len() > 4096 {
                    thread::yield_now();
                }
                producer_buffer.copy_from(&chunk).unwrap();
                next += chunk.len() as u32;
            }
        });

        let mut received = Vec::with_capacity(total as usize);
        let mut out = [0u32; 16];
        while received.len() < total as usize {
            let available = buffer.current_length().min(out.len());
            if available == 0 {
                thread::yield_now();
                continue;
            }
            let read = buffer.copy_to(&mut out[..available]);
            received.extend_from_slice(&out[..read]);
        }

        producer.join().unwrap();
        let expected: Vec<u32> = (0..total).collect();
        assert_eq!(received, expected);
    }
}
