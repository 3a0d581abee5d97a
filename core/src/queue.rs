//! Thread-safe measurement queues and producer handles.
//!
//! Every sensor stream gets its own FIFO guarded by a dedicated mutex.
//! Producer threads push through a borrowed [`QueueHandle`]; the estimator,
//! which owns the queue, drains it. Critical sections are limited to a single
//! push, pop, or peek — callers never hold the mutex while doing filter math,
//! and no operation takes two queue locks at once.
//!
//! Queues may be bounded. When a bounded queue overflows, the oldest element
//! is evicted to make room and the eviction is counted; producers never block
//! and measurements are never dropped silently.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use log::warn;

/// A mutex-guarded FIFO of measurements for one sensor stream.
#[derive(Debug)]
pub struct SensorQueue<M> {
    buffer: Mutex<VecDeque<M>>,
    capacity: Option<usize>,
    evictions: AtomicU64,
}

impl<M> Default for SensorQueue<M> {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl<M> SensorQueue<M> {
    /// Create a queue with no capacity bound.
    pub fn unbounded() -> Self {
        SensorQueue {
            buffer: Mutex::new(VecDeque::new()),
            capacity: None,
            evictions: AtomicU64::new(0),
        }
    }

    /// Create a queue that holds at most `capacity` elements, evicting the
    /// oldest entry on overflow.
    pub fn bounded(capacity: usize) -> Self {
        SensorQueue {
            buffer: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: Some(capacity),
            evictions: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<M>> {
        // A producer that panicked mid-push leaves the deque intact, so the
        // poisoned guard is still safe to use.
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a measurement. If the queue is bounded and full, the oldest
    /// element is evicted and counted.
    pub fn push(&self, measurement: M) {
        let mut buffer = self.lock();
        if let Some(capacity) = self.capacity {
            if buffer.len() >= capacity {
                let _ = buffer.pop_front();
                let total = self.evictions.fetch_add(1, Ordering::Relaxed) + 1;
                warn!("sensor queue overflow, oldest entry evicted ({} total)", total);
            }
        }
        buffer.push_back(measurement);
    }

    /// Remove and return the oldest measurement.
    pub fn pop(&self) -> Option<M> {
        self.lock().pop_front()
    }

    /// Number of queued measurements.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Remove every queued measurement, preserving order.
    pub fn take_all(&self) -> Vec<M> {
        let mut buffer = self.lock();
        buffer.drain(..).collect()
    }

    /// Discard all queued measurements.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Number of elements evicted due to overflow since construction.
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }
}

impl<M: Clone> SensorQueue<M> {
    /// Clone of the oldest measurement without removing it.
    pub fn front(&self) -> Option<M> {
        self.lock().front().cloned()
    }
}

impl<M> SensorQueue<M>
where
    M: crate::measurements::Stamped,
{
    /// Pop every measurement with a timestamp at or before `time`.
    pub fn pop_until(&self, time: f64) -> Vec<M> {
        let mut buffer = self.lock();
        let mut drained = Vec::new();
        while buffer.front().map(|m| m.time() <= time).unwrap_or(false) {
            if let Some(m) = buffer.pop_front() {
                drained.push(m);
            }
        }
        drained
    }
}

/// Borrowed producer endpoint for a [`SensorQueue`].
///
/// The estimator owns the queue; producers receive a handle that carries the
/// queue (and therefore its mutex) by reference. Handles are `Copy` so a
/// single queue can feed several producer threads inside a scoped spawn.
#[derive(Debug)]
pub struct QueueHandle<'a, M> {
    queue: &'a SensorQueue<M>,
}

impl<M> Clone for QueueHandle<'_, M> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<M> Copy for QueueHandle<'_, M> {}

impl<'a, M> QueueHandle<'a, M> {
    pub fn new(queue: &'a SensorQueue<M>) -> Self {
        QueueHandle { queue }
    }

    /// Push a measurement into the underlying queue.
    pub fn push(&self, measurement: M) {
        self.queue.push(measurement);
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Overflow evictions recorded by the underlying queue.
    pub fn evictions(&self) -> u64 {
        self.queue.evictions()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurements::ImuMeasurement;
    use nalgebra::Vector3;
    use std::thread;

    fn imu(t: f64) -> ImuMeasurement {
        ImuMeasurement::new(t, Vector3::zeros(), Vector3::zeros())
    }

    #[test]
    fn fifo_order_is_preserved() {
        let queue = SensorQueue::unbounded();
        for i in 0..10 {
            queue.push(imu(i as f64));
        }
        for i in 0..10 {
            assert_eq!(queue.pop().unwrap().time, i as f64);
        }
        assert!(queue.is_empty());
    }

    #[test]
    fn bounded_queue_evicts_oldest_and_counts() {
        let queue = SensorQueue::bounded(3);
        for i in 0..5 {
            queue.push(imu(i as f64));
        }
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.evictions(), 2);
        // Oldest survivors are 2, 3, 4.
        assert_eq!(queue.pop().unwrap().time, 2.0);
    }

    #[test]
    fn front_does_not_consume() {
        let queue = SensorQueue::unbounded();
        queue.push(imu(1.0));
        assert_eq!(queue.front().unwrap().time, 1.0);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn pop_until_respects_timestamps() {
        let queue = SensorQueue::unbounded();
        for t in [0.1, 0.2, 0.3, 0.9] {
            queue.push(imu(t));
        }
        let drained = queue.pop_until(0.35);
        assert_eq!(drained.len(), 3);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.front().unwrap().time, 0.9);
    }

    #[test]
    fn take_all_empties_the_queue() {
        let queue = SensorQueue::unbounded();
        for t in [1.0, 2.0] {
            queue.push(imu(t));
        }
        let all = queue.take_all();
        assert_eq!(all.len(), 2);
        assert!(queue.is_empty());
    }

    #[test]
    fn concurrent_producers_lose_nothing() {
        let queue = SensorQueue::unbounded();
        thread::scope(|scope| {
            for producer in 0..4 {
                let handle = QueueHandle::new(&queue);
                scope.spawn(move || {
                    for i in 0..250 {
                        handle.push(imu((producer * 1000 + i) as f64));
                    }
                });
            }
        });
        assert_eq!(queue.len(), 1000);
        assert_eq!(queue.evictions(), 0);
    }

    #[test]
    fn per_producer_order_is_preserved() {
        let queue = SensorQueue::unbounded();
        thread::scope(|scope| {
            let handle = QueueHandle::new(&queue);
            scope.spawn(move || {
                for i in 0..100 {
                    handle.push(imu(i as f64));
                }
            });
        });
        let drained = queue.take_all();
        for (i, m) in drained.iter().enumerate() {
            assert_eq!(m.time, i as f64);
        }
    }
}
