//! Lock-free single-producer/single-consumer hand-off channel.
//!
//! The connection processor moves command groups into its background worker and output buffers
//! back out of it over two of these channels. Both directions are strictly single-writer, so the
//! queue is a linked list of heap nodes published with one atomic pointer store per send and
//! consumed with one atomic pointer load per receive. No allocation happens on receive and no
//! CAS loop exists on either side.
//!
//! Receive may block. Blocking is spin-free: the consumer parks its thread and the producer
//! unparks it after publishing, with a seq-cst fence pair closing the store/load race between
//! "publish then check parked" and "mark parked then check queue".

use std::ptr;
use std::sync::atomic::{fence, AtomicBool, AtomicPtr, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, Thread};
use std::time::{Duration, Instant};

struct Node<T> {
    value: Option<T>,
    next: AtomicPtr<Node<T>>,
}

impl<T> Node<T> {
    fn boxed(value: Option<T>) -> *mut Self {
        Box::into_raw(Box::new(Self {
            value,
            next: AtomicPtr::new(ptr::null_mut()),
        }))
    }
}

struct Shared<T> {
    /// Mirror of the consumer cursor, read only by whichever half drops last.
    cleanup_head: AtomicPtr<Node<T>>,
    halves_alive: AtomicU8,
    receiver_thread: OnceLock<Thread>,
    receiver_parked: AtomicBool,
}

/// Producing half of the channel.
pub struct Sender<T> {
    shared: Arc<Shared<T>>,
    tail: *mut Node<T>,
}

/// Consuming half of the channel.
pub struct Receiver<T> {
    shared: Arc<Shared<T>>,
    head: *mut Node<T>,
}

// SAFETY: each half is used by exactly one thread at a time and the node pointers they carry
// are only dereferenced by their owning side (producer: tail, consumer: head and behind).
unsafe impl<T: Send> Send for Sender<T> {}
// SAFETY: see `Sender`.
unsafe impl<T: Send> Send for Receiver<T> {}

/// Creates a connected sender/receiver pair around one stub node.
#[must_use]
pub fn channel<T>() -> (Sender<T>, Receiver<T>) {
    let stub = Node::<T>::boxed(None);
    let shared = Arc::new(Shared {
        cleanup_head: AtomicPtr::new(stub),
        halves_alive: AtomicU8::new(2),
        receiver_thread: OnceLock::new(),
        receiver_parked: AtomicBool::new(false),
    });
    (
        Sender {
            shared: Arc::clone(&shared),
            tail: stub,
        },
        Receiver { shared, head: stub },
    )
}

impl<T> Sender<T> {
    /// Publishes one value. Wait-free: one allocation plus one release store.
    pub fn send(&mut self, value: T) {
        let node = Node::boxed(Some(value));
        // SAFETY: `tail` is the most recently published node (or the stub); only the producer
        // ever stores to its `next` field.
        unsafe {
            (*self.tail).next.store(node, Ordering::Release);
        }
        self.tail = node;

        fence(Ordering::SeqCst);
        if self.shared.receiver_parked.load(Ordering::Relaxed) {
            if let Some(receiver) = self.shared.receiver_thread.get() {
                receiver.unpark();
            }
        }
    }
}

impl<T> Receiver<T> {
    /// Takes the next value if one has been published.
    pub fn try_recv(&mut self) -> Option<T> {
        // SAFETY: `head` is owned by the consumer; its `next` field is only written once, by
        // the producer, with release ordering.
        let next = unsafe { (*self.head).next.load(Ordering::Acquire) };
        if next.is_null() {
            return None;
        }

        // SAFETY: the acquire load above synchronizes with the release store that published
        // `next`, so the node is fully initialized. Published nodes always carry a value.
        let value = unsafe { (*next).value.take() };
        let consumed = self.head;
        self.head = next;
        self.shared.cleanup_head.store(next, Ordering::Release);
        // SAFETY: `consumed` came from `Node::boxed` and is no longer reachable from either
        // half: the consumer cursor moved past it and the producer never walks backwards.
        drop(unsafe { Box::from_raw(consumed) });
        value
    }

    /// Blocks until a value is available.
    pub fn recv(&mut self) -> T {
        loop {
            if let Some(value) = self.try_recv() {
                return value;
            }
            let _ = self.shared.receiver_thread.get_or_init(thread::current);
            self.shared.receiver_parked.store(true, Ordering::Relaxed);
            fence(Ordering::SeqCst);
            if let Some(value) = self.try_recv() {
                self.shared.receiver_parked.store(false, Ordering::Relaxed);
                return value;
            }
            thread::park();
            self.shared.receiver_parked.store(false, Ordering::Relaxed);
        }
    }

    /// Blocks until a value is available or the timeout elapses.
    pub fn recv_timeout(&mut self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(value) = self.try_recv() {
                return Some(value);
            }
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                return None;
            };
            let _ = self.shared.receiver_thread.get_or_init(thread::current);
            self.shared.receiver_parked.store(true, Ordering::Relaxed);
            fence(Ordering::SeqCst);
            if let Some(value) = self.try_recv() {
                self.shared.receiver_parked.store(false, Ordering::Relaxed);
                return Some(value);
            }
            thread::park_timeout(remaining);
            self.shared.receiver_parked.store(false, Ordering::Relaxed);
        }
    }
}

fn release_half<T>(shared: &Shared<T>) {
    if shared.halves_alive.fetch_sub(1, Ordering::AcqRel) != 1 {
        return;
    }
    // Last half standing owns every remaining node, consumed cursor included.
    let mut node = shared.cleanup_head.load(Ordering::Acquire);
    while !node.is_null() {
        // SAFETY: with both halves gone no other thread can reach these nodes; each was
        // allocated by `Node::boxed`.
        let next = unsafe { (*node).next.load(Ordering::Acquire) };
        drop(unsafe { Box::from_raw(node) });
        node = next;
    }
}

impl<T> Drop for Sender<T> {
    fn drop(&mut self) {
        release_half(&self.shared);
    }
}

impl<T> Drop for Receiver<T> {
    fn drop(&mut self) {
        release_half(&self.shared);
    }
}

#[cfg(test)]
mod tests {
    use super::channel;
    use googletest::prelude::*;
    use rstest::rstest;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[rstest]
    fn values_arrive_in_send_order() {
        let (mut sender, mut receiver) = channel::<u32>();
        sender.send(1);
        sender.send(2);
        sender.send(3);

        assert_that!(receiver.try_recv(), eq(Some(1)));
        assert_that!(receiver.try_recv(), eq(Some(2)));
        assert_that!(receiver.try_recv(), eq(Some(3)));
        assert_that!(receiver.try_recv(), eq(None));
    }

    #[rstest]
    fn blocking_recv_wakes_on_cross_thread_send() {
        let (mut sender, mut receiver) = channel::<&'static str>();
        let consumer = thread::spawn(move || receiver.recv());

        thread::sleep(Duration::from_millis(20));
        sender.send("handoff");

        let received = consumer.join().expect("consumer thread must not panic");
        assert_that!(received, eq("handoff"));
    }

    #[rstest]
    fn recv_timeout_returns_none_when_idle() {
        let (_sender, mut receiver) = channel::<u8>();
        assert_that!(receiver.recv_timeout(Duration::from_millis(10)), eq(None));
    }

    #[rstest]
    fn many_values_cross_threads_in_order() {
        let (mut sender, mut receiver) = channel::<usize>();
        let producer = thread::spawn(move || {
            for value in 0..10_000 {
                sender.send(value);
            }
        });

        for expected in 0..10_000 {
            assert_that!(receiver.recv(), eq(expected));
        }
        producer.join().expect("producer thread must not panic");
    }

    struct DropProbe(Arc<AtomicUsize>);

    impl Drop for DropProbe {
        fn drop(&mut self) {
            let _ = self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[rstest]
    fn unconsumed_values_are_dropped_with_the_channel() {
        let drops = Arc::new(AtomicUsize::new(0));
        {
            let (mut sender, receiver) = channel::<DropProbe>();
            sender.send(DropProbe(Arc::clone(&drops)));
            sender.send(DropProbe(Arc::clone(&drops)));
            drop(receiver);
        }
        assert_that!(drops.load(Ordering::SeqCst), eq(2_usize));
    }
}
