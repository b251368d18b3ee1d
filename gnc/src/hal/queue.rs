use core::sync::atomic::{AtomicUsize, Ordering};

use alloc::{boxed::Box, sync::Arc};
use heapless::mpmc::MpMcQueue;

use super::channel::{ChannelError, Full, Receiver, Sender};
use crate::{Instant, common::Ts};

/// Bounded lock-free channel. `N` must be a power of two.
///
/// Any number of senders may be created, but only one receiver, since a
/// second one would steal samples from the first.
pub struct QueueChannel<T, const N: usize> {
    inner: Arc<QueueInner<T, N>>,
    receiver_taken: bool,
}

struct QueueInner<T, const N: usize> {
    queue: MpMcQueue<Ts<T>, N>,
    len: AtomicUsize,
    lagged: AtomicUsize,
}

impl<T, const N: usize> QueueChannel<T, N> {
    pub fn new() -> Self {
        QueueChannel {
            inner: Arc::new(QueueInner {
                queue: MpMcQueue::new(),
                len: AtomicUsize::new(0),
                lagged: AtomicUsize::new(0),
            }),
            receiver_taken: false,
        }
    }

    pub fn sender(&self) -> QueueSender<T, N> {
        QueueSender {
            inner: self.inner.clone(),
        }
    }

    pub fn receiver(&mut self) -> Result<QueueReceiver<T, N>, ChannelError> {
        if self.receiver_taken {
            return Err(ChannelError::TooManyReceivers);
        }
        self.receiver_taken = true;

        Ok(QueueReceiver {
            inner: self.inner.clone(),
        })
    }
}

impl<T, const N: usize> Default for QueueChannel<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static, const N: usize> QueueChannel<T, N> {
    pub fn boxed_sender(&self) -> Box<dyn Sender<T> + Send> {
        Box::new(self.sender())
    }

    pub fn boxed_receiver(&mut self) -> Result<Box<dyn Receiver<T> + Send>, ChannelError> {
        Ok(Box::new(self.receiver()?))
    }
}

pub struct QueueSender<T, const N: usize> {
    inner: Arc<QueueInner<T, N>>,
}

impl<T, const N: usize> Sender<T> for QueueSender<T, N> {
    fn try_send(&mut self, ts: Instant, item: T) -> Result<(), Full<T>> {
        match self.inner.queue.enqueue(Ts::new(ts, item)) {
            Ok(()) => {
                self.inner.len.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            Err(rejected) => {
                self.inner.lagged.fetch_add(1, Ordering::SeqCst);
                Err(Full(rejected))
            }
        }
    }
}

pub struct QueueReceiver<T, const N: usize> {
    inner: Arc<QueueInner<T, N>>,
}

impl<T, const N: usize> Receiver<T> for QueueReceiver<T, N> {
    fn try_recv(&mut self) -> Option<Ts<T>> {
        let item = self.inner.queue.dequeue()?;
        self.inner.len.fetch_sub(1, Ordering::SeqCst);
        Some(item)
    }

    fn try_recv_last(&mut self) -> Option<Ts<T>> {
        let mut last = None;
        while let Some(item) = self.try_recv() {
            last = Some(item);
        }
        last
    }

    fn len(&self) -> usize {
        self.inner.len.load(Ordering::SeqCst)
    }

    fn capacity(&self) -> usize {
        N
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_full(&self) -> bool {
        self.len() >= N
    }

    fn num_lagged(&self) -> usize {
        self.inner.lagged.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_fifo_order_and_len() {
        let mut channel = QueueChannel::<u32, 4>::new();
        let mut tx = channel.sender();
        let mut rx = channel.receiver().unwrap();

        assert!(rx.is_empty());
        tx.try_send(Instant::from_micros(1), 10).unwrap();
        tx.try_send(Instant::from_micros(2), 20).unwrap();
        assert_eq!(rx.len(), 2);

        let first = rx.try_recv().unwrap();
        assert_eq!(first.v, 10);
        assert_eq!(first.t, Instant::from_micros(1));
        assert_eq!(rx.try_recv().unwrap().v, 20);
        assert!(rx.try_recv().is_none());
        assert_eq!(rx.len(), 0);
    }

    #[test]
    fn test_overflow_is_counted() {
        let mut channel = QueueChannel::<u32, 2>::new();
        let mut tx = channel.sender();
        let rx = channel.receiver().unwrap();

        tx.try_send(Instant::from_micros(0), 1).unwrap();
        tx.try_send(Instant::from_micros(0), 2).unwrap();
        let rejected = tx.try_send(Instant::from_micros(0), 3).unwrap_err();

        assert_eq!(rejected.0.v, 3);
        assert!(rx.is_full());
        assert_eq!(rx.num_lagged(), 1);
    }

    #[test]
    fn test_recv_last_drains() {
        let mut channel = QueueChannel::<u32, 8>::new();
        let mut tx = channel.sender();
        let mut rx = channel.receiver().unwrap();

        for i in 0..5 {
            tx.try_send(Instant::from_micros(i), i as u32).unwrap();
        }

        assert_eq!(rx.try_recv_last().unwrap().v, 4);
        assert!(rx.is_empty());
    }

    #[test]
    fn test_single_receiver() {
        let mut channel = QueueChannel::<u32, 2>::new();
        let _rx = channel.receiver().unwrap();
        assert!(matches!(
            channel.receiver(),
            Err(ChannelError::TooManyReceivers)
        ));
    }
}
