use thiserror::Error;

use crate::{Instant, common::Ts};

pub trait Receiver<T> {
    fn try_recv(&mut self) -> Option<Ts<T>>;

    /// Drains the channel and returns the most recent item.
    fn try_recv_last(&mut self) -> Option<Ts<T>>;

    fn len(&self) -> usize;

    fn capacity(&self) -> usize;

    fn is_empty(&self) -> bool;

    fn is_full(&self) -> bool;

    /// Number of items dropped because the channel was full.
    fn num_lagged(&self) -> usize;
}

/// Returned by [`Sender::try_send`] with the rejected item.
#[derive(Debug)]
pub struct Full<T>(pub Ts<T>);

pub trait Sender<T> {
    fn try_send(&mut self, ts: Instant, item: T) -> Result<(), Full<T>>;
}

#[derive(Error, Debug, Clone)]
pub enum ChannelError {
    #[error("No more receivers available for this channel")]
    TooManyReceivers,
}
