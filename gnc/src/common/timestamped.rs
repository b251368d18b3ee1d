use crate::Instant;

/// A value tagged with the instant it was produced at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timestamped<T> {
    pub t: Instant,
    pub v: T,
}

impl<T> Timestamped<T> {
    pub fn new(t: Instant, v: T) -> Self {
        Timestamped { t, v }
    }
}

pub type Ts<T> = Timestamped<T>;
