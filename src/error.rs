use std::result::Result as StdResult;

use thiserror::Error;

pub use crate::net::errors::NetworkError;

pub type Result<T, E = NetworkError> = StdResult<T, E>;

/// Failures raised by [`CumulativeBuffer`](crate::buffer::CumulativeBuffer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BufferError {
    /// The buffer cannot hold `requested` more bytes without growing.
    #[error("buffer overflow: {requested} bytes requested, {available} free of {capacity}")]
    Overflow {
        requested: usize,
        available: usize,
        capacity: usize,
    },
    /// Fewer than `requested` bytes are buffered.
    #[error("buffer underflow: {requested} bytes requested, {available} buffered")]
    Underflow { requested: usize, available: usize },
}
