// Copyright 2024 tison <wander4096@gmail.com>
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::fmt;
use std::sync::Arc;

/// Error returned by [`Sender::send`] when the channel is closed.
///
/// The element that could not be sent is handed back and can be retrieved with
/// [`SendError::into_inner`].
///
/// [`Sender::send`]: crate::mpmc::Sender::send
#[derive(Clone, PartialEq, Eq, thiserror::Error)]
#[error("sending on a closed channel")]
pub struct SendError<T> {
    value: T,
    cause: Option<Arc<str>>,
}

impl<T> fmt::Debug for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SendError")
            .field("cause", &self.cause)
            .finish_non_exhaustive()
    }
}

impl<T> SendError<T> {
    pub(crate) fn new(value: T, cause: Option<Arc<str>>) -> Self {
        Self { value, cause }
    }

    /// Returns a reference to the element that could not be sent.
    pub fn as_inner(&self) -> &T {
        &self.value
    }

    /// Consumes the error, returning the element that could not be sent.
    pub fn into_inner(self) -> T {
        self.value
    }

    /// Returns the cause the channel was closed with, if any.
    pub fn cause(&self) -> Option<&str> {
        self.cause.as_deref()
    }
}

/// Error returned by [`Sender::try_send`].
///
/// [`Sender::try_send`]: crate::mpmc::Sender::try_send
#[derive(Clone, PartialEq, Eq, thiserror::Error)]
pub enum TrySendError<T> {
    /// The buffer is full and the overflow policy is [`Block`](crate::policy::OverflowPolicy::Block).
    #[error("sending on a full channel")]
    Full(T),
    /// The channel is closed.
    #[error("sending on a closed channel")]
    Closed(T),
}

impl<T> fmt::Debug for TrySendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrySendError::Full(..) => f.write_str("Full(..)"),
            TrySendError::Closed(..) => f.write_str("Closed(..)"),
        }
    }
}

impl<T> TrySendError<T> {
    /// Consumes the error, returning the element that could not be sent.
    pub fn into_inner(self) -> T {
        match self {
            TrySendError::Full(value) | TrySendError::Closed(value) => value,
        }
    }

    /// Returns `true` if the send failed because the buffer is full.
    pub fn is_full(&self) -> bool {
        matches!(self, TrySendError::Full(..))
    }
}

/// Error returned by [`Receiver::recv`] once the channel is closed and drained.
///
/// [`Receiver::recv`]: crate::mpmc::Receiver::recv
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("receiving on a closed channel")]
pub struct RecvError {
    cause: Option<Arc<str>>,
}

impl RecvError {
    pub(crate) fn new(cause: Option<Arc<str>>) -> Self {
        Self { cause }
    }

    /// Returns the cause the channel was closed with, if any.
    pub fn cause(&self) -> Option<&str> {
        self.cause.as_deref()
    }
}

/// Error returned by [`Receiver::try_recv`].
///
/// [`Receiver::try_recv`]: crate::mpmc::Receiver::try_recv
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TryRecvError {
    /// The channel is open but currently has nothing to receive.
    #[error("receiving on an empty channel")]
    Empty,
    /// The channel is closed and drained.
    #[error(transparent)]
    Closed(#[from] RecvError),
}
