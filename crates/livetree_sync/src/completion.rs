//! Asynchronous operation results.

use crate::error::{SyncError, SyncResult};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot::{self, error::TryRecvError};

/// The pending result of a remote operation.
///
/// A `Completion` resolves exactly once, to either a value or a typed error.
/// It can be awaited, or polled without an executor with
/// [`Completion::try_take`] once the store's event queue has been driven.
#[must_use = "a completion reports the only error channel of the operation"]
#[derive(Debug)]
pub struct Completion<T> {
    rx: oneshot::Receiver<SyncResult<T>>,
}

/// The sending half of a [`Completion`].
#[derive(Debug)]
pub(crate) struct Completer<T> {
    tx: oneshot::Sender<SyncResult<T>>,
}

impl<T> Completer<T> {
    /// Resolves the paired completion. A dropped receiver is ignored.
    pub(crate) fn complete(self, result: SyncResult<T>) {
        let _ = self.tx.send(result);
    }
}

/// Creates a connected completer/completion pair.
pub(crate) fn pair<T>() -> (Completer<T>, Completion<T>) {
    let (tx, rx) = oneshot::channel();
    (Completer { tx }, Completion { rx })
}

impl<T> Completion<T> {
    /// Creates a completion that is already resolved.
    pub fn resolved(result: SyncResult<T>) -> Self {
        let (completer, completion) = pair();
        completer.complete(result);
        completion
    }

    /// Takes the result if the operation has finished.
    ///
    /// Returns `None` while the operation is pending. Returns
    /// `Some(Err(SyncError::Dropped))` if the operation was abandoned, and
    /// also on any call after the result has been taken.
    pub fn try_take(&mut self) -> Option<SyncResult<T>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Closed) => Some(Err(SyncError::Dropped)),
        }
    }
}

impl<T> Future for Completion<T> {
    type Output = SyncResult<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.get_mut().rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(SyncError::Dropped)))
    }
}
