//! Single-fire completion signalling for in-flight data writes.
//!
//! A completion is a promise/future pair: the storage task holds the
//! [`CompletionHandle`] and fires it exactly once when the physical write
//! lands; whoever needs to order against the write awaits the paired
//! [`WriteCompletion`]. Firing consumes the handle, so re-signalling is a
//! compile error rather than a runtime check.
//!
//! A handle may chain an inner callback: one physical completion then both
//! notifies the caller-supplied callback and releases the waiter, in that
//! order.

use tokio::sync::oneshot;

use crate::error::{Error, Result};

/// Caller-supplied notification invoked when a data write completes.
pub type IoCallback = Box<dyn FnOnce() + Send>;

/// Producer half: fired exactly once by the storage task.
pub struct CompletionHandle {
    tx: oneshot::Sender<Result<()>>,
    chained: Option<IoCallback>,
}

/// Consumer half: awaited by whoever must not proceed until the write lands.
pub struct WriteCompletion {
    rx: oneshot::Receiver<Result<()>>,
}

/// A fresh, unsignalled completion pair.
pub fn completion_pair() -> (CompletionHandle, WriteCompletion) {
    chained_pair(None)
}

/// A completion pair wrapping an inner callback. Firing the handle first
/// forwards to the callback, then unblocks the waiter.
pub fn chained_pair(callback: Option<IoCallback>) -> (CompletionHandle, WriteCompletion) {
    let (tx, rx) = oneshot::channel();
    (
        CompletionHandle {
            tx,
            chained: callback,
        },
        WriteCompletion { rx },
    )
}

impl CompletionHandle {
    /// Signal completion: run the chained callback, then wake the waiter.
    ///
    /// The waiter having gone away is not an error; the chained callback
    /// still runs.
    pub fn fire(self, result: Result<()>) {
        if let Some(callback) = self.chained {
            callback();
        }
        let _ = self.tx.send(result);
    }
}

impl WriteCompletion {
    /// Wait for the write to complete. Returns immediately if it already has.
    pub async fn wait(self) -> Result<()> {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => Err(Error::CompletionDropped),
        }
    }
}
