//! Cancellation signals for harness operations.
//!
//! Every harness operation accepts an optional [`CancelToken`]. When the token is
//! triggered while the operation is suspended, the operation fails promptly with
//! [`Error::Cancelled`] and store state is left exactly as if the operation had
//! not been issued. The pair is built on a `tokio::sync::watch` channel: the
//! [`CancelSource`] holds the sender, tokens are cheap clones of the receiver.

use std::future::Future;

use tokio::sync::watch;

use crate::error::Error;

/// Owning half of a cancellation pair. Dropping the source without calling
/// [`cancel`](CancelSource::cancel) leaves all tokens permanently un-cancelled.
#[derive(Debug)]
pub struct CancelSource {
    tx: watch::Sender<bool>,
}

impl CancelSource {
    /// Create a new, un-triggered cancellation source.
    pub fn new() -> CancelSource {
        let (tx, _rx) = watch::channel(false);
        CancelSource { tx }
    }

    /// Create a token observing this source. Tokens are cheap to clone and may
    /// be shared across operations.
    pub fn token(&self) -> CancelToken {
        CancelToken {
            rx: self.tx.subscribe(),
        }
    }

    /// Trigger cancellation. All outstanding and future waits on derived tokens
    /// complete immediately. Idempotent.
    pub fn cancel(&self) {
        // send_replace never fails even with no receivers.
        self.tx.send_replace(true);
    }
}

impl Default for CancelSource {
    fn default() -> CancelSource {
        CancelSource::new()
    }
}

/// Observing half of a cancellation pair.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    /// Whether the source has already been triggered.
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve when the source is triggered. If the source is dropped without
    /// triggering, this future never resolves -- the guarded operation simply
    /// runs to completion.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Race an operation future against an optional cancellation token.
///
/// With no token the operation runs unguarded. With a token, cancellation wins
/// any race (`biased` select, checked first), the operation future is dropped at
/// its current await point, and the caller gets [`Error::Cancelled`] carrying
/// the operation name.
pub(crate) async fn run_cancellable<T, F>(
    operation: &str,
    cancel: Option<&CancelToken>,
    fut: F,
) -> Result<T, Error>
where
    F: Future<Output = Result<T, Error>>,
{
    match cancel {
        None => fut.await,
        Some(token) => {
            tokio::select! {
                biased;
                _ = token.cancelled() => Err(Error::Cancelled {
                    operation: operation.to_string(),
                }),
                result = fut => result,
            }
        }
    }
}
