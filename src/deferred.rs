//! Single-assignment deferred results.
//!
//! A [`Promise`] is held by the bridge and resolved at most once; any number
//! of [`Deferred`] clones observe the outcome. Resolving twice is a no-op,
//! not an error. Built on `tokio::sync::watch` so late observers still see
//! the stored value.

use tokio::sync::watch;

use crate::error::BridgeError;

type Slot<T> = Option<Result<T, BridgeError>>;

/// Write side of a deferred result.
#[derive(Debug)]
pub struct Promise<T> {
    sender: watch::Sender<Slot<T>>,
}

/// Read side of a deferred result.
#[derive(Debug, Clone)]
pub struct Deferred<T> {
    receiver: watch::Receiver<Slot<T>>,
}

/// Create an unresolved promise and its deferred result.
pub fn pair<T>() -> (Promise<T>, Deferred<T>) {
    let (sender, receiver) = watch::channel(None);
    (Promise { sender }, Deferred { receiver })
}

impl<T> Promise<T> {
    /// Resolve with a value. Returns false if already resolved.
    pub fn succeed(&self, value: T) -> bool {
        self.complete(Ok(value))
    }

    /// Resolve with an error. Returns false if already resolved.
    pub fn fail(&self, error: BridgeError) -> bool {
        self.complete(Err(error))
    }

    /// Resolve with an outcome. Returns false if already resolved.
    pub fn complete(&self, outcome: Result<T, BridgeError>) -> bool {
        self.sender.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(outcome);
            true
        })
    }
}

impl<T: Clone> Deferred<T> {
    /// A deferred result that is already resolved.
    pub fn ready(outcome: Result<T, BridgeError>) -> Self {
        let (sender, receiver) = watch::channel(Some(outcome));
        drop(sender);
        Self { receiver }
    }

    /// Wait for the outcome.
    ///
    /// Resolves with [`BridgeError::Released`] if the promise is dropped
    /// without ever being resolved.
    pub async fn wait(&self) -> Result<T, BridgeError> {
        let mut receiver = self.receiver.clone();
        let outcome = match receiver.wait_for(Option::is_some).await {
            Ok(slot) => slot.clone().unwrap_or(Err(BridgeError::Released)),
            Err(_) => Err(BridgeError::Released),
        };
        outcome
    }

    /// The outcome if already resolved.
    pub fn try_get(&self) -> Option<Result<T, BridgeError>> {
        self.receiver.borrow().clone()
    }

    /// Whether the outcome is known.
    pub fn is_resolved(&self) -> bool {
        self.receiver.borrow().is_some()
    }
}
