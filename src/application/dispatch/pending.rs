use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::domain::{Action, SessionHandle};
use crate::shared::errors::DispatchError;

pub type ConfirmationResult = Result<Value, DispatchError>;

/// Confirmation of one dispatched request.
///
/// Resolves to the CallResult payload, or to the reason there is none.
/// Resolution failures are delivered the same way, so batches can be
/// awaited uniformly.
#[derive(Debug)]
pub struct PendingConfirmation {
    handle: Option<SessionHandle>,
    action: Action,
    receiver: oneshot::Receiver<ConfirmationResult>,
}

impl PendingConfirmation {
    pub(crate) fn channel(
        handle: SessionHandle,
        action: Action,
    ) -> (oneshot::Sender<ConfirmationResult>, Self) {
        let (sender, receiver) = oneshot::channel();
        (
            sender,
            Self {
                handle: Some(handle),
                action,
                receiver,
            },
        )
    }

    /// Already completed with `error`.
    pub fn failed(handle: Option<SessionHandle>, action: Action, error: DispatchError) -> Self {
        let (sender, receiver) = oneshot::channel();
        let _ = sender.send(Err(error));
        Self {
            handle,
            action,
            receiver,
        }
    }

    /// Target session, when resolution got that far.
    pub fn handle(&self) -> Option<SessionHandle> {
        self.handle
    }

    pub fn action(&self) -> Action {
        self.action
    }

    /// Await and deserialize the confirmation payload.
    pub async fn into_typed<C: DeserializeOwned>(self) -> Result<C, DispatchError> {
        let action = self.action;
        let payload = self.await?;
        serde_json::from_value(payload)
            .map_err(|e| DispatchError::InvalidConfirmation(format!("{}: {}", action, e)))
    }
}

impl Future for PendingConfirmation {
    type Output = ConfirmationResult;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        Pin::new(&mut this.receiver).poll(cx).map(|received| {
            received.unwrap_or_else(|_| {
                Err(DispatchError::Transport(
                    "confirmation task ended without a result".into(),
                ))
            })
        })
    }
}

/// Wait for every confirmation of a broadcast.
pub async fn join_all(
    pending: HashMap<SessionHandle, PendingConfirmation>,
) -> HashMap<SessionHandle, ConfirmationResult> {
    let (handles, futures): (Vec<_>, Vec<_>) = pending.into_iter().unzip();
    let results = futures_util::future::join_all(futures).await;
    handles.into_iter().zip(results).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[tokio::test]
    async fn failed_resolves_immediately() {
        let pending = PendingConfirmation::failed(None, Action::Reset, DispatchError::NotRunning);
        assert_eq!(pending.handle(), None);
        assert_eq!(pending.await, Err(DispatchError::NotRunning));
    }

    #[tokio::test]
    async fn typed_confirmation() {
        #[derive(Deserialize)]
        struct Status {
            status: String,
        }

        let handle = SessionHandle::new();
        let (sender, pending) = PendingConfirmation::channel(handle, Action::Reset);
        sender.send(Ok(json!({"status": "Accepted"}))).unwrap();
        let status: Status = pending.into_typed().await.unwrap();
        assert_eq!(status.status, "Accepted");

        let (sender, pending) = PendingConfirmation::channel(handle, Action::Reset);
        sender.send(Ok(json!({"unexpected": true}))).unwrap();
        assert!(matches!(
            pending.into_typed::<Status>().await,
            Err(DispatchError::InvalidConfirmation(_))
        ));
    }

    #[tokio::test]
    async fn dropped_sender_is_an_error() {
        let (sender, pending) = PendingConfirmation::channel(SessionHandle::new(), Action::Reset);
        drop(sender);
        assert!(matches!(pending.await, Err(DispatchError::Transport(_))));
    }

    #[tokio::test]
    async fn join_all_keeps_keys() {
        let a = SessionHandle::new();
        let b = SessionHandle::new();
        let (sender, pending_a) = PendingConfirmation::channel(a, Action::ClearCache);
        sender.send(Ok(json!({"status": "Accepted"}))).unwrap();
        let pending_b =
            PendingConfirmation::failed(Some(b), Action::ClearCache, DispatchError::NotConnected(b));

        let results = join_all(HashMap::from([(a, pending_a), (b, pending_b)])).await;
        assert_eq!(results.len(), 2);
        assert!(results[&a].is_ok());
        assert_eq!(results[&b], Err(DispatchError::NotConnected(b)));
    }
}
