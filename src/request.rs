use crate::recorder::Recorder;
use crate::session::SessionError;
use log::{debug, error, warn};
use std::time::Duration;
use tgcore::api::{Object, Request};
use tgcore::correlator::Continuation;
use thiserror::Error;
use tokio::time::timeout;

/// Failures of a single request.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("no response to {0}")]
    NoResponse(&'static str),
    #[error("{label} failed with code {code}: {message}")]
    Remote {
        label: &'static str,
        code: i32,
        message: String,
    },
    #[error("{0} timed out")]
    Timeout(&'static str),
    #[error("session collaborator is not connected")]
    NotConnected,
    #[error("session error: {0}")]
    Session(#[from] SessionError),
    #[error("internal channel closed unexpectedly")]
    InternalChannelClosed,
}

/// Log error and missing replies under `label`; pass everything else on.
pub(crate) fn reply_or_log(label: &str, reply: Option<Object>) -> Option<Object> {
    match reply {
        Some(Object::Error { code, message }) => {
            warn!(target: "Recorder/Request", "{label} failed with code {code}: {message}");
            None
        }
        Some(object) => Some(object),
        None => {
            error!(target: "Recorder/Request", "No response to {label}");
            None
        }
    }
}

impl Recorder {
    /// Send `request` and register `continuation` for its reply. If the
    /// request cannot be handed to the collaborator, the continuation runs
    /// right away with `None`.
    pub(crate) fn send_with(
        &self,
        request: Request,
        continuation: Option<Continuation<Object>>,
    ) -> u64 {
        let label = request.label();
        let request_id = self.correlator.register(continuation);

        let sent = match self.client() {
            Some(client) => client.send(request_id, request).map_err(RequestError::from),
            None => Err(RequestError::NotConnected),
        };
        match sent {
            Ok(()) => debug!(target: "Recorder/Request", "Sent {label} as request {request_id}"),
            Err(e) => {
                warn!(target: "Recorder/Request", "Could not send {label}: {e}");
                self.correlator.complete(request_id, None);
            }
        }
        request_id
    }

    /// Send without waiting; failures are logged with the request's label.
    pub(crate) fn send_logged(&self, request: Request) -> u64 {
        let label = request.label();
        self.send_with(
            request,
            Some(Box::new(move |reply| {
                reply_or_log(label, reply);
            })),
        )
    }

    /// Send and await the reply. Must not be called from the event loop,
    /// which is what delivers the reply.
    pub async fn call(&self, request: Request, deadline: Duration) -> Result<Object, RequestError> {
        let label = request.label();
        let (tx, rx) = tokio::sync::oneshot::channel();
        let request_id = self.send_with(
            request,
            Some(Box::new(move |reply: Option<Object>| {
                let _ = tx.send(reply);
            })),
        );

        match timeout(deadline, rx).await {
            Ok(Ok(Some(Object::Error { code, message }))) => Err(RequestError::Remote {
                label,
                code,
                message,
            }),
            Ok(Ok(Some(object))) => Ok(object),
            Ok(Ok(None)) => Err(RequestError::NoResponse(label)),
            Ok(Err(_)) => Err(RequestError::InternalChannelClosed),
            Err(_) => {
                self.correlator.cancel(request_id);
                Err(RequestError::Timeout(label))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_and_missing_replies_are_swallowed() {
        assert!(reply_or_log("getUser", None).is_none());
        assert!(
            reply_or_log(
                "getUser",
                Some(Object::Error {
                    code: 404,
                    message: "Not Found".into()
                })
            )
            .is_none()
        );
        assert_eq!(reply_or_log("close", Some(Object::Ok)), Some(Object::Ok));
    }
}
