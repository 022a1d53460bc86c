use crate::dispatcher::command::CommandError;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

pub(crate) fn response_channel<R>() -> (CommandResponder<R>, CommandResponse<R>) {
    let (tx, rx) = oneshot::channel();

    (CommandResponder(tx), CommandResponse { rx })
}

pub(crate) struct CommandResponder<R>(oneshot::Sender<Result<R, CommandError>>);

impl<R> CommandResponder<R> {
    pub(crate) fn send(self, result: Result<R, CommandError>) {
        // Caller may have dropped the response. Nothing to do then.
        let _ = self.0.send(result);
    }
}

/// Outcome of one dispatched command. Always completes: a responder dropped without answering
/// resolves as `CommandError::Cancelled`.
pub struct CommandResponse<R> {
    rx: oneshot::Receiver<Result<R, CommandError>>,
}

impl<R> CommandResponse<R> {
    /// A response that is already resolved.
    pub fn completed(result: Result<R, CommandError>) -> Self {
        let (responder, response) = response_channel();
        responder.send(result);
        response
    }
}

impl<R> Future for CommandResponse<R> {
    type Output = Result<R, CommandError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let rx = Pin::new(&mut self.rx);

        match rx.poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(CommandError::Cancelled)),
        }
    }
}
