use bytes::Bytes;
use std::future::Future;

use crate::reply::HandlerOutcome;

/// Turns a request body into a reply.
///
/// The handler owns decoding and routing. Whatever goes wrong inside it must
/// come back as an [`RpcFailure`](crate::error::RpcFailure) so the dispatcher
/// can still reply to the caller.
pub trait RequestHandler: Send + Sync {
    fn handle(&self, body: Bytes) -> impl Future<Output = HandlerOutcome> + Send;
}

/// A handler backed by an async closure.
#[derive(Clone)]
pub struct HandlerFn<F> {
    f: F,
}

/// Helper to build a [`RequestHandler`] from an async closure.
///
/// # Example
/// ```ignore
/// let handler = handler_fn(|body: Bytes| async move {
///     Ok(serde_json::json!({ "echo": String::from_utf8_lossy(&body) }))
/// });
/// ```
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(Bytes) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerOutcome> + Send,
{
    HandlerFn { f }
}

impl<F, Fut> RequestHandler for HandlerFn<F>
where
    F: Fn(Bytes) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerOutcome> + Send,
{
    fn handle(&self, body: Bytes) -> impl Future<Output = HandlerOutcome> + Send {
        (self.f)(body)
    }
}
