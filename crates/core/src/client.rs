use std::future::poll_fn;
use std::pin::{Pin, pin};
use std::sync::Arc;

use banter_model::{ChatProvider, ChatRequest, ChatResponse, ProviderError};
use tracing::Instrument;

type SendRequestResult = Result<String, Box<dyn ProviderError>>;
type BoxedSendRequestFuture =
    Pin<Box<dyn Future<Output = SendRequestResult> + Send>>;
#[rustfmt::skip]
type HandlerFn = Arc<
    dyn Fn(ChatRequest, Box<dyn Fn(String) + Send + 'static>)
        -> BoxedSendRequestFuture + Send + Sync
>;

/// A wrapper around a chat provider that maintains an execution
/// environment for the provider and provides a type-erased interface
/// for the other modules.
#[derive(Clone)]
pub(crate) struct ChatClient {
    handler_fn: HandlerFn,
}

impl ChatClient {
    #[inline]
    pub(crate) fn new<P: ChatProvider + 'static>(provider: P) -> Self {
        // We have to erase the type `P`, since `ChatClient` doesn't have a
        // generic parameter and we don't want it either.
        let handler_fn: HandlerFn = Arc::new(move |req, on_update| {
            let fut = provider.send_request(&req);
            Box::pin(
                async move {
                    trace!("got a request: {:?}", req);
                    let resp_or_err = fut.await;
                    drive_response::<P>(resp_or_err, on_update).await
                }
                .instrument(trace_span!("chat client req")),
            )
        });
        Self { handler_fn }
    }

    /// Sends a request and returns the final accumulated reply.
    ///
    /// `on_update` is invoked after every received fragment with the
    /// *full* text accumulated so far, not just the fragment. Each call
    /// therefore strictly extends the previous one.
    ///
    /// # Cancel safety
    ///
    /// This method is cancel safe. The response stops streaming further
    /// fragments when this operation is cancelled.
    #[inline]
    pub(crate) async fn send_request(
        &self,
        req: ChatRequest,
        on_update: impl Fn(String) + Send + 'static,
    ) -> SendRequestResult {
        (self.handler_fn)(req, Box::new(on_update)).await
    }
}

async fn drive_response<P: ChatProvider + 'static>(
    resp_or_err: Result<P::Response, P::Error>,
    on_update: Box<dyn Fn(String) + Send + 'static>,
) -> SendRequestResult {
    let resp = match resp_or_err {
        Ok(resp) => resp,
        Err(err) => {
            error!("got an error: {err}");
            return Err(Box::new(err));
        }
    };

    let mut text = String::new();

    trace!("start receiving fragments");

    let mut pinned_resp = pin!(resp);
    loop {
        let delta_or_err =
            poll_fn(|cx| pinned_resp.as_mut().poll_next_delta(cx)).await;
        let delta = match delta_or_err {
            Ok(delta) => delta,
            Err(err) => {
                error!("got an error: {err}");
                return Err(Box::new(err));
            }
        };

        let Some(delta) = delta else {
            break;
        };
        trace!("got a fragment: {delta:?}");

        text.push_str(&delta);
        on_update(text.clone());
    }

    trace!("finished a request");

    Ok(text)
}
