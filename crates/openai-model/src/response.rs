use std::pin::Pin;
use std::task::{Context, Poll, ready};

use banter_model::{ChatResponse, ErrorKind};
use pin_project_lite::pin_project;

use crate::Error;
use crate::io::{Sse, SseError};
use crate::proto::ChatCompletionChunk;

/// The literal end-of-stream marker, distinct from any content payload.
const DONE_SENTINEL: &str = "[DONE]";

struct PartialState {
    sse: Sse,
}

type PinnedFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
type NextDelta = Result<(Option<String>, PartialState), Error>;

pin_project! {
    pub struct OpenAIResponse {
        next_delta_fut: Option<PinnedFuture<NextDelta>>,
    }
}

impl OpenAIResponse {
    #[inline]
    pub fn from_sse(sse: Sse) -> Self {
        let partial_state = PartialState { sse };
        let next_delta_fut = async move { next_delta(partial_state).await };
        Self {
            next_delta_fut: Some(Box::pin(next_delta_fut)),
        }
    }
}

impl ChatResponse for OpenAIResponse {
    type Error = crate::Error;

    fn poll_next_delta(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<String>, Self::Error>> {
        let this = self.project();
        let Some(next_delta_fut) = this.next_delta_fut else {
            // The stream has been exhausted.
            return Poll::Ready(Ok(None));
        };
        let (delta, partial_state) =
            match ready!(next_delta_fut.as_mut().poll(cx)) {
                Ok((Some(delta), partial_state)) => (delta, partial_state),
                Ok((None, _)) => {
                    *this.next_delta_fut = None;
                    return Poll::Ready(Ok(None));
                }
                Err(err) => {
                    *this.next_delta_fut = None;
                    return Poll::Ready(Err(err));
                }
            };

        // The stream may still have more data to pull, create a new future
        // for the next delta.
        let next_delta_fut = async move { next_delta(partial_state).await };
        *this.next_delta_fut = Some(Box::pin(next_delta_fut));

        Poll::Ready(Ok(Some(delta)))
    }
}

async fn next_delta(mut partial_state: PartialState) -> NextDelta {
    let sse = &mut partial_state.sse;

    loop {
        let sse_event = match sse.next_event().await {
            Ok(Some(event)) => event,
            Ok(None) => break,
            Err(SseError::ChunksError(err)) => {
                return Err(Error::new(err.0, ErrorKind::Transport));
            }
            Err(err) => {
                return Err(Error::new(format!("{err:?}"), ErrorKind::Decode));
            }
        };
        trace!("got sse event: {sse_event}");
        if sse_event == DONE_SENTINEL {
            break;
        }

        let chunk = serde_json::from_str::<ChatCompletionChunk>(&sse_event)
            .map_err(|err| Error::new(format!("{err}"), ErrorKind::Decode))?;
        let Some(choice) = chunk.choices.into_iter().next() else {
            continue;
        };

        if choice.finish_reason.is_some() {
            break;
        }

        // Role-only chunks carry no content and contribute nothing. They
        // are swallowed here so that every delivered delta is non-empty.
        if let Some(content) = choice.delta.content {
            if !content.is_empty() {
                return Ok((Some(content), partial_state));
            }
        }
    }

    Ok((None, partial_state))
}

#[cfg(test)]
mod tests {
    use std::future::poll_fn;
    use std::pin::pin;

    use bytes::Bytes;

    use super::*;
    use crate::io::Chunks;

    fn response_from_chunks(
        chunks: impl Into<std::collections::VecDeque<Bytes>>,
    ) -> OpenAIResponse {
        let chunks = Chunks::from_vec_deque(chunks.into());
        OpenAIResponse::from_sse(Sse::new(chunks))
    }

    #[tokio::test]
    async fn test_simple_stream() {
        let mut resp = pin!(response_from_chunks(vec![
            Bytes::from_static(
                br#"data: {"choices":[{"delta":{"role":"assistant"},"finish_reason":null}]}

"#
            ),
            Bytes::from_static(
                br#"data: {"choices":[{"delta":{"content":"Hi"},"finish_reason":null}]}

"#
            ),
            Bytes::from_static(
                br#"data: {"choices":[{"delta":{"content":" there"},"finish_reason":null}]}

"#
            ),
            Bytes::from_static(
                br#"data: {"choices":[{"delta":{},"finish_reason":"stop"}]}

data: [DONE]

"#
            ),
        ]));

        let mut deltas = vec![];
        while let Some(delta) =
            poll_fn(|cx| resp.as_mut().poll_next_delta(cx))
                .await
                .unwrap()
        {
            deltas.push(delta);
        }
        assert_eq!(deltas, ["Hi", " there"]);

        // Polling after completion keeps returning `None`.
        let delta = poll_fn(|cx| resp.as_mut().poll_next_delta(cx))
            .await
            .unwrap();
        assert_eq!(delta, None);
    }

    #[tokio::test]
    async fn test_done_sentinel_terminates() {
        let mut resp = pin!(response_from_chunks(vec![
            Bytes::from_static(b"data: [DONE]\n\n"),
            Bytes::from_static(
                br#"data: {"choices":[{"delta":{"content":"late"},"finish_reason":null}]}

"#
            ),
        ]));

        let delta = poll_fn(|cx| resp.as_mut().poll_next_delta(cx))
            .await
            .unwrap();
        assert_eq!(delta, None);
        let delta = poll_fn(|cx| resp.as_mut().poll_next_delta(cx))
            .await
            .unwrap();
        assert_eq!(delta, None);
    }

    #[tokio::test]
    async fn test_transport_close_terminates() {
        let mut resp = pin!(response_from_chunks(vec![Bytes::from_static(
            br#"data: {"choices":[{"delta":{"content":"Hi"},"finish_reason":null}]}

"#
        )]));

        let delta = poll_fn(|cx| resp.as_mut().poll_next_delta(cx))
            .await
            .unwrap();
        assert_eq!(delta.as_deref(), Some("Hi"));
        let delta = poll_fn(|cx| resp.as_mut().poll_next_delta(cx))
            .await
            .unwrap();
        assert_eq!(delta, None);
    }

    #[tokio::test]
    async fn test_malformed_chunk() {
        let mut resp = pin!(response_from_chunks(vec![Bytes::from_static(
            b"data: {not json}\n\n"
        )]));

        let err = poll_fn(|cx| resp.as_mut().poll_next_delta(cx))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Decode);
    }
}
