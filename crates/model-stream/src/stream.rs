use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;

use crate::types::ChatMessage;
use crate::Result;

/// Channel depth between a producer task and its [`TokenStream`].
pub(crate) const CHANNEL_DEPTH: usize = 64;

// ─── TokenSource ──────────────────────────────────────────────────────────

/// Anything that can turn a conversation into a stream of text fragments.
///
/// Implementations spawn their own producer task and return immediately;
/// the first fragment is requested only once the task runs.
pub trait TokenSource: Send + Sync {
    fn stream(&self, messages: Vec<ChatMessage>) -> TokenStream;

    /// Short label for logs.
    fn name(&self) -> &str;
}

// ─── TokenStream ──────────────────────────────────────────────────────────

/// An ordered stream of text fragments. `None` is end-of-stream; an `Err`
/// item is the upstream error signal and is always the last item.
///
/// Backed by a Tokio mpsc channel. Dropping the stream closes the receiver,
/// which makes the producer stop at its next send.
pub struct TokenStream {
    rx: mpsc::Receiver<Result<String>>,
}

impl TokenStream {
    /// Create a connected sender/stream pair.
    pub fn channel() -> (mpsc::Sender<Result<String>>, TokenStream) {
        let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
        (tx, TokenStream { rx })
    }

    pub fn from_channel(rx: mpsc::Receiver<Result<String>>) -> Self {
        Self { rx }
    }

    /// A stream that ends immediately.
    pub fn empty() -> Self {
        let (_, stream) = Self::channel();
        stream
    }
}

impl Stream for TokenStream {
    type Item = Result<String>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ModelError;
    use futures::StreamExt;

    #[tokio::test]
    async fn yields_items_in_order_then_ends() {
        let (tx, stream) = TokenStream::channel();
        tokio::spawn(async move {
            for s in ["a", "b", "c"] {
                tx.send(Ok(s.to_string())).await.unwrap();
            }
        });
        let items: Vec<String> = stream.map(|r| r.unwrap()).collect().await;
        assert_eq!(items, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn error_is_delivered_as_an_item() {
        let (tx, mut stream) = TokenStream::channel();
        tx.send(Ok("x".into())).await.unwrap();
        tx.send(Err(ModelError::Upstream("gone".into())))
            .await
            .unwrap();
        drop(tx);
        assert_eq!(stream.next().await.unwrap().unwrap(), "x");
        assert!(matches!(
            stream.next().await,
            Some(Err(ModelError::Upstream(_)))
        ));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn dropping_stream_closes_producer_side() {
        let (tx, stream) = TokenStream::channel();
        drop(stream);
        assert!(tx.send(Ok("late".into())).await.is_err());
    }

    #[tokio::test]
    async fn empty_stream_ends() {
        let mut stream = TokenStream::empty();
        assert!(stream.next().await.is_none());
    }
}
