use aiwire_core::AiwireResult;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

/// Receives fragments in push mode.
///
/// The driver awaits each call before reading the next frame, so a slow
/// handler applies backpressure to the network read. Returning an error
/// fails the stream.
#[async_trait]
pub trait FragmentHandler<F: Sync>: Send {
    /// Called once per merged fragment, in arrival order.
    async fn handle(&mut self, fragment: &F) -> AiwireResult<()>;
}

/// Forwards a clone of each fragment to a channel. A dropped receiver is
/// not an error; the stream keeps accumulating.
#[async_trait]
impl<F> FragmentHandler<F> for mpsc::Sender<F>
where
    F: Clone + Send + Sync + 'static,
{
    async fn handle(&mut self, fragment: &F) -> AiwireResult<()> {
        if self.send(fragment.clone()).await.is_err() {
            debug!("Fragment receiver dropped");
        }
        Ok(())
    }
}

/// Handler backed by a synchronous closure. See [`handler_fn`].
pub struct FnHandler<C>(C);

/// Wraps a closure as a [`FragmentHandler`].
///
/// ```
/// use aiwire_stream::handler_fn;
/// use aiwire_core::ChatChunk;
///
/// let mut text = String::new();
/// let _handler = handler_fn(move |chunk: &ChatChunk| {
///     text.push_str(&chunk.text());
///     Ok(())
/// });
/// ```
pub fn handler_fn<F, C>(f: C) -> FnHandler<C>
where
    C: FnMut(&F) -> AiwireResult<()> + Send,
{
    FnHandler(f)
}

#[async_trait]
impl<F, C> FragmentHandler<F> for FnHandler<C>
where
    F: Sync,
    C: FnMut(&F) -> AiwireResult<()> + Send,
{
    async fn handle(&mut self, fragment: &F) -> AiwireResult<()> {
        (self.0)(fragment)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use aiwire_core::AiwireError;

    #[tokio::test]
    async fn test_sender_forwards_and_tolerates_closed_receiver() {
        let (mut tx, mut rx) = mpsc::channel::<u32>(4);
        tx.handle(&7).await.unwrap();
        assert_eq!(rx.recv().await, Some(7));

        drop(rx);
        assert!(tx.handle(&8).await.is_ok());
    }

    #[tokio::test]
    async fn test_closure_handler() {
        let mut seen = Vec::new();
        {
            let mut handler = handler_fn(|n: &u32| {
                if *n > 2 {
                    return Err(AiwireError::Handler(format!("too big: {n}")));
                }
                seen.push(*n);
                Ok(())
            });
            handler.handle(&1).await.unwrap();
            handler.handle(&2).await.unwrap();
            assert!(handler.handle(&3).await.is_err());
        }
        assert_eq!(seen, vec![1, 2]);
    }
}
